//! Base types and error handling.
//!
//! - [`neterror::NetError`]: network, pool and tunnel errors with Chromium-style codes
//! - [`context::IoResultExt`]: attach endpoint context to IO failures

pub mod context;
pub mod neterror;
