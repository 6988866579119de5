/// Something that can be delivered to a listener of kind `L`.
///
/// Events are opaque to the dispatcher: it only knows how to hand one to a
/// listener. A single broadcast event is shared by every delivery task, so
/// `apply_to` takes `&self`.
pub trait Event<L: ?Sized>: Send + Sync + 'static {
    fn apply_to(&self, listener: &L);
}

/// Closures are events: `dispatcher.dispatch(|l: &MyListener| l.on_tick())`.
impl<L, F> Event<L> for F
where
    L: ?Sized,
    F: Fn(&L) + Send + Sync + 'static,
{
    fn apply_to(&self, listener: &L) {
        self(listener);
    }
}
