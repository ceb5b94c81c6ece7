/// Errors returned by [`Subscription::try_recv`](crate::Subscription::try_recv).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TryRecvError {
    /// No event is pending right now.
    #[error("no pending event")]
    Empty,

    /// The bus is gone or the subscription was removed, and every pending
    /// event has been consumed.
    #[error("subscription closed")]
    Closed,
}
