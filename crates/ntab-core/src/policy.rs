/// What to do when publishing a name pointer fails.
///
/// The synchronous save path publishes with [`FireAndLog`](Self::FireAndLog):
/// the snapshot is already stored and the caller gets its digest. The
/// background persist path uses [`Propagate`](Self::Propagate) so the worker
/// can count and report the failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PublishPolicy {
    /// Log the failure and report the snapshot as stored but unpublished.
    FireAndLog,
    /// Return the failure to the caller.
    Propagate,
}
