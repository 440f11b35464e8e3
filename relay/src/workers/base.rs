use std::future::Future;

use crate::error::RelayResult;

/// Trait for background workers of the relay engine.
///
/// Starting a worker begins background processing and returns a handle for
/// monitoring it. The generic parameter `H` is the handle type and `S` the
/// state type observable through the handle.
pub trait Worker<H, S>
where
    H: WorkerHandle<S>,
{
    /// Error type returned when worker startup fails.
    type Error;

    /// Starts the worker and returns a handle for monitoring its execution.
    fn start(self) -> impl Future<Output = Result<H, Self::Error>> + Send;
}

/// Handle for monitoring a running worker.
///
/// The handle stays valid after the worker completes, allowing state
/// inspection and result retrieval.
pub trait WorkerHandle<S> {
    /// Returns a snapshot of the worker's current state.
    fn state(&self) -> S;

    /// Waits for the worker to complete and returns its final result.
    ///
    /// Consumes the handle.
    fn wait(self) -> impl Future<Output = RelayResult<()>> + Send;
}
