use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::watch;

use crate::error::Result;

/// Cancellation flag handed to every job run. Long runs poll it between
/// units of work so shutdown does not wait for a full cycle.
#[derive(Clone, Debug)]
pub struct StopSignal(watch::Receiver<bool>);

impl StopSignal {
    pub fn new(receiver: watch::Receiver<bool>) -> Self {
        Self(receiver)
    }

    /// A signal that never fires, for one-off runs outside the scheduler.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self(rx)
    }

    pub fn is_stopped(&self) -> bool {
        *self.0.borrow()
    }
}

#[async_trait]
pub trait ScheduledJob: Send + Sync {
    fn name(&self) -> &str;
    fn interval(&self) -> Duration;
    async fn run(&self, stop: &StopSignal) -> Result<()>;
}
