use async_trait::async_trait;
use lumen_core::{Result, StepUpdate};

/// Destination for the updates of one session.
///
/// `send` completes only once the update has been handed to the connection,
/// so the loop never runs ahead of the client by more than one update. An
/// error means the peer is gone and the loop must stop.
#[async_trait]
pub trait UpdateSink: Send {
    async fn send(&mut self, update: StepUpdate) -> Result<()>;
}

#[async_trait]
impl<S: UpdateSink + ?Sized> UpdateSink for Box<S> {
    async fn send(&mut self, update: StepUpdate) -> Result<()> {
        (**self).send(update).await
    }
}
