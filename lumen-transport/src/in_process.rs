//! In-process transport: hands updates to a channel instead of a socket.
//!
//! Used to embed the denoising loop in another task and in tests.

use async_trait::async_trait;
use tokio::sync::mpsc;

use lumen_core::{LumenError, Result, StepUpdate};

use crate::sink::UpdateSink;

pub struct ChannelSink {
    tx: mpsc::Sender<StepUpdate>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<StepUpdate>) -> Self {
        Self { tx }
    }

    /// A sink and the receiver that observes it.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<StepUpdate>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl UpdateSink for ChannelSink {
    async fn send(&mut self, update: StepUpdate) -> Result<()> {
        self.tx
            .send(update)
            .await
            .map_err(|_| LumenError::Transport("update receiver dropped".into()))
    }
}
