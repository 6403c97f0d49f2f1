//! Synthetic output sink.
//!
//! The router and scheduler emit [`OutputAction`]s into an [`OutputSink`];
//! whatever sits behind the sink (virtual HID device, test recorder) sees
//! them strictly in submission order. The shipped implementation forwards
//! into a bounded mpsc channel consumed by the injection backend.

use crate::profile::model::{AxisCode, ButtonCode};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

/// A synthetic input action to be injected downstream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutputAction {
    PressButton(ButtonCode),
    ReleaseButton(ButtonCode),
    SetAxis(AxisCode, f32),
}

/// Errors raised while submitting to a sink.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The output device is gone. Fatal to the owning router.
    #[error("Output sink unavailable: {0}")]
    Unavailable(String),

    /// The sink cannot keep up. The action is dropped by the sink backend,
    /// never silently by the caller.
    #[error("Output sink backpressure: {0}")]
    Backpressure(String),
}

/// Ordered consumer of synthetic output actions.
pub trait OutputSink: Send {
    fn submit(&mut self, action: OutputAction) -> Result<(), SinkError>;
}

/// Sink backed by a bounded tokio channel.
pub struct ChannelSink {
    sender: mpsc::Sender<OutputAction>,
}

impl ChannelSink {
    pub fn new(sender: mpsc::Sender<OutputAction>) -> Self {
        Self { sender }
    }
}

impl OutputSink for ChannelSink {
    fn submit(&mut self, action: OutputAction) -> Result<(), SinkError> {
        match self.sender.try_send(action) {
            Ok(()) => {
                debug!("Submitted output action: {:?}", action);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(action)) => Err(SinkError::Backpressure(format!(
                "output channel full, dropping {:?}",
                action
            ))),
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(SinkError::Unavailable("output channel closed".to_string()))
            }
        }
    }
}
