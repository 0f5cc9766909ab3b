//! Control signals
//!
//! The controlling process drives chunk boundaries and stops through
//! topic-named, at-least-once notifications. The control loop turns each
//! topic into a controller call on a blocking task.

use super::controller::CaptureController;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

pub const STOP_TOPIC: &str = "screenchunk.requestStop";
pub const MARK_CHUNK_START_TOPIC: &str = "screenchunk.requestMarkChunkStart";
pub const FINALIZE_CHUNK_TOPIC: &str = "screenchunk.requestFinalizeChunk";

/// Outbound: a chunk record may have been published
pub const CHUNK_SAVED_TOPIC: &str = "screenchunk.chunkSaved";

/// Inbound control request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    Stop,
    MarkChunkStart,
    FinalizeChunk,
}

impl ControlSignal {
    pub fn from_topic(topic: &str) -> Option<Self> {
        match topic {
            STOP_TOPIC => Some(ControlSignal::Stop),
            MARK_CHUNK_START_TOPIC => Some(ControlSignal::MarkChunkStart),
            FINALIZE_CHUNK_TOPIC => Some(ControlSignal::FinalizeChunk),
            _ => None,
        }
    }

    pub fn topic(&self) -> &'static str {
        match self {
            ControlSignal::Stop => STOP_TOPIC,
            ControlSignal::MarkChunkStart => MARK_CHUNK_START_TOPIC,
            ControlSignal::FinalizeChunk => FINALIZE_CHUNK_TOPIC,
        }
    }
}

/// Source of inbound topics
#[async_trait]
pub trait SignalTransport: Send {
    /// Next topic, or `None` once the transport has closed
    async fn recv(&mut self) -> Option<String>;
}

/// Transport over a tokio broadcast receiver
pub struct BroadcastTransport {
    rx: broadcast::Receiver<String>,
}

impl BroadcastTransport {
    pub fn new(rx: broadcast::Receiver<String>) -> Self {
        Self { rx }
    }
}

#[async_trait]
impl SignalTransport for BroadcastTransport {
    async fn recv(&mut self) -> Option<String> {
        loop {
            match self.rx.recv().await {
                Ok(topic) => return Some(topic),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Control transport lagged, {} signals lost", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

/// Dispatch signals until a stop request or until the transport closes
pub async fn run_control_loop<T: SignalTransport>(controller: Arc<CaptureController>, mut transport: T) {
    tracing::info!("Control loop started");

    while let Some(topic) = transport.recv().await {
        let Some(signal) = ControlSignal::from_topic(&topic) else {
            tracing::warn!("Ignoring unknown control topic {}", topic);
            continue;
        };
        tracing::debug!("Received control signal {:?}", signal);

        let target = controller.clone();
        match tokio::task::spawn_blocking(move || target.handle_signal(signal)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("Control signal {:?} failed: {}", signal, e),
            Err(e) => tracing::error!("Control signal task failed: {}", e),
        }

        if signal == ControlSignal::Stop {
            break;
        }
    }

    tracing::info!("Control loop ended");
}
