//! Simulated point-to-point link layer: impairment model, transceiver
//! pipeline, sliding-window sender/receiver and the virtual-time kernel

use std::time::Duration;

use thiserror::Error;

use arqsim_core::{NodeId, SeqNum};

pub mod audit;
pub mod endpoint;
pub mod impairment;
pub mod receiver;
pub mod scheduler;
pub mod sender;
pub mod simulation;
pub mod transceiver;

#[cfg(test)]
mod testing;

pub use audit::{AuditEvent, AuditRecord, AuditSink, FileAuditLog, MemoryAudit};
pub use endpoint::{Endpoint, Role};
pub use receiver::{Receiver, ReceiverStats};
pub use scheduler::{EventQueue, Host, NodeEvent, Scheduler, SimTime, TimerHandle};
pub use sender::{Sender, SenderStats, WindowSlot};
pub use simulation::{Simulation, SimulationReport};
pub use transceiver::{PipelineStage, Transceiver, Transmission, TransmissionHooks, TransmissionId};

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("window size must be at least 1")]
    InvalidWindowSize,

    #[error("window size {0} exceeds the maximum of {max}", max = MAX_WINDOW_SIZE)]
    WindowTooLarge(usize),

    #[error("loss rate {0} is outside 0..=100")]
    InvalidLossRate(f64),

    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    #[error("a simulation needs exactly two endpoints with ids 0 and 1")]
    InvalidTopology,

    #[error("audit log io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Largest window whose sequence arithmetic stays within [`SeqNum`].
pub const MAX_WINDOW_SIZE: usize = (SeqNum::MAX / 2) as usize;

/// Per-node link parameters, fixed for the whole run.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkParams {
    pub window_size: usize,
    pub timeout: Duration,
    /// Spacing between two frames leaving the same transceiver.
    pub processing_time: Duration,
    pub transmission_delay: Duration,
    pub error_delay: Duration,
    pub duplication_delay: Duration,
    /// Percentage (0..=100) of ACK/NACK replies dropped by the channel.
    pub loss_rate: f64,
}

impl Default for LinkParams {
    fn default() -> Self {
        Self {
            window_size: 4,
            timeout: Duration::from_secs(10),
            processing_time: Duration::from_millis(500),
            transmission_delay: Duration::from_secs(1),
            error_delay: Duration::from_secs(4),
            duplication_delay: Duration::from_millis(100),
            loss_rate: 0.0,
        }
    }
}

impl LinkParams {
    pub fn validate(&self) -> Result<(), LinkError> {
        if self.window_size == 0 {
            return Err(LinkError::InvalidWindowSize);
        }
        if self.window_size > MAX_WINDOW_SIZE {
            return Err(LinkError::WindowTooLarge(self.window_size));
        }
        if !(0.0..=100.0).contains(&self.loss_rate) {
            return Err(LinkError::InvalidLossRate(self.loss_rate));
        }
        Ok(())
    }
}
