//! Scenario loading, presets and demo runs for the ARQ link simulator

pub mod config;
pub mod scenarios;

use std::time::Duration;

use arqsim_link::{
    Endpoint, LinkParams, ReceiverStats, SenderStats, Simulation, SimulationReport,
};

pub use config::{ConfigError, Coordinator, ParamsFile, SimulationSetup};

pub struct SimulationPresets;

impl SimulationPresets {
    /// Half-second serialization, one second on the wire, ten second timer.
    pub fn standard() -> LinkParams {
        LinkParams {
            window_size: 4,
            timeout: Duration::from_secs(10),
            processing_time: Duration::from_millis(500),
            transmission_delay: Duration::from_secs(1),
            error_delay: Duration::from_secs(4),
            duplication_delay: Duration::from_millis(100),
            loss_rate: 0.0,
        }
    }

    pub fn lossy_replies() -> LinkParams {
        LinkParams {
            loss_rate: 30.0,
            ..Self::standard()
        }
    }

    /// Every ACK/NACK is dropped; the sender can never finish.
    pub fn blackout() -> LinkParams {
        LinkParams {
            loss_rate: 100.0,
            ..Self::standard()
        }
    }

    pub fn narrow_window() -> LinkParams {
        LinkParams {
            window_size: 2,
            timeout: Duration::from_secs(6),
            ..Self::standard()
        }
    }
}

/// What a finished (or cut off) run looked like from both ends.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub name: String,
    pub report: SimulationReport,
    pub sender: Option<SenderStats>,
    pub receiver: Option<ReceiverStats>,
    pub delivered: Vec<String>,
}

impl RunSummary {
    pub fn collect<S: arqsim_link::AuditSink>(
        name: impl Into<String>,
        sim: &Simulation<S>,
        report: SimulationReport,
    ) -> Self {
        let endpoints = sim.endpoints();
        let sender = endpoints.iter().find_map(Endpoint::as_sender);
        let receiver = endpoints.iter().find_map(Endpoint::as_receiver);
        Self {
            name: name.into(),
            report,
            sender: sender.map(|s| s.stats()),
            receiver: receiver.map(|r| r.stats()),
            delivered: receiver
                .map(|r| {
                    r.delivered()
                        .iter()
                        .map(|payload| String::from_utf8_lossy(payload).into_owned())
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.report.is_finished()
    }
}
