//! Built-in demo scenarios exercising each channel fault

use std::time::Duration;

use arqsim_core::parse_messages;
use arqsim_link::{LinkParams, MemoryAudit, SimTime};
use log::info;

use crate::config::{ConfigError, Coordinator, SimulationSetup};
use crate::{RunSummary, SimulationPresets};

#[derive(Debug, Clone)]
pub struct Scenario {
    pub name: &'static str,
    pub description: &'static str,
    pub params: LinkParams,
    /// Sender's message file, one `MLDD text` line per message.
    pub script: &'static str,
    pub limit: Option<SimTime>,
}

impl Scenario {
    pub fn setup(&self, seed: u64) -> Result<SimulationSetup, ConfigError> {
        let messages = parse_messages(self.script)?;
        Ok(SimulationSetup {
            params: self.params.clone(),
            seed: Some(seed),
            coordinator: Coordinator {
                node: 0,
                start: SimTime::ZERO,
            },
            messages: [messages, Vec::new()],
            max_duration: self.limit,
        })
    }

    pub fn run(&self, seed: u64) -> Result<RunSummary, ConfigError> {
        info!("Running scenario {}", self.name);
        let (sim, report) = self.setup(seed)?.run(MemoryAudit::new())?;
        Ok(RunSummary::collect(self.name, &sim, report))
    }
}

pub fn demo_scenarios() -> Vec<Scenario> {
    vec![
        Scenario {
            name: "clean",
            description: "four clean frames, in-order ACKs",
            params: SimulationPresets::standard(),
            script: "0000 alpha\n0000 bravo\n0000 charlie\n0000 delta\n",
            limit: None,
        },
        Scenario {
            name: "lost frame",
            description: "first frame lost, recovered by timeout",
            params: SimulationPresets::standard(),
            script: "0100 alpha\n0000 bravo\n0000 charlie\n0000 delta\n",
            limit: None,
        },
        Scenario {
            name: "corrupted frame",
            description: "second frame bit-flipped, NACKed and resent",
            params: SimulationPresets::standard(),
            script: "0000 alpha\n1000 bravo\n0000 charlie\n0000 delta\n",
            limit: None,
        },
        Scenario {
            name: "reply blackout",
            description: "every ACK/NACK dropped, sender never finishes",
            params: SimulationPresets::blackout(),
            script: "0000 alpha\n0000 bravo\n0000 charlie\n",
            limit: Some(Duration::from_secs(60)),
        },
        Scenario {
            name: "duplicated frame",
            description: "first frame sent twice, accepted once",
            params: SimulationPresets::standard(),
            script: "0010 alpha\n0000 bravo\n",
            limit: None,
        },
    ]
}

/// Runs every scenario on its own blocking task and returns the summaries
/// in scenario order.
pub async fn run_all(scenarios: Vec<Scenario>, seed: u64) -> Result<Vec<RunSummary>, ConfigError> {
    let handles: Vec<_> = scenarios
        .into_iter()
        .map(|scenario| tokio::task::spawn_blocking(move || scenario.run(seed)))
        .collect();

    let mut summaries = Vec::with_capacity(handles.len());
    for handle in handles {
        summaries.push(handle.await??);
    }
    Ok(summaries)
}
