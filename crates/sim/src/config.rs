//! Scenario directory loading
//!
//! A scenario directory holds `params.toml`, `coordinator.txt` and one
//! `input<N>.txt` message file per node. Parameter and coordinator problems
//! abort the load; a bad message file only leaves that node without
//! messages.

use std::path::{Path, PathBuf};
use std::time::Duration;

use arqsim_core::{parse_messages, Message, MessageParseError, NodeId};
use arqsim_link::{AuditSink, Endpoint, LinkError, LinkParams, SimTime, Simulation, SimulationReport};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const PARAMS_FILE: &str = "params.toml";
pub const COORDINATOR_FILE: &str = "coordinator.txt";
pub const OUTPUT_FILE: &str = "output.txt";

pub const NODE_COUNT: usize = 2;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse params.toml: {0}")]
    Params(#[from] toml::de::Error),

    #[error("{field} must be a finite, non-negative number of seconds, got {value}")]
    InvalidDuration { field: &'static str, value: f64 },

    #[error("invalid message script: {0}")]
    Messages(#[from] MessageParseError),

    #[error("coordinator line must be `<node> <start seconds>`, got {0:?}")]
    Coordinator(String),

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error("simulation task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// On-disk shape of `params.toml`. Times are in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ParamsFile {
    pub window_size: usize,
    pub timeout: f64,
    pub processing_time: f64,
    pub transmission_delay: f64,
    pub error_delay: f64,
    pub duplication_delay: f64,
    /// Percent of replies dropped.
    pub loss_rate: f64,
    pub seed: Option<u64>,
    pub max_duration: Option<f64>,
}

impl Default for ParamsFile {
    fn default() -> Self {
        let params = LinkParams::default();
        Self {
            window_size: params.window_size,
            timeout: params.timeout.as_secs_f64(),
            processing_time: params.processing_time.as_secs_f64(),
            transmission_delay: params.transmission_delay.as_secs_f64(),
            error_delay: params.error_delay.as_secs_f64(),
            duplication_delay: params.duplication_delay.as_secs_f64(),
            loss_rate: params.loss_rate,
            seed: None,
            max_duration: None,
        }
    }
}

fn seconds(field: &'static str, value: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(value).map_err(|_| ConfigError::InvalidDuration { field, value })
}

impl ParamsFile {
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn link_params(&self) -> Result<LinkParams, ConfigError> {
        let params = LinkParams {
            window_size: self.window_size,
            timeout: seconds("timeout", self.timeout)?,
            processing_time: seconds("processing_time", self.processing_time)?,
            transmission_delay: seconds("transmission_delay", self.transmission_delay)?,
            error_delay: seconds("error_delay", self.error_delay)?,
            duplication_delay: seconds("duplication_delay", self.duplication_delay)?,
            loss_rate: self.loss_rate,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn max_duration(&self) -> Result<Option<SimTime>, ConfigError> {
        self.max_duration
            .map(|secs| seconds("max_duration", secs))
            .transpose()
    }
}

/// Which node starts sending, and when.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coordinator {
    pub node: NodeId,
    pub start: SimTime,
}

impl Coordinator {
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::Coordinator(text.trim().to_string());
        let mut fields = text.split_whitespace();
        let node = fields
            .next()
            .and_then(|f| f.parse::<NodeId>().ok())
            .ok_or_else(invalid)?;
        let start = fields
            .next()
            .and_then(|f| f.parse::<f64>().ok())
            .ok_or_else(invalid)?;
        if node >= NODE_COUNT {
            return Err(ConfigError::Link(LinkError::UnknownNode(node)));
        }
        Ok(Self {
            node,
            start: seconds("start time", start)?,
        })
    }
}

/// Everything needed to build one run.
#[derive(Debug, Clone)]
pub struct SimulationSetup {
    pub params: LinkParams,
    pub seed: Option<u64>,
    pub coordinator: Coordinator,
    pub messages: [Vec<Message>; NODE_COUNT],
    pub max_duration: Option<SimTime>,
}

impl SimulationSetup {
    pub fn build<S: AuditSink>(self, sink: S) -> Result<Simulation<S>, ConfigError> {
        let mut nodes = Vec::with_capacity(NODE_COUNT);
        for (id, messages) in self.messages.into_iter().enumerate() {
            let mut endpoint = Endpoint::new(id, self.params.clone(), messages)?;
            if let Some(seed) = self.seed {
                endpoint = endpoint.with_seed(seed);
            }
            nodes.push(endpoint);
        }

        let mut sim = Simulation::new(nodes, sink)?;
        sim.schedule_start(self.coordinator.node, self.coordinator.start)?;
        Ok(sim)
    }

    /// Builds and runs to completion, or up to `max_duration` when set.
    pub fn run<S: AuditSink>(
        self,
        sink: S,
    ) -> Result<(Simulation<S>, SimulationReport), ConfigError> {
        let limit = self.max_duration;
        let mut sim = self.build(sink)?;
        let report = match limit {
            Some(limit) => sim.run_until(limit),
            None => sim.run(),
        };
        Ok((sim, report))
    }
}

async fn read(path: PathBuf) -> Result<String, ConfigError> {
    tokio::fs::read_to_string(&path)
        .await
        .map_err(|source| ConfigError::Read { path, source })
}

/// Reads one node's message file. Any failure is logged and yields no
/// messages for that node.
pub async fn load_messages(path: &Path) -> Vec<Message> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) => {
            error!("Failed to open {}: {}", path.display(), e);
            return Vec::new();
        }
    };
    match parse_messages(&text) {
        Ok(messages) => {
            info!("Read {} messages from {}", messages.len(), path.display());
            messages
        }
        Err(e) => {
            error!("Failed to parse {}: {}", path.display(), e);
            Vec::new()
        }
    }
}

pub fn input_file(node: NodeId) -> String {
    format!("input{node}.txt")
}

pub async fn load(dir: impl AsRef<Path>) -> Result<SimulationSetup, ConfigError> {
    let dir = dir.as_ref();
    info!("Loading scenario from {}", dir.display());

    let file = ParamsFile::parse(&read(dir.join(PARAMS_FILE)).await?)?;
    let params = file.link_params()?;
    let max_duration = file.max_duration()?;
    let coordinator = Coordinator::parse(&read(dir.join(COORDINATOR_FILE)).await?)?;
    info!(
        "[Config] Node ID: {}, Start time: {:?}",
        coordinator.node, coordinator.start
    );

    let mut messages: [Vec<Message>; NODE_COUNT] = Default::default();
    for (node, slot) in messages.iter_mut().enumerate() {
        *slot = load_messages(&dir.join(input_file(node))).await;
    }
    if messages[coordinator.node].is_empty() {
        warn!("Starting node {} has no messages to send", coordinator.node);
    }

    Ok(SimulationSetup {
        params,
        seed: file.seed,
        coordinator,
        messages,
        max_duration,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use arqsim_link::MemoryAudit;

    struct ScenarioDir(PathBuf);

    impl ScenarioDir {
        fn new(name: &str) -> Self {
            let dir = std::env::temp_dir().join(format!("arqsim-{}-{}", name, std::process::id()));
            let _ = std::fs::remove_dir_all(&dir);
            std::fs::create_dir_all(&dir).expect("create scenario dir");
            Self(dir)
        }

        fn write(&self, name: &str, contents: &str) -> &Self {
            std::fs::write(self.0.join(name), contents).expect("write scenario file");
            self
        }
    }

    impl Drop for ScenarioDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }

    const PARAMS: &str = r#"
window_size = 3
timeout = 10.0
processing_time = 0.5
transmission_delay = 1.0
error_delay = 4.0
duplication_delay = 0.1
loss_rate = 10
seed = 7
"#;

    #[test]
    fn test_params_file_converts_seconds() {
        let file = ParamsFile::parse(PARAMS).expect("valid params");
        let params = file.link_params().expect("valid link params");
        assert_eq!(params.window_size, 3);
        assert_eq!(params.processing_time, Duration::from_millis(500));
        assert_eq!(params.duplication_delay, Duration::from_millis(100));
        assert_eq!(params.loss_rate, 10.0);
        assert_eq!(file.seed, Some(7));
        assert_eq!(file.max_duration().expect("no limit"), None);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let file = ParamsFile::parse("window_size = 8").expect("valid params");
        let params = file.link_params().expect("valid link params");
        assert_eq!(params.window_size, 8);
        assert_eq!(params.timeout, LinkParams::default().timeout);
    }

    #[test]
    fn test_bad_params_are_rejected() {
        assert!(matches!(
            ParamsFile::parse("timeout = -1.0").and_then(|f| f.link_params()),
            Err(ConfigError::InvalidDuration { field: "timeout", .. })
        ));
        assert!(matches!(
            ParamsFile::parse("window_size = 0").and_then(|f| f.link_params()),
            Err(ConfigError::Link(LinkError::InvalidWindowSize))
        ));
        assert!(matches!(
            ParamsFile::parse("window = 4"),
            Err(ConfigError::Params(_))
        ));
    }

    #[test]
    fn test_coordinator_parsing() {
        let coordinator = Coordinator::parse("1 2.5\n").expect("valid coordinator");
        assert_eq!(coordinator.node, 1);
        assert_eq!(coordinator.start, Duration::from_millis(2500));

        assert!(matches!(
            Coordinator::parse("zero 1"),
            Err(ConfigError::Coordinator(_))
        ));
        assert!(matches!(Coordinator::parse("0"), Err(ConfigError::Coordinator(_))));
        assert!(matches!(
            Coordinator::parse("3 0"),
            Err(ConfigError::Link(LinkError::UnknownNode(3)))
        ));
    }

    #[tokio::test]
    async fn test_load_full_scenario() {
        let dir = ScenarioDir::new("load-full");
        dir.write(PARAMS_FILE, PARAMS)
            .write(COORDINATOR_FILE, "0 0.0\n")
            .write("input0.txt", "0000 first\n1000 second\n\n0010 third\n")
            .write("input1.txt", "");

        let setup = load(&dir.0).await.expect("scenario loads");
        assert_eq!(setup.coordinator.node, 0);
        assert_eq!(setup.messages[0].len(), 3);
        assert!(setup.messages[0][1].faults.modification);
        assert!(setup.messages[1].is_empty());
        assert_eq!(setup.seed, Some(7));
    }

    #[tokio::test]
    async fn test_bad_message_file_only_empties_that_node() {
        let dir = ScenarioDir::new("load-bad-input");
        dir.write(PARAMS_FILE, PARAMS)
            .write(COORDINATOR_FILE, "1 0")
            .write("input0.txt", "0000 fine\n")
            .write("input1.txt", "01x0 broken\n");

        let setup = load(&dir.0).await.expect("scenario still loads");
        assert_eq!(setup.messages[0].len(), 1);
        assert!(setup.messages[1].is_empty());
    }

    #[tokio::test]
    async fn test_missing_params_aborts_load() {
        let dir = ScenarioDir::new("load-missing");
        dir.write(COORDINATOR_FILE, "0 0");

        assert!(matches!(
            load(&dir.0).await,
            Err(ConfigError::Read { .. })
        ));
    }

    #[tokio::test]
    async fn test_loaded_scenario_runs_to_completion() {
        let dir = ScenarioDir::new("load-run");
        dir.write(PARAMS_FILE, "loss_rate = 0\nseed = 1\n")
            .write(COORDINATOR_FILE, "0 1.0")
            .write("input0.txt", "0000 a\n0000 b\n");

        let setup = load(&dir.0).await.expect("scenario loads");
        let (sim, report) = setup.run(MemoryAudit::new()).expect("runs");

        // start at 1.0, second ACK lands 3.5s later
        assert_eq!(report.finished_at, Some(Duration::from_millis(4500)));
        let receiver = sim.endpoint(1).and_then(Endpoint::as_receiver).expect("receiver");
        assert_eq!(receiver.delivered().len(), 2);
    }
}
