use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_SHOT_COUNT: usize = 100;
pub const DEFAULT_COOLDOWN: Duration = Duration::from_millis(100);
pub const DEFAULT_SEED: u64 = 123_456_789;
pub const DEFAULT_RANDOM_LIMIT: u32 = 1000;
pub const DEFAULT_AMMUNITION: [&str; 2] = [
    "localhost:8080/api/v1/maps/map1",
    "localhost:8080/api/v1/maps",
];
pub const DEFAULT_REQUEST_TOOL: &str = "curl";
pub const DEFAULT_PROFILER: &str = "perf";
pub const DEFAULT_CAPTURE_FILE: &str = "perf.data";
pub const DEFAULT_OUTPUT_FILE: &str = "graph.svg";
pub const DEFAULT_FLAMEGRAPH_DIR: &str = "FlameGraph";
pub const DEFAULT_FLAMEGRAPH_REPO: &str = "https://github.com/brendangregg/FlameGraph.git";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub server_command: String,
    pub ammunition: Vec<String>,
    pub shot_count: usize,
    #[serde(with = "humantime_serde")]
    pub cooldown: Duration,
    pub seed: u64,
    pub random_limit: u32,
    pub request_tool: String,
    pub profiler: String,
    pub capture_file: PathBuf,
    pub output_file: PathBuf,
    pub flamegraph_dir: PathBuf,
    pub flamegraph_repo: String,
}

impl SessionConfig {
    /// Config carrying the default constants for everything except the server command.
    pub fn with_defaults(server_command: impl Into<String>) -> Self {
        Self {
            server_command: server_command.into(),
            ammunition: DEFAULT_AMMUNITION.iter().map(|s| s.to_string()).collect(),
            shot_count: DEFAULT_SHOT_COUNT,
            cooldown: DEFAULT_COOLDOWN,
            seed: DEFAULT_SEED,
            random_limit: DEFAULT_RANDOM_LIMIT,
            request_tool: DEFAULT_REQUEST_TOOL.to_string(),
            profiler: DEFAULT_PROFILER.to_string(),
            capture_file: PathBuf::from(DEFAULT_CAPTURE_FILE),
            output_file: PathBuf::from(DEFAULT_OUTPUT_FILE),
            flamegraph_dir: PathBuf::from(DEFAULT_FLAMEGRAPH_DIR),
            flamegraph_repo: DEFAULT_FLAMEGRAPH_REPO.to_string(),
        }
    }
}

/// Session lifecycle. Transitions only move forward, in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionPhase {
    Idle,
    ServerStarting,
    ProfilerAttaching,
    Loading,
    ProfilerDraining,
    ServerStopping,
    Reporting,
    Done,
}

impl SessionPhase {
    pub fn next(self) -> Option<SessionPhase> {
        match self {
            SessionPhase::Idle => Some(SessionPhase::ServerStarting),
            SessionPhase::ServerStarting => Some(SessionPhase::ProfilerAttaching),
            SessionPhase::ProfilerAttaching => Some(SessionPhase::Loading),
            SessionPhase::Loading => Some(SessionPhase::ProfilerDraining),
            SessionPhase::ProfilerDraining => Some(SessionPhase::ServerStopping),
            SessionPhase::ServerStopping => Some(SessionPhase::Reporting),
            SessionPhase::Reporting => Some(SessionPhase::Done),
            SessionPhase::Done => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessRole {
    Server,
    Profiler,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SessionEvent {
    PhaseStarted {
        phase: SessionPhase,
    },
    ProcessStarted {
        role: ProcessRole,
        pid: u32,
    },
    ShotFired {
        number: usize,
        index: usize,
        target: String,
        exit_code: Option<i32>,
    },
    LoadCompleted {
        shots: usize,
        #[serde(with = "humantime_serde")]
        elapsed: Duration,
    },
    Info(InfoEvent),
}

/// Structured info events emitted by the session and consumed by the CLI layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InfoEvent {
    Message(String),
    ToolchainPresent { dir: PathBuf },
    ToolchainCloned { dir: PathBuf },
    ToolchainCloneFailed { dir: PathBuf, reason: String },
    CleanupAfterFailure { role: ProcessRole, pid: u32 },
}

impl InfoEvent {
    /// Render a human-readable message for the CLI layer.
    pub fn to_message(&self) -> String {
        match self {
            InfoEvent::Message(msg) => msg.clone(),
            InfoEvent::ToolchainPresent { dir } => {
                format!("{} already exists.", dir.display())
            }
            InfoEvent::ToolchainCloned { dir } => format!("Cloned into {}", dir.display()),
            InfoEvent::ToolchainCloneFailed { dir, reason } => {
                format!("Could not clone {}: {}", dir.display(), reason)
            }
            InfoEvent::CleanupAfterFailure { role, pid } => {
                format!("Session failed; terminating {:?} (pid {})", role, pid)
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShotRecord {
    /// 1-based position in the session.
    pub number: usize,
    /// Index into the ammunition pool.
    pub index: usize,
    pub target: String,
    /// `None` when the request tool was killed by a signal.
    pub exit_code: Option<i32>,
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
}

impl ShotRecord {
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoadSummary {
    pub shots: Vec<ShotRecord>,
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
}

impl LoadSummary {
    pub fn failed(&self) -> usize {
        self.shots.iter().filter(|s| !s.succeeded()).count()
    }

    #[cfg(test)]
    pub fn indices(&self) -> Vec<usize> {
        self.shots.iter().map(|s| s.index).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    #[serde(default)]
    pub timestamp_utc: String,
    pub config: SessionConfig,
    pub server_pid: u32,
    pub profiler_pid: u32,
    pub load: LoadSummary,
    pub capture_file: PathBuf,
    pub output_file: PathBuf,
}
