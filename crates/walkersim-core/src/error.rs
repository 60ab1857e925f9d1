//! Error types for the simulation engine.

use thiserror::Error;

/// Problems with a simulation configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("malformed configuration text: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
    /// `max_agents`/`group_size` changed; the population must be rebuilt.
    #[error("population shape changed ({field}: {current} -> {requested}), reset the simulation instead")]
    PopulationChanged {
        field: &'static str,
        current: usize,
        requested: usize,
    },
}

/// Failures while writing or reading a save stream.
#[derive(Debug, Error)]
pub enum SaveError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Bincode(#[from] Box<bincode::ErrorKind>),
    #[error("invalid magic value {found:#010x}, file is probably corrupted")]
    BadMagic { found: u32 },
    #[error("unsupported save version {found} (newest supported is {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },
    #[error("bad configuration block: {0}")]
    Config(#[from] ConfigError),
    #[error("corrupt save data: {0}")]
    Corrupt(String),
}

/// Transient reasons a materialization request can fail. None of these are
/// fatal; the agent is retried on a later pass.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpawnError {
    #[error("world not ready")]
    WorldNotReady,
    #[error("chunk not loaded at {x}, {y}")]
    ChunkNotLoaded { x: i32, y: i32 },
    #[error("position not suitable")]
    UnsuitablePosition,
    #[error("no eligible entity class")]
    NoEntityClass,
    #[error("population ceiling reached ({alive}/{max})")]
    PopulationCeiling { alive: usize, max: usize },
    #[error("entity {0} not found")]
    EntityNotFound(i32),
}

/// Orchestrator-level errors.
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("operation requires the tick thread to be stopped")]
    Running,
    #[error("failed to start tick thread: {0}")]
    Thread(#[source] std::io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Save(#[from] SaveError),
}
