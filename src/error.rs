use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Command failed: {0}")]
    Command(String),

    #[error("Workspace error for '{slug}': {reason}")]
    Workspace { slug: String, reason: String },

    #[error("Agent not available: {0}")]
    AgentNotAvailable(String),

    #[error("Agent invocation failed: {0}")]
    AgentInvocation(String),

    #[error("Agent timed out after {0:?}")]
    AgentTimeout(std::time::Duration),

    #[error("Could not parse agent output: {0}")]
    AgentOutputParse(String),

    #[error("Exhausted {max_rounds} review rounds without approval")]
    ReviewExhausted { max_rounds: u32 },

    #[error("Dependency resolution failed: {0}")]
    DependencyResolution(String),

    #[error("Tracker communication failed for '{reference}': {reason}")]
    TrackerCommunication { reference: String, reason: String },

    #[error("Invalid phase transition from {from} to {to}")]
    InvalidPhaseTransition { from: String, to: String },

    #[error("Task join error: {0}")]
    TaskJoin(String),

    #[error("Operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, Error>;
