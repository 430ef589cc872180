use std::path::PathBuf;

/// Percentile over an empty sample set has no defined value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PercentileError {
    #[error("cannot compute a percentile of an empty sample set")]
    Empty,
    #[error("percentile {0} is outside [0, 1]")]
    OutOfRange(String),
}

/// Errors that stop a run before any traffic is generated.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("Test {name} could not be found! Available tests: {}", .available.join(", "))]
    TestNotFound {
        name: String,
        available: Vec<String>,
    },
    #[error("invalid run configuration: {0}")]
    InvalidConfig(String),
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Errors raised while reading declarative test definitions.
#[derive(Debug, thiserror::Error)]
pub enum DefinitionError {
    #[error("failed to read test definitions from {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse test definitions in {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("test {name} in {path:?} has an invalid method {method}")]
    InvalidMethod {
        path: PathBuf,
        name: String,
        method: String,
    },
    #[error("test {name} in {path:?} declares min_wait_ms > max_wait_ms")]
    InvalidWait { path: PathBuf, name: String },
}
