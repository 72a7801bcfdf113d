use std::{io, path::PathBuf};

/// Conditions that abort a whole exploration run.
///
/// A candidate whose tools exit non-zero or whose reports lack a metric is not
/// an error: it becomes an unmeasurable [`crate::metrics::TrialResult`].
#[derive(Debug, thiserror::Error)]
pub enum ExploreError {
    /// The configuration file is malformed or inconsistent.
    #[error("invalid configuration: {detail}")]
    Config { detail: String },

    /// An external tool could not be started at all.
    #[error("failed to launch {tool} ({program}): {source}")]
    ToolLaunch {
        tool: &'static str,
        program: String,
        #[source]
        source: io::Error,
    },

    /// The baseline configuration produced no EDP, so there is nothing to improve on.
    #[error("baseline configuration could not be measured: {reason}")]
    BaselineUnmeasurable { reason: String },

    /// I/O on files owned by the explorer (trial directories, reports, ledger).
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl ExploreError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn config(detail: impl Into<String>) -> Self {
        Self::Config {
            detail: detail.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ExploreError>;
