use std::{io, path::PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed manifest")]
    Syntax(#[source] serde_yaml::Error),

    #[error("failed to parse build config of service {service:?}")]
    InvalidBuildSpec { service: String },

    #[error("service {service:?} has an invalid {field}: expected a list of strings or a mapping of scalars")]
    InvalidArgsOrLabels {
        service: String,
        field: &'static str,
    },

    #[error("service {0:?} has no build section")]
    MissingBuild(String),

    #[error("more than one docker-compose.yml file not supported: {}", .0.join(", "))]
    AmbiguousManifest(Vec<String>),

    #[error("no service given to build")]
    MissingService,

    #[error("no service named {0:?}")]
    UnknownService(String),

    #[error("{0}")]
    BuildFlags(String),
}

#[derive(Error, Debug)]
#[error("failed to launch {program:?}")]
pub struct LaunchError {
    pub program: String,
    #[source]
    pub source: io::Error,
}

pub type ConfigResult<T> = Result<T, ConfigError>;
