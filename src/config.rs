use anyhow::{anyhow, Result};
use std::{
    collections::BTreeMap as Map,
    env,
    ffi::{OsStr, OsString},
    path::PathBuf,
};

pub const ENV_COMPOSE_FILE: &str = "COMPOSE_FILE";
pub const ENV_PROJECT_NAME: &str = "COMPOSE_PROJECT_NAME";
pub const ENV_ORCHESTRATOR: &str = "COMPOSE_BUILDKIT_ORCHESTRATOR";
pub const ENV_BUILDER: &str = "COMPOSE_BUILDKIT_BUILDER";

pub const DEFAULT_ORCHESTRATOR: &str = "docker-compose";
pub const DEFAULT_BUILDER: &str = "docker";
pub const DEFAULT_COMPOSE_FILE: &str = "docker-compose.yml";

/// Everything read from the process environment, captured once at startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    pub compose_file: Option<String>,
    pub project_name: Option<String>,
    pub orchestrator: String,
    pub builder: String,
    pub working_dir: PathBuf,
}

impl Settings {
    /// Only the variables listed above are read, the rest of the environment
    /// may hold anything.
    pub fn from_env() -> Result<Settings> {
        let working_dir = env::current_dir()?;
        Settings::from_lookup(|key| env::var_os(key), working_dir)
    }

    pub fn from_vars<I, K, V>(vars: I, working_dir: PathBuf) -> Result<Settings>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<OsString>,
        V: Into<OsString>,
    {
        let vars: Map<OsString, OsString> = vars
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();

        Settings::from_lookup(|key| vars.get(OsStr::new(key)).cloned(), working_dir)
    }

    /// Empty values count as unset; values that are not unicode are rejected.
    fn from_lookup<F>(lookup: F, working_dir: PathBuf) -> Result<Settings>
    where
        F: Fn(&str) -> Option<OsString>,
    {
        let var = |key: &str| -> Result<Option<String>> {
            match lookup(key) {
                Some(value) => value
                    .into_string()
                    .map(|value| Some(value).filter(|value| !value.is_empty()))
                    .map_err(|value| anyhow!("{} is not valid unicode: {:?}", key, value)),
                None => Ok(None),
            }
        };

        Ok(Settings {
            compose_file: var(ENV_COMPOSE_FILE)?,
            project_name: var(ENV_PROJECT_NAME)?,
            orchestrator: var(ENV_ORCHESTRATOR)?.unwrap_or_else(|| DEFAULT_ORCHESTRATOR.into()),
            builder: var(ENV_BUILDER)?.unwrap_or_else(|| DEFAULT_BUILDER.into()),
            working_dir,
        })
    }
}
