use log::debug;
use serde::Deserialize;
use serde_yaml::{self, Value};
use std::{collections::BTreeMap as Map, fmt, fs, path::Path};

use crate::{
    errors::{ConfigError, ConfigResult},
    models::{BuildSpec, Manifest, ServiceConfig},
    services::ComposerFrontend,
};

#[derive(Clone, Debug, Deserialize)]
struct DockerComposeFile {
    #[serde(default)]
    pub services: Map<String, Option<Service>>,
}

#[derive(Clone, Debug, Default, Deserialize)]
struct Service {
    /// Kept raw so the shape ladder can report which service failed.
    pub build: Option<Value>,
}

#[derive(Clone, Debug, Deserialize)]
struct ExtendedBuild {
    #[serde(default)]
    context: String,

    #[serde(default)]
    dockerfile: String,

    args: Option<Value>,

    cache_from: Option<Value>,

    labels: Option<Value>,

    #[serde(default)]
    target: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
enum MapList {
    List(Vec<Scalar>),
    Map(Map<String, Scalar>),
}

impl MapList {
    /// Flattens either shape into `KEY=VALUE` entries. A mapping entry with a
    /// null value becomes a bare `KEY`; a null inside a list is rejected.
    fn into_entries(self) -> Option<Vec<String>> {
        match self {
            MapList::List(list) => list.into_iter().map(Scalar::into_string).collect(),
            MapList::Map(map) => Some(
                map.into_iter()
                    .map(|(key, value)| match value.into_string() {
                        Some(value) => format!("{}={}", key, value),
                        None => key,
                    })
                    .collect(),
            ),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
enum StringList {
    List(Vec<String>),
    Single(String),
}

impl From<StringList> for Vec<String> {
    fn from(list: StringList) -> Vec<String> {
        match list {
            StringList::List(list) => list,
            StringList::Single(value) => vec![value],
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Bool(bool),
    Integer(i64),
    Unsigned(u64),
    Float(f64),
    Text(String),
    Null,
}

impl Scalar {
    fn into_string(self) -> Option<String> {
        match self {
            Scalar::Text(text) => Some(text),
            Scalar::Null => None,
            other => Some(other.to_string()),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Scalar::Bool(value) => write!(f, "{}", value),
            Scalar::Integer(value) => write!(f, "{}", value),
            Scalar::Unsigned(value) => write!(f, "{}", value),
            Scalar::Float(value) => write!(f, "{}", value),
            Scalar::Text(value) => f.write_str(value),
            Scalar::Null => Ok(()),
        }
    }
}

/// Parses a compose document held in memory.
pub fn parse_str(source: &str) -> ConfigResult<Manifest> {
    let file: DockerComposeFile = serde_yaml::from_str(source).map_err(ConfigError::Syntax)?;

    let mut manifest = Manifest::default();
    for (service_name, service) in file.services {
        let build = match service.unwrap_or_default().build {
            Some(value) => Some(decode_build(&service_name, value)?),
            None => None,
        };

        manifest
            .services
            .insert(service_name, ServiceConfig { build });
    }

    Ok(manifest)
}

/// Reads and parses a compose file from disk.
pub fn parse_file<P: AsRef<Path>>(path: P) -> ConfigResult<Manifest> {
    let path = path.as_ref();
    let source = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    parse_str(&source)
}

fn decode_build(service: &str, value: Value) -> ConfigResult<BuildSpec> {
    // The structured form wins whenever it fits, the bare string is the
    // fallback. Only a mapping can be the structured form and a mapping is
    // never a string, so each shape gets exactly one attempt.
    let invalid = || ConfigError::InvalidBuildSpec {
        service: service.into(),
    };

    match value {
        Value::Mapping(_) => {
            let build = serde_yaml::from_value::<ExtendedBuild>(value).map_err(|_| invalid())?;
            debug!("decoded build of {:?} as a mapping", service);

            Ok(BuildSpec {
                context: build.context,
                dockerfile: build.dockerfile,
                args: decode_entries(service, "args", build.args)?,
                cache_from: decode_cache_from(service, build.cache_from)?,
                labels: decode_entries(service, "labels", build.labels)?,
                target: build.target,
            })
        }
        value => {
            let context = serde_yaml::from_value::<String>(value).map_err(|_| invalid())?;
            debug!("decoded build of {:?} as a context string", service);

            Ok(BuildSpec::from_context(context))
        }
    }
}

fn decode_entries(
    service: &str,
    field: &'static str,
    value: Option<Value>,
) -> ConfigResult<Vec<String>> {
    let value = match value {
        Some(Value::Null) | None => return Ok(Vec::new()),
        Some(value) => value,
    };

    serde_yaml::from_value::<MapList>(value)
        .ok()
        .and_then(MapList::into_entries)
        .ok_or_else(|| ConfigError::InvalidArgsOrLabels {
            service: service.into(),
            field,
        })
}

fn decode_cache_from(service: &str, value: Option<Value>) -> ConfigResult<Vec<String>> {
    let value = match value {
        Some(Value::Null) | None => return Ok(Vec::new()),
        Some(value) => value,
    };

    serde_yaml::from_value::<StringList>(value)
        .map(Vec::from)
        .map_err(|_| ConfigError::InvalidArgsOrLabels {
            service: service.into(),
            field: "cache_from",
        })
}

pub struct DockerComposeFrontend;

impl DockerComposeFrontend {
    pub fn new() -> DockerComposeFrontend {
        DockerComposeFrontend
    }
}

impl ComposerFrontend for DockerComposeFrontend {
    fn manifest(&mut self, compose_file_path: &Path) -> ConfigResult<Manifest> {
        parse_file(compose_file_path)
    }
}
