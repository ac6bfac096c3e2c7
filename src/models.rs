use std::{collections::BTreeMap as Map, ffi::OsString, path::PathBuf};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BuildSpec {
    pub context: String,
    pub dockerfile: String,
    pub args: Vec<String>,
    pub cache_from: Vec<String>,
    pub labels: Vec<String>,
    pub target: String,
}

impl BuildSpec {
    /// The short `build: <path>` form, everything but the context left empty.
    pub fn from_context<S: Into<String>>(context: S) -> BuildSpec {
        BuildSpec {
            context: context.into(),
            ..Default::default()
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServiceConfig {
    pub build: Option<BuildSpec>,
}

#[derive(Clone, Debug, Default)]
pub struct Manifest {
    pub services: Map<String, ServiceConfig>,
}

impl Manifest {
    pub fn service(&self, name: &str) -> Option<&ServiceConfig> {
        self.services.get(name)
    }
}

/// A fully resolved external command, ready to hand to a backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<OsString>,
    pub env: Vec<(String, String)>,
    pub current_dir: Option<PathBuf>,
}

impl Invocation {
    pub fn new<P, I, A>(program: P, args: I) -> Invocation
    where
        P: Into<String>,
        I: IntoIterator<Item = A>,
        A: Into<OsString>,
    {
        Invocation {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            env: Vec::new(),
            current_dir: None,
        }
    }
}
