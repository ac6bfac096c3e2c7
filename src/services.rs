use anyhow::Result;
use std::path::Path;

use crate::{errors::ConfigResult, models::{Invocation, Manifest}};

pub trait ComposerFrontend {
    fn manifest(&mut self, compose_file_path: &Path) -> ConfigResult<Manifest>;
}

pub trait CommandBackend {
    /// Runs the invocation to completion and returns the exit code it ended with.
    fn run(&mut self, invocation: &Invocation) -> Result<i32>;
}
