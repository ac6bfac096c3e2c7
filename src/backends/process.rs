use anyhow::Result;
use log::{info, warn};
use std::process::{Command, Stdio};

use crate::{errors::LaunchError, models::Invocation, services::CommandBackend};

/// Spawns invocations as child processes sharing this process's stdio.
pub struct ProcessBackend;

impl ProcessBackend {
    pub fn new() -> ProcessBackend {
        ProcessBackend
    }
}

impl CommandBackend for ProcessBackend {
    fn run(&mut self, invocation: &Invocation) -> Result<i32> {
        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .envs(invocation.env.iter().map(|(key, value)| (key, value)))
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        if let Some(current_dir) = &invocation.current_dir {
            command.current_dir(current_dir);
        }

        info!("running {} {:?}", invocation.program, invocation.args);

        let status = command.status().map_err(|source| LaunchError {
            program: invocation.program.clone(),
            source,
        })?;

        match status.code() {
            Some(code) => Ok(code),
            None => {
                warn!("{} was terminated by a signal", invocation.program);
                Ok(1)
            }
        }
    }
}
