use anyhow::Result;
use crossterm::{
    style::{self, Colorize, Styler},
    QueueableCommand,
};
use log::info;
use std::{
    env,
    ffi::OsString,
    io::{stderr, Write},
    process,
};

use arguments::route;
use backends::ProcessBackend;
use config::Settings;
use controller::Controller;
use frontends::DockerComposeFrontend;

mod arguments;
mod backends;
mod config;
mod controller;
mod errors;
mod frontends;
mod models;
mod services;

fn run() -> Result<i32> {
    let argv: Vec<OsString> = env::args_os().collect();
    let settings = Settings::from_env()?;
    info!("settings {:?}", settings);

    let decision = route(&argv[..]);
    info!("routing {:?}", decision);

    let mut controller = Controller::init(settings, ProcessBackend::new(), DockerComposeFrontend::new());
    controller.dispatch(decision)
}

fn report(err: &anyhow::Error) -> Result<()> {
    stderr()
        .queue(style::PrintStyledContent("Error: ".red().bold()))?
        .queue(style::Print(format!("{:#}\n", err)))?
        .flush()?;

    Ok(())
}

fn main() {
    pretty_env_logger::init_custom_env("LOG");

    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            if report(&err).is_err() {
                eprintln!("Error: {:#}", err);
            }
            1
        }
    };

    process::exit(code);
}
