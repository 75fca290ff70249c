//! watchlog-tail: follow a log backend from the terminal.
//!
//! Prints records as they become visible and reads operator commands
//! (`pause`, `resume`, `live`, `range <start> <end>`, `quit`) from stdin.

mod command;
mod render;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use watchlog_stream::{ConfigError, HandleError, StreamConfig, StreamHandle};

use crate::command::{OperatorCommand, HELP};
use crate::render::Printer;

#[derive(Parser, Debug)]
#[command(name = "watchlog-tail")]
#[command(about = "Follow a log backend: live tail, pause/resume and time-range views", long_about = None)]
struct Cli {
    /// JSON config file
    #[arg(long, short, env = "WATCHLOG_CONFIG")]
    config: Option<PathBuf>,

    /// Backend base URL (overrides the config file)
    #[arg(long, short, env = "WATCHLOG_URL")]
    url: Option<String>,

    /// Live channel URL (defaults to <url>/ws)
    #[arg(long, env = "WATCHLOG_WS_URL")]
    ws_url: Option<String>,

    /// Number of records kept in view
    #[arg(long)]
    capacity: Option<usize>,
}

impl Cli {
    fn load_config(&self) -> Result<StreamConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => StreamConfig::from_json_file(path)?,
            None => StreamConfig::default(),
        };
        if let Some(url) = &self.url {
            config.base_url = url.clone();
        }
        if let Some(ws_url) = &self.ws_url {
            config.ws_url = Some(ws_url.clone());
        }
        if let Some(capacity) = self.capacity {
            config.capacity = capacity;
        }
        config.validate()?;
        Ok(config)
    }
}

async fn dispatch(handle: &StreamHandle, command: OperatorCommand) -> Result<(), HandleError> {
    match command {
        OperatorCommand::Pause => handle.pause().await,
        OperatorCommand::Resume => handle.resume().await,
        OperatorCommand::Live => handle.enable_live().await,
        OperatorCommand::Range { start, end } => handle.select_range(start, end).await,
        OperatorCommand::Help | OperatorCommand::Quit => Ok(()),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = match cli.load_config() {
        Ok(config) => config,
        Err(e) => {
            log::error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let handle = match watchlog_stream::connect(&config) {
        Ok(handle) => handle,
        Err(e) => {
            log::error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let mut views = handle.subscribe();
    let mut printer = Printer::new(std::io::stdout());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    let initial = views.borrow_and_update().clone();
    let mut failed = false;
    if let Err(e) = printer.show(&initial) {
        log::error!("stdout: {e}");
        failed = true;
    }

    while !failed {
        tokio::select! {
            changed = views.changed() => {
                if changed.is_err() {
                    log::error!("Stream driver stopped unexpectedly");
                    failed = true;
                    break;
                }
                let view = views.borrow_and_update().clone();
                if let Err(e) = printer.show(&view) {
                    log::error!("stdout: {e}");
                    failed = true;
                }
            }

            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match OperatorCommand::parse(&line) {
                    Ok(None) => {}
                    Ok(Some(OperatorCommand::Quit)) => break,
                    Ok(Some(OperatorCommand::Help)) => {
                        if let Err(e) = printer.write_line(HELP) {
                            log::error!("stdout: {e}");
                            failed = true;
                        }
                    }
                    Ok(Some(command)) => {
                        if let Err(e) = dispatch(&handle, command).await {
                            log::error!("{e}");
                            failed = true;
                        }
                    }
                    Err(e) => eprintln!("{e}"),
                },
                Ok(None) => {
                    log::debug!("stdin closed; following without commands");
                    stdin_open = false;
                }
                Err(e) => {
                    log::warn!("stdin: {e}");
                    stdin_open = false;
                }
            },

            _ = tokio::signal::ctrl_c() => break,
        }
    }

    if let Err(e) = handle.shutdown().await {
        log::debug!("Shutdown: {e}");
    }
    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
