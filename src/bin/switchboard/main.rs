use anyhow::Result;
use options::{Command, LogFormat};
use std::process::exit;
use structopt::StructOpt;
use switchboard::harness::ModuleRunner;
use switchboard::module::diagnostics::Diagnostics;
use switchboard::module::probe::Probe;
use switchboard::module::relay::Relay;
use tracing::info;

mod options;

#[tokio::main]
async fn main() -> Result<()> {
    let (command, runner) = init()?;

    let termination_reason = match command {
        Command::Diagnostics(options) => runner.run(Diagnostics::new(options)).await,
        Command::Probe(options) => runner.run(Probe::new(options)).await,
        Command::Request(options) => runner.run(Relay::request(options)).await,
        Command::Publish(options) => runner.run(Relay::publish(options)).await,
    };

    if !termination_reason.is_success() {
        exit(1);
    }

    Ok(())
}

fn init() -> Result<(Command, ModuleRunner)> {
    let options = options::MainOptions::from_args();

    let formatter = tracing_subscriber::fmt()
        .with_env_filter(options.log)
        .with_writer(std::io::stderr);

    match options.log_format {
        LogFormat::Text => formatter.init(),
        LogFormat::Compact => formatter.compact().init(),
        LogFormat::Json => formatter.json().init(),
    };

    info!("Switchboard {}", env!("CARGO_PKG_VERSION"));

    Ok((options.command, ModuleRunner::default()))
}
