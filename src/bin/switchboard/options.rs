use std::str::FromStr;
use structopt::StructOpt;
use switchboard::module::{diagnostics, probe, relay};

#[derive(Debug, StructOpt)]
#[structopt(
    about = "Request/reply and event messaging between coffee platform services.",
    version = env!("CARGO_PKG_VERSION")
)]
pub struct MainOptions {
    /// Log level, scopable to different modules
    ///
    /// Levels: trace, debug, info, warn, error
    #[structopt(
        short,
        long,
        global = true,
        default_value = "info,redis=warn",
        env = "RUST_LOG",
        value_name = "level"
    )]
    pub log: String,

    /// Log output format: text, compact or json
    #[structopt(long, global = true, env, default_value = "text")]
    pub log_format: LogFormat,

    #[structopt(subcommand)]
    pub command: Command,
}

#[derive(Debug)]
pub enum LogFormat {
    Text,
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

#[derive(Debug, StructOpt)]
pub enum Command {
    /// Answers test communication requests and reports dead letters
    Diagnostics(diagnostics::Options),
    /// Checks whether a service answers test communication requests
    Probe(probe::Options),
    /// Sends a request and prints the reply
    Request(relay::RequestOptions),
    /// Publishes a notification
    Publish(relay::PublishOptions),
}
