use crate::module::options::{BrokerOptions, ServiceOptions};
use structopt::StructOpt;

/// Options for the diagnostics module
#[derive(Debug, StructOpt)]
pub struct Options {
    #[allow(missing_docs)]
    #[structopt(flatten)]
    pub broker: BrokerOptions,

    #[allow(missing_docs)]
    #[structopt(flatten)]
    pub service: ServiceOptions,

    /// Number of test requests answered concurrently
    #[structopt(long, env, default_value = "10")]
    pub prefetch: usize,

    /// Log every dead letter published on the exchange
    #[structopt(long, env)]
    pub watch_dead_letters: bool,
}
