use crate::library::helpers::parse_json;
use crate::module::options::{BrokerOptions, ServiceOptions};
use serde_json::Value;
use structopt::StructOpt;

/// Options for the probe module
#[derive(Debug, StructOpt)]
pub struct Options {
    #[allow(missing_docs)]
    #[structopt(flatten)]
    pub broker: BrokerOptions,

    #[allow(missing_docs)]
    #[structopt(flatten)]
    pub service: ServiceOptions,

    /// Message sent along with the test request
    #[structopt(long, default_value = "ping")]
    pub message: String,

    /// JSON document which the responder is expected to echo back
    #[structopt(long, default_value = "{}", parse(try_from_str = parse_json))]
    pub test_data: Value,
}
