use crate::library::helpers::{parse_json, parse_millis};
use crate::module::options::{BrokerOptions, ServiceOptions};
use serde_json::Value;
use std::time::Duration;
use structopt::StructOpt;

/// Options for sending a single request
#[derive(Debug, StructOpt)]
pub struct RequestOptions {
    #[allow(missing_docs)]
    #[structopt(flatten)]
    pub broker: BrokerOptions,

    #[allow(missing_docs)]
    #[structopt(flatten)]
    pub service: ServiceOptions,

    /// Milliseconds to wait for the reply
    #[structopt(long, default_value = DEFAULT_REQUEST_TIMEOUT_MILLIS, parse(try_from_str = parse_millis))]
    pub timeout: Duration,

    /// Topic to send the request to, e.g. admin.auth.getMe
    pub topic: String,

    /// JSON object sent as the request payload
    #[structopt(parse(try_from_str = parse_json))]
    pub payload: Value,
}

/// Options for publishing a single notification
#[derive(Debug, StructOpt)]
pub struct PublishOptions {
    #[allow(missing_docs)]
    #[structopt(flatten)]
    pub broker: BrokerOptions,

    #[allow(missing_docs)]
    #[structopt(flatten)]
    pub service: ServiceOptions,

    /// Topic to publish on, e.g. admin.getAdminInfo
    pub topic: String,

    /// JSON object sent as the notification payload
    #[structopt(parse(try_from_str = parse_json))]
    pub payload: Value,
}

const DEFAULT_REQUEST_TIMEOUT_MILLIS: &str = "10000";
