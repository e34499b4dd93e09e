//! Network probe request and response types shared by drivers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::driver::ResultRecord;

/// Reachability probe between two hosts of a testbed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PingRequest {
    /// Host that sends the echo requests.
    pub sender: String,
    /// Host being probed.
    pub target: String,
    /// Number of echo requests; zero lets the driver choose.
    #[serde(default)]
    pub count: u32,
    /// Seconds between echo requests; zero lets the driver choose.
    #[serde(default)]
    pub interval: f64,
}

impl PingRequest {
    /// Creates a request using driver defaults for count and interval.
    #[must_use]
    pub fn new(sender: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            target: target.into(),
            count: 0,
            interval: 0.0,
        }
    }
}

/// Summary of a completed probe.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PingResponse {
    /// Echo requests sent.
    pub sent: u32,
    /// Echo replies received.
    pub received: u32,
    /// Mean round-trip time in milliseconds.
    #[serde(default, alias = "rtt_avg")]
    pub avg_rtt: f64,
    /// Round-trip time standard deviation in milliseconds.
    #[serde(default)]
    pub std_dev: f64,
}

impl PingResponse {
    /// Converts the response into a result record for evaluation.
    #[must_use]
    pub fn into_record(self) -> ResultRecord {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => ResultRecord::new(),
        }
    }
}
