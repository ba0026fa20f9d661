pub mod client;

pub use client::HttpClient;

use reqwest::header::HeaderMap;
use std::time::Duration;

/// Snapshot of a probe response: everything the detection oracles need,
/// decoupled from the live reqwest types so oracles stay pure.
#[derive(Debug, Clone)]
pub struct ProbeResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
    pub elapsed: Duration,
}

impl ProbeResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}
