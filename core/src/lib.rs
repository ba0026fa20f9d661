pub mod core;
pub mod http;
pub mod modules;

use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use crate::core::lifecycle::{InMemoryScanStore, ScanManager, ScanStore};
pub use crate::core::orchestrator::{Capabilities, Orchestrator};
pub use crate::core::report::{
    Finding, PhaseReport, PhaseStatus, ScanReport, ScanStatus, Severity, Summary,
};
pub use crate::http::HttpClient;
pub use crate::modules::discovery::{DiscoveredAssets, EndpointDiscovery};
pub use crate::modules::jwt::JwtAnalyzer;
pub use crate::modules::webapp::WebAppScanner;

/// Shared scan configuration used by the CLI and embedders.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScanConfig {
    pub output_dir: String,
    pub max_depth: u32,
    pub http_timeout: u64,
    pub crawl_link_limit: usize,
    pub script_fetch_limit: usize,
    pub auth_token: Option<String>,
    pub enable_webapp: bool,
    pub enable_auth: bool,
    pub enable_infrastructure: bool,
    pub verbose: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            output_dir: "scan_results".to_string(),
            max_depth: 3,
            http_timeout: 10,
            crawl_link_limit: 20,
            script_fetch_limit: 10,
            auth_token: None,
            enable_webapp: true,
            enable_auth: true,
            enable_infrastructure: true,
            verbose: false,
        }
    }
}

/// Output abstraction for the scan pipeline.
/// The CLI implements this with colored terminal output; the lifecycle
/// manager tees it into the per-scan execution log.
pub trait ScanEventSink: Send + Sync {
    fn on_log(&self, level: &str, message: &str);
    fn on_finding(&self, finding: &Finding);
    fn on_phase(&self, phase: &str, status: &str);
}

pub type SinkRef = Arc<dyn ScanEventSink>;

/// Terminal output sink for CLI usage.
pub struct ConsoleSink;

impl ConsoleSink {
    pub fn new_ref() -> SinkRef {
        Arc::new(Self)
    }
}

impl ScanEventSink for ConsoleSink {
    fn on_log(&self, level: &str, message: &str) {
        use colored::*;
        use std::io::Write;
        let colored = match level {
            "success" => message.green().to_string(),
            "error" => message.red().to_string(),
            "warn" => message.yellow().to_string(),
            "phase" => message.bright_cyan().bold().to_string(),
            _ => message.to_string(),
        };
        print!("{}\r\n", colored);
        std::io::stdout().flush().ok();
    }

    fn on_finding(&self, finding: &Finding) {
        use colored::*;
        use std::io::Write;
        let out = |text: &str| {
            print!("{}\r\n", text);
            std::io::stdout().flush().ok();
        };
        out(&format!(
            "\n{} {} detected!",
            "[+]".green().bold(),
            finding.vuln_type.red().bold()
        ));
        if let Some(ref url) = finding.url {
            out(&format!("    Target:    {}", url.white()));
        }
        if let Some(ref param) = finding.parameter {
            out(&format!("    Parameter: {}", param.cyan()));
        }
        if let Some(ref payload) = finding.payload {
            out(&format!("    Payload:   {}", payload.bright_yellow()));
        }
        out(&format!(
            "    Severity:  {}",
            finding.severity.to_string().red().bold()
        ));
        out(&format!("    Info:      {}", finding.description.dimmed()));
        out(&"──────────────────────────────────────────".dimmed().to_string());
    }

    fn on_phase(&self, phase: &str, status: &str) {
        use colored::*;
        use std::io::Write;
        print!(
            "{}\r\n",
            format!("[*] Phase '{}': {}", phase, status).bright_cyan()
        );
        std::io::stdout().flush().ok();
    }
}

/// Sink that discards all events. Used by tests and embedders.
pub struct NullSink;

impl NullSink {
    pub fn new_ref() -> SinkRef {
        Arc::new(Self)
    }
}

impl ScanEventSink for NullSink {
    fn on_log(&self, _level: &str, _message: &str) {}
    fn on_finding(&self, _finding: &Finding) {}
    fn on_phase(&self, _phase: &str, _status: &str) {}
}

/// Fans events out to several sinks (e.g. console + log file).
pub struct FanoutSink {
    sinks: Vec<SinkRef>,
}

impl FanoutSink {
    pub fn new_ref(sinks: Vec<SinkRef>) -> SinkRef {
        Arc::new(Self { sinks })
    }
}

impl ScanEventSink for FanoutSink {
    fn on_log(&self, level: &str, message: &str) {
        for sink in &self.sinks {
            sink.on_log(level, message);
        }
    }

    fn on_finding(&self, finding: &Finding) {
        for sink in &self.sinks {
            sink.on_finding(finding);
        }
    }

    fn on_phase(&self, phase: &str, status: &str) {
        for sink in &self.sinks {
            sink.on_phase(phase, status);
        }
    }
}
