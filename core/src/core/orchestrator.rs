//! Phase sequencer: runs recon → input_discovery → vulnerability_scanning →
//! auth_testing → infrastructure in order, aggregating findings and phase
//! statuses into one report. A single phase failure is recorded and never
//! fatal to the run.

use anyhow::Result;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use url::Url;

use crate::core::report::{PhaseReport, ScanReport, ScanStatus};
use crate::http::HttpClient;
use crate::modules::discovery::{DiscoveredAssets, EndpointDiscovery};
use crate::modules::external::ExternalToolRunner;
use crate::modules::jwt::JwtAnalyzer;
use crate::modules::webapp::WebAppScanner;
use crate::{ScanConfig, SinkRef};

pub const PHASE_RECON: &str = "recon";
pub const PHASE_INPUT_DISCOVERY: &str = "input_discovery";
pub const PHASE_VULN_SCANNING: &str = "vulnerability_scanning";
pub const PHASE_AUTH_TESTING: &str = "auth_testing";
pub const PHASE_INFRASTRUCTURE: &str = "infrastructure";

/// Explicit capability registry, populated from config at process start.
/// A disabled capability is a configuration state, not an import failure:
/// its phase records `skipped` and the run continues.
#[derive(Debug, Clone)]
pub struct Capabilities {
    entries: BTreeMap<&'static str, bool>,
}

impl Capabilities {
    pub fn from_config(config: &ScanConfig) -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(PHASE_RECON, true);
        // Stub phase, kept in the sequence for report shape stability.
        entries.insert(PHASE_INPUT_DISCOVERY, false);
        entries.insert(PHASE_VULN_SCANNING, config.enable_webapp);
        entries.insert(PHASE_AUTH_TESTING, config.enable_auth);
        entries.insert(PHASE_INFRASTRUCTURE, config.enable_infrastructure);
        Self { entries }
    }

    pub fn enabled(&self, name: &str) -> bool {
        self.entries.get(name).copied().unwrap_or(false)
    }
}

pub struct Orchestrator {
    target: Url,
    config: ScanConfig,
    caps: Capabilities,
    client: Arc<HttpClient>,
    sink: SinkRef,
}

impl Orchestrator {
    pub fn new(target: Url, config: ScanConfig, sink: SinkRef) -> Self {
        let client = Arc::new(HttpClient::new(
            config.http_timeout,
            config.auth_token.as_deref(),
        ));
        let caps = Capabilities::from_config(&config);
        Self {
            target,
            config,
            caps,
            client,
            sink,
        }
    }

    /// Runs all phases in order and returns the finished report. Every exit
    /// from this function carries a terminal status and a computed summary.
    pub async fn run(&self, mut report: ScanReport) -> ScanReport {
        let mut tools_run = 0usize;

        let assets = self.run_recon(&mut report).await;
        self.run_input_discovery(&mut report);
        if self.run_vulnerability_scanning(&mut report, &assets).await {
            tools_run += 1;
        }
        if self.run_auth_testing(&mut report).await {
            tools_run += 1;
        }
        tools_run += self.run_infrastructure(&mut report).await;

        report.finalize(ScanStatus::Completed, tools_run);
        report
    }

    async fn run_recon(&self, report: &mut ScanReport) -> DiscoveredAssets {
        self.sink.on_phase(PHASE_RECON, "running");

        let result: Result<DiscoveredAssets> = async {
            let discovery = EndpointDiscovery::new(
                Arc::clone(&self.client),
                self.target.clone(),
                self.config.max_depth,
                self.config.script_fetch_limit,
            )?;
            Ok(discovery.discover().await)
        }
        .await;

        match result {
            Ok(assets) => {
                let metrics = json!({
                    "endpoints": assets.endpoints.len(),
                    "api_endpoints": assets.api_endpoints.len(),
                    "script_sources": assets.script_sources.len(),
                });
                // An empty universe means even the seed page was unreachable.
                let phase = if assets.endpoints.is_empty() && assets.api_endpoints.is_empty() {
                    PhaseReport::partial(metrics)
                } else {
                    PhaseReport::completed(metrics)
                };
                self.sink.on_phase(PHASE_RECON, &phase.status.to_string());
                report.phases.insert(PHASE_RECON.to_string(), phase);
                assets
            }
            Err(e) => {
                self.sink.on_phase(PHASE_RECON, "failed");
                report
                    .phases
                    .insert(PHASE_RECON.to_string(), PhaseReport::failed(e.to_string()));
                DiscoveredAssets::default()
            }
        }
    }

    fn run_input_discovery(&self, report: &mut ScanReport) {
        self.sink.on_phase(PHASE_INPUT_DISCOVERY, "skipped");
        report
            .phases
            .insert(PHASE_INPUT_DISCOVERY.to_string(), PhaseReport::skipped());
    }

    /// Returns true when the component completed (counts toward tools_run).
    async fn run_vulnerability_scanning(
        &self,
        report: &mut ScanReport,
        assets: &DiscoveredAssets,
    ) -> bool {
        if !self.caps.enabled(PHASE_VULN_SCANNING) {
            self.sink.on_phase(PHASE_VULN_SCANNING, "skipped");
            report
                .phases
                .insert(PHASE_VULN_SCANNING.to_string(), PhaseReport::skipped());
            return false;
        }
        self.sink.on_phase(PHASE_VULN_SCANNING, "running");

        let scanner = WebAppScanner::new(
            Arc::clone(&self.client),
            self.target.clone(),
            self.config.crawl_link_limit,
        );
        let findings = scanner.scan(&assets.endpoints).await;

        for finding in &findings {
            self.sink.on_finding(finding);
        }
        let metrics = json!({
            "vulnerabilities_found": findings.len(),
            "endpoints_tested": assets.endpoints.len(),
            "tests": "XSS, SQLi, Path Traversal, Command Injection, SSRF, XXE",
        });
        report.vulnerabilities.extend(findings);
        report
            .phases
            .insert(PHASE_VULN_SCANNING.to_string(), PhaseReport::completed(metrics));
        self.sink.on_phase(PHASE_VULN_SCANNING, "completed");
        true
    }

    async fn run_auth_testing(&self, report: &mut ScanReport) -> bool {
        if !self.caps.enabled(PHASE_AUTH_TESTING) {
            self.sink.on_phase(PHASE_AUTH_TESTING, "skipped");
            report
                .phases
                .insert(PHASE_AUTH_TESTING.to_string(), PhaseReport::skipped());
            return false;
        }
        self.sink.on_phase(PHASE_AUTH_TESTING, "running");

        let analyzer = JwtAnalyzer::new(Arc::clone(&self.client), self.target.clone());
        let findings = analyzer.analyze(self.config.auth_token.clone()).await;

        for finding in &findings {
            self.sink.on_finding(finding);
        }
        let metrics = json!({
            "vulnerabilities_found": findings.len(),
            "token_supplied": self.config.auth_token.is_some(),
        });
        report.vulnerabilities.extend(findings);
        report
            .phases
            .insert(PHASE_AUTH_TESTING.to_string(), PhaseReport::completed(metrics));
        self.sink.on_phase(PHASE_AUTH_TESTING, "completed");
        true
    }

    /// Returns the number of external tools that completed.
    async fn run_infrastructure(&self, report: &mut ScanReport) -> usize {
        if !self.caps.enabled(PHASE_INFRASTRUCTURE) {
            self.sink.on_phase(PHASE_INFRASTRUCTURE, "skipped");
            report
                .phases
                .insert(PHASE_INFRASTRUCTURE.to_string(), PhaseReport::skipped());
            return 0;
        }
        self.sink.on_phase(PHASE_INFRASTRUCTURE, "running");

        let runner = ExternalToolRunner::new(
            self.target.clone(),
            &report.scan_id,
            Path::new(&self.config.output_dir),
        );
        let outcome = runner.run_all(&self.sink).await;
        let tools_run = outcome.tools_run();
        // Some tools missing is the normal case; all tools missing still
        // counts as a completed (empty) phase, failures mark it partial.
        let any_failed = outcome.tools.values().any(|t| t.status == "failed");

        for finding in &outcome.findings {
            self.sink.on_finding(finding);
        }
        let metrics = json!({
            "tools": outcome.tools,
            "tools_run": tools_run,
            "fingerprint": outcome.fingerprint,
        });
        report.vulnerabilities.extend(outcome.findings);

        let phase = if any_failed {
            PhaseReport::partial(metrics)
        } else {
            PhaseReport::completed(metrics)
        };
        self.sink.on_phase(PHASE_INFRASTRUCTURE, &phase.status.to_string());
        report.phases.insert(PHASE_INFRASTRUCTURE.to_string(), phase);
        tools_run
    }
}
