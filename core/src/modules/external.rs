//! Infrastructure phase: invokes third-party scanners (nmap, nikto,
//! whatweb, testssl.sh) as opaque subprocesses, bounded by per-tool
//! timeouts, and pattern-matches their stdout against named keyword rule
//! tables to synthesize coarse findings. This is a heuristic oracle, not a
//! parser.

use log::warn;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use url::Url;
use which::which;

use crate::core::report::{Finding, Severity};
use crate::SinkRef;

const NMAP_TIMEOUT: Duration = Duration::from_secs(300);
const NIKTO_TIMEOUT: Duration = Duration::from_secs(300);
const WHATWEB_TIMEOUT: Duration = Duration::from_secs(60);
const TESTSSL_TIMEOUT: Duration = Duration::from_secs(300);

/// One stdout-matching rule: uppercase keyword, finding severity, class.
#[derive(Debug, Clone, Copy)]
pub struct KeywordRule {
    pub keyword: &'static str,
    pub severity: Severity,
    pub name: &'static str,
}

/// TLS scan output rules. Kept as an explicit table so the heuristic is
/// auditable and testable in isolation.
pub const TLS_KEYWORD_RULES: &[KeywordRule] = &[
    KeywordRule {
        keyword: "VULNERABLE",
        severity: Severity::High,
        name: "SSL/TLS Issue",
    },
    KeywordRule {
        keyword: "WEAK",
        severity: Severity::High,
        name: "SSL/TLS Issue",
    },
    KeywordRule {
        keyword: "INSECURE",
        severity: Severity::High,
        name: "SSL/TLS Issue",
    },
];

/// Nikto line filter: a finding line starts with '+' and mentions one of
/// these (lowercase).
const NIKTO_LINE_KEYWORDS: &[&str] = &["vuln", "error", "issue", "warning"];

/// Matches one line of tool output against a rule table.
pub fn match_keyword_rules(line: &str, rules: &[KeywordRule]) -> Option<KeywordRule> {
    let upper = line.to_uppercase();
    rules
        .iter()
        .find(|rule| upper.contains(rule.keyword))
        .copied()
}

/// Nikto's coarse finding filter over one stdout line.
pub fn nikto_line_is_finding(line: &str) -> bool {
    if !line.contains('+') {
        return false;
    }
    let lower = line.to_lowercase();
    NIKTO_LINE_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

/// Per-tool record for the infrastructure phase metrics.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolRecord {
    pub status: String,
    pub vulnerabilities_found: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Default)]
pub struct InfrastructureOutcome {
    pub findings: Vec<Finding>,
    pub tools: BTreeMap<String, ToolRecord>,
    pub fingerprint: Option<String>,
}

impl InfrastructureOutcome {
    pub fn tools_run(&self) -> usize {
        self.tools.values().filter(|t| t.status == "completed").count()
    }
}

/// Resolves a tool binary on the command path. A missing binary gates the
/// invocation off entirely.
pub fn binary_path(tool_name: &str) -> Option<PathBuf> {
    which(tool_name).ok()
}

async fn run_command(binary: &Path, args: &[&str], timeout: Duration) -> anyhow::Result<String> {
    let child = Command::new(binary)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .output();

    let output = tokio::time::timeout(timeout, child)
        .await
        .map_err(|_| anyhow::anyhow!("timed out after {}s", timeout.as_secs()))??;

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

pub struct ExternalToolRunner {
    target: Url,
    scan_id: String,
    output_dir: PathBuf,
}

impl ExternalToolRunner {
    pub fn new(target: Url, scan_id: &str, output_dir: &Path) -> Self {
        Self {
            target,
            scan_id: scan_id.to_string(),
            output_dir: output_dir.to_path_buf(),
        }
    }

    fn hostname(&self) -> String {
        self.target.host_str().unwrap_or_default().to_string()
    }

    /// Per-tool output file next to the JSON report, scoped by scan id.
    fn output_path(&self, tool: &str, ext: &str) -> PathBuf {
        self.output_dir.join(format!("{}_{}.{}", tool, self.scan_id, ext))
    }

    /// Runs every available tool in sequence. A tool that is missing,
    /// times out or fails is recorded as such and never aborts the phase.
    pub async fn run_all(&self, sink: &SinkRef) -> InfrastructureOutcome {
        let mut outcome = InfrastructureOutcome::default();

        self.run_nmap(&mut outcome, sink).await;
        self.run_nikto(&mut outcome, sink).await;
        self.run_whatweb(&mut outcome, sink).await;
        self.run_testssl(&mut outcome, sink).await;

        outcome
    }

    async fn run_nmap(&self, outcome: &mut InfrastructureOutcome, sink: &SinkRef) {
        let binary = match binary_path("nmap") {
            Some(b) => b,
            None => {
                outcome.tools.insert("nmap".into(), missing());
                return;
            }
        };
        sink.on_log("phase", "[*] Running Nmap port scan");

        let host = self.hostname();
        let xml_path = self.output_path("nmap", "xml");
        let xml_arg = xml_path.to_string_lossy().to_string();
        match run_command(
            &binary,
            &["-sV", "--script=vuln", "-oX", &xml_arg, &host],
            NMAP_TIMEOUT,
        )
        .await
        {
            Ok(stdout) => {
                let mut found = 0;
                if stdout.to_uppercase().contains("VULNERABLE") {
                    found = 1;
                    let evidence: String = stdout.chars().take(500).collect();
                    outcome.findings.push(
                        Finding::new(
                            "nmap",
                            "Port Vulnerability",
                            "Port Vulnerability Detected",
                            Severity::Medium,
                            "Nmap detected potential vulnerabilities".to_string(),
                        )
                        .with_url(self.target.to_string())
                        .with_evidence(evidence),
                    );
                }
                let persisted = xml_path.exists().then(|| xml_arg.clone());
                outcome.tools.insert("nmap".into(), completed(found, persisted));
            }
            Err(e) => {
                warn!("nmap failed: {}", e);
                outcome.tools.insert("nmap".into(), failed(e));
            }
        }
    }

    async fn run_nikto(&self, outcome: &mut InfrastructureOutcome, sink: &SinkRef) {
        let binary = match binary_path("nikto") {
            Some(b) => b,
            None => {
                outcome.tools.insert("nikto".into(), missing());
                return;
            }
        };
        sink.on_log("phase", "[*] Running Nikto web server scan");

        let txt_path = self.output_path("nikto", "txt");
        let txt_arg = txt_path.to_string_lossy().to_string();
        match run_command(
            &binary,
            &["-h", self.target.as_str(), "-Tuning", "x", "-output", &txt_arg],
            NIKTO_TIMEOUT,
        )
        .await
        {
            Ok(stdout) => {
                let mut found = 0;
                for line in stdout.lines().filter(|l| nikto_line_is_finding(l)) {
                    found += 1;
                    outcome.findings.push(
                        Finding::new(
                            "nikto",
                            "Web Server Issue",
                            "Web Server Issue",
                            Severity::Medium,
                            line.trim().to_string(),
                        )
                        .with_url(self.target.to_string()),
                    );
                }
                let persisted = txt_path.exists().then(|| txt_arg.clone());
                outcome.tools.insert("nikto".into(), completed(found, persisted));
            }
            Err(e) => {
                warn!("nikto failed: {}", e);
                outcome.tools.insert("nikto".into(), failed(e));
            }
        }
    }

    async fn run_whatweb(&self, outcome: &mut InfrastructureOutcome, sink: &SinkRef) {
        let binary = match binary_path("whatweb") {
            Some(b) => b,
            None => {
                outcome.tools.insert("whatweb".into(), missing());
                return;
            }
        };
        sink.on_log("phase", "[*] Running WhatWeb technology detection");

        match run_command(
            &binary,
            &[self.target.as_str(), "--color=never"],
            WHATWEB_TIMEOUT,
        )
        .await
        {
            Ok(stdout) => {
                outcome.fingerprint = Some(stdout);
                outcome.tools.insert("whatweb".into(), completed(0, None));
            }
            Err(e) => {
                warn!("whatweb failed: {}", e);
                outcome.tools.insert("whatweb".into(), failed(e));
            }
        }
    }

    async fn run_testssl(&self, outcome: &mut InfrastructureOutcome, sink: &SinkRef) {
        let binary = match binary_path("testssl.sh") {
            Some(b) => b,
            None => {
                outcome.tools.insert("testssl".into(), missing());
                return;
            }
        };
        sink.on_log("phase", "[*] Running SSL/TLS security scan");

        let host = self.hostname();
        match run_command(&binary, &["--warnings", "off", &host], TESTSSL_TIMEOUT).await {
            Ok(stdout) => {
                let mut found = 0;
                for line in stdout.lines() {
                    if let Some(rule) = match_keyword_rules(line, TLS_KEYWORD_RULES) {
                        found += 1;
                        outcome.findings.push(
                            Finding::new(
                                "testssl",
                                "SSL/TLS Issue",
                                rule.name,
                                rule.severity,
                                line.trim().to_string(),
                            )
                            .with_url(self.target.to_string()),
                        );
                    }
                }

                // Raw stdout is persisted verbatim alongside the JSON report.
                let output_file = self.output_path("testssl", "txt");
                let persisted = std::fs::write(&output_file, &stdout)
                    .map(|_| output_file.to_string_lossy().to_string())
                    .map_err(|e| warn!("failed to persist testssl output: {}", e))
                    .ok();

                outcome
                    .tools
                    .insert("testssl".into(), completed(found, persisted));
            }
            Err(e) => {
                warn!("testssl failed: {}", e);
                outcome.tools.insert("testssl".into(), failed(e));
            }
        }
    }
}

fn completed(found: usize, output_file: Option<String>) -> ToolRecord {
    ToolRecord {
        status: "completed".to_string(),
        vulnerabilities_found: found,
        output_file,
        error: None,
    }
}

fn failed(e: anyhow::Error) -> ToolRecord {
    ToolRecord {
        status: "failed".to_string(),
        vulnerabilities_found: 0,
        output_file: None,
        error: Some(e.to_string()),
    }
}

fn missing() -> ToolRecord {
    ToolRecord {
        status: "not_found".to_string(),
        vulnerabilities_found: 0,
        output_file: None,
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tls_rules_match_any_case() {
        let rule = match_keyword_rules(" SSLv3 is vulnerable (POODLE)", TLS_KEYWORD_RULES);
        assert!(rule.is_some());
        assert_eq!(rule.unwrap().severity, Severity::High);

        assert!(match_keyword_rules("Weak ciphers offered", TLS_KEYWORD_RULES).is_some());
        assert!(match_keyword_rules("all ciphers strong", TLS_KEYWORD_RULES).is_none());
    }

    #[test]
    fn test_nikto_line_filter() {
        assert!(nikto_line_is_finding(
            "+ /admin/: This might be interesting: potential vuln"
        ));
        assert!(nikto_line_is_finding("+ Server error leaks version info"));
        assert!(!nikto_line_is_finding("+ Target IP: 127.0.0.1"));
        assert!(!nikto_line_is_finding("Scan terminated: warning issued"));
    }

    #[test]
    fn test_tool_output_paths_are_scoped_by_scan_id() {
        let runner = ExternalToolRunner::new(
            Url::parse("http://example.com").unwrap(),
            "20260829_120000_1",
            Path::new("scan_results"),
        );
        assert!(runner
            .output_path("nmap", "xml")
            .ends_with("nmap_20260829_120000_1.xml"));
        assert!(runner
            .output_path("nikto", "txt")
            .ends_with("nikto_20260829_120000_1.txt"));
        assert!(runner
            .output_path("testssl", "txt")
            .ends_with("testssl_20260829_120000_1.txt"));
    }

    #[test]
    fn test_tools_run_counts_completed_only() {
        let mut outcome = InfrastructureOutcome::default();
        outcome.tools.insert("nmap".into(), completed(1, None));
        outcome.tools.insert("nikto".into(), missing());
        outcome
            .tools
            .insert("testssl".into(), failed(anyhow::anyhow!("timed out")));
        assert_eq!(outcome.tools_run(), 1);
    }
}
