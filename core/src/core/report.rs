//! Report model for one scan run: findings, phase records and the derived
//! summary. A `ScanReport` is created when a scan is requested and serialized
//! exactly once when its pipeline finishes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    /// Severities outside the recognized set bucket here instead of being
    /// dropped, so by_severity always sums to total_vulnerabilities.
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Critical => write!(f, "critical"),
            Severity::High => write!(f, "high"),
            Severity::Medium => write!(f, "medium"),
            Severity::Low => write!(f, "low"),
            Severity::Unknown => write!(f, "unknown"),
        }
    }
}

/// A single reported vulnerability instance. Immutable once emitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub tool: String,
    #[serde(rename = "type")]
    pub vuln_type: String,
    pub name: String,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cvss: Option<f64>,
}

impl Finding {
    pub fn new(
        tool: &str,
        vuln_type: &str,
        name: &str,
        severity: Severity,
        description: String,
    ) -> Self {
        Self {
            tool: tool.to_string(),
            vuln_type: vuln_type.to_string(),
            name: name.to_string(),
            severity,
            url: None,
            parameter: None,
            payload: None,
            description,
            evidence: None,
            remediation: None,
            cvss: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_parameter(mut self, parameter: impl Into<String>) -> Self {
        self.parameter = Some(parameter.into());
        self
    }

    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn with_evidence(mut self, evidence: impl Into<String>) -> Self {
        self.evidence = Some(evidence.into());
        self
    }

    pub fn with_remediation(mut self, remediation: impl Into<String>) -> Self {
        self.remediation = Some(remediation.into());
        self
    }

    pub fn with_cvss(mut self, cvss: f64) -> Self {
        self.cvss = Some(cvss);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseStatus {
    Completed,
    Partial,
    Skipped,
    Failed,
}

impl std::fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PhaseStatus::Completed => write!(f, "completed"),
            PhaseStatus::Partial => write!(f, "partial"),
            PhaseStatus::Skipped => write!(f, "skipped"),
            PhaseStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One phase record: terminal status plus phase-specific metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseReport {
    pub status: PhaseStatus,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metrics: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PhaseReport {
    pub fn completed(metrics: serde_json::Value) -> Self {
        Self {
            status: PhaseStatus::Completed,
            metrics,
            error: None,
        }
    }

    pub fn partial(metrics: serde_json::Value) -> Self {
        Self {
            status: PhaseStatus::Partial,
            metrics,
            error: None,
        }
    }

    pub fn skipped() -> Self {
        Self {
            status: PhaseStatus::Skipped,
            metrics: serde_json::Value::Null,
            error: None,
        }
    }

    pub fn failed(error: String) -> Self {
        Self {
            status: PhaseStatus::Failed,
            metrics: serde_json::Value::Null,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Running,
    Completed,
    Failed,
    Timeout,
    /// Returned only for identifiers with no record and no persisted report.
    /// Never stored.
    Unknown,
}

impl ScanStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScanStatus::Completed | ScanStatus::Failed | ScanStatus::Timeout
        )
    }
}

impl std::fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanStatus::Running => write!(f, "running"),
            ScanStatus::Completed => write!(f, "completed"),
            ScanStatus::Failed => write!(f, "failed"),
            ScanStatus::Timeout => write!(f, "timeout"),
            ScanStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Derived roll-up, computed once when the run finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub total_vulnerabilities: usize,
    pub by_severity: BTreeMap<Severity, usize>,
    pub phases_completed: usize,
    pub tools_run: usize,
    pub scan_duration: f64,
}

impl Summary {
    pub fn compute(
        vulnerabilities: &[Finding],
        phases: &BTreeMap<String, PhaseReport>,
        tools_run: usize,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Self {
        let mut by_severity: BTreeMap<Severity, usize> = BTreeMap::new();
        for sev in [
            Severity::Critical,
            Severity::High,
            Severity::Medium,
            Severity::Low,
        ] {
            by_severity.insert(sev, 0);
        }
        for finding in vulnerabilities {
            *by_severity.entry(finding.severity).or_insert(0) += 1;
        }

        let phases_completed = phases
            .values()
            .filter(|p| p.status == PhaseStatus::Completed)
            .count();

        let duration = (end_time - start_time).num_milliseconds() as f64 / 1000.0;

        Self {
            total_vulnerabilities: vulnerabilities.len(),
            by_severity,
            phases_completed,
            tools_run,
            scan_duration: duration,
        }
    }
}

/// One end-to-end scan execution against one target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub scan_id: String,
    pub target: String,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub status: ScanStatus,
    pub phases: BTreeMap<String, PhaseReport>,
    pub vulnerabilities: Vec<Finding>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<Summary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ScanReport {
    pub fn new(scan_id: &str, target: &str) -> Self {
        Self {
            scan_id: scan_id.to_string(),
            target: target.to_string(),
            start_time: Utc::now(),
            end_time: None,
            status: ScanStatus::Running,
            phases: BTreeMap::new(),
            vulnerabilities: Vec::new(),
            summary: None,
            error: None,
        }
    }

    /// Marks the run terminal: sets end_time and derives the summary.
    /// Status transitions are monotonic; finalizing twice is a no-op.
    pub fn finalize(&mut self, status: ScanStatus, tools_run: usize) {
        if self.status.is_terminal() {
            return;
        }
        let end = Utc::now();
        self.end_time = Some(end);
        self.status = status;
        self.summary = Some(Summary::compute(
            &self.vulnerabilities,
            &self.phases,
            tools_run,
            self.start_time,
            end,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(sev: Severity) -> Finding {
        Finding::new("webapp_scanner", "Test", "Test", sev, "test".to_string())
    }

    #[test]
    fn test_summary_buckets_sum_to_total() {
        let vulns = vec![
            finding(Severity::Critical),
            finding(Severity::Critical),
            finding(Severity::High),
            finding(Severity::Low),
            finding(Severity::Unknown),
        ];
        let phases = BTreeMap::new();
        let summary = Summary::compute(&vulns, &phases, 0, Utc::now(), Utc::now());

        assert_eq!(summary.total_vulnerabilities, 5);
        let bucket_sum: usize = summary.by_severity.values().sum();
        assert_eq!(bucket_sum, summary.total_vulnerabilities);
        assert_eq!(summary.by_severity[&Severity::Critical], 2);
        assert_eq!(summary.by_severity[&Severity::Unknown], 1);
    }

    #[test]
    fn test_summary_counts_completed_phases_only() {
        let mut phases = BTreeMap::new();
        phases.insert(
            "recon".to_string(),
            PhaseReport::completed(serde_json::json!({"endpoints": 3})),
        );
        phases.insert("input_discovery".to_string(), PhaseReport::skipped());
        phases.insert(
            "infrastructure".to_string(),
            PhaseReport::failed("boom".to_string()),
        );

        let summary = Summary::compute(&[], &phases, 2, Utc::now(), Utc::now());
        assert_eq!(summary.phases_completed, 1);
        assert_eq!(summary.tools_run, 2);
    }

    #[test]
    fn test_unrecognized_severity_deserializes_to_unknown() {
        let sev: Severity = serde_json::from_str("\"informational\"").unwrap();
        assert_eq!(sev, Severity::Unknown);
    }

    #[test]
    fn test_finalize_sets_end_time_and_is_monotonic() {
        let mut report = ScanReport::new("20260829_120000_1", "http://example.com");
        assert!(report.end_time.is_none());

        report.finalize(ScanStatus::Completed, 1);
        let first_end = report.end_time;
        assert_eq!(report.status, ScanStatus::Completed);
        assert!(first_end.is_some());

        // Terminal status never regresses.
        report.finalize(ScanStatus::Failed, 0);
        assert_eq!(report.status, ScanStatus::Completed);
        assert_eq!(report.end_time, first_end);
    }

    #[test]
    fn test_report_round_trip_preserves_summary() {
        let mut report = ScanReport::new("20260829_120000_2", "http://example.com");
        report.vulnerabilities.push(
            finding(Severity::High)
                .with_url("http://example.com/?q=1")
                .with_parameter("q")
                .with_payload("<script>alert(1)</script>")
                .with_cvss(7.5),
        );
        report
            .phases
            .insert("recon".to_string(), PhaseReport::completed(serde_json::json!({})));
        report.finalize(ScanStatus::Completed, 0);

        let json = serde_json::to_string(&report).unwrap();
        let parsed: ScanReport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.summary, report.summary);
        assert_eq!(parsed.vulnerabilities.len(), 1);
        assert_eq!(parsed.status, ScanStatus::Completed);
    }
}
