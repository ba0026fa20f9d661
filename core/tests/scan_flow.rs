//! End-to-end pipeline tests against a local fixture HTTP server. The
//! fixture is a bare TCP loop with canned responses, so every behavior here
//! is exercised over a real socket without external dependencies.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use url::Url;

use oxiscan_core::modules::jwt::sign_hs256;
use oxiscan_core::{
    EndpointDiscovery, HttpClient, InMemoryScanStore, JwtAnalyzer, NullSink, PhaseStatus,
    ScanConfig, ScanManager, ScanStatus, Severity, WebAppScanner,
};

struct FixtureRequest {
    method: String,
    path: String,
    query: String,
}

type Router = Arc<dyn Fn(&FixtureRequest) -> (u16, String) + Send + Sync>;

/// Minimal percent-decoder for query values the fixture echoes back.
fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => match u8::from_str_radix(&s[i + 1..i + 3], 16) {
                Ok(v) => {
                    out.push(v);
                    i += 3;
                }
                Err(_) => {
                    out.push(b'%');
                    i += 1;
                }
            },
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).to_string()
}

fn query_param(query: &str, name: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == name).then(|| percent_decode(v))
    })
}

fn parse_request(head: &str) -> FixtureRequest {
    let request_line = head.lines().next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().unwrap_or("/");
    let (path, query) = target.split_once('?').unwrap_or((target, ""));
    FixtureRequest {
        method,
        path: path.to_string(),
        query: query.to_string(),
    }
}

/// Spawns the fixture and returns its base URL plus the list of GET paths
/// it served, for crawl-shape assertions.
async fn spawn_fixture(router: Router) -> (String, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_task = Arc::clone(&seen);

    tokio::spawn(async move {
        loop {
            let (mut stream, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let router = Arc::clone(&router);
            let seen = Arc::clone(&seen_task);

            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                }
                let head = String::from_utf8_lossy(&buf).to_string();
                let request = parse_request(&head);
                if request.method == "GET" {
                    seen.lock().unwrap().push(request.path.clone());
                }

                let (status, body) = router(&request);
                let response = format!(
                    "HTTP/1.1 {} Fixture\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });

    (format!("http://{}", addr), seen)
}

fn client() -> Arc<HttpClient> {
    Arc::new(HttpClient::new(5, None))
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn make_hs256_token(secret: &str) -> String {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(r#"{"user":"alice","role":"user"}"#);
    let signing_input = format!("{}.{}", header, payload);
    let signature = sign_hs256(&signing_input, secret).unwrap();
    format!("{}.{}", signing_input, signature)
}

#[tokio::test]
async fn test_crawler_respects_depth_limit() {
    let router: Router = Arc::new(|req| match req.path.as_str() {
        "/" => (200, r#"<html><a href="/a">a</a></html>"#.to_string()),
        "/a" => (200, r#"<html><a href="/b">b</a></html>"#.to_string()),
        _ => (404, "not found".to_string()),
    });
    let (base, seen) = spawn_fixture(router).await;
    let target = Url::parse(&base).unwrap();

    let discovery = EndpointDiscovery::new(client(), target, 1, 0).unwrap();
    let assets = discovery.discover().await;

    let seen = seen.lock().unwrap();
    assert!(seen.contains(&"/a".to_string()));
    // One hop past the limit is recorded as an endpoint but never fetched.
    assert!(!seen.contains(&"/b".to_string()));
    assert!(assets.endpoints.iter().any(|e| e.ends_with("/b")));
}

#[tokio::test]
async fn test_crawler_depth_zero_fetches_only_the_seed() {
    let router: Router = Arc::new(|req| match req.path.as_str() {
        "/" => (200, r#"<html><a href="/a">a</a></html>"#.to_string()),
        _ => (404, "not found".to_string()),
    });
    let (base, seen) = spawn_fixture(router).await;
    let target = Url::parse(&base).unwrap();

    let discovery = EndpointDiscovery::new(client(), target, 0, 0).unwrap();
    let assets = discovery.discover().await;

    assert!(!seen.lock().unwrap().contains(&"/a".to_string()));
    assert!(assets.endpoints.iter().any(|e| e.ends_with("/a")));
}

#[tokio::test]
async fn test_crawler_never_leaves_the_origin() {
    let router: Router = Arc::new(|req| match req.path.as_str() {
        "/" => (
            200,
            concat!(
                r#"<html><a href="/local">in</a>"#,
                r#"<a href="http://off-origin.invalid/x">out</a>"#,
                r#"<form action="/submit" method="post"></form>"#,
                r#"<form action="http://off-origin.invalid/checkout" method="post"></form>"#,
                "</html>"
            )
            .to_string(),
        ),
        _ => (404, "not found".to_string()),
    });
    let (base, seen) = spawn_fixture(router).await;
    let target = Url::parse(&base).unwrap();

    let discovery = EndpointDiscovery::new(client(), target, 2, 0).unwrap();
    let assets = discovery.discover().await;

    assert!(seen.lock().unwrap().contains(&"/local".to_string()));
    // Links and form actions alike stay inside the site boundary.
    assert!(!assets.endpoints.iter().any(|e| e.contains("off-origin.invalid")));
    assert!(assets.endpoints.iter().any(|e| e.starts_with("POST ") && e.ends_with("/submit")));
}

#[tokio::test]
async fn test_xss_probe_flags_unescaped_echo() {
    let router: Router = Arc::new(|req| {
        if req.path == "/search" {
            let q = query_param(&req.query, "q").unwrap_or_default();
            (200, format!("<html>results for {}</html>", q))
        } else {
            (404, "not found".to_string())
        }
    });
    let (base, _) = spawn_fixture(router).await;
    let target = Url::parse(&base).unwrap();

    let scanner = WebAppScanner::new(client(), target, 10);
    let url = Url::parse(&format!("{}/search?q=test", base)).unwrap();
    let findings = scanner.test_xss(&url).await;

    // First matching payload short-circuits: exactly one finding per param.
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].severity, Severity::High);
    assert_eq!(findings[0].parameter.as_deref(), Some("q"));
}

#[tokio::test]
async fn test_xss_probe_accepts_entity_encoded_echo() {
    let router: Router = Arc::new(|req| {
        if req.path == "/search" {
            let q = query_param(&req.query, "q").unwrap_or_default();
            (200, format!("<html>results for {}</html>", html_escape(&q)))
        } else {
            (404, "not found".to_string())
        }
    });
    let (base, _) = spawn_fixture(router).await;
    let target = Url::parse(&base).unwrap();

    let scanner = WebAppScanner::new(client(), target, 10);
    let url = Url::parse(&format!("{}/search?q=test", base)).unwrap();

    assert!(scanner.test_xss(&url).await.is_empty());
}

#[tokio::test]
async fn test_sqli_probe_detects_error_leak() {
    let router: Router = Arc::new(|req| {
        let id = query_param(&req.query, "id").unwrap_or_default();
        if id.contains('\'') {
            (500, "You have an error in your SQL syntax near ''1'".to_string())
        } else {
            (200, "<html>item</html>".to_string())
        }
    });
    let (base, _) = spawn_fixture(router).await;
    let target = Url::parse(&base).unwrap();

    let scanner = WebAppScanner::new(client(), target, 10);
    let url = Url::parse(&format!("{}/item?id=1", base)).unwrap();
    let findings = scanner.test_sqli(&url).await;

    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].vuln_type, "Error-based SQL Injection");
    assert_eq!(findings[0].severity, Severity::Critical);
}

#[tokio::test]
async fn test_scan_probes_both_classes_on_every_conventional_route() {
    let router: Router = Arc::new(|req| match req.path.as_str() {
        // Echoes the search parameter without encoding.
        "/xss/reflected" => {
            let q = query_param(&req.query, "search").unwrap_or_default();
            (200, format!("<html>results for {}</html>", q))
        }
        // Leaks a database error when the id parameter is tampered with.
        "/sql/error" => {
            let id = query_param(&req.query, "id").unwrap_or_default();
            if id.contains('\'') {
                (500, "You have an error in your SQL syntax near ''1'".to_string())
            } else {
                (200, "<html>item</html>".to_string())
            }
        }
        "/sql/blind" => (200, "<html>item</html>".to_string()),
        _ => (404, "not found".to_string()),
    });
    let (base, _) = spawn_fixture(router).await;
    let target = Url::parse(&base).unwrap();

    let scanner = WebAppScanner::new(client(), target, 10);
    let findings = scanner.scan(&std::collections::BTreeSet::new()).await;

    // The XSS route is probed with "search" and the SQL route with "id".
    assert_eq!(findings.len(), 2);
    assert!(findings.iter().any(|f| {
        f.vuln_type == "Reflected XSS"
            && f.parameter.as_deref() == Some("search")
            && f.url.as_deref().unwrap_or_default().contains("/xss/reflected")
    }));
    assert!(findings.iter().any(|f| {
        f.vuln_type == "Error-based SQL Injection"
            && f.parameter.as_deref() == Some("id")
            && f.url.as_deref().unwrap_or_default().contains("/sql/error")
    }));
}

#[tokio::test]
async fn test_forged_none_token_flagged_only_when_accepted() {
    let token = make_hs256_token("fr4mew0rk-l0ng-rand0m-secret");

    let accept: Router = Arc::new(|_| (200, "<html>welcome</html>".to_string()));
    let (base, _) = spawn_fixture(accept).await;
    let analyzer = JwtAnalyzer::new(client(), Url::parse(&base).unwrap());
    let findings = analyzer.analyze(Some(token.clone())).await;
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].vuln_type, "JWT None Algorithm");
    assert_eq!(findings[0].severity, Severity::Critical);

    let reject: Router = Arc::new(|_| (401, "unauthorized".to_string()));
    let (base, _) = spawn_fixture(reject).await;
    let analyzer = JwtAnalyzer::new(client(), Url::parse(&base).unwrap());
    assert!(analyzer.analyze(Some(token)).await.is_empty());
}

#[tokio::test]
async fn test_scan_manager_runs_isolated_scans_end_to_end() {
    let router: Router = Arc::new(|req| match req.path.as_str() {
        "/" => (200, "<html><body>plain page</body></html>".to_string()),
        _ => (404, "not found".to_string()),
    });
    let (base, _) = spawn_fixture(router).await;

    let dir = tempfile::tempdir().unwrap();
    let store = InMemoryScanStore::new_ref();
    let manager = ScanManager::new(Arc::clone(&store), dir.path());

    let config = ScanConfig {
        max_depth: 1,
        enable_infrastructure: false,
        ..ScanConfig::default()
    };

    let first = manager
        .start(&base, config.clone(), NullSink::new_ref())
        .unwrap();
    let second = manager.start(&base, config, NullSink::new_ref()).unwrap();
    assert_ne!(first, second);

    manager.wait(&first).await.unwrap();
    manager.wait(&second).await.unwrap();

    for scan_id in [&first, &second] {
        assert_eq!(manager.status(scan_id), ScanStatus::Completed);

        let report = manager.result(scan_id).unwrap();
        assert_eq!(&report.scan_id, scan_id);
        assert_eq!(report.target, base);
        assert!(report.end_time.is_some());

        let phases = &report.phases;
        assert_eq!(phases.len(), 5);
        assert_eq!(phases["input_discovery"].status, PhaseStatus::Skipped);
        assert_eq!(phases["infrastructure"].status, PhaseStatus::Skipped);

        let summary = report.summary.as_ref().unwrap();
        assert_eq!(summary.total_vulnerabilities, report.vulnerabilities.len());

        assert!(dir.path().join(format!("summary_{}.json", scan_id)).exists());
        assert!(dir.path().join(format!("scan_{}.log", scan_id)).exists());
    }
}
