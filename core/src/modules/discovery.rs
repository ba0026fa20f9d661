//! Asset discovery engine: bounded-depth same-origin crawler, passive
//! sources (robots.txt, sitemaps), script-endpoint extraction and
//! conventional API path probing. Produces the endpoint universe consumed
//! by the probing engine.

use log::{debug, warn};
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::Arc;
use url::Url;

use crate::http::HttpClient;

/// Conventional API paths probed with HEAD during active guessing.
const COMMON_API_PATHS: &[&str] = &[
    "/api/v1/",
    "/api/v2/",
    "/api/",
    "/rest/",
    "/graphql",
    "/swagger.json",
    "/api/users",
    "/api/login",
    "/api/auth",
    "/api/products",
    "/api/items",
    "/api/data",
];

/// HEAD statuses that mean "the path exists", regardless of access outcome.
const API_PROBE_STATUSES: &[u16] = &[200, 301, 302, 401, 403];

/// Site boundary for crawl scoping: scheme + host + effective port.
/// Host comparison is case-insensitive and default ports are stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    scheme: String,
    host: String,
    port: Option<u16>,
}

impl Origin {
    pub fn of(url: &Url) -> Option<Self> {
        Some(Self {
            scheme: url.scheme().to_string(),
            host: url.host_str()?.to_lowercase(),
            port: url.port_or_known_default(),
        })
    }

    pub fn contains(&self, url: &Url) -> bool {
        match Origin::of(url) {
            Some(other) => *self == other,
            None => false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DiscoveredAssets {
    /// Plain URLs plus "METHOD url" strings for form actions.
    pub endpoints: BTreeSet<String>,
    pub api_endpoints: BTreeSet<String>,
    pub script_sources: BTreeSet<String>,
}

/// Owned extraction result for one fetched page. scraper's DOM is not Send,
/// so parsing happens in a sync helper and only owned strings cross awaits.
#[derive(Debug, Default, PartialEq)]
struct PageLinks {
    links: Vec<Url>,
    forms: Vec<(String, Url)>,
    scripts: Vec<Url>,
}

fn extract_page(body: &str, base: &Url) -> PageLinks {
    let document = Html::parse_document(body);
    let mut out = PageLinks::default();

    let anchor_sel = Selector::parse("a[href], link[href]").expect("static selector");
    for element in document.select(&anchor_sel) {
        if let Some(href) = element.value().attr("href") {
            if let Ok(url) = base.join(href) {
                out.links.push(url);
            }
        }
    }

    let form_sel = Selector::parse("form").expect("static selector");
    for element in document.select(&form_sel) {
        let action = element.value().attr("action").unwrap_or("");
        let method = element
            .value()
            .attr("method")
            .unwrap_or("GET")
            .to_uppercase();
        if let Ok(url) = base.join(action) {
            out.forms.push((method, url));
        }
    }

    let script_sel = Selector::parse("script[src]").expect("static selector");
    for element in document.select(&script_sel) {
        if let Some(src) = element.value().attr("src") {
            if let Ok(url) = base.join(src) {
                out.scripts.push(url);
            }
        }
    }

    out
}

/// Regex set for path-like strings and ajax-call URL literals inside
/// fetched scripts. Invalid patterns are skipped rather than panicking.
fn script_url_patterns() -> Vec<Regex> {
    [
        r#"["']([/a-zA-Z0-9_\-./]+\.(?:php|asp|aspx|jsp|do|action))["']"#,
        r#"["']([/a-zA-Z0-9_\-./]+)["']"#,
        r#"fetch\(["']([^"']+)["']"#,
        r#"axios\.(?:get|post|put|delete)\(["']([^"']+)["']"#,
        r#"\.ajax\(\{[^}]*url:\s*["']([^"']+)["']"#,
        r#"api/[a-zA-Z0-9_\-/]+"#,
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
}

pub struct EndpointDiscovery {
    client: Arc<HttpClient>,
    target: Url,
    origin: Origin,
    max_depth: u32,
    script_fetch_limit: usize,
}

impl EndpointDiscovery {
    pub fn new(
        client: Arc<HttpClient>,
        target: Url,
        max_depth: u32,
        script_fetch_limit: usize,
    ) -> anyhow::Result<Self> {
        let origin = Origin::of(&target)
            .ok_or_else(|| anyhow::anyhow!("target URL has no host: {}", target))?;
        Ok(Self {
            client,
            target,
            origin,
            max_depth,
            script_fetch_limit,
        })
    }

    /// Runs every discovery source in the original order and returns the
    /// merged endpoint universe. Any single fetch failure is logged and
    /// swallowed; one unreachable page never aborts discovery.
    pub async fn discover(&self) -> DiscoveredAssets {
        let mut assets = DiscoveredAssets::default();

        self.crawl(&mut assets).await;
        self.parse_robots(&mut assets).await;
        self.parse_sitemaps(&mut assets).await;
        self.extract_script_endpoints(&mut assets).await;
        self.guess_api_endpoints(&mut assets).await;

        assets
    }

    /// Breadth-first crawl bounded by max_depth (inclusive). The visited set
    /// keys on the exact URL, guaranteeing termination and at most one fetch
    /// per URL. Links on a page at the depth limit are still recorded.
    async fn crawl(&self, assets: &mut DiscoveredAssets) {
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<(Url, u32)> = VecDeque::new();
        queue.push_back((self.target.clone(), 0));

        while let Some((url, depth)) = queue.pop_front() {
            if !visited.insert(url.to_string()) {
                continue;
            }

            let body = match self.client.fetch(url.as_str()).await {
                Ok(resp) => resp.body,
                Err(e) => {
                    debug!("crawl fetch failed for {}: {}", url, e);
                    continue;
                }
            };

            let page = extract_page(&body, &url);

            for link in page.links {
                if !self.origin.contains(&link) {
                    continue;
                }
                assets.endpoints.insert(link.to_string());
                if depth < self.max_depth && !visited.contains(link.as_str()) {
                    queue.push_back((link, depth + 1));
                }
            }

            for (method, action) in page.forms {
                if self.origin.contains(&action) {
                    assets.endpoints.insert(format!("{} {}", method, action));
                }
            }

            for script in page.scripts {
                if self.origin.contains(&script) {
                    assets.script_sources.insert(script.to_string());
                }
            }
        }
    }

    async fn parse_robots(&self, assets: &mut DiscoveredAssets) {
        let robots_url = match self.target.join("/robots.txt") {
            Ok(u) => u,
            Err(_) => return,
        };

        let resp = match self.client.fetch(robots_url.as_str()).await {
            Ok(r) => r,
            Err(e) => {
                debug!("robots.txt fetch failed: {}", e);
                return;
            }
        };
        if resp.status != 200 {
            return;
        }

        for line in resp.body.lines() {
            let line = line.trim();
            if let Some(rest) = line
                .strip_prefix("Allow:")
                .or_else(|| line.strip_prefix("Disallow:"))
            {
                let path = rest.trim();
                if path.is_empty() {
                    continue;
                }
                if let Ok(url) = self.target.join(path) {
                    assets.endpoints.insert(url.to_string());
                }
            }
        }
    }

    async fn parse_sitemaps(&self, assets: &mut DiscoveredAssets) {
        let loc_re = match Regex::new(r"<loc>\s*([^<]+?)\s*</loc>") {
            Ok(re) => re,
            Err(_) => return,
        };

        for path in ["/sitemap.xml", "/sitemap_index.xml"] {
            let sitemap_url = match self.target.join(path) {
                Ok(u) => u,
                Err(_) => continue,
            };
            let resp = match self.client.fetch(sitemap_url.as_str()).await {
                Ok(r) => r,
                Err(e) => {
                    debug!("sitemap fetch failed for {}: {}", path, e);
                    continue;
                }
            };
            if resp.status != 200 {
                continue;
            }

            for capture in loc_re.captures_iter(&resp.body) {
                if let Ok(url) = Url::parse(capture[1].trim()) {
                    if self.origin.contains(&url) {
                        assets.endpoints.insert(url.to_string());
                    }
                }
            }
        }
    }

    /// Fetches a bounded prefix of discovered scripts and regex-scans them
    /// for endpoint literals. Matches containing "/api/" or ending ".json"
    /// are additionally tagged as API endpoints.
    async fn extract_script_endpoints(&self, assets: &mut DiscoveredAssets) {
        let patterns = script_url_patterns();
        let scripts: Vec<String> = assets
            .script_sources
            .iter()
            .take(self.script_fetch_limit)
            .cloned()
            .collect();

        for script_url in scripts {
            let body = match self.client.fetch(&script_url).await {
                Ok(resp) => resp.body,
                Err(e) => {
                    debug!("script fetch failed for {}: {}", script_url, e);
                    continue;
                }
            };
            let base = match Url::parse(&script_url) {
                Ok(u) => u,
                Err(_) => continue,
            };

            for pattern in &patterns {
                for capture in pattern.captures_iter(&body) {
                    let raw = capture
                        .get(1)
                        .or_else(|| capture.get(0))
                        .map(|m| m.as_str())
                        .unwrap_or("");
                    if let Some(endpoint) = self.resolve_script_match(raw, &base) {
                        let text = endpoint.to_string();
                        if text.contains("/api/") || text.ends_with(".json") {
                            assets.api_endpoints.insert(text.clone());
                        }
                        assets.endpoints.insert(text);
                    }
                }
            }
        }
    }

    fn resolve_script_match(&self, raw: &str, script_base: &Url) -> Option<Url> {
        let resolved = if raw.starts_with('/') {
            self.target.join(raw).ok()?
        } else if raw.starts_with("http") {
            Url::parse(raw).ok()?
        } else {
            script_base.join(raw).ok()?
        };
        if self.origin.contains(&resolved) {
            Some(resolved)
        } else {
            None
        }
    }

    /// Probes a fixed list of conventional API paths with HEAD and no
    /// redirect following. 200/301/302/401/403 all count as "exists".
    async fn guess_api_endpoints(&self, assets: &mut DiscoveredAssets) {
        for path in COMMON_API_PATHS {
            let api_url = match self.target.join(path) {
                Ok(u) => u,
                Err(_) => continue,
            };
            match self.client.head_status(api_url.as_str()).await {
                Ok(status) if API_PROBE_STATUSES.contains(&status) => {
                    assets.api_endpoints.insert(api_url.to_string());
                    assets.endpoints.insert(api_url.to_string());
                }
                Ok(_) => {}
                Err(e) => warn!("API probe failed for {}: {}", api_url, e),
            }
        }
    }
}
