use rand::prelude::IndexedRandom;
use reqwest::header::{HeaderValue, AUTHORIZATION, USER_AGENT};
use reqwest::{Client, ClientBuilder};
use std::time::{Duration, Instant};

use super::ProbeResponse;

/// Shared HTTP probe client with bounded timeouts and an optional bearer
/// credential. Every component of the pipeline goes through this client.
pub struct HttpClient {
    inner: Client,
    no_redirect: Client,
    default_timeout: Duration,
    bearer: Option<String>,
    user_agents: Vec<&'static str>,
}

impl HttpClient {
    pub fn new(timeout_seconds: u64, bearer: Option<&str>) -> Self {
        let timeout = Duration::from_secs(timeout_seconds);

        let inner = ClientBuilder::new()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .cookie_store(true)
            .build()
            .expect("failed to build reqwest client");

        // HEAD probes must not follow redirects: a 301/302 is itself the
        // evidence that the path exists.
        let no_redirect = ClientBuilder::new()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("failed to build reqwest client");

        let user_agents = vec![
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
             (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:120.0) \
             Gecko/20100101 Firefox/120.0",
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 13_0) AppleWebKit/605.1.15 \
             (KHTML, like Gecko) Version/17.0 Safari/605.1.15",
        ];

        Self {
            inner,
            no_redirect,
            default_timeout: timeout,
            bearer: bearer.map(|b| b.to_string()),
            user_agents,
        }
    }

    /// GET a URL and capture status, headers, body and wall-clock time.
    pub async fn fetch(&self, url: &str) -> Result<ProbeResponse, reqwest::Error> {
        self.fetch_with_bearer(url, self.bearer.as_deref()).await
    }

    /// GET with an explicit bearer credential (token replay probes).
    pub async fn fetch_with_bearer(
        &self,
        url: &str,
        bearer: Option<&str>,
    ) -> Result<ProbeResponse, reqwest::Error> {
        let mut req = self
            .inner
            .get(url)
            .header(USER_AGENT, self.random_user_agent())
            .timeout(self.default_timeout);

        if let Some(token) = bearer {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", token)) {
                req = req.header(AUTHORIZATION, value);
            }
        }

        let start = Instant::now();
        let response = req.send().await?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.text().await.unwrap_or_default();

        Ok(ProbeResponse {
            status,
            headers,
            body,
            elapsed: start.elapsed(),
        })
    }

    /// HEAD probe without redirect following. Returns the raw status code.
    pub async fn head_status(&self, url: &str) -> Result<u16, reqwest::Error> {
        let response = self
            .no_redirect
            .head(url)
            .header(USER_AGENT, self.random_user_agent())
            .timeout(self.default_timeout)
            .send()
            .await?;
        Ok(response.status().as_u16())
    }

    /// POST a form-urlencoded body (XXE probe).
    pub async fn post_form(
        &self,
        url: &str,
        form: &[(&str, &str)],
    ) -> Result<ProbeResponse, reqwest::Error> {
        let start = Instant::now();
        let response = self
            .inner
            .post(url)
            .header(USER_AGENT, self.random_user_agent())
            .timeout(self.default_timeout)
            .form(form)
            .send()
            .await?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.text().await.unwrap_or_default();

        Ok(ProbeResponse {
            status,
            headers,
            body,
            elapsed: start.elapsed(),
        })
    }

    fn random_user_agent(&self) -> &'static str {
        let mut rng = rand::rng();
        *self.user_agents.choose(&mut rng).unwrap_or(&"Mozilla/5.0")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_builds_with_and_without_bearer() {
        let plain = HttpClient::new(5, None);
        assert!(plain.bearer.is_none());

        let auth = HttpClient::new(5, Some("tok"));
        assert_eq!(auth.bearer.as_deref(), Some("tok"));
        assert_eq!(auth.default_timeout, Duration::from_secs(5));
    }
}
