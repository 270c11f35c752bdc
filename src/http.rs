use crate::error::{Error, Result};
use reqwest::{Client, StatusCode, header};
use std::time::Duration;
use tracing::{debug, warn};

/// Shared HTTP client for token exchange and chat completions.
///
/// Failed requests are never retried; every error goes straight back to the
/// caller.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new(user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(180))
            .user_agent(user_agent)
            .build()
            .map_err(|e| Error::http(e.to_string()))?;

        Ok(Self { client })
    }

    pub async fn post_json_raw(
        &self,
        url: &str,
        body: &str,
        headers: &[(&str, &str)],
    ) -> Result<String> {
        let mut req = self
            .client
            .post(url)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body.to_string());
        for (k, v) in headers {
            req = req.header(*k, *v);
        }
        self.send(req).await
    }

    /// POST an `application/x-www-form-urlencoded` body with a per-request timeout.
    pub async fn post_form(
        &self,
        url: &str,
        form: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<String> {
        let req = self.client.post(url).form(form).timeout(timeout);
        self.send(req).await
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<String> {
        match req.send().await {
            Ok(resp) => self.handle_response(resp).await,
            Err(e) => {
                if e.is_timeout() {
                    warn!("request timed out");
                }
                Err(Error::http(e.to_string()))
            }
        }
    }

    async fn handle_response(&self, resp: reqwest::Response) -> Result<String> {
        let status = resp.status();
        let url = resp.url().to_string();
        debug!(status = status.as_u16(), url = %url, "HTTP response");

        if status.is_success() {
            return resp.text().await.map_err(|e| Error::http(e.to_string()));
        }

        match status {
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = resp
                    .headers()
                    .get(header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok());
                Err(Error::RateLimit {
                    platform: extract_domain(&url),
                    retry_after_secs: retry_after,
                })
            }
            _ => {
                let body = resp.text().await.unwrap_or_default();
                Err(Error::api_with_status(
                    extract_domain(&url),
                    body,
                    status.as_u16(),
                ))
            }
        }
    }
}

fn extract_domain(url: &str) -> String {
    url.split("//")
        .nth(1)
        .and_then(|s| s.split('/').next())
        .unwrap_or("unknown")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_from_url() {
        assert_eq!(
            extract_domain("https://api.openai.com/v1/chat/completions"),
            "api.openai.com"
        );
        assert_eq!(extract_domain("not a url"), "unknown");
    }
}
