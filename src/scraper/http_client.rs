use crate::config::FetcherConfig;
use crate::scraper::FetchError;
use anyhow::{Context, Result};
use reqwest::StatusCode;
use tracing::debug;

/// Thin reqwest wrapper: one GET, failures sorted into transient / permanent.
/// Retrying is the caller's job.
pub struct HttpClient {
    inner: reqwest::Client,
}

impl HttpClient {
    pub fn new(config: &FetcherConfig) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout())
            .gzip(true)
            // Accept cookies so session-based pages work
            .cookie_store(true)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { inner })
    }

    /// Fetch a URL as text. Redirects are followed by reqwest's default policy.
    pub async fn get_text(&self, url: &str) -> Result<String, FetchError> {
        debug!("GET {}", url);

        let resp = self.inner.get(url).send().await.map_err(classify_request_error)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(classify_status(status));
        }

        resp.text().await.map_err(classify_request_error)
    }
}

/// 408, 429 and 5xx are worth another try; any other non-2xx is final.
pub fn classify_status(status: StatusCode) -> FetchError {
    let msg = format!("HTTP {}", status);
    match status.as_u16() {
        408 | 429 => FetchError::Transient(msg),
        _ if status.is_server_error() => FetchError::Transient(msg),
        _ => FetchError::Permanent(msg),
    }
}

fn classify_request_error(e: reqwest::Error) -> FetchError {
    if e.is_builder() {
        return FetchError::Permanent(format!("bad request: {}", e));
    }
    if e.is_timeout() {
        return FetchError::Transient(format!("timed out: {}", e));
    }
    if e.is_decode() {
        return FetchError::Permanent(format!("undecodable body: {}", e));
    }
    if let Some(status) = e.status() {
        return classify_status(status);
    }
    FetchError::Transient(format!("request error: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client() -> HttpClient {
        HttpClient::new(&FetcherConfig { timeout_secs: 5, ..FetcherConfig::default() }).unwrap()
    }

    #[test]
    fn status_classification() {
        assert!(classify_status(StatusCode::SERVICE_UNAVAILABLE).is_transient());
        assert!(classify_status(StatusCode::INTERNAL_SERVER_ERROR).is_transient());
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS).is_transient());
        assert!(classify_status(StatusCode::REQUEST_TIMEOUT).is_transient());
        assert!(!classify_status(StatusCode::NOT_FOUND).is_transient());
        assert!(!classify_status(StatusCode::FORBIDDEN).is_transient());
    }

    #[tokio::test]
    async fn returns_body_on_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/playlist/2020-04-01"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
            .mount(&server)
            .await;

        let body = client()
            .get_text(&format!("{}/playlist/2020-04-01", server.uri()))
            .await
            .unwrap();
        assert_eq!(body, "<html></html>");
    }

    #[tokio::test]
    async fn maps_server_errors_to_transient_and_404_to_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/busy"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let c = client();
        let busy = c.get_text(&format!("{}/busy", server.uri())).await.unwrap_err();
        assert!(busy.is_transient(), "{busy}");
        let gone = c.get_text(&format!("{}/gone", server.uri())).await.unwrap_err();
        assert!(!gone.is_transient(), "{gone}");
    }

    #[tokio::test]
    async fn undecodable_body_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
            .mount(&server)
            .await;

        let resp = client().inner.get(server.uri()).send().await.unwrap();
        let decode = resp.json::<serde_json::Value>().await.unwrap_err();
        assert!(decode.is_decode());
        assert!(!classify_request_error(decode).is_transient());
    }

    #[tokio::test]
    async fn connection_refused_is_transient() {
        // Port 9 (discard) is closed on any sane test host.
        let err = client().get_text("http://127.0.0.1:9/x").await.unwrap_err();
        assert!(err.is_transient(), "{err}");
    }
}
