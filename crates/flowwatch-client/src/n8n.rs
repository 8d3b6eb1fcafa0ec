use flowwatch_core::config::{Credentials, HttpConfig, WatcherConfig};
use flowwatch_core::error::AppError;
use flowwatch_core::models::split_listing;
use flowwatch_core::traits::WorkflowSource;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

/// Header carrying the instance API key.
pub const API_KEY_HEADER: &str = "X-N8N-API-KEY";

/// Page size requested from the workflows listing (the API maximum).
const PAGE_LIMIT: &str = "250";

/// Upper bound on followed `nextCursor` pages per listing.
const MAX_PAGES: usize = 100;

/// Error body returned by the public API on non-2xx responses.
///
/// ```json
/// { "message": "unauthorized" }
/// ```
#[derive(Deserialize, Debug)]
struct ApiErrorBody {
    message: String,
}

/// HTTP client for the public REST API of an n8n instance.
///
/// Authentication is entirely the transport's concern: the configured
/// [`Credentials`] are attached to every request.
///
/// # Examples
///
/// ```no_run
/// use flowwatch_client::N8nClient;
/// use flowwatch_core::{Credentials, HttpConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = N8nClient::new(
///     "https://n8n.example.com",
///     &HttpConfig::default(),
///     Credentials::ApiKey("secret".to_string()),
/// )?;
/// let workflows = client.list_all().await?;
/// println!("Found {} workflows", workflows.len());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct N8nClient {
    client: Client,
    base_url: Url,
    credentials: Credentials,
    timeout_ms: u64,
}

impl N8nClient {
    /// Creates a new client for the instance at `base_url_str`.
    ///
    /// A path prefix on the base URL (reverse-proxied instances) is kept.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidUrl` if the URL is invalid or not http(s).
    /// Returns `AppError::ClientError` if the HTTP client cannot be built.
    pub fn new(
        base_url_str: &str,
        http: &HttpConfig,
        credentials: Credentials,
    ) -> Result<Self, AppError> {
        let mut base_url = Url::parse(base_url_str)
            .map_err(|_| AppError::InvalidUrl(base_url_str.to_string()))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(AppError::InvalidUrl(base_url_str.to_string()));
        }
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder()
            .user_agent(http.user_agent.as_str())
            .timeout(http.timeout)
            .build()
            .map_err(|e| AppError::ClientError(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            credentials,
            timeout_ms: http.timeout.as_millis() as u64,
        })
    }

    /// Creates a client from a watcher's URL, timeout and credentials.
    pub fn from_watcher(config: &WatcherConfig) -> Result<Self, AppError> {
        let credentials = config.credentials.resolve()?;
        Self::new(&config.base_url, &config.http_config(), credentials)
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Fetches one page of the workflows listing.
    ///
    /// Returns the raw entries and the cursor of the next page, if any.
    pub async fn list_page(
        &self,
        cursor: Option<&str>,
    ) -> Result<(Vec<Value>, Option<String>), AppError> {
        let mut url = self.endpoint("api/v1/workflows")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("limit", PAGE_LIMIT);
            if let Some(cursor) = cursor {
                query.append_pair("cursor", cursor);
            }
        }

        let resp = self.get(&url).await?;
        let body: Value = resp
            .json()
            .await
            .map_err(|e| AppError::ClientError(format!("Failed to parse listing: {}", e)))?;

        split_listing(body)
    }

    /// Fetches every workflow, following `nextCursor` pagination.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ClientError` when the listing still has a cursor
    /// after `MAX_PAGES` pages. A partial listing is never returned, since
    /// advancing watermarks over it would hide the workflows not listed.
    pub async fn list_all(&self) -> Result<Vec<Value>, AppError> {
        let (mut workflows, mut cursor) = self.list_page(None).await?;
        let mut pages = 1;

        while let Some(next) = cursor {
            if pages >= MAX_PAGES {
                warn!(pages, "listing page limit reached");
                return Err(AppError::ClientError(format!(
                    "listing truncated after {} pages",
                    pages
                )));
            }
            let (items, following) = self.list_page(Some(&next)).await?;
            workflows.extend(items);
            cursor = following;
            pages += 1;
        }

        debug!(count = workflows.len(), pages, "listed workflows");
        Ok(workflows)
    }

    /// Fetches the full record of one workflow.
    ///
    /// # Errors
    ///
    /// Returns `AppError::WorkflowNotFound` on HTTP 404.
    pub async fn get_workflow(&self, id: &str) -> Result<Value, AppError> {
        let mut url = self.endpoint("api/v1/workflows")?;
        url.path_segments_mut()
            .map_err(|_| AppError::InvalidUrl(self.base_url.to_string()))?
            .push(id);

        let resp = match self.get(&url).await {
            Err(AppError::ClientError(msg)) if msg.starts_with("HTTP 404") => {
                return Err(AppError::WorkflowNotFound(id.to_string()));
            }
            other => other?,
        };

        resp.json()
            .await
            .map_err(|e| AppError::ClientError(format!("Failed to parse workflow {}: {}", id, e)))
    }

    fn endpoint(&self, path: &str) -> Result<Url, AppError> {
        self.base_url
            .join(path)
            .map_err(|e| AppError::InvalidUrl(e.to_string()))
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Credentials::None => req,
            Credentials::ApiKey(key) => req.header(API_KEY_HEADER, key),
            Credentials::Basic { user, password } => req.basic_auth(user, Some(password)),
            Credentials::Bearer(token) => req.bearer_auth(token),
        }
    }

    /// Makes a single authenticated GET request.
    ///
    /// There is no retry here: the poll interval is the retry cadence.
    async fn get(&self, url: &Url) -> Result<Response, AppError> {
        let resp = self
            .authorize(self.client.get(url.clone()))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Timeout(self.timeout_ms)
                } else if e.is_connect() {
                    AppError::NetworkError(format!("Connection failed: {}", e))
                } else {
                    AppError::ClientError(e.to_string())
                }
            })?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let body = resp.text().await.unwrap_or_default();
        Err(status_error(status, url, &body))
    }
}

/// Maps a non-success response to an error.
fn status_error(status: StatusCode, url: &Url, body: &str) -> AppError {
    let detail = serde_json::from_str::<ApiErrorBody>(body)
        .map(|b| b.message)
        .unwrap_or_default();

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AppError::Unauthorized(format!(
            "HTTP {} from {} {}",
            status.as_u16(),
            url,
            detail
        )
        .trim_end()
        .to_string()),
        StatusCode::TOO_MANY_REQUESTS => AppError::RateLimitExceeded,
        _ => AppError::ClientError(
            format!("HTTP {} from {} {}", status.as_u16(), url, detail)
                .trim_end()
                .to_string(),
        ),
    }
}

impl WorkflowSource for N8nClient {
    async fn list_workflows(&self) -> Result<Vec<Value>, AppError> {
        self.list_all().await
    }

    async fn fetch_workflow(&self, id: &str) -> Result<Value, AppError> {
        self.get_workflow(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn client(base: &str, credentials: Credentials) -> N8nClient {
        N8nClient::new(base, &HttpConfig::default(), credentials).unwrap()
    }

    #[test]
    fn test_new_with_valid_url() {
        let client = client("https://n8n.example.com", Credentials::None);
        assert_eq!(client.base_url().as_str(), "https://n8n.example.com/");
        assert_eq!(client.timeout_ms, 15_000);
    }

    #[test]
    fn test_new_with_invalid_url() {
        let result = N8nClient::new("not-a-valid-url", &HttpConfig::default(), Credentials::None);
        assert!(matches!(result, Err(AppError::InvalidUrl(_))));

        let result = N8nClient::new("ftp://host", &HttpConfig::default(), Credentials::None);
        assert!(matches!(result, Err(AppError::InvalidUrl(_))));
    }

    #[test]
    fn test_endpoint_keeps_path_prefix() {
        let client = client("https://example.com/automation", Credentials::None);
        let url = client.endpoint("api/v1/workflows").unwrap();
        assert_eq!(url.as_str(), "https://example.com/automation/api/v1/workflows");
    }

    #[test]
    fn test_from_watcher_uses_timeout_and_credentials() {
        let mut watcher = WatcherConfig::new("prod", "https://n8n.example.com");
        watcher.request_timeout_ms = 2500;
        watcher.credentials.api_key = Some("k".into());

        let client = N8nClient::from_watcher(&watcher).unwrap();
        assert_eq!(client.timeout_ms, 2500);
        assert_eq!(client.credentials, Credentials::ApiKey("k".into()));
    }

    #[test]
    fn test_authorize_api_key() {
        let client = client("https://n8n.example.com", Credentials::ApiKey("secret".into()));
        let req = client
            .authorize(client.client.get("https://n8n.example.com/api/v1/workflows"))
            .build()
            .unwrap();
        assert_eq!(req.headers()[API_KEY_HEADER], "secret");
        assert!(req.headers().get(reqwest::header::AUTHORIZATION).is_none());
    }

    #[test]
    fn test_authorize_basic_and_bearer() {
        let basic = client(
            "https://n8n.example.com",
            Credentials::Basic {
                user: "user".into(),
                password: "pw".into(),
            },
        );
        let req = basic
            .authorize(basic.client.get("https://n8n.example.com/"))
            .build()
            .unwrap();
        let auth = req.headers()[reqwest::header::AUTHORIZATION].to_str().unwrap();
        assert!(auth.starts_with("Basic "));

        let bearer = client("https://n8n.example.com", Credentials::Bearer("tok".into()));
        let req = bearer
            .authorize(bearer.client.get("https://n8n.example.com/"))
            .build()
            .unwrap();
        assert_eq!(req.headers()[reqwest::header::AUTHORIZATION], "Bearer tok");
    }

    #[test]
    fn test_status_error_mapping() {
        let url = Url::parse("https://n8n.example.com/api/v1/workflows").unwrap();

        let err = status_error(StatusCode::UNAUTHORIZED, &url, r#"{"message":"unauthorized"}"#);
        assert!(matches!(err, AppError::Unauthorized(ref m) if m.contains("unauthorized")));

        let err = status_error(StatusCode::TOO_MANY_REQUESTS, &url, "");
        assert!(matches!(err, AppError::RateLimitExceeded));

        let err = status_error(StatusCode::NOT_FOUND, &url, "<html>");
        assert!(matches!(err, AppError::ClientError(ref m) if m.starts_with("HTTP 404")));

        let err = status_error(StatusCode::BAD_GATEWAY, &url, "");
        assert!(err.is_retryable());
    }

    /// Serves the workflows listing; the first `cursor_pages` pages carry a
    /// `nextCursor`.
    async fn serve_listing(cursor_pages: usize) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let served = Arc::new(AtomicUsize::new(0));
        let counter = served.clone();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }

                let page = counter.fetch_add(1, Ordering::SeqCst) + 1;
                let next = (page <= cursor_pages).then(|| format!("c{}", page));
                let body = json!({
                    "data": [{"id": page.to_string(), "name": "w", "updatedAt": "2024-01-01T00:00:00Z"}],
                    "nextCursor": next
                })
                .to_string();
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (format!("http://{}", addr), served)
    }

    #[tokio::test]
    async fn test_list_all_follows_cursor_to_the_end() {
        let (base, served) = serve_listing(2).await;
        let client = client(&base, Credentials::None);

        let workflows = client.list_all().await.unwrap();
        assert_eq!(workflows.len(), 3);
        assert_eq!(served.load(Ordering::SeqCst), 3);
        assert_eq!(workflows[2]["id"], "3");
    }

    #[tokio::test]
    async fn test_list_all_fails_when_page_limit_is_reached() {
        let (base, served) = serve_listing(usize::MAX).await;
        let client = client(&base, Credentials::None);

        let result = client.list_all().await;
        assert!(matches!(result, Err(AppError::ClientError(ref m)) if m.contains("truncated")));
        assert_eq!(served.load(Ordering::SeqCst), MAX_PAGES);
    }

    #[test]
    fn test_api_error_body_deserialization() {
        let body: ApiErrorBody =
            serde_json::from_str(r#"{"message": "Workflow not found", "code": 404}"#).unwrap();
        assert_eq!(body.message, "Workflow not found");
    }
}
