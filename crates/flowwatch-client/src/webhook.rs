use flowwatch_core::config::HttpConfig;
use flowwatch_core::error::AppError;
use flowwatch_core::models::ChangeRecord;
use flowwatch_core::traits::EmissionSink;
use reqwest::{Client, Url};
use tracing::debug;

/// Delivers each batch of changes as a JSON array to an HTTP endpoint.
///
/// # Examples
///
/// ```no_run
/// use flowwatch_client::WebhookSink;
/// use flowwatch_core::HttpConfig;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let sink = WebhookSink::new("https://hooks.example.com/changes", &HttpConfig::default(), None)?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct WebhookSink {
    client: Client,
    url: Url,
    bearer_token: Option<String>,
}

impl WebhookSink {
    /// Creates a sink posting to `url`, optionally with a bearer token.
    pub fn new(url: &str, http: &HttpConfig, bearer_token: Option<String>) -> Result<Self, AppError> {
        let url = Url::parse(url).map_err(|_| AppError::InvalidUrl(url.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(AppError::InvalidUrl(url.to_string()));
        }

        let client = Client::builder()
            .user_agent(http.user_agent.as_str())
            .timeout(http.timeout)
            .build()
            .map_err(|e| AppError::ClientError(e.to_string()))?;

        Ok(Self {
            client,
            url,
            bearer_token,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl EmissionSink for WebhookSink {
    async fn emit(&self, batch: &[ChangeRecord]) -> Result<(), AppError> {
        let mut req = self.client.post(self.url.clone()).json(batch);
        if let Some(token) = &self.bearer_token {
            req = req.bearer_auth(token);
        }

        let response = req
            .send()
            .await
            .map_err(|e| AppError::EmissionError(format!("POST {} failed: {}", self.url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::EmissionError(format!(
                "HTTP {} from {}",
                status.as_u16(),
                self.url
            )));
        }

        debug!(url = %self.url, records = batch.len(), "batch delivered");
        Ok(())
    }
}
