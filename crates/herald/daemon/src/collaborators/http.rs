use crate::config::CollaboratorConfig;
use crate::error::{DaemonError, DaemonResult};
use async_trait::async_trait;
use herald_runtime::{
    Analyzer, CollaboratorError, CollaboratorResult, ContentGenerator, Extractor, LearningRow,
    Platform, PollBatch, Scorer,
};
use herald_types::{
    ExternalId, InboxItem, MemoryCandidate, OutboundPost, RawItem, StyleVersionPayload,
};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

/// Shared plumbing: base URL, bearer token, timeout and status mapping.
#[derive(Debug, Clone)]
struct Endpoint {
    client: Client,
    base_url: String,
    api_token: Option<String>,
    timeout: Duration,
    service: &'static str,
}

impl Endpoint {
    fn new(
        service: &'static str,
        base_url: &str,
        config: &CollaboratorConfig,
    ) -> DaemonResult<Self> {
        let timeout = Duration::from_secs(config.request_timeout_secs);
        let mut builder = Client::builder().timeout(timeout);
        if !config.use_system_proxy {
            builder = builder.no_proxy();
        }
        let client = builder
            .build()
            .map_err(|e| DaemonError::Config(format!("failed to build {service} client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
            timeout,
            service,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> CollaboratorResult<T> {
        let request = self.authorize(self.client.get(self.url(path)).query(query));
        self.send(request).await
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> CollaboratorResult<T> {
        let request = self.authorize(self.client.post(self.url(path)).json(body));
        self.send(request).await
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> CollaboratorResult<T> {
        let response = request
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let response = self.check_status(response).await?;
        response.json().await.map_err(|e| {
            CollaboratorError::InvalidResponse(format!("invalid {} response: {}", self.service, e))
        })
    }

    fn transport_error(&self, err: reqwest::Error) -> CollaboratorError {
        if err.is_timeout() {
            CollaboratorError::Timeout(self.timeout)
        } else {
            CollaboratorError::Transient(format!("{} request failed: {}", self.service, err))
        }
    }

    async fn check_status(&self, response: Response) -> CollaboratorResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify(self.service, status, &body))
    }
}

/// Map a non-success HTTP status onto the collaborator error taxonomy.
fn classify(service: &str, status: StatusCode, body: &str) -> CollaboratorError {
    let message = format!("{} error {}: {}", service, status, truncate(body, 320));
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => CollaboratorError::Unauthorized(message),
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => {
            CollaboratorError::Transient(message)
        }
        s if s.is_server_error() => CollaboratorError::Transient(message),
        _ => CollaboratorError::Rejected(message),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

/// Social platform gateway.
///
/// `GET /mentions?since=<cursor>` returns a [`PollBatch`];
/// `POST /posts` with `{text, reply_to}` returns `{id}`.
#[derive(Debug, Clone)]
pub struct HttpPlatform {
    endpoint: Endpoint,
}

#[derive(Debug, Deserialize)]
struct PublishedPost {
    id: String,
}

impl HttpPlatform {
    pub fn new(base_url: &str, config: &CollaboratorConfig) -> DaemonResult<Self> {
        Ok(Self {
            endpoint: Endpoint::new("platform", base_url, config)?,
        })
    }
}

#[async_trait]
impl Platform for HttpPlatform {
    async fn poll(&self, cursor: Option<&str>) -> CollaboratorResult<PollBatch> {
        let query: Vec<(&str, &str)> = cursor.map(|c| ("since", c)).into_iter().collect();
        self.endpoint.get("mentions", &query).await
    }

    async fn publish(
        &self,
        text: &str,
        reply_to: Option<&ExternalId>,
    ) -> CollaboratorResult<ExternalId> {
        let body = json!({
            "text": text,
            "reply_to": reply_to.map(ExternalId::as_str),
        });
        let posted: PublishedPost = self.endpoint.post("posts", &body).await?;
        if posted.id.trim().is_empty() {
            return Err(CollaboratorError::InvalidResponse(
                "platform returned an empty post id".to_string(),
            ));
        }
        Ok(ExternalId::new(posted.id))
    }
}

/// Persona service: reply and timeline generation, relevance scoring,
/// memory extraction and style analysis.
#[derive(Debug, Clone)]
pub struct HttpPersona {
    endpoint: Endpoint,
}

#[derive(Debug, Deserialize)]
struct GeneratedText {
    text: String,
}

#[derive(Debug, Deserialize)]
struct ScoreResponse {
    score: f64,
}

#[derive(Debug, Deserialize)]
struct ExtractResponse {
    #[serde(default)]
    memories: Vec<MemoryCandidate>,
}

impl HttpPersona {
    pub fn new(base_url: &str, config: &CollaboratorConfig) -> DaemonResult<Self> {
        Ok(Self {
            endpoint: Endpoint::new("persona", base_url, config)?,
        })
    }

    async fn generate(&self, path: &str, body: &serde_json::Value) -> CollaboratorResult<String> {
        let generated: GeneratedText = self.endpoint.post(path, body).await?;
        let text = generated.text.trim();
        if text.is_empty() {
            return Err(CollaboratorError::InvalidResponse(
                "persona returned empty text".to_string(),
            ));
        }
        Ok(text.to_string())
    }
}

#[async_trait]
impl ContentGenerator for HttpPersona {
    async fn generate_reply(&self, item: &InboxItem) -> CollaboratorResult<String> {
        self.generate("reply", &json!({ "item": item })).await
    }

    async fn generate_timeline_post(&self) -> CollaboratorResult<String> {
        self.generate("timeline", &json!({})).await
    }
}

#[async_trait]
impl Scorer for HttpPersona {
    async fn score(&self, item: &RawItem) -> CollaboratorResult<f64> {
        let scored: ScoreResponse = self.endpoint.post("score", &json!({ "item": item })).await?;
        if !scored.score.is_finite() {
            return Err(CollaboratorError::InvalidResponse(format!(
                "non-finite score {}",
                scored.score
            )));
        }
        Ok(scored.score)
    }
}

#[async_trait]
impl Extractor for HttpPersona {
    async fn extract(&self, row: &LearningRow) -> CollaboratorResult<Vec<MemoryCandidate>> {
        let extracted: ExtractResponse = self.endpoint.post("extract", row).await?;
        Ok(extracted.memories)
    }
}

#[async_trait]
impl Analyzer for HttpPersona {
    async fn build_style_version(
        &self,
        posts: &[OutboundPost],
    ) -> CollaboratorResult<StyleVersionPayload> {
        self.endpoint.post("analyze", &json!({ "posts": posts })).await
    }
}
