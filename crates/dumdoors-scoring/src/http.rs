//! HTTP adapter for the external scoring service.

use async_trait::async_trait;
use dumdoors_core::model::SubScores;
use dumdoors_core::scoring::{ScoreCard, ScoreRequest, ScoringError, ScoringService};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize)]
struct ScoreResponseBody<'a> {
    response_id: Uuid,
    door_content: &'a str,
    response: &'a str,
    context: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ScoringResult {
    total_score: f64,
    metrics: ScoringMetrics,
}

#[derive(Debug, Deserialize)]
struct ScoringMetrics {
    creativity: f64,
    feasibility: f64,
    humor: f64,
    originality: f64,
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_score(value: f64) -> u8 {
    value.round().clamp(0.0, 100.0) as u8
}

/// Calls `POST {base_url}/scoring/score-response`.
#[derive(Debug, Clone)]
pub struct HttpScoringService {
    client: reqwest::Client,
    base_url: String,
}

impl HttpScoringService {
    /// Creates an adapter for the service at `base_url`.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Creates an adapter sharing an existing client.
    #[must_use]
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        }
    }
}

fn classify(err: &reqwest::Error) -> ScoringError {
    if err.is_timeout() {
        ScoringError::Timeout
    } else if err.is_decode() {
        ScoringError::Rejected(format!("malformed scoring response: {err}"))
    } else {
        ScoringError::Network(err.to_string())
    }
}

#[async_trait]
impl ScoringService for HttpScoringService {
    async fn score(&self, request: &ScoreRequest) -> Result<ScoreCard, ScoringError> {
        let body = ScoreResponseBody {
            response_id: Uuid::new_v4(),
            door_content: &request.scenario,
            response: &request.response,
            context: request
                .theme
                .as_ref()
                .map(|theme| serde_json::json!({ "theme": theme })),
        };
        let response = self
            .client
            .post(format!("{}/scoring/score-response", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| classify(&e))?;

        let status = response.status();
        if status == StatusCode::SERVICE_UNAVAILABLE
            || status == StatusCode::BAD_GATEWAY
            || status == StatusCode::GATEWAY_TIMEOUT
            || status == StatusCode::TOO_MANY_REQUESTS
        {
            return Err(ScoringError::Unavailable(status.to_string()));
        }
        if status.is_client_error() {
            return Err(ScoringError::Rejected(status.to_string()));
        }
        if !status.is_success() {
            return Err(ScoringError::Unavailable(status.to_string()));
        }

        let result: ScoringResult = response.json().await.map_err(|e| classify(&e))?;
        Ok(ScoreCard {
            score: to_score(result.total_score),
            sub_scores: SubScores {
                creativity: to_score(result.metrics.creativity),
                feasibility: to_score(result.metrics.feasibility),
                humor: to_score(result.metrics.humor),
                originality: to_score(result.metrics.originality),
            },
        })
    }
}
