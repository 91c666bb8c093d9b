//! HTTP client for communicating with doubtd.

use anyhow::{anyhow, Context, Result};
use doubt_common::api::{
    AccountResponse, AnswerResponse, AskRequest, CredentialsRequest, ErrorResponse,
    FeedbackRequest, FollowUpRequest, HealthResponse,
};
use doubt_common::store::{Feedback, QuestionSummary, QuestionThread};
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

/// Client for the doubtd web API
pub struct ApiClient {
    base: String,
    token: Option<String>,
    client: Client,
}

impl ApiClient {
    pub fn new(base: &str, token: Option<String>) -> Result<Self> {
        let client = Client::builder()
            // Answers can take a while on long threads
            .timeout(Duration::from_secs(120))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            base: base.trim_end_matches('/').to_string(),
            token,
            client,
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    fn authorized(&self, builder: RequestBuilder) -> Result<RequestBuilder> {
        let token = self.token.as_deref().ok_or_else(|| {
            anyhow!("Please log in to access the app.\nRun `doubtctl login` and export DOUBT_TOKEN.")
        })?;
        Ok(builder.bearer_auth(token))
    }

    fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let response = builder.send().map_err(|e| {
            anyhow!(
                "Cannot reach doubtd at {}: {}\n\nIs the daemon running? Start it with `doubtd`.",
                self.base,
                e
            )
        })?;
        debug!("doubtd replied {}", response.status());

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body = response.text().unwrap_or_default();
        let message = serde_json::from_str::<ErrorResponse>(&body)
            .map(|e| e.error)
            .unwrap_or_else(|_| format!("doubtd returned {}", status));
        Err(anyhow!(message))
    }

    fn json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        self.send(builder)?
            .json()
            .context("Invalid response from doubtd")
    }

    pub fn health(&self) -> Result<HealthResponse> {
        self.json(self.client.get(self.url("/v1/health")))
    }

    pub fn signup(&self, username: &str, password: &str) -> Result<AccountResponse> {
        let body = credentials(username, password);
        self.json(self.client.post(self.url("/v1/signup")).json(&body))
    }

    pub fn login(&self, username: &str, password: &str) -> Result<AccountResponse> {
        let body = credentials(username, password);
        self.json(self.client.post(self.url("/v1/login")).json(&body))
    }

    pub fn logout(&self) -> Result<()> {
        let request = self.authorized(self.client.post(self.url("/v1/logout")))?;
        self.send(request)?;
        Ok(())
    }

    pub fn ask(&self, request: &AskRequest) -> Result<AnswerResponse> {
        let request = self.authorized(self.client.post(self.url("/v1/questions")).json(request))?;
        self.json(request)
    }

    pub fn follow_up(&self, question_id: &str, text: &str) -> Result<AnswerResponse> {
        let body = FollowUpRequest {
            text: text.to_string(),
        };
        let path = format!("/v1/questions/{}/messages", question_id);
        let request = self.authorized(self.client.post(self.url(&path)).json(&body))?;
        self.json(request)
    }

    pub fn questions(&self) -> Result<Vec<QuestionSummary>> {
        let request = self.authorized(self.client.get(self.url("/v1/questions")))?;
        self.json(request)
    }

    pub fn thread(&self, question_id: &str) -> Result<QuestionThread> {
        let path = format!("/v1/questions/{}", question_id);
        let request = self.authorized(self.client.get(self.url(&path)))?;
        self.json(request)
    }

    pub fn feedback(&self, question_id: &str, text: &str, rating: Option<u8>) -> Result<Feedback> {
        let body = FeedbackRequest {
            text: text.to_string(),
            rating,
        };
        let path = format!("/v1/questions/{}/feedback", question_id);
        let request = self.authorized(self.client.post(self.url(&path)).json(&body))?;
        self.json(request)
    }
}

fn credentials(username: &str, password: &str) -> CredentialsRequest {
    CredentialsRequest {
        username: username.to_string(),
        password: password.to_string(),
    }
}
