use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use url::Url;

use crate::config::Config;
use crate::error::{RuntimeError, RuntimeResult};
use crate::metrics::track_api_call;
use crate::models::{AdvanceResponse, SaveAnswerRequest, SectionPayload, SectionType};

/// The slice of the exam backend the runtime talks to.
#[async_trait]
pub trait ExamApi: Send + Sync {
    async fn fetch_section(
        &self,
        attempt_id: &str,
        section: SectionType,
    ) -> RuntimeResult<SectionPayload>;

    /// `Ok(false)` means the backend answered but refused the save.
    async fn save_answer(&self, attempt_id: &str, request: &SaveAnswerRequest)
        -> RuntimeResult<bool>;

    async fn submit_writing(
        &self,
        attempt_id: &str,
        task_id: &str,
        text: &str,
    ) -> RuntimeResult<serde_json::Value>;

    async fn submit_speaking(
        &self,
        attempt_id: &str,
        question_key: &str,
        audio: Vec<u8>,
    ) -> RuntimeResult<serde_json::Value>;

    async fn advance_section(&self, attempt_id: &str) -> RuntimeResult<AdvanceResponse>;

    async fn submit_final(&self, attempt_id: &str) -> RuntimeResult<bool>;
}

#[derive(Debug, Deserialize)]
struct SuccessBody {
    #[serde(default = "default_success")]
    success: bool,
}

fn default_success() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct AdvanceBody {
    #[serde(default)]
    current_section: Option<String>,
}

/// reqwest-backed [`ExamApi`].
#[derive(Clone)]
pub struct HttpExamApi {
    client: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpExamApi {
    pub fn new(config: &Config) -> RuntimeResult<Self> {
        let mut base_url = Url::parse(&config.api_base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(RuntimeError::Url(
                url::ParseError::RelativeUrlWithCannotBeABaseBase,
            ));
        }
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|source| RuntimeError::Request {
                endpoint: "client".to_string(),
                source,
            })?;

        Ok(Self {
            client,
            base_url,
            token: config.api_token.clone(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// `attempts/{attempt_id}/{segments...}`, each segment percent-encoded.
    fn endpoint(&self, attempt_id: &str, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push("attempts").push(attempt_id);
            path.extend(segments);
        }
        url
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        endpoint: &Url,
    ) -> RuntimeResult<T> {
        let endpoint = endpoint.path().to_string();
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|source| RuntimeError::Request {
                endpoint: endpoint.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            tracing::warn!("{} returned {}: {}", endpoint, status, message);
            return Err(RuntimeError::BadResponse {
                endpoint,
                status: status.as_u16(),
                message,
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|source| RuntimeError::Request {
                endpoint: endpoint.clone(),
                source,
            })?;
        // Empty 2xx bodies read as JSON null
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(serde_json::from_value(serde_json::Value::Null)?);
        }
        Ok(serde_json::from_slice(&body)?)
    }
}

#[async_trait]
impl ExamApi for HttpExamApi {
    async fn fetch_section(
        &self,
        attempt_id: &str,
        section: SectionType,
    ) -> RuntimeResult<SectionPayload> {
        let url = self.endpoint(attempt_id, &["sections", section.slug()]);
        tracing::debug!("Fetching section {} for attempt {}", section, attempt_id);
        track_api_call(
            "fetch_section",
            self.send(self.client.get(url.clone()), &url),
        )
        .await
    }

    async fn save_answer(
        &self,
        attempt_id: &str,
        request: &SaveAnswerRequest,
    ) -> RuntimeResult<bool> {
        let url = self.endpoint(attempt_id, &["answers"]);
        let body: Option<SuccessBody> = track_api_call(
            "save_answer",
            self.send(self.client.post(url.clone()).json(request), &url),
        )
        .await?;
        Ok(body.map(|b| b.success).unwrap_or(true))
    }

    async fn submit_writing(
        &self,
        attempt_id: &str,
        task_id: &str,
        text: &str,
    ) -> RuntimeResult<serde_json::Value> {
        let url = self.endpoint(attempt_id, &["writing"]);
        let payload = json!({ "task_id": task_id, "text": text });
        track_api_call(
            "submit_writing",
            self.send(self.client.post(url.clone()).json(&payload), &url),
        )
        .await
    }

    async fn submit_speaking(
        &self,
        attempt_id: &str,
        question_key: &str,
        audio: Vec<u8>,
    ) -> RuntimeResult<serde_json::Value> {
        let url = self.endpoint(attempt_id, &["speaking"]);
        let part = Part::bytes(audio)
            .file_name("answer.webm")
            .mime_str("audio/webm")
            .map_err(|source| RuntimeError::Request {
                endpoint: url.path().to_string(),
                source,
            })?;
        let form = Form::new()
            .text("question_key", question_key.to_string())
            .part("audio", part);

        track_api_call(
            "submit_speaking",
            self.send(self.client.post(url.clone()).multipart(form), &url),
        )
        .await
    }

    async fn advance_section(&self, attempt_id: &str) -> RuntimeResult<AdvanceResponse> {
        let url = self.endpoint(attempt_id, &["advance"]);
        let body: Option<AdvanceBody> = track_api_call(
            "advance_section",
            self.send(self.client.post(url.clone()), &url),
        )
        .await?;
        Ok(AdvanceResponse::from_current_section(
            body.as_ref().and_then(|b| b.current_section.as_deref()),
        ))
    }

    async fn submit_final(&self, attempt_id: &str) -> RuntimeResult<bool> {
        let url = self.endpoint(attempt_id, &["submit"]);
        let body: Option<SuccessBody> = track_api_call(
            "submit_final",
            self.send(self.client.post(url.clone()), &url),
        )
        .await?;
        Ok(body.map(|b| b.success).unwrap_or(true))
    }
}
