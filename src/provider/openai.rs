//! HTTP client for an OpenAI-compatible assistant job API.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::provider::sse::event_stream;
use crate::provider::types::{
    AssistantConfig, ListedMessage, RunHandle, RunStatus, SeedMessage,
};
use crate::provider::{AssistantJobs, ProviderError, ProviderResult, RunEventStream};

/// Default API base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Configuration for the assistant API client.
#[derive(Clone, Debug)]
pub struct ProviderConfig {
    /// API base URL, without trailing slash.
    pub base_url: String,
    /// Bearer token.
    pub api_key: String,
    /// Request timeout.
    pub request_timeout: Duration,
}

impl ProviderConfig {
    /// Build a config for the given API key with default endpoint settings.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            request_timeout: Duration::from_secs(120),
        }
    }
}

/// Assistant job client speaking the threads/runs wire protocol.
pub struct OpenAiAssistantClient {
    client: reqwest::Client,
    config: ProviderConfig,
}

#[derive(Debug, Deserialize)]
struct WireRun {
    id: String,
    thread_id: String,
}

#[derive(Debug, Deserialize)]
struct WireRunStatus {
    status: RunStatus,
}

#[derive(Debug, Deserialize)]
struct WireMessageList {
    #[serde(default)]
    data: Vec<ListedMessage>,
}

#[derive(Debug, Deserialize)]
struct WireErrorBody {
    #[serde(default)]
    error: Option<WireErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct WireErrorDetail {
    #[serde(default)]
    message: Option<String>,
}

impl OpenAiAssistantClient {
    /// Create a client from configuration.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: ProviderConfig) -> ProviderResult<Self> {
        use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};

        let mut headers = HeaderMap::new();
        let bearer = format!("Bearer {}", config.api_key);
        if let Ok(mut value) = HeaderValue::from_str(&bearer) {
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
        if let Ok(value) = HeaderValue::from_str("assistants=v2") {
            headers.insert("OpenAI-Beta", value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url)
    }

    async fn check(response: reqwest::Response) -> ProviderResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<WireErrorBody>(&body)
            .ok()
            .and_then(|body| body.error)
            .and_then(|detail| detail.message)
            .unwrap_or(body);
        Err(ProviderError::Api {
            status: status.as_u16(),
            message,
        })
    }

    fn seed_payload(messages: &[SeedMessage]) -> Vec<serde_json::Value> {
        messages
            .iter()
            .map(|message| json!({"role": message.role, "content": message.content}))
            .collect()
    }

    fn run_body(
        assistant_id: &str,
        messages: Option<&[SeedMessage]>,
        structured: bool,
        stream: bool,
    ) -> serde_json::Value {
        let mut body = json!({"assistant_id": assistant_id});
        if let Some(messages) = messages {
            body["thread"] = json!({"messages": Self::seed_payload(messages)});
        }
        if structured {
            body["response_format"] = json!({"type": "json_object"});
        }
        if stream {
            body["stream"] = json!(true);
        }
        body
    }

    async fn post_run(&self, path: &str, body: serde_json::Value) -> ProviderResult<RunHandle> {
        let response = self.client.post(self.url(path)).json(&body).send().await?;
        let run: WireRun = Self::check(response).await?.json().await?;
        Ok(RunHandle {
            run_id: run.id,
            conversation_id: run.thread_id,
        })
    }

    async fn post_run_stream(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> ProviderResult<RunEventStream> {
        let response = self.client.post(self.url(path)).json(&body).send().await?;
        let response = Self::check(response).await?;
        Ok(event_stream(response))
    }
}

#[async_trait]
impl AssistantJobs for OpenAiAssistantClient {
    async fn fetch_assistant(&self, assistant_id: &str) -> ProviderResult<AssistantConfig> {
        let response = self
            .client
            .get(self.url(&format!("/assistants/{assistant_id}")))
            .send()
            .await?;
        let config: AssistantConfig = Self::check(response).await?.json().await?;
        Ok(config)
    }

    async fn create_conversation_run(
        &self,
        assistant_id: &str,
        messages: Vec<SeedMessage>,
        structured: bool,
    ) -> ProviderResult<RunHandle> {
        let body = Self::run_body(assistant_id, Some(&messages), structured, false);
        self.post_run("/threads/runs", body).await
    }

    async fn append_message(&self, conversation_id: &str, content: &str) -> ProviderResult<()> {
        let response = self
            .client
            .post(self.url(&format!("/threads/{conversation_id}/messages")))
            .json(&json!({"role": "user", "content": content}))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn create_run(
        &self,
        conversation_id: &str,
        assistant_id: &str,
        structured: bool,
    ) -> ProviderResult<RunHandle> {
        let body = Self::run_body(assistant_id, None, structured, false);
        self.post_run(&format!("/threads/{conversation_id}/runs"), body)
            .await
    }

    async fn fetch_run(&self, conversation_id: &str, run_id: &str) -> ProviderResult<RunStatus> {
        let response = self
            .client
            .get(self.url(&format!("/threads/{conversation_id}/runs/{run_id}")))
            .send()
            .await?;
        let run: WireRunStatus = Self::check(response).await?.json().await?;
        Ok(run.status)
    }

    async fn latest_message(
        &self,
        conversation_id: &str,
    ) -> ProviderResult<Option<ListedMessage>> {
        let response = self
            .client
            .get(self.url(&format!("/threads/{conversation_id}/messages")))
            .query(&[("limit", "1"), ("order", "desc")])
            .send()
            .await?;
        let list: WireMessageList = Self::check(response).await?.json().await?;
        Ok(list.data.into_iter().next())
    }

    async fn stream_conversation_run(
        &self,
        assistant_id: &str,
        messages: Vec<SeedMessage>,
        structured: bool,
    ) -> ProviderResult<RunEventStream> {
        let body = Self::run_body(assistant_id, Some(&messages), structured, true);
        self.post_run_stream("/threads/runs", body).await
    }

    async fn stream_run(
        &self,
        conversation_id: &str,
        assistant_id: &str,
        structured: bool,
    ) -> ProviderResult<RunEventStream> {
        let body = Self::run_body(assistant_id, None, structured, true);
        self.post_run_stream(&format!("/threads/{conversation_id}/runs"), body)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_body_shapes() {
        let seeded = OpenAiAssistantClient::run_body(
            "asst_1",
            Some(&[SeedMessage::user("hi")]),
            true,
            false,
        );
        assert_eq!(seeded["assistant_id"], "asst_1");
        assert_eq!(seeded["thread"]["messages"][0]["content"], "hi");
        assert_eq!(seeded["response_format"]["type"], "json_object");
        assert!(seeded.get("stream").is_none());

        let bare = OpenAiAssistantClient::run_body("asst_1", None, false, true);
        assert!(bare.get("thread").is_none());
        assert!(bare.get("response_format").is_none());
        assert_eq!(bare["stream"], true);
    }

    #[test]
    fn test_wire_run_decodes() {
        let run: WireRun = serde_json::from_str(
            r#"{"id":"run_1","thread_id":"thread_2","status":"queued","object":"thread.run"}"#,
        )
        .unwrap();
        assert_eq!(run.id, "run_1");
        assert_eq!(run.thread_id, "thread_2");
    }
}
