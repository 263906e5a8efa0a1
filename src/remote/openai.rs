//! OpenAI Assistants v2 HTTP client.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::DriverConfig;
use crate::error::{DriverError, Result};

use super::events::RunStreamEvent;
use super::http::{assistants_headers, status_to_error, SseDecoder};
use super::types::{
    AssistantObject, CreateAssistant, CreateMessage, ListResponse, RunObject, ThreadMessage,
    ThreadObject, ToolOutput,
};
use super::{AssistantsApi, RunEventStream};

pub struct OpenAiAssistantsClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    request_timeout: Duration,
}

impl OpenAiAssistantsClient {
    pub fn new(api_key: String, base_url: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        // No client-wide timeout: streamed runs stay open for as long as the
        // run takes. Unary calls set `request_timeout` per request.
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(10)
            .build()?;
        Ok(Self {
            http,
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            request_timeout,
        })
    }

    pub fn from_config(config: &DriverConfig) -> Result<Self> {
        Self::new(
            config.resolve_api_key()?,
            config.resolve_base_url(),
            config.request_timeout(),
        )
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body_text = resp.text().await.unwrap_or_default();
        Err(status_to_error(status.as_u16(), &body_text))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let resp = self
            .http
            .get(self.url(path))
            .headers(assistants_headers(&self.api_key))
            .timeout(self.request_timeout)
            .send()
            .await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T> {
        let resp = self
            .http
            .post(self.url(path))
            .headers(assistants_headers(&self.api_key))
            .timeout(self.request_timeout)
            .json(body)
            .send()
            .await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let resp = self
            .http
            .delete(self.url(path))
            .headers(assistants_headers(&self.api_key))
            .timeout(self.request_timeout)
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }

    async fn post_stream(&self, path: &str, mut body: serde_json::Value) -> Result<RunEventStream> {
        if let Some(obj) = body.as_object_mut() {
            obj.insert("stream".into(), true.into());
        }
        let resp = self
            .http
            .post(self.url(path))
            .headers(assistants_headers(&self.api_key))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&body)
            .send()
            .await?;
        let byte_stream = Self::check(resp).await?.bytes_stream();

        let stream = async_stream::stream! {
            let mut decoder = SseDecoder::default();
            futures::pin_mut!(byte_stream);

            while let Some(chunk_result) = byte_stream.next().await {
                let chunk = match chunk_result {
                    Ok(c) => c,
                    Err(e) => {
                        yield Err(DriverError::Network(e));
                        return;
                    }
                };

                for frame in decoder.push(&chunk) {
                    match RunStreamEvent::parse(&frame.event, &frame.data) {
                        Ok(RunStreamEvent::Done) => {
                            yield Ok(RunStreamEvent::Done);
                            return;
                        }
                        Ok(event) => yield Ok(event),
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }
            }

            if let Some(frame) = decoder.finish() {
                yield RunStreamEvent::parse(&frame.event, &frame.data);
            }
        };

        Ok(Box::pin(stream))
    }
}

#[async_trait]
impl AssistantsApi for OpenAiAssistantsClient {
    async fn create_assistant(&self, request: &CreateAssistant) -> Result<AssistantObject> {
        debug!(name = %request.name, model = %request.model, tools = request.tools.len(), "creating assistant");
        self.post_json("/assistants", &serde_json::to_value(request)?).await
    }

    async fn delete_assistant(&self, assistant_id: &str) -> Result<()> {
        debug!(assistant_id, "deleting assistant");
        self.delete(&format!("/assistants/{assistant_id}")).await
    }

    async fn create_thread(&self) -> Result<ThreadObject> {
        self.post_json("/threads", &serde_json::json!({})).await
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        debug!(thread_id, "deleting thread");
        self.delete(&format!("/threads/{thread_id}")).await
    }

    async fn create_message(
        &self,
        thread_id: &str,
        request: &CreateMessage,
    ) -> Result<ThreadMessage> {
        self.post_json(
            &format!("/threads/{thread_id}/messages"),
            &serde_json::to_value(request)?,
        )
        .await
    }

    async fn list_messages(
        &self,
        thread_id: &str,
        run_id: Option<&str>,
    ) -> Result<Vec<ThreadMessage>> {
        let mut path = format!("/threads/{thread_id}/messages?order=asc&limit=100");
        if let Some(run_id) = run_id {
            path.push_str("&run_id=");
            path.push_str(run_id);
        }
        let list: ListResponse<ThreadMessage> = self.get_json(&path).await?;
        Ok(list.data)
    }

    async fn create_run(&self, thread_id: &str, assistant_id: &str) -> Result<RunObject> {
        self.post_json(
            &format!("/threads/{thread_id}/runs"),
            &serde_json::json!({ "assistant_id": assistant_id }),
        )
        .await
    }

    async fn create_run_stream(
        &self,
        thread_id: &str,
        assistant_id: &str,
    ) -> Result<RunEventStream> {
        self.post_stream(
            &format!("/threads/{thread_id}/runs"),
            serde_json::json!({ "assistant_id": assistant_id }),
        )
        .await
    }

    async fn retrieve_run(&self, thread_id: &str, run_id: &str) -> Result<RunObject> {
        self.get_json(&format!("/threads/{thread_id}/runs/{run_id}"))
            .await
    }

    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<RunObject> {
        self.post_json(
            &format!("/threads/{thread_id}/runs/{run_id}/cancel"),
            &serde_json::json!({}),
        )
        .await
    }

    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<RunObject> {
        self.post_json(
            &format!("/threads/{thread_id}/runs/{run_id}/submit_tool_outputs"),
            &serde_json::json!({ "tool_outputs": outputs }),
        )
        .await
    }

    async fn submit_tool_outputs_stream(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<RunEventStream> {
        self.post_stream(
            &format!("/threads/{thread_id}/runs/{run_id}/submit_tool_outputs"),
            serde_json::json!({ "tool_outputs": outputs }),
        )
        .await
    }
}
