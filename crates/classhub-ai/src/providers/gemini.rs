//! Google Generative Language API: streamed chat and Veo long-running jobs.
//!
//! Chat goes through `models/{model}:streamGenerateContent?alt=sse`. Video
//! generation is submitted to `models/{model}:predictLongRunning`, which returns
//! an operation resource name polled with `GET /{name}`.

use std::collections::VecDeque;

use base64::Engine;
use futures_util::{Stream, StreamExt};
use reqwest::{RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{json, Value};

use super::common::{join_url, shared_http_client, truncate_for_details};
use super::sse::SseDecoder;
use crate::credential::Credential;
use crate::error::{AiError, AiErrorCode};
use crate::provider::{FragmentSource, GenAiProvider, ProviderFuture};
use crate::types::{
    ConversationHistory, GenerationOperation, GenerationRequest, OperationFailure,
    OperationHandle,
};

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_CHAT_MODEL: &str = "gemini-3-pro-preview";
pub const DEFAULT_VIDEO_MODEL: &str = "veo-3.1-fast-generate-preview";

const VIDEO_URI_POINTERS: &[&str] = &[
    "/generateVideoResponse/generatedSamples/0/video/uri",
    "/generateVideoResponse/generatedSamples/0/videoUri",
    "/generatedVideos/0/video/uri",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeminiConfig {
    pub base_url: String,
    pub chat_model: String,
    pub video_model: String,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            video_model: DEFAULT_VIDEO_MODEL.to_string(),
        }
    }
}

pub struct GeminiProvider {
    config: GeminiConfig,
}

impl GeminiProvider {
    pub fn new(config: GeminiConfig) -> Self {
        Self { config }
    }

    fn base_url(&self) -> &str {
        let trimmed = self.config.base_url.trim();
        if trimmed.is_empty() {
            DEFAULT_GEMINI_BASE_URL
        } else {
            trimmed
        }
    }

    fn model_endpoint(&self, model_id: &str, method: &str) -> String {
        join_url(self.base_url(), &build_model_path(model_id, method))
    }

    fn operation_endpoint(&self, handle: &OperationHandle) -> String {
        let name = handle.as_str().trim();
        if name.starts_with("http://") || name.starts_with("https://") {
            return name.to_string();
        }
        join_url(self.base_url(), name)
    }
}

impl GenAiProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn stream_chat(
        &self,
        credential: Credential,
        history: ConversationHistory,
        message: String,
    ) -> ProviderFuture<FragmentSource> {
        let endpoint = format!(
            "{}?alt=sse",
            self.model_endpoint(&self.config.chat_model, "streamGenerateContent")
        );
        let client = shared_http_client(self.base_url());
        let payload = build_chat_payload(&history, &message);

        Box::pin(async move {
            let request = client
                .post(endpoint.as_str())
                .header("Content-Type", "application/json")
                .header("Accept", "text/event-stream");
            let response = send(apply_auth(request, &credential), &payload).await?;
            let response = ensure_success(response).await?;
            let source: FragmentSource = Box::pin(fragment_stream(Box::pin(response.bytes_stream())));
            Ok(source)
        })
    }

    fn submit_generation(
        &self,
        credential: Credential,
        request: GenerationRequest,
    ) -> ProviderFuture<GenerationOperation> {
        let endpoint = self.model_endpoint(&self.config.video_model, "predictLongRunning");
        let client = shared_http_client(self.base_url());
        let payload = build_generation_payload(&request);

        Box::pin(async move {
            let request = client
                .post(endpoint.as_str())
                .header("Content-Type", "application/json");
            let response = send(apply_auth(request, &credential), &payload).await?;
            let response = ensure_success(response).await?;
            let operation: LongRunningOperation = read_json(response).await?;
            Ok(operation.into_generation_operation())
        })
    }

    fn fetch_operation(
        &self,
        credential: Credential,
        handle: OperationHandle,
    ) -> ProviderFuture<GenerationOperation> {
        let endpoint = self.operation_endpoint(&handle);
        let client = shared_http_client(self.base_url());

        Box::pin(async move {
            let request = apply_auth(client.get(endpoint.as_str()), &credential);
            let response = request.send().await.map_err(transport_error)?;
            let response = ensure_success(response).await?;
            let mut operation: LongRunningOperation = read_json(response).await?;
            if operation.name.trim().is_empty() {
                operation.name = handle.as_str().to_string();
            }
            Ok(operation.into_generation_operation())
        })
    }
}

fn apply_auth(request: RequestBuilder, credential: &Credential) -> RequestBuilder {
    request.header("x-goog-api-key", credential.token())
}

async fn send(request: RequestBuilder, payload: &Value) -> Result<Response, AiError> {
    request.json(payload).send().await.map_err(transport_error)
}

fn transport_error(error: reqwest::Error) -> AiError {
    AiError::new(
        AiErrorCode::ProviderTransport,
        format!("Google transport failed: {error}"),
    )
}

async fn ensure_success(response: Response) -> Result<Response, AiError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "unable to read error body".to_string());
    Err(
        AiError::new(AiErrorCode::ProviderHttp, format!("Google HTTP {status}: {body}"))
            .with_details(json!({ "status": status })),
    )
}

async fn read_json<T: for<'de> Deserialize<'de>>(response: Response) -> Result<T, AiError> {
    let body = response.text().await.map_err(|error| {
        AiError::new(
            AiErrorCode::ProviderTransport,
            format!("Google response read failed: {error}"),
        )
    })?;
    serde_json::from_str(&body).map_err(|error| {
        AiError::new(
            AiErrorCode::ProviderProtocol,
            format!("Invalid Google response JSON: {error}"),
        )
        .with_details(json!({ "bodyPrefix": truncate_for_details(&body, 800) }))
    })
}

fn build_model_path(model_id: &str, method: &str) -> String {
    let trimmed = model_id.trim().trim_start_matches('/');
    let suffix = format!(":{method}");
    let without_suffix = trimmed.strip_suffix(suffix.as_str()).unwrap_or(trimmed);

    if without_suffix.starts_with("models/") || without_suffix.contains("/models/") {
        format!("{without_suffix}:{method}")
    } else {
        format!("models/{without_suffix}:{method}")
    }
}

fn build_chat_payload(history: &ConversationHistory, message: &str) -> Value {
    let mut contents: Vec<Value> = history
        .iter()
        .map(|turn| {
            json!({
                "role": turn.role().as_str(),
                "parts": [{ "text": turn.text() }],
            })
        })
        .collect();
    contents.push(json!({
        "role": "user",
        "parts": [{ "text": message }],
    }));
    json!({ "contents": contents })
}

fn build_generation_payload(request: &GenerationRequest) -> Value {
    let image_bytes = base64::engine::general_purpose::STANDARD.encode(request.image_bytes());
    json!({
        "instances": [{
            "prompt": request.prompt_text(),
            "image": {
                "imageBytes": image_bytes,
                "mimeType": request.mime_type(),
            },
        }],
        "parameters": {
            "sampleCount": request.number_of_videos(),
            "resolution": request.resolution().as_str(),
            "aspectRatio": request.aspect_ratio().as_str(),
        },
    })
}

#[derive(Debug, Clone, Deserialize)]
struct LongRunningOperation {
    #[serde(default)]
    name: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    response: Option<Value>,
    #[serde(default)]
    error: Option<LongRunningError>,
}

#[derive(Debug, Clone, Deserialize)]
struct LongRunningError {
    #[serde(default)]
    code: Option<i32>,
    #[serde(default)]
    message: Option<String>,
}

impl LongRunningOperation {
    fn into_generation_operation(self) -> GenerationOperation {
        let result_uri = self.response.as_ref().and_then(extract_video_uri);
        let failure = self.error.map(|error| OperationFailure {
            code: error.code,
            message: error
                .message
                .unwrap_or_else(|| "Video generation failed".to_string()),
        });
        GenerationOperation {
            handle: OperationHandle::new(self.name),
            // A reported error ends the job even if `done` was omitted.
            done: self.done || failure.is_some(),
            result_uri,
            failure,
        }
    }
}

fn extract_video_uri(response: &Value) -> Option<String> {
    VIDEO_URI_POINTERS
        .iter()
        .filter_map(|pointer| response.pointer(pointer).and_then(Value::as_str))
        .find(|uri| !uri.trim().is_empty())
        .map(str::to_string)
}

struct FragmentState<S> {
    body: S,
    decoder: SseDecoder,
    pending: VecDeque<Result<String, AiError>>,
    finished: bool,
}

impl<S> FragmentState<S> {
    fn queue_payload(&mut self, data: &str) {
        if self.finished || data == "[DONE]" {
            return;
        }
        match parse_chunk_text(data) {
            Ok(Some(text)) => self.pending.push_back(Ok(text)),
            Ok(None) => {}
            Err(error) => {
                self.pending.push_back(Err(error));
                self.finished = true;
            }
        }
    }
}

fn fragment_stream<S, B>(body: S) -> impl Stream<Item = Result<String, AiError>> + Send
where
    S: Stream<Item = Result<B, reqwest::Error>> + Unpin + Send,
    B: AsRef<[u8]> + Send,
{
    let state = FragmentState {
        body,
        decoder: SseDecoder::default(),
        pending: VecDeque::new(),
        finished: false,
    };

    futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                if item.is_err() {
                    state.pending.clear();
                    state.finished = true;
                }
                return Some((item, state));
            }
            if state.finished {
                return None;
            }

            match state.body.next().await {
                Some(Ok(chunk)) => {
                    for data in state.decoder.push(chunk.as_ref()) {
                        state.queue_payload(&data);
                    }
                }
                Some(Err(error)) => {
                    state.pending.push_back(Err(AiError::new(
                        AiErrorCode::ProviderTransport,
                        format!("Google stream interrupted: {error}"),
                    )));
                    state.finished = true;
                }
                None => {
                    if let Some(data) = state.decoder.finish() {
                        state.queue_payload(&data);
                    }
                    state.finished = true;
                }
            }
        }
    })
}

/// Text carried by one streamed chunk; thought parts are skipped.
fn parse_chunk_text(data: &str) -> Result<Option<String>, AiError> {
    let payload: Value = serde_json::from_str(data).map_err(|error| {
        AiError::new(
            AiErrorCode::ProviderProtocol,
            format!("Invalid Google SSE chunk JSON: {error}"),
        )
        .with_details(json!({ "chunk": truncate_for_details(data, 800) }))
    })?;

    if let Some(error) = payload.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("Google stream reported an error");
        return Err(AiError::new(AiErrorCode::ProviderHttp, message.to_string())
            .with_details(error.clone()));
    }

    let Some(parts) = payload
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
    else {
        return Ok(None);
    };

    let text: String = parts
        .iter()
        .filter(|part| !part.get("thought").and_then(Value::as_bool).unwrap_or(false))
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();

    Ok(if text.is_empty() { None } else { Some(text) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ConversationTurn, ImageInput, DEFAULT_ANIMATION_PROMPT};
    use futures_util::stream;

    #[test]
    fn model_path_accepts_bare_and_prefixed_ids() {
        assert_eq!(
            build_model_path("gemini-3-pro-preview", "streamGenerateContent"),
            "models/gemini-3-pro-preview:streamGenerateContent"
        );
        assert_eq!(
            build_model_path("/models/veo:predictLongRunning", "predictLongRunning"),
            "models/veo:predictLongRunning"
        );
    }

    #[test]
    fn chat_payload_replays_history_then_new_message() {
        let history = vec![ConversationTurn::model("hello"), ConversationTurn::user("q1")];
        let payload = build_chat_payload(&history, "q2");
        assert_eq!(
            payload,
            json!({
                "contents": [
                    { "role": "model", "parts": [{ "text": "hello" }] },
                    { "role": "user", "parts": [{ "text": "q1" }] },
                    { "role": "user", "parts": [{ "text": "q2" }] },
                ]
            })
        );
    }

    #[test]
    fn generation_payload_encodes_image_and_fixed_parameters() {
        let request = GenerationRequest::new(ImageInput::new(vec![1, 2, 3], "image/png"), "")
            .expect("valid request");
        let payload = build_generation_payload(&request);
        assert_eq!(payload["instances"][0]["prompt"], DEFAULT_ANIMATION_PROMPT);
        assert_eq!(payload["instances"][0]["image"]["imageBytes"], "AQID");
        assert_eq!(payload["instances"][0]["image"]["mimeType"], "image/png");
        assert_eq!(payload["parameters"]["sampleCount"], 1);
        assert_eq!(payload["parameters"]["resolution"], "720p");
        assert_eq!(payload["parameters"]["aspectRatio"], "16:9");
    }

    #[test]
    fn done_operation_exposes_first_video_uri() {
        let operation: LongRunningOperation = serde_json::from_value(json!({
            "name": "models/veo/operations/42",
            "done": true,
            "response": {
                "generateVideoResponse": {
                    "generatedSamples": [
                        { "video": { "uri": "https://files/v1?alt=media" } },
                        { "video": { "uri": "https://files/v2?alt=media" } }
                    ]
                }
            }
        }))
        .expect("operation json");
        let operation = operation.into_generation_operation();
        assert!(operation.done);
        assert_eq!(operation.result_uri.as_deref(), Some("https://files/v1?alt=media"));
    }

    #[test]
    fn operation_error_marks_job_finished() {
        let operation: LongRunningOperation = serde_json::from_value(json!({
            "name": "operations/7",
            "error": { "code": 3, "message": "prompt rejected" }
        }))
        .expect("operation json");
        let operation = operation.into_generation_operation();
        assert!(operation.done);
        assert_eq!(operation.result_uri, None);
        assert_eq!(
            operation.failure.map(|failure| failure.message).as_deref(),
            Some("prompt rejected")
        );
    }

    #[test]
    fn chunk_text_skips_thoughts_and_joins_parts() {
        let data = json!({
            "candidates": [{
                "content": {
                    "parts": [
                        { "text": "thinking...", "thought": true },
                        { "text": "Hel" },
                        { "text": "lo" }
                    ]
                }
            }]
        })
        .to_string();
        assert_eq!(parse_chunk_text(&data).expect("chunk parses"), Some("Hello".to_string()));

        let usage_only = json!({ "usageMetadata": { "totalTokenCount": 3 } }).to_string();
        assert_eq!(parse_chunk_text(&usage_only).expect("chunk parses"), None);
    }

    #[tokio::test]
    async fn fragment_stream_stops_at_first_error() {
        let chunks: Vec<Result<Vec<u8>, reqwest::Error>> = vec![
            Ok(b"data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"a\"}]}}]}\n\n".to_vec()),
            Ok(b"data: not-json\n\ndata: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"b\"}]}}]}\n\n".to_vec()),
        ];
        let items: Vec<Result<String, AiError>> =
            fragment_stream(stream::iter(chunks)).collect().await;

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().ok().map(String::as_str), Some("a"));
        assert_eq!(
            items[1].as_ref().err().map(|error| error.code.clone()),
            Some(AiErrorCode::ProviderProtocol)
        );
    }
}
