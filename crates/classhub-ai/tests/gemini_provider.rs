use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use classhub_ai::{
    AiErrorCode, ChatEvent, ConversationTurn, Credential, GeminiConfig, GeminiProvider,
    GenAiProvider, GenerationRequest, ImageInput, OperationHandle,
};
use futures_util::StreamExt;
use serde_json::{json, Value};

struct ScriptedResponse {
    status: u16,
    content_type: &'static str,
    body: String,
}

impl ScriptedResponse {
    fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: body.to_string(),
        }
    }

    fn sse(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            content_type: "text/event-stream",
            body: body.into(),
        }
    }
}

struct CapturedRequest {
    head: String,
    body: String,
}

impl CapturedRequest {
    fn request_line(&self) -> &str {
        self.head.lines().next().unwrap_or_default()
    }

    fn header(&self, name: &str) -> Option<String> {
        self.head.lines().skip(1).find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case(name)
                .then(|| value.trim().to_string())
        })
    }

    fn json_body(&self) -> Value {
        serde_json::from_str(&self.body).expect("request body is json")
    }
}

fn read_request(socket: &mut TcpStream) -> CapturedRequest {
    socket
        .set_read_timeout(Some(Duration::from_secs(2)))
        .expect("set read timeout");
    let mut raw = Vec::new();
    let mut buffer = [0_u8; 8192];
    let head_end = loop {
        let read = socket.read(&mut buffer).expect("read request");
        if read == 0 {
            break raw.len();
        }
        raw.extend_from_slice(&buffer[..read]);
        if let Some(position) = raw.windows(4).position(|window| window == b"\r\n\r\n") {
            break position + 4;
        }
    };

    let head = String::from_utf8_lossy(&raw[..head_end]).to_string();
    let content_length = head
        .lines()
        .find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);

    while raw.len() < head_end + content_length {
        let read = socket.read(&mut buffer).expect("read request body");
        if read == 0 {
            break;
        }
        raw.extend_from_slice(&buffer[..read]);
    }

    CapturedRequest {
        head,
        body: String::from_utf8_lossy(&raw[head_end..]).to_string(),
    }
}

/// Serves one scripted response per connection, in order.
fn spawn_scripted_server(
    responses: Vec<ScriptedResponse>,
) -> (String, mpsc::Receiver<CapturedRequest>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind local test server");
    let address = listener.local_addr().expect("server local addr");
    let (captured, requests) = mpsc::channel();

    thread::spawn(move || {
        for response in responses {
            let Ok((mut socket, _)) = listener.accept() else {
                return;
            };
            let request = read_request(&mut socket);
            let _ = captured.send(request);

            let reply = format!(
                "HTTP/1.1 {} Scripted\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                response.status,
                response.content_type,
                response.body.len(),
                response.body
            );
            socket
                .write_all(reply.as_bytes())
                .expect("write response");
            let _ = socket.flush();
        }
    });

    (format!("http://{address}/v1beta"), requests)
}

fn provider_for(base_url: String) -> GeminiProvider {
    GeminiProvider::new(GeminiConfig {
        base_url,
        chat_model: "gemini-test".to_string(),
        video_model: "veo-test".to_string(),
    })
}

fn credential() -> Credential {
    Credential::new("fixture-key").expect("non-empty key")
}

fn png_request(prompt: &str) -> GenerationRequest {
    GenerationRequest::new(ImageInput::new(vec![0x89, 0x50, 0x4e, 0x47], "image/png"), prompt)
        .expect("valid generation request")
}

#[tokio::test]
async fn chat_streams_fragments_from_sse_events() {
    let sse = concat!(
        "data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\"设计\"}]}}]}\n\n",
        "data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\"plan\",\"thought\":true}]}}]}\n\n",
        "data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\"灵感\"}]}}],\"usageMetadata\":{\"totalTokenCount\":9}}\n\n",
    );
    let (base_url, requests) = spawn_scripted_server(vec![ScriptedResponse::sse(sse)]);
    let provider = provider_for(base_url);

    let history = vec![
        ConversationTurn::model("你好！"),
        ConversationTurn::user("help me"),
    ];
    let fragments: Vec<String> = provider
        .stream_chat(credential(), history, "需要灵感".to_string())
        .await
        .expect("chat stream opens")
        .map(|item| item.expect("fragment"))
        .collect()
        .await;
    assert_eq!(fragments, vec!["设计".to_string(), "灵感".to_string()]);

    let request = requests.recv().expect("captured chat request");
    assert_eq!(
        request.request_line(),
        "POST /v1beta/models/gemini-test:streamGenerateContent?alt=sse HTTP/1.1"
    );
    assert_eq!(request.header("x-goog-api-key").as_deref(), Some("fixture-key"));
    assert_eq!(
        request.json_body()["contents"],
        json!([
            { "role": "model", "parts": [{ "text": "你好！" }] },
            { "role": "user", "parts": [{ "text": "help me" }] },
            { "role": "user", "parts": [{ "text": "需要灵感" }] },
        ])
    );
}

#[tokio::test]
async fn chat_http_error_fails_before_streaming() {
    let (base_url, _requests) = spawn_scripted_server(vec![ScriptedResponse::json(
        429,
        json!({ "error": { "code": 429, "message": "Resource has been exhausted" } }),
    )]);
    let provider = provider_for(base_url);

    let error = match provider
        .stream_chat(credential(), Vec::new(), "hi".to_string())
        .await
    {
        Ok(_) => panic!("429 must fail the chat request"),
        Err(error) => error,
    };
    assert_eq!(error.code, AiErrorCode::ProviderHttp);
    assert!(error.message.contains("Google HTTP 429"));
    assert!(error.message.contains("Resource has been exhausted"));
}

#[tokio::test]
async fn chat_session_surfaces_provider_error_event_after_fragments() {
    let sse = concat!(
        "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"part\"}]}}]}\n\n",
        "data: {\"error\":{\"code\":500,\"message\":\"internal\"}}\n\n",
    );
    let (base_url, _requests) = spawn_scripted_server(vec![ScriptedResponse::sse(sse)]);
    let session = classhub_ai::ChatSession::new(
        std::sync::Arc::new(provider_for(base_url)),
        classhub_ai::CredentialSource::new(Some("fixture-key".to_string()))
            .with_env_keys(["CLASSHUB_GEMINI_TEST_UNSET"]),
    );

    let mut stream = session.send_message(&[], "hi").expect("send starts");
    assert_eq!(stream.next().await, Some(ChatEvent::Fragment("part".to_string())));
    match stream.next().await {
        Some(ChatEvent::Error(error)) => {
            assert_eq!(error.code, AiErrorCode::ProviderHttp);
            assert_eq!(error.message, "internal");
        }
        other => panic!("expected error event, got {other:?}"),
    }
    assert_eq!(stream.next().await, None);
}

#[tokio::test]
async fn submit_posts_predict_long_running_payload() {
    let (base_url, requests) = spawn_scripted_server(vec![ScriptedResponse::json(
        200,
        json!({ "name": "models/veo-test/operations/op-1" }),
    )]);
    let provider = provider_for(base_url);

    let operation = provider
        .submit_generation(credential(), png_request("slow zoom"))
        .await
        .expect("submission succeeds");
    assert_eq!(operation.handle.as_str(), "models/veo-test/operations/op-1");
    assert!(!operation.done);
    assert_eq!(operation.result_uri, None);

    let request = requests.recv().expect("captured submit request");
    assert_eq!(
        request.request_line(),
        "POST /v1beta/models/veo-test:predictLongRunning HTTP/1.1"
    );
    let body = request.json_body();
    assert_eq!(body["instances"][0]["prompt"], "slow zoom");
    assert_eq!(body["instances"][0]["image"]["imageBytes"], "iVBORw==");
    assert_eq!(body["instances"][0]["image"]["mimeType"], "image/png");
    assert_eq!(
        body["parameters"],
        json!({ "sampleCount": 1, "resolution": "720p", "aspectRatio": "16:9" })
    );
}

#[tokio::test]
async fn fetch_reads_operation_by_name() {
    let (base_url, requests) = spawn_scripted_server(vec![ScriptedResponse::json(
        200,
        json!({
            "name": "models/veo-test/operations/op-2",
            "done": true,
            "response": {
                "generateVideoResponse": {
                    "generatedSamples": [{ "video": { "uri": "https://files.example/v?alt=media" } }]
                }
            }
        }),
    )]);
    let provider = provider_for(base_url);

    let operation = provider
        .fetch_operation(credential(), OperationHandle::new("models/veo-test/operations/op-2"))
        .await
        .expect("fetch succeeds");
    assert!(operation.done);
    assert_eq!(
        operation.result_uri.as_deref(),
        Some("https://files.example/v?alt=media")
    );

    let request = requests.recv().expect("captured fetch request");
    assert_eq!(
        request.request_line(),
        "GET /v1beta/models/veo-test/operations/op-2 HTTP/1.1"
    );
    assert_eq!(request.header("x-goog-api-key").as_deref(), Some("fixture-key"));
}

#[tokio::test]
async fn fetch_not_found_keeps_provider_phrase() {
    let (base_url, _requests) = spawn_scripted_server(vec![ScriptedResponse::json(
        404,
        json!({ "error": { "code": 404, "message": "Requested entity was not found.", "status": "NOT_FOUND" } }),
    )]);
    let provider = provider_for(base_url);

    let error = provider
        .fetch_operation(credential(), OperationHandle::new("operations/missing"))
        .await
        .expect_err("404 must fail");
    assert_eq!(error.code, AiErrorCode::ProviderHttp);
    assert!(error.message.contains("Requested entity was not found"));
}

#[tokio::test]
async fn malformed_operation_json_is_protocol_error() {
    let (base_url, _requests) = spawn_scripted_server(vec![ScriptedResponse {
        status: 200,
        content_type: "application/json",
        body: "{not json".to_string(),
    }]);
    let provider = provider_for(base_url);

    let error = provider
        .submit_generation(credential(), png_request(""))
        .await
        .expect_err("bad json must fail");
    assert_eq!(error.code, AiErrorCode::ProviderProtocol);
}
