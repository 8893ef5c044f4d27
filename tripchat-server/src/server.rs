use axum::{
    Json, Router,
    body::Bytes,
    extract::{Query, State},
    response::{IntoResponse, Response, Sse, sse::Event},
    routing::post,
};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{Value, json};
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::Instrument;
use tripchat::{
    ChatClient, ChatConfig, ChatError, ChatResponse, ChatService, ChunkStream, TravelProfile,
    prompts,
};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

pub struct AppState {
    pub chat: Arc<dyn ChatService>,
}

impl AppState {
    pub fn new(chat: Arc<dyn ChatService>) -> Self {
        Self { chat }
    }

    pub fn from_config(config: &ChatConfig) -> anyhow::Result<Self> {
        let client = ChatClient::from_config(config)?;
        Ok(Self::new(Arc::new(client)))
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ai/translate/", post(translate))
        .route("/ai/translate/stream", post(translate_stream))
        .route("/ai/recommend/", post(recommend))
        .route("/ai/summarize/", post(summarize))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run_server(host: &str, port: u16, config: &ChatConfig) -> anyhow::Result<()> {
    let state = Arc::new(AppState::from_config(config)?);
    let app = router(state);

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("tripchat server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Response envelope: ret 0 = success, ret 1 = failure
// ---------------------------------------------------------------------------

fn success(data: Value) -> Response {
    Json(json!({"ret": 0, "data": data})).into_response()
}

fn failure(msg: impl Into<String>) -> Response {
    Json(json!({"ret": 1, "msg": msg.into()})).into_response()
}

/// Log the classified error and turn it into the user-facing envelope.
fn chat_failure(op: &str, err: &ChatError) -> Response {
    tracing::error!(
        op,
        kind = ?err.kind(),
        status = ?err.status_code(),
        detail = ?err,
        "ai request failed"
    );
    failure(format!("{} failed: {}", op, err.user_message()))
}

fn parse_body<T: for<'de> Deserialize<'de>>(op: &str, body: &[u8]) -> Result<T, Response> {
    serde_json::from_slice(body).map_err(|e| {
        tracing::warn!(op, error = %e, "rejecting malformed request body");
        failure(format!("{} failed: malformed request body", op))
    })
}

fn request_span(op: &'static str) -> tracing::Span {
    tracing::info_span!("ai_request", op, request_id = %Uuid::new_v4())
}

async fn complete(
    state: &AppState,
    op: &'static str,
    prompt: String,
) -> Result<ChatResponse, ChatError> {
    let chat = Arc::clone(&state.chat);
    async move { chat.complete(&prompt, None).await }
        .instrument(request_span(op))
        .await
}

// ---------------------------------------------------------------------------
// POST /ai/translate/
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct TranslateRequest {
    #[serde(default)]
    text: String,
    #[serde(default)]
    target_language: Option<String>,
}

impl TranslateRequest {
    fn target(&self) -> String {
        self.target_language
            .clone()
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| prompts::DEFAULT_LANGUAGE.to_string())
    }
}

async fn translate(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    const OP: &str = "Translation";
    let req: TranslateRequest = match parse_body(OP, &body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    if req.text.trim().is_empty() {
        return failure("Please enter the text to translate");
    }

    let target = req.target();
    let prompt = prompts::translation_prompt(&req.text, &target);
    match complete(&state, OP, prompt).await {
        Ok(resp) => success(json!({
            "original_text": req.text,
            "translated_text": resp.content,
            "target_language": target,
        })),
        Err(e) => chat_failure(OP, &e),
    }
}

// ---------------------------------------------------------------------------
// POST /ai/translate/stream
// ---------------------------------------------------------------------------

async fn translate_stream(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    const OP: &str = "Translation";
    let req: TranslateRequest = match parse_body(OP, &body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    if req.text.trim().is_empty() {
        return failure("Please enter the text to translate");
    }

    let prompt = prompts::translation_prompt(&req.text, &req.target());
    let span = request_span(OP);
    let chat = Arc::clone(&state.chat);
    let started = async move { chat.complete_streaming(&prompt, None).await }
        .instrument(span.clone())
        .await;

    let chunks: ChunkStream = match started {
        Ok(s) => s,
        Err(e) => return chat_failure(OP, &e),
    };

    let events = async_stream::stream! {
        let mut chunks = chunks;
        while let Some(item) = chunks.next().await {
            match item {
                Ok(chunk) => {
                    yield Ok::<_, Infallible>(
                        Event::default().data(json!({"delta": chunk.delta_text}).to_string()),
                    );
                }
                Err(e) => {
                    tracing::error!(parent: &span, op = OP, kind = ?e.kind(), detail = ?e, "ai stream failed");
                    let msg = format!("{} failed: {}", OP, e.user_message());
                    yield Ok(Event::default().event("error").data(json!({"ret": 1, "msg": msg}).to_string()));
                    return;
                }
            }
        }
        yield Ok(Event::default().data("[DONE]"));
    };

    Sse::new(events).into_response()
}

// ---------------------------------------------------------------------------
// POST /ai/recommend/
// ---------------------------------------------------------------------------

#[derive(Deserialize, Default)]
#[serde(default)]
struct RecommendRequest {
    preferences: String,
    profile: Option<TravelProfile>,
}

async fn recommend(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    const OP: &str = "Recommendation";
    let req: RecommendRequest = if body.is_empty() {
        RecommendRequest::default()
    } else {
        match parse_body(OP, &body) {
            Ok(r) => r,
            Err(resp) => return resp,
        }
    };

    let prompt = prompts::recommendation_prompt(req.profile.as_ref(), &req.preferences);
    match complete(&state, OP, prompt).await {
        Ok(resp) => success(json!({"recommendation": resp.content})),
        Err(e) => chat_failure(OP, &e),
    }
}

// ---------------------------------------------------------------------------
// POST /ai/summarize/
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct SummarizeQuery {
    prompt: Option<String>,
}

async fn summarize(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SummarizeQuery>,
    body: Bytes,
) -> Response {
    const OP: &str = "Summary";
    let document = match prompts::decode_input(&body) {
        Ok(d) => d,
        Err(e) => return chat_failure(OP, &e),
    };
    if document.trim().is_empty() {
        return failure("Please provide the document to summarize");
    }

    let prompt = prompts::summary_prompt(&document, query.prompt.as_deref());
    match complete(&state, OP, prompt).await {
        Ok(resp) => success(json!({"summary": resp.content, "usage": resp.usage})),
        Err(e) => chat_failure(OP, &e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use http::{Request, header};
    use http_body_util::BodyExt;
    use std::sync::Mutex;
    use tower::ServiceExt;
    use tripchat::{StreamChunk, Usage};

    enum Behavior {
        Reply(&'static str),
        Fail(fn() -> ChatError),
        /// Streams the first word, then fails.
        BreakMidStream(&'static str, fn() -> ChatError),
    }

    struct StubChat {
        behavior: Behavior,
        prompts: Mutex<Vec<String>>,
    }

    impl StubChat {
        fn new(behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                behavior,
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatService for StubChat {
        async fn complete(
            &self,
            prompt: &str,
            _model: Option<&str>,
        ) -> Result<ChatResponse, ChatError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            match &self.behavior {
                Behavior::Reply(text) | Behavior::BreakMidStream(text, _) => Ok(ChatResponse::new(
                    text.to_string(),
                    Some(Usage {
                        prompt_tokens: 5,
                        completion_tokens: 2,
                        total_tokens: 7,
                    }),
                )),
                Behavior::Fail(make) => Err(make()),
            }
        }

        async fn complete_streaming(
            &self,
            prompt: &str,
            _model: Option<&str>,
        ) -> Result<ChunkStream, ChatError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            match &self.behavior {
                Behavior::Reply(text) => {
                    let chunks: Vec<Result<StreamChunk, ChatError>> = text
                        .split_inclusive(' ')
                        .map(|s| Ok(StreamChunk::new(s)))
                        .collect();
                    Ok(futures::stream::iter(chunks).boxed())
                }
                Behavior::BreakMidStream(text, make) => {
                    let first = text.split_inclusive(' ').next().unwrap_or_default();
                    let chunks = vec![Ok(StreamChunk::new(first)), Err(make())];
                    Ok(futures::stream::iter(chunks).boxed())
                }
                Behavior::Fail(make) => Err(make()),
            }
        }
    }

    fn app(stub: Arc<StubChat>) -> Router {
        router(Arc::new(AppState::new(stub)))
    }

    async fn post(app: Router, uri: &str, body: impl Into<Body>) -> (String, Option<String>) {
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(body.into())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), http::StatusCode::OK);
        let content_type = resp
            .headers()
            .get(header::CONTENT_TYPE)
            .map(|v| v.to_str().unwrap().to_string());
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        (String::from_utf8(bytes.to_vec()).unwrap(), content_type)
    }

    async fn post_json(app: Router, uri: &str, body: Value) -> Value {
        let (text, _) = post(app, uri, body.to_string()).await;
        serde_json::from_str(&text).unwrap()
    }

    fn auth_failure() -> ChatError {
        ChatError::AuthFailure {
            body: "invalid key".into(),
        }
    }

    #[tokio::test]
    async fn translate_returns_envelope() {
        let stub = StubChat::new(Behavior::Reply("Where is the museum?"));
        let out = post_json(
            app(stub.clone()),
            "/ai/translate/",
            json!({"text": "Où est le musée ?", "target_language": "en"}),
        )
        .await;

        assert_eq!(out["ret"], 0);
        assert_eq!(out["data"]["translated_text"], "Where is the museum?");
        assert_eq!(out["data"]["original_text"], "Où est le musée ?");
        assert_eq!(out["data"]["target_language"], "en");
        let prompts = stub.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("into English"));
        assert!(prompts[0].ends_with("Où est le musée ?"));
    }

    #[tokio::test]
    async fn translate_defaults_to_chinese() {
        let stub = StubChat::new(Behavior::Reply("你好"));
        let out = post_json(app(stub.clone()), "/ai/translate/", json!({"text": "hello"})).await;
        assert_eq!(out["data"]["target_language"], "zh");
        assert!(stub.prompts()[0].contains("into Chinese"));
    }

    #[tokio::test]
    async fn empty_text_is_rejected_without_upstream_call() {
        let stub = StubChat::new(Behavior::Reply("unused"));
        let out = post_json(app(stub.clone()), "/ai/translate/", json!({"text": "  "})).await;
        assert_eq!(out["ret"], 1);
        assert!(stub.prompts().is_empty());
    }

    #[tokio::test]
    async fn upstream_failure_becomes_ret_1() {
        let stub = StubChat::new(Behavior::Fail(auth_failure));
        let out = post_json(app(stub), "/ai/translate/", json!({"text": "hello"})).await;
        assert_eq!(out["ret"], 1);
        let msg = out["msg"].as_str().unwrap();
        assert!(msg.starts_with("Translation failed:"), "msg: {msg}");
        assert!(msg.contains("authentication"), "msg: {msg}");
    }

    fn leaky_server_error() -> ChatError {
        ChatError::BadStatus {
            status: 500,
            body: "db host 10.0.0.7 stacktrace".into(),
        }
    }

    fn stalled() -> ChatError {
        ChatError::Timeout {
            url: "http://upstream/chat/completions".into(),
        }
    }

    #[tokio::test]
    async fn upstream_body_is_not_shown_to_users() {
        let stub = StubChat::new(Behavior::Fail(leaky_server_error));
        let out = post_json(app(stub), "/ai/translate/", json!({"text": "hello"})).await;
        assert_eq!(out["ret"], 1);
        let msg = out["msg"].as_str().unwrap();
        assert_eq!(msg, "Translation failed: API call failed with status 500");
        assert!(!msg.contains("10.0.0.7"), "msg: {msg}");
    }

    #[tokio::test]
    async fn malformed_body_becomes_ret_1() {
        let stub = StubChat::new(Behavior::Reply("unused"));
        let (text, _) = post(app(stub.clone()), "/ai/translate/", "{not json").await;
        let out: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(out["ret"], 1);
        assert!(stub.prompts().is_empty());
    }

    #[tokio::test]
    async fn recommend_includes_profile() {
        let stub = StubChat::new(Behavior::Reply("Go to Lijiang"));
        let out = post_json(
            app(stub.clone()),
            "/ai/recommend/",
            json!({
                "preferences": "a quiet week in spring",
                "profile": {"preferred_activities": "tea farms", "preferred_climate": "mild"}
            }),
        )
        .await;

        assert_eq!(out["ret"], 0);
        assert_eq!(out["data"]["recommendation"], "Go to Lijiang");
        let prompt = &stub.prompts()[0];
        assert!(prompt.contains("- Preferred activities: tea farms"));
        assert!(prompt.contains("- Preferred climate: mild"));
        assert!(prompt.contains("Specific request: a quiet week in spring"));
    }

    #[tokio::test]
    async fn recommend_accepts_empty_body() {
        let stub = StubChat::new(Behavior::Reply("Anywhere"));
        let (text, _) = post(app(stub), "/ai/recommend/", Body::empty()).await;
        let out: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(out["ret"], 0);
    }

    #[tokio::test]
    async fn summarize_uses_custom_prompt_and_reports_usage() {
        let stub = StubChat::new(Behavior::Reply("Short summary"));
        let (text, _) = post(
            app(stub.clone()),
            "/ai/summarize/?prompt=Three%20bullets",
            "Day 1: Louvre. Day 2: Versailles.",
        )
        .await;
        let out: Value = serde_json::from_str(&text).unwrap();

        assert_eq!(out["ret"], 0);
        assert_eq!(out["data"]["summary"], "Short summary");
        assert_eq!(out["data"]["usage"]["total_tokens"], 7);
        assert_eq!(stub.prompts()[0], "Three bullets\nDay 1: Louvre. Day 2: Versailles.");
    }

    #[tokio::test]
    async fn summarize_rejects_invalid_utf8() {
        let stub = StubChat::new(Behavior::Reply("unused"));
        let (text, _) = post(app(stub.clone()), "/ai/summarize/", vec![0x66u8, 0xff, 0xfe]).await;
        let out: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(out["ret"], 1);
        assert!(out["msg"].as_str().unwrap().contains("encoding"));
        assert!(stub.prompts().is_empty());
    }

    #[tokio::test]
    async fn translate_stream_emits_deltas_then_done() {
        let stub = StubChat::new(Behavior::Reply("Hola que tal"));
        let (text, content_type) = post(
            app(stub),
            "/ai/translate/stream",
            json!({"text": "hi, how are you", "target_language": "es"}).to_string(),
        )
        .await;

        assert!(content_type.unwrap().starts_with("text/event-stream"));
        let data: Vec<&str> = text
            .lines()
            .filter_map(|l| l.strip_prefix("data: "))
            .collect();
        assert_eq!(
            data,
            vec![
                r#"{"delta":"Hola "}"#,
                r#"{"delta":"que "}"#,
                r#"{"delta":"tal"}"#,
                "[DONE]"
            ]
        );
    }

    #[tokio::test]
    async fn translate_stream_failure_is_plain_envelope() {
        let stub = StubChat::new(Behavior::Fail(auth_failure));
        let out = post_json(app(stub), "/ai/translate/stream", json!({"text": "hi"})).await;
        assert_eq!(out["ret"], 1);
    }

    #[tokio::test]
    async fn translate_stream_reports_mid_stream_failure() {
        let stub = StubChat::new(Behavior::BreakMidStream("Hola que tal", stalled));
        let (text, _) = post(
            app(stub),
            "/ai/translate/stream",
            json!({"text": "hi", "target_language": "es"}).to_string(),
        )
        .await;

        let lines: Vec<&str> = text.lines().filter(|l| !l.is_empty()).collect();
        assert_eq!(lines[0], r#"data: {"delta":"Hola "}"#);
        assert_eq!(lines[1], "event: error");
        let err: Value = serde_json::from_str(lines[2].strip_prefix("data: ").unwrap()).unwrap();
        assert_eq!(err["ret"], 1);
        assert_eq!(
            err["msg"],
            "Translation failed: request timed out, please try again later"
        );
        assert_eq!(lines.len(), 3);
        assert!(!text.contains("[DONE]"));
    }
}
