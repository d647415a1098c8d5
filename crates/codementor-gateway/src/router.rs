use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::body::Body;
use axum::extract::{ConnectInfo, DefaultBodyLimit};
use axum::http::{Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use subtle::ConstantTimeEq;
use tokio::sync::Mutex;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use super::handlers::{
    health_handler, query_handler, resync_handler, rewrite_handler, stream_query_handler,
};
use super::server::AppState;

#[derive(Clone)]
struct AuthConfig {
    token: Option<String>,
}

const MAX_RATE_LIMIT_ENTRIES: usize = 10_000;
const RATE_WINDOW: Duration = Duration::from_secs(60);

#[derive(Clone)]
struct RateLimitState {
    limit: u32,
    counters: Arc<Mutex<HashMap<IpAddr, (u32, Instant)>>>,
}

pub(crate) fn build_router(
    state: AppState,
    auth_token: Option<String>,
    rate_limit: u32,
    max_body_size: usize,
) -> Router {
    let auth_cfg = AuthConfig { token: auth_token };
    let rate_state = RateLimitState {
        limit: rate_limit,
        counters: Arc::new(Mutex::new(HashMap::new())),
    };

    let api = Router::new()
        .route("/api/v1/query", post(query_handler))
        .route("/api/v1/stream-query", post(stream_query_handler))
        .route("/api/v1/resync-index", post(resync_handler))
        .route("/api/v1/llm-rewrite", post(rewrite_handler))
        .layer(middleware::from_fn_with_state(
            rate_state,
            rate_limit_middleware,
        ))
        .layer(middleware::from_fn_with_state(auth_cfg, auth_middleware))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_body_size));

    Router::new()
        .route("/health", get(health_handler))
        .merge(api)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn auth_middleware(
    axum::extract::State(cfg): axum::extract::State<AuthConfig>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if let Some(ref expected) = cfg.token {
        let token = req
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .unwrap_or("");

        // Compare fixed-length digests so the token length does not leak
        let token_hash = blake3::hash(token.as_bytes());
        let expected_hash = blake3::hash(expected.as_bytes());
        if !bool::from(token_hash.as_bytes().ct_eq(expected_hash.as_bytes())) {
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }

    next.run(req).await
}

async fn rate_limit_middleware(
    axum::extract::State(state): axum::extract::State<RateLimitState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if state.limit == 0 {
        return next.run(req).await;
    }

    let ip = req
        .extensions()
        .get::<ConnectInfo<std::net::SocketAddr>>()
        .map_or(IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), |ci| ci.0.ip());

    let now = Instant::now();
    let mut counters = state.counters.lock().await;

    if counters.len() >= MAX_RATE_LIMIT_ENTRIES && !counters.contains_key(&ip) {
        counters.retain(|_, (_, ts)| now.duration_since(*ts) < RATE_WINDOW);
    }

    let entry = counters.entry(ip).or_insert((0, now));
    if now.duration_since(entry.1) >= RATE_WINDOW {
        *entry = (1, now);
    } else {
        entry.0 += 1;
        if entry.0 > state.limit {
            tracing::debug!(%ip, "rate limit exceeded");
            return StatusCode::TOO_MANY_REQUESTS.into_response();
        }
    }
    drop(counters);

    next.run(req).await
}

#[cfg(test)]
pub(crate) mod tests {
    use std::path::Path;

    use axum::body::Body;
    use codementor_core::indexing::IndexingService;
    use codementor_core::rewrite::CodeRewriter;
    use codementor_core::{OrchestratorSettings, ResponseOrchestrator, RoleProviders, Services};
    use codementor_index::{
        Bm25Encoder, HybridRetriever, InMemoryFolderStore, InMemoryVectorStore, IndexProvisioner,
        IndexSpec, ResyncConfig, ResyncPipeline, VectorStore,
    };
    use codementor_llm::AnyProvider;
    use codementor_llm::mock::{MockEmbedder, MockProvider, MockReranker};
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;

    const PREPROCESS: &str =
        r#"{"user_query":"how do I reverse a list in python","context":"","error":""}"#;
    const INTENT: &str = r#"{"category":"general-question","entities":[],"specificity":2}"#;
    const REFORMULATE: &str = r#"{"user_query":"how do I reverse a list in python","context":"","error":"","reformulated_query":"python reverse list"}"#;

    struct Scripted {
        compliance: MockProvider,
        analysis: MockProvider,
        generation: MockProvider,
    }

    impl Scripted {
        fn direct(answer: &str) -> Self {
            Self {
                compliance: MockProvider::with_responses(vec!["True".into()]),
                analysis: MockProvider::with_responses(vec![
                    PREPROCESS.into(),
                    INTENT.into(),
                    REFORMULATE.into(),
                    "False, a general programming question".into(),
                ]),
                generation: MockProvider::with_responses(vec![answer.into()]),
            }
        }
    }

    fn scripted_services(upload_dir: &Path, scripted: Scripted) -> Services {
        let embedder = Arc::new(MockEmbedder::new(8));
        let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
        let provisioner = Arc::new(
            IndexProvisioner::new(
                Arc::clone(&store),
                IndexSpec::new("dotproduct", 8, "aws", "us-east-1"),
            )
            .with_polling(3, Duration::from_millis(1)),
        );
        let sparse = Arc::new(Bm25Encoder::default());
        let folders = Arc::new(InMemoryFolderStore::new());

        let resync = Arc::new(ResyncPipeline::new(
            embedder.clone(),
            Arc::clone(&store),
            Arc::clone(&provisioner),
            Arc::clone(&sparse),
            folders.clone(),
            ResyncConfig::default(),
        ));
        let retriever = Arc::new(HybridRetriever::new(
            embedder,
            Arc::new(MockReranker::new()),
            store,
            provisioner,
            sparse,
        ));

        let generation = Arc::new(AnyProvider::from(scripted.generation));
        Services {
            orchestrator: Arc::new(ResponseOrchestrator::new(
                RoleProviders {
                    generation: Arc::clone(&generation),
                    analysis: Arc::new(AnyProvider::from(scripted.analysis)),
                    compliance: Arc::new(AnyProvider::from(scripted.compliance)),
                },
                retriever,
                folders,
                OrchestratorSettings::default(),
            )),
            rewriter: Arc::new(CodeRewriter::new(generation)),
            indexing: Arc::new(IndexingService::new(resync)),
            upload_dir: upload_dir.to_path_buf(),
        }
    }

    pub(crate) fn test_services(upload_dir: &Path) -> Services {
        scripted_services(upload_dir, Scripted::direct("mock answer"))
    }

    fn make_router(
        upload_dir: &Path,
        scripted: Scripted,
        auth: Option<String>,
        rate_limit: u32,
    ) -> Router {
        let state = AppState::new(scripted_services(upload_dir, scripted));
        build_router(state, auth, rate_limit, 1_048_576)
    }

    fn json_request(uri: &str, body: &Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(body).unwrap()))
            .unwrap()
    }

    fn query_body() -> Value {
        json!({
            "user_query": "how do I reverse a list in python",
            "email": "a@b.com",
            "workspace_name": "ws1"
        })
    }

    async fn body_json(resp: Response) -> Value {
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let dir = tempfile::tempdir().unwrap();
        let app = make_router(dir.path(), Scripted::direct("x"), None, 0);
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), 200);
        let json = body_json(resp).await;
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn query_returns_success_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let app = make_router(dir.path(), Scripted::direct("Use reversed(xs)."), None, 0);

        let resp = app
            .oneshot(json_request("/api/v1/query", &query_body()))
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let json = body_json(resp).await;
        assert_eq!(json["statuscode"], 200);
        assert_eq!(json["detail"], "Query processed successfully");
        assert_eq!(json["error"], "");
        assert_eq!(json["data"]["response"], "Use reversed(xs).");
        assert_eq!(json["data"]["used_rag"], false);
        assert_eq!(json["data"]["analysis"]["use_rag"], false);
        assert_eq!(json["data"]["model"], "mock-model");
    }

    #[tokio::test]
    async fn rejected_query_carries_only_the_response() {
        let dir = tempfile::tempdir().unwrap();
        let scripted = Scripted {
            compliance: MockProvider::with_responses(vec![
                "False I can only help with programming questions.".into(),
            ]),
            ..Scripted::direct("unused")
        };
        let app = make_router(dir.path(), scripted, None, 0);

        let resp = app
            .oneshot(json_request("/api/v1/query", &query_body()))
            .await
            .unwrap();
        let json = body_json(resp).await;
        assert_eq!(
            json["data"],
            json!({"response": "I can only help with programming questions."})
        );
    }

    #[tokio::test]
    async fn provider_failure_returns_failure_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let scripted = Scripted {
            generation: MockProvider::failing(),
            ..Scripted::direct("unused")
        };
        let app = make_router(dir.path(), scripted, None, 0);

        let resp = app
            .oneshot(json_request("/api/v1/query", &query_body()))
            .await
            .unwrap();
        assert_eq!(resp.status(), 500);
        let json = body_json(resp).await;
        assert_eq!(json["statuscode"], 500);
        assert_eq!(json["data"], json!({}));
        assert_eq!(json["detail"], "An internal server error occurred.");
        assert_eq!(json["kind"], "provider_unavailable");
        assert!(json["error"].as_str().unwrap().contains("mock failure"));
    }

    #[tokio::test]
    async fn malformed_email_is_unprocessable() {
        let dir = tempfile::tempdir().unwrap();
        let app = make_router(dir.path(), Scripted::direct("x"), None, 0);
        let mut body = query_body();
        body["email"] = json!("not-an-email");

        let resp = app
            .oneshot(json_request("/api/v1/query", &body))
            .await
            .unwrap();
        assert_eq!(resp.status(), 422);
        let json = body_json(resp).await;
        assert_eq!(json["kind"], "invalid_argument");
    }

    #[tokio::test]
    async fn stream_query_emits_sse_frames() {
        let dir = tempfile::tempdir().unwrap();
        let app = make_router(dir.path(), Scripted::direct("ok"), None, 0);

        let resp = app
            .oneshot(json_request("/api/v1/stream-query", &query_body()))
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert!(
            resp.headers()["content-type"]
                .to_str()
                .unwrap()
                .starts_with("text/event-stream")
        );
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains(r#"data: {"text":"o","done":false}"#));
        assert!(text.contains(r#"data: {"text":"k","done":false}"#));
        assert!(text.trim_end().ends_with(r#"data: {"done":true}"#));
    }

    #[tokio::test]
    async fn stream_failure_emits_error_then_done() {
        let dir = tempfile::tempdir().unwrap();
        let scripted = Scripted {
            generation: MockProvider::with_responses(vec!["abc".into()])
                .with_stream_error_after(1),
            ..Scripted::direct("unused")
        };
        let app = make_router(dir.path(), scripted, None, 0);

        let resp = app
            .oneshot(json_request("/api/v1/stream-query", &query_body()))
            .await
            .unwrap();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(body.to_vec()).unwrap();
        let frames: Vec<&str> = text
            .lines()
            .filter_map(|l| l.strip_prefix("data: "))
            .collect();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0], r#"{"text":"a","done":false}"#);
        assert!(frames[1].starts_with(r#"{"error":"#));
        assert_eq!(frames[2], r#"{"done":true}"#);
    }

    #[tokio::test]
    async fn rewrite_returns_merged_code() {
        let dir = tempfile::tempdir().unwrap();
        let app = make_router(dir.path(), Scripted::direct("def f():\n    return 2\n"), None, 0);

        let resp = app
            .oneshot(json_request(
                "/api/v1/llm-rewrite",
                &json!({"orignal_file": "def f():\n    return 1\n", "rewritten_code": "return 2"}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let json = body_json(resp).await;
        assert_eq!(json["data"], "def f():\n    return 2\n");
    }

    fn multipart_request(parts: &[(&str, &str)]) -> Request<Body> {
        let boundary = "codementor-test-boundary";
        let mut body = String::new();
        for (name, value) in parts {
            body.push_str(&format!("--{boundary}\r\n"));
            if *name == "file" {
                body.push_str(
                    "Content-Disposition: form-data; name=\"file\"; filename=\"chunks.json\"\r\n\
                     Content-Type: application/json\r\n\r\n",
                );
            } else {
                body.push_str(&format!(
                    "Content-Disposition: form-data; name=\"{name}\"\r\n\r\n"
                ));
            }
            body.push_str(value);
            body.push_str("\r\n");
        }
        body.push_str(&format!("--{boundary}--\r\n"));

        Request::builder()
            .method("POST")
            .uri("/api/v1/resync-index")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn resync_indexes_uploaded_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let app = make_router(dir.path(), Scripted::direct("x"), None, 0);
        let chunks = json!([
            {"id": "c1", "file_path": "src/app.py", "file_name": "app.py",
             "start_line": 1, "end_line": 10, "text": "def main(): ...", "size": 15},
            {"id": "c2", "file_path": "src/db.py", "file_name": "db.py",
             "start_line": 1, "end_line": 8, "text": "class Db: ...", "size": 13}
        ])
        .to_string();

        let resp = app
            .oneshot(multipart_request(&[
                ("file", chunks.as_str()),
                ("email", "a@b.com"),
                ("filepath", "ws1"),
                ("is_first_time", "true"),
            ]))
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let json = body_json(resp).await;
        assert_eq!(json["detail"], "Resynced successfully");
        assert_eq!(json["data"]["message"], "Resynced successfully");
        assert_eq!(json["data"]["filepath"], "ws1");
        assert_eq!(json["data"]["data"]["is_first_time"], true);
        assert_eq!(json["data"]["upsert_result"]["upserted_count"], 2);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn resync_without_file_is_unprocessable() {
        let dir = tempfile::tempdir().unwrap();
        let app = make_router(dir.path(), Scripted::direct("x"), None, 0);

        let resp = app
            .oneshot(multipart_request(&[
                ("email", "a@b.com"),
                ("filepath", "ws1"),
                ("is_first_time", "false"),
            ]))
            .await
            .unwrap();
        assert_eq!(resp.status(), 422);
        let json = body_json(resp).await;
        assert!(json["error"].as_str().unwrap().contains("file"));
    }

    #[tokio::test]
    async fn auth_rejects_missing_token() {
        let dir = tempfile::tempdir().unwrap();
        let app = make_router(dir.path(), Scripted::direct("x"), Some("secret".into()), 0);
        let resp = app
            .oneshot(json_request("/api/v1/query", &query_body()))
            .await
            .unwrap();
        assert_eq!(resp.status(), 401);
    }

    #[tokio::test]
    async fn auth_rejects_wrong_token() {
        let dir = tempfile::tempdir().unwrap();
        let app = make_router(dir.path(), Scripted::direct("x"), Some("secret".into()), 0);
        let mut req = json_request("/api/v1/query", &query_body());
        req.headers_mut()
            .insert("authorization", "Bearer wrong".parse().unwrap());
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), 401);
    }

    #[tokio::test]
    async fn auth_accepts_valid_token() {
        let dir = tempfile::tempdir().unwrap();
        let app = make_router(dir.path(), Scripted::direct("x"), Some("secret".into()), 0);
        let mut req = json_request("/api/v1/query", &query_body());
        req.headers_mut()
            .insert("authorization", "Bearer secret".parse().unwrap());
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), 200);
    }

    #[tokio::test]
    async fn health_skips_auth() {
        let dir = tempfile::tempdir().unwrap();
        let app = make_router(dir.path(), Scripted::direct("x"), Some("secret".into()), 0);
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), 200);
    }

    #[tokio::test]
    async fn rate_limit_enforced() {
        use tower::Service;

        let dir = tempfile::tempdir().unwrap();
        let mut app = make_router(dir.path(), Scripted::direct("x"), None, 2);
        let make_req = || {
            json_request(
                "/api/v1/llm-rewrite",
                &json!({"original_file": "a", "rewritten_code": "b"}),
            )
        };

        let resp = app.call(make_req()).await.unwrap();
        assert_eq!(resp.status(), 200);
        let resp = app.call(make_req()).await.unwrap();
        assert_eq!(resp.status(), 200);
        let resp = app.call(make_req()).await.unwrap();
        assert_eq!(resp.status(), 429);
    }

    #[tokio::test]
    async fn body_size_limit() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::new(test_services(dir.path()));
        let app = build_router(state, None, 0, 64);
        let oversized = vec![b'a'; 128];
        let req = Request::builder()
            .method("POST")
            .uri("/api/v1/query")
            .header("content-type", "application/json")
            .body(Body::from(oversized))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), 413);
    }
}
