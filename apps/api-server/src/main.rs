//! api-server: HTTP CRUD API over a single collection of products.
//!
//! Routes:
//! - `GET    /products`       list the whole collection
//! - `GET    /products/{id}`  one product, or 404
//! - `POST   /products`       create, id = count + 1, 201
//! - `PUT    /products/{id}`  replace, path id wins
//! - `PATCH  /products/{id}`  shallow merge
//! - `DELETE /products/{id}`  remove
//!
//! `{id}` is the second path segment; trailing segments are ignored. The
//! collection routes only match `/products` exactly, without a query string.
//! Everything else is 404 `Not found`. Any parse or storage failure is a 500
//! with a generic body; the cause is only logged.
//!
//! Run:
//! ```bash
//! # pretty logs (default), serves ./products.json on port 3000
//! cargo run -p api-server
//!
//! # in-memory storage, JSON logs
//! STORAGE_PROVIDER=memory LOG_FORMAT=json cargo run -p api-server
//! ```
//!
//! Configuration: See `config.rs` for all environment variables.

mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use domain::adapters::memory_store::InMemoryStore;
use domain::service::ProductService;
use domain::{Collection, CoreError, ProductId, ProductStore};
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// Storage selected at startup (file storage is feature-gated).
enum AnyStore {
    Memory(InMemoryStore),
    #[cfg(feature = "file")]
    File(json_file_adapter::JsonFileStore),
}

impl ProductStore for AnyStore {
    fn load(&self) -> Result<Collection, CoreError> {
        match self {
            AnyStore::Memory(s) => s.load(),
            #[cfg(feature = "file")]
            AnyStore::File(s) => s.load(),
        }
    }

    fn save(&self, products: &Collection) -> Result<(), CoreError> {
        match self {
            AnyStore::Memory(s) => s.save(products),
            #[cfg(feature = "file")]
            AnyStore::File(s) => s.save(products),
        }
    }
}

#[derive(Clone)]
struct AppState {
    products: Arc<ProductService<AnyStore>>,
}

impl AppState {
    fn new(store: AnyStore) -> Self {
        Self {
            products: Arc::new(ProductService::new(store)),
        }
    }
}

#[tokio::main]
async fn main() {
    // Load and validate config first (fail fast on misconfiguration)
    let cfg = match config::Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    init_tracing(&cfg);

    let state = AppState::new(build_store(&cfg));

    // Request ID header name
    let x_request_id = axum::http::HeaderName::from_static("x-request-id");

    let app = build_router(state)
        .layer(PropagateRequestIdLayer::new(x_request_id.clone()))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("-");
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = %request_id,
                )
            }),
        )
        .layer(SetRequestIdLayer::new(x_request_id, MakeRequestUuid));

    let addr: SocketAddr = ([0, 0, 0, 0], cfg.port).into();
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(%addr, err = %e, "bind failed");
            std::process::exit(1);
        }
    };
    info!(%addr, "Server is running on http://localhost:{}", cfg.port);
    if let Err(e) = axum::serve(listener, app).await {
        error!(err = %e, "server error");
        std::process::exit(1);
    }
}

fn init_tracing(cfg: &config::Config) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);
    match cfg.log_format {
        config::LogFormat::Json => {
            registry
                .with(
                    fmt::layer()
                        .json()
                        .with_target(true)
                        .with_timer(fmt::time::SystemTime)
                        .with_writer(std::io::stdout),
                )
                .init();
        }
        config::LogFormat::Pretty => {
            registry
                .with(
                    fmt::layer()
                        .pretty()
                        .with_target(true)
                        .with_writer(std::io::stdout),
                )
                .init();
        }
    }
}

// Construct a store based on config and feature flags.
fn build_store(cfg: &config::Config) -> AnyStore {
    match cfg.storage_provider {
        #[cfg(feature = "file")]
        config::StorageProvider::File => {
            info!(path = %cfg.products_file.display(), "using file storage");
            AnyStore::File(json_file_adapter::JsonFileStore::new(&cfg.products_file))
        }
        #[cfg(not(feature = "file"))]
        config::StorageProvider::File => {
            warn!("file storage not compiled in, falling back to memory");
            AnyStore::Memory(InMemoryStore::new())
        }
        config::StorageProvider::Memory => {
            warn!("using in-memory storage, data is lost on restart");
            AnyStore::Memory(InMemoryStore::new())
        }
    }
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/products",
            get(list_products)
                .post(create_product)
                .head(not_found)
                .fallback(not_found),
        )
        .route(
            "/products/*rest",
            get(get_product)
                .put(replace_product)
                .patch(patch_product)
                .delete(delete_product)
                .head(not_found)
                .fallback(not_found),
        )
        .fallback(fallback)
        .with_state(state)
}

async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "Not found").into_response()
}

// `/products/` has an empty id segment; it still reaches the item handlers.
async fn fallback(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> Response {
    if uri.path() != "/products/" {
        return not_found().await;
    }
    match method {
        Method::GET => get_product(State(state), uri).await,
        Method::PUT => replace_product(State(state), uri, body).await,
        Method::PATCH => patch_product(State(state), uri, body).await,
        Method::DELETE => delete_product(State(state), uri).await,
        _ => not_found().await,
    }
}

/// Id from the second path segment; anything after it is ignored.
fn item_id(uri: &Uri) -> ProductId {
    ProductId::parse(uri.path().split('/').nth(2).unwrap_or(""))
}

// The collection routes match the whole request target, query included.
fn is_exact_collection(uri: &Uri) -> bool {
    uri.query().is_none()
}

// Store I/O is blocking; keep it off the async workers.
async fn run_blocking<T, F>(state: &AppState, f: F) -> Result<T, CoreError>
where
    T: Send + 'static,
    F: FnOnce(&ProductService<AnyStore>) -> Result<T, CoreError> + Send + 'static,
{
    let products = Arc::clone(&state.products);
    tokio::task::spawn_blocking(move || f(&products))
        .await
        .map_err(|e| CoreError::Storage(format!("blocking task failed: {}", e)))?
}

fn product_not_found(op: &'static str, id: &ProductId) -> Response {
    warn!(op, id = %id, "product not found");
    (
        StatusCode::NOT_FOUND,
        format!("Product with ID {} not found", id),
    )
        .into_response()
}

fn internal_error(op: &'static str, err: CoreError) -> Response {
    error!(op, err = %err, "request failed");
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
}

// Shared result mapping for the single-product operations.
fn product_response(
    op: &'static str,
    id: &ProductId,
    result: Result<domain::Product, CoreError>,
) -> Response {
    match result {
        Ok(product) => Json(product).into_response(),
        Err(CoreError::NotFound) => product_not_found(op, id),
        Err(e) => internal_error(op, e),
    }
}

async fn list_products(State(state): State<AppState>, uri: Uri) -> Response {
    if !is_exact_collection(&uri) {
        return not_found().await;
    }
    match run_blocking(&state, |svc| svc.list()).await {
        Ok(products) => Json(products).into_response(),
        Err(e) => internal_error("list", e),
    }
}

async fn get_product(State(state): State<AppState>, uri: Uri) -> Response {
    let id = item_id(&uri);
    let lookup = id.clone();
    let result = run_blocking(&state, move |svc| svc.get(&lookup)).await;
    product_response("get", &id, result)
}

async fn create_product(State(state): State<AppState>, uri: Uri, body: Bytes) -> Response {
    if !is_exact_collection(&uri) {
        return not_found().await;
    }
    let fields = match domain::parse_fields(&body) {
        Ok(f) => f,
        Err(e) => return internal_error("create", e),
    };
    match run_blocking(&state, move |svc| svc.create(fields)).await {
        Ok(product) => {
            info!(id = ?product.id(), "create ok");
            (StatusCode::CREATED, Json(product)).into_response()
        }
        Err(e) => internal_error("create", e),
    }
}

async fn replace_product(State(state): State<AppState>, uri: Uri, body: Bytes) -> Response {
    let id = item_id(&uri);
    let fields = match domain::parse_fields(&body) {
        Ok(f) => f,
        Err(e) => return internal_error("replace", e),
    };
    let target = id.clone();
    let result = run_blocking(&state, move |svc| svc.replace(&target, fields)).await;
    if result.is_ok() {
        info!(id = %id, "replace ok");
    }
    product_response("replace", &id, result)
}

async fn patch_product(State(state): State<AppState>, uri: Uri, body: Bytes) -> Response {
    let id = item_id(&uri);
    let fields = match domain::parse_fields(&body) {
        Ok(f) => f,
        Err(e) => return internal_error("patch", e),
    };
    let target = id.clone();
    let result = run_blocking(&state, move |svc| svc.patch(&target, fields)).await;
    if result.is_ok() {
        info!(id = %id, "patch ok");
    }
    product_response("patch", &id, result)
}

async fn delete_product(State(state): State<AppState>, uri: Uri) -> Response {
    let id = item_id(&uri);
    let target = id.clone();
    match run_blocking(&state, move |svc| svc.delete(&target)).await {
        Ok(_) => {
            info!(id = %id, "delete ok");
            (
                StatusCode::OK,
                format!("Product with ID {} deleted successfully", id),
            )
                .into_response()
        }
        Err(CoreError::NotFound) => product_not_found("delete", &id),
        Err(e) => internal_error("delete", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request};
    use serde_json::{json, Value};
    use tower::util::ServiceExt;

    fn app_with(products: Value) -> Router {
        let products: Collection = serde_json::from_value(products).unwrap();
        let state = AppState::new(AnyStore::Memory(InMemoryStore::with_products(products)));
        build_router(state)
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<&str>) -> (StatusCode, String) {
        let mut req = Request::builder().method(method).uri(uri);
        if body.is_some() {
            req = req.header(header::CONTENT_TYPE, "application/json");
        }
        let req = req
            .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    fn parse(body: &str) -> Value {
        serde_json::from_str(body).unwrap()
    }

    #[tokio::test]
    async fn end_to_end_scenario() {
        let app = app_with(json!([{"id": 1, "name": "A", "price": 1}]));

        let (status, body) = send(&app, "POST", "/products", Some(r#"{"name":"B","price":2}"#)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body, r#"{"name":"B","price":2,"id":2}"#);

        let (status, body) = send(&app, "PATCH", "/products/2", Some(r#"{"price":3}"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(parse(&body), json!({"id": 2, "name": "B", "price": 3}));

        let (status, body) = send(&app, "DELETE", "/products/1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "Product with ID 1 deleted successfully");

        let (status, body) = send(&app, "GET", "/products", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(parse(&body), json!([{"id": 2, "name": "B", "price": 3}]));
    }

    #[tokio::test]
    async fn list_sets_json_content_type() {
        let app = app_with(json!([]));
        let req = Request::builder().uri("/products").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }

    #[tokio::test]
    async fn get_by_id_and_missing() {
        let app = app_with(json!([{"id": 1, "name": "A", "price": 1}]));

        let (status, body) = send(&app, "GET", "/products/1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(parse(&body), json!({"id": 1, "name": "A", "price": 1}));

        let (status, body) = send(&app, "GET", "/products/9", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, "Product with ID 9 not found");
    }

    #[tokio::test]
    async fn non_numeric_id_is_not_found() {
        let app = app_with(json!([{"id": 1}]));
        let (status, body) = send(&app, "GET", "/products/abc", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, "Product with ID NaN not found");

        let (status, body) = send(&app, "DELETE", "/products/abc", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, "Product with ID NaN not found");
    }

    #[tokio::test]
    async fn trailing_segments_are_ignored() {
        let app = app_with(json!([{"id": 1, "name": "A"}]));
        let (status, body) = send(&app, "GET", "/products/1/extra", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(parse(&body), json!({"id": 1, "name": "A"}));

        let (status, body) = send(&app, "GET", "/products/1?view=full", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(parse(&body), json!({"id": 1, "name": "A"}));

        let (status, body) = send(&app, "DELETE", "/products/1/extra", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "Product with ID 1 deleted successfully");

        let (status, _) = send(&app, "GET", "/products/1", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn empty_id_segment_is_product_not_found() {
        let app = app_with(json!([{"id": 1, "name": "A"}]));
        for (method, body) in [
            ("GET", None),
            ("PUT", Some(r#"{"name":"X"}"#)),
            ("PATCH", Some(r#"{"name":"X"}"#)),
            ("DELETE", None),
        ] {
            let (status, text) = send(&app, method, "/products/", body).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{method}");
            assert_eq!(text, "Product with ID NaN not found", "{method}");
        }
        let (status, body) = send(&app, "POST", "/products/", Some(r#"{"name":"X"}"#)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, "Not found");
    }

    #[tokio::test]
    async fn collection_with_query_string_is_not_found() {
        let app = app_with(json!([{"id": 1, "name": "A"}]));
        let (status, body) = send(&app, "GET", "/products?x=1", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, "Not found");

        let (status, body) = send(&app, "POST", "/products?x=1", Some(r#"{"name":"B"}"#)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, "Not found");

        let (_, body) = send(&app, "GET", "/products", None).await;
        assert_eq!(parse(&body), json!([{"id": 1, "name": "A"}]));
    }

    #[tokio::test]
    async fn head_is_not_found() {
        let app = app_with(json!([{"id": 1}]));
        for uri in ["/products", "/products/1", "/products/"] {
            let (status, _) = send(&app, "HEAD", uri, None).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_creates_get_distinct_ids() {
        let app = app_with(json!([]));
        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let app = app.clone();
                tokio::spawn(async move {
                    let body = format!(r#"{{"name":"p{i}"}}"#);
                    send(&app, "POST", "/products", Some(body.as_str())).await
                })
            })
            .collect();
        for task in tasks {
            let (status, _) = task.await.unwrap();
            assert_eq!(status, StatusCode::CREATED);
        }
        let (_, body) = send(&app, "GET", "/products", None).await;
        let mut ids: Vec<i64> = parse(&body)
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["id"].as_i64().unwrap())
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, (1..=16).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn leading_digits_select_the_product() {
        let app = app_with(json!([{"id": 1, "name": "A"}]));
        let (status, body) = send(&app, "GET", "/products/1abc", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(parse(&body), json!({"id": 1, "name": "A"}));
    }

    #[tokio::test]
    async fn put_replaces_entirely_with_path_id() {
        let app = app_with(json!([{"id": 1, "name": "A", "price": 1, "description": "d"}]));
        let (status, body) =
            send(&app, "PUT", "/products/1", Some(r#"{"id":7,"name":"X","price":1}"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(parse(&body), json!({"id": 1, "name": "X", "price": 1}));

        let (_, body) = send(&app, "GET", "/products/1", None).await;
        assert_eq!(parse(&body), json!({"id": 1, "name": "X", "price": 1}));

        let (status, body) = send(&app, "PUT", "/products/5", Some(r#"{"name":"X"}"#)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, "Product with ID 5 not found");
    }

    #[tokio::test]
    async fn patch_preserves_other_fields() {
        let app = app_with(json!([{"id": 1, "name": "A", "price": 1, "description": "d"}]));
        let (status, body) = send(&app, "PATCH", "/products/1", Some(r#"{"price":9.99}"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            parse(&body),
            json!({"id": 1, "name": "A", "price": 9.99, "description": "d"})
        );

        let (status, _) = send(&app, "PATCH", "/products/2", Some(r#"{"price":1}"#)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_then_get_is_not_found() {
        let app = app_with(json!([{"id": 1}]));
        let (status, _) = send(&app, "DELETE", "/products/1", None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = send(&app, "GET", "/products/1", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, "Product with ID 1 not found");
        let (status, body) = send(&app, "DELETE", "/products/1", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, "Product with ID 1 not found");
    }

    #[tokio::test]
    async fn unregistered_routes_are_not_found() {
        let app = app_with(json!([]));
        for (method, uri) in [
            ("GET", "/"),
            ("GET", "/users"),
            ("GET", "/productsx"),
            ("DELETE", "/products"),
            ("PUT", "/products"),
            ("POST", "/products/1"),
        ] {
            let (status, body) = send(&app, method, uri, None).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{method} {uri}");
            assert_eq!(body, "Not found", "{method} {uri}");
        }
    }

    #[tokio::test]
    async fn malformed_body_is_internal_error_and_not_saved() {
        let app = app_with(json!([{"id": 1, "name": "A"}]));
        for (method, uri) in [("POST", "/products"), ("PUT", "/products/1"), ("PATCH", "/products/1")] {
            let (status, body) = send(&app, method, uri, Some("{not json")).await;
            assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR, "{method} {uri}");
            assert_eq!(body, "Internal Server Error");
        }
        let (status, body) = send(&app, "POST", "/products", Some("[1,2]")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, "Internal Server Error");

        let (_, body) = send(&app, "GET", "/products", None).await;
        assert_eq!(parse(&body), json!([{"id": 1, "name": "A"}]));
    }

    #[tokio::test]
    async fn storage_failure_is_internal_error() {
        let app = build_router(AppState::new(AnyStore::Memory(InMemoryStore::failing())));
        let (status, body) = send(&app, "GET", "/products", None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, "Internal Server Error");
        let (status, _) = send(&app, "GET", "/products/1", None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let (status, _) = send(&app, "DELETE", "/products/1", None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[cfg(feature = "file")]
    #[tokio::test]
    async fn file_store_rewrites_collection_on_mutation() {
        use json_file_adapter::JsonFileStore;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("products.json");
        let app = build_router(AppState::new(AnyStore::File(JsonFileStore::new(&path))));

        // Missing file surfaces as a 500.
        let (status, _) = send(&app, "GET", "/products", None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

        std::fs::write(&path, r#"[{"id":1,"name":"A","price":1}]"#).unwrap();
        let (status, _) = send(&app, "POST", "/products", Some(r#"{"name":"B","price":2}"#)).await;
        assert_eq!(status, StatusCode::CREATED);

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.starts_with("[\n  {\n    \"id\": 1,"));
        assert_eq!(
            parse(&raw),
            json!([{"id": 1, "name": "A", "price": 1}, {"name": "B", "price": 2, "id": 2}])
        );
    }
}
