//! HTTP and WebSocket surface.
//!
//! Exposes the session over axum: sign-in and sign-out, the dashboard list,
//! book submission and a live `/ws/books` feed that holds one collection
//! subscription per connection.

use axum::{
    extract::{
        rejection::JsonRejection,
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, info, warn};

use crate::identity::{IdentityError, UserProfile};
use crate::navigation::Route;
use crate::session::SessionContext;
use crate::sync::{
    BookDraft, BookRecord, Dashboard, DraftField, Genre, SessionMode, SubmissionPipeline,
    SubmitError, Subscription,
};

// ============================================================================
// APPLICATION STATE
// ============================================================================

/// Shared application state
pub struct AppState {
    session: SessionContext,
    /// One pipeline per session, so one write in flight at a time
    pipeline: SubmissionPipeline,
    /// Open while someone is looking at the book list
    dashboard: Mutex<Option<Dashboard>>,
    started_at: Instant,
}

impl AppState {
    pub fn new(session: SessionContext) -> Self {
        Self {
            pipeline: session.pipeline(),
            session,
            dashboard: Mutex::new(None),
            started_at: Instant::now(),
        }
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    fn with_dashboard<R>(&self, f: impl FnOnce(&Dashboard) -> R) -> R {
        let mut guard = self.dashboard.lock();
        let dashboard = guard.get_or_insert_with(|| self.session.open_dashboard());
        f(dashboard)
    }

    fn close_dashboard(&self) {
        let dashboard = self.dashboard.lock().take();
        if let Some(dashboard) = dashboard {
            dashboard.close();
        }
    }

    fn require_profile(&self) -> Result<UserProfile, ApiError> {
        self.session.identity().profile().ok_or_else(|| {
            self.session.navigation().navigate(Route::Auth);
            ApiError::new(StatusCode::UNAUTHORIZED, "Please sign in first.")
                .with_redirect(Route::Auth)
        })
    }
}

// ============================================================================
// API TYPES
// ============================================================================

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    mode: &'static str,
    uptime_seconds: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponse {
    mode: &'static str,
    user_id: String,
    persistent: bool,
    signed_in: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    profile: Option<UserProfile>,
    route: &'static str,
    submitting: bool,
}

#[derive(Debug, Deserialize)]
struct SignInRequest {
    credential: String,
}

#[derive(Debug, Serialize)]
struct SignInResponse {
    profile: UserProfile,
    redirect: &'static str,
}

#[derive(Debug, Serialize)]
struct BooksResponse {
    books: Vec<BookRecord>,
    count: usize,
    loading: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Wire form of a new book.
///
/// Genres and rating are read loosely so that bad values are reported by
/// draft validation, in field order, instead of failing the body parse.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct AddBookRequest {
    book_name: String,
    author: String,
    review: String,
    genres: Vec<String>,
    rating: i64,
}

impl AddBookRequest {
    fn into_draft(self) -> BookDraft {
        // An unknown genre voids the selection; a rating outside u8 counts as unset
        let genres = self
            .genres
            .iter()
            .map(|name| name.parse::<Genre>())
            .collect::<Result<BTreeSet<_>, _>>()
            .unwrap_or_else(|e| {
                debug!("Discarding genre selection: {}", e);
                BTreeSet::new()
            });

        BookDraft {
            book_name: self.book_name,
            author: self.author,
            review: self.review,
            genres,
            rating: u8::try_from(self.rating).unwrap_or(0),
        }
    }
}

#[derive(Debug, Serialize)]
struct AddBookResponse {
    book: BookRecord,
    redirect: &'static str,
}

/// Messages pushed over `/ws/books`
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BookEvent {
    Snapshot { books: Vec<BookRecord> },
    Error { message: String },
}

/// Error response with a user-facing message
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    field: Option<DraftField>,
    redirect: Option<Route>,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            field: None,
            redirect: None,
        }
    }

    fn with_redirect(mut self, route: Route) -> Self {
        self.redirect = Some(route);
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = json!({ "error": self.message });
        if let Some(field) = self.field {
            body["field"] = json!(field);
        }
        if let Some(route) = self.redirect {
            body["redirect"] = json!(route.path());
        }
        (self.status, Json(body)).into_response()
    }
}

impl From<SubmitError> for ApiError {
    fn from(err: SubmitError) -> Self {
        let status = match &err {
            SubmitError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            SubmitError::SubmissionInProgress => StatusCode::CONFLICT,
            SubmitError::BackendNotReady => StatusCode::SERVICE_UNAVAILABLE,
            SubmitError::Submission { .. } => StatusCode::BAD_GATEWAY,
        };
        let mut api = ApiError::new(status, err.user_message());
        if let SubmitError::Validation(e) = &err {
            api.field = Some(e.field);
        }
        api
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        warn!("Rejected request body: {}", rejection.body_text());
        ApiError::new(rejection.status(), "Invalid request body.")
    }
}

impl From<IdentityError> for ApiError {
    fn from(err: IdentityError) -> Self {
        let status = match &err {
            IdentityError::InvalidCredential(_) => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError::new(status, err.user_message())
    }
}

// ============================================================================
// HTTP HANDLERS
// ============================================================================

/// Health check endpoint
async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        mode: state.session.mode().name(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    })
}

async fn list_genres() -> impl IntoResponse {
    Json(Genre::ALL.iter().map(Genre::as_str).collect::<Vec<_>>())
}

async fn session_info(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mode = state.session.mode();
    let profile = state.session.identity().profile();

    Json(SessionResponse {
        mode: mode.name(),
        user_id: mode.user_id().to_string(),
        persistent: mode.is_persistent(),
        signed_in: profile.is_some(),
        profile,
        route: state.session.navigation().current().path(),
        submitting: state.pipeline.is_submitting(),
    })
}

async fn google_sign_in(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SignInRequest>, JsonRejection>,
) -> Result<Json<SignInResponse>, ApiError> {
    let Json(payload) = payload?;
    let profile = state.session.sign_in(&payload.credential).await.map_err(|e| {
        warn!("Sign-in failed: {}", e);
        ApiError::from(e)
    })?;

    // The backend identity may have changed; rebind on next view
    state.close_dashboard();

    Ok(Json(SignInResponse {
        profile,
        redirect: Route::Dashboard.path(),
    }))
}

async fn logout(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    state.close_dashboard();
    state.session.sign_out().await?;
    Ok(Json(json!({ "redirect": Route::Auth.path() })))
}

async fn list_books(State(state): State<Arc<AppState>>) -> Result<Json<BooksResponse>, ApiError> {
    state.require_profile()?;

    let response = state.with_dashboard(|dashboard| BooksResponse {
        books: dashboard.books(),
        count: dashboard.count(),
        loading: dashboard.is_loading(),
        error: dashboard.last_error().map(|e| e.cause),
    });
    Ok(Json(response))
}

async fn add_book(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<AddBookRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<AddBookResponse>), ApiError> {
    state.require_profile()?;
    let Json(request) = payload?;
    let mut draft = request.into_draft();

    let view_model = state.with_dashboard(Dashboard::view_model);
    let mode = state.session.mode();
    let book = state.pipeline.submit(&mode, &mut draft, &view_model).await?;

    Ok((
        StatusCode::CREATED,
        Json(AddBookResponse {
            book,
            redirect: Route::Dashboard.path(),
        }),
    ))
}

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "404 - Page Not Found", "route": Route::NotFound.path() })),
    )
}

// ============================================================================
// WEBSOCKET HANDLER
// ============================================================================

/// WebSocket upgrade handler
async fn ws_books(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_books_socket(socket, state))
}

/// Source of a socket's book events
enum BookFeed {
    /// Live collection subscription
    Collection(Subscription),
    /// Task relaying changes to the dashboard's local list
    Local(JoinHandle<()>),
}

impl BookFeed {
    fn release(self) {
        match self {
            BookFeed::Collection(subscription) => subscription.unsubscribe(),
            BookFeed::Local(task) => task.abort(),
        }
    }
}

/// Push the session user's book list for as long as the socket is open
async fn handle_books_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let connection_id = uuid::Uuid::new_v4();

    if !state.session.identity().is_signed_in() {
        let event = BookEvent::Error {
            message: "Please sign in first.".to_string(),
        };
        let _ = send_event(&mut ws_sender, &event).await;
        return;
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<BookEvent>();
    let mode = state.session.mode();
    info!("Book feed {} opened in {} mode", connection_id, mode.name());

    let feed = match &mode {
        SessionMode::Backend { .. } => {
            let error_tx = tx.clone();
            BookFeed::Collection(state.session.binding().subscribe(
                &mode,
                move |books| {
                    let _ = tx.send(BookEvent::Snapshot { books });
                },
                move |error| {
                    let _ = error_tx.send(BookEvent::Error {
                        message: error.cause,
                    });
                },
            ))
        }
        // Without a live collection, follow the dashboard's own list
        _ => {
            let view_model = state.with_dashboard(Dashboard::view_model);
            let mut changes = view_model.read().changes();
            let books = view_model.read().books().to_vec();
            let _ = tx.send(BookEvent::Snapshot { books });

            // Closing the dashboard drops the list and ends the relay
            let view_model = Arc::downgrade(&view_model);
            BookFeed::Local(tokio::spawn(async move {
                while changes.changed().await.is_ok() {
                    let Some(view_model) = view_model.upgrade() else {
                        break;
                    };
                    let books = view_model.read().books().to_vec();
                    if tx.send(BookEvent::Snapshot { books }).is_err() {
                        break;
                    }
                }
            }))
        }
    };

    // Task to forward events to the socket
    let send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if send_event(&mut ws_sender, &event).await.is_err() {
                break;
            }
        }
    });

    // Task to watch for the client going away
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            if let Message::Close(_) = msg {
                break;
            }
        }
    });

    tokio::select! {
        _ = send_task => {}
        _ = recv_task => {}
    }

    feed.release();
    info!("Book feed {} closed", connection_id);
}

async fn send_event(
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    event: &BookEvent,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(event).map_err(axum::Error::new)?;
    debug!("Sending {} bytes", text.len());
    sender.send(Message::Text(text)).await
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/genres", get(list_genres))
        .route("/api/session", get(session_info))
        .route("/api/auth/google", post(google_sign_in))
        .route("/api/auth/logout", post(logout))
        .route("/api/books", get(list_books).post(add_book))
        .route("/ws/books", get(ws_books))
        .fallback(not_found)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, DocumentBackend, MemoryBackend};
    use crate::config::AppConfig;
    use crate::storage::LocalStore;
    use axum::body::Body;
    use axum::http::{header, Request};
    use jsonwebtoken::{encode, EncodingKey, Header};
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::net::TcpStream;
    use tokio_tungstenite::{connect_async, tungstenite, MaybeTlsStream, WebSocketStream};
    use tower::ServiceExt;

    type ClientSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

    async fn offline_app() -> (Router, Arc<AppState>) {
        let session =
            SessionContext::assemble(AppConfig::default(), LocalStore::temporary().unwrap(), None)
                .await;
        let state = Arc::new(AppState::new(session));
        (router(state.clone()), state)
    }

    fn credential() -> String {
        encode(
            &Header::default(),
            &json!({ "sub": "sub-1", "name": "Reader", "picture": "https://example.com/r.png" }),
            &EncodingKey::from_secret(b"k"),
        )
        .unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn serve(state: Arc<AppState>) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });
        addr
    }

    async fn open_feed(addr: SocketAddr) -> ClientSocket {
        let (socket, _) = connect_async(format!("ws://{}/ws/books", addr)).await.unwrap();
        socket
    }

    async fn next_event(socket: &mut ClientSocket) -> serde_json::Value {
        loop {
            let message = tokio::time::timeout(Duration::from_secs(5), socket.next())
                .await
                .expect("no event within 5s")
                .unwrap()
                .unwrap();
            if let tungstenite::Message::Text(text) = message {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    fn draft_json() -> serde_json::Value {
        json!({
            "bookName": "Dune",
            "author": "Frank Herbert",
            "review": "Spice.",
            "genres": ["Science Fiction"],
            "rating": 5
        })
    }

    #[tokio::test]
    async fn test_health_check() {
        let (app, _) = offline_app().await;
        let response = app.oneshot(get_req("/health")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["mode"], "offline");
    }

    #[tokio::test]
    async fn test_genres() {
        let (app, _) = offline_app().await;
        let body = body_json(app.oneshot(get_req("/api/genres")).await.unwrap()).await;

        let genres = body.as_array().unwrap();
        assert_eq!(genres.len(), 20);
        assert!(genres.contains(&json!("Comics & Graphic Novels")));
    }

    #[tokio::test]
    async fn test_books_require_profile() {
        let (app, state) = offline_app().await;
        let response = app.oneshot(get_req("/api/books")).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["redirect"], "/");
        assert_eq!(state.session().navigation().current(), Route::Auth);
    }

    #[tokio::test]
    async fn test_invalid_credential() {
        let (app, _) = offline_app().await;
        let response = app
            .oneshot(post_json("/api/auth/google", json!({ "credential": "nope" })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            body_json(response).await["error"],
            "An error occurred during login. Please try again."
        );
    }

    #[tokio::test]
    async fn test_offline_flow() {
        let (app, state) = offline_app().await;

        let response = app
            .clone()
            .oneshot(post_json("/api/auth/google", json!({ "credential": credential() })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["redirect"], "/dashboard");

        let response = app
            .clone()
            .oneshot(post_json("/api/books", draft_json()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        assert_eq!(body["book"]["userId"], state.session().mode().user_id());
        assert_eq!(body["redirect"], "/dashboard");

        let body = body_json(app.clone().oneshot(get_req("/api/books")).await.unwrap()).await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["books"][0]["bookName"], "Dune");

        let response = app
            .clone()
            .oneshot(post_json("/api/auth/logout", json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!state.session().identity().is_signed_in());
        assert_eq!(state.session().navigation().current(), Route::Auth);
    }

    #[tokio::test]
    async fn test_validation_error_names_field() {
        let (app, state) = offline_app().await;
        state.session().sign_in(&credential()).await.unwrap();

        let mut draft = draft_json();
        draft["genres"] = json!([]);
        let response = app.oneshot(post_json("/api/books", draft)).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = body_json(response).await;
        assert_eq!(body["field"], "genres");
        assert_eq!(body["error"], "Please select at least one genre.");
    }

    #[tokio::test]
    async fn test_degraded_rejects_writes() {
        let backend: Option<Result<Arc<dyn DocumentBackend>, BackendError>> =
            Some(Err(BackendError::Init("no network".to_string())));
        let session =
            SessionContext::assemble(AppConfig::default(), LocalStore::temporary().unwrap(), backend)
                .await;
        let state = Arc::new(AppState::new(session));
        state.session().sign_in(&credential()).await.unwrap();

        let response = router(state)
            .oneshot(post_json("/api/books", draft_json()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            body_json(response).await["error"],
            "Database not ready. Please try again."
        );
    }

    #[tokio::test]
    async fn test_session_info() {
        let (app, _) = offline_app().await;
        let body = body_json(app.oneshot(get_req("/api/session")).await.unwrap()).await;

        assert_eq!(body["mode"], "offline");
        assert_eq!(body["persistent"], true);
        assert_eq!(body["signedIn"], false);
        assert!(body.get("profile").is_none());
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let (app, _) = offline_app().await;
        let response = app.oneshot(get_req("/nowhere")).await.unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"], "404 - Page Not Found");
    }

    #[tokio::test]
    async fn test_empty_name_reported_before_unknown_genre() {
        let (app, state) = offline_app().await;
        state.session().sign_in(&credential()).await.unwrap();

        let mut draft = draft_json();
        draft["bookName"] = json!("");
        draft["genres"] = json!(["Cyberpunk"]);
        let response = app.clone().oneshot(post_json("/api/books", draft)).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = body_json(response).await;
        assert_eq!(body["field"], "bookName");
        assert_eq!(body["error"], "Book Name is required.");

        let mut draft = draft_json();
        draft["genres"] = json!(["Science Fiction", "Cyberpunk"]);
        let body = body_json(app.oneshot(post_json("/api/books", draft)).await.unwrap()).await;
        assert_eq!(body["field"], "genres");
    }

    #[tokio::test]
    async fn test_out_of_range_rating_names_field() {
        let (app, state) = offline_app().await;
        state.session().sign_in(&credential()).await.unwrap();

        for rating in [json!(300), json!(-1), json!(6)] {
            let mut draft = draft_json();
            draft["rating"] = rating;
            let response = app.clone().oneshot(post_json("/api/books", draft)).await.unwrap();

            assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
            assert_eq!(body_json(response).await["field"], "rating");
        }
        assert_eq!(state.with_dashboard(Dashboard::count), 0);
    }

    #[tokio::test]
    async fn test_malformed_body_gets_json_error() {
        let (app, state) = offline_app().await;
        state.session().sign_in(&credential()).await.unwrap();

        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/books")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert!(response.status().is_client_error());
        assert_eq!(body_json(response).await["error"], "Invalid request body.");

        let mut draft = draft_json();
        draft["genres"] = json!("Science Fiction");
        let response = app.oneshot(post_json("/api/books", draft)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body_json(response).await["error"], "Invalid request body.");
    }

    #[tokio::test]
    async fn test_book_feed_requires_sign_in() {
        let (_, state) = offline_app().await;
        let addr = serve(state).await;

        let mut socket = open_feed(addr).await;
        let event = next_event(&mut socket).await;
        assert_eq!(event["type"], "error");
        assert_eq!(event["message"], "Please sign in first.");
    }

    #[tokio::test]
    async fn test_book_feed_follows_collection() {
        let memory = MemoryBackend::new("p").with_user("u1");
        let backend: Arc<dyn DocumentBackend> = Arc::new(memory.clone());
        let session = SessionContext::assemble(
            AppConfig::default(),
            LocalStore::temporary().unwrap(),
            Some(Ok(backend)),
        )
        .await;
        session.sign_in(&credential()).await.unwrap();
        let path = session.binding().path_for("u1");
        let addr = serve(Arc::new(AppState::new(session))).await;

        let mut socket = open_feed(addr).await;
        let first = next_event(&mut socket).await;
        assert_eq!(first["type"], "snapshot");
        assert_eq!(first["books"], json!([]));
        assert_eq!(memory.listener_count(), 1);

        let record = BookRecord {
            id: String::new(),
            book_name: "Dune".to_string(),
            author: "Frank Herbert".to_string(),
            review: "Spice.".to_string(),
            genres: BTreeSet::from([Genre::ScienceFiction]),
            rating: 5,
            date_added: "10/16/2026".to_string(),
            owner_id: "u1".to_string(),
        };
        memory
            .add_document(&path, record.to_document().unwrap())
            .await
            .unwrap();

        let update = next_event(&mut socket).await;
        assert_eq!(update["type"], "snapshot");
        assert_eq!(update["books"][0]["bookName"], "Dune");

        socket.close(None).await.unwrap();
        for _ in 0..100 {
            if memory.listener_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(memory.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_offline_feed_pushes_new_books() {
        let (app, state) = offline_app().await;
        state.session().sign_in(&credential()).await.unwrap();
        let addr = serve(state).await;

        let mut socket = open_feed(addr).await;
        let first = next_event(&mut socket).await;
        assert_eq!(first["books"], json!([]));

        let response = app.oneshot(post_json("/api/books", draft_json())).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let update = next_event(&mut socket).await;
        assert_eq!(update["type"], "snapshot");
        assert_eq!(update["books"][0]["bookName"], "Dune");
    }
}
