use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, Method, StatusCode},
    middleware,
    routing::{get, post},
    Json, Router,
};
use foodbridge_shared::chat::{Chat, Message};
use foodbridge_shared::clock::Clock;
use foodbridge_shared::constants::USER_ID_HEADER;
use foodbridge_shared::surplus::{NewSurplus, SurplusRecord};
use foodbridge_shared::types::{ChatId, Role, SurplusId, UserId};
use foodbridge_shared::ValidationError;
use foodbridge_store::{Database, StoreError, UserDirectory, UserProfile};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use crate::chat::{ChatCoordinator, ContactStatus, ConversationList, ConversationView, Directory};
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::surplus::{DailyStats, SurplusService};

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Database>>,
    pub clock: Arc<dyn Clock>,
    pub rate_limiter: RateLimiter,
    pub config: Arc<ServerConfig>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(db: Database, clock: Arc<dyn Clock>, config: ServerConfig) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            clock,
            rate_limiter: RateLimiter::from_config(&config),
            config: Arc::new(config),
            started_at: Instant::now(),
        }
    }

    /// Never hold the returned guard across an `.await`.
    ///
    /// A handler that panicked while holding the lock leaves SQLite itself
    /// consistent (open transactions roll back on drop), so the poison flag
    /// is ignored.
    fn db(&self) -> MutexGuard<'_, Database> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn surplus<'a>(&'a self, db: &'a Database) -> SurplusService<'a, Database> {
        SurplusService::new(db, self.clock.as_ref(), self.config.surplus_settings())
    }

    fn chats<'a>(&'a self, db: &'a Database) -> ChatCoordinator<'a, Database> {
        ChatCoordinator::new(db, self.clock.as_ref())
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route("/users", post(register_user))
        .route("/directory", get(directory))
        .route("/surplus", post(create_surplus))
        .route("/surplus/available", get(available_surplus))
        .route("/surplus/mine", get(my_surplus))
        .route("/surplus/needing-drivers", get(needing_drivers))
        .route("/surplus/:id", get(get_surplus).delete(delete_surplus))
        .route("/surplus/:id/claim", post(claim_surplus))
        .route("/surplus/:id/assign-driver", post(assign_driver))
        .route("/surplus/:id/verify-pickup", post(verify_pickup))
        .route("/surplus/:id/verify-delivery", post(verify_delivery))
        .route("/surplus/:id/expire", post(expire_surplus))
        .route("/stats/today", get(stats_today))
        .route("/chats", get(list_chats).post(start_chat))
        .route("/chats/:id", get(open_chat))
        .route("/chats/:id/messages", post(send_message))
        .route("/contacts/:target_id", get(contact_status))
        .route("/admin/status", get(admin_status))
        .route("/admin/expire-sweep", post(admin_expire_sweep))
        .layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─── Request / response bodies ───

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ServerInfoResponse {
    name: String,
    version: &'static str,
    available_listing_limit: u32,
    expiry_sweep_secs: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AdminStatusResponse {
    name: String,
    users: usize,
    uptime_secs: u64,
}

#[derive(Serialize)]
struct SweepResponse {
    expired: usize,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterUserRequest {
    display_name: String,
    /// Canonicalized on parse; `"volunteer"` becomes `driver`.
    role: Role,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UserResponse {
    id: UserId,
    display_name: String,
    role: Role,
}

impl From<UserProfile> for UserResponse {
    fn from(p: UserProfile) -> Self {
        Self {
            id: p.id,
            display_name: p.display_name,
            role: p.role,
        }
    }
}

#[derive(Deserialize)]
struct CodeRequest {
    code: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartChatRequest {
    target_id: UserId,
}

#[derive(Deserialize)]
struct SendMessageRequest {
    text: String,
}

// ─── Caller identity ───

/// Caller id from the `x-user-id` header, as verified upstream.
fn caller_id(headers: &HeaderMap) -> Result<UserId, ServerError> {
    let raw = headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ServerError::Unauthenticated(format!("missing {USER_ID_HEADER} header")))?;
    UserId::parse(raw).map_err(|e| ServerError::Unauthenticated(e.to_string()))
}

/// The caller's directory profile.  Unregistered callers are rejected.
fn actor(headers: &HeaderMap, db: &Database) -> Result<UserProfile, ServerError> {
    let id = caller_id(headers)?;
    db.get_user(&id).map_err(|e| match e {
        StoreError::NotFound => ServerError::Unauthenticated(format!("unknown user {id}")),
        other => other.into(),
    })
}

/// The delivery code is only disclosed to the assigned driver.
fn visible(records: Vec<SurplusRecord>, viewer: &UserId) -> Vec<SurplusRecord> {
    records.iter().map(|r| r.redacted_for(viewer)).collect()
}

// ─── Handlers ───

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        available_listing_limit: state.config.available_listing_limit,
        expiry_sweep_secs: state.config.expiry_sweep_secs,
    })
}

async fn register_user(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<RegisterUserRequest>,
) -> Result<Json<UserResponse>, ServerError> {
    let id = caller_id(&headers)?;
    let display_name = req.display_name.trim();
    if display_name.is_empty() {
        return Err(ServerError::Core(ValidationError::EmptyField("displayName").into()));
    }

    let db = state.db();
    let stored = db.upsert_user(&UserProfile {
        id,
        display_name: display_name.to_string(),
        role: req.role,
        created_at: state.clock.now(),
    })?;
    info!(user = %stored.id, role = %stored.role, "user registered");
    Ok(Json(stored.into()))
}

async fn directory(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<Directory>, ServerError> {
    let db = state.db();
    let me = actor(&headers, &db)?;
    Ok(Json(state.chats(&db).directory(&me.id)?))
}

async fn create_surplus(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(input): Json<NewSurplus>,
) -> Result<(StatusCode, Json<SurplusRecord>), ServerError> {
    let db = state.db();
    let me = actor(&headers, &db)?;
    let record = state.surplus(&db).create(&me, input)?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn available_surplus(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<Vec<SurplusRecord>>, ServerError> {
    let db = state.db();
    let me = actor(&headers, &db)?;
    let records = state.surplus(&db).available()?;
    Ok(Json(visible(records, &me.id)))
}

async fn my_surplus(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<Vec<SurplusRecord>>, ServerError> {
    let db = state.db();
    let me = actor(&headers, &db)?;
    let records = state.surplus(&db).for_party(&me.party())?;
    Ok(Json(visible(records, &me.id)))
}

async fn needing_drivers(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<Vec<SurplusRecord>>, ServerError> {
    let db = state.db();
    let me = actor(&headers, &db)?;
    let records = state.surplus(&db).needing_drivers()?;
    Ok(Json(visible(records, &me.id)))
}

async fn get_surplus(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SurplusRecord>, ServerError> {
    let db = state.db();
    let me = actor(&headers, &db)?;
    let record = state.surplus(&db).get(SurplusId(id))?;
    Ok(Json(record.redacted_for(&me.id)))
}

async fn delete_surplus(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ServerError> {
    let db = state.db();
    let me = actor(&headers, &db)?;
    state.surplus(&db).delete(&me.party(), SurplusId(id))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn claim_surplus(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SurplusRecord>, ServerError> {
    let db = state.db();
    let me = actor(&headers, &db)?;
    let record = state.surplus(&db).claim(&me, SurplusId(id))?;
    Ok(Json(record.redacted_for(&me.id)))
}

async fn assign_driver(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SurplusRecord>, ServerError> {
    let db = state.db();
    let me = actor(&headers, &db)?;
    let record = state.surplus(&db).assign_driver(&me.party(), SurplusId(id))?;
    Ok(Json(record.redacted_for(&me.id)))
}

async fn verify_pickup(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<CodeRequest>,
) -> Result<Json<SurplusRecord>, ServerError> {
    let db = state.db();
    let me = actor(&headers, &db)?;
    let record = state
        .surplus(&db)
        .verify_pickup(&me.party(), SurplusId(id), &req.code)?;
    Ok(Json(record.redacted_for(&me.id)))
}

async fn verify_delivery(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<CodeRequest>,
) -> Result<Json<SurplusRecord>, ServerError> {
    let db = state.db();
    let me = actor(&headers, &db)?;
    let record = state
        .surplus(&db)
        .verify_delivery(&me.party(), SurplusId(id), &req.code)?;
    Ok(Json(record.redacted_for(&me.id)))
}

async fn expire_surplus(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SurplusRecord>, ServerError> {
    let db = state.db();
    let me = actor(&headers, &db)?;
    let record = state.surplus(&db).expire(&me.party(), SurplusId(id))?;
    Ok(Json(record.redacted_for(&me.id)))
}

async fn stats_today(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<DailyStats>, ServerError> {
    let db = state.db();
    let me = actor(&headers, &db)?;
    Ok(Json(state.surplus(&db).stats(&me.party())?))
}

async fn list_chats(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<ConversationList>, ServerError> {
    let db = state.db();
    let me = actor(&headers, &db)?;
    Ok(Json(state.chats(&db).list_conversations(&me.party())?))
}

async fn start_chat(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<StartChatRequest>,
) -> Result<Json<Chat>, ServerError> {
    let db = state.db();
    let me = actor(&headers, &db)?;
    Ok(Json(state.chats(&db).start_conversation(&me, &req.target_id)?))
}

async fn open_chat(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ConversationView>, ServerError> {
    let db = state.db();
    let me = actor(&headers, &db)?;
    Ok(Json(state.chats(&db).open_conversation(ChatId(id), &me.party())?))
}

async fn send_message(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<Message>), ServerError> {
    let db = state.db();
    let me = actor(&headers, &db)?;
    let message = state
        .chats(&db)
        .send_message(ChatId(id), &me.party(), &req.text)?;
    Ok((StatusCode::CREATED, Json(message)))
}

async fn contact_status(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(target_id): Path<String>,
) -> Result<Json<ContactStatus>, ServerError> {
    let db = state.db();
    let me = actor(&headers, &db)?;
    let target = UserId::parse(&target_id).map_err(|e| ServerError::BadRequest(e.to_string()))?;
    Ok(Json(state.chats(&db).contact_status(&me.party(), &target)?))
}

// ─── Admin ───

fn verify_admin_token(headers: &HeaderMap, config: &ServerConfig) -> Result<(), ServerError> {
    let Some(ref expected) = config.admin_token else {
        return Err(ServerError::Forbidden(
            "Admin API is disabled (no ADMIN_TOKEN configured)".into(),
        ));
    };

    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let token = auth.strip_prefix("Bearer ").unwrap_or(auth);

    use subtle::ConstantTimeEq;
    let token_bytes = token.as_bytes();
    let expected_bytes = expected.as_bytes();
    if token_bytes.len() != expected_bytes.len()
        || token_bytes.ct_eq(expected_bytes).unwrap_u8() != 1
    {
        return Err(ServerError::Forbidden("Invalid admin token".into()));
    }

    Ok(())
}

async fn admin_status(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<AdminStatusResponse>, ServerError> {
    verify_admin_token(&headers, &state.config)?;
    let users = state.db().list_users()?.len();

    Ok(Json(AdminStatusResponse {
        name: state.config.instance_name.clone(),
        users,
        uptime_secs: state.started_at.elapsed().as_secs(),
    }))
}

async fn admin_expire_sweep(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<SweepResponse>, ServerError> {
    verify_admin_token(&headers, &state.config)?;
    let expired = sweep_once(&state)?;
    info!(expired, "Admin triggered expiry sweep");
    Ok(Json(SweepResponse { expired }))
}

/// One pass of the expiry sweep.  Synchronous so the lock never spans an
/// `.await`.
pub fn sweep_once(state: &AppState) -> Result<usize, ServerError> {
    let db = state.db();
    Ok(state.surplus(&db).sweep_expired()?)
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
