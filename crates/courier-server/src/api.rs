use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{Method, StatusCode},
    routing::{delete, get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use courier_shared::constants::{DEFAULT_HISTORY_LIMIT, MAX_HISTORY_LIMIT};
use courier_shared::{
    Message, Notification, NotificationId, NotificationKind, SendMessageRequest, UnreadCounts,
    User, UserId,
};

use crate::auth::AuthUser;
use crate::config::ServerConfig;
use crate::delivery::{Delivery, ReadOutcome};
use crate::error::ServerError;
use crate::ws;

#[derive(Clone)]
pub struct AppState {
    pub delivery: Delivery,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route("/ws", get(ws::ws_handler))
        .route("/users", get(list_contacts))
        .route("/users/me", put(update_profile))
        .route("/users/me/activity", post(record_activity))
        .route("/presence", get(presence))
        .route("/messages/:user_id", post(send_message).get(conversation))
        .route("/messages/:user_id/read", post(mark_read))
        .route("/unread-counts", get(unread_counts))
        .route("/notifications", get(list_notifications))
        .route("/notifications/unread-count", get(notification_unread_count))
        .route("/notifications/read-all", post(mark_all_notifications_read))
        .route("/notifications/:id/read", post(mark_notification_read))
        .route("/notifications/:id", delete(delete_notification))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

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
    online_users: usize,
}

/// A user as seen by another user: the stored row plus the live flag.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ContactResponse {
    #[serde(flatten)]
    user: User,
    online: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileUpdate {
    display_name: String,
    avatar: Option<String>,
}

#[derive(Deserialize)]
struct ActivityRequest {
    kind: NotificationKind,
    #[serde(default)]
    detail: String,
}

#[derive(Deserialize)]
struct HistoryQuery {
    limit: Option<u32>,
    before: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct NotificationQuery {
    #[serde(default)]
    unread_only: bool,
    limit: Option<u32>,
}

#[derive(Serialize)]
struct CountResponse {
    count: u32,
}

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
        online_users: state.delivery.registry().online_count().await,
    })
}

fn parse_user_id(raw: &str) -> Result<UserId, ServerError> {
    UserId::parse(raw).map_err(|e| ServerError::BadRequest(e.to_string()))
}

// ─── Users & presence ───

async fn update_profile(
    AuthUser(me): AuthUser,
    State(state): State<AppState>,
    payload: Result<Json<ProfileUpdate>, JsonRejection>,
) -> Result<Json<User>, ServerError> {
    let Json(update) = payload?;
    let name = update.display_name.trim().to_string();
    if name.is_empty() {
        return Err(ServerError::BadRequest("displayName must not be empty".into()));
    }
    let id = me.clone();
    let user = state
        .delivery
        .db()
        .call(move |db| db.upsert_user(&id, &name, update.avatar.as_deref()))
        .await?;

    info!(user = %me, "Profile updated");
    Ok(Json(user))
}

async fn list_contacts(
    AuthUser(me): AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<ContactResponse>>, ServerError> {
    let users = state.delivery.db().call(|db| db.list_users()).await?;
    let online = state.delivery.registry().list_online().await;

    let contacts = users
        .into_iter()
        .filter(|u| u.id != me)
        .map(|user| ContactResponse {
            online: online.contains(&user.id),
            user,
        })
        .collect();
    Ok(Json(contacts))
}

async fn presence(_caller: AuthUser, State(state): State<AppState>) -> Json<Vec<UserId>> {
    Json(
        state
            .delivery
            .registry()
            .list_online()
            .await
            .into_iter()
            .collect(),
    )
}

/// Account-activity hook for the identity provider (sign-in, sign-out,
/// system notices). Message notifications are only created by delivery.
async fn record_activity(
    AuthUser(me): AuthUser,
    State(state): State<AppState>,
    payload: Result<Json<ActivityRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Notification>), ServerError> {
    let Json(req) = payload?;
    if req.kind == NotificationKind::Message {
        return Err(ServerError::BadRequest(
            "message notifications cannot be recorded directly".into(),
        ));
    }
    let id = me.clone();
    let notification = state
        .delivery
        .db()
        .call(move |db| db.record_account_activity(&id, req.kind, &req.detail))
        .await?;

    info!(user = %me, kind = %notification.kind, "Account activity recorded");
    Ok((StatusCode::CREATED, Json(notification)))
}

// ─── Messages ───

async fn send_message(
    AuthUser(me): AuthUser,
    State(state): State<AppState>,
    Path(receiver): Path<String>,
    payload: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Message>), ServerError> {
    let Json(req) = payload?;
    let receiver = parse_user_id(&receiver)?;
    let outcome = state.delivery.send_message(&me, &receiver, req).await?;
    Ok((StatusCode::CREATED, Json(outcome.message)))
}

async fn conversation(
    AuthUser(me): AuthUser,
    State(state): State<AppState>,
    Path(counterpart): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<Message>>, ServerError> {
    let counterpart = parse_user_id(&counterpart)?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    let messages = state
        .delivery
        .conversation(&me, &counterpart, limit, query.before)
        .await?;
    Ok(Json(messages))
}

async fn mark_read(
    AuthUser(me): AuthUser,
    State(state): State<AppState>,
    Path(counterpart): Path<String>,
) -> Result<Json<ReadOutcome>, ServerError> {
    let counterpart = parse_user_id(&counterpart)?;
    let outcome = state.delivery.mark_as_read(&me, &counterpart).await?;
    Ok(Json(outcome))
}

async fn unread_counts(AuthUser(me): AuthUser, State(state): State<AppState>) -> Json<UnreadCounts> {
    Json(state.delivery.unread_counts(&me).await)
}

// ─── Notifications ───

async fn list_notifications(
    AuthUser(me): AuthUser,
    State(state): State<AppState>,
    Query(query): Query<NotificationQuery>,
) -> Result<Json<Vec<Notification>>, ServerError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    let notifications = state
        .delivery
        .db()
        .call(move |db| db.list_notifications(&me, query.unread_only, limit))
        .await?;
    Ok(Json(notifications))
}

async fn notification_unread_count(
    AuthUser(me): AuthUser,
    State(state): State<AppState>,
) -> Result<Json<CountResponse>, ServerError> {
    let count = state
        .delivery
        .db()
        .call(move |db| db.unread_notification_count(&me))
        .await?;
    Ok(Json(CountResponse { count }))
}

async fn mark_notification_read(
    AuthUser(me): AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let id = NotificationId(id);
    let found = state
        .delivery
        .db()
        .call(move |db| db.mark_notification_read(&me, id))
        .await?;
    if !found {
        return Err(ServerError::NotificationNotFound(id));
    }
    Ok(Json(serde_json::json!({ "read": true })))
}

async fn mark_all_notifications_read(
    AuthUser(me): AuthUser,
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let updated = state
        .delivery
        .db()
        .call(move |db| db.mark_all_notifications_read(&me))
        .await?;
    Ok(Json(serde_json::json!({ "updated": updated })))
}

async fn delete_notification(
    AuthUser(me): AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let id = NotificationId(id);
    let found = state
        .delivery
        .db()
        .call(move |db| db.delete_notification(&me, id))
        .await?;
    if !found {
        return Err(ServerError::NotificationNotFound(id));
    }
    Ok(Json(serde_json::json!({ "deleted": true })))
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
