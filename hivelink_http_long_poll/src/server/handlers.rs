//! HTTP request handlers for the long-poll server.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use hivelink_core::{
    directory::DeviceDirectory,
    store::{EventSink, EventStore},
    CommandId, DeviceId, DeviceScope, Event, EventCategory, Principal, Timestamp,
};
use tracing::debug;

use super::state::ServerState;
use crate::{error::ApiError, VISIBLE_DEVICES_HEADER};

/// Query parameters shared by the poll endpoints.
#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct PollQuery {
    /// Seconds to wait for new events; clamped server-side.
    wait_timeout: Option<u64>,

    /// Cursor in epoch milliseconds; events strictly newer are returned.
    /// Defaults to the server's current time.
    timestamp: Option<u64>,

    /// Comma-separated name allow-list.
    names: Option<String>,
}

/// Query parameters for the all-devices command poll.
#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct MultiPollQuery {
    wait_timeout: Option<u64>,
    timestamp: Option<u64>,
    names: Option<String>,

    /// Comma-separated device ids; absent polls every visible device.
    device_guids: Option<String>,
}

/// Request body for command creation.
#[derive(Debug, serde::Deserialize)]
struct CommandInput {
    name: String,
    #[serde(default)]
    parameters: serde_json::Value,
}

/// Request body for notification creation.
#[derive(Debug, serde::Deserialize)]
struct NotificationInput {
    name: String,
    #[serde(default)]
    parameters: serde_json::Value,
}

/// Create the Axum router for the long-poll surface.
pub fn router<S, D>(state: Arc<ServerState<S, D>>) -> Router
where
    S: EventStore + EventSink,
    D: DeviceDirectory,
{
    Router::new()
        .route("/device/command/poll", get(poll_all_commands::<S, D>))
        .route(
            "/device/{device_id}/command/poll",
            get(poll_device_commands::<S, D>),
        )
        .route(
            "/device/{device_id}/command/{command_id}/poll",
            get(poll_command_update::<S, D>),
        )
        .route(
            "/device/{device_id}/notification/poll",
            get(poll_device_notifications::<S, D>),
        )
        .route("/device/{device_id}/command", post(create_command::<S, D>))
        .route(
            "/device/{device_id}/command/{command_id}",
            put(update_command::<S, D>),
        )
        .route(
            "/device/{device_id}/notification",
            post(create_notification::<S, D>),
        )
        .with_state(state)
}

fn principal_from_headers(headers: &HeaderMap) -> Result<Principal, ApiError> {
    let Some(value) = headers.get(VISIBLE_DEVICES_HEADER) else {
        return Ok(Principal::unrestricted());
    };
    let value = value
        .to_str()
        .map_err(|_| ApiError::BadRequest(format!("invalid {VISIBLE_DEVICES_HEADER} header")))?;
    Ok(Principal::new(DeviceScope::devices(
        value.split(',').map(str::trim).filter(|s| !s.is_empty()),
    )))
}

fn parse_names(names: Option<&str>) -> BTreeSet<String> {
    names
        .into_iter()
        .flat_map(|s| s.split(','))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn parse_scope(device_guids: Option<&str>) -> DeviceScope {
    match device_guids {
        None => DeviceScope::AllDevices,
        Some(guids) => DeviceScope::devices(
            guids
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(DeviceId::new),
        ),
    }
}

/// `GET /device/{device_id}/command/poll`
async fn poll_device_commands<S, D>(
    State(state): State<Arc<ServerState<S, D>>>,
    Path(device_id): Path<String>,
    Query(query): Query<PollQuery>,
    headers: HeaderMap,
) -> Result<Json<Vec<Event>>, ApiError>
where
    S: EventStore + EventSink,
    D: DeviceDirectory,
{
    let principal = principal_from_headers(&headers)?;
    let events = state
        .waiter()
        .wait_for_events(
            EventCategory::Command,
            DeviceScope::single(device_id),
            parse_names(query.names.as_deref()),
            query.timestamp.map(Timestamp::from_millis),
            state.clamp_wait(query.wait_timeout),
            &principal,
        )
        .await?;
    Ok(Json(events))
}

/// `GET /device/command/poll?deviceGuids=...`
async fn poll_all_commands<S, D>(
    State(state): State<Arc<ServerState<S, D>>>,
    Query(query): Query<MultiPollQuery>,
    headers: HeaderMap,
) -> Result<Json<Vec<Event>>, ApiError>
where
    S: EventStore + EventSink,
    D: DeviceDirectory,
{
    let principal = principal_from_headers(&headers)?;
    let scope = parse_scope(query.device_guids.as_deref());
    debug!(?scope, "multi-device command poll");
    let events = state
        .waiter()
        .wait_for_events(
            EventCategory::Command,
            scope,
            parse_names(query.names.as_deref()),
            query.timestamp.map(Timestamp::from_millis),
            state.clamp_wait(query.wait_timeout),
            &principal,
        )
        .await?;
    Ok(Json(events))
}

/// `GET /device/{device_id}/command/{command_id}/poll`
async fn poll_command_update<S, D>(
    State(state): State<Arc<ServerState<S, D>>>,
    Path((device_id, command_id)): Path<(String, i64)>,
    Query(query): Query<PollQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError>
where
    S: EventStore + EventSink,
    D: DeviceDirectory,
{
    let principal = principal_from_headers(&headers)?;
    let update = state
        .waiter()
        .wait_for_command_update(
            &DeviceId::new(device_id),
            CommandId::new(command_id),
            state.clamp_wait(query.wait_timeout),
            &principal,
        )
        .await?;
    Ok(match update {
        Some(event) => Json(event).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}

/// `GET /device/{device_id}/notification/poll`
async fn poll_device_notifications<S, D>(
    State(state): State<Arc<ServerState<S, D>>>,
    Path(device_id): Path<String>,
    Query(query): Query<PollQuery>,
    headers: HeaderMap,
) -> Result<Json<Vec<Event>>, ApiError>
where
    S: EventStore + EventSink,
    D: DeviceDirectory,
{
    let principal = principal_from_headers(&headers)?;
    let events = state
        .waiter()
        .wait_for_events(
            EventCategory::Notification,
            DeviceScope::single(device_id),
            parse_names(query.names.as_deref()),
            query.timestamp.map(Timestamp::from_millis),
            state.clamp_wait(query.wait_timeout),
            &principal,
        )
        .await?;
    Ok(Json(events))
}

/// `POST /device/{device_id}/command`
async fn create_command<S, D>(
    State(state): State<Arc<ServerState<S, D>>>,
    Path(device_id): Path<String>,
    headers: HeaderMap,
    Json(input): Json<CommandInput>,
) -> Result<(StatusCode, Json<Event>), ApiError>
where
    S: EventStore + EventSink,
    D: DeviceDirectory,
{
    let principal = principal_from_headers(&headers)?;
    let event = state
        .create_command(
            &DeviceId::new(device_id),
            &input.name,
            input.parameters,
            &principal,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(event)))
}

/// `PUT /device/{device_id}/command/{command_id}`
async fn update_command<S, D>(
    State(state): State<Arc<ServerState<S, D>>>,
    Path((device_id, command_id)): Path<(String, i64)>,
    headers: HeaderMap,
    Json(payload): Json<serde_json::Value>,
) -> Result<StatusCode, ApiError>
where
    S: EventStore + EventSink,
    D: DeviceDirectory,
{
    let principal = principal_from_headers(&headers)?;
    state
        .update_command(
            &DeviceId::new(device_id),
            CommandId::new(command_id),
            payload,
            &principal,
        )
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /device/{device_id}/notification`
async fn create_notification<S, D>(
    State(state): State<Arc<ServerState<S, D>>>,
    Path(device_id): Path<String>,
    headers: HeaderMap,
    Json(input): Json<NotificationInput>,
) -> Result<(StatusCode, Json<Event>), ApiError>
where
    S: EventStore + EventSink,
    D: DeviceDirectory,
{
    let principal = principal_from_headers(&headers)?;
    let event = state
        .create_notification(
            &DeviceId::new(device_id),
            &input.name,
            input.parameters,
            &principal,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(event)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_parse_ignores_blanks() {
        let names = parse_names(Some("temperature, humidity,,"));
        assert_eq!(names.len(), 2);
        assert!(names.contains("temperature"));
        assert!(names.contains("humidity"));
        assert!(parse_names(None).is_empty());
    }

    #[test]
    fn scope_parse_defaults_to_all_devices() {
        assert_eq!(parse_scope(None), DeviceScope::AllDevices);
        assert_eq!(
            parse_scope(Some("dev1,dev2")),
            DeviceScope::devices(["dev1", "dev2"])
        );
    }

    #[test]
    fn principal_defaults_to_unrestricted() {
        let principal = principal_from_headers(&HeaderMap::new()).expect("parse");
        assert!(matches!(principal.visible(), DeviceScope::AllDevices));

        let mut headers = HeaderMap::new();
        headers.insert(VISIBLE_DEVICES_HEADER, "dev1,dev2".parse().expect("value"));
        let principal = principal_from_headers(&headers).expect("parse");
        assert!(principal.visible().contains(&DeviceId::new("dev1")));
        assert!(!principal.visible().contains(&DeviceId::new("dev3")));
    }
}
