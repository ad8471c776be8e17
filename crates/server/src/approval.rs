//! Out-of-band approval link routes.
//!
//! - `POST /approval/{resourceType}/{stage}/send`  issue a token and notify the stage approver
//! - `GET  /approval/{resourceType}/verify`        read-only check of a link, returns the summary
//! - `POST /approval/{resourceType}/action`        approve or reject through a link

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use sarpras_core::dispatch::stage_title;
use sarpras_core::domain::booking::{BookingId, ResourceKind};
use sarpras_core::domain::time::WireTimestamp;
use sarpras_core::projection::BookingSummary;
use sarpras_core::workflow::service::{LinkAction, ServiceOutcome};
use sarpras_core::workflow::stages::{BookingStatus, Stage};
use sarpras_core::workflow::ApprovalService;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::response::{
    correlation_id, invalid, malformed_body, reject, required, ApiRejection, ApiSuccess,
};

#[derive(Clone)]
pub struct ApprovalState {
    service: ApprovalService,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    pub booking_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyQuery {
    pub booking_id: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRequest {
    pub booking_id: Option<String>,
    pub token: Option<String>,
    pub action: Option<String>,
    pub note: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    #[serde(flatten)]
    pub booking: BookingSummary,
    pub approval_stage: u8,
    pub approval_stage_label: &'static str,
    pub token_expires_at: WireTimestamp,
}

pub fn router(service: ApprovalService) -> Router {
    Router::new()
        .route("/approval/{resource_type}/{stage}/send", post(send_approval))
        .route("/approval/{resource_type}/verify", get(verify_link))
        .route("/approval/{resource_type}/action", post(act_on_link))
        .with_state(ApprovalState { service })
}

pub(crate) fn parse_kind(raw: &str, correlation_id: &str) -> Result<ResourceKind, ApiRejection> {
    raw.parse().map_err(|error| invalid(error, correlation_id))
}

/// Success envelope for a committed approve or reject.
pub(crate) fn decision_response(kind: ResourceKind, result: &ServiceOutcome) -> ApiSuccess {
    let booking = &result.outcome.booking;
    let mut message = match booking.status {
        BookingStatus::Rejected => "Booking ditolak".to_string(),
        BookingStatus::Waiting(next) => {
            format!("Booking disetujui dan diteruskan ke tahap {}", stage_title(next))
        }
        _ => format!("Booking disetujui, peminjaman {} sudah final", kind.noun().to_lowercase()),
    };
    if !result.outcome.auto_rejected.is_empty() {
        message.push_str(&format!(
            "; {} booking bentrok ditolak otomatis",
            result.outcome.auto_rejected.len()
        ));
    }

    ApiSuccess {
        success: true,
        message,
        status: Some(booking.status.label(kind)),
        warning: result.notification.warning(),
    }
}

async fn send_approval(
    Path((resource_type, stage)): Path<(String, String)>,
    State(state): State<ApprovalState>,
    body: Result<Json<SendRequest>, JsonRejection>,
) -> Result<Json<ApiSuccess>, ApiRejection> {
    let correlation_id = correlation_id();
    let Json(body) = body.map_err(|error| malformed_body(error.body_text(), &correlation_id))?;
    let kind = parse_kind(&resource_type, &correlation_id)?;
    let stage: Stage = stage.parse().map_err(|error| invalid(error, &correlation_id))?;
    let booking_id =
        BookingId(required(body.booking_id.as_deref(), "bookingId", &correlation_id)?.to_string());

    let receipt = state
        .service
        .send_link(kind, stage, &booking_id, &correlation_id)
        .await
        .map_err(|error| reject(error.into_interface(&correlation_id)))?;

    let recipient = receipt
        .issued
        .token
        .approver
        .as_ref()
        .map(|approver| approver.name.clone())
        .unwrap_or_else(|| "approver".to_string());
    info!(
        event_name = "approval.link.sent",
        correlation_id = %correlation_id,
        booking_id = %booking_id,
        resource_kind = %kind,
        stage = %stage,
        "approval link dispatched on request"
    );

    Ok(Json(ApiSuccess::new(format!(
        "Permintaan persetujuan tahap {} dikirim ke {recipient}",
        stage_title(stage)
    ))))
}

async fn verify_link(
    Path(resource_type): Path<String>,
    State(state): State<ApprovalState>,
    Query(query): Query<VerifyQuery>,
) -> Result<Json<VerifyResponse>, ApiRejection> {
    let correlation_id = correlation_id();
    let kind = parse_kind(&resource_type, &correlation_id)?;
    let booking_id = required(query.booking_id.as_deref(), "bookingId", &correlation_id)?;
    let secret = required(query.token.as_deref(), "token", &correlation_id)?;

    let verified = state
        .service
        .verify(kind, &BookingId(booking_id.to_string()), secret)
        .await
        .map_err(|error| reject(error.into_interface(&correlation_id)))?;

    Ok(Json(VerifyResponse {
        booking: BookingSummary::from_booking(
            &verified.booking,
            state.service.timezone(),
            Utc::now(),
        ),
        approval_stage: verified.token.stage.index(),
        approval_stage_label: verified.token.stage.label(kind),
        token_expires_at: verified.token.expires_at.into(),
    }))
}

async fn act_on_link(
    Path(resource_type): Path<String>,
    State(state): State<ApprovalState>,
    body: Result<Json<ActionRequest>, JsonRejection>,
) -> Result<Json<ApiSuccess>, ApiRejection> {
    let correlation_id = correlation_id();
    let Json(body) = body.map_err(|error| malformed_body(error.body_text(), &correlation_id))?;
    let kind = parse_kind(&resource_type, &correlation_id)?;
    let booking_id =
        BookingId(required(body.booking_id.as_deref(), "bookingId", &correlation_id)?.to_string());
    let secret = required(body.token.as_deref(), "token", &correlation_id)?;
    let action: LinkAction = required(body.action.as_deref(), "action", &correlation_id)?
        .parse()
        .map_err(|error| invalid(error, &correlation_id))?;

    let result = state
        .service
        .act(kind, &booking_id, secret, action, body.note.as_deref(), &correlation_id)
        .await
        .map_err(|error| reject(error.into_interface(&correlation_id)))?;

    info!(
        event_name = "approval.link.acted",
        correlation_id = %correlation_id,
        booking_id = %booking_id,
        resource_kind = %kind,
        action = ?action,
        status = result.outcome.booking.status.as_str(),
        "approval link decision committed"
    );

    Ok(Json(decision_response(kind, &result)))
}
