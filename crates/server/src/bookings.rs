//! In-app booking routes. Callers identify the acting user by uid; session
//! authentication happens in front of this service.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use sarpras_core::domain::booking::{BookingDetails, BookingDraft, BookingId, ResourceKind};
use sarpras_core::domain::time::{Interval, WireTimestamp};
use sarpras_core::domain::user::UserId;
use sarpras_core::errors::{DomainError, InterfaceError};
use sarpras_core::projection::{BookingSummary, Capabilities};
use sarpras_core::workflow::machine::Decision;
use sarpras_core::workflow::service::{DecisionRequest, LinkAction, SubmitRequest};
use sarpras_core::workflow::stages::Stage;
use sarpras_core::workflow::ApprovalService;
use sarpras_db::SqlResourceRepository;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::approval::{decision_response, parse_kind};
use crate::response::{
    correlation_id, internal, invalid, malformed_body, reject, required, ApiRejection, ApiSuccess,
};

#[derive(Clone)]
pub struct BookingState {
    service: ApprovalService,
    resources: SqlResourceRepository,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitBody {
    pub requester_uid: Option<String>,
    pub resource_id: Option<String>,
    pub start: Option<WireTimestamp>,
    pub end: Option<WireTimestamp>,
    pub activity: Option<String>,
    pub participant_count: Option<u32>,
    pub destination: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionBody {
    pub actor_uid: Option<String>,
    pub stage: Option<String>,
    pub decision: Option<String>,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActorBody {
    pub actor_uid: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub bucket: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActorQuery {
    pub actor_uid: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub booking: BookingSummary,
    pub auto_rejected: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BookingList {
    pub bookings: Vec<BookingSummary>,
}

pub fn router(service: ApprovalService, resources: SqlResourceRepository) -> Router {
    Router::new()
        .route("/bookings/{resource_type}", get(list_bookings).post(submit_booking))
        .route("/bookings/{resource_type}/{booking_id}", get(booking_detail))
        .route("/bookings/{resource_type}/{booking_id}/capabilities", get(booking_capabilities))
        .route("/bookings/{resource_type}/{booking_id}/decision", post(decide_booking))
        .route("/bookings/{resource_type}/{booking_id}/start", post(start_booking))
        .route("/bookings/{resource_type}/{booking_id}/complete", post(complete_booking))
        .with_state(BookingState { service, resources })
}

async fn submit_booking(
    Path(resource_type): Path<String>,
    State(state): State<BookingState>,
    body: Result<Json<SubmitBody>, JsonRejection>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiRejection> {
    let correlation_id = correlation_id();
    let Json(body) = body.map_err(|error| malformed_body(error.body_text(), &correlation_id))?;
    let kind = parse_kind(&resource_type, &correlation_id)?;
    let requester = required(body.requester_uid.as_deref(), "requesterUid", &correlation_id)?;
    let resource_id = required(body.resource_id.as_deref(), "resourceId", &correlation_id)?;
    let start =
        body.start.ok_or_else(|| invalid(DomainError::MissingField("start"), &correlation_id))?;
    let end = body.end.ok_or_else(|| invalid(DomainError::MissingField("end"), &correlation_id))?;
    let interval =
        Interval::from_wire(start, end).map_err(|error| invalid(error, &correlation_id))?;

    let resource = state
        .resources
        .find(kind, resource_id)
        .await
        .map_err(|error| internal(error, &correlation_id))?
        .ok_or_else(|| {
            reject(InterfaceError::NotFound {
                message: format!("{} `{resource_id}` tidak ditemukan", kind.noun()),
                correlation_id: correlation_id.clone(),
            })
        })?;

    let draft = BookingDraft {
        resource: resource.resource_ref(),
        interval,
        details: BookingDetails {
            activity: body.activity.unwrap_or_default().trim().to_string(),
            participant_count: body.participant_count,
            destination: body.destination.filter(|value| !value.trim().is_empty()),
        },
    };
    let request = SubmitRequest { requester_uid: UserId(requester.to_string()), draft };
    let result = state
        .service
        .submit(request, &correlation_id)
        .await
        .map_err(|error| reject(error.into_interface(&correlation_id)))?;

    let booking = &result.outcome.booking;
    info!(
        event_name = "approval.booking.submitted",
        correlation_id = %correlation_id,
        booking_id = %booking.id,
        resource_kind = %kind,
        status = booking.status.as_str(),
        "booking submitted"
    );

    Ok((
        StatusCode::CREATED,
        Json(SubmitResponse {
            booking: BookingSummary::from_booking(booking, state.service.timezone(), Utc::now()),
            auto_rejected: result.outcome.auto_rejected.iter().map(|id| id.0.clone()).collect(),
            warning: result.notification.warning(),
        }),
    ))
}

async fn list_bookings(
    Path(resource_type): Path<String>,
    State(state): State<BookingState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<BookingList>, ApiRejection> {
    let correlation_id = correlation_id();
    let kind = parse_kind(&resource_type, &correlation_id)?;
    let bookings = state
        .service
        .list(kind)
        .await
        .map_err(|error| reject(error.into_interface(&correlation_id)))?;

    let now = Utc::now();
    let wanted = query.bucket.as_deref().map(str::trim).filter(|value| !value.is_empty());
    let bookings = bookings
        .iter()
        .map(|booking| BookingSummary::from_booking(booking, state.service.timezone(), now))
        .filter(|summary| {
            wanted.map_or(true, |bucket| summary.bucket.as_str().eq_ignore_ascii_case(bucket))
        })
        .collect();

    Ok(Json(BookingList { bookings }))
}

async fn booking_detail(
    Path((resource_type, booking_id)): Path<(String, String)>,
    State(state): State<BookingState>,
) -> Result<Json<BookingSummary>, ApiRejection> {
    let correlation_id = correlation_id();
    let kind = parse_kind(&resource_type, &correlation_id)?;
    let booking = state
        .service
        .get(kind, &BookingId(booking_id))
        .await
        .map_err(|error| reject(error.into_interface(&correlation_id)))?;

    Ok(Json(BookingSummary::from_booking(&booking, state.service.timezone(), Utc::now())))
}

async fn booking_capabilities(
    Path((resource_type, booking_id)): Path<(String, String)>,
    State(state): State<BookingState>,
    Query(query): Query<ActorQuery>,
) -> Result<Json<Capabilities>, ApiRejection> {
    let correlation_id = correlation_id();
    let kind = parse_kind(&resource_type, &correlation_id)?;
    let actor = required(query.actor_uid.as_deref(), "actorUid", &correlation_id)?;
    let capabilities = state
        .service
        .capabilities(kind, &BookingId(booking_id), &UserId(actor.to_string()))
        .await
        .map_err(|error| reject(error.into_interface(&correlation_id)))?;

    Ok(Json(capabilities))
}

async fn decide_booking(
    Path((resource_type, booking_id)): Path<(String, String)>,
    State(state): State<BookingState>,
    body: Result<Json<DecisionBody>, JsonRejection>,
) -> Result<Json<ApiSuccess>, ApiRejection> {
    let correlation_id = correlation_id();
    let Json(body) = body.map_err(|error| malformed_body(error.body_text(), &correlation_id))?;
    let kind = parse_kind(&resource_type, &correlation_id)?;
    let actor = required(body.actor_uid.as_deref(), "actorUid", &correlation_id)?;
    let stage: Stage = required(body.stage.as_deref(), "stage", &correlation_id)?
        .parse()
        .map_err(|error| invalid(error, &correlation_id))?;
    let decision = match required(body.decision.as_deref(), "decision", &correlation_id)?
        .parse::<LinkAction>()
        .map_err(|error| invalid(error, &correlation_id))?
    {
        LinkAction::Approve => Decision::Approve,
        LinkAction::Reject => Decision::Reject { note: body.note.unwrap_or_default() },
    };
    let booking_id = BookingId(booking_id);

    let result = state
        .service
        .decide(
            kind,
            &booking_id,
            DecisionRequest { actor_uid: UserId(actor.to_string()), stage, decision },
            &correlation_id,
        )
        .await
        .map_err(|error| reject(error.into_interface(&correlation_id)))?;

    info!(
        event_name = "approval.booking.decided",
        correlation_id = %correlation_id,
        booking_id = %booking_id,
        resource_kind = %kind,
        stage = %stage,
        status = result.outcome.booking.status.as_str(),
        "in-app decision committed"
    );

    Ok(Json(decision_response(kind, &result)))
}

#[derive(Clone, Copy)]
enum Usage {
    Start,
    Complete,
}

async fn usage_transition(
    usage: Usage,
    resource_type: String,
    booking_id: String,
    state: BookingState,
    body: Result<Json<ActorBody>, JsonRejection>,
) -> Result<Json<BookingSummary>, ApiRejection> {
    let correlation_id = correlation_id();
    let Json(body) = body.map_err(|error| malformed_body(error.body_text(), &correlation_id))?;
    let kind = parse_kind(&resource_type, &correlation_id)?;
    let actor =
        UserId(required(body.actor_uid.as_deref(), "actorUid", &correlation_id)?.to_string());
    let booking_id = BookingId(booking_id);

    let booking = match usage {
        Usage::Start => state.service.start_usage(kind, &booking_id, &actor, &correlation_id).await,
        Usage::Complete => state.service.complete(kind, &booking_id, &actor, &correlation_id).await,
    }
    .map_err(|error| reject(error.into_interface(&correlation_id)))?;

    Ok(Json(BookingSummary::from_booking(&booking, state.service.timezone(), Utc::now())))
}

async fn start_booking(
    Path((resource_type, booking_id)): Path<(String, String)>,
    State(state): State<BookingState>,
    body: Result<Json<ActorBody>, JsonRejection>,
) -> Result<Json<BookingSummary>, ApiRejection> {
    usage_transition(Usage::Start, resource_type, booking_id, state, body).await
}

async fn complete_booking(
    Path((resource_type, booking_id)): Path<(String, String)>,
    State(state): State<BookingState>,
    body: Result<Json<ActorBody>, JsonRejection>,
) -> Result<Json<BookingSummary>, ApiRejection> {
    usage_transition(Usage::Complete, resource_type, booking_id, state, body).await
}
