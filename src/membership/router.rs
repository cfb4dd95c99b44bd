//! HTTP surface. Caller identity arrives in `x-member-id` / `x-member-role`
//! headers set by the session layer in front of this service; absent identity
//! is 401 and a non-admin on an admin route is 403.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Datelike, FixedOffset, Utc};
use serde::Deserialize;
use serde_json::json;

use super::calendar::club_offset;
use super::checkin::{CheckinScanner, ScanError};
use super::domain::{MemberId, Role};
use super::repository::{
    AttendanceRepository, FineRepository, PaymentRepository, ProfileRepository, RepositoryError,
    TrainingRepository,
};
use super::service::{
    FineSubmission, MembershipService, PaymentSubmission, ServiceError,
};
use super::storage::{ObjectStore, StorageError};

pub struct AppState<P, F, A, T, Pr, S> {
    pub service: Arc<MembershipService<P, F, A, Pr, S>>,
    pub scanner: Arc<CheckinScanner<A, T, Pr>>,
}

impl<P, F, A, T, Pr, S> Clone for AppState<P, F, A, T, Pr, S> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            scanner: Arc::clone(&self.scanner),
        }
    }
}

/// Router builder exposing the member and admin endpoints.
pub fn membership_router<P, F, A, T, Pr, S>(state: AppState<P, F, A, T, Pr, S>) -> Router
where
    P: PaymentRepository + 'static,
    F: FineRepository + 'static,
    A: AttendanceRepository + 'static,
    T: TrainingRepository + 'static,
    Pr: ProfileRepository + 'static,
    S: ObjectStore + 'static,
{
    Router::new()
        .route(
            "/api/v1/members/:member_id/standing",
            get(standing_handler::<P, F, A, T, Pr, S>),
        )
        .route(
            "/api/v1/payments",
            post(submit_payment_handler::<P, F, A, T, Pr, S>)
                .get(payment_history_handler::<P, F, A, T, Pr, S>),
        )
        .route(
            "/api/v1/fines",
            post(submit_fine_handler::<P, F, A, T, Pr, S>)
                .get(fine_history_handler::<P, F, A, T, Pr, S>),
        )
        .route(
            "/api/v1/members/profile",
            post(profile_handler::<P, F, A, T, Pr, S>),
        )
        .route(
            "/api/v1/members/avatar",
            post(avatar_handler::<P, F, A, T, Pr, S>),
        )
        .route(
            "/api/v1/checkin/scan",
            post(scan_handler::<P, F, A, T, Pr, S>),
        )
        .route(
            "/api/v1/admin/sync/payments",
            post(payment_sync_handler::<P, F, A, T, Pr, S>),
        )
        .route(
            "/api/v1/admin/sync/fines",
            post(fine_sync_handler::<P, F, A, T, Pr, S>),
        )
        .with_state(state)
}

struct Caller {
    member: MemberId,
    role: Role,
}

fn caller(headers: &HeaderMap) -> Result<Caller, Response> {
    let member = headers
        .get("x-member-id")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            let payload = json!({ "error": "missing caller identity" });
            (StatusCode::UNAUTHORIZED, axum::Json(payload)).into_response()
        })?;
    let role = headers
        .get("x-member-role")
        .and_then(|value| value.to_str().ok())
        .map(Role::from_loose)
        .unwrap_or(Role::Member);
    Ok(Caller {
        member: MemberId(member.to_string()),
        role,
    })
}

fn require_admin(caller: &Caller) -> Result<(), Response> {
    if caller.role == Role::Admin {
        return Ok(());
    }
    let payload = json!({ "error": "admin role required" });
    Err((StatusCode::FORBIDDEN, axum::Json(payload)).into_response())
}

fn club_now() -> DateTime<FixedOffset> {
    Utc::now().with_timezone(&club_offset())
}

fn error_response(error: ServiceError) -> Response {
    let status = match &error {
        ServiceError::InvalidAmount(_)
        | ServiceError::InvalidOperationNumber(_)
        | ServiceError::MissingOperationDate
        | ServiceError::MissingFullName
        | ServiceError::InvalidNationalId(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ServiceError::UnknownMember(_) => StatusCode::NOT_FOUND,
        ServiceError::FeedNotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
        ServiceError::Feed(_) => StatusCode::BAD_GATEWAY,
        ServiceError::Storage(StorageError::AlreadyExists(_)) => StatusCode::CONFLICT,
        ServiceError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        ServiceError::Repository(RepositoryError::Conflict) => StatusCode::CONFLICT,
        ServiceError::Repository(RepositoryError::NotFound) => StatusCode::NOT_FOUND,
        ServiceError::Repository(RepositoryError::Unavailable(_)) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
    };
    let payload = json!({ "error": error.to_string() });
    (status, axum::Json(payload)).into_response()
}

#[derive(Debug, Deserialize)]
struct YearQuery {
    year: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct PaymentRequest {
    #[serde(default)]
    full_name: String,
    #[serde(default)]
    national_id: String,
    #[serde(default)]
    email: String,
    amount: String,
    operation_number: String,
    bank: String,
    #[serde(default)]
    operation_at: Option<DateTime<FixedOffset>>,
    receipt_file_name: String,
    #[serde(default)]
    receipt_content: Vec<u8>,
}

#[derive(Debug, Deserialize)]
struct FineRequest {
    operation_number: String,
    bank: String,
    #[serde(default)]
    operation_at: Option<DateTime<FixedOffset>>,
    receipt_file_name: String,
    #[serde(default)]
    receipt_content: Vec<u8>,
}

#[derive(Debug, Deserialize)]
struct ProfileRequest {
    full_name: String,
    national_id: String,
}

#[derive(Debug, Deserialize)]
struct AvatarRequest {
    extension: String,
    content: Vec<u8>,
}

#[derive(Debug, Deserialize)]
struct ScanRequest {
    code: String,
}

async fn standing_handler<P, F, A, T, Pr, S>(
    State(state): State<AppState<P, F, A, T, Pr, S>>,
    Path(member_id): Path<String>,
    headers: HeaderMap,
) -> Response
where
    P: PaymentRepository + 'static,
    F: FineRepository + 'static,
    A: AttendanceRepository + 'static,
    T: TrainingRepository + 'static,
    Pr: ProfileRepository + 'static,
    S: ObjectStore + 'static,
{
    let caller = match caller(&headers) {
        Ok(caller) => caller,
        Err(response) => return response,
    };
    let member = MemberId(member_id);
    if caller.role != Role::Admin && caller.member != member {
        let payload = json!({ "error": "members may only view their own standing" });
        return (StatusCode::FORBIDDEN, axum::Json(payload)).into_response();
    }

    match state.service.standing(&member, club_now()) {
        Ok(standing) => (StatusCode::OK, axum::Json(standing)).into_response(),
        Err(error) => error_response(error),
    }
}

async fn submit_payment_handler<P, F, A, T, Pr, S>(
    State(state): State<AppState<P, F, A, T, Pr, S>>,
    headers: HeaderMap,
    axum::Json(request): axum::Json<PaymentRequest>,
) -> Response
where
    P: PaymentRepository + 'static,
    F: FineRepository + 'static,
    A: AttendanceRepository + 'static,
    T: TrainingRepository + 'static,
    Pr: ProfileRepository + 'static,
    S: ObjectStore + 'static,
{
    let caller = match caller(&headers) {
        Ok(caller) => caller,
        Err(response) => return response,
    };
    let submission = PaymentSubmission {
        member_id: caller.member,
        full_name: request.full_name,
        national_id: request.national_id,
        email: request.email,
        amount: request.amount,
        operation_number: request.operation_number,
        bank: request.bank,
        operation_at: request.operation_at,
        receipt_file_name: request.receipt_file_name,
        receipt_content: request.receipt_content,
    };
    match state.service.submit_payment(submission, club_now()) {
        Ok(record) => (StatusCode::CREATED, axum::Json(record)).into_response(),
        Err(error) => error_response(error),
    }
}

async fn payment_history_handler<P, F, A, T, Pr, S>(
    State(state): State<AppState<P, F, A, T, Pr, S>>,
    Query(query): Query<YearQuery>,
    headers: HeaderMap,
) -> Response
where
    P: PaymentRepository + 'static,
    F: FineRepository + 'static,
    A: AttendanceRepository + 'static,
    T: TrainingRepository + 'static,
    Pr: ProfileRepository + 'static,
    S: ObjectStore + 'static,
{
    let caller = match caller(&headers) {
        Ok(caller) => caller,
        Err(response) => return response,
    };
    let year = query.year.unwrap_or_else(|| club_now().year());
    match state.service.payment_history(&caller.member, year) {
        Ok(views) => (StatusCode::OK, axum::Json(views)).into_response(),
        Err(error) => error_response(error),
    }
}

async fn submit_fine_handler<P, F, A, T, Pr, S>(
    State(state): State<AppState<P, F, A, T, Pr, S>>,
    headers: HeaderMap,
    axum::Json(request): axum::Json<FineRequest>,
) -> Response
where
    P: PaymentRepository + 'static,
    F: FineRepository + 'static,
    A: AttendanceRepository + 'static,
    T: TrainingRepository + 'static,
    Pr: ProfileRepository + 'static,
    S: ObjectStore + 'static,
{
    let caller = match caller(&headers) {
        Ok(caller) => caller,
        Err(response) => return response,
    };
    let submission = FineSubmission {
        member_id: caller.member,
        operation_number: request.operation_number,
        bank: request.bank,
        operation_at: request.operation_at,
        receipt_file_name: request.receipt_file_name,
        receipt_content: request.receipt_content,
    };
    match state.service.submit_fine(submission, club_now()) {
        Ok(record) => (StatusCode::CREATED, axum::Json(record)).into_response(),
        Err(error) => error_response(error),
    }
}

async fn fine_history_handler<P, F, A, T, Pr, S>(
    State(state): State<AppState<P, F, A, T, Pr, S>>,
    Query(query): Query<YearQuery>,
    headers: HeaderMap,
) -> Response
where
    P: PaymentRepository + 'static,
    F: FineRepository + 'static,
    A: AttendanceRepository + 'static,
    T: TrainingRepository + 'static,
    Pr: ProfileRepository + 'static,
    S: ObjectStore + 'static,
{
    let caller = match caller(&headers) {
        Ok(caller) => caller,
        Err(response) => return response,
    };
    let year = query.year.unwrap_or_else(|| club_now().year());
    match state.service.fine_history(&caller.member, year) {
        Ok(views) => (StatusCode::OK, axum::Json(views)).into_response(),
        Err(error) => error_response(error),
    }
}

async fn profile_handler<P, F, A, T, Pr, S>(
    State(state): State<AppState<P, F, A, T, Pr, S>>,
    headers: HeaderMap,
    axum::Json(request): axum::Json<ProfileRequest>,
) -> Response
where
    P: PaymentRepository + 'static,
    F: FineRepository + 'static,
    A: AttendanceRepository + 'static,
    T: TrainingRepository + 'static,
    Pr: ProfileRepository + 'static,
    S: ObjectStore + 'static,
{
    let caller = match caller(&headers) {
        Ok(caller) => caller,
        Err(response) => return response,
    };
    match state
        .service
        .update_profile(&caller.member, &request.full_name, &request.national_id)
    {
        Ok(profile) => (StatusCode::OK, axum::Json(profile)).into_response(),
        Err(error) => error_response(error),
    }
}

async fn avatar_handler<P, F, A, T, Pr, S>(
    State(state): State<AppState<P, F, A, T, Pr, S>>,
    headers: HeaderMap,
    axum::Json(request): axum::Json<AvatarRequest>,
) -> Response
where
    P: PaymentRepository + 'static,
    F: FineRepository + 'static,
    A: AttendanceRepository + 'static,
    T: TrainingRepository + 'static,
    Pr: ProfileRepository + 'static,
    S: ObjectStore + 'static,
{
    let caller = match caller(&headers) {
        Ok(caller) => caller,
        Err(response) => return response,
    };
    match state
        .service
        .update_avatar(&caller.member, &request.extension, &request.content, club_now())
    {
        Ok(path) => {
            let payload = json!({ "avatar_path": path });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Err(error) => error_response(error),
    }
}

async fn scan_handler<P, F, A, T, Pr, S>(
    State(state): State<AppState<P, F, A, T, Pr, S>>,
    headers: HeaderMap,
    axum::Json(request): axum::Json<ScanRequest>,
) -> Response
where
    P: PaymentRepository + 'static,
    F: FineRepository + 'static,
    A: AttendanceRepository + 'static,
    T: TrainingRepository + 'static,
    Pr: ProfileRepository + 'static,
    S: ObjectStore + 'static,
{
    let caller = match caller(&headers) {
        Ok(caller) => caller,
        Err(response) => return response,
    };
    if let Err(response) = require_admin(&caller) {
        return response;
    }
    match state.scanner.scan(&request.code, club_now()) {
        Ok(outcome) => (StatusCode::OK, axum::Json(outcome)).into_response(),
        Err(error @ (ScanError::Malformed(_) | ScanError::ForeignCode(_) | ScanError::MissingMember)) => {
            let payload = json!({ "error": error.to_string() });
            (StatusCode::UNPROCESSABLE_ENTITY, axum::Json(payload)).into_response()
        }
        Err(ScanError::Store(error)) => {
            let payload = json!({ "error": error.to_string() });
            (StatusCode::SERVICE_UNAVAILABLE, axum::Json(payload)).into_response()
        }
    }
}

async fn payment_sync_handler<P, F, A, T, Pr, S>(
    State(state): State<AppState<P, F, A, T, Pr, S>>,
    headers: HeaderMap,
) -> Response
where
    P: PaymentRepository + 'static,
    F: FineRepository + 'static,
    A: AttendanceRepository + 'static,
    T: TrainingRepository + 'static,
    Pr: ProfileRepository + 'static,
    S: ObjectStore + 'static,
{
    let caller = match caller(&headers) {
        Ok(caller) => caller,
        Err(response) => return response,
    };
    if let Err(response) = require_admin(&caller) {
        return response;
    }
    match state.service.run_payment_sync().await {
        Ok(report) => (StatusCode::OK, axum::Json(report)).into_response(),
        Err(error) => error_response(error),
    }
}

async fn fine_sync_handler<P, F, A, T, Pr, S>(
    State(state): State<AppState<P, F, A, T, Pr, S>>,
    headers: HeaderMap,
) -> Response
where
    P: PaymentRepository + 'static,
    F: FineRepository + 'static,
    A: AttendanceRepository + 'static,
    T: TrainingRepository + 'static,
    Pr: ProfileRepository + 'static,
    S: ObjectStore + 'static,
{
    let caller = match caller(&headers) {
        Ok(caller) => caller,
        Err(response) => return response,
    };
    if let Err(response) = require_admin(&caller) {
        return response;
    }
    match state.service.run_fine_sync().await {
        Ok(report) => (StatusCode::OK, axum::Json(report)).into_response(),
        Err(error) => error_response(error),
    }
}
