//! Live tracking: jobs, the position-sample ingest pipeline with
//! ETA/distance recomputation, the staff read path, and the
//! token-gated public read path.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::{
    AppState,
    area::{ServiceKind, ValidationError},
    error::AppError,
    geo::{Point, haversine_m},
};

/// How long after a job went terminal the public link keeps answering.
const PUBLIC_GRACE_SECONDS: i64 = 30 * 60;

pub fn terminal_status(kind: ServiceKind) -> &'static str {
    match kind {
        ServiceKind::Delivery => "delivered",
        ServiceKind::LabCollection => "collected",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingJob {
    pub id: Uuid,
    pub kind: ServiceKind,
    pub owner_ref: String,
    /// Resolved once by the upstream geocoder and cached; absent when
    /// geocoding failed or is still pending.
    pub destination: Option<Point>,
    pub status: String,
    pub last_eta_minutes: Option<i64>,
    pub last_distance_meters: Option<f64>,
    /// `recorded_at` of the sample the derived fields were computed
    /// from. Only the most recent sample is authoritative, so a
    /// recompute carrying an older stamp must not overwrite these.
    pub derived_from: Option<Timestamp>,
    pub tracking_token: String,
    pub terminal_at: Option<Timestamp>,
}

impl TrackingJob {
    pub fn is_terminal(&self) -> bool {
        self.status == terminal_status(self.kind)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LocationSample {
    pub id: Uuid,
    pub owner_ref: String,
    pub job_id: Uuid,
    pub lat: f64,
    pub lng: f64,
    pub speed_mps: f64,
    pub heading_deg: f64,
    pub recorded_at: Timestamp,
}

/// Most recent sample for a job by `recorded_at`. `None` simply means
/// no sample has arrived yet.
pub fn latest_sample<'a, I>(samples: I, job_id: Uuid) -> Option<&'a LocationSample>
where
    I: IntoIterator<Item = &'a LocationSample>,
{
    samples
        .into_iter()
        .filter(|s| s.job_id == job_id)
        .max_by_key(|s| s.recorded_at)
}

#[derive(Debug, Deserialize)]
pub struct JobCreate {
    pub kind: ServiceKind,
    pub owner_ref: String,
    #[serde(default)]
    pub destination: Option<Point>,
}

#[tracing::instrument(skip_all)]
pub async fn create_job(
    State(state): State<AppState>,
    Json(request): Json<JobCreate>,
) -> Result<Json<TrackingJob>, AppError> {
    if let Some(destination) = request.destination {
        if !destination.in_bounds() {
            return Err(ValidationError::CoordinateOutOfRange.into());
        }
    }
    let job = TrackingJob {
        id: Uuid::new_v4(),
        kind: request.kind,
        owner_ref: request.owner_ref,
        destination: request.destination,
        status: "created".to_string(),
        last_eta_minutes: None,
        last_distance_meters: None,
        derived_from: None,
        tracking_token: Uuid::new_v4().simple().to_string(),
        terminal_at: None,
    };
    state.store.jobs.write().await.insert(job.id, job.clone());
    info!(message = "tracking job created", job = %job.id);
    Ok(Json(job))
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub status: String,
}

#[tracing::instrument(skip_all, fields(job = %id))]
pub async fn update_job_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<StatusUpdate>,
) -> Result<Json<TrackingJob>, AppError> {
    let mut jobs = state.store.jobs.write().await;
    let Some(job) = jobs.get_mut(&id) else {
        return Err(AppError::Status(StatusCode::NOT_FOUND));
    };
    job.status = request.status;
    if job.is_terminal() {
        if job.terminal_at.is_none() {
            job.terminal_at = Some(Timestamp::now());
        }
    } else {
        job.terminal_at = None;
    }
    info!(message = "job status updated", status = %job.status);
    Ok(Json(job.clone()))
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestRequest {
    pub owner_ref: String,
    pub job_kind: ServiceKind,
    pub job_id: Uuid,
    pub lat: f64,
    pub lng: f64,
    pub speed: f64,
    pub heading: f64,
}

pub fn validate_sample(request: &IngestRequest) -> Result<(), ValidationError> {
    if !Point::new(request.lat, request.lng).in_bounds() {
        return Err(ValidationError::CoordinateOutOfRange);
    }
    if !request.speed.is_finite() || request.speed < 0.0 {
        return Err(ValidationError::NegativeSpeed);
    }
    if !request.heading.is_finite() || !(0.0..360.0).contains(&request.heading) {
        return Err(ValidationError::HeadingOutOfRange);
    }
    Ok(())
}

/// Accepts one position sample from a worker device. Fire-and-forget
/// for the device: the response carries accept/reject and nothing else.
/// A rejected sample is never persisted; an accepted sample is never
/// un-persisted by a later recomputation failure.
#[tracing::instrument(skip_all, fields(job = %request.job_id, owner = %request.owner_ref))]
pub async fn ingest_location(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(request): Json<IngestRequest>,
) -> Result<StatusCode, AppError> {
    if token != state.ingest_token {
        return Err(AppError::Status(StatusCode::UNAUTHORIZED));
    }
    validate_sample(&request)?;

    let sample = LocationSample {
        id: Uuid::new_v4(),
        owner_ref: request.owner_ref.clone(),
        job_id: request.job_id,
        lat: request.lat,
        lng: request.lng,
        speed_mps: request.speed,
        heading_deg: request.heading,
        recorded_at: Timestamp::now(),
    };
    let at = Point::new(sample.lat, sample.lng);
    let recorded_at = sample.recorded_at;
    state.store.samples.write().await.push(sample);

    recompute_derived(&state, &request, at, recorded_at).await;
    Ok(StatusCode::OK)
}

/// Refreshes the job's straight-line distance and ETA off the newest
/// sample. Skipped for unknown, kind-mismatched or terminal jobs and
/// for jobs without a destination; no outcome here can reject the
/// already-written sample. The routing call runs outside the lock, so
/// a slow response for an older sample can finish after a newer one
/// already landed; the `derived_from` stamp drops such late writes.
async fn recompute_derived(
    state: &AppState,
    request: &IngestRequest,
    at: Point,
    recorded_at: Timestamp,
) {
    let destination = {
        let jobs = state.store.jobs.read().await;
        let Some(job) = jobs.get(&request.job_id) else {
            return;
        };
        if job.kind != request.job_kind || job.is_terminal() {
            return;
        }
        let Some(destination) = job.destination else {
            return;
        };
        destination
    };

    let distance_m = haversine_m(at, destination);
    // Routing call happens outside the lock; it may wait on its timeout.
    let eta_minutes = state.routing.eta_minutes(at, destination, distance_m).await;

    let mut jobs = state.store.jobs.write().await;
    if let Some(job) = jobs.get_mut(&request.job_id) {
        let superseded = job.derived_from.is_some_and(|from| from > recorded_at);
        if !job.is_terminal() && !superseded {
            job.last_distance_meters = Some(distance_m);
            job.last_eta_minutes = Some(eta_minutes);
            job.derived_from = Some(recorded_at);
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SampleView {
    pub lat: f64,
    pub lng: f64,
    pub speed_mps: f64,
    pub heading_deg: f64,
    pub recorded_at: Timestamp,
}

impl From<&LocationSample> for SampleView {
    fn from(sample: &LocationSample) -> Self {
        Self {
            lat: sample.lat,
            lng: sample.lng,
            speed_mps: sample.speed_mps,
            heading_deg: sample.heading_deg,
            recorded_at: sample.recorded_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StaffView {
    pub job_id: Uuid,
    pub status: String,
    pub last_eta_minutes: Option<i64>,
    pub last_distance_meters: Option<f64>,
    /// Absent until the first sample arrives; not an error.
    pub latest: Option<SampleView>,
}

#[tracing::instrument(skip_all, fields(job = %job_id))]
pub async fn staff_track(
    State(state): State<AppState>,
    Path((kind, job_id)): Path<(ServiceKind, Uuid)>,
) -> Result<Json<StaffView>, AppError> {
    let jobs = state.store.jobs.read().await;
    let Some(job) = jobs.get(&job_id) else {
        return Err(AppError::Status(StatusCode::NOT_FOUND));
    };
    if job.kind != kind {
        return Err(AppError::Status(StatusCode::NOT_FOUND));
    }
    let samples = state.store.samples.read().await;
    let latest = latest_sample(samples.iter(), job_id).map(SampleView::from);
    Ok(Json(StaffView {
        job_id: job.id,
        status: job.status.clone(),
        last_eta_minutes: job.last_eta_minutes,
        last_distance_meters: job.last_distance_meters,
        latest,
    }))
}

#[derive(Debug, PartialEq, Serialize)]
pub struct PublicView {
    pub status: String,
    pub last_eta_minutes: Option<i64>,
    pub last_distance_meters: Option<f64>,
    pub destination_set: bool,
}

/// Restricted view for shareable links. Unknown job, wrong kind, wrong
/// token and a grace window passed since going terminal all collapse
/// into the same `None` so a guesser learns nothing from the shape of
/// the failure.
pub fn public_view(
    job: Option<&TrackingJob>,
    kind: ServiceKind,
    token: &str,
    now: Timestamp,
) -> Option<PublicView> {
    let job = job?;
    if job.kind != kind || job.tracking_token != token {
        return None;
    }
    if let Some(terminal_at) = job.terminal_at {
        if now.as_second() - terminal_at.as_second() > PUBLIC_GRACE_SECONDS {
            return None;
        }
    }
    Some(PublicView {
        status: job.status.clone(),
        last_eta_minutes: job.last_eta_minutes,
        last_distance_meters: job.last_distance_meters,
        destination_set: job.destination.is_some(),
    })
}

#[tracing::instrument(skip_all, fields(job = %job_id))]
pub async fn public_track(
    State(state): State<AppState>,
    Path((kind, job_id, token)): Path<(ServiceKind, Uuid, String)>,
) -> Result<Json<PublicView>, AppError> {
    let jobs = state.store.jobs.read().await;
    match public_view(jobs.get(&job_id), kind, &token, Timestamp::now()) {
        Some(view) => Ok(Json(view)),
        None => Err(AppError::Status(StatusCode::NOT_FOUND)),
    }
}
