//! Distance-based delivery fees anchored on the nearest active depot.
//! Deliberately independent of geofence resolution: admin fee preview
//! must work even for points outside every service area.

use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::{
    AppState,
    area::{ServiceKind, ValidationError},
    error::AppError,
    geo::{NearestCandidate, Point, nearest_of},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Depot {
    pub id: Uuid,
    pub service_kind: ServiceKind,
    pub location: Point,
    pub base_fare: f64,
    pub per_km_fee: f64,
    pub priority: i32,
    pub active: bool,
}

impl NearestCandidate for Depot {
    fn anchor(&self) -> Point {
        self.location
    }
    fn priority(&self) -> i32 {
        self.priority
    }
    fn candidate_id(&self) -> Uuid {
        self.id
    }
    fn is_active(&self) -> bool {
        self.active
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Quote {
    pub depot_id: Uuid,
    pub distance_km: f64,
    pub fare: f64,
}

/// Round to 2 decimals, half-up. `f64::round` is half-away-from-zero,
/// which coincides with half-up for the non-negative fares and
/// distances handled here.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn compute_fare(base_fare: f64, per_km_fee: f64, distance_km: f64) -> f64 {
    round2(base_fare + distance_km * per_km_fee)
}

/// Fare from the nearest active depot of the kind, or `None` when no
/// such depot exists. A pure read; callers may quote points that no
/// geofence covers.
pub fn quote<'a, I>(point: Point, kind: ServiceKind, depots: I) -> Option<Quote>
where
    I: IntoIterator<Item = &'a Depot>,
{
    let of_kind = depots.into_iter().filter(|d| d.service_kind == kind);
    let (depot, distance_m) = nearest_of(point, of_kind)?;
    let distance_km = round2(distance_m / 1000.0);
    Some(Quote {
        depot_id: depot.id,
        distance_km,
        fare: compute_fare(depot.base_fare, depot.per_km_fee, distance_km),
    })
}

#[derive(Debug, Deserialize)]
pub struct DepotUpsert {
    pub service_kind: ServiceKind,
    pub lat: f64,
    pub lng: f64,
    pub base_fare: f64,
    pub per_km_fee: f64,
    pub priority: i32,
    pub active: bool,
}

#[tracing::instrument(skip_all)]
pub async fn create_depot(
    State(state): State<AppState>,
    Json(request): Json<DepotUpsert>,
) -> Result<Json<Depot>, AppError> {
    let location = Point::new(request.lat, request.lng);
    if !location.in_bounds() {
        return Err(ValidationError::CoordinateOutOfRange.into());
    }
    if request.base_fare < 0.0 || request.per_km_fee < 0.0 {
        return Err(ValidationError::NegativeFare.into());
    }
    let depot = Depot {
        id: Uuid::new_v4(),
        service_kind: request.service_kind,
        location,
        base_fare: request.base_fare,
        per_km_fee: request.per_km_fee,
        priority: request.priority,
        active: request.active,
    };
    state.store.depots.write().await.insert(depot.id, depot.clone());
    info!(message = "depot created", depot = %depot.id);
    Ok(Json(depot))
}

#[derive(Debug, Deserialize)]
pub struct QuoteRequest {
    pub lat: f64,
    pub lng: f64,
    pub service_kind: ServiceKind,
}

/// "No depot" is an explicit result, not an HTTP error.
#[derive(Debug, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum QuoteResponse {
    Quoted {
        depot_id: Uuid,
        distance_km: f64,
        fare: f64,
    },
    NoDepot,
}

#[tracing::instrument(skip_all)]
pub async fn quote_fee(
    State(state): State<AppState>,
    Json(request): Json<QuoteRequest>,
) -> Result<Json<QuoteResponse>, AppError> {
    let point = Point::new(request.lat, request.lng);
    if !point.in_bounds() {
        return Err(ValidationError::CoordinateOutOfRange.into());
    }
    let depots = state.store.depots.read().await;
    let response = match quote(point, request.service_kind, depots.values()) {
        Some(q) => QuoteResponse::Quoted {
            depot_id: q.depot_id,
            distance_km: q.distance_km,
            fare: q.fare,
        },
        None => QuoteResponse::NoDepot,
    };
    Ok(Json(response))
}
