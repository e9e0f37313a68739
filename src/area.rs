//! Service areas: operator-drawn geofences, the editing gateway that
//! normalizes raw shapes, and membership resolution for customer-facing
//! serviceability checks.

use axum::{
    Json,
    extract::{Path, State},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::{
    AppState,
    error::AppError,
    geo::{self, Point},
};

/// The two operations offered inside a geofence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    Delivery,
    LabCollection,
}

/// Stored geometry. Polygon rings are closed (first vertex repeated
/// last) once they pass through [`validate_and_normalize`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Shape {
    Polygon { ring: Vec<Point> },
    Circle { center: Point, radius_m: f64 },
}

impl Shape {
    pub fn contains(&self, p: Point) -> bool {
        match self {
            Shape::Polygon { ring } => geo::point_in_polygon(p, ring),
            Shape::Circle { center, radius_m } => geo::point_in_circle(p, *center, *radius_m),
        }
    }
}

/// Recoverable editing mistakes, surfaced verbatim to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum ValidationError {
    #[error("polygon needs at least 3 distinct vertices")]
    TooFewVertices,
    #[error("polygon vertices must be finite coordinates")]
    NonFiniteVertex,
    #[error("circle center must be finite coordinates")]
    NonFiniteCenter,
    #[error("circle radius must be greater than zero")]
    NonPositiveRadius,
    #[error("coordinate outside valid latitude/longitude range")]
    CoordinateOutOfRange,
    #[error("fares must be non-negative")]
    NegativeFare,
    #[error("speed must be non-negative")]
    NegativeSpeed,
    #[error("heading must lie in [0, 360)")]
    HeadingOutOfRange,
}

/// Turns an operator-drawn shape into its canonical stored form.
///
/// Polygons: consecutive duplicate vertices are dropped, the ring is
/// closed by re-appending the first vertex if the editor left it open,
/// and fewer than 3 distinct vertices is rejected. Self-intersection is
/// deliberately not checked; the editor allows non-simple rings mid-edit.
/// Circles: center must be finite, radius strictly positive.
///
/// Idempotent: feeding the output back in returns it unchanged.
pub fn validate_and_normalize(raw: Shape) -> Result<Shape, ValidationError> {
    match raw {
        Shape::Polygon { ring } => {
            if ring.iter().any(|v| !v.is_finite()) {
                return Err(ValidationError::NonFiniteVertex);
            }
            let mut distinct: Vec<Point> = Vec::with_capacity(ring.len() + 1);
            for vertex in ring {
                if distinct.last() != Some(&vertex) {
                    distinct.push(vertex);
                }
            }
            // An already-closed ring repeats the first vertex; strip it
            // so the distinct-count check sees only unique corners.
            if distinct.len() > 1 && distinct.first() == distinct.last() {
                distinct.pop();
            }
            if distinct.len() < 3 {
                return Err(ValidationError::TooFewVertices);
            }
            let first = distinct[0];
            distinct.push(first);
            Ok(Shape::Polygon { ring: distinct })
        }
        Shape::Circle { center, radius_m } => {
            if !center.is_finite() {
                return Err(ValidationError::NonFiniteCenter);
            }
            if !radius_m.is_finite() || radius_m <= 0.0 {
                return Err(ValidationError::NonPositiveRadius);
            }
            Ok(Shape::Circle { center, radius_m })
        }
    }
}

/// In-progress polygon being drawn in the area editor. The vertex list
/// is an explicit ordered buffer so "undo last point" is a pop, not a
/// mutation of shared state.
#[derive(Debug, Default, Clone)]
pub struct VertexBuffer {
    vertices: Vec<Point>,
}

impl VertexBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, vertex: Point) {
        self.vertices.push(vertex);
    }

    pub fn undo_last(&mut self) -> Option<Point> {
        self.vertices.pop()
    }

    pub fn clear(&mut self) {
        self.vertices.clear();
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Closes the buffer into a canonical polygon shape.
    pub fn finish(&self) -> Result<Shape, ValidationError> {
        validate_and_normalize(Shape::Polygon {
            ring: self.vertices.clone(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceArea {
    pub id: Uuid,
    pub service_kind: ServiceKind,
    pub owner_ref: String,
    pub shape: Shape,
    /// Lower value wins when areas overlap.
    pub priority: i32,
    pub active: bool,
    /// Informational only; capacity is enforced by booking flows, not here.
    pub capacity_per_day: Option<u32>,
}

/// Picks the winning service area for a point, or `None` when the point
/// is outside every active area of the kind. Overlaps resolve to the
/// lowest `priority` value, ties to the lowest id. Callers must treat
/// `None` as "outside service area", never as a default area.
pub fn resolve<'a, I>(point: Point, kind: ServiceKind, areas: I) -> Option<&'a ServiceArea>
where
    I: IntoIterator<Item = &'a ServiceArea>,
{
    areas
        .into_iter()
        .filter(|a| a.active && a.service_kind == kind && a.shape.contains(point))
        .min_by_key(|a| (a.priority, a.id))
}

#[derive(Debug, Deserialize)]
pub struct AreaUpsert {
    pub service_kind: ServiceKind,
    pub owner_ref: String,
    pub shape: Shape,
    pub priority: i32,
    pub active: bool,
    #[serde(default)]
    pub capacity_per_day: Option<u32>,
}

#[tracing::instrument(skip_all)]
pub async fn create_area(
    State(state): State<AppState>,
    Json(request): Json<AreaUpsert>,
) -> Result<Json<ServiceArea>, AppError> {
    let area = persist_area(&state, Uuid::new_v4(), request).await?;
    info!(message = "service area created", area = %area.id);
    Ok(Json(area))
}

/// Idempotent on id: repeating the same PUT yields the same stored area.
#[tracing::instrument(skip_all, fields(area = %id))]
pub async fn update_area(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<AreaUpsert>,
) -> Result<Json<ServiceArea>, AppError> {
    let area = persist_area(&state, id, request).await?;
    info!(message = "service area updated", area = %area.id);
    Ok(Json(area))
}

async fn persist_area(
    state: &AppState,
    id: Uuid,
    request: AreaUpsert,
) -> Result<ServiceArea, AppError> {
    let shape = validate_and_normalize(request.shape)?;
    let area = ServiceArea {
        id,
        service_kind: request.service_kind,
        owner_ref: request.owner_ref,
        shape,
        priority: request.priority,
        active: request.active,
        capacity_per_day: request.capacity_per_day,
    };
    state.store.areas.write().await.insert(area.id, area.clone());
    Ok(area)
}

#[derive(Debug, Deserialize)]
pub struct ServiceabilityRequest {
    pub lat: f64,
    pub lng: f64,
    pub service_kind: ServiceKind,
}

#[derive(Debug, Serialize)]
pub struct ServiceabilityResponse {
    pub in_area: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub area_id: Option<Uuid>,
}

#[tracing::instrument(skip_all)]
pub async fn check_serviceability(
    State(state): State<AppState>,
    Json(request): Json<ServiceabilityRequest>,
) -> Result<Json<ServiceabilityResponse>, AppError> {
    let point = Point::new(request.lat, request.lng);
    if !point.in_bounds() {
        return Err(ValidationError::CoordinateOutOfRange.into());
    }
    let areas = state.store.areas.read().await;
    let hit = resolve(point, request.service_kind, areas.values());
    Ok(Json(ServiceabilityResponse {
        in_area: hit.is_some(),
        area_id: hit.map(|a| a.id),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_ring() -> Vec<Point> {
        vec![
            Point::new(0.0, 0.0),
            Point::new(0.0, 2.0),
            Point::new(2.0, 2.0),
            Point::new(2.0, 0.0),
        ]
    }

    fn area(kind: ServiceKind, shape: Shape, priority: i32, active: bool, id: u128) -> ServiceArea {
        ServiceArea {
            id: Uuid::from_u128(id),
            service_kind: kind,
            owner_ref: "depot-1".into(),
            shape,
            priority,
            active,
            capacity_per_day: None,
        }
    }

    #[test]
    fn normalization_closes_an_open_ring() {
        let shape = validate_and_normalize(Shape::Polygon { ring: open_ring() }).unwrap();
        let Shape::Polygon { ring } = shape else {
            panic!("expected polygon")
        };
        assert_eq!(ring.len(), 5);
        assert_eq!(ring.first(), ring.last());
    }

    #[test]
    fn normalization_drops_consecutive_duplicates() {
        let mut ring = open_ring();
        ring.insert(1, Point::new(0.0, 0.0));
        let shape = validate_and_normalize(Shape::Polygon { ring }).unwrap();
        let Shape::Polygon { ring } = shape else {
            panic!("expected polygon")
        };
        assert_eq!(ring.len(), 5);
    }

    #[test]
    fn normalization_is_a_fixed_point() {
        let once = validate_and_normalize(Shape::Polygon { ring: open_ring() }).unwrap();
        let twice = validate_and_normalize(once.clone()).unwrap();
        assert_eq!(once, twice);

        let circle = validate_and_normalize(Shape::Circle {
            center: Point::new(10.0, 20.0),
            radius_m: 1000.0,
        })
        .unwrap();
        assert_eq!(circle, validate_and_normalize(circle.clone()).unwrap());
    }

    #[test]
    fn too_few_distinct_vertices_is_rejected() {
        let ring = vec![
            Point::new(0.0, 0.0),
            Point::new(0.0, 0.0),
            Point::new(1.0, 1.0),
            Point::new(0.0, 0.0),
        ];
        assert_eq!(
            validate_and_normalize(Shape::Polygon { ring }),
            Err(ValidationError::TooFewVertices)
        );
    }

    #[test]
    fn bad_circles_are_rejected() {
        assert_eq!(
            validate_and_normalize(Shape::Circle {
                center: Point::new(0.0, 0.0),
                radius_m: 0.0,
            }),
            Err(ValidationError::NonPositiveRadius)
        );
        assert_eq!(
            validate_and_normalize(Shape::Circle {
                center: Point::new(f64::NAN, 0.0),
                radius_m: 10.0,
            }),
            Err(ValidationError::NonFiniteCenter)
        );
    }

    #[test]
    fn vertex_buffer_undo_then_finish() {
        let mut buffer = VertexBuffer::new();
        buffer.push(Point::new(0.0, 0.0));
        buffer.push(Point::new(0.0, 2.0));
        buffer.push(Point::new(2.0, 2.0));
        buffer.push(Point::new(9.0, 9.0));
        assert_eq!(buffer.undo_last(), Some(Point::new(9.0, 9.0)));
        assert_eq!(buffer.len(), 3);
        assert!(buffer.finish().is_ok());

        buffer.undo_last();
        assert_eq!(buffer.finish(), Err(ValidationError::TooFewVertices));
    }

    #[test]
    fn resolve_ignores_inactive_and_foreign_kinds() {
        let shape = validate_and_normalize(Shape::Polygon { ring: open_ring() }).unwrap();
        let areas = vec![
            area(ServiceKind::Delivery, shape.clone(), 0, false, 1),
            area(ServiceKind::LabCollection, shape.clone(), 0, true, 2),
        ];
        assert!(resolve(Point::new(1.0, 1.0), ServiceKind::Delivery, &areas).is_none());
    }

    #[test]
    fn resolve_prefers_lowest_priority_then_lowest_id() {
        let shape = validate_and_normalize(Shape::Polygon { ring: open_ring() }).unwrap();
        let areas = vec![
            area(ServiceKind::Delivery, shape.clone(), 5, true, 1),
            area(ServiceKind::Delivery, shape.clone(), 2, true, 9),
            area(ServiceKind::Delivery, shape.clone(), 2, true, 3),
        ];
        let winner = resolve(Point::new(1.0, 1.0), ServiceKind::Delivery, &areas).unwrap();
        assert_eq!(winner.priority, 2);
        assert_eq!(winner.id, Uuid::from_u128(3));
    }

    #[test]
    fn resolve_outside_every_area_is_none() {
        let shape = validate_and_normalize(Shape::Polygon { ring: open_ring() }).unwrap();
        let areas = vec![area(ServiceKind::Delivery, shape, 0, true, 1)];
        assert!(resolve(Point::new(5.0, 5.0), ServiceKind::Delivery, &areas).is_none());
    }

    #[test]
    fn circle_area_resolves_membership() {
        let shape = Shape::Circle {
            center: Point::new(10.0, 20.0),
            radius_m: 1000.0,
        };
        let areas = vec![area(ServiceKind::LabCollection, shape, 0, true, 1)];
        assert!(resolve(Point::new(10.0, 20.0), ServiceKind::LabCollection, &areas).is_some());
        assert!(resolve(Point::new(11.0, 20.0), ServiceKind::LabCollection, &areas).is_none());
    }
}
