//! Client for the external routing provider. The provider is a black
//! box that turns an origin/destination pair into a route duration;
//! every call is bounded by a timeout and degrades to a straight-line
//! estimate so ingestion never waits on a dead upstream.

use std::{env, time::Duration};

use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::warn;

use crate::geo::Point;

/// Fallback speed for straight-line ETAs, roughly a 25 km/h urban
/// courier average.
pub const ASSUMED_AVG_SPEED_MPS: f64 = 6.944;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
enum RoutingError {
    #[error("ROUTING_URL not configured")]
    NotConfigured,
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("upstream status {0}")]
    Upstream(reqwest::StatusCode),
    #[error("malformed route response")]
    Malformed,
}

#[derive(Debug, Deserialize)]
struct RouteResponse {
    duration_seconds: f64,
}

#[derive(Clone)]
pub struct RoutingClient {
    client: reqwest::Client,
    base_url: Option<String>,
}

impl RoutingClient {
    /// `None` means every ETA uses the straight-line fallback, which is
    /// a valid deployment for regions without a routing contract.
    pub fn new(base_url: Option<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { client, base_url })
    }

    pub fn from_env() -> Result<Self, reqwest::Error> {
        Self::new(env::vars().find(|v| v.0.eq("ROUTING_URL")).map(|v| v.1))
    }

    /// ETA in whole minutes for the remaining leg. Falls back to the
    /// straight-line estimate when the provider is unconfigured,
    /// unreachable, slow, or replies nonsense; the fallback is logged,
    /// never surfaced to the caller.
    pub async fn eta_minutes(&self, from: Point, to: Point, straight_line_m: f64) -> i64 {
        match self.route_duration(from, to).await {
            Ok(seconds) => (seconds / 60.0).ceil() as i64,
            Err(RoutingError::NotConfigured) => straight_line_eta_minutes(straight_line_m),
            Err(err) => {
                warn!(
                    message = "routing provider unavailable, using straight-line ETA",
                    error = %err
                );
                straight_line_eta_minutes(straight_line_m)
            }
        }
    }

    async fn route_duration(&self, from: Point, to: Point) -> Result<f64, RoutingError> {
        let Some(base) = &self.base_url else {
            return Err(RoutingError::NotConfigured);
        };
        let response = self
            .client
            .post(format!("{base}/route"))
            .json(&json!({
                "from": { "lat": from.lat, "lng": from.lng },
                "to": { "lat": to.lat, "lng": to.lng },
            }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(RoutingError::Upstream(response.status()));
        }
        let body: RouteResponse = response.json().await?;
        if !body.duration_seconds.is_finite() || body.duration_seconds < 0.0 {
            return Err(RoutingError::Malformed);
        }
        Ok(body.duration_seconds)
    }
}

pub fn straight_line_eta_minutes(distance_m: f64) -> i64 {
    (distance_m / ASSUMED_AVG_SPEED_MPS / 60.0).ceil() as i64
}
