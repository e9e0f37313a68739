use std::{env, process::abort, sync::Arc, time::Duration};

use axum::{
    Router,
    body::Body,
    http::{Request, Response, StatusCode},
    routing::{get, post, put},
};
use error::AppError;
use opentelemetry::{global, trace::TracerProvider};
use opentelemetry_sdk::trace::SdkTracerProvider;
use tokio::signal;
use tower_http::{classify::ServerErrorsFailureClass, trace::TraceLayer};
use tracing::{Span, error, info, warn};
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::{Layer, layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use crate::{
    area::{check_serviceability, create_area, update_area},
    fee::{create_depot, quote_fee},
    routing::RoutingClient,
    session::{SessionRegistry, session_status, start_session, stop_session},
    store::Store,
    tracking::{create_job, ingest_location, public_track, staff_track, update_job_status},
};

mod area;
mod error;
mod fee;
mod geo;
mod routing;
mod session;
mod store;
mod tracking;

#[derive(Clone)]
struct AppState {
    store: Arc<Store>,
    sessions: Arc<SessionRegistry>,
    ingest_token: String,
    routing: RoutingClient,
}

#[cfg(test)]
impl AppState {
    fn for_tests() -> Self {
        Self {
            store: Arc::new(Store::default()),
            sessions: Arc::new(SessionRegistry::default()),
            ingest_token: "test-push-token".to_string(),
            routing: RoutingClient::new(None).expect("reqwest client"),
        }
    }
}

#[tokio::main]
pub async fn main() -> Result<(), AppError> {
    match dotenvy::dotenv() {
        Ok(_) => info!("Loaded .env file"),
        Err(_) => warn!("Failed to load .env file"),
    };

    let Some((_, ingest_token)) = env::vars().find(|v| v.0.eq("INGEST_PUSH_TOKEN")) else {
        error!("Ingest push token not in environment");
        abort();
    };

    let tracer = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .build()?;

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(tracer)
        .build();

    global::set_tracer_provider(provider.clone());

    // Set up tracing with both console output and OpenTelemetry
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_filter(tracing_subscriber::filter::LevelFilter::INFO),
        )
        .with(
            OpenTelemetryLayer::new(provider.tracer("geotrack-service"))
                .with_filter(tracing_subscriber::filter::LevelFilter::INFO),
        )
        .init();

    let state = AppState {
        store: Arc::new(Store::default()),
        sessions: Arc::new(SessionRegistry::default()),
        ingest_token,
        routing: RoutingClient::from_env()?,
    };

    let app = Router::new()
        .route("/api/areas", post(create_area))
        .route("/api/areas/:id", put(update_area))
        .route("/api/serviceability", post(check_serviceability))
        .route("/api/depots", post(create_depot))
        .route("/api/fees/quote", post(quote_fee))
        .route("/api/jobs", post(create_job))
        .route("/api/jobs/:id/status", post(update_job_status))
        .route("/api/locations/:token", post(ingest_location))
        .route("/api/track/:kind/:job_id", get(staff_track))
        .route("/api/track/:kind/:job_id/public/:token", get(public_track))
        .route("/api/sessions/:owner_ref", get(session_status))
        .route("/api/sessions/:owner_ref/start", post(start_session))
        .route("/api/sessions/:owner_ref/stop", post(stop_session))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|_request: &Request<Body>| {
                    let request_id = Uuid::new_v4().to_string();
                    tracing::info_span!("http-request", %request_id)
                })
                .on_request(|request: &Request<Body>, _span: &Span| {
                    info!(
                        message = "request",
                        request = request.method().as_str(),
                        uri = request.uri().path().to_string(),
                        user_agent = request
                            .headers()
                            .get("user-agent")
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or("")
                    )
                })
                .on_response(
                    |response: &Response<Body>, latency: Duration, _span: &Span| {
                        info!(
                            message = "response_status",
                            status = response.status().as_u16(),
                            latency = latency.as_nanos()
                        )
                    },
                )
                .on_failure(
                    |error: ServerErrorsFailureClass, _latency: Duration, _span: &Span| {
                        error!(message = "error", error = error.to_string())
                    },
                ),
        )
        .with_state(state);

    let port: u16 = env::vars()
        .find(|v| v.0.eq("PORT"))
        .and_then(|v| v.1.parse().ok())
        .unwrap_or(3000);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .map_err(|e| {
            error!(message = "Failed to create TCP listener", error=%e);
            AppError::Status(StatusCode::SERVICE_UNAVAILABLE)
        })?;

    info!(message = "Starting server", port);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| {
            error!(message = "Failed to start server", error=%e);
            AppError::Status(StatusCode::SERVICE_UNAVAILABLE)
        })?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => {
            info!("Ctrl+C received, shutting down")
        },
        _ = terminate => {
            info!("SIGTERM received, shutting down")
        },
    }
}
