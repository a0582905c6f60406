//! HTTP surface (§4.8/§4.9 equivalent): a thin axum layer over
//! [`OrchestrationHandle`]. Every handler reads or forwards through the
//! handle — no state lives here beyond the clone axum hands each request.

use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

use crate::orchestration::OrchestrationHandle;
use crate::persistence::RadarPersistedConfig;

pub fn router(handle: OrchestrationHandle) -> Router {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any).allow_origin(Any);

    Router::new()
        .route("/healthz", get(healthz))
        .route("/snapshot", get(snapshot))
        .route("/ownship", get(ownship))
        .route("/health", get(health))
        .route("/engage/:id", post(engage))
        .route("/disengage", post(disengage))
        .route("/radar/connect", post(radar_connect))
        .route("/radar/start", post(radar_start))
        .route("/radar/stop", post(radar_stop))
        .route("/radar/disconnect", post(radar_disconnect))
        .route("/radar/configure", post(radar_configure))
        .layer(cors)
        .with_state(handle)
}

async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn snapshot(State(handle): State<OrchestrationHandle>) -> Json<Value> {
    let now = Instant::now();
    let tracks: Vec<Value> = handle
        .snapshot()
        .into_iter()
        .map(|t| {
            json!({
                "id": t.id,
                "azimuthDeg": t.azimuth_deg,
                "elevationDeg": t.elevation_deg,
                "rangeM": t.range_m,
                "velocityMps": t.velocity_mps,
                "rangeRateMps": t.range_rate_mps,
                "source": format!("{:?}", t.source).to_uppercase(),
                "trackType": format!("{:?}", t.track_type).to_uppercase(),
                "classification": t.classification,
                "confidence": t.confidence,
                "threatScore": t.threat_score,
                "numUpdates": t.num_updates,
                "ageSecs": t.age_secs(now),
                "rfIntel": t.rf_intel.as_ref().map(|i| json!({
                    "aircraftModel": i.aircraft_model,
                    "serial": i.serial,
                    "pilotLat": i.pilot_lat,
                    "pilotLon": i.pilot_lon,
                    "frequencyHz": i.frequency_hz,
                    "powerDbm": i.power_dbm,
                })),
            })
        })
        .collect();
    Json(json!({
        "tracks": tracks,
        "engagedId": handle.engaged(),
        "highestPriorityId": handle.highest_priority_id(),
    }))
}

async fn ownship(State(handle): State<OrchestrationHandle>) -> Json<Value> {
    match handle.ownship() {
        Some(o) => Json(json!({
            "latitude": o.latitude,
            "longitude": o.longitude,
            "altitudeM": o.altitude_m,
            "trueHeadingDeg": o.true_heading_deg,
            "groundSpeedMps": o.ground_speed_mps,
            "fixQuality": format!("{:?}", o.fix_quality).to_uppercase(),
            "headingValid": o.heading_valid,
            "hasValidFix": o.has_valid_fix(),
        })),
        None => Json(json!({ "fix": null })),
    }
}

async fn health(State(handle): State<OrchestrationHandle>) -> Json<Value> {
    let h = handle.health();
    Json(json!({
        "radar": format!("{:?}", h.radar).to_uppercase(),
        "rf": format!("{:?}", h.rf).to_uppercase(),
        "gnss": format!("{:?}", h.gnss).to_uppercase(),
    }))
}

#[derive(serde::Deserialize)]
struct EngageBody {
    operator_id: u64,
}

async fn engage(
    State(handle): State<OrchestrationHandle>,
    Path(track_id): Path<u64>,
    Json(body): Json<EngageBody>,
) -> (StatusCode, Json<Value>) {
    match handle.engage_track(track_id, body.operator_id).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "engaged": track_id }))),
        Err(e) => {
            warn!(target: "c2_core::api", "engage failed: {e}");
            (StatusCode::CONFLICT, Json(json!({ "error": e.to_string() })))
        }
    }
}

async fn disengage(State(handle): State<OrchestrationHandle>) -> (StatusCode, Json<Value>) {
    match handle.disengage_track().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "engaged": serde_json::Value::Null }))),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": e.to_string() }))),
    }
}

async fn radar_connect(State(handle): State<OrchestrationHandle>) -> (StatusCode, Json<Value>) {
    respond(handle.connect_radar().await)
}

async fn radar_start(State(handle): State<OrchestrationHandle>) -> (StatusCode, Json<Value>) {
    respond(handle.start_radar().await)
}

async fn radar_stop(State(handle): State<OrchestrationHandle>) -> (StatusCode, Json<Value>) {
    respond(handle.stop_radar().await)
}

async fn radar_disconnect(State(handle): State<OrchestrationHandle>) -> (StatusCode, Json<Value>) {
    respond(handle.disconnect_radar().await)
}

async fn radar_configure(
    State(handle): State<OrchestrationHandle>,
    Json(cfg): Json<RadarPersistedConfig>,
) -> (StatusCode, Json<Value>) {
    respond(handle.configure_radar(cfg).await)
}

fn respond(result: c2_types::C2Result<()>) -> (StatusCode, Json<Value>) {
    match result {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "ok" }))),
        Err(e) => {
            warn!(target: "c2_core::api", "command failed: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": e.to_string() })))
        }
    }
}
