use crate::config;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Liveness plus a summary of whether the bridge can actually serve sessions.
///
/// The service itself is healthy even without a credential; every session would
/// just be refused in `INIT`, so that is reported as `"degraded"`.
pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();
    let credential_configured = config::credential_configured();

    let session_usage = metrics.active_sessions as f64 / config.session.max_concurrent_sessions.max(1) as f64;
    let load = if session_usage > 0.9 {
        "high_load"
    } else if session_usage > 0.7 {
        "moderate_load"
    } else {
        "normal"
    };

    HttpResponse::Ok().json(json!({
        "status": if credential_configured { "healthy" } else { "degraded" },
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "bridge": {
            "credential_configured": credential_configured,
            "upstream_url": config.upstream.url,
            "model_id": config.upstream.model_id,
            "active_sessions": metrics.active_sessions,
            "max_sessions": config.session.max_concurrent_sessions,
            "load": load
        }
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();

    let mut endpoint_stats = Vec::new();
    for (endpoint, metric) in metrics.endpoint_metrics.iter() {
        endpoint_stats.push(json!({
            "endpoint": endpoint,
            "request_count": metric.request_count,
            "error_count": metric.error_count,
            "error_rate": metric.error_rate(),
            "average_duration_ms": metric.average_duration_ms(),
            "total_duration_ms": metric.total_duration_ms
        }));
    }

    let bridge = &metrics.bridge;

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": if metrics.request_count > 0 {
                metrics.error_count as f64 / metrics.request_count as f64
            } else {
                0.0
            },
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "bridge": {
            "active_sessions": metrics.active_sessions,
            "sessions_started": bridge.sessions_started,
            "sessions_rejected": bridge.sessions_rejected,
            "upstream_failures": bridge.upstream_failures,
            "frames_to_upstream": bridge.frames_to_upstream,
            "events_to_client": bridge.events_to_client,
            "discarded_messages": bridge.discarded_messages,
            "send_failures": bridge.send_failures
        },
        "endpoints": endpoint_stats
    }))
}
