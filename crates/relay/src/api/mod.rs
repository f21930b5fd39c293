//! HTTP/WebSocket surface assembly (spec.md §6 "External interfaces").
//!
//! Grounded in the teacher's `main.rs` router assembly: CORS with a
//! wildcard-port origin predicate, `tower_http::trace::TraceLayer`, and a
//! single `Router` carrying `AppState`.

pub mod stats;
pub mod ws;

use axum::http::Method;
use axum::routing::get;
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    let prefix = state.config.server.path_prefix.clone();
    let cors = build_cors_layer(state.config.server.cors.allowed_origins.clone());

    Router::new()
        .route(&format!("{prefix}/:session_id"), get(ws::upgrade_with_path))
        .route(&prefix, get(ws::upgrade_with_query))
        .route("/ws/stats", get(stats::stats))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Build a CORS layer that accepts an exact origin or a `scheme://host:*`
/// wildcard-port pattern, mirroring the teacher's `build_cors_layer`.
fn build_cors_layer(allowed_origins: Vec<String>) -> CorsLayer {
    CorsLayer::new().allow_methods([Method::GET]).allow_origin(AllowOrigin::predicate(move |origin, _parts| {
        let Ok(origin) = origin.to_str() else {
            return false;
        };
        allowed_origins.iter().any(|pattern| origin_matches(pattern, origin))
    }))
}

fn origin_matches(pattern: &str, origin: &str) -> bool {
    match pattern.strip_suffix(":*") {
        Some(prefix) => origin.starts_with(prefix) && origin[prefix.len()..].starts_with(':'),
        None => pattern == origin,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_port_matches_any_port() {
        assert!(origin_matches("http://localhost:*", "http://localhost:5173"));
        assert!(origin_matches("http://localhost:*", "http://localhost:3000"));
    }

    #[test]
    fn wildcard_port_rejects_different_host() {
        assert!(!origin_matches("http://localhost:*", "http://example.com:3000"));
    }

    #[test]
    fn exact_pattern_requires_exact_match() {
        assert!(origin_matches("https://app.example.com", "https://app.example.com"));
        assert!(!origin_matches("https://app.example.com", "https://app.example.com:443"));
    }
}
