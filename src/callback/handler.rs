use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};

use crate::callback::events::CallbackEvent;
use crate::callback::registry::Disposition;
use crate::matrix::CorrelationKey;
use crate::server::AppState;

/// Receives result batches, terminal signals and status updates from remote jobs.
///
/// The endpoint is public, so anything that does not belong to a pending run
/// is dropped without touching the registry.
pub async fn handle_callback(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let key = match headers
        .get(state.callback_header())
        .and_then(|v| v.to_str().ok())
    {
        Some(key) => CorrelationKey::from(key),
        None => {
            tracing::debug!("Callback without correlation header, ignoring");
            return StatusCode::BAD_REQUEST;
        }
    };

    let event = match CallbackEvent::parse(&body) {
        Ok(event) => event,
        Err(e) => {
            tracing::debug!(key = %key, error = %e, "Malformed callback body, ignoring");
            return StatusCode::BAD_REQUEST;
        }
    };

    match state.registry.on_event(&key, event).await {
        Disposition::UnknownKey => {
            tracing::debug!(key = %key, "Callback for unknown or finished run, ignoring");
        }
        Disposition::Buffered(rows) => {
            tracing::debug!(key = %key, rows, "Buffered result batch");
        }
        Disposition::Finalized(rows) => {
            tracing::info!(key = %key, rows, "Run finished");
        }
        Disposition::Ignored => {}
    }

    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::results::ResultRow;

    fn state() -> Arc<AppState> {
        Arc::new(AppState::new(AppConfig::sample()).unwrap())
    }

    fn headers(key: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-correlation-key", key.parse().unwrap());
        headers
    }

    async fn post(state: &Arc<AppState>, headers: HeaderMap, body: &'static str) -> StatusCode {
        handle_callback(State(Arc::clone(state)), headers, Bytes::from_static(body.as_bytes()))
            .await
    }

    #[tokio::test]
    async fn test_batches_then_terminal_resolve_listener() {
        let state = state();
        let key = CorrelationKey::from("0|wf|chrome|alert");
        let listener = state.registry.register(key).await.unwrap();

        let batch_one = r#"{"status":"COMPLETED","testCsvRow":1,"responses":["A"]}"#;
        let batch_two = r#"{"status":"COMPLETED","testCsvRow":2,"responses":["B"]}"#;
        let terminal = r#"{"status":"COMPLETED"}"#;

        let h = || headers("0|wf|chrome|alert");
        assert_eq!(post(&state, h(), batch_one).await, StatusCode::OK);
        assert_eq!(post(&state, h(), batch_two).await, StatusCode::OK);
        assert_eq!(post(&state, h(), terminal).await, StatusCode::OK);

        assert_eq!(
            listener.wait().await.unwrap(),
            vec![
                ResultRow::new(1, vec!["A".into()]),
                ResultRow::new(2, vec!["B".into()]),
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_header_is_rejected() {
        let state = state();
        let status = post(&state, HeaderMap::new(), r#"{"status":"COMPLETED"}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_malformed_body_leaves_run_untouched() {
        let state = state();
        let key = CorrelationKey::from("0|wf|chrome|alert");
        let _listener = state.registry.register(key.clone()).await.unwrap();

        let status = post(&state, headers("0|wf|chrome|alert"), "{oops").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(state.registry.pending_count().await, 1);
        assert!(state.registry.buffered_rows(&key).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_key_is_accepted_and_ignored() {
        let state = state();
        let key = CorrelationKey::from("0|wf|chrome|alert");
        let _listener = state.registry.register(key.clone()).await.unwrap();

        let body = r#"{"status":"COMPLETED","testCsvRow":1,"responses":["A"]}"#;
        assert_eq!(post(&state, headers("stale-key"), body).await, StatusCode::OK);
        assert_eq!(state.registry.pending_count().await, 1);
        assert!(state.registry.buffered_rows(&key).await.unwrap().is_empty());
    }
}
