//! Error types for loqa-live.

use std::time::Duration;
use thiserror::Error;

use crate::session::{SessionKey, SessionState};

/// Errors surfaced by the session pipeline and its control channel.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("Session {0} not found")]
    SessionNotFound(SessionKey),

    #[error("Session {0} already has a broadcaster")]
    SessionConflict(SessionKey),

    #[error("Engine call timed out after {0:?}")]
    EngineTimeout(Duration),

    #[error("Engine failed after {attempts} attempts: {message}")]
    EngineFailure { attempts: u32, message: String },

    #[error("Subscriber {subscriber} could not keep up")]
    SlowConsumer { subscriber: u64 },

    #[error("Cannot {operation} while session is {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// A single failed call to a speech or translation engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("request failed: {0}")]
    Request(String),

    #[error("engine unavailable: {0}")]
    Unavailable(String),
}

impl EngineError {
    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, EngineError::Unavailable(_))
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            EngineError::Request("request timed out".to_string())
        } else {
            EngineError::Request(err.to_string())
        }
    }
}

impl From<EngineError> for SessionError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Timeout(after) => SessionError::EngineTimeout(after),
            other => SessionError::EngineFailure {
                attempts: 1,
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_not_found_display() {
        let key = SessionKey::from_string("abc123");
        let error = SessionError::SessionNotFound(key);
        assert_eq!(error.to_string(), "Session abc123 not found");
    }

    #[test]
    fn test_invalid_state_display() {
        let error = SessionError::InvalidState {
            operation: "change languages",
            state: SessionState::Ended,
        };
        assert_eq!(
            error.to_string(),
            "Cannot change languages while session is ended"
        );
    }

    #[test]
    fn test_engine_failure_display() {
        let error = SessionError::EngineFailure {
            attempts: 3,
            message: "timed out after 2s".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Engine failed after 3 attempts: timed out after 2s"
        );
    }

    #[test]
    fn test_unavailable_is_not_retryable() {
        assert!(EngineError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(EngineError::Request("502".into()).is_retryable());
        assert!(!EngineError::Unavailable("no api key".into()).is_retryable());
    }

    #[tokio::test]
    async fn test_reqwest_timeout_maps_to_request_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _server = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(50))
            .build()
            .unwrap();
        let err = client
            .get(format!("http://{}/", addr))
            .send()
            .await
            .unwrap_err();
        assert!(err.is_timeout());

        let mapped = EngineError::from(err);
        assert_eq!(mapped, EngineError::Request("request timed out".to_string()));
        assert_eq!(mapped.to_string(), "request failed: request timed out");
    }
}
