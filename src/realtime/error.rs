//! Error taxonomy for the realtime core (§7).
//!
//! These are distinct from [`crate::error::ApiError`]: `ApiError` renders to
//! an HTTP status via Salvo's `Scribe`, while `RealtimeError` renders to an
//! `error` frame on an open WebSocket connection. A connection that hits one
//! of these stays open unless the variant is explicitly `Fatal`.
use thiserror::Error;

use crate::realtime::protocol::{ErrorCode, ErrorPayload};

#[derive(Debug, Error, Clone)]
pub enum RealtimeError {
    #[error("malformed frame: {0}")]
    BadFrame(String),
    #[error("unknown message type: {0}")]
    UnknownType(String),
    #[error("rate limited")]
    RateLimited,
    #[error("validation failed: {field}: {message}")]
    ValidationFailed { field: String, message: String },
    #[error("unauthorized")]
    Unauthorized,
    #[error("not subscribed to requested resource")]
    NotSubscribed,
    #[error("internal error")]
    Internal,
}

impl RealtimeError {
    /// Whether this error should close the connection once reported, per the
    /// fatal/reported split in §7.
    pub fn is_fatal(&self) -> bool {
        false
    }

    pub fn to_payload(&self) -> ErrorPayload {
        match self {
            Self::BadFrame(details) => {
                ErrorPayload::new(ErrorCode::BadFrame, "malformed frame")
                    .with_details(details.clone())
            }
            Self::UnknownType(t) => ErrorPayload::new(
                ErrorCode::UnknownType,
                format!("unrecognized message type `{t}`"),
            ),
            Self::RateLimited => ErrorPayload::new(
                ErrorCode::RateLimited,
                "too many messages, slow down",
            ),
            Self::ValidationFailed { field, message } => ErrorPayload::new(
                ErrorCode::ValidationFailed,
                format!("{field}: {message}"),
            ),
            Self::Unauthorized => {
                ErrorPayload::new(ErrorCode::Unauthorized, "not authorized")
            }
            Self::NotSubscribed => ErrorPayload::new(
                ErrorCode::NotSubscribed,
                "not subscribed to this resource",
            ),
            // Never leak internal detail to the peer.
            Self::Internal => {
                ErrorPayload::new(ErrorCode::Internal, "internal error")
            }
        }
    }
}
