//! Shared error types

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The user rejected the request in the approval dialog
pub const USER_DECLINED: i32 = 4001;
/// The requested method or account has not been authorized by the user
pub const UNAUTHORIZED: i32 = 4100;
/// Unexpected provider-side failure, also used when a session ends
pub const UNEXPECTED: i32 = 4900;
/// Parameters for the method failed schema validation
pub const INVALID_REQUEST: i32 = -32000;
/// Anything else; the host forces a disconnect when it answers with this
pub const INTERNAL_ERROR: i32 = -32603;

/// Core errors shared between host and page
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid signing secret: {0}")]
    InvalidSecret(String),
}

/// Error carried back to page code for every rejected call.
///
/// Callers branch on `code` (for example 4001 to show a quiet "cancelled"
/// state instead of an alarm).
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{message} (code {code})")]
pub struct ProviderError {
    pub code: i32,
    pub message: String,
}

impl ProviderError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn user_declined() -> Self {
        Self::new(USER_DECLINED, "User declined the request")
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::new(UNEXPECTED, message)
    }

    pub fn session_ended() -> Self {
        Self::new(UNEXPECTED, "Session ended")
    }

    pub fn internal() -> Self {
        Self::new(INTERNAL_ERROR, "Something went wrong")
    }

    pub fn is_user_declined(&self) -> bool {
        self.code == USER_DECLINED
    }
}
