use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Category of a business failure reported by a responder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// Request payload failed validation
    ValidationError,
    /// Referenced entity does not exist
    NotFoundError,
    /// Request conflicts with the current state
    ConflictError,
    /// Requesting party lacks permission
    ForbiddenError,
    /// Anything not covered above
    #[serde(other)]
    Other,
}

/// Business failure extracted from an unsuccessful [`ServiceReply`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{} ({:?})", .message.as_deref().unwrap_or("request failed"), .kind)]
pub struct ServiceFailure {
    /// Category of the failure, [`FailureKind::Other`] if none was given
    pub kind: FailureKind,
    /// Human readable explanation
    pub message: Option<String>,
    /// HTTP-like status code
    pub code: Option<u16>,
}

/// Reply without any payload besides the common fields
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoData {}

/// Common reply shape used by every responder of the platform
///
/// Responders report business failures through `success: false` rather than by failing,
/// so the requester receives a reply instead of running into a timeout. Reply specific
/// fields live at the same level as the common ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceReply<T> {
    /// Whether the request has been fulfilled
    pub success: bool,
    /// Human readable summary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Failure category, only present on failures
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<FailureKind>,
    /// HTTP-like status code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    /// Request payload as seen by the responder
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received_data: Option<Value>,
    /// Time the reply has been created
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Reply specific content
    #[serde(flatten)]
    pub data: T,
}

impl<T> ServiceReply<T> {
    /// Successful reply carrying data
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            error: None,
            code: None,
            received_data: None,
            timestamp: Some(Utc::now()),
            data,
        }
    }

    /// Attaches the request payload the reply refers to
    pub fn echoing(mut self, received_data: Value) -> Self {
        self.received_data = Some(received_data);
        self
    }

    /// Converts the reply into its data, or the failure it reports
    pub fn into_result(self) -> Result<T, ServiceFailure> {
        if self.success {
            Ok(self.data)
        } else {
            Err(ServiceFailure {
                kind: self.error.unwrap_or(FailureKind::Other),
                message: self.message,
                code: self.code,
            })
        }
    }
}

impl<T: Default> ServiceReply<T> {
    /// Unsuccessful reply without data
    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(kind),
            ..Self::ok(message, T::default())
        }
    }
}
