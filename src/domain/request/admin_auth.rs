//! Requests answered by the admin authentication service

use crate::domain::{Admin, AdminId, NoData, ServiceReply};
use crate::library::communication::event::Notification;
use crate::library::communication::request::Request;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Name of the service answering these requests, used as queue name prefix
pub const ADMIN_AUTH_SERVICE: &str = "admin-auth-service";

/// Reply data of requests looking up a single administrator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminData {
    /// Administrator found, absent on failure
    #[serde(default)]
    pub admin: Option<Admin>,
}

/// Reply data of requests listing administrators
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminList {
    /// Administrators found
    #[serde(default)]
    pub admins: Vec<Admin>,
}

/// Checks that the admin authentication service is reachable and answering
///
/// The responder echoes the request back in [`ServiceReply::received_data`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCommunicationRequest {
    /// Free text
    pub message: String,
    /// Arbitrary content which is echoed back
    #[serde(default)]
    pub test_data: Value,
    /// Time the request has been created
    pub timestamp: DateTime<Utc>,
}

impl TestCommunicationRequest {
    /// Creates a new request with the current time
    pub fn new(message: impl Into<String>, test_data: Value) -> Self {
        Self {
            message: message.into(),
            test_data,
            timestamp: Utc::now(),
        }
    }
}

impl Notification for TestCommunicationRequest {
    fn topic() -> &'static str {
        "admin.auth.testCommunication"
    }
}

impl Request for TestCommunicationRequest {
    type Response = ServiceReply<NoData>;
}

/// Fetches the profile of the requesting administrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetMeRequest {
    /// Administrator to fetch
    pub admin_id: AdminId,
    /// Time the request has been created
    pub timestamp: DateTime<Utc>,
}

impl Notification for GetMeRequest {
    fn topic() -> &'static str {
        "admin.auth.getMe"
    }
}

impl Request for GetMeRequest {
    type Response = ServiceReply<AdminData>;
}

/// Looks up an administrator by id on behalf of another administrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetAdminWithIdRequest {
    /// Administrator to look up
    pub admin_id: AdminId,
    /// Administrator issuing the lookup
    pub creator_admin_id: AdminId,
}

impl Notification for GetAdminWithIdRequest {
    fn topic() -> &'static str {
        "admin.auth.getAdminWithId"
    }
}

impl Request for GetAdminWithIdRequest {
    type Response = ServiceReply<AdminData>;
}

/// Looks up an administrator by email address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetAdminWithEmailRequest {
    /// Email address to search for
    pub email: String,
    /// Administrator issuing the lookup
    pub creator_admin_id: AdminId,
}

impl Notification for GetAdminWithEmailRequest {
    fn topic() -> &'static str {
        "admin.auth.getAdminWithEmail"
    }
}

impl Request for GetAdminWithEmailRequest {
    type Response = ServiceReply<AdminData>;
}

/// Looks up an administrator by phone number
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetAdminWithPhoneRequest {
    /// Phone number to search for
    pub phone: String,
    /// Administrator issuing the lookup
    pub creator_admin_id: AdminId,
}

impl Notification for GetAdminWithPhoneRequest {
    fn topic() -> &'static str {
        "admin.auth.getAdminWithPhone"
    }
}

impl Request for GetAdminWithPhoneRequest {
    type Response = ServiceReply<AdminData>;
}

/// Lists every administrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetAdminsRequest {
    /// Administrator issuing the lookup
    pub creator_admin_id: AdminId,
}

impl Notification for GetAdminsRequest {
    fn topic() -> &'static str {
        "admin.auth.getAdmins"
    }
}

impl Request for GetAdminsRequest {
    type Response = ServiceReply<AdminList>;
}

/// Blocks an administrator with a lower role than the requesting one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockAdminRequest {
    /// Administrator to block
    pub admin_id: AdminId,
    /// Administrator issuing the block
    pub creator_admin_id: AdminId,
}

impl Notification for BlockAdminRequest {
    fn topic() -> &'static str {
        "admin.auth.blockAdmin"
    }
}

impl Request for BlockAdminRequest {
    type Response = ServiceReply<NoData>;
}

/// Lifts the block of an administrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnblockAdminRequest {
    /// Administrator to unblock
    pub admin_id: AdminId,
    /// Administrator lifting the block
    pub creator_admin_id: AdminId,
}

impl Notification for UnblockAdminRequest {
    fn topic() -> &'static str {
        "admin.auth.unblockAdmin"
    }
}

impl Request for UnblockAdminRequest {
    type Response = ServiceReply<NoData>;
}

/// Marks the requesting administrator as deleted and ends their sessions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteMeRequest {
    /// Administrator to delete
    pub admin_id: AdminId,
}

impl Notification for DeleteMeRequest {
    fn topic() -> &'static str {
        "admin.auth.deleteMe"
    }
}

impl Request for DeleteMeRequest {
    type Response = ServiceReply<NoData>;
}
