//! Requests answered by the user authentication service

use crate::domain::{ServiceReply, User};
use crate::library::communication::event::Notification;
use crate::library::communication::request::Request;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Name of the service answering these requests, used as queue name prefix
pub const USER_AUTH_SERVICE: &str = "user-auth-service";

/// Reply data of [`GetUsersRequest`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserList {
    /// Users found
    #[serde(default)]
    pub users: Vec<User>,
}

/// Lists every registered user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetUsersRequest {
    /// Time the request has been created
    pub timestamp: DateTime<Utc>,
}

impl Default for GetUsersRequest {
    fn default() -> Self {
        Self {
            timestamp: Utc::now(),
        }
    }
}

impl Notification for GetUsersRequest {
    fn topic() -> &'static str {
        "user.auth.getUsers"
    }
}

impl Request for GetUsersRequest {
    type Response = ServiceReply<UserList>;
}
