use crate::domain::AdminId;
use crate::library::communication::event::Notification;
use serde::{Deserialize, Serialize};

/// Another service asks the admin service to look up an administrator
///
/// Published fire-and-forget, any answer has to be published separately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminInfoRequestedNotification {
    /// Administrator to look up
    pub admin_id: AdminId,
}

impl Notification for AdminInfoRequestedNotification {
    fn topic() -> &'static str {
        "admin.getAdminInfo"
    }
}
