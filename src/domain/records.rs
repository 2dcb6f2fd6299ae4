use serde::{Deserialize, Serialize};

/// Unique identifier of an administrator
pub type AdminId = String;

/// Unique identifier of an end user
pub type UserId = String;

/// Administrator as exposed to other services
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Admin {
    /// Unique identifier
    pub id: AdminId,
    /// Login email address
    pub email: String,
    /// Phone number
    #[serde(default)]
    pub phone: Option<String>,
    /// First name
    pub name: String,
    /// Last name
    pub surname: String,
    /// Permission level, higher values may manage lower ones
    pub role: u32,
    /// Location the admin is responsible for
    #[serde(default)]
    pub location: Option<String>,
    /// Admin who created this account
    #[serde(default)]
    pub who_create: Option<AdminId>,
}

/// End user as exposed to other services
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Unique identifier
    pub id: UserId,
    /// First name
    pub name: String,
    /// Last name
    pub surname: String,
    /// Login email address
    pub email: String,
    /// Phone number
    #[serde(default)]
    pub phone: Option<String>,
}
