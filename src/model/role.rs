use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, ToSchema, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    Admin,
    Employee,
}

impl Role {
    /// Anything other than `admin` provisions a regular employee.
    pub fn from_requested(requested: Option<&str>) -> Self {
        match requested.map(str::trim) {
            Some("admin") => Role::Admin,
            _ => Role::Employee,
        }
    }
}
