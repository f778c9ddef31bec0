use serde::{Deserialize, Serialize};

use crate::model::role::Role;

/// Login identity held by the identity service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    pub email: String,
    pub display_name: String,
    pub password_hash: String,
    pub role: Role,
    pub is_active: bool,
}
