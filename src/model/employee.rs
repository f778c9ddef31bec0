use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::model::attendance::EmployeeId;
use crate::model::role::Role;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
#[schema(
    example = json!({
        "userId": "1a2b3c4d-5e6f-7081-92a3-b4c5d6e7f809",
        "employeeId": "EMP-1A2B3C4D",
        "name": "John Doe",
        "email": "john.doe@company.com",
        "department": "Engineering",
        "role": "employee",
        "joinDate": "2026-01-01",
        "isActive": true,
        "createdAt": "2026-01-01T00:00:00Z",
        "updatedAt": "2026-01-01T00:00:00Z"
    })
)]
pub struct Employee {
    #[schema(example = "1a2b3c4d-5e6f-7081-92a3-b4c5d6e7f809")]
    pub user_id: String,

    pub employee_id: EmployeeId,

    #[schema(example = "John Doe")]
    pub name: String,

    #[schema(example = "john.doe@company.com")]
    pub email: String,

    #[schema(example = "Engineering")]
    pub department: String,

    pub role: Role,

    #[schema(
        example = "2026-01-01",
        value_type = String,
        format = "date"
    )]
    pub join_date: NaiveDate,

    pub is_active: bool,

    #[schema(format = "date-time", value_type = String)]
    pub created_at: DateTime<Utc>,

    #[schema(format = "date-time", value_type = String)]
    pub updated_at: DateTime<Utc>,
}
