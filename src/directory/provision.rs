use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::Deserialize;
use tracing::{error, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{DirectoryError, EmployeeDirectory};
use crate::auth::password::hash_password;
use crate::model::attendance::EmployeeId;
use crate::model::employee::Employee;
use crate::model::role::Role;
use crate::model::user::User;

#[derive(Debug, Deserialize, ToSchema)]
pub struct NewEmployee {
    #[schema(example = "John Doe", value_type = String)]
    pub name: Option<String>,
    #[schema(example = "john.doe@company.com", format = "email", value_type = String)]
    pub email: Option<String>,
    #[schema(example = "s3cret-passw0rd", value_type = String)]
    pub password: Option<String>,
    #[schema(example = "Engineering", value_type = String)]
    pub department: Option<String>,
    /// `admin` or `employee`; anything else provisions an employee.
    #[schema(example = "employee")]
    pub role: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum ProvisionError {
    #[display(fmt = "{} is required", _0)]
    MissingField(&'static str),
    #[display(fmt = "Email already registered")]
    EmailTaken,
    #[display(fmt = "password hashing failed")]
    Hashing,
    #[display(fmt = "{}", _0)]
    Unavailable(String),
}

impl std::error::Error for ProvisionError {}

impl From<DirectoryError> for ProvisionError {
    fn from(e: DirectoryError) -> Self {
        match e {
            DirectoryError::EmailTaken => ProvisionError::EmailTaken,
            DirectoryError::Unavailable(reason) => ProvisionError::Unavailable(reason),
        }
    }
}

fn required<'a>(field: &'static str, value: &'a Option<String>) -> Result<&'a str, ProvisionError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(ProvisionError::MissingField(field))
}

/// `EMP-` followed by the first eight characters of the identity, uppercased.
pub fn employee_id_for(user_id: &str) -> EmployeeId {
    let prefix: String = user_id.chars().take(8).collect();
    EmployeeId::new(format!("EMP-{}", prefix.to_uppercase()))
}

/// Create a login identity plus its employee record.
#[instrument(name = "provision_employee", skip_all)]
pub async fn provision_employee(
    directory: &EmployeeDirectory,
    request: &NewEmployee,
    now: DateTime<Utc>,
) -> Result<Employee, ProvisionError> {
    let name = required("name", &request.name)?;
    let email = required("email", &request.email)?.to_lowercase();
    let department = required("department", &request.department)?;
    // the password is taken verbatim; only blank ones are refused
    let password = request
        .password
        .as_deref()
        .filter(|p| !p.trim().is_empty())
        .ok_or(ProvisionError::MissingField("password"))?;
    let role = Role::from_requested(request.role.as_deref());

    let password_hash = hash_password(password).map_err(|e| {
        error!(error = %e, "Failed to hash password");
        ProvisionError::Hashing
    })?;

    let user_id = Uuid::new_v4().to_string();
    let employee_id = employee_id_for(&user_id);

    let user = User {
        user_id: user_id.clone(),
        email: email.clone(),
        display_name: name.to_string(),
        password_hash,
        role,
        is_active: true,
    };
    let employee = Employee {
        user_id,
        employee_id,
        name: name.to_string(),
        email,
        department: department.to_string(),
        role,
        join_date: now.date_naive(),
        is_active: true,
        created_at: now,
        updated_at: now,
    };

    directory.store().create_identity(&user, &employee).await?;
    directory
        .remember(&employee.user_id, &employee.employee_id)
        .await;

    info!(
        employee_id = %employee.employee_id,
        role = %employee.role,
        "Provisioned employee"
    );
    Ok(employee)
}

/// Ensure an admin login exists for `email`; returns whether one was created.
pub async fn bootstrap_admin(
    directory: &EmployeeDirectory,
    email: &str,
    password: &str,
    now: DateTime<Utc>,
) -> Result<bool, ProvisionError> {
    let email = email.trim().to_lowercase();
    if directory.store().find_user_by_email(&email).await?.is_some() {
        return Ok(false);
    }

    let request = NewEmployee {
        name: Some("Administrator".to_string()),
        email: Some(email),
        password: Some(password.to_string()),
        department: Some("Administration".to_string()),
        role: Some(Role::Admin.to_string()),
    };
    match provision_employee(directory, &request, now).await {
        Ok(_) => Ok(true),
        // another instance won the race
        Err(ProvisionError::EmailTaken) => Ok(false),
        Err(e) => Err(e),
    }
}
