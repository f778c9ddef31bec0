use crate::{
    auth::auth::AuthUser,
    directory::{
        EmployeeDirectory,
        provision::{NewEmployee, ProvisionError, provision_employee},
    },
    model::employee::Employee,
};
use actix_web::{HttpResponse, Responder, web};
use chrono::Utc;
use serde_json::json;
use tracing::{error, info};

/// Provision an employee together with its login identity (admin only)
#[utoipa::path(
    post,
    path = "/api/employees",
    request_body = NewEmployee,
    responses(
        (status = 201, description = "Employee created", body = Employee),
        (status = 400, description = "Required field missing", body = Object, example = json!({
            "message": "department is required"
        })),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Admin only"),
        (status = 409, description = "Email already registered")
    ),
    security(("bearer_auth" = [])),
    tag = "Employee"
)]
pub async fn create_employee(
    auth: AuthUser,
    directory: web::Data<EmployeeDirectory>,
    payload: web::Json<NewEmployee>,
) -> actix_web::Result<impl Responder> {
    auth.require_admin()?;

    let resp = match provision_employee(&directory, &payload, Utc::now()).await {
        Ok(employee) => HttpResponse::Created().json(employee),
        Err(e @ ProvisionError::MissingField(_)) => {
            info!(error = %e, "Provisioning rejected");
            HttpResponse::BadRequest().json(json!({ "message": e.to_string() }))
        }
        Err(e @ ProvisionError::EmailTaken) => {
            HttpResponse::Conflict().json(json!({ "message": e.to_string() }))
        }
        Err(e) => {
            error!(error = %e, admin = %auth.user_id, "Failed to provision employee");
            HttpResponse::InternalServerError().finish()
        }
    };

    Ok(resp)
}
