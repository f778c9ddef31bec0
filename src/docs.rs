use crate::api::attendance::PunchRequest;
use crate::attendance::LiveView;
use crate::attendance::metrics::WorkedHours;
use crate::directory::provision::NewEmployee;
use crate::model::attendance::{
    AttendanceRecord, AttendanceStatus, EmployeeId, GpsLocation, Punch, PunchMethod,
};
use crate::model::employee::Employee;
use crate::model::role::Role;
use crate::models::{LoginReqDto, TokenPair};
use utoipa::Modify;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{OpenApi, openapi};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Attendance API",
        version = "1.0.0",
        description = r#"
## Employee Attendance

Daily check-in / check-out for employees, one record per employee per calendar day.

### 🔹 Key Features
- **Check-in / Check-out**
  - Optional GPS fix per punch, otherwise the punch is recorded as manual
- **Today**
  - Current record plus worked hours, running while checked in
- **Live stream**
  - Server-Sent Events pushing every change and a periodic running-hours refresh
- **Provisioning**
  - Admins create employees together with their login

### 🔐 Security
Endpoints under the API prefix require a **JWT Bearer** access token.
The caller's calendar day is taken from the `X-UTC-Offset` header (minutes east of UTC).

### 📦 Errors
Rejected punches answer `400` with `{"message", "code"}`; an unreachable store answers `503`.
"#,
    ),
    paths(
        crate::auth::handlers::login,
        crate::auth::handlers::refresh_token,
        crate::auth::handlers::logout,

        crate::api::attendance::check_in,
        crate::api::attendance::check_out,
        crate::api::attendance::today,
        crate::api::attendance::today_stream,

        crate::api::employee::create_employee
    ),
    components(
        schemas(
            LoginReqDto,
            TokenPair,
            PunchRequest,
            GpsLocation,
            Punch,
            PunchMethod,
            AttendanceStatus,
            AttendanceRecord,
            EmployeeId,
            WorkedHours,
            LiveView,
            NewEmployee,
            Employee,
            Role
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Auth", description = "Login and token rotation"),
        (name = "Attendance", description = "Attendance check-in / check-out APIs"),
        (name = "Employee", description = "Employee provisioning APIs"),
    )
)]
pub struct ApiDoc;

/// Prefix the handler annotations are written against.
const DOCUMENTED_PREFIX: &str = "/api";

/// The OpenAPI document with protected paths moved under `api_prefix`.
pub fn api_doc(api_prefix: &str) -> openapi::OpenApi {
    let mut doc = ApiDoc::openapi();
    let api_prefix = api_prefix.trim_end_matches('/');
    if api_prefix == DOCUMENTED_PREFIX {
        return doc;
    }

    let paths = std::mem::take(&mut doc.paths.paths);
    doc.paths.paths = paths
        .into_iter()
        .map(|(path, item)| match path.strip_prefix(DOCUMENTED_PREFIX) {
            Some(rest) if rest.starts_with('/') => (format!("{api_prefix}{rest}"), item),
            _ => (path, item),
        })
        .collect();
    doc
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}
