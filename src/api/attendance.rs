use crate::attendance::context::{MAX_UTC_OFFSET_MINUTES, offset_from_minutes};
use crate::attendance::{AttendanceError, AttendanceService, CallerContext, LiveView};
use crate::auth::auth::AuthUser;
use crate::config::Config;
use crate::directory::EmployeeDirectory;
use crate::model::attendance::GpsLocation;
use actix_web::http::header;
use actix_web::{HttpRequest, HttpResponse, Responder, web};
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use tracing::{error, info};
use utoipa::ToSchema;

/// Minutes east of UTC of the caller's calendar, e.g. `360` for Dhaka.
pub const UTC_OFFSET_HEADER: &str = "X-UTC-Offset";

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct PunchRequest {
    /// Present when the device supplied a GPS fix; marks the punch as `gps`.
    pub location: Option<GpsLocation>,
}

/// An empty body means no GPS fix; anything else must be a valid `PunchRequest`.
fn punch_location(body: &web::Bytes) -> actix_web::Result<Option<GpsLocation>> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }

    serde_json::from_slice::<PunchRequest>(body)
        .map(|punch| punch.location)
        .map_err(|e| {
            info!(error = %e, "Rejected punch body");
            let resp = HttpResponse::BadRequest().json(json!({
                "message": format!("Invalid request body: {e}"),
                "code": "invalid_body"
            }));
            actix_web::error::InternalError::from_response(e, resp).into()
        })
}

fn utc_offset(req: &HttpRequest, config: &Config) -> actix_web::Result<chrono::FixedOffset> {
    let Some(raw) = req.headers().get(UTC_OFFSET_HEADER) else {
        return Ok(config.default_utc_offset);
    };

    raw.to_str()
        .ok()
        .and_then(|v| v.trim().parse::<i32>().ok())
        .and_then(offset_from_minutes)
        .ok_or_else(|| {
            actix_web::error::ErrorBadRequest(format!(
                "{UTC_OFFSET_HEADER} must be minutes east of UTC between -{MAX_UTC_OFFSET_MINUTES} and {MAX_UTC_OFFSET_MINUTES}"
            ))
        })
}

/// Resolve the session identity to an employee and the caller's calendar.
async fn caller_context(
    req: &HttpRequest,
    auth: &AuthUser,
    directory: &EmployeeDirectory,
    config: &Config,
) -> actix_web::Result<CallerContext> {
    let utc_offset = utc_offset(req, config)?;

    let employee_id = directory
        .employee_id_for(&auth.user_id)
        .await
        .map_err(|e| {
            error!(error = %e, user_id = %auth.user_id, "Employee lookup failed");
            actix_web::error::ErrorInternalServerError("Internal Server Error")
        })?
        .ok_or_else(|| actix_web::error::ErrorForbidden("No employee profile"))?;

    Ok(CallerContext::new(employee_id, utc_offset))
}

fn log_failure(operation: &'static str, ctx: &CallerContext, e: &AttendanceError) {
    match e {
        AttendanceError::Unreachable(_) | AttendanceError::TransientStoreConflict => {
            error!(error = %e, operation, employee_id = %ctx.employee_id(), "Attendance store failure");
        }
        _ => info!(error = %e, operation, employee_id = %ctx.employee_id(), "Attendance request rejected"),
    }
}

/// Check-in endpoint
#[utoipa::path(
    post,
    path = "/api/attendance/check-in",
    request_body(content = PunchRequest, description = "Optional GPS fix", content_type = "application/json"),
    params(
        ("X-UTC-Offset" = Option<i32>, Header, description = "Caller's offset from UTC in minutes")
    ),
    responses(
        (status = 200, description = "Checked in successfully", body = Object, example = json!({
            "message": "Checked in successfully"
        })),
        (status = 400, description = "Already recorded today, or unreadable body", body = Object, example = json!({
            "message": "Attendance already recorded for today",
            "code": "already_recorded"
        })),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "No employee profile"),
        (status = 503, description = "Attendance store unavailable")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Attendance"
)]
pub async fn check_in(
    req: HttpRequest,
    auth: AuthUser,
    service: web::Data<AttendanceService>,
    directory: web::Data<EmployeeDirectory>,
    config: web::Data<Config>,
    body: web::Bytes,
) -> actix_web::Result<impl Responder> {
    let location = punch_location(&body)?;
    let ctx = caller_context(&req, &auth, &directory, &config).await?;

    service.check_in(&ctx, location).await.map_err(|e| {
        log_failure("check_in", &ctx, &e);
        e
    })?;

    Ok(HttpResponse::Ok().json(json!({
        "message": "Checked in successfully"
    })))
}

/// Check-out endpoint
#[utoipa::path(
    post,
    path = "/api/attendance/check-out",
    request_body(content = PunchRequest, description = "Optional GPS fix", content_type = "application/json"),
    params(
        ("X-UTC-Offset" = Option<i32>, Header, description = "Caller's offset from UTC in minutes")
    ),
    responses(
        (status = 200, description = "Checked out successfully", body = Object, example = json!({
            "message": "Checked out successfully"
        })),
        (status = 400, description = "No check-in today, already checked out, or unreadable body", body = Object, example = json!({
            "message": "No check-in found for today",
            "code": "no_check_in"
        })),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "No employee profile"),
        (status = 503, description = "Attendance store unavailable")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Attendance"
)]
pub async fn check_out(
    req: HttpRequest,
    auth: AuthUser,
    service: web::Data<AttendanceService>,
    directory: web::Data<EmployeeDirectory>,
    config: web::Data<Config>,
    body: web::Bytes,
) -> actix_web::Result<impl Responder> {
    let location = punch_location(&body)?;
    let ctx = caller_context(&req, &auth, &directory, &config).await?;

    service.check_out(&ctx, location).await.map_err(|e| {
        log_failure("check_out", &ctx, &e);
        e
    })?;

    Ok(HttpResponse::Ok().json(json!({
        "message": "Checked out successfully"
    })))
}

/// Today's record with the derived hours
#[utoipa::path(
    get,
    path = "/api/attendance/today",
    params(
        ("X-UTC-Offset" = Option<i32>, Header, description = "Caller's offset from UTC in minutes")
    ),
    responses(
        (status = 200, body = LiveView),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "No employee profile")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn today(
    req: HttpRequest,
    auth: AuthUser,
    service: web::Data<AttendanceService>,
    directory: web::Data<EmployeeDirectory>,
    config: web::Data<Config>,
) -> actix_web::Result<impl Responder> {
    let ctx = caller_context(&req, &auth, &directory, &config).await?;

    let record = service.get_today(&ctx).await.map_err(|e| {
        log_failure("get_today", &ctx, &e);
        e
    })?;

    Ok(HttpResponse::Ok().json(LiveView::at(record, service.now())))
}

/// Live view of today's record as Server-Sent Events
#[utoipa::path(
    get,
    path = "/api/attendance/today/stream",
    params(
        ("X-UTC-Offset" = Option<i32>, Header, description = "Caller's offset from UTC in minutes")
    ),
    responses(
        (status = 200, description = "`text/event-stream` of LiveView JSON payloads", content_type = "text/event-stream", body = LiveView),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "No employee profile")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn today_stream(
    req: HttpRequest,
    auth: AuthUser,
    service: web::Data<AttendanceService>,
    directory: web::Data<EmployeeDirectory>,
    config: web::Data<Config>,
) -> actix_web::Result<HttpResponse> {
    let ctx = caller_context(&req, &auth, &directory, &config).await?;

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<LiveView>();
    let handle = service
        .watch_today_hours(&ctx, move |view| {
            // the receiver is gone once the client disconnects
            let _ = tx.send(view);
        })
        .await
        .map_err(|e| {
            log_failure("subscribe_today", &ctx, &e);
            e
        })?;

    info!(employee_id = %ctx.employee_id(), "Live attendance stream opened");

    // the handle rides along with the stream and cancels the watch when dropped
    let events = futures::stream::unfold((rx, handle), |(mut rx, handle)| async move {
        let view = rx.recv().await?;
        let payload = match serde_json::to_string(&view) {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "Failed to encode live view");
                return None;
            }
        };
        let event = web::Bytes::from(format!("data: {payload}\n\n"));
        Some((Ok::<_, Infallible>(event), (rx, handle)))
    });

    Ok(HttpResponse::Ok()
        .insert_header((header::CONTENT_TYPE, "text/event-stream"))
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .streaming(events))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attendance::RetryPolicy;
    use crate::attendance::clock::ManualClock;
    use crate::auth::jwt::generate_access_token;
    use crate::directory::provision::{NewEmployee, provision_employee};
    use crate::directory::{Directory, MemoryDirectory};
    use crate::model::role::Role;
    use crate::routes::{self, RateLimits};
    use crate::store::MemoryStore;
    use actix_web::{App, http::StatusCode, test};
    use chrono::{TimeZone, Utc};
    use serde_json::Value;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;

    struct Harness {
        config: Config,
        service: AttendanceService,
        directory: EmployeeDirectory,
        clock: Arc<ManualClock>,
        token: String,
    }

    async fn harness() -> Harness {
        let config = Config::for_tests();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).unwrap(),
        ));
        let service = AttendanceService::new(
            Arc::new(MemoryStore::new()),
            clock.clone(),
            RetryPolicy::default(),
            Duration::from_secs(30),
        );
        let directory = EmployeeDirectory::new(Arc::new(MemoryDirectory::new()), Duration::from_secs(60));

        let employee = provision_employee(
            &directory,
            &NewEmployee {
                name: Some("Jane Roe".into()),
                email: Some("jane@company.com".into()),
                password: Some("hunter22".into()),
                department: Some("Ops".into()),
                role: None,
            },
            Utc::now(),
        )
        .await
        .unwrap();
        let token = generate_access_token(&employee.user_id, Role::Employee, &config.jwt_secret, 900)
            .unwrap();

        Harness {
            config,
            service,
            directory,
            clock,
            token,
        }
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    macro_rules! app {
        ($h:expr) => {{
            let config = $h.config.clone();
            let limits = RateLimits::from_config(&config).unwrap();
            test::init_service(
                App::new()
                    .app_data(web::Data::new($h.config.clone()))
                    .app_data(web::Data::new($h.service.clone()))
                    .app_data(web::Data::new($h.directory.clone()))
                    .configure(move |cfg| routes::configure(cfg, &config, &limits)),
            )
            .await
        }};
    }

    fn post(path: &str, token: &str) -> test::TestRequest {
        test::TestRequest::post()
            .uri(path)
            .peer_addr(peer())
            .insert_header(("Authorization", format!("Bearer {token}")))
    }

    fn get(path: &str, token: &str) -> test::TestRequest {
        test::TestRequest::get()
            .uri(path)
            .peer_addr(peer())
            .insert_header(("Authorization", format!("Bearer {token}")))
    }

    #[actix_web::test]
    async fn full_day_over_http() {
        let h = harness().await;
        let app = app!(h);

        let resp = test::call_service(&app, post("/api/attendance/check-in", &h.token).to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = test::call_service(&app, post("/api/attendance/check-in", &h.token).to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["code"], "already_recorded");
        assert_eq!(body["message"], "Attendance already recorded for today");

        h.clock.set(Utc.with_ymd_and_hms(2026, 1, 5, 11, 15, 0).unwrap());
        let view: Value = test::call_and_read_body_json(&app, get("/api/attendance/today", &h.token).to_request()).await;
        assert_eq!(view["checkedIn"], true);
        assert_eq!(view["hours"]["hours"], 2.25);
        assert_eq!(view["hours"]["running"], true);
        assert_eq!(view["record"]["checkIn"]["method"], "manual");

        h.clock.set(Utc.with_ymd_and_hms(2026, 1, 5, 17, 30, 0).unwrap());
        let resp = test::call_service(&app, post("/api/attendance/check-out", &h.token).to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = test::call_service(&app, post("/api/attendance/check-out", &h.token).to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["code"], "already_checked_out");

        let view: Value = test::call_and_read_body_json(&app, get("/api/attendance/today", &h.token).to_request()).await;
        assert_eq!(view["checkedIn"], false);
        assert_eq!(view["record"]["totalHours"], 8.5);
    }

    #[actix_web::test]
    async fn gps_body_is_recorded() {
        let h = harness().await;
        let app = app!(h);

        let req = post("/api/attendance/check-in", &h.token)
            .set_json(serde_json::json!({ "location": { "latitude": 1.0, "longitude": 2.0 } }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

        let view: Value = test::call_and_read_body_json(&app, get("/api/attendance/today", &h.token).to_request()).await;
        assert_eq!(view["record"]["checkIn"]["method"], "gps");
        assert_eq!(view["record"]["checkIn"]["location"]["latitude"], 1.0);
        assert_eq!(view["record"]["checkIn"]["location"]["longitude"], 2.0);
    }

    #[actix_web::test]
    async fn gps_body_without_content_type_is_still_recorded() {
        let h = harness().await;
        let app = app!(h);

        let req = post("/api/attendance/check-in", &h.token)
            .set_payload(r#"{"location":{"latitude":1.0,"longitude":2.0}}"#)
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

        let view: Value = test::call_and_read_body_json(&app, get("/api/attendance/today", &h.token).to_request()).await;
        assert_eq!(view["record"]["checkIn"]["method"], "gps");
    }

    #[actix_web::test]
    async fn unreadable_body_is_rejected_without_punching() {
        let h = harness().await;
        let app = app!(h);

        for body in [
            r#"{"location":{"lat":1.0,"lng":2.0}}"#,
            r#"{"locaton":{"latitude":1.0,"longitude":2.0}}"#,
            "not json",
        ] {
            let req = post("/api/attendance/check-in", &h.token)
                .insert_header(("Content-Type", "application/json"))
                .set_payload(body)
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{body}");
            let err: Value = test::read_body_json(resp).await;
            assert_eq!(err["code"], "invalid_body");
        }

        let view: Value = test::call_and_read_body_json(&app, get("/api/attendance/today", &h.token).to_request()).await;
        assert_eq!(view["record"], Value::Null);

        // the day is still open for a well-formed punch
        let req = post("/api/attendance/check-in", &h.token)
            .set_json(serde_json::json!({ "location": { "latitude": 1.0, "longitude": 2.0 } }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

        h.clock.set(Utc.with_ymd_and_hms(2026, 1, 5, 17, 0, 0).unwrap());
        let req = post("/api/attendance/check-out", &h.token)
            .set_payload(r#"{"location":{"lat":1.0}}"#)
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        let view: Value = test::call_and_read_body_json(&app, get("/api/attendance/today", &h.token).to_request()).await;
        assert_eq!(view["checkedIn"], true);
    }

    #[actix_web::test]
    async fn check_out_first_is_rejected() {
        let h = harness().await;
        let app = app!(h);

        let resp = test::call_service(&app, post("/api/attendance/check-out", &h.token).to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["code"], "no_check_in");
    }

    #[actix_web::test]
    async fn offset_header_selects_the_local_day() {
        let h = harness().await;
        h.clock.set(Utc.with_ymd_and_hms(2026, 1, 5, 22, 30, 0).unwrap());
        let app = app!(h);

        let req = post("/api/attendance/check-in", &h.token)
            .insert_header((UTC_OFFSET_HEADER, "360"))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

        let view: Value = test::call_and_read_body_json(
            &app,
            get("/api/attendance/today", &h.token)
                .insert_header((UTC_OFFSET_HEADER, "360"))
                .to_request(),
        )
        .await;
        assert_eq!(view["record"]["date"], "2026-01-06");

        // same instant, UTC calendar: nothing recorded yet
        let view: Value = test::call_and_read_body_json(&app, get("/api/attendance/today", &h.token).to_request()).await;
        assert_eq!(view["record"], Value::Null);

        let req = get("/api/attendance/today", &h.token)
            .insert_header((UTC_OFFSET_HEADER, "9999"))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn requests_need_a_token_and_an_employee_profile() {
        let h = harness().await;
        let app = app!(h);

        let req = test::TestRequest::post()
            .uri("/api/attendance/check-in")
            .peer_addr(peer())
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);

        let stranger = generate_access_token("no-such-user", Role::Employee, &h.config.jwt_secret, 900).unwrap();
        let resp = test::call_service(&app, post("/api/attendance/check-in", &stranger).to_request()).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert!(h.directory.store().find_user_by_email("jane@company.com").await.unwrap().is_some());
    }
}
