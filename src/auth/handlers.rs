use crate::{
    auth::{
        jwt::{generate_access_token, generate_refresh_token, verify_token},
        password::verify_password,
    },
    config::Config,
    directory::EmployeeDirectory,
    model::role::Role,
    models::{LoginReqDto, TokenPair, TokenType},
};
use actix_web::{HttpRequest, HttpResponse, Responder, web};
use chrono::{Duration, Utc};
use tracing::{debug, error, info, instrument};

fn bearer(req: &HttpRequest) -> Option<&str> {
    req.headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
}

/// Issue and persist an access/refresh pair for `user_id`.
async fn issue_tokens(
    user_id: &str,
    role: Role,
    directory: &EmployeeDirectory,
    config: &Config,
) -> Result<TokenPair, HttpResponse> {
    let access_token = generate_access_token(user_id, role, &config.jwt_secret, config.access_token_ttl)
        .map_err(|e| {
            error!(error = %e, "Failed to sign access token");
            HttpResponse::InternalServerError().finish()
        })?;

    let (refresh_token, refresh_claims) =
        generate_refresh_token(user_id, role, &config.jwt_secret, config.refresh_token_ttl)
            .map_err(|e| {
                error!(error = %e, "Failed to sign refresh token");
                HttpResponse::InternalServerError().finish()
            })?;

    debug!(jti = %refresh_claims.jti, "Storing refresh token");

    let expires_at = Utc::now() + Duration::seconds(config.refresh_token_ttl as i64);
    if let Err(e) = directory
        .store()
        .store_refresh_token(user_id, &refresh_claims.jti, expires_at)
        .await
    {
        error!(error = %e, "Failed to store refresh token");
        return Err(HttpResponse::InternalServerError().finish());
    }

    Ok(TokenPair {
        access_token,
        refresh_token,
    })
}

#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginReqDto,
    responses(
        (status = 200, description = "Token pair issued", body = TokenPair),
        (status = 400, description = "Email or password missing"),
        (status = 401, description = "Invalid credentials")
    ),
    tag = "Auth"
)]
#[instrument(name = "auth_login", skip(directory, config, user))]
pub async fn login(
    user: web::Json<LoginReqDto>,
    directory: web::Data<EmployeeDirectory>,
    config: web::Data<Config>,
) -> impl Responder {
    info!("Login request received");

    // 1️⃣ Basic validation
    let email = user.email.trim().to_lowercase();
    if email.is_empty() || user.password.is_empty() {
        info!("Validation failed: empty email or password");
        return HttpResponse::BadRequest().body("Email or password required");
    }

    // 2️⃣ Fetch user
    let db_user = match directory.store().find_user_by_email(&email).await {
        Ok(Some(user)) if user.is_active => {
            debug!(user_id = %user.user_id, "User found");
            user
        }
        Ok(_) => {
            info!("Invalid credentials: user not found or inactive");
            return HttpResponse::Unauthorized().body("Invalid credentials");
        }
        Err(e) => {
            error!(error = %e, "Directory error while fetching user");
            return HttpResponse::InternalServerError().finish();
        }
    };

    // 3️⃣ Verify password
    if let Err(e) = verify_password(&user.password, &db_user.password_hash) {
        info!(error = %e, "Invalid credentials: password mismatch");
        return HttpResponse::Unauthorized().body("Invalid credentials");
    }

    // 4️⃣ Issue tokens
    let tokens = match issue_tokens(&db_user.user_id, db_user.role, &directory, &config).await {
        Ok(tokens) => tokens,
        Err(resp) => return resp,
    };

    // 5️⃣ Update last login (non-fatal)
    if let Err(e) = directory.store().record_login(&db_user.user_id).await {
        error!(error = %e, "Failed to update last login");
    }

    info!(user_id = %db_user.user_id, role = %db_user.role, "Login successful");

    HttpResponse::Ok().json(tokens)
}

#[utoipa::path(
    post,
    path = "/auth/refresh",
    responses(
        (status = 200, description = "Rotated token pair", body = TokenPair),
        (status = 401, description = "Missing, invalid or already used refresh token")
    ),
    security(("bearer_auth" = [])),
    tag = "Auth"
)]
pub async fn refresh_token(
    req: HttpRequest,
    directory: web::Data<EmployeeDirectory>,
    config: web::Data<Config>,
) -> impl Responder {
    let Some(token) = bearer(&req) else {
        return HttpResponse::Unauthorized().body("No token");
    };

    let claims = match verify_token(token, &config.jwt_secret) {
        Ok(c) => c,
        Err(_) => return HttpResponse::Unauthorized().finish(),
    };

    if claims.token_type != TokenType::Refresh {
        return HttpResponse::Unauthorized().finish();
    }

    // 🔥 revoke old refresh token; a token that was already used is rejected
    match directory.store().consume_refresh_token(&claims.jti).await {
        Ok(true) => {}
        Ok(false) => return HttpResponse::Unauthorized().finish(),
        Err(e) => {
            error!(error = %e, "Failed to revoke refresh token");
            return HttpResponse::InternalServerError().finish();
        }
    }

    // 🔄 issue new pair
    match issue_tokens(&claims.sub, claims.role, &directory, &config).await {
        Ok(tokens) => HttpResponse::Ok().json(tokens),
        Err(resp) => resp,
    }
}

#[utoipa::path(
    post,
    path = "/auth/logout",
    responses(
        (status = 204, description = "Refresh token revoked (or nothing to revoke)")
    ),
    security(("bearer_auth" = [])),
    tag = "Auth"
)]
pub async fn logout(
    req: HttpRequest,
    directory: web::Data<EmployeeDirectory>,
    config: web::Data<Config>,
) -> impl Responder {
    let Some(token) = bearer(&req) else {
        return HttpResponse::NoContent().finish();
    };

    let claims = match verify_token(token, &config.jwt_secret) {
        Ok(c) => c,
        Err(_) => return HttpResponse::NoContent().finish(),
    };

    // only refresh tokens can logout
    if claims.token_type != TokenType::Refresh {
        return HttpResponse::NoContent().finish();
    }

    // idempotent: unknown or already revoked tokens are fine
    if let Err(e) = directory.store().consume_refresh_token(&claims.jti).await {
        error!(error = %e, "Failed to revoke refresh token on logout");
    }

    HttpResponse::NoContent().finish()
}
