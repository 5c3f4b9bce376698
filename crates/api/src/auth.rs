// auth.rs - Bearer token handling and the authenticated-user extractors

use super::config::Config;
use super::error::ApiError;
use actix_web::{
    dev::Payload,
    http::header::{HeaderMap, AUTHORIZATION},
    web::Data,
    FromRequest, HttpRequest,
};
use database::users::model::{Claims, Role, JWT_ALGORITHM};
use futures::future::{ready, Ready};
use jsonwebtoken::{decode, DecodingKey, Validation};
use tracing::{debug, error, warn};

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub email: String,
    pub role: Role,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

// Only lets admins through
#[derive(Debug, Clone)]
pub struct AdminUser(pub AuthUser);

impl FromRequest for AuthUser {
    type Error = ApiError;
    type Future = Ready<Result<AuthUser, ApiError>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(authenticate(req))
    }
}

impl FromRequest for AdminUser {
    type Error = ApiError;
    type Future = Ready<Result<AdminUser, ApiError>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(authenticate(req).and_then(|user| {
            if user.is_admin() {
                Ok(AdminUser(user))
            } else {
                warn!("Admin route refused for {}", user.email);
                Err(ApiError::Forbidden("Admin access required"))
            }
        }))
    }
}

fn authenticate(req: &HttpRequest) -> Result<AuthUser, ApiError> {
    let config = req.app_data::<Data<Config>>().ok_or_else(|| {
        error!("Config missing from app data");
        ApiError::Internal("Internal Server Error".to_string())
    })?;

    debug!("Checking authorization...");
    let token = jwt_from_header(req.headers())?;
    let claims = decode_jwt(&config.jwt_secret, &token)?;

    Ok(AuthUser {
        email: claims.sub,
        role: claims.role,
    })
}

// Creates a JWT for the user provided
pub fn create_jwt(
    secret: &str,
    email: &str,
    role: Role,
    validity_in_seconds: i64,
) -> Result<String, ApiError> {
    debug!("Setting expiration for JWT.");
    Claims::new(email, role, chrono::Duration::seconds(validity_in_seconds))
        .and_then(|claims| claims.sign(secret))
        .map_err(|e| {
            error!("Error encoding JWT: {}", e);
            ApiError::Internal("Internal Server Error".to_string())
        })
}

pub fn decode_jwt(secret: &str, token: &str) -> Result<Claims, ApiError> {
    let mut validation = Validation::new(JWT_ALGORITHM);
    validation.set_required_spec_claims(&["sub", "exp"]);

    match decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &validation,
    ) {
        Ok(data) => {
            debug!("JWT for {} successfully decoded", data.claims.sub);
            Ok(data.claims)
        }
        Err(e) => {
            warn!("Token validation failed: {}", e);
            Err(ApiError::Unauthorized("Invalid Authorization"))
        }
    }
}

// Gets a JWT from the request headers
pub fn jwt_from_header(headers: &HeaderMap) -> Result<String, ApiError> {
    let header = headers
        .get(AUTHORIZATION)
        .ok_or(ApiError::Unauthorized("Auth header not found"))?;

    let auth_header = header
        .to_str()
        .map_err(|_| ApiError::Unauthorized("Invalid Auth Header"))?;

    match auth_header.strip_prefix("Bearer ") {
        Some(token) if !token.trim().is_empty() => Ok(token.trim().to_owned()),
        _ => Err(ApiError::Unauthorized("Invalid Auth Header")),
    }
}
