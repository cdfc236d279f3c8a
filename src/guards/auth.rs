use rocket::request::{self, FromRequest, Request, Outcome};
use rocket::http::Status;
use mongodb::bson::oid::ObjectId;

// === OpenAPI (compatible with rocket_okapi 0.8.0 / 0.8.1) ===
use rocket_okapi::request::{OpenApiFromRequest, RequestHeaderInput};
use rocket_okapi::r#gen::OpenApiGenerator;

use crate::models::Role;

/// JWT-based authentication guard
#[derive(Debug, Clone)]
pub struct AuthGuard {
    pub user_id: ObjectId,
    pub email: String,
    pub role: Role,
}

/// Identity resolved once per request and shared by the gate and the guards.
#[derive(Debug, Clone, Default)]
pub struct RequestIdentity(pub Option<AuthGuard>);

pub fn bearer_token<'r>(req: &'r Request<'_>) -> Option<&'r str> {
    req.headers()
        .get_one("Authorization")
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn identify(req: &Request<'_>) -> Option<AuthGuard> {
    let token = bearer_token(req)?;
    let claims = crate::services::JwtService::verify_token(token, false).ok()?;
    let user_id = ObjectId::parse_str(&claims.sub).ok()?;

    Some(AuthGuard {
        user_id,
        email: claims.email,
        role: claims.role,
    })
}

pub fn cached_identity<'r>(req: &'r Request<'_>) -> &'r RequestIdentity {
    req.local_cache(|| RequestIdentity(identify(req)))
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AuthGuard {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        match &cached_identity(req).0 {
            Some(identity) => Outcome::Success(identity.clone()),
            None => Outcome::Error((Status::Unauthorized, ())),
        }
    }
}

/// === OpenAPI Integration (Fallback for older versions) ===
/// Keeps OpenAPI generation working even without new traits.
impl<'a> OpenApiFromRequest<'a> for AuthGuard {
    fn from_request_input(
        _gen: &mut OpenApiGenerator,
        _name: String,
        _required: bool,
    ) -> rocket_okapi::Result<RequestHeaderInput> {
        // The guard doesn't contribute any special header/parameter for docs
        Ok(RequestHeaderInput::None)
    }
}
