use rocket::request::{self, Request, FromRequest, Outcome};
use rocket::http::Status;
use rocket_okapi::request::OpenApiFromRequest;
use rocket_okapi::r#gen::OpenApiGenerator;
use rocket_okapi::request::RequestHeaderInput;
use log::debug;

use crate::guards::AuthGuard;
use crate::models::Role;

async fn require_role<'r>(req: &'r Request<'_>, role: Role) -> request::Outcome<AuthGuard, ()> {
    match req.guard::<AuthGuard>().await {
        Outcome::Success(auth) if auth.role == role => Outcome::Success(auth),
        Outcome::Success(auth) => {
            debug!("Role guard rejected {} - needs {}", auth.user_id, role.as_str());
            Outcome::Error((Status::Forbidden, ()))
        }
        Outcome::Error(e) => Outcome::Error(e),
        Outcome::Forward(f) => Outcome::Forward(f),
    }
}

/// Caller must be signed in as a freelancer.
pub struct FreelancerGuard {
    pub auth: AuthGuard,
}

/// Caller must be signed in as a client.
pub struct ClientGuard {
    pub auth: AuthGuard,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for FreelancerGuard {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        require_role(req, Role::Freelancer).await.map(|auth| FreelancerGuard { auth })
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for ClientGuard {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        require_role(req, Role::Client).await.map(|auth| ClientGuard { auth })
    }
}

impl<'a> OpenApiFromRequest<'a> for FreelancerGuard {
    fn from_request_input(
        _gen: &mut OpenApiGenerator,
        _name: String,
        _required: bool,
    ) -> rocket_okapi::Result<RequestHeaderInput> {
        Ok(RequestHeaderInput::None)
    }
}

impl<'a> OpenApiFromRequest<'a> for ClientGuard {
    fn from_request_input(
        _gen: &mut OpenApiGenerator,
        _name: String,
        _required: bool,
    ) -> rocket_okapi::Result<RequestHeaderInput> {
        Ok(RequestHeaderInput::None)
    }
}
