#[macro_use]
extern crate rocket;

mod config;
mod db;
mod guards;
mod models;
mod routes;
mod services;
mod utils;

use dotenvy::dotenv;
use log::info;
use rocket::fairing::{Fairing, Info, Kind};
use rocket::http::{Header, Status};
use rocket::{Build, Request, Response, Rocket};
use rocket_okapi::openapi_get_routes;
use rocket_okapi::swagger_ui::{make_swagger_ui, SwaggerUIConfig};

use crate::guards::AuthGate;
use crate::utils::ApiError;

/* ----------------------------- CORS ----------------------------- */

pub struct CORS;

#[rocket::async_trait]
impl Fairing for CORS {
    fn info(&self) -> Info {
        Info {
            name: "CORS",
            kind: Kind::Response,
        }
    }

    async fn on_response<'r>(&self, request: &'r Request<'_>, response: &mut Response<'r>) {
        if let Some(origin) = request.headers().get_one("Origin") {
            response.set_header(Header::new("Access-Control-Allow-Origin", origin));
        }

        response.set_header(Header::new(
            "Access-Control-Allow-Methods",
            "GET, POST, PUT, PATCH, DELETE, OPTIONS",
        ));

        response.set_header(Header::new(
            "Access-Control-Allow-Headers",
            "Content-Type, Authorization",
        ));

        response.set_header(Header::new("Access-Control-Allow-Credentials", "true"));
    }
}

/* ----------------------------- OPTIONS ----------------------------- */

#[options("/<_..>")]
fn options_handler() {}

/* ----------------------------- ERRORS ----------------------------- */

#[catch(401)]
fn unauthorized() -> ApiError {
    ApiError::unauthorized("Authentication required")
}

#[catch(403)]
fn forbidden() -> ApiError {
    ApiError::forbidden("You do not have permission to do this")
}

#[catch(404)]
fn not_found() -> ApiError {
    ApiError::not_found("Resource not found (check /api/v1 prefix)")
}

#[catch(422)]
fn unprocessable() -> ApiError {
    ApiError::unprocessable("Request body is malformed")
}

#[catch(default)]
fn fallback(status: Status, _req: &Request) -> ApiError {
    let message = status.reason().unwrap_or("Internal server error");
    ApiError::new(status, message)
}

/* ----------------------------- SWAGGER ----------------------------- */

fn swagger_config() -> SwaggerUIConfig {
    SwaggerUIConfig {
        url: "/api/v1/openapi.json".to_string(),
        ..Default::default()
    }
}

/* ----------------------------- APP ----------------------------- */

/// Routes, fairings and catchers without the database; `rocket()` adds it.
pub fn app() -> Rocket<Build> {
    rocket::build()
        .attach(CORS)
        .attach(AuthGate)
        .mount("/", routes![options_handler])
        .mount(
            "/api/v1",
            openapi_get_routes![
                // Health
                routes::health::health,
                // Auth
                routes::auth::register,
                routes::auth::login,
                routes::auth::firebase_login,
                routes::auth::refresh_token,
                routes::auth::forgot_password,
                routes::auth::reset_password,
                // User
                routes::user::get_me,
                routes::user::update_me,
                routes::user::upload_avatar,
                routes::user::delete_me,
                routes::user::list_freelancers,
                routes::user::get_user,
                // Project
                routes::project::create_project,
                routes::project::list_projects,
                routes::project::my_projects,
                routes::project::get_project,
                routes::project::update_project,
                routes::project::update_project_status,
                routes::project::assign_freelancer,
                routes::project::delete_project,
                // Service
                routes::service::create_service,
                routes::service::list_services,
                routes::service::get_categories,
                routes::service::get_service,
                routes::service::update_service,
                routes::service::delete_service,
                // Review
                routes::review::create_review,
                routes::review::list_service_reviews,
                routes::review::delete_review,
                // Message
                routes::message::send_message,
                routes::message::inbox,
                routes::message::get_conversation,
                routes::message::mark_read,
                routes::message::delete_message,
                // Payment
                routes::payment::create_payment,
                routes::payment::notification,
                routes::payment::payment_status,
                routes::payment::list_payments,
                // Recommendation
                routes::recommendation::recommend_services,
                routes::recommendation::recommend_projects,
            ],
        )
        .mount("/api/v1", routes![routes::auth::unauthorized])
        .mount("/api/docs", make_swagger_ui(&swagger_config()))
        .register(
            "/",
            catchers![unauthorized, forbidden, not_found, unprocessable, fallback],
        )
}

/* ----------------------------- LAUNCH ----------------------------- */

#[launch]
fn rocket() -> Rocket<Build> {
    dotenv().ok();
    env_logger::init();

    info!("Freelance marketplace API starting");
    info!("Swagger UI at /api/docs");

    app().attach(config::secrets_check()).attach(db::init())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::oid::ObjectId;
    use rocket::http::ContentType;
    use rocket::local::asynchronous::Client;

    use crate::models::Role;
    use crate::services::JwtService;

    /// The driver connects lazily, so these tests only reach paths that
    /// answer before any database round trip.
    async fn client() -> Client {
        let mongo = mongodb::Client::with_uri_str("mongodb://127.0.0.1:27017/?serverSelectionTimeoutMS=200")
            .await
            .expect("valid uri");
        let rocket = app().manage(mongo.database("freelance-test"));
        Client::tracked(rocket).await.expect("valid rocket instance")
    }

    fn bearer(role: Role) -> Header<'static> {
        let token = JwtService::generate_access_token(&ObjectId::new(), "someone@example.com", role)
            .expect("token");
        Header::new("Authorization", format!("Bearer {}", token))
    }

    async fn body_json(response: rocket::local::asynchronous::LocalResponse<'_>) -> serde_json::Value {
        let body = response.into_string().await.expect("body");
        serde_json::from_str(&body).expect("json body")
    }

    #[rocket::async_test]
    async fn gate_rejects_missing_token() {
        let client = client().await;
        let response = client.get("/api/v1/users/me").dispatch().await;
        assert_eq!(response.status(), Status::Unauthorized);

        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert!(body["message"].is_string());
    }

    #[rocket::async_test]
    async fn gate_rejects_bad_token_on_writes() {
        let client = client().await;
        let response = client
            .post("/api/v1/projects")
            .header(Header::new("Authorization", "Bearer not-a-jwt"))
            .header(ContentType::JSON)
            .body("{}")
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Unauthorized);
    }

    #[rocket::async_test]
    async fn role_guard_answers_forbidden() {
        let client = client().await;
        let response = client
            .post("/api/v1/projects")
            .header(bearer(Role::Freelancer))
            .header(ContentType::JSON)
            .body(r#"{"title":"Landing page","description":"A landing page for a shop","budget":100000,"category":"web"}"#)
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Forbidden);
        assert_eq!(body_json(response).await["success"], false);
    }

    #[rocket::async_test]
    async fn invalid_registration_is_unprocessable() {
        let client = client().await;
        let response = client
            .post("/api/v1/auth/register")
            .header(ContentType::JSON)
            .body(r#"{"name":"Ana","email":"not-an-email","password":"short","role":"client"}"#)
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::UnprocessableEntity);

        let body = body_json(response).await;
        let message = body["message"].as_str().unwrap();
        assert!(message.contains("email"));
        assert!(message.contains("password"));
    }

    #[rocket::async_test]
    async fn malformed_json_uses_the_envelope() {
        let client = client().await;
        let response = client
            .post("/api/v1/auth/login")
            .header(ContentType::JSON)
            .body(r#"{"email": 42"#)
            .dispatch()
            .await;
        assert!(response.status().code >= 400 && response.status().code < 500);
        assert_eq!(body_json(response).await["success"], false);
    }

    #[rocket::async_test]
    async fn public_lookup_rejects_malformed_ids() {
        let client = client().await;
        let response = client.get("/api/v1/projects/not-an-id").dispatch().await;
        assert_eq!(response.status(), Status::BadRequest);
        assert_eq!(body_json(response).await["message"], "Invalid project ID");
    }

    #[rocket::async_test]
    async fn unknown_public_route_is_json_404() {
        let client = client().await;
        let response = client.get("/api/v1/auth/nowhere").dispatch().await;
        assert_eq!(response.status(), Status::NotFound);
        assert_eq!(body_json(response).await["success"], false);
    }

    #[rocket::async_test]
    async fn preflight_passes_the_gate() {
        let client = client().await;
        let response = client
            .req(rocket::http::Method::Options, "/api/v1/users/me")
            .header(Header::new("Origin", "http://localhost:3000"))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        assert_eq!(
            response.headers().get_one("Access-Control-Allow-Origin"),
            Some("http://localhost:3000")
        );
    }

    #[rocket::async_test]
    async fn openapi_document_is_public() {
        let client = client().await;
        let response = client.get("/api/v1/openapi.json").dispatch().await;
        assert_eq!(response.status(), Status::Ok);
        let doc = body_json(response).await;
        assert!(doc["paths"].get("/payments/notification").is_some());
    }
}
