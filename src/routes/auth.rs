use rocket::serde::json::Json;
use rocket::State;
use rocket_okapi::openapi;
use mongodb::bson::{doc, DateTime};
use validator::Validate;
use log::{info, warn};

use crate::db::{DbConn, PASSWORD_RESETS, USERS};
use crate::models::{
    FirebaseLoginDto, ForgotPasswordDto, LoginDto, PasswordReset, RefreshTokenDto,
    RegisterDto, ResetPasswordDto, Role, User, UserResponse,
};
use crate::services::{EmailService, FirebaseService, JwtService};
use crate::utils::{generate_code, rate_limit, ApiError, ApiResponse, ApiResult};

const LOGIN_LIMIT: i32 = 5;
const LOGIN_WINDOW_MS: i64 = 15 * 60 * 1000;
const FORGOT_LIMIT: i32 = 3;
const FORGOT_WINDOW_MS: i64 = 10 * 60 * 1000;
const RESET_LIMIT: i32 = 5;

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub(crate) async fn hash_password(password: String) -> Result<String, ApiError> {
    tokio::task::spawn_blocking(move || bcrypt::hash(password, bcrypt::DEFAULT_COST))
        .await
        .map_err(|e| ApiError::internal_error(format!("Hashing task failed: {}", e)))?
        .map_err(|e| ApiError::internal_error(format!("Failed to hash password: {}", e)))
}

async fn verify_password(password: String, hash: String) -> Result<bool, ApiError> {
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(|e| ApiError::internal_error(format!("Hashing task failed: {}", e)))?
        .map_err(|e| ApiError::internal_error(format!("Failed to verify password: {}", e)))
}

/// Tokens plus the profile, as returned by every sign-in flow.
fn session_payload(user: User) -> Result<serde_json::Value, ApiError> {
    let user_id = user
        .id
        .ok_or_else(|| ApiError::internal_error("User has no ID"))?;

    let tokens = JwtService::issue_pair(&user_id, &user.email, user.role)
        .map_err(|e| ApiError::internal_error(format!("Failed to generate token: {}", e)))?;

    Ok(serde_json::json!({
        "tokens": tokens,
        "user": UserResponse::from(user),
    }))
}

/// --------------------
/// Register
/// --------------------
#[openapi(tag = "Auth")]
#[post("/auth/register", data = "<dto>")]
pub async fn register(db: &State<DbConn>, dto: Json<RegisterDto>) -> ApiResult {
    dto.validate()?;
    let dto = dto.into_inner();
    let email = normalize_email(&dto.email);
    let users = db.collection::<User>(USERS);

    if users.find_one(doc! { "email": &email }, None).await?.is_some() {
        return Err(ApiError::conflict("Email is already registered"));
    }

    let mut user = User::new(dto.name.trim().to_string(), email, dto.role);
    user.password_hash = Some(hash_password(dto.password).await?);

    let result = users.insert_one(&user, None).await.map_err(|e| {
        if crate::db::is_duplicate_key(&e) {
            ApiError::conflict("Email is already registered")
        } else {
            ApiError::from(e)
        }
    })?;
    user.id = result.inserted_id.as_object_id();

    info!("Registered {} as {}", user.email, user.role.as_str());

    let (email, name, role) = (user.email.clone(), user.name.clone(), user.role);
    tokio::spawn(async move {
        EmailService::send_welcome_email(&email, &name, role.as_str()).await;
    });

    Ok(Json(ApiResponse::success_with_message(
        "Account created successfully",
        session_payload(user)?,
    )))
}

/// --------------------
/// Email + password login
/// --------------------
#[openapi(tag = "Auth")]
#[post("/auth/login", data = "<dto>")]
pub async fn login(db: &State<DbConn>, dto: Json<LoginDto>) -> ApiResult {
    dto.validate()?;
    let email = normalize_email(&dto.email);
    let limit_key = format!("login:{}", email);

    rate_limit::rate_limit(db, &limit_key, LOGIN_LIMIT, LOGIN_WINDOW_MS).await?;

    let invalid = || ApiError::unauthorized("Invalid email or password");

    let user = db
        .collection::<User>(USERS)
        .find_one(doc! { "email": &email }, None)
        .await?
        .ok_or_else(invalid)?;

    let hash = user.password_hash.clone().ok_or_else(invalid)?;
    if !verify_password(dto.password.clone(), hash).await? {
        return Err(invalid());
    }

    rate_limit::reset(db, &limit_key).await;

    Ok(Json(ApiResponse::success_with_message(
        "Login successful",
        session_payload(user)?,
    )))
}

/// What a Firebase sign-in does once no account carries its uid yet.
#[derive(Debug, PartialEq, Eq)]
enum FirebaseLink {
    /// Attach the uid to the password account that owns the email.
    Link,
    /// No account owns the email; create one.
    Create,
    /// The provider has not verified the email, so it proves nothing.
    Unverified,
    /// The email belongs to an account tied to a different Firebase uid.
    Conflict,
}

fn link_decision(email_owner: Option<&User>, email_verified: bool) -> FirebaseLink {
    if !email_verified {
        return FirebaseLink::Unverified;
    }
    match email_owner {
        None => FirebaseLink::Create,
        Some(user) if user.firebase_uid.is_none() => FirebaseLink::Link,
        Some(_) => FirebaseLink::Conflict,
    }
}

/// --------------------
/// Firebase sign-in (Google etc.)
/// --------------------
#[openapi(tag = "Auth")]
#[post("/auth/firebase", data = "<dto>")]
pub async fn firebase_login(db: &State<DbConn>, dto: Json<FirebaseLoginDto>) -> ApiResult {
    dto.validate()?;

    let identity = FirebaseService::verify_id_token(&dto.id_token).await?;
    let users = db.collection::<User>(USERS);

    if let Some(user) = users
        .find_one(doc! { "firebase_uid": &identity.local_id }, None)
        .await?
    {
        return Ok(Json(ApiResponse::success_with_message(
            "Login successful",
            session_payload(user)?,
        )));
    }

    let email = identity
        .email
        .as_deref()
        .map(normalize_email)
        .ok_or_else(|| ApiError::bad_request("Firebase account has no email address"))?;

    let owner = users.find_one(doc! { "email": &email }, None).await?;

    let user = match (link_decision(owner.as_ref(), identity.email_verified), owner) {
        (FirebaseLink::Unverified, _) => {
            return Err(ApiError::forbidden("Firebase email address is not verified"));
        }
        (FirebaseLink::Conflict, _) => {
            warn!("Firebase uid {} tried to claim {}", identity.local_id, email);
            return Err(ApiError::conflict("Email is linked to another sign-in account"));
        }
        (FirebaseLink::Link, Some(mut user)) => {
            let linked = users
                .update_one(
                    doc! { "_id": user.id, "firebase_uid": null },
                    doc! { "$set": { "firebase_uid": &identity.local_id, "updated_at": DateTime::now() } },
                    None,
                )
                .await?;
            if linked.modified_count == 0 {
                return Err(ApiError::conflict("Email is linked to another sign-in account"));
            }
            info!("Linked Firebase sign-in to {}", user.email);
            user.firebase_uid = Some(identity.local_id.clone());
            user
        }
        _ => {
            let name = identity
                .display_name
                .clone()
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| email.split('@').next().unwrap_or("user").to_string());

            let mut user = User::new(name, email, dto.role.unwrap_or(Role::Client));
            user.firebase_uid = Some(identity.local_id.clone());
            user.avatar_url = identity.photo_url.clone();

            let result = users.insert_one(&user, None).await.map_err(|e| {
                if crate::db::is_duplicate_key(&e) {
                    ApiError::conflict("Email is already registered")
                } else {
                    ApiError::from(e)
                }
            })?;
            user.id = result.inserted_id.as_object_id();
            info!("Created {} from Firebase sign-in", user.email);
            user
        }
    };

    Ok(Json(ApiResponse::success_with_message(
        "Login successful",
        session_payload(user)?,
    )))
}

/// --------------------
/// Refresh Token
/// --------------------
#[openapi(tag = "Auth")]
#[post("/auth/refresh", data = "<dto>")]
pub async fn refresh_token(db: &State<DbConn>, dto: Json<RefreshTokenDto>) -> ApiResult {
    dto.validate()?;

    let claims = JwtService::verify_token(&dto.refresh_token, true)
        .map_err(|_| ApiError::unauthorized("Invalid refresh token"))?;
    let user_id = mongodb::bson::oid::ObjectId::parse_str(&claims.sub)
        .map_err(|_| ApiError::unauthorized("Invalid refresh token"))?;

    // Role or email may have changed since the token was issued.
    let user = db
        .collection::<User>(USERS)
        .find_one(doc! { "_id": user_id }, None)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Account no longer exists"))?;

    Ok(Json(ApiResponse::success(session_payload(user)?)))
}

fn queue_reset_mail(email: String, code: String) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if !EmailService::send_password_reset_email(&email, &code).await {
            warn!("Password reset code for {} could not be mailed", email);
        }
    })
}

/// --------------------
/// Forgot password
/// --------------------
#[openapi(tag = "Auth")]
#[post("/auth/forgot-password", data = "<dto>")]
pub async fn forgot_password(db: &State<DbConn>, dto: Json<ForgotPasswordDto>) -> ApiResult {
    dto.validate()?;
    let email = normalize_email(&dto.email);

    rate_limit::rate_limit(db, &format!("forgot:{}", email), FORGOT_LIMIT, FORGOT_WINDOW_MS).await?;

    let user = db
        .collection::<User>(USERS)
        .find_one(doc! { "email": &email }, None)
        .await?;

    if user.is_some() {
        let resets = db.collection::<PasswordReset>(PASSWORD_RESETS);
        resets.delete_many(doc! { "email": &email }, None).await?;

        let reset = PasswordReset::new(email.clone(), generate_code());
        resets.insert_one(&reset, None).await?;

        // Response time must not depend on whether the account exists.
        queue_reset_mail(email, reset.code);
    }

    // Same answer whether or not the account exists.
    Ok(Json(ApiResponse::success(serde_json::json!({
        "message": "If the email is registered, a reset code has been sent"
    }))))
}

/// --------------------
/// Reset password
/// --------------------
#[openapi(tag = "Auth")]
#[post("/auth/reset-password", data = "<dto>")]
pub async fn reset_password(db: &State<DbConn>, dto: Json<ResetPasswordDto>) -> ApiResult {
    dto.validate()?;
    let dto = dto.into_inner();
    let email = normalize_email(&dto.email);
    let invalid = || ApiError::bad_request("Invalid or expired reset code");

    let resets = db.collection::<PasswordReset>(PASSWORD_RESETS);

    // Too many guesses burn the outstanding code.
    if let Err(e) = rate_limit::rate_limit(db, &format!("reset:{}", email), RESET_LIMIT, FORGOT_WINDOW_MS).await {
        if e.status == rocket::http::Status::TooManyRequests {
            resets.delete_many(doc! { "email": &email }, None).await?;
        }
        return Err(e);
    }

    let reset = resets
        .find_one(doc! { "email": &email, "code": &dto.code }, None)
        .await?
        .ok_or_else(invalid)?;

    if !reset.is_usable() {
        return Err(invalid());
    }

    // Claim the code before touching the password so it cannot be replayed.
    let claimed = resets
        .update_one(reset.claim_filter(), doc! { "$set": { "used": true } }, None)
        .await?;
    if claimed.modified_count == 0 {
        return Err(invalid());
    }

    let hash = hash_password(dto.new_password).await?;
    let result = db
        .collection::<User>(USERS)
        .update_one(
            doc! { "email": &email },
            doc! { "$set": { "password_hash": hash, "updated_at": DateTime::now() } },
            None,
        )
        .await?;

    if result.matched_count == 0 {
        return Err(ApiError::not_found("User not found"));
    }

    Ok(Json(ApiResponse::success(serde_json::json!({
        "message": "Password updated successfully"
    }))))
}

/// Target of the JWT gate for rejected requests.
#[get("/__unauthorized")]
pub fn unauthorized() -> ApiError {
    ApiError::unauthorized("Missing or invalid access token")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emails_are_normalized() {
        assert_eq!(normalize_email("  Ana@Example.COM "), "ana@example.com");
    }

    #[test]
    fn session_payload_carries_tokens_and_profile() {
        let mut user = User::new("Ana".into(), "ana@example.com".into(), Role::Freelancer);
        user.id = Some(mongodb::bson::oid::ObjectId::new());

        let payload = session_payload(user).unwrap();
        assert_eq!(payload["tokens"]["token_type"], "Bearer");
        assert_eq!(payload["user"]["role"], "freelancer");

        let token = payload["tokens"]["access_token"].as_str().unwrap();
        assert_eq!(JwtService::verify_token(token, false).unwrap().email, "ana@example.com");
    }

    #[test]
    fn session_payload_requires_an_id() {
        let user = User::new("Ana".into(), "ana@example.com".into(), Role::Client);
        assert!(session_payload(user).is_err());
    }

    fn linked_user(uid: Option<&str>) -> User {
        let mut user = User::new("Ana".into(), "ana@example.com".into(), Role::Client);
        user.firebase_uid = uid.map(str::to_string);
        user
    }

    #[test]
    fn verified_email_links_a_password_account() {
        let owner = linked_user(None);
        assert_eq!(link_decision(Some(&owner), true), FirebaseLink::Link);
        assert_eq!(link_decision(None, true), FirebaseLink::Create);
    }

    #[test]
    fn unverified_email_never_links_or_creates() {
        let owner = linked_user(None);
        assert_eq!(link_decision(Some(&owner), false), FirebaseLink::Unverified);
        assert_eq!(link_decision(None, false), FirebaseLink::Unverified);
    }

    #[test]
    fn email_owned_by_another_firebase_uid_conflicts() {
        let owner = linked_user(Some("uid-original"));
        assert_eq!(link_decision(Some(&owner), true), FirebaseLink::Conflict);
    }

    #[rocket::async_test]
    async fn reset_mail_runs_off_the_request() {
        let handle = queue_reset_mail("ana@example.com".into(), "123456".into());
        assert!(handle.await.is_ok());
    }

    #[rocket::async_test]
    async fn password_hashes_verify() {
        let hash = hash_password("s3cretpass".into()).await.unwrap();
        assert!(verify_password("s3cretpass".into(), hash.clone()).await.unwrap());
        assert!(!verify_password("wrongpass1".into(), hash).await.unwrap());
    }
}
