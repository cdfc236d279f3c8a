use mongodb::bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};
use rocket_okapi::okapi::schemars;
use rocket_okapi::okapi::schemars::JsonSchema;
use validator::Validate;

use crate::utils::{validate_email, validate_password};
use super::iso;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Freelancer,
    Client,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Freelancer => "freelancer",
            Role::Client => "client",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct User {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firebase_uid: Option<String>,
    pub role: Role,
    #[serde(default)]
    pub balance: f64,
    /// Order ids already added to `balance`; makes crediting idempotent.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub credited_orders: Vec<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub location: Option<String>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

impl User {
    pub fn new(name: String, email: String, role: Role) -> Self {
        let now = DateTime::now();
        User {
            id: None,
            name,
            email,
            password_hash: None,
            firebase_uid: None,
            role,
            credited_orders: Vec::new(),
            balance: 0.0,
            skills: Vec::new(),
            bio: None,
            avatar_url: None,
            location: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Deserialize, Validate, JsonSchema)]
pub struct RegisterDto {
    #[validate(length(min = 2, max = 100))]
    pub name: String,
    #[validate(custom = "validate_email")]
    pub email: String,
    #[validate(custom = "validate_password")]
    pub password: String,
    pub role: Role,
}

#[derive(Debug, Deserialize, Validate, JsonSchema)]
pub struct LoginDto {
    #[validate(custom = "validate_email")]
    pub email: String,
    #[validate(length(min = 1))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate, JsonSchema)]
pub struct FirebaseLoginDto {
    #[validate(length(min = 10))]
    pub id_token: String,
    /// Only used when the account is created on first sign-in.
    pub role: Option<Role>,
}

#[derive(Debug, Deserialize, Validate, JsonSchema)]
pub struct RefreshTokenDto {
    #[validate(length(min = 1))]
    pub refresh_token: String,
}

#[derive(Debug, Deserialize, Validate, JsonSchema)]
pub struct ForgotPasswordDto {
    #[validate(custom = "validate_email")]
    pub email: String,
}

#[derive(Debug, Deserialize, Validate, JsonSchema)]
pub struct ResetPasswordDto {
    #[validate(custom = "validate_email")]
    pub email: String,
    #[validate(length(equal = 6))]
    pub code: String,
    #[validate(custom = "validate_password")]
    pub new_password: String,
}

#[derive(Debug, Deserialize, Validate, JsonSchema)]
pub struct UpdateUserDto {
    #[validate(length(min = 2, max = 100))]
    pub name: Option<String>,
    #[validate(length(max = 1000))]
    pub bio: Option<String>,
    #[validate(length(max = 30))]
    pub skills: Option<Vec<String>>,
    #[validate(length(max = 100))]
    pub location: Option<String>,
    #[validate(url)]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Deserialize, Validate, JsonSchema)]
pub struct AvatarUploadDto {
    #[validate(length(min = 1))]
    pub mime_type: String,
    /// Base64 payload, with or without a `data:` prefix.
    #[validate(length(min = 1))]
    pub data: String,
}

/// The caller's own profile.
#[derive(Debug, Serialize, JsonSchema)]
pub struct UserResponse {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub balance: f64,
    pub skills: Vec<String>,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub location: Option<String>,
    pub has_password: bool,
    pub created_at: String,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        UserResponse {
            id: user.id.map(|id| id.to_hex()).unwrap_or_default(),
            name: user.name,
            email: user.email,
            role: user.role,
            balance: user.balance,
            skills: user.skills,
            bio: user.bio,
            avatar_url: user.avatar_url,
            location: user.location,
            has_password: user.password_hash.is_some(),
            created_at: iso(&user.created_at),
        }
    }
}

/// What other users may see.
#[derive(Debug, Serialize, JsonSchema)]
pub struct PublicUserResponse {
    pub id: String,
    pub name: String,
    pub role: Role,
    pub skills: Vec<String>,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub location: Option<String>,
    pub member_since: String,
}

impl From<User> for PublicUserResponse {
    fn from(user: User) -> Self {
        PublicUserResponse {
            id: user.id.map(|id| id.to_hex()).unwrap_or_default(),
            name: user.name,
            role: user.role,
            skills: user.skills,
            bio: user.bio,
            avatar_url: user.avatar_url,
            location: user.location,
            member_since: iso(&user.created_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_value(Role::Freelancer).unwrap(), "freelancer");
        let role: Role = serde_json::from_str("\"client\"").unwrap();
        assert_eq!(role, Role::Client);
        assert!(serde_json::from_str::<Role>("\"admin\"").is_err());
    }

    #[test]
    fn register_rules() {
        let ok = RegisterDto {
            name: "Dewi".into(),
            email: "dewi@example.com".into(),
            password: "s3cretpass".into(),
            role: Role::Client,
        };
        assert!(ok.validate().is_ok());

        let bad = RegisterDto { password: "short".into(), email: "nope".into(), ..ok };
        let errors = bad.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("password"));
        assert!(fields.contains_key("email"));
    }

    #[test]
    fn public_profile_hides_private_fields() {
        let mut user = User::new("Rina".into(), "rina@example.com".into(), Role::Freelancer);
        user.id = Some(ObjectId::new());
        user.balance = 500000.0;
        user.password_hash = Some("hash".into());

        let public = serde_json::to_value(PublicUserResponse::from(user.clone())).unwrap();
        assert!(public.get("email").is_none());
        assert!(public.get("balance").is_none());

        let private = UserResponse::from(user);
        assert!(private.has_password);
        assert_eq!(private.balance, 500000.0);
    }

    #[test]
    fn stored_document_skips_absent_credentials() {
        let user = User::new("Agus".into(), "agus@example.com".into(), Role::Client);
        let doc = mongodb::bson::to_document(&user).unwrap();
        assert!(!doc.contains_key("_id"));
        assert!(!doc.contains_key("password_hash"));
        assert_eq!(doc.get_str("role").unwrap(), "client");
    }
}
