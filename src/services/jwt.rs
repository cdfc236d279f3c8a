use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{encode, decode, Header, Validation, EncodingKey, DecodingKey};
use serde::{Deserialize, Serialize};
use mongodb::bson::oid::ObjectId;

use crate::models::Role;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,  // User ID
    pub email: String,
    pub role: Role,
    pub exp: i64,
    pub iat: i64,
}

/// Access + refresh pair handed out on every successful sign-in.
#[derive(Debug, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
}

pub struct JwtService;

impl JwtService {
    fn secret(value: Option<String>) -> Result<String, jsonwebtoken::errors::Error> {
        value.ok_or_else(|| ErrorKind::InvalidKeyFormat.into())
    }

    fn sign(
        user_id: &ObjectId,
        email: &str,
        role: Role,
        expiry: i64,
        secret: &str,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let now = chrono::Utc::now().timestamp();

        let claims = Claims {
            sub: user_id.to_hex(),
            email: email.to_string(),
            role,
            exp: now + expiry,
            iat: now,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
    }

    pub fn generate_access_token(user_id: &ObjectId, email: &str, role: Role) -> Result<String, jsonwebtoken::errors::Error> {
        Self::sign(
            user_id,
            email,
            role,
            crate::config::Config::jwt_expiry(),
            &Self::secret(crate::config::Config::jwt_secret())?,
        )
    }

    pub fn generate_refresh_token(user_id: &ObjectId, email: &str, role: Role) -> Result<String, jsonwebtoken::errors::Error> {
        Self::sign(
            user_id,
            email,
            role,
            crate::config::Config::jwt_refresh_expiry(),
            &Self::secret(crate::config::Config::jwt_refresh_secret())?,
        )
    }

    pub fn issue_pair(user_id: &ObjectId, email: &str, role: Role) -> Result<TokenPair, jsonwebtoken::errors::Error> {
        Ok(TokenPair {
            access_token: Self::generate_access_token(user_id, email, role)?,
            refresh_token: Self::generate_refresh_token(user_id, email, role)?,
            token_type: "Bearer",
            expires_in: crate::config::Config::jwt_expiry(),
        })
    }

    pub fn verify_token(token: &str, is_refresh: bool) -> Result<Claims, jsonwebtoken::errors::Error> {
        let secret = Self::secret(if is_refresh {
            crate::config::Config::jwt_refresh_secret()
        } else {
            crate::config::Config::jwt_secret()
        })?;

        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &Validation::default(),
        )?;

        Ok(token_data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_token_round_trips_identity() {
        let id = ObjectId::new();
        let token = JwtService::generate_access_token(&id, "ana@example.com", Role::Freelancer).unwrap();
        let claims = JwtService::verify_token(&token, false).unwrap();
        assert_eq!(claims.sub, id.to_hex());
        assert_eq!(claims.email, "ana@example.com");
        assert_eq!(claims.role, Role::Freelancer);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn refresh_token_is_not_an_access_token() {
        let id = ObjectId::new();
        let pair = JwtService::issue_pair(&id, "budi@example.com", Role::Client).unwrap();
        assert!(JwtService::verify_token(&pair.refresh_token, true).is_ok());
        assert!(JwtService::verify_token(&pair.refresh_token, false).is_err());
        assert!(JwtService::verify_token(&pair.access_token, true).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let id = ObjectId::new();
        let token = JwtService::sign(&id, "c@example.com", Role::Client, -3600, &crate::config::Config::jwt_secret().unwrap()).unwrap();
        assert!(JwtService::verify_token(&token, false).is_err());
    }

    #[test]
    fn unset_secret_refuses_to_sign() {
        assert!(JwtService::secret(None).is_err());
        assert_eq!(JwtService::secret(Some("k".into())).unwrap(), "k");
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(JwtService::verify_token("not.a.jwt", false).is_err());
    }
}
