use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::config::Config;
use super::{IntegrationError, upstream_error};

const PROVIDER: &str = "Firebase";
const LOOKUP_URL: &str = "https://identitytoolkit.googleapis.com/v1/accounts:lookup";

/// Identity attached to a verified Firebase ID token.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirebaseUser {
    pub local_id: String,
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    users: Vec<FirebaseUser>,
}

pub struct FirebaseService;

impl FirebaseService {
    /// Resolves an ID token through Identity Toolkit; an invalid or expired
    /// token is reported as `Rejected`.
    pub async fn verify_id_token(id_token: &str) -> Result<FirebaseUser, IntegrationError> {
        let api_key = Config::firebase_api_key().ok_or(IntegrationError::NotConfigured(PROVIDER))?;

        let res = Client::new()
            .post(LOOKUP_URL)
            .query(&[("key", api_key)])
            .json(&json!({ "idToken": id_token }))
            .send()
            .await
            .map_err(IntegrationError::transport(PROVIDER))?;

        if res.status() == reqwest::StatusCode::BAD_REQUEST {
            return Err(IntegrationError::Rejected("Invalid Firebase ID token".to_string()));
        }
        if !res.status().is_success() {
            return Err(upstream_error(PROVIDER, res).await);
        }

        let body: LookupResponse = res
            .json()
            .await
            .map_err(|e| IntegrationError::invalid(PROVIDER, e))?;

        Self::first_user(body)
    }

    fn first_user(body: LookupResponse) -> Result<FirebaseUser, IntegrationError> {
        body.users
            .into_iter()
            .next()
            .ok_or_else(|| IntegrationError::Rejected("Firebase account not found".to_string()))
    }
}
