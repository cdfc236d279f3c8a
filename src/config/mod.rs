use rocket::fairing::AdHoc;
use rocket::figment::{Figment, providers::{Env, Format, Toml}};
use rocket::Config as RocketConfig;
use log::error;
use std::env;

pub struct Config;

impl Config {
    /// `ROCKET_PROFILE`, else "development" for debug builds and
    /// "production" for release builds.
    fn profile() -> String {
        env::var("ROCKET_PROFILE").unwrap_or_else(|_| {
            if cfg!(debug_assertions) { "development" } else { "production" }.to_string()
        })
    }

    fn figment() -> Figment {
        let profile = Self::profile();

        Figment::from(RocketConfig::default())
            .merge(Toml::file("Rocket.toml").nested())
            .select(&profile)
            .merge(Env::prefixed("ROCKET_").split("__"))
    }

    fn optional(key: &str) -> Option<String> {
        Self::figment()
            .extract_inner::<String>(key)
            .ok()
            .filter(|v| !v.trim().is_empty())
    }

    /// No built-in fallback: an unset secret fails token signing and
    /// `secrets_check` refuses to launch.
    pub fn jwt_secret() -> Option<String> {
        Self::optional("jwt_secret")
    }

    pub fn jwt_refresh_secret() -> Option<String> {
        Self::optional("jwt_refresh_secret")
    }

    /// Problems with the signing secrets, empty when launch may proceed.
    pub fn secret_problems(access: Option<&str>, refresh: Option<&str>) -> Vec<&'static str> {
        let mut problems = Vec::new();
        if access.is_none() {
            problems.push("jwt_secret is not set");
        }
        if refresh.is_none() {
            problems.push("jwt_refresh_secret is not set");
        }
        if access.is_some() && access == refresh {
            problems.push("jwt_secret and jwt_refresh_secret must differ");
        }
        problems
    }

    /// Access token lifetime in seconds.
    pub fn jwt_expiry() -> i64 {
        Self::figment()
            .extract_inner("jwt_expiry")
            .unwrap_or(3600)
    }

    pub fn jwt_refresh_expiry() -> i64 {
        Self::figment()
            .extract_inner("jwt_refresh_expiry")
            .unwrap_or(604800)
    }

    pub fn mongodb_uri() -> String {
        Self::figment()
            .extract_inner("mongodb_uri")
            .unwrap_or_else(|_| "mongodb://localhost:27017".to_string())
    }

    pub fn database_name() -> String {
        Self::figment()
            .extract_inner("database_name")
            .unwrap_or_else(|_| "freelance-marketplace".to_string())
    }

    pub fn is_development() -> bool {
        Self::profile() == "development"
    }

    /* ----------------------------- Mail (Resend SMTP) ----------------------------- */

    pub fn mail_host() -> String {
        Self::figment()
            .extract_inner("mail_host")
            .unwrap_or_else(|_| "smtp.resend.com".to_string())
    }

    pub fn mail_user() -> String {
        Self::figment()
            .extract_inner("mail_user")
            .unwrap_or_else(|_| "resend".to_string())
    }

    pub fn resend_api_key() -> Option<String> {
        Self::optional("resend_api_key")
    }

    pub fn mail_from() -> String {
        Self::figment()
            .extract_inner("mail_from")
            .unwrap_or_else(|_| "Freelance Marketplace <noreply@example.com>".to_string())
    }

    pub fn is_mail_enabled() -> bool {
        Self::resend_api_key().is_some()
    }

    /* ----------------------------- Midtrans ----------------------------- */

    pub fn midtrans_server_key() -> Option<String> {
        Self::optional("midtrans_server_key")
    }

    pub fn midtrans_client_key() -> Option<String> {
        Self::optional("midtrans_client_key")
    }

    pub fn midtrans_is_production() -> bool {
        Self::figment()
            .extract_inner("midtrans_is_production")
            .unwrap_or(false)
    }

    /* ----------------------------- Firebase ----------------------------- */

    pub fn firebase_api_key() -> Option<String> {
        Self::optional("firebase_api_key")
    }

    /* ----------------------------- Cloudinary ----------------------------- */

    pub fn cloudinary_cloud_name() -> Option<String> {
        Self::optional("cloudinary_cloud_name")
    }

    pub fn cloudinary_api_key() -> Option<String> {
        Self::optional("cloudinary_api_key")
    }

    pub fn cloudinary_api_secret() -> Option<String> {
        Self::optional("cloudinary_api_secret")
    }

    pub fn cloudinary_folder() -> String {
        Self::figment()
            .extract_inner("cloudinary_folder")
            .unwrap_or_else(|_| "freelance-marketplace".to_string())
    }

    /* ----------------------------- Gemini ----------------------------- */

    pub fn gemini_api_key() -> Option<String> {
        Self::optional("gemini_api_key")
    }

    pub fn gemini_model() -> String {
        Self::figment()
            .extract_inner("gemini_model")
            .unwrap_or_else(|_| "gemini-1.5-flash".to_string())
    }
}

/// Aborts ignition when the JWT secrets are missing or shared.
pub fn secrets_check() -> AdHoc {
    AdHoc::try_on_ignite("JWT secrets", |rocket| async {
        let (access, refresh) = (Config::jwt_secret(), Config::jwt_refresh_secret());
        let problems = Config::secret_problems(access.as_deref(), refresh.as_deref());
        if problems.is_empty() {
            return Ok(rocket);
        }
        for problem in problems {
            error!("✗ {}", problem);
        }
        Err(rocket)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_defaults_without_configuration() {
        assert!(Config::jwt_expiry() > 0);
        assert!(Config::jwt_refresh_expiry() > Config::jwt_expiry());
        assert!(!Config::database_name().is_empty());
        assert!(!Config::gemini_model().is_empty());
    }

    #[test]
    fn missing_or_shared_secrets_block_launch() {
        assert_eq!(Config::secret_problems(None, Some("r")).len(), 1);
        assert_eq!(Config::secret_problems(None, None).len(), 2);
        assert_eq!(Config::secret_problems(Some("same"), Some("same")).len(), 1);
        assert!(Config::secret_problems(Some("a"), Some("r")).is_empty());
    }
}
