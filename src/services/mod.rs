pub mod cloudinary;
pub mod email;
pub mod firebase;
pub mod gemini;
pub mod jwt;
pub mod midtrans;

pub use cloudinary::CloudinaryService;
pub use email::EmailService;
pub use firebase::FirebaseService;
pub use gemini::GeminiService;
pub use jwt::JwtService;
pub use midtrans::MidtransService;

use thiserror::Error;

/// Failure talking to one of the third-party providers.
#[derive(Debug, Error)]
pub enum IntegrationError {
    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    #[error("{provider} request failed: {source}")]
    Transport {
        provider: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{provider} responded with status {status}: {body}")]
    Upstream {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("{provider} returned an unexpected payload: {detail}")]
    InvalidResponse {
        provider: &'static str,
        detail: String,
    },

    #[error("{0}")]
    Rejected(String),
}

impl IntegrationError {
    pub(crate) fn transport(provider: &'static str) -> impl FnOnce(reqwest::Error) -> Self {
        move |source| IntegrationError::Transport { provider, source }
    }

    pub(crate) fn invalid(provider: &'static str, detail: impl ToString) -> Self {
        IntegrationError::InvalidResponse {
            provider,
            detail: detail.to_string(),
        }
    }
}

/// Reads the body of a non-2xx response into an `Upstream` error.
pub(crate) async fn upstream_error(provider: &'static str, res: reqwest::Response) -> IntegrationError {
    let status = res.status().as_u16();
    let body = res
        .text()
        .await
        .unwrap_or_else(|_| format!("{} error", provider));
    IntegrationError::Upstream { provider, status, body }
}
