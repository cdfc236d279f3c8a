use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::Config;
use super::{IntegrationError, upstream_error};

const PROVIDER: &str = "Cloudinary";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UploadedImage {
    pub public_id: String,
    pub secure_url: String,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub bytes: Option<u64>,
}

struct Credentials {
    cloud_name: String,
    api_key: String,
    api_secret: String,
}

pub struct CloudinaryService;

impl CloudinaryService {
    fn credentials() -> Result<Credentials, IntegrationError> {
        match (
            Config::cloudinary_cloud_name(),
            Config::cloudinary_api_key(),
            Config::cloudinary_api_secret(),
        ) {
            (Some(cloud_name), Some(api_key), Some(api_secret)) => Ok(Credentials {
                cloud_name,
                api_key,
                api_secret,
            }),
            _ => Err(IntegrationError::NotConfigured(PROVIDER)),
        }
    }

    /// Signed upload of a base64 image given as a data URI.
    pub async fn upload_image(data_uri: String, public_id: &str) -> Result<UploadedImage, IntegrationError> {
        let creds = Self::credentials()?;
        let folder = Config::cloudinary_folder();
        let timestamp = chrono::Utc::now().timestamp().to_string();

        let mut params = vec![
            ("folder", folder),
            ("overwrite", "true".to_string()),
            ("public_id", public_id.to_string()),
            ("timestamp", timestamp),
        ];
        let signature = Self::sign(&params, &creds.api_secret);

        params.push(("api_key", creds.api_key));
        params.push(("signature", signature));
        params.push(("signature_algorithm", "sha256".to_string()));
        params.push(("file", data_uri));

        let res = Client::new()
            .post(format!(
                "https://api.cloudinary.com/v1_1/{}/image/upload",
                creds.cloud_name
            ))
            .form(&params)
            .send()
            .await
            .map_err(IntegrationError::transport(PROVIDER))?;

        if !res.status().is_success() {
            return Err(upstream_error(PROVIDER, res).await);
        }

        res.json::<UploadedImage>()
            .await
            .map_err(|e| IntegrationError::invalid(PROVIDER, e))
    }

    /// Cloudinary signature: parameters sorted by name, joined as
    /// `k=v&k=v`, secret appended, hashed.
    pub fn sign(params: &[(&str, String)], api_secret: &str) -> String {
        let mut sorted: Vec<&(&str, String)> = params.iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(b.0));

        let to_sign = sorted
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");

        let mut hasher = Sha256::new();
        hasher.update(to_sign.as_bytes());
        hasher.update(api_secret.as_bytes());
        hex::encode(hasher.finalize())
    }
}
