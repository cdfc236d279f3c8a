use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha512};

use crate::config::Config;
use crate::models::PaymentStatus;
use super::{IntegrationError, upstream_error};

const PROVIDER: &str = "Midtrans";

const SNAP_SANDBOX: &str = "https://app.sandbox.midtrans.com/snap/v1/transactions";
const SNAP_PRODUCTION: &str = "https://app.midtrans.com/snap/v1/transactions";
const CORE_SANDBOX: &str = "https://api.sandbox.midtrans.com/v2";
const CORE_PRODUCTION: &str = "https://api.midtrans.com/v2";

/// Hosted checkout session returned by Snap.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SnapTransaction {
    pub token: String,
    pub redirect_url: String,
}

/// Fields shared by the HTTP notification and the Core API status
/// response. Midtrans sends amounts and status codes as strings.
#[derive(Debug, Clone, Deserialize, Serialize, rocket_okapi::okapi::schemars::JsonSchema)]
pub struct TransactionNotification {
    pub order_id: String,
    pub status_code: String,
    pub gross_amount: String,
    #[serde(default)]
    pub signature_key: Option<String>,
    pub transaction_status: String,
    #[serde(default)]
    pub fraud_status: Option<String>,
    #[serde(default)]
    pub payment_type: Option<String>,
    #[serde(default)]
    pub transaction_id: Option<String>,
}

pub struct ChargeRequest<'a> {
    pub order_id: &'a str,
    pub amount: i64,
    pub item_id: &'a str,
    pub item_name: &'a str,
    pub customer_name: &'a str,
    pub customer_email: &'a str,
}

pub struct MidtransService;

impl MidtransService {
    fn server_key() -> Result<String, IntegrationError> {
        Config::midtrans_server_key().ok_or(IntegrationError::NotConfigured(PROVIDER))
    }

    fn snap_url() -> &'static str {
        if Config::midtrans_is_production() { SNAP_PRODUCTION } else { SNAP_SANDBOX }
    }

    fn core_url() -> &'static str {
        if Config::midtrans_is_production() { CORE_PRODUCTION } else { CORE_SANDBOX }
    }

    /// Opens a Snap checkout session for a single line item.
    pub async fn create_transaction(req: ChargeRequest<'_>) -> Result<SnapTransaction, IntegrationError> {
        let server_key = Self::server_key()?;

        // Item names are capped at 50 characters by Midtrans.
        let item_name: String = req.item_name.chars().take(50).collect();

        let body = json!({
            "transaction_details": {
                "order_id": req.order_id,
                "gross_amount": req.amount
            },
            "item_details": [{
                "id": req.item_id,
                "price": req.amount,
                "quantity": 1,
                "name": item_name
            }],
            "customer_details": {
                "first_name": req.customer_name,
                "email": req.customer_email
            }
        });

        let res = Client::new()
            .post(Self::snap_url())
            .basic_auth(server_key, Some(""))
            .header("Accept", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(IntegrationError::transport(PROVIDER))?;

        if !res.status().is_success() {
            return Err(upstream_error(PROVIDER, res).await);
        }

        res.json::<SnapTransaction>()
            .await
            .map_err(|e| IntegrationError::invalid(PROVIDER, e))
    }

    /// Core API transaction status lookup.
    pub async fn transaction_status(order_id: &str) -> Result<TransactionNotification, IntegrationError> {
        let server_key = Self::server_key()?;

        let res = Client::new()
            .get(format!("{}/{}/status", Self::core_url(), order_id))
            .basic_auth(server_key, Some(""))
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(IntegrationError::transport(PROVIDER))?;

        if !res.status().is_success() {
            return Err(upstream_error(PROVIDER, res).await);
        }

        let value: serde_json::Value = res
            .json()
            .await
            .map_err(|e| IntegrationError::invalid(PROVIDER, e))?;

        // Unknown orders come back as HTTP 200 with status_code 404 in the body.
        if value.get("status_code").and_then(|s| s.as_str()) == Some("404") {
            return Err(IntegrationError::Rejected(format!(
                "Transaction {} not found at Midtrans",
                order_id
            )));
        }

        serde_json::from_value(value).map_err(|e| IntegrationError::invalid(PROVIDER, e))
    }

    /// Checks `signature_key` against SHA512(order_id + status_code + gross_amount + server_key).
    pub fn verify_signature(notification: &TransactionNotification) -> Result<bool, IntegrationError> {
        let server_key = Self::server_key()?;
        Ok(Self::signature_matches(notification, &server_key))
    }

    pub fn signature_matches(notification: &TransactionNotification, server_key: &str) -> bool {
        let Some(ref provided) = notification.signature_key else {
            return false;
        };

        let expected = Self::signature(
            &notification.order_id,
            &notification.status_code,
            &notification.gross_amount,
            server_key,
        );

        expected.eq_ignore_ascii_case(provided)
    }

    pub fn signature(order_id: &str, status_code: &str, gross_amount: &str, server_key: &str) -> String {
        let mut hasher = Sha512::new();
        hasher.update(order_id.as_bytes());
        hasher.update(status_code.as_bytes());
        hasher.update(gross_amount.as_bytes());
        hasher.update(server_key.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Maps a Midtrans transaction/fraud status pair onto our payment status.
    /// Returns `None` for statuses we do not act on.
    pub fn map_status(transaction_status: &str, fraud_status: Option<&str>) -> Option<PaymentStatus> {
        match transaction_status {
            "capture" => match fraud_status {
                Some("challenge") => Some(PaymentStatus::Pending),
                Some("deny") => Some(PaymentStatus::Failed),
                _ => Some(PaymentStatus::Success),
            },
            "settlement" => Some(PaymentStatus::Success),
            "pending" | "authorize" => Some(PaymentStatus::Pending),
            "deny" | "cancel" | "failure" => Some(PaymentStatus::Failed),
            "expire" => Some(PaymentStatus::Expired),
            "refund" | "partial_refund" | "chargeback" | "partial_chargeback" => {
                Some(PaymentStatus::Refunded)
            }
            _ => None,
        }
    }

    /// Midtrans only accepts whole rupiah amounts.
    pub fn gross_amount(amount: f64) -> i64 {
        amount.round() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notification(signature: Option<String>) -> TransactionNotification {
        TransactionNotification {
            order_id: "ORDER-123".into(),
            status_code: "200".into(),
            gross_amount: "150000.00".into(),
            signature_key: signature,
            transaction_status: "settlement".into(),
            fraud_status: Some("accept".into()),
            payment_type: Some("bank_transfer".into()),
            transaction_id: Some("tx-1".into()),
        }
    }

    #[test]
    fn signature_is_sha512_hex_of_concatenated_fields() {
        let sig = MidtransService::signature("ORDER-123", "200", "150000.00", "SB-Mid-server-key");
        assert_eq!(sig.len(), 128);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));

        let mut hasher = Sha512::new();
        hasher.update(b"ORDER-123200150000.00SB-Mid-server-key");
        assert_eq!(sig, hex::encode(hasher.finalize()));
    }

    #[test]
    fn matching_signature_is_accepted() {
        let sig = MidtransService::signature("ORDER-123", "200", "150000.00", "key");
        assert!(MidtransService::signature_matches(&notification(Some(sig.to_uppercase())), "key"));
    }

    #[test]
    fn tampered_or_missing_signature_is_rejected() {
        let sig = MidtransService::signature("ORDER-123", "200", "1.00", "key");
        assert!(!MidtransService::signature_matches(&notification(Some(sig)), "key"));
        assert!(!MidtransService::signature_matches(&notification(None), "key"));
    }

    #[test]
    fn status_mapping() {
        use PaymentStatus::*;
        assert_eq!(MidtransService::map_status("capture", Some("accept")), Some(Success));
        assert_eq!(MidtransService::map_status("capture", Some("challenge")), Some(Pending));
        assert_eq!(MidtransService::map_status("capture", Some("deny")), Some(Failed));
        assert_eq!(MidtransService::map_status("settlement", None), Some(Success));
        assert_eq!(MidtransService::map_status("pending", None), Some(Pending));
        assert_eq!(MidtransService::map_status("cancel", None), Some(Failed));
        assert_eq!(MidtransService::map_status("expire", None), Some(Expired));
        assert_eq!(MidtransService::map_status("partial_refund", None), Some(Refunded));
        assert_eq!(MidtransService::map_status("mystery", None), None);
    }

    #[test]
    fn notification_parses_from_webhook_body() {
        let body = r#"{
            "transaction_time": "2024-05-01 10:00:00",
            "transaction_status": "capture",
            "transaction_id": "abc",
            "status_code": "200",
            "signature_key": "ff",
            "payment_type": "credit_card",
            "order_id": "ORDER-1",
            "gross_amount": "10000.00",
            "fraud_status": "accept"
        }"#;
        let n: TransactionNotification = serde_json::from_str(body).unwrap();
        assert_eq!(n.order_id, "ORDER-1");
        assert_eq!(n.fraud_status.as_deref(), Some("accept"));
    }

    #[test]
    fn amounts_are_rounded_to_whole_rupiah() {
        assert_eq!(MidtransService::gross_amount(150000.4), 150000);
        assert_eq!(MidtransService::gross_amount(99.5), 100);
    }
}
