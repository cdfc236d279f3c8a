use mongodb::bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};
use rocket_okapi::okapi::schemars;
use rocket_okapi::okapi::schemars::JsonSchema;
use validator::{Validate, ValidationError};

use crate::utils::validate_object_id_str;
use super::iso;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Success,
    Failed,
    Expired,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Success => "success",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Expired => "expired",
            PaymentStatus::Refunded => "refunded",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(PaymentStatus::Pending),
            "success" => Some(PaymentStatus::Success),
            "failed" => Some(PaymentStatus::Failed),
            "expired" => Some(PaymentStatus::Expired),
            "refunded" => Some(PaymentStatus::Refunded),
            _ => None,
        }
    }

    /// Whether a stored payment in `self` may move to `next`.
    /// Only pending payments settle; only successful ones are refunded.
    pub fn can_become(&self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, next),
            (Pending, Success) | (Pending, Failed) | (Pending, Expired) | (Success, Refunded)
        )
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Payment {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub order_id: String,
    pub payer_id: ObjectId,
    pub payee_id: ObjectId,
    pub project_id: Option<ObjectId>,
    pub service_id: Option<ObjectId>,
    pub description: String,
    pub amount: f64,
    pub status: PaymentStatus,
    pub snap_token: Option<String>,
    pub redirect_url: Option<String>,
    pub payment_type: Option<String>,
    pub transaction_id: Option<String>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

fn validate_payment_target(dto: &CreatePaymentDto) -> Result<(), ValidationError> {
    if dto.project_id.is_some() == dto.service_id.is_some() {
        let mut err = ValidationError::new("target");
        err.message = Some("exactly one of project_id or service_id is required".into());
        return Err(err);
    }
    Ok(())
}

#[derive(Debug, Deserialize, Validate, JsonSchema)]
#[validate(schema(function = "validate_payment_target", skip_on_field_errors = false))]
pub struct CreatePaymentDto {
    #[validate(custom = "validate_object_id_str")]
    pub project_id: Option<String>,
    #[validate(custom = "validate_object_id_str")]
    pub service_id: Option<String>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct PaymentResponse {
    pub id: String,
    pub order_id: String,
    pub payer_id: String,
    pub payee_id: String,
    pub project_id: Option<String>,
    pub service_id: Option<String>,
    pub description: String,
    pub amount: f64,
    pub status: PaymentStatus,
    pub redirect_url: Option<String>,
    pub payment_type: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Payment> for PaymentResponse {
    fn from(p: Payment) -> Self {
        PaymentResponse {
            id: p.id.map(|id| id.to_hex()).unwrap_or_default(),
            order_id: p.order_id,
            payer_id: p.payer_id.to_hex(),
            payee_id: p.payee_id.to_hex(),
            project_id: p.project_id.map(|id| id.to_hex()),
            service_id: p.service_id.map(|id| id.to_hex()),
            description: p.description,
            amount: p.amount,
            status: p.status,
            redirect_url: p.redirect_url,
            payment_type: p.payment_type,
            created_at: iso(&p.created_at),
            updated_at: iso(&p.updated_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions() {
        use PaymentStatus::*;
        assert!(Pending.can_become(Success));
        assert!(Pending.can_become(Expired));
        assert!(Success.can_become(Refunded));
        assert!(!Success.can_become(Failed));
        assert!(!Pending.can_become(Pending));
        assert!(!Refunded.can_become(Success));
        assert!(!Failed.can_become(Success));
    }

    #[test]
    fn parse_accepts_wire_names_only() {
        assert_eq!(PaymentStatus::parse("expired"), Some(PaymentStatus::Expired));
        assert_eq!(PaymentStatus::parse(PaymentStatus::Refunded.as_str()), Some(PaymentStatus::Refunded));
        assert_eq!(PaymentStatus::parse("Success"), None);
        assert_eq!(PaymentStatus::parse("settlement"), None);
    }

    #[test]
    fn exactly_one_target() {
        let id = ObjectId::new().to_hex();
        let both = CreatePaymentDto { project_id: Some(id.clone()), service_id: Some(id.clone()) };
        assert!(both.validate().is_err());
        let neither = CreatePaymentDto { project_id: None, service_id: None };
        assert!(neither.validate().is_err());
        let one = CreatePaymentDto { project_id: Some(id), service_id: None };
        assert!(one.validate().is_ok());
        let malformed = CreatePaymentDto { project_id: None, service_id: Some("zzz".into()) };
        assert!(malformed.validate().is_err());
    }

    #[test]
    fn status_wire_format() {
        assert_eq!(serde_json::to_value(PaymentStatus::Refunded).unwrap(), "refunded");
        assert_eq!(mongodb::bson::to_bson(&PaymentStatus::Success).unwrap().as_str(), Some("success"));
    }
}
