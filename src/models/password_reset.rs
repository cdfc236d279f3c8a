use mongodb::bson::{doc, oid::ObjectId, DateTime, Document};
use serde::{Deserialize, Serialize};

pub const RESET_CODE_TTL_MS: i64 = 15 * 60 * 1000;

/// Single-use code mailed by the forgot-password flow.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PasswordReset {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub email: String,
    pub code: String,
    pub used: bool,
    pub expires_at: DateTime,
    pub created_at: DateTime,
}

impl PasswordReset {
    pub fn new(email: String, code: String) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        PasswordReset {
            id: None,
            email,
            code,
            used: false,
            expires_at: DateTime::from_millis(now + RESET_CODE_TTL_MS),
            created_at: DateTime::from_millis(now),
        }
    }

    pub fn is_usable(&self) -> bool {
        !self.used && self.expires_at > DateTime::now()
    }

    /// Matches this code only while it is still unused and unexpired, so
    /// exactly one concurrent reset can flip `used`.
    pub fn claim_filter(&self) -> Document {
        doc! {
            "_id": self.id,
            "used": false,
            "expires_at": { "$gt": DateTime::now() },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_code_is_usable_until_used_or_expired() {
        let mut reset = PasswordReset::new("a@example.com".into(), "123456".into());
        assert!(reset.is_usable());
        reset.used = true;
        assert!(!reset.is_usable());
        reset.used = false;
        reset.expires_at = DateTime::from_millis(0);
        assert!(!reset.is_usable());
    }

    #[test]
    fn claim_filter_only_matches_unused_codes() {
        let mut reset = PasswordReset::new("a@example.com".into(), "123456".into());
        reset.id = Some(ObjectId::new());

        let filter = reset.claim_filter();
        assert_eq!(filter.get_object_id("_id").ok(), reset.id);
        assert_eq!(filter.get_bool("used").ok(), Some(false));
        assert!(filter.get_document("expires_at").unwrap().contains_key("$gt"));
    }
}
