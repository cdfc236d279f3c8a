use mongodb::bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};
use rocket_okapi::okapi::schemars;
use rocket_okapi::okapi::schemars::JsonSchema;
use validator::Validate;

use crate::utils::validate_object_id_str;
use super::iso;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Message {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub conversation_id: String,
    pub sender_id: ObjectId,
    pub receiver_id: ObjectId,
    pub content: String,
    pub project_id: Option<ObjectId>,
    #[serde(default)]
    pub read: bool,
    pub created_at: DateTime,
}

/// Stable key for the conversation between two users, independent of who
/// sent first.
pub fn conversation_key(a: &ObjectId, b: &ObjectId) -> String {
    let (a, b) = (a.to_hex(), b.to_hex());
    if a <= b {
        format!("{}_{}", a, b)
    } else {
        format!("{}_{}", b, a)
    }
}

#[derive(Debug, Deserialize, Validate, JsonSchema)]
pub struct SendMessageDto {
    #[validate(custom = "validate_object_id_str")]
    pub receiver_id: String,
    #[validate(length(min = 1, max = 2000))]
    pub content: String,
    #[validate(custom = "validate_object_id_str")]
    pub project_id: Option<String>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct MessageResponse {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    pub project_id: Option<String>,
    pub read: bool,
    pub created_at: String,
}

impl From<Message> for MessageResponse {
    fn from(m: Message) -> Self {
        MessageResponse {
            id: m.id.map(|id| id.to_hex()).unwrap_or_default(),
            conversation_id: m.conversation_id,
            sender_id: m.sender_id.to_hex(),
            receiver_id: m.receiver_id.to_hex(),
            content: m.content,
            project_id: m.project_id.map(|id| id.to_hex()),
            read: m.read,
            created_at: iso(&m.created_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_key_is_symmetric() {
        let a = ObjectId::new();
        let b = ObjectId::new();
        assert_eq!(conversation_key(&a, &b), conversation_key(&b, &a));
        assert_ne!(conversation_key(&a, &b), conversation_key(&a, &a));
    }

    #[test]
    fn content_limits() {
        let dto = SendMessageDto {
            receiver_id: ObjectId::new().to_hex(),
            content: String::new(),
            project_id: None,
        };
        assert!(dto.validate().is_err());
        let dto = SendMessageDto { content: "x".repeat(2001), ..dto };
        assert!(dto.validate().is_err());
    }
}
