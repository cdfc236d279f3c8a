use mongodb::bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};
use rocket_okapi::okapi::schemars;
use rocket_okapi::okapi::schemars::JsonSchema;
use validator::Validate;

use crate::utils::validate_positive_amount;
use super::iso;

/// A fixed-price offer published by a freelancer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub freelancer_id: ObjectId,
    pub title: String,
    pub description: String,
    pub category: String,
    pub price: f64,
    pub delivery_days: i32,
    pub image_url: Option<String>,
    #[serde(default)]
    pub rating: f64,
    #[serde(default)]
    pub reviews: i32,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

#[derive(Debug, Deserialize, Validate, JsonSchema)]
pub struct CreateServiceDto {
    #[validate(length(min = 3, max = 150))]
    pub title: String,
    #[validate(length(min = 10, max = 5000))]
    pub description: String,
    #[validate(length(min = 2, max = 50))]
    pub category: String,
    #[validate(custom = "validate_positive_amount")]
    pub price: f64,
    #[validate(range(min = 1, max = 365))]
    pub delivery_days: i32,
    #[validate(url)]
    pub image_url: Option<String>,
}

#[derive(Debug, Deserialize, Validate, JsonSchema)]
pub struct UpdateServiceDto {
    #[validate(length(min = 3, max = 150))]
    pub title: Option<String>,
    #[validate(length(min = 10, max = 5000))]
    pub description: Option<String>,
    #[validate(length(min = 2, max = 50))]
    pub category: Option<String>,
    #[validate(custom = "validate_positive_amount")]
    pub price: Option<f64>,
    #[validate(range(min = 1, max = 365))]
    pub delivery_days: Option<i32>,
    #[validate(url)]
    pub image_url: Option<String>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct ServiceResponse {
    pub id: String,
    pub freelancer_id: String,
    pub title: String,
    pub description: String,
    pub category: String,
    pub price: f64,
    pub delivery_days: i32,
    pub image_url: Option<String>,
    pub rating: f64,
    pub reviews: i32,
    pub created_at: String,
}

impl From<Service> for ServiceResponse {
    fn from(s: Service) -> Self {
        ServiceResponse {
            id: s.id.map(|id| id.to_hex()).unwrap_or_default(),
            freelancer_id: s.freelancer_id.to_hex(),
            title: s.title,
            description: s.description,
            category: s.category,
            price: s.price,
            delivery_days: s.delivery_days,
            image_url: s.image_url,
            // One decimal is what clients display.
            rating: (s.rating * 10.0).round() / 10.0,
            reviews: s.reviews,
            created_at: iso(&s.created_at),
        }
    }
}
