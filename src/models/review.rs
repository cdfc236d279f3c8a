use mongodb::bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};
use rocket_okapi::okapi::schemars;
use rocket_okapi::okapi::schemars::JsonSchema;
use validator::Validate;

use crate::utils::validate_object_id_str;
use super::iso;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Review {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub service_id: ObjectId,
    pub reviewer_id: ObjectId,
    pub rating: i32, // 1-5
    pub comment: Option<String>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

#[derive(Debug, Deserialize, Validate, JsonSchema)]
pub struct CreateReviewDto {
    #[validate(custom = "validate_object_id_str")]
    pub service_id: String,
    #[validate(range(min = 1, max = 5))]
    pub rating: i32,
    #[validate(length(max = 1000))]
    pub comment: Option<String>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct ReviewResponse {
    pub id: String,
    pub service_id: String,
    pub reviewer_id: String,
    pub rating: i32,
    pub comment: Option<String>,
    pub created_at: String,
}

impl From<Review> for ReviewResponse {
    fn from(r: Review) -> Self {
        ReviewResponse {
            id: r.id.map(|id| id.to_hex()).unwrap_or_default(),
            service_id: r.service_id.to_hex(),
            reviewer_id: r.reviewer_id.to_hex(),
            rating: r.rating,
            comment: r.comment,
            created_at: iso(&r.created_at),
        }
    }
}

/// Average and count over a set of ratings; an empty set is `(0.0, 0)`.
pub fn rating_summary(ratings: &[i32]) -> (f64, i32) {
    if ratings.is_empty() {
        return (0.0, 0);
    }
    let total = ratings.len() as i32;
    let avg = ratings.iter().sum::<i32>() as f64 / total as f64;
    (avg, total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rating_bounds() {
        let mut dto = CreateReviewDto {
            service_id: ObjectId::new().to_hex(),
            rating: 5,
            comment: None,
        };
        assert!(dto.validate().is_ok());
        dto.rating = 0;
        assert!(dto.validate().is_err());
        dto.rating = 6;
        assert!(dto.validate().is_err());
    }

    #[test]
    fn summary() {
        assert_eq!(rating_summary(&[]), (0.0, 0));
        assert_eq!(rating_summary(&[5, 4, 3]), (4.0, 3));
    }
}
