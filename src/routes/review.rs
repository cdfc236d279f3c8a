use rocket::serde::json::Json;
use rocket::State;
use rocket_okapi::openapi;
use mongodb::bson::{doc, oid::ObjectId, DateTime};
use mongodb::options::FindOptions;
use rocket::futures::TryStreamExt;
use validator::Validate;

use crate::db::{DbConn, REVIEWS, SERVICES};
use crate::guards::AuthGuard;
use crate::models::{rating_summary, CreateReviewDto, Review, ReviewResponse, Service};
use crate::routes::project::PageQuery;
use crate::utils::{parse_object_id, ApiError, ApiResponse, ApiResult, Pagination};

/// Recomputes the cached rating/review count on a service.
async fn refresh_service_rating(db: &DbConn, service_id: ObjectId) -> Result<(f64, i32), ApiError> {
    let ratings: Vec<i32> = db
        .collection::<Review>(REVIEWS)
        .find(doc! { "service_id": service_id }, None)
        .await?
        .try_collect::<Vec<Review>>()
        .await?
        .into_iter()
        .map(|r| r.rating)
        .collect();

    let (avg_rating, total_reviews) = rating_summary(&ratings);

    db.collection::<Service>(SERVICES)
        .update_one(
            doc! { "_id": service_id },
            doc! {
                "$set": {
                    "rating": avg_rating,
                    "reviews": total_reviews,
                    "updated_at": DateTime::now()
                }
            },
            None,
        )
        .await?;

    Ok((avg_rating, total_reviews))
}

/// Service totals after a review was added or removed.
fn rating_totals(rating: f64, reviews: i32) -> serde_json::Value {
    serde_json::json!({
        "service_rating": rating,
        "service_reviews": reviews,
    })
}

#[openapi(tag = "Review")]
#[post("/reviews", data = "<dto>")]
pub async fn create_review(db: &State<DbConn>, auth: AuthGuard, dto: Json<CreateReviewDto>) -> ApiResult {
    dto.validate()?;
    let service_id = parse_object_id(&dto.service_id, "service")?;

    let service = db
        .collection::<Service>(SERVICES)
        .find_one(doc! { "_id": service_id }, None)
        .await?
        .ok_or_else(|| ApiError::not_found("Service not found"))?;

    if service.freelancer_id == auth.user_id {
        return Err(ApiError::bad_request("You cannot review your own service"));
    }

    // Check if user already reviewed this service
    let existing_review = db
        .collection::<Review>(REVIEWS)
        .find_one(doc! { "service_id": service_id, "reviewer_id": auth.user_id }, None)
        .await?;

    if existing_review.is_some() {
        return Err(ApiError::conflict("You have already reviewed this service"));
    }

    let now = DateTime::now();
    let mut review = Review {
        id: None,
        service_id,
        reviewer_id: auth.user_id,
        rating: dto.rating,
        comment: dto.comment.as_deref().map(str::trim).filter(|c| !c.is_empty()).map(String::from),
        created_at: now,
        updated_at: now,
    };

    let result = db
        .collection::<Review>(REVIEWS)
        .insert_one(&review, None)
        .await
        .map_err(|e| {
            if crate::db::is_duplicate_key(&e) {
                ApiError::conflict("You have already reviewed this service")
            } else {
                ApiError::from(e)
            }
        })?;
    review.id = result.inserted_id.as_object_id();

    let (rating, reviews) = refresh_service_rating(db, service_id).await?;

    let mut payload = rating_totals(rating, reviews);
    payload["review"] = serde_json::json!(ReviewResponse::from(review));

    Ok(Json(ApiResponse::success_with_message(
        "Review submitted successfully",
        payload,
    )))
}

#[openapi(tag = "Review")]
#[get("/reviews/service/<service_id>?<query..>")]
pub async fn list_service_reviews(db: &State<DbConn>, service_id: String, query: PageQuery) -> ApiResult {
    let paging = Pagination::new(query.page, query.limit);
    let object_id = parse_object_id(&service_id, "service")?;

    let filter = doc! { "service_id": object_id };

    let find_options = FindOptions::builder()
        .skip(paging.skip())
        .limit(paging.limit)
        .sort(doc! { "created_at": -1 })
        .build();

    let collection = db.collection::<Review>(REVIEWS);
    let reviews: Vec<ReviewResponse> = collection
        .find(filter.clone(), find_options)
        .await?
        .try_collect::<Vec<Review>>()
        .await?
        .into_iter()
        .map(ReviewResponse::from)
        .collect();

    let total = collection.count_documents(filter, None).await?;

    Ok(Json(ApiResponse::success(serde_json::json!({
        "reviews": reviews,
        "pagination": paging.meta(total),
    }))))
}

#[openapi(tag = "Review")]
#[delete("/reviews/<review_id>")]
pub async fn delete_review(db: &State<DbConn>, auth: AuthGuard, review_id: String) -> ApiResult {
    let object_id = parse_object_id(&review_id, "review")?;

    // Verify ownership
    let review = db
        .collection::<Review>(REVIEWS)
        .find_one(doc! { "_id": object_id }, None)
        .await?
        .ok_or_else(|| ApiError::not_found("Review not found"))?;

    if review.reviewer_id != auth.user_id {
        return Err(ApiError::forbidden("Not authorized to delete this review"));
    }

    db.collection::<Review>(REVIEWS)
        .delete_one(doc! { "_id": object_id }, None)
        .await?;

    let (rating, reviews) = refresh_service_rating(db, review.service_id).await?;

    Ok(Json(ApiResponse::success_with_message(
        "Review deleted successfully",
        rating_totals(rating, reviews),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_reflect_the_remaining_reviews() {
        let (rating, reviews) = rating_summary(&[5, 4]);
        let payload = rating_totals(rating, reviews);
        assert_eq!(payload["service_rating"], 4.5);
        assert_eq!(payload["service_reviews"], 2);

        let (rating, reviews) = rating_summary(&[]);
        let payload = rating_totals(rating, reviews);
        assert_eq!(payload["service_rating"], 0.0);
        assert_eq!(payload["service_reviews"], 0);
    }
}
