use rocket::serde::json::Json;
use rocket::State;
use rocket::futures::TryStreamExt;
use rocket_okapi::openapi;
use mongodb::bson::{doc, DateTime};
use mongodb::options::{FindOneAndUpdateOptions, FindOptions, ReturnDocument};
use data_encoding::BASE64;
use validator::Validate;
use log::info;

use crate::db::{DbConn, USERS};
use crate::guards::AuthGuard;
use crate::models::{AvatarUploadDto, PublicUserResponse, UpdateUserDto, User, UserResponse};
use crate::services::CloudinaryService;
use crate::utils::{escape_regex, normalize_skills, parse_object_id, ApiError, ApiResponse, ApiResult, Pagination};

const MAX_AVATAR_BYTES: usize = 5 * 1024 * 1024;

fn is_valid_image_mime(mime_type: &str) -> bool {
    matches!(mime_type, "image/jpeg" | "image/jpg" | "image/png" | "image/webp")
}

/// Accepts raw base64 or a `data:<mime>;base64,` URI and returns the base64 part.
fn strip_data_uri(data: &str) -> &str {
    match data.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => data,
    }
}

#[openapi(tag = "User")]
#[get("/users/me")]
pub async fn get_me(db: &State<DbConn>, auth: AuthGuard) -> ApiResult {
    let user = db
        .collection::<User>(USERS)
        .find_one(doc! { "_id": auth.user_id }, None)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    Ok(Json(ApiResponse::success(serde_json::json!(UserResponse::from(user)))))
}

#[openapi(tag = "User")]
#[put("/users/me", data = "<dto>")]
pub async fn update_me(db: &State<DbConn>, auth: AuthGuard, dto: Json<UpdateUserDto>) -> ApiResult {
    dto.validate()?;

    // Build update document
    let mut update_doc = doc! {
        "updated_at": DateTime::now()
    };

    if let Some(ref name) = dto.name {
        update_doc.insert("name", name.trim());
    }
    if let Some(ref bio) = dto.bio {
        update_doc.insert("bio", bio);
    }
    if let Some(ref skills) = dto.skills {
        update_doc.insert("skills", normalize_skills(skills));
    }
    if let Some(ref location) = dto.location {
        update_doc.insert("location", location);
    }
    if let Some(ref avatar_url) = dto.avatar_url {
        update_doc.insert("avatar_url", avatar_url);
    }

    let options = FindOneAndUpdateOptions::builder()
        .return_document(ReturnDocument::After)
        .build();

    let user = db
        .collection::<User>(USERS)
        .find_one_and_update(doc! { "_id": auth.user_id }, doc! { "$set": update_doc }, options)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    Ok(Json(ApiResponse::success_with_message(
        "Profile updated successfully",
        serde_json::json!(UserResponse::from(user)),
    )))
}

#[openapi(tag = "User")]
#[post("/users/me/avatar", data = "<dto>")]
pub async fn upload_avatar(db: &State<DbConn>, auth: AuthGuard, dto: Json<AvatarUploadDto>) -> ApiResult {
    dto.validate()?;

    if !is_valid_image_mime(&dto.mime_type) {
        return Err(ApiError::bad_request(format!(
            "Invalid MIME type: {}. Allowed: image/jpeg, image/png, image/webp",
            dto.mime_type
        )));
    }

    let encoded = strip_data_uri(dto.data.trim());
    let decoded = BASE64
        .decode(encoded.as_bytes())
        .map_err(|_| ApiError::bad_request("Invalid base64 data"))?;

    if decoded.len() > MAX_AVATAR_BYTES {
        return Err(ApiError::bad_request("Image exceeds 5MB limit"));
    }

    let data_uri = format!("data:{};base64,{}", dto.mime_type, encoded);
    let uploaded = CloudinaryService::upload_image(data_uri, &format!("avatar_{}", auth.user_id.to_hex())).await?;

    db.collection::<User>(USERS)
        .update_one(
            doc! { "_id": auth.user_id },
            doc! { "$set": { "avatar_url": &uploaded.secure_url, "updated_at": DateTime::now() } },
            None,
        )
        .await?;

    info!("Avatar for {} stored at {}", auth.user_id, uploaded.public_id);

    Ok(Json(ApiResponse::success_with_message(
        "Photo uploaded successfully",
        serde_json::json!({
            "url": uploaded.secure_url,
            "size": decoded.len(),
        }),
    )))
}

#[openapi(tag = "User")]
#[delete("/users/me")]
pub async fn delete_me(db: &State<DbConn>, auth: AuthGuard) -> ApiResult {
    let result = db
        .collection::<User>(USERS)
        .delete_one(doc! { "_id": auth.user_id }, None)
        .await?;

    if result.deleted_count == 0 {
        return Err(ApiError::not_found("User not found"));
    }

    info!("Deleted account {}", auth.user_id);

    Ok(Json(ApiResponse::success(serde_json::json!({
        "message": "Account deleted successfully"
    }))))
}

#[derive(FromForm, serde::Deserialize, rocket_okapi::okapi::schemars::JsonSchema)]
pub struct FreelancerQuery {
    pub skill: Option<String>,
    pub search: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[openapi(tag = "User")]
#[get("/users/freelancers?<query..>")]
pub async fn list_freelancers(db: &State<DbConn>, query: FreelancerQuery) -> ApiResult {
    let paging = Pagination::new(query.page, query.limit);

    let mut filter = doc! { "role": "freelancer" };

    if let Some(skill) = query.skill.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        filter.insert("skills", skill.to_lowercase());
    }
    if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = escape_regex(search);
        filter.insert(
            "$or",
            vec![
                doc! { "name": { "$regex": &pattern, "$options": "i" } },
                doc! { "bio": { "$regex": &pattern, "$options": "i" } },
            ],
        );
    }

    let find_options = FindOptions::builder()
        .skip(paging.skip())
        .limit(paging.limit)
        .sort(doc! { "created_at": -1 })
        .build();

    let users = db.collection::<User>(USERS);
    let freelancers: Vec<PublicUserResponse> = users
        .find(filter.clone(), find_options)
        .await?
        .try_collect::<Vec<User>>()
        .await?
        .into_iter()
        .map(PublicUserResponse::from)
        .collect();

    let total = users.count_documents(filter, None).await?;

    Ok(Json(ApiResponse::success(serde_json::json!({
        "freelancers": freelancers,
        "pagination": paging.meta(total),
    }))))
}

#[openapi(tag = "User")]
#[get("/users/<user_id>")]
pub async fn get_user(db: &State<DbConn>, _auth: AuthGuard, user_id: String) -> ApiResult {
    let object_id = parse_object_id(&user_id, "user")?;

    let user = db
        .collection::<User>(USERS)
        .find_one(doc! { "_id": object_id }, None)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    Ok(Json(ApiResponse::success(serde_json::json!(PublicUserResponse::from(user)))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_uri_prefix_is_optional() {
        assert_eq!(strip_data_uri("data:image/png;base64,AAAA"), "AAAA");
        assert_eq!(strip_data_uri("AAAA"), "AAAA");
        assert_eq!(strip_data_uri("x;base64,AAAA"), "x;base64,AAAA");
    }

    #[test]
    fn avatar_mime_types() {
        assert!(is_valid_image_mime("image/webp"));
        assert!(!is_valid_image_mime("application/pdf"));
    }
}
