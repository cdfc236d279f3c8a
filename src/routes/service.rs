use mongodb::bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::FindOptions;
use rocket::futures::TryStreamExt;
use rocket::serde::json::Json;
use rocket::State;
use rocket_okapi::openapi;
use validator::Validate;

use crate::db::{DbConn, SERVICES};
use crate::guards::FreelancerGuard;
use crate::models::{CreateServiceDto, Service, ServiceResponse, UpdateServiceDto};
use crate::utils::{escape_regex, parse_object_id, ApiError, ApiResponse, ApiResult, Pagination};

async fn load_service(db: &DbConn, service_id: &ObjectId) -> Result<Service, ApiError> {
    db.collection::<Service>(SERVICES)
        .find_one(doc! { "_id": service_id }, None)
        .await?
        .ok_or_else(|| ApiError::not_found("Service not found"))
}

fn ensure_owner(service: &Service, user_id: &ObjectId) -> Result<(), ApiError> {
    if &service.freelancer_id != user_id {
        return Err(ApiError::forbidden("Only the service owner can do this"));
    }
    Ok(())
}

/// Publish a new service
#[openapi(tag = "Service")]
#[post("/services", data = "<dto>")]
pub async fn create_service(
    db: &State<DbConn>,
    freelancer: FreelancerGuard,
    dto: Json<CreateServiceDto>,
) -> ApiResult {
    dto.validate()?;
    let dto = dto.into_inner();
    let now = DateTime::now();

    let mut service = Service {
        id: None,
        freelancer_id: freelancer.auth.user_id,
        title: dto.title.trim().to_string(),
        description: dto.description,
        category: dto.category.trim().to_lowercase(),
        price: dto.price,
        delivery_days: dto.delivery_days,
        image_url: dto.image_url,
        rating: 0.0,
        reviews: 0,
        created_at: now,
        updated_at: now,
    };

    let result = db.collection::<Service>(SERVICES).insert_one(&service, None).await?;
    service.id = result.inserted_id.as_object_id();

    Ok(Json(ApiResponse::success_with_message(
        "Service published successfully",
        serde_json::json!(ServiceResponse::from(service)),
    )))
}

#[derive(FromForm, serde::Deserialize, rocket_okapi::okapi::schemars::JsonSchema)]
pub struct ServiceQuery {
    pub category: Option<String>,
    pub search: Option<String>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub freelancer_id: Option<String>,
    /// `newest` (default), `rating`, `price_asc` or `price_desc`
    pub sort: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

fn sort_order(sort: Option<&str>) -> Result<Document, ApiError> {
    match sort.unwrap_or("newest") {
        "newest" => Ok(doc! { "created_at": -1 }),
        "rating" => Ok(doc! { "rating": -1, "reviews": -1 }),
        "price_asc" => Ok(doc! { "price": 1 }),
        "price_desc" => Ok(doc! { "price": -1 }),
        other => Err(ApiError::bad_request(format!("Unknown sort '{}'", other))),
    }
}

fn service_filter(query: &ServiceQuery) -> Result<Document, ApiError> {
    let mut filter = doc! {};

    if let Some(category) = query.category.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        filter.insert("category", category.to_lowercase());
    }
    if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = escape_regex(search);
        filter.insert(
            "$or",
            vec![
                doc! { "title": { "$regex": &pattern, "$options": "i" } },
                doc! { "description": { "$regex": &pattern, "$options": "i" } },
            ],
        );
    }
    if let Some(ref freelancer_id) = query.freelancer_id {
        filter.insert("freelancer_id", parse_object_id(freelancer_id, "freelancer")?);
    }

    let mut price = doc! {};
    if let Some(min) = query.min_price {
        price.insert("$gte", min);
    }
    if let Some(max) = query.max_price {
        price.insert("$lte", max);
    }
    if !price.is_empty() {
        filter.insert("price", price);
    }

    Ok(filter)
}

/// Browse services
#[openapi(tag = "Service")]
#[get("/services?<query..>")]
pub async fn list_services(db: &State<DbConn>, query: ServiceQuery) -> ApiResult {
    let paging = Pagination::new(query.page, query.limit);
    let filter = service_filter(&query)?;

    let find_options = FindOptions::builder()
        .skip(paging.skip())
        .limit(paging.limit)
        .sort(sort_order(query.sort.as_deref())?)
        .build();

    let collection = db.collection::<Service>(SERVICES);
    let services: Vec<ServiceResponse> = collection
        .find(filter.clone(), find_options)
        .await?
        .try_collect::<Vec<Service>>()
        .await?
        .into_iter()
        .map(ServiceResponse::from)
        .collect();

    let total = collection.count_documents(filter, None).await?;

    Ok(Json(ApiResponse::success(serde_json::json!({
        "services": services,
        "pagination": paging.meta(total),
    }))))
}

/// Get all unique service categories
#[openapi(tag = "Service")]
#[get("/services/categories")]
pub async fn get_categories(db: &State<DbConn>) -> ApiResult {
    let categories = db
        .collection::<Service>(SERVICES)
        .distinct("category", None, None)
        .await?;

    let mut category_list: Vec<String> = categories
        .iter()
        .filter_map(|b| b.as_str().map(|s| s.to_string()))
        .collect();
    category_list.sort();

    Ok(Json(ApiResponse::success_with_message(
        "Categories fetched successfully",
        serde_json::json!({
            "categories": category_list,
            "total": category_list.len()
        }),
    )))
}

/// Get a single service by ID
#[openapi(tag = "Service")]
#[get("/services/<service_id>")]
pub async fn get_service(db: &State<DbConn>, service_id: String) -> ApiResult {
    let object_id = parse_object_id(&service_id, "service")?;
    let service = load_service(db, &object_id).await?;

    Ok(Json(ApiResponse::success(serde_json::json!(ServiceResponse::from(service)))))
}

#[openapi(tag = "Service")]
#[put("/services/<service_id>", data = "<dto>")]
pub async fn update_service(
    db: &State<DbConn>,
    freelancer: FreelancerGuard,
    service_id: String,
    dto: Json<UpdateServiceDto>,
) -> ApiResult {
    dto.validate()?;
    let object_id = parse_object_id(&service_id, "service")?;
    let service = load_service(db, &object_id).await?;
    ensure_owner(&service, &freelancer.auth.user_id)?;

    let mut update_doc = doc! { "updated_at": DateTime::now() };

    if let Some(ref title) = dto.title {
        update_doc.insert("title", title.trim());
    }
    if let Some(ref description) = dto.description {
        update_doc.insert("description", description);
    }
    if let Some(ref category) = dto.category {
        update_doc.insert("category", category.trim().to_lowercase());
    }
    if let Some(price) = dto.price {
        update_doc.insert("price", price);
    }
    if let Some(days) = dto.delivery_days {
        update_doc.insert("delivery_days", days);
    }
    if let Some(ref image_url) = dto.image_url {
        update_doc.insert("image_url", image_url);
    }

    db.collection::<Service>(SERVICES)
        .update_one(doc! { "_id": object_id }, doc! { "$set": update_doc }, None)
        .await?;

    let service = load_service(db, &object_id).await?;

    Ok(Json(ApiResponse::success_with_message(
        "Service updated successfully",
        serde_json::json!(ServiceResponse::from(service)),
    )))
}

#[openapi(tag = "Service")]
#[delete("/services/<service_id>")]
pub async fn delete_service(db: &State<DbConn>, freelancer: FreelancerGuard, service_id: String) -> ApiResult {
    let object_id = parse_object_id(&service_id, "service")?;
    let service = load_service(db, &object_id).await?;
    ensure_owner(&service, &freelancer.auth.user_id)?;

    db.collection::<Service>(SERVICES)
        .delete_one(doc! { "_id": object_id }, None)
        .await?;

    Ok(Json(ApiResponse::success(serde_json::json!({
        "message": "Service deleted successfully"
    }))))
}
