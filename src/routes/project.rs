use rocket::serde::json::Json;
use rocket::State;
use rocket::futures::TryStreamExt;
use rocket_okapi::openapi;
use mongodb::bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::FindOptions;
use validator::Validate;

use crate::db::{DbConn, PROJECTS, USERS};
use crate::guards::{AuthGuard, ClientGuard};
use crate::models::{
    parse_deadline, AssignFreelancerDto, CreateProjectDto, Project, ProjectResponse,
    ProjectStatus, Role, UpdateProjectDto, UpdateProjectStatusDto, User,
};
use crate::utils::{escape_regex, normalize_skills, parse_object_id, ApiError, ApiResponse, ApiResult, Pagination};

async fn load_project(db: &DbConn, project_id: &ObjectId) -> Result<Project, ApiError> {
    db.collection::<Project>(PROJECTS)
        .find_one(doc! { "_id": project_id }, None)
        .await?
        .ok_or_else(|| ApiError::not_found("Project not found"))
}

fn ensure_owner(project: &Project, user_id: &ObjectId) -> Result<(), ApiError> {
    if &project.client_id != user_id {
        return Err(ApiError::forbidden("Only the project owner can do this"));
    }
    Ok(())
}

/// Resolves the `$set` for a status/progress change by `role`.
fn status_change(
    project: &Project,
    role: Role,
    dto: &UpdateProjectStatusDto,
) -> Result<Document, ApiError> {
    if dto.status.is_none() && dto.progress.is_none() {
        return Err(ApiError::bad_request("Nothing to update"));
    }
    if project.status.is_terminal() {
        return Err(ApiError::conflict(format!(
            "Project is already {}",
            project.status.as_str()
        )));
    }

    let mut set = doc! { "updated_at": DateTime::now() };

    if let Some(status) = dto.status {
        match (role, status) {
            (Role::Freelancer, ProjectStatus::Open | ProjectStatus::Cancelled) => {
                return Err(ApiError::forbidden("Only the client can reopen or cancel a project"));
            }
            (_, ProjectStatus::InProgress | ProjectStatus::Completed) if project.freelancer_id.is_none() => {
                return Err(ApiError::conflict("Assign a freelancer first"));
            }
            (_, ProjectStatus::Open) if project.paid_order_id.is_some() => {
                return Err(ApiError::conflict("A paid project cannot be reopened"));
            }
            _ => {}
        }
        set.insert("status", status.as_str());
        match status {
            ProjectStatus::Completed => {
                set.insert("progress", 100);
                return Ok(set);
            }
            // Reopening releases the assignee so the project can be assigned anew.
            ProjectStatus::Open => {
                set.insert("freelancer_id", mongodb::bson::Bson::Null);
                set.insert("progress", 0);
                return Ok(set);
            }
            _ => {}
        }
    }

    if let Some(progress) = dto.progress {
        set.insert("progress", progress);
    }

    Ok(set)
}

#[openapi(tag = "Project")]
#[post("/projects", data = "<dto>")]
pub async fn create_project(db: &State<DbConn>, client: ClientGuard, dto: Json<CreateProjectDto>) -> ApiResult {
    dto.validate()?;
    let dto = dto.into_inner();
    let now = DateTime::now();

    let mut project = Project {
        id: None,
        client_id: client.auth.user_id,
        freelancer_id: None,
        title: dto.title.trim().to_string(),
        description: dto.description,
        budget: dto.budget,
        skills: normalize_skills(&dto.skills),
        category: dto.category.trim().to_lowercase(),
        status: ProjectStatus::Open,
        progress: 0,
        deadline: dto.deadline.as_deref().and_then(parse_deadline),
        paid_order_id: None,
        created_at: now,
        updated_at: now,
    };

    let result = db.collection::<Project>(PROJECTS).insert_one(&project, None).await?;
    project.id = result.inserted_id.as_object_id();

    Ok(Json(ApiResponse::success_with_message(
        "Project created successfully",
        serde_json::json!(ProjectResponse::from(project)),
    )))
}

#[derive(FromForm, serde::Deserialize, rocket_okapi::okapi::schemars::JsonSchema)]
pub struct ProjectQuery {
    pub status: Option<String>,
    pub skill: Option<String>,
    pub category: Option<String>,
    pub search: Option<String>,
    pub min_budget: Option<f64>,
    pub max_budget: Option<f64>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

fn project_filter(query: &ProjectQuery) -> Result<Document, ApiError> {
    let mut filter = doc! {};

    if let Some(ref status) = query.status {
        let status = ProjectStatus::parse(status)
            .ok_or_else(|| ApiError::bad_request(format!("Unknown status '{}'", status)))?;
        filter.insert("status", status.as_str());
    }
    if let Some(skill) = query.skill.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        filter.insert("skills", skill.to_lowercase());
    }
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

    let mut budget = doc! {};
    if let Some(min) = query.min_budget {
        budget.insert("$gte", min);
    }
    if let Some(max) = query.max_budget {
        budget.insert("$lte", max);
    }
    if !budget.is_empty() {
        filter.insert("budget", budget);
    }

    Ok(filter)
}

async fn find_projects(db: &DbConn, filter: Document, paging: Pagination) -> ApiResult {
    let find_options = FindOptions::builder()
        .skip(paging.skip())
        .limit(paging.limit)
        .sort(doc! { "created_at": -1 })
        .build();

    let collection = db.collection::<Project>(PROJECTS);
    let projects: Vec<ProjectResponse> = collection
        .find(filter.clone(), find_options)
        .await?
        .try_collect::<Vec<Project>>()
        .await?
        .into_iter()
        .map(ProjectResponse::from)
        .collect();

    let total = collection.count_documents(filter, None).await?;

    Ok(Json(ApiResponse::success(serde_json::json!({
        "projects": projects,
        "pagination": paging.meta(total),
    }))))
}

#[openapi(tag = "Project")]
#[get("/projects?<query..>")]
pub async fn list_projects(db: &State<DbConn>, query: ProjectQuery) -> ApiResult {
    let filter = project_filter(&query)?;
    find_projects(db, filter, Pagination::new(query.page, query.limit)).await
}

#[derive(FromForm, serde::Deserialize, rocket_okapi::okapi::schemars::JsonSchema)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[openapi(tag = "Project")]
#[get("/projects/mine?<query..>")]
pub async fn my_projects(db: &State<DbConn>, auth: AuthGuard, query: PageQuery) -> ApiResult {
    let filter = doc! {
        "$or": [ { "client_id": auth.user_id }, { "freelancer_id": auth.user_id } ]
    };
    find_projects(db, filter, Pagination::new(query.page, query.limit)).await
}

#[openapi(tag = "Project")]
#[get("/projects/<project_id>")]
pub async fn get_project(db: &State<DbConn>, project_id: String) -> ApiResult {
    let object_id = parse_object_id(&project_id, "project")?;
    let project = load_project(db, &object_id).await?;

    Ok(Json(ApiResponse::success(serde_json::json!(ProjectResponse::from(project)))))
}

#[openapi(tag = "Project")]
#[put("/projects/<project_id>", data = "<dto>")]
pub async fn update_project(
    db: &State<DbConn>,
    client: ClientGuard,
    project_id: String,
    dto: Json<UpdateProjectDto>,
) -> ApiResult {
    dto.validate()?;
    let object_id = parse_object_id(&project_id, "project")?;
    let project = load_project(db, &object_id).await?;
    ensure_owner(&project, &client.auth.user_id)?;

    if project.status.is_terminal() {
        return Err(ApiError::conflict(format!("Project is already {}", project.status.as_str())));
    }

    let mut update_doc = doc! { "updated_at": DateTime::now() };

    if let Some(ref title) = dto.title {
        update_doc.insert("title", title.trim());
    }
    if let Some(ref description) = dto.description {
        update_doc.insert("description", description);
    }
    if let Some(budget) = dto.budget {
        update_doc.insert("budget", budget);
    }
    if let Some(ref skills) = dto.skills {
        update_doc.insert("skills", normalize_skills(skills));
    }
    if let Some(ref category) = dto.category {
        update_doc.insert("category", category.trim().to_lowercase());
    }
    if let Some(deadline) = dto.deadline.as_deref().and_then(parse_deadline) {
        update_doc.insert("deadline", deadline);
    }

    db.collection::<Project>(PROJECTS)
        .update_one(doc! { "_id": object_id }, doc! { "$set": update_doc }, None)
        .await?;

    let project = load_project(db, &object_id).await?;

    Ok(Json(ApiResponse::success_with_message(
        "Project updated successfully",
        serde_json::json!(ProjectResponse::from(project)),
    )))
}

#[openapi(tag = "Project")]
#[patch("/projects/<project_id>/status", data = "<dto>")]
pub async fn update_project_status(
    db: &State<DbConn>,
    auth: AuthGuard,
    project_id: String,
    dto: Json<UpdateProjectStatusDto>,
) -> ApiResult {
    dto.validate()?;
    let object_id = parse_object_id(&project_id, "project")?;
    let project = load_project(db, &object_id).await?;

    let is_owner = project.client_id == auth.user_id;
    let is_assignee = project.freelancer_id == Some(auth.user_id);
    if !is_owner && !is_assignee {
        return Err(ApiError::forbidden("Not a participant of this project"));
    }

    let role = if is_owner { Role::Client } else { Role::Freelancer };
    let set = status_change(&project, role, &dto)?;

    // Guard against a concurrent change of status since we read it.
    let result = db
        .collection::<Project>(PROJECTS)
        .update_one(
            doc! { "_id": object_id, "status": project.status.as_str() },
            doc! { "$set": set },
            None,
        )
        .await?;

    if result.matched_count == 0 {
        return Err(ApiError::conflict("Project changed meanwhile, reload and retry"));
    }

    let project = load_project(db, &object_id).await?;

    Ok(Json(ApiResponse::success_with_message(
        "Project status updated",
        serde_json::json!(ProjectResponse::from(project)),
    )))
}

#[openapi(tag = "Project")]
#[post("/projects/<project_id>/assign", data = "<dto>")]
pub async fn assign_freelancer(
    db: &State<DbConn>,
    client: ClientGuard,
    project_id: String,
    dto: Json<AssignFreelancerDto>,
) -> ApiResult {
    dto.validate()?;
    let object_id = parse_object_id(&project_id, "project")?;
    let freelancer_id = parse_object_id(&dto.freelancer_id, "freelancer")?;

    let project = load_project(db, &object_id).await?;
    ensure_owner(&project, &client.auth.user_id)?;

    if project.status != ProjectStatus::Open {
        return Err(ApiError::conflict("Only open projects can be assigned"));
    }

    let freelancer = db
        .collection::<User>(USERS)
        .find_one(doc! { "_id": freelancer_id }, None)
        .await?
        .ok_or_else(|| ApiError::not_found("Freelancer not found"))?;

    if freelancer.role != Role::Freelancer {
        return Err(ApiError::bad_request("User is not a freelancer"));
    }

    let result = db
        .collection::<Project>(PROJECTS)
        .update_one(
            doc! { "_id": object_id, "status": ProjectStatus::Open.as_str() },
            doc! {
                "$set": {
                    "freelancer_id": freelancer_id,
                    "status": ProjectStatus::InProgress.as_str(),
                    "updated_at": DateTime::now()
                }
            },
            None,
        )
        .await?;

    if result.modified_count == 0 {
        return Err(ApiError::conflict("Project is no longer open"));
    }

    let project = load_project(db, &object_id).await?;

    Ok(Json(ApiResponse::success_with_message(
        format!("Project assigned to {}", freelancer.name),
        serde_json::json!(ProjectResponse::from(project)),
    )))
}

#[openapi(tag = "Project")]
#[delete("/projects/<project_id>")]
pub async fn delete_project(db: &State<DbConn>, client: ClientGuard, project_id: String) -> ApiResult {
    let object_id = parse_object_id(&project_id, "project")?;
    let project = load_project(db, &object_id).await?;
    ensure_owner(&project, &client.auth.user_id)?;

    db.collection::<Project>(PROJECTS)
        .delete_one(doc! { "_id": object_id }, None)
        .await?;

    Ok(Json(ApiResponse::success(serde_json::json!({
        "message": "Project deleted successfully"
    }))))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project(status: ProjectStatus, freelancer: Option<ObjectId>) -> Project {
        let now = DateTime::now();
        Project {
            id: Some(ObjectId::new()),
            client_id: ObjectId::new(),
            freelancer_id: freelancer,
            title: "Mobile app".into(),
            description: "Build a delivery app".into(),
            budget: 10_000_000.0,
            skills: vec!["flutter".into()],
            category: "mobile".into(),
            status,
            progress: 0,
            deadline: None,
            paid_order_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn change(status: Option<ProjectStatus>, progress: Option<i32>) -> UpdateProjectStatusDto {
        UpdateProjectStatusDto { status, progress }
    }

    #[test]
    fn completing_forces_full_progress() {
        let p = project(ProjectStatus::InProgress, Some(ObjectId::new()));
        let set = status_change(&p, Role::Freelancer, &change(Some(ProjectStatus::Completed), Some(40))).unwrap();
        assert_eq!(set.get_str("status").unwrap(), "completed");
        assert_eq!(set.get_i32("progress").unwrap(), 100);
    }

    #[test]
    fn freelancer_cannot_cancel() {
        let p = project(ProjectStatus::InProgress, Some(ObjectId::new()));
        let err = status_change(&p, Role::Freelancer, &change(Some(ProjectStatus::Cancelled), None)).unwrap_err();
        assert_eq!(err.status, rocket::http::Status::Forbidden);
        assert!(status_change(&p, Role::Client, &change(Some(ProjectStatus::Cancelled), None)).is_ok());
    }

    #[test]
    fn terminal_projects_are_frozen() {
        let p = project(ProjectStatus::Completed, Some(ObjectId::new()));
        let err = status_change(&p, Role::Client, &change(None, Some(10))).unwrap_err();
        assert_eq!(err.status, rocket::http::Status::Conflict);
    }

    #[test]
    fn reopening_releases_the_freelancer() {
        let p = project(ProjectStatus::InProgress, Some(ObjectId::new()));
        let set = status_change(&p, Role::Client, &change(Some(ProjectStatus::Open), Some(60))).unwrap();
        assert_eq!(set.get_str("status").unwrap(), "open");
        assert!(set.get("freelancer_id").unwrap().as_null().is_some());
        assert_eq!(set.get_i32("progress").unwrap(), 0);
    }

    #[test]
    fn paid_projects_stay_assigned() {
        let mut p = project(ProjectStatus::InProgress, Some(ObjectId::new()));
        p.paid_order_id = Some("ORDER-1".into());
        let err = status_change(&p, Role::Client, &change(Some(ProjectStatus::Open), None)).unwrap_err();
        assert_eq!(err.status, rocket::http::Status::Conflict);
    }

    #[test]
    fn work_needs_an_assignee() {
        let p = project(ProjectStatus::Open, None);
        assert!(status_change(&p, Role::Client, &change(Some(ProjectStatus::InProgress), None)).is_err());
        assert!(status_change(&p, Role::Client, &change(None, None)).is_err());
        let set = status_change(&p, Role::Client, &change(None, Some(25))).unwrap();
        assert_eq!(set.get_i32("progress").unwrap(), 25);
    }

    #[test]
    fn filter_from_query() {
        let query = ProjectQuery {
            status: Some("in_progress".into()),
            skill: Some(" Rust ".into()),
            category: None,
            search: Some("api".into()),
            min_budget: Some(100.0),
            max_budget: None,
            page: None,
            limit: None,
        };
        let filter = project_filter(&query).unwrap();
        assert_eq!(filter.get_str("status").unwrap(), "in_progress");
        assert_eq!(filter.get_str("skills").unwrap(), "rust");
        assert!(filter.get_array("$or").is_ok());
        assert_eq!(filter.get_document("budget").unwrap().get_f64("$gte").unwrap(), 100.0);

        let bad = ProjectQuery { status: Some("archived".into()), ..query };
        assert!(project_filter(&bad).is_err());
    }
}
