use std::collections::HashMap;

use mongodb::bson::{doc, oid::ObjectId};
use mongodb::options::FindOptions;
use rocket::futures::TryStreamExt;
use rocket::serde::json::Json;
use rocket::State;
use rocket_okapi::openapi;
use log::{debug, warn};

use crate::db::{DbConn, PROJECTS, SERVICES, USERS};
use crate::guards::{AuthGuard, FreelancerGuard};
use crate::models::{Project, ProjectResponse, ProjectStatus, Service, ServiceResponse, User};
use crate::services::GeminiService;
use crate::utils::{ApiError, ApiResponse, ApiResult};

const CANDIDATE_POOL: i64 = 30;
const DEFAULT_LIMIT: usize = 5;
const MAX_LIMIT: usize = 20;

#[derive(FromForm, serde::Deserialize, rocket_okapi::okapi::schemars::JsonSchema)]
pub struct RecommendQuery {
    pub limit: Option<usize>,
}

impl RecommendQuery {
    fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }
}

/// One line per candidate in the prompt.
struct Candidate {
    id: String,
    summary: String,
}

fn service_candidate(service: &Service) -> Candidate {
    Candidate {
        id: service.id.map(|id| id.to_hex()).unwrap_or_default(),
        summary: format!(
            "{} | category: {} | price: {} | rating: {:.1} ({} reviews)",
            service.title, service.category, service.price, service.rating, service.reviews
        ),
    }
}

fn project_candidate(project: &Project) -> Candidate {
    Candidate {
        id: project.id.map(|id| id.to_hex()).unwrap_or_default(),
        summary: format!(
            "{} | category: {} | budget: {} | skills: {}",
            project.title,
            project.category,
            project.budget,
            project.skills.join(", ")
        ),
    }
}

fn profile_of(user: &User) -> String {
    let skills = if user.skills.is_empty() {
        "none listed".to_string()
    } else {
        user.skills.join(", ")
    };
    format!(
        "role: {}; skills: {}; bio: {}",
        user.role.as_str(),
        skills,
        user.bio.as_deref().unwrap_or("-")
    )
}

fn build_prompt(what: &str, profile: &str, candidates: &[Candidate], limit: usize) -> String {
    let mut prompt = format!(
        "You recommend {what} on a freelance marketplace.\n\
         User profile: {profile}\n\
         Pick at most {limit} of the following {what} that best fit this user, best first.\n\
         Answer with a JSON array of ids only, for example [\"id1\", \"id2\"].\n\n"
    );
    for candidate in candidates {
        prompt.push_str(&format!("- id: {} | {}\n", candidate.id, candidate.summary));
    }
    prompt
}

/// Keeps the items the model named, in the model's order, skipping
/// unknown and repeated ids.
fn pick_in_model_order<T>(items: Vec<T>, id_of: impl Fn(&T) -> Option<ObjectId>, ids: &[String], limit: usize) -> Vec<T> {
    let mut by_id: HashMap<String, T> = items
        .into_iter()
        .filter_map(|item| id_of(&item).map(|id| (id.to_hex(), item)))
        .collect();

    ids.iter()
        .filter_map(|id| by_id.remove(id.trim()))
        .take(limit)
        .collect()
}

/// Open projects ordered by how many of the freelancer's skills they ask for.
fn rank_by_skill_overlap(mut projects: Vec<Project>, skills: &[String]) -> Vec<Project> {
    let overlap = |p: &Project| {
        p.skills
            .iter()
            .filter(|s| skills.iter().any(|mine| mine.eq_ignore_ascii_case(s)))
            .count()
    };
    projects.sort_by(|a, b| overlap(b).cmp(&overlap(a)));
    projects
}

/// Asks the model for an ordered id list; `None` means "use the fallback".
async fn ask_model(prompt: &str) -> Option<Vec<String>> {
    if !GeminiService::is_enabled() {
        return None;
    }
    match GeminiService::generate(prompt).await {
        Ok(text) => {
            let ids = GeminiService::extract_id_list(&text);
            if ids.is_none() {
                debug!("Unparseable recommendation answer: {}", text);
            }
            ids
        }
        Err(e) => {
            warn!("Gemini recommendation failed: {}", e);
            None
        }
    }
}

async fn load_user(db: &DbConn, user_id: ObjectId) -> Result<User, ApiError> {
    db.collection::<User>(USERS)
        .find_one(doc! { "_id": user_id }, None)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))
}

#[openapi(tag = "Recommendation")]
#[get("/recommendations/services?<query..>")]
pub async fn recommend_services(db: &State<DbConn>, auth: AuthGuard, query: RecommendQuery) -> ApiResult {
    let limit = query.limit();
    let user = load_user(db, auth.user_id).await?;

    let find_options = FindOptions::builder()
        .sort(doc! { "rating": -1, "reviews": -1, "created_at": -1 })
        .limit(CANDIDATE_POOL)
        .build();

    let candidates: Vec<Service> = db
        .collection::<Service>(SERVICES)
        .find(doc! { "freelancer_id": { "$ne": auth.user_id } }, find_options)
        .await?
        .try_collect()
        .await?;

    let summaries: Vec<Candidate> = candidates.iter().map(service_candidate).collect();
    let prompt = build_prompt("services", &profile_of(&user), &summaries, limit);

    let (picked, source) = match ask_model(&prompt).await {
        Some(ids) => {
            let picked = pick_in_model_order(candidates.clone(), |s: &Service| s.id, &ids, limit);
            if picked.is_empty() { (None, "fallback") } else { (Some(picked), "gemini") }
        }
        None => (None, "fallback"),
    };
    let services = picked.unwrap_or_else(|| candidates.into_iter().take(limit).collect());

    let services: Vec<ServiceResponse> = services.into_iter().map(ServiceResponse::from).collect();

    Ok(Json(ApiResponse::success(serde_json::json!({
        "services": services,
        "source": source,
    }))))
}

#[openapi(tag = "Recommendation")]
#[get("/recommendations/projects?<query..>")]
pub async fn recommend_projects(db: &State<DbConn>, freelancer: FreelancerGuard, query: RecommendQuery) -> ApiResult {
    let limit = query.limit();
    let user = load_user(db, freelancer.auth.user_id).await?;

    let find_options = FindOptions::builder()
        .sort(doc! { "created_at": -1 })
        .limit(CANDIDATE_POOL)
        .build();

    let candidates: Vec<Project> = db
        .collection::<Project>(PROJECTS)
        .find(doc! { "status": ProjectStatus::Open.as_str() }, find_options)
        .await?
        .try_collect()
        .await?;

    let summaries: Vec<Candidate> = candidates.iter().map(project_candidate).collect();
    let prompt = build_prompt("projects", &profile_of(&user), &summaries, limit);

    let (picked, source) = match ask_model(&prompt).await {
        Some(ids) => {
            let picked = pick_in_model_order(candidates.clone(), |p: &Project| p.id, &ids, limit);
            if picked.is_empty() { (None, "fallback") } else { (Some(picked), "gemini") }
        }
        None => (None, "fallback"),
    };
    let projects = picked.unwrap_or_else(|| {
        rank_by_skill_overlap(candidates, &user.skills)
            .into_iter()
            .take(limit)
            .collect()
    });

    let projects: Vec<ProjectResponse> = projects.into_iter().map(ProjectResponse::from).collect();

    Ok(Json(ApiResponse::success(serde_json::json!({
        "projects": projects,
        "source": source,
    }))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::DateTime;

    fn project(skills: &[&str]) -> Project {
        let now = DateTime::now();
        Project {
            id: Some(ObjectId::new()),
            client_id: ObjectId::new(),
            freelancer_id: None,
            title: "Build it".into(),
            description: "Something useful".into(),
            budget: 1_000_000.0,
            skills: skills.iter().map(|s| s.to_string()).collect(),
            category: "web".into(),
            status: ProjectStatus::Open,
            progress: 0,
            deadline: None,
            paid_order_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn model_order_wins_and_unknown_ids_are_dropped() {
        let items = vec![project(&[]), project(&[]), project(&[])];
        let ids: Vec<String> = items.iter().map(|p| p.id.unwrap().to_hex()).collect();
        let answer = vec![ids[2].clone(), "nope".into(), ids[0].clone(), ids[2].clone()];

        let picked = pick_in_model_order(items, |p: &Project| p.id, &answer, 5);
        let picked_ids: Vec<String> = picked.iter().map(|p| p.id.unwrap().to_hex()).collect();
        assert_eq!(picked_ids, vec![ids[2].clone(), ids[0].clone()]);
    }

    #[test]
    fn pick_respects_limit() {
        let items = vec![project(&[]), project(&[]), project(&[])];
        let ids: Vec<String> = items.iter().map(|p| p.id.unwrap().to_hex()).collect();
        assert_eq!(pick_in_model_order(items, |p: &Project| p.id, &ids, 2).len(), 2);
    }

    #[test]
    fn fallback_ranks_by_skill_overlap() {
        let skills = vec!["rust".to_string(), "mongodb".to_string()];
        let ranked = rank_by_skill_overlap(
            vec![project(&["php"]), project(&["rust", "MongoDB"]), project(&["rust"])],
            &skills,
        );
        assert_eq!(ranked[0].skills, vec!["rust", "MongoDB"]);
        assert_eq!(ranked[1].skills, vec!["rust"]);
        assert_eq!(ranked[2].skills, vec!["php"]);
    }

    #[test]
    fn prompt_lists_every_candidate() {
        let candidates = vec![
            Candidate { id: "a1".into(), summary: "Logo".into() },
            Candidate { id: "b2".into(), summary: "Website".into() },
        ];
        let prompt = build_prompt("services", "role: client", &candidates, 3);
        assert!(prompt.contains("at most 3"));
        assert!(prompt.contains("- id: a1 | Logo"));
        assert!(prompt.contains("- id: b2 | Website"));
    }

    #[test]
    fn limit_is_clamped() {
        assert_eq!(RecommendQuery { limit: None }.limit(), DEFAULT_LIMIT);
        assert_eq!(RecommendQuery { limit: Some(0) }.limit(), 1);
        assert_eq!(RecommendQuery { limit: Some(500) }.limit(), MAX_LIMIT);
    }
}
