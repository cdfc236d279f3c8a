use mongodb::bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};
use rocket_okapi::okapi::schemars;
use rocket_okapi::okapi::schemars::JsonSchema;
use validator::{Validate, ValidationError};

use crate::utils::{validate_object_id_str, validate_positive_amount};
use super::iso;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Open,
    InProgress,
    Completed,
    Cancelled,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Open => "open",
            ProjectStatus::InProgress => "in_progress",
            ProjectStatus::Completed => "completed",
            ProjectStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "open" => Some(ProjectStatus::Open),
            "in_progress" => Some(ProjectStatus::InProgress),
            "completed" => Some(ProjectStatus::Completed),
            "cancelled" => Some(ProjectStatus::Cancelled),
            _ => None,
        }
    }

    /// Completed and cancelled projects are closed for further changes.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProjectStatus::Completed | ProjectStatus::Cancelled)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Project {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub client_id: ObjectId,
    pub freelancer_id: Option<ObjectId>,
    pub title: String,
    pub description: String,
    pub budget: f64,
    #[serde(default)]
    pub skills: Vec<String>,
    pub category: String,
    pub status: ProjectStatus,
    #[serde(default)]
    pub progress: i32,
    pub deadline: Option<DateTime>,
    /// Order whose settlement paid the assignee; set at most once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paid_order_id: Option<String>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

fn validate_deadline(value: &str) -> Result<(), ValidationError> {
    parse_deadline(value).map(|_| ()).ok_or_else(|| {
        let mut err = ValidationError::new("deadline");
        err.message = Some("must be an RFC 3339 timestamp".into());
        err
    })
}

pub fn parse_deadline(value: &str) -> Option<DateTime> {
    chrono::DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| DateTime::from_millis(dt.timestamp_millis()))
}

#[derive(Debug, Deserialize, Validate, JsonSchema)]
pub struct CreateProjectDto {
    #[validate(length(min = 3, max = 150))]
    pub title: String,
    #[validate(length(min = 10, max = 5000))]
    pub description: String,
    #[validate(custom = "validate_positive_amount")]
    pub budget: f64,
    #[serde(default)]
    #[validate(length(max = 20))]
    pub skills: Vec<String>,
    #[validate(length(min = 2, max = 50))]
    pub category: String,
    #[validate(custom = "validate_deadline")]
    pub deadline: Option<String>,
}

#[derive(Debug, Deserialize, Validate, JsonSchema)]
pub struct UpdateProjectDto {
    #[validate(length(min = 3, max = 150))]
    pub title: Option<String>,
    #[validate(length(min = 10, max = 5000))]
    pub description: Option<String>,
    #[validate(custom = "validate_positive_amount")]
    pub budget: Option<f64>,
    #[validate(length(max = 20))]
    pub skills: Option<Vec<String>>,
    #[validate(length(min = 2, max = 50))]
    pub category: Option<String>,
    #[validate(custom = "validate_deadline")]
    pub deadline: Option<String>,
}

#[derive(Debug, Deserialize, Validate, JsonSchema)]
pub struct UpdateProjectStatusDto {
    pub status: Option<ProjectStatus>,
    #[validate(range(min = 0, max = 100))]
    pub progress: Option<i32>,
}

#[derive(Debug, Deserialize, Validate, JsonSchema)]
pub struct AssignFreelancerDto {
    #[validate(custom = "validate_object_id_str")]
    pub freelancer_id: String,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct ProjectResponse {
    pub id: String,
    pub client_id: String,
    pub freelancer_id: Option<String>,
    pub title: String,
    pub description: String,
    pub budget: f64,
    pub skills: Vec<String>,
    pub category: String,
    pub status: ProjectStatus,
    pub progress: i32,
    pub deadline: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Project> for ProjectResponse {
    fn from(p: Project) -> Self {
        ProjectResponse {
            id: p.id.map(|id| id.to_hex()).unwrap_or_default(),
            client_id: p.client_id.to_hex(),
            freelancer_id: p.freelancer_id.map(|id| id.to_hex()),
            title: p.title,
            description: p.description,
            budget: p.budget,
            skills: p.skills,
            category: p.category,
            status: p.status,
            progress: p.progress,
            deadline: p.deadline.as_ref().map(iso),
            created_at: iso(&p.created_at),
            updated_at: iso(&p.updated_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_uses_snake_case_on_the_wire() {
        assert_eq!(serde_json::to_value(ProjectStatus::InProgress).unwrap(), "in_progress");
        for status in [
            ProjectStatus::Open,
            ProjectStatus::InProgress,
            ProjectStatus::Completed,
            ProjectStatus::Cancelled,
        ] {
            assert_eq!(ProjectStatus::parse(status.as_str()), Some(status));
            assert_eq!(mongodb::bson::to_bson(&status).unwrap().as_str(), Some(status.as_str()));
        }
        assert_eq!(ProjectStatus::parse("archived"), None);
    }

    #[test]
    fn terminal_states() {
        assert!(ProjectStatus::Completed.is_terminal());
        assert!(ProjectStatus::Cancelled.is_terminal());
        assert!(!ProjectStatus::InProgress.is_terminal());
    }

    #[test]
    fn create_rules() {
        let dto: CreateProjectDto = serde_json::from_value(serde_json::json!({
            "title": "Landing page",
            "description": "Build a landing page for our coffee shop",
            "budget": 2500000.0,
            "category": "web",
            "deadline": "2025-01-31T17:00:00+07:00"
        }))
        .unwrap();
        assert!(dto.validate().is_ok());
        assert!(dto.skills.is_empty());

        let bad = CreateProjectDto { budget: 0.0, deadline: Some("tomorrow".into()), ..dto };
        let errors = bad.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("budget"));
        assert!(errors.field_errors().contains_key("deadline"));
    }

    #[test]
    fn progress_is_bounded() {
        let dto = UpdateProjectStatusDto { status: None, progress: Some(101) };
        assert!(dto.validate().is_err());
        let dto = UpdateProjectStatusDto { status: Some(ProjectStatus::Completed), progress: Some(100) };
        assert!(dto.validate().is_ok());
    }

    #[test]
    fn deadline_parsing() {
        let dt = parse_deadline("2025-01-31T10:00:00Z").unwrap();
        assert_eq!(iso(&dt), "2025-01-31T10:00:00Z");
        assert!(parse_deadline("31/01/2025").is_none());
    }
}
