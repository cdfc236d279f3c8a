use rocket::serde::json::Json;
use rocket::State;
use rocket_okapi::openapi;
use log::warn;

use crate::db::{self, DbConn};
use crate::utils::{ApiResponse, ApiResult};

fn health_report(database_up: bool) -> serde_json::Value {
    serde_json::json!({
        "status": if database_up { "ok" } else { "degraded" },
        "database": if database_up { "up" } else { "down" },
        "version": env!("CARGO_PKG_VERSION"),
    })
}

/// Liveness plus a MongoDB ping
#[openapi(tag = "Health")]
#[get("/health")]
pub async fn health(conn: &State<DbConn>) -> ApiResult {
    let database_up = db::ping(conn).await;
    if !database_up {
        warn!("Health check: MongoDB ping failed");
    }

    Ok(Json(ApiResponse::success(health_report(database_up))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_reflects_database_state() {
        assert_eq!(health_report(true)["status"], "ok");
        let degraded = health_report(false);
        assert_eq!(degraded["status"], "degraded");
        assert_eq!(degraded["database"], "down");
        assert_eq!(degraded["version"], env!("CARGO_PKG_VERSION"));
    }
}
