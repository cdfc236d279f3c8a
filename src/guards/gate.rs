use rocket::fairing::{Fairing, Info, Kind};
use rocket::http::Method;
use rocket::http::uri::Origin;
use rocket::{Data, Request};
use log::debug;

use super::auth::cached_identity;

/// Internal route the gate rewrites rejected requests to.
pub const UNAUTHORIZED_PATH: &str = "/api/v1/__unauthorized";

/// One entry of the skip-list. `*` matches a single path segment, a
/// trailing `**` matches any remainder (including nothing).
pub struct PublicPath {
    pub method: Option<Method>,
    pub pattern: &'static str,
}

impl PublicPath {
    const fn any(pattern: &'static str) -> Self {
        PublicPath { method: None, pattern }
    }

    const fn get(pattern: &'static str) -> Self {
        PublicPath { method: Some(Method::Get), pattern }
    }

    fn matches(&self, method: Method, path: &str) -> bool {
        if self.method.is_some_and(|m| m != method) {
            return false;
        }
        pattern_matches(self.pattern, path)
    }
}

pub const PUBLIC_PATHS: &[PublicPath] = &[
    PublicPath::any("/api/v1/auth/**"),
    PublicPath::any("/api/v1/health"),
    PublicPath::any("/api/v1/__unauthorized"),
    PublicPath::any("/api/v1/payments/notification"),
    PublicPath::any("/api/v1/openapi.json"),
    PublicPath::any("/api/docs/**"),
    PublicPath::get("/api/v1/services/**"),
    PublicPath::get("/api/v1/projects"),
    PublicPath::get("/api/v1/projects/*"),
    PublicPath::get("/api/v1/reviews/service/*"),
    PublicPath::get("/api/v1/users/freelancers"),
];

fn pattern_matches(pattern: &str, path: &str) -> bool {
    let mut pattern_segs = pattern.split('/').filter(|s| !s.is_empty());
    let mut path_segs = path.split('/').filter(|s| !s.is_empty());

    loop {
        match (pattern_segs.next(), path_segs.next()) {
            (Some("**"), _) => return true,
            (Some("*"), Some(_)) => {}
            (Some(p), Some(s)) if p == s => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

pub fn is_public_path(method: Method, path: &str) -> bool {
    method == Method::Options || PUBLIC_PATHS.iter().any(|p| p.matches(method, path))
}

/// Rejects unauthenticated requests to any non-public path before routing.
pub struct AuthGate;

#[rocket::async_trait]
impl Fairing for AuthGate {
    fn info(&self) -> Info {
        Info {
            name: "JWT gate",
            kind: Kind::Request,
        }
    }

    async fn on_request(&self, req: &mut Request<'_>, _: &mut Data<'_>) {
        let public = is_public_path(req.method(), req.uri().path().as_str());
        if public || cached_identity(req).0.is_some() {
            return;
        }

        debug!("JWT gate rejected {} {}", req.method(), req.uri());
        req.set_method(Method::Get);
        if let Ok(uri) = Origin::parse(UNAUTHORIZED_PATH) {
            req.set_uri(uri);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_segments() {
        assert!(pattern_matches("/api/v1/auth/**", "/api/v1/auth/login"));
        assert!(pattern_matches("/api/v1/auth/**", "/api/v1/auth"));
        assert!(pattern_matches("/api/v1/projects/*", "/api/v1/projects/abc"));
        assert!(!pattern_matches("/api/v1/projects/*", "/api/v1/projects/abc/status"));
        assert!(!pattern_matches("/api/v1/projects/*", "/api/v1/projects"));
        assert!(pattern_matches("/api/v1/health", "/api/v1/health/"));
    }

    #[test]
    fn skip_list() {
        assert!(is_public_path(Method::Post, "/api/v1/auth/login"));
        assert!(is_public_path(Method::Post, "/api/v1/payments/notification"));
        assert!(is_public_path(Method::Get, "/api/v1/services"));
        assert!(is_public_path(Method::Get, "/api/v1/services/categories"));
        assert!(is_public_path(Method::Get, "/api/v1/projects/65a1b2c3d4e5f60718293a4b"));
        assert!(is_public_path(Method::Options, "/api/v1/users/me"));

        assert!(!is_public_path(Method::Post, "/api/v1/services"));
        assert!(!is_public_path(Method::Delete, "/api/v1/projects/65a1b2c3d4e5f60718293a4b"));
        assert!(!is_public_path(Method::Get, "/api/v1/projects/mine/extra"));
        assert!(!is_public_path(Method::Get, "/api/v1/payments"));
        assert!(!is_public_path(Method::Get, "/api/v1/users/me"));
        assert!(!is_public_path(Method::Get, "/api/v1/messages/inbox"));
    }
}
