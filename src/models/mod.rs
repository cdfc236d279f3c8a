pub mod message;
pub mod password_reset;
pub mod payment;
pub mod project;
pub mod review;
pub mod service;
pub mod user;

pub use message::*;
pub use password_reset::*;
pub use payment::*;
pub use project::*;
pub use review::*;
pub use service::*;
pub use user::*;

use mongodb::bson::DateTime;

/// RFC 3339 rendering used in every response body.
pub fn iso(dt: &DateTime) -> String {
    dt.try_to_rfc3339_string().unwrap_or_default()
}
