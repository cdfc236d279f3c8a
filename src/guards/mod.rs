pub mod auth;
pub mod gate;
pub mod role;

pub use auth::AuthGuard;
pub use gate::AuthGate;
pub use role::{ClientGuard, FreelancerGuard};
