pub mod auth;
pub mod health;
pub mod message;
pub mod payment;
pub mod project;
pub mod recommendation;
pub mod review;
pub mod service;
pub mod user;
