pub mod pagination;
pub mod rate_limit;
pub mod response;
pub mod validation;

pub use pagination::*;
pub use response::*;
pub use validation::*;
