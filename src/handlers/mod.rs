mod health;
mod knowledge;

pub use health::{health_check, readiness_check, root};
pub use knowledge::{create_item, get_category, get_item};
