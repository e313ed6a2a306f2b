pub mod analytics;
pub mod models;
pub mod timer;
