pub mod interval;
pub mod models;
pub mod normalize;
pub mod recent_projects;
pub mod retention;
pub mod stats;
