pub mod approval;
pub mod classifier;
pub mod models;
pub mod penalty;
