pub mod models;
pub mod quality;
