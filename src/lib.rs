pub mod collection;
pub mod config;
pub mod error;
pub mod materialize;
pub mod monitoring;
pub mod reporting;
pub mod store;
pub mod variance;
