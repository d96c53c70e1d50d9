pub mod feed;
pub mod metrics;
pub mod models;
pub mod source;
pub mod utils;
