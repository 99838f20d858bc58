pub mod acquire;
pub mod ai_format;
pub mod build;
pub mod dataset_status;
pub mod response_types;
pub mod retrieve;
