pub mod chunker;
pub mod scaling;
pub mod types;
