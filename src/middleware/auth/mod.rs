pub mod access;
pub mod pipeline;

pub use pipeline::{AuthPipeline, CacheFailurePolicy};
