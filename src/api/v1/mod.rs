/*
 * Responsibility
 * - v1 public surface (routes() re-export)
 */
pub mod dto;
pub mod extractors;
pub mod frontend;
pub mod handlers;
mod routes;

pub use routes::routes;
