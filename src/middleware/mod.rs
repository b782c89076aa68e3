/*
 * Responsibility
 * - Cross-cutting HTTP layers (request id, tracing, limits, CORS, response headers)
 * - The authentication filter chain for protected routes
 */
pub mod auth;
pub mod cors;
pub mod http;
pub mod security_headers;
