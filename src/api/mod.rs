/*
 * Responsibility
 * - HTTP surface: routes, handlers, extractors, Decision -> Response
 */
pub mod dto;
pub mod extractors;
pub mod handlers;
pub mod response;
mod routes;

pub use routes::routes;
