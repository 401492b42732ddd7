/*
 * Responsibility
 * - Expose the forwarded-request extractor to handlers
 */
mod core;

pub use self::core::ForwardedRequest;
