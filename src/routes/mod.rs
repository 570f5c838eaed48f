/// Router Module Index
///
/// Routes are split by access level. Authentication is applied per module with a
/// route layer in `create_router`; the staff check happens inside the handlers.

/// Unauthenticated routes (health check).
pub mod public;

/// Routes protected by the `AuthUser` extractor middleware.
pub mod authenticated;

/// Moderation routes nested under `/admin`.
pub mod admin;
