pub mod api;
pub mod events;
pub mod models;

/// Opaque numeric entity id. All ids in murmur are SQLite rowids; API input
/// arriving as anything non-numeric is rejected before it reaches storage.
pub type UserId = i64;
