// database/lib.rs - collections, models and queries shared by the api and admin crates

pub mod diagnostics;
pub mod error;
pub mod properties;
pub mod users;

pub use error::DbError;

pub const PROPERTIES_COLLECTION: &str = "properties";
pub const USERS_COLLECTION: &str = "users";
