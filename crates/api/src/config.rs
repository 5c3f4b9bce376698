// config.rs - Configuration type shared by every handler

use super::storage::ObjectStore;
use database::properties::views::ViewPolicy;
use mongodb::Client;

pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct Config {
    pub client: Client,
    pub database: String,
    pub jwt_secret: String,
    pub store: ObjectStore,
    pub view_policy: ViewPolicy,
    pub max_upload_bytes: usize,
}
