// routes.rs - public listing routes and the agent-facing write routes

use super::auth::AuthUser;
use super::config::Config;
use super::error::ApiError;
use super::response::{created, ok, ApiResponse, PageResponse, PropertyResponse, UserResponse};
use super::storage::{image_extension, object_key};
use super::utils::{read_limited, user_agent, viewer_cookie, viewer_id};
use actix_web::{
    delete, get,
    http::header::CONTENT_TYPE,
    post, put,
    web::{Data, Json, Path, Payload, Query},
    HttpRequest, HttpResponse,
};
use database::{
    properties::{
        model::{DeletionStatus, NewProperty, PropertyModel, PropertyUpdate},
        query::{
            add_image, get_property, insert_property, list_properties, remove_image,
            request_deletion, update_property, Page, PropertyFilter, SortOrder,
        },
        views::{record_view, view_stats},
    },
    users::{
        model::Role,
        query::{get_user, list_users},
    },
};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

#[get("/health")]
pub async fn health() -> HttpResponse {
    ok(json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize, Default)]
pub struct ListQuery {
    pub district: Option<String>,
    pub min_price: Option<i64>,
    pub max_price: Option<i64>,
    pub bedrooms: Option<i32>,
    pub search: Option<String>,
    pub sort: Option<SortOrder>,
    pub page: Option<u64>,
    pub limit: Option<u64>,
    /// Only honoured on admin listings.
    pub status: Option<DeletionStatus>,
    pub agent: Option<String>,
}

impl ListQuery {
    pub fn filter(&self, status: DeletionStatus) -> Result<PropertyFilter, ApiError> {
        if let (Some(min), Some(max)) = (self.min_price, self.max_price) {
            if min > max {
                return Err(ApiError::BadRequest(
                    "min_price cannot exceed max_price".to_string(),
                ));
            }
        }
        Ok(PropertyFilter {
            district: self.district.clone(),
            min_price: self.min_price,
            max_price: self.max_price,
            min_bedrooms: self.bedrooms,
            search: self.search.clone(),
            status: Some(status),
            agent_email: None,
        })
    }

    pub fn page(&self) -> Page {
        Page::new(self.page, self.limit)
    }
}

#[tracing::instrument(name = "/properties - Lists active listings", skip(config))]
#[get("/properties")]
pub async fn list(config: Data<Config>, query: Query<ListQuery>) -> Result<HttpResponse, ApiError> {
    let filter = query.filter(DeletionStatus::Active)?;
    let page = list_properties(
        &config.client,
        &config.database,
        &filter,
        query.sort.unwrap_or_default(),
        query.page(),
    )
    .await?;

    debug!("Returning {} of {} listings", page.items.len(), page.total);
    Ok(ok(PageResponse::from(page)))
}

#[tracing::instrument(name = "/properties/{key} - Returns one active listing", skip(config))]
#[get("/properties/{key}")]
pub async fn show(config: Data<Config>, key: Path<String>) -> Result<HttpResponse, ApiError> {
    let property = get_property(&config.client, &config.database, &key).await?;

    // Soft-deleted listings are invisible to the public
    if property.deletion_status != DeletionStatus::Active {
        return Err(ApiError::NotFound("property"));
    }
    Ok(ok(PropertyResponse::from(property)))
}

#[tracing::instrument(
    name = "/properties/{key}/views - Records a view for the cookie-identified viewer",
    skip(config, req)
)]
#[post("/properties/{key}/views")]
pub async fn view(
    config: Data<Config>,
    req: HttpRequest,
    key: Path<String>,
) -> Result<HttpResponse, ApiError> {
    let (viewer, issue_cookie) = viewer_id(&req);
    let agent = user_agent(&req);

    let outcome = record_view(
        &config.client,
        &config.database,
        &key,
        &viewer,
        agent.as_deref(),
        &config.view_policy,
    )
    .await?;
    debug!(
        "View on {} by {}: counted={} unique={}",
        key, viewer, outcome.counted, outcome.unique
    );

    let mut response = HttpResponse::Ok();
    if issue_cookie {
        response.cookie(viewer_cookie(&viewer));
    }
    Ok(response.json(ApiResponse::ok(outcome)))
}

#[tracing::instrument(name = "/properties/{key}/stats - Returns view analytics", skip(config))]
#[get("/properties/{key}/stats")]
pub async fn stats(config: Data<Config>, key: Path<String>) -> Result<HttpResponse, ApiError> {
    let stats = view_stats(&config.client, &config.database, &key).await?;
    Ok(ok(stats))
}

#[tracing::instrument(name = "/agents - Lists agents", skip(config))]
#[get("/agents")]
pub async fn agents(config: Data<Config>) -> Result<HttpResponse, ApiError> {
    let agents = list_users(&config.client, &config.database, Some(Role::Agent)).await?;
    let agents: Vec<UserResponse> = agents.into_iter().map(UserResponse::from).collect();
    Ok(ok(agents))
}

/// Loads a listing the caller may change: admins can edit anything, agents only their own.
async fn editable_property(
    config: &Config,
    user: &AuthUser,
    key: &str,
) -> Result<PropertyModel, ApiError> {
    let property = get_property(&config.client, &config.database, key).await?;
    if property.deletion_status == DeletionStatus::Deleted {
        return Err(ApiError::NotFound("property"));
    }
    if !user.is_admin() && !property.is_owned_by(&user.email) {
        warn!("{} tried to modify listing {} they do not own", user.email, key);
        return Err(ApiError::Forbidden("Listing belongs to another agent"));
    }
    Ok(property)
}

#[tracing::instrument(name = "/properties - Creates a listing", skip(config, body))]
#[post("/properties")]
pub async fn create(
    config: Data<Config>,
    user: AuthUser,
    body: Json<NewProperty>,
) -> Result<HttpResponse, ApiError> {
    let mut new_property = body.into_inner();
    new_property.validate()?;

    // Agents always list under their own profile
    if !user.is_admin() {
        let profile = get_user(&config.client, &config.database, &user.email).await?;
        new_property.agent = profile.agent_snapshot();
    }

    let property = insert_property(&config.client, &config.database, new_property).await?;
    info!("Listing created by {}: {:?}", user.email, property.id);
    Ok(created(PropertyResponse::from(property)))
}

#[tracing::instrument(name = "/properties/{key} - Updates a listing", skip(config, body))]
#[put("/properties/{key}")]
pub async fn update(
    config: Data<Config>,
    user: AuthUser,
    key: Path<String>,
    body: Json<PropertyUpdate>,
) -> Result<HttpResponse, ApiError> {
    editable_property(&config, &user, &key).await?;

    let mut changes = body.into_inner();
    if !user.is_admin() && changes.agent.take().is_some() {
        debug!("Ignoring agent change from non-admin {}", user.email);
    }

    let property = update_property(&config.client, &config.database, &key, &changes).await?;
    info!("Listing {} updated by {}", key, user.email);
    Ok(ok(PropertyResponse::from(property)))
}

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub filename: Option<String>,
    #[serde(default)]
    pub thumbnail: bool,
}

#[tracing::instrument(
    name = "/properties/{key}/images - Uploads a listing photo",
    skip(config, req, payload)
)]
#[post("/properties/{key}/images")]
pub async fn upload_image(
    config: Data<Config>,
    user: AuthUser,
    req: HttpRequest,
    key: Path<String>,
    query: Query<UploadQuery>,
    payload: Payload,
) -> Result<HttpResponse, ApiError> {
    let content_type = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let ext = image_extension(&content_type)
        .ok_or_else(|| ApiError::UnsupportedMedia(content_type.clone()))?;
    let body = read_limited(payload, config.max_upload_bytes).await?;
    if body.is_empty() {
        return Err(ApiError::BadRequest("empty upload".to_string()));
    }

    let property = editable_property(&config, &user, &key).await?;
    let owner = property
        .property_id
        .clone()
        .or_else(|| property.id.map(|id| id.to_hex()))
        .unwrap_or_else(|| key.to_string());
    let file_name = query.filename.as_deref().unwrap_or("photo");
    let object = object_key("properties", &owner, file_name, ext);

    let url = config
        .store
        .put_object(&object, body.to_vec(), &content_type)
        .await?;
    info!("Uploaded {} for listing {}", url, key);

    let property = add_image(
        &config.client,
        &config.database,
        &key,
        &url,
        query.thumbnail,
    )
    .await?;
    Ok(created(json!({
        "url": url,
        "property": PropertyResponse::from(property),
    })))
}

#[derive(Debug, Deserialize)]
pub struct ImageQuery {
    pub url: String,
}

#[tracing::instrument(name = "/properties/{key}/images - Removes a listing photo", skip(config))]
#[delete("/properties/{key}/images")]
pub async fn delete_image(
    config: Data<Config>,
    user: AuthUser,
    key: Path<String>,
    query: Query<ImageQuery>,
) -> Result<HttpResponse, ApiError> {
    editable_property(&config, &user, &key).await?;
    let property = remove_image(&config.client, &config.database, &key, &query.url).await?;

    // The listing no longer references the object; a failed delete only leaves an orphan
    if let Some(object) = config.store.key_from_public_url(&query.url) {
        if let Err(e) = config.store.delete_object(&object).await {
            warn!("Could not delete {} from bucket: {}", object, e);
        }
    }
    Ok(ok(PropertyResponse::from(property)))
}

#[derive(Debug, Deserialize, Default)]
pub struct DeletionRequest {
    pub reason: Option<String>,
}

#[tracing::instrument(
    name = "/properties/{key}/deletion - Requests soft deletion of a listing",
    skip(config)
)]
#[post("/properties/{key}/deletion")]
pub async fn request_delete(
    config: Data<Config>,
    user: AuthUser,
    key: Path<String>,
    body: Option<Json<DeletionRequest>>,
) -> Result<HttpResponse, ApiError> {
    editable_property(&config, &user, &key).await?;
    let reason = body.and_then(|b| b.into_inner().reason);

    let property = request_deletion(
        &config.client,
        &config.database,
        &key,
        &user.email,
        reason.as_deref(),
    )
    .await?;
    info!("Deletion of {} requested by {}", key, user.email);
    Ok(ok(PropertyResponse::from(property)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inverted_price_range_is_rejected() {
        let query = ListQuery {
            min_price: Some(10),
            max_price: Some(5),
            ..Default::default()
        };
        assert!(matches!(
            query.filter(DeletionStatus::Active),
            Err(ApiError::BadRequest(_))
        ));
    }

    #[test]
    fn query_maps_onto_filter_and_page() {
        let query = ListQuery {
            district: Some("Central".to_string()),
            bedrooms: Some(2),
            page: Some(2),
            limit: Some(500),
            ..Default::default()
        };
        let filter = query.filter(DeletionStatus::PendingDeletion).unwrap();
        assert_eq!(filter.min_bedrooms, Some(2));
        assert_eq!(filter.status, Some(DeletionStatus::PendingDeletion));
        let page = query.page();
        assert_eq!(page.page, 2);
        assert_eq!(page.limit, 100);
    }
}
