// admin_routes.rs - moderation, diagnostics and data repair routes for admins

use super::auth::{create_jwt, AdminUser};
use super::config::Config;
use super::error::ApiError;
use super::response::{created, ok, PageResponse, PropertyResponse, UserResponse};
use super::routes::ListQuery;
use actix_web::{
    delete, get, post, put,
    web::{Data, Json, Path, Query},
    HttpResponse,
};
use database::{
    diagnostics::{collection_summary, ping},
    properties::{
        maintenance::{repair_inconsistencies, rewrite_image_base_url},
        query::{cancel_deletion, confirm_deletion, get_property, list_properties, sync_agent_snapshot},
    },
    users::{
        model::{NewUser, ProfileUpdate, Role},
        query::{delete_user, get_user, insert_user, list_users, update_user_profile},
    },
};
use futures::future::join_all;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};

const AGENT_TOKEN_SECONDS: i64 = 30 * 24 * 60 * 60;

#[tracing::instrument(name = "/admin/properties - Lists listings in any state", skip(config))]
#[get("/admin/properties")]
pub async fn list_all(
    config: Data<Config>,
    _admin: AdminUser,
    query: Query<ListQuery>,
) -> Result<HttpResponse, ApiError> {
    let mut filter = query.filter(query.status.unwrap_or_default())?;
    filter.agent_email = query.agent.clone();

    let page = list_properties(
        &config.client,
        &config.database,
        &filter,
        query.sort.unwrap_or_default(),
        query.page(),
    )
    .await?;
    Ok(ok(PageResponse::from(page)))
}

#[tracing::instrument(
    name = "/admin/properties/{key}/deletion/confirm - Confirms a pending deletion",
    skip(config)
)]
#[post("/admin/properties/{key}/deletion/confirm")]
pub async fn confirm_delete(
    config: Data<Config>,
    admin: AdminUser,
    key: Path<String>,
) -> Result<HttpResponse, ApiError> {
    let property = confirm_deletion(&config.client, &config.database, &key).await?;
    info!("Deletion of {} confirmed by {}", key, admin.0.email);
    Ok(ok(PropertyResponse::from(property)))
}

#[tracing::instrument(
    name = "/admin/properties/{key}/deletion/cancel - Restores a listing pending deletion",
    skip(config)
)]
#[post("/admin/properties/{key}/deletion/cancel")]
pub async fn cancel_delete(
    config: Data<Config>,
    admin: AdminUser,
    key: Path<String>,
) -> Result<HttpResponse, ApiError> {
    let property = cancel_deletion(&config.client, &config.database, &key).await?;
    info!("Deletion of {} cancelled by {}", key, admin.0.email);
    Ok(ok(PropertyResponse::from(property)))
}

#[tracing::instrument(
    name = "/admin/properties/{key}/images - Checks every image URL of a listing against the bucket",
    skip(config)
)]
#[get("/admin/properties/{key}/images")]
pub async fn inspect_images(
    config: Data<Config>,
    _admin: AdminUser,
    key: Path<String>,
) -> Result<HttpResponse, ApiError> {
    let property = get_property(&config.client, &config.database, &key).await?;

    let mut urls: Vec<String> = property.thumbnail.iter().cloned().collect();
    for image in &property.images {
        if !urls.contains(image) {
            urls.push(image.clone());
        }
    }

    let checks = join_all(urls.iter().map(|url| config.store.check_url(url))).await;
    let broken = checks.iter().filter(|c| !c.reachable).count();
    let foreign = checks.iter().filter(|c| !c.in_bucket).count();
    if broken > 0 {
        warn!("{} of {} image URLs on {} are unreachable", broken, checks.len(), key);
    }

    Ok(ok(json!({
        "publicBaseUrl": config.store.public_base_url(),
        "thumbnail": property.thumbnail,
        "checks": checks,
        "broken": broken,
        "outsideBucket": foreign,
    })))
}

#[tracing::instrument(name = "/admin/diagnostics/database - Database connectivity", skip(config))]
#[get("/admin/diagnostics/database")]
pub async fn database_diagnostics(
    config: Data<Config>,
    _admin: AdminUser,
) -> Result<HttpResponse, ApiError> {
    let report = match ping(&config.client, &config.database).await {
        Ok(report) => report,
        Err(e) => {
            error!("Database ping failed: {}", e);
            return Err(ApiError::Internal(format!("Database unreachable: {e}")));
        }
    };
    let summary = collection_summary(&config.client, &config.database).await?;
    Ok(ok(json!({ "ping": report, "collections": summary })))
}

#[tracing::instrument(name = "/admin/diagnostics/storage - Bucket configuration", skip(config))]
#[get("/admin/diagnostics/storage")]
pub async fn storage_diagnostics(
    config: Data<Config>,
    _admin: AdminUser,
) -> Result<HttpResponse, ApiError> {
    let public_base = config.store.check_public_base().await;
    Ok(ok(json!({ "store": config.store.info(), "publicBase": public_base })))
}

#[derive(Debug, Deserialize)]
pub struct RepairQuery {
    #[serde(default)]
    pub dry_run: bool,
}

#[tracing::instrument(name = "/admin/maintenance/repair - Fixes inconsistent listings", skip(config))]
#[post("/admin/maintenance/repair")]
pub async fn repair(
    config: Data<Config>,
    admin: AdminUser,
    query: Query<RepairQuery>,
) -> Result<HttpResponse, ApiError> {
    let report = repair_inconsistencies(&config.client, &config.database, query.dry_run).await?;
    info!("Repair run by {}: {} document(s)", admin.0.email, report.total);
    Ok(ok(report))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewriteRequest {
    pub from: String,
    pub to: Option<String>,
    #[serde(default)]
    pub dry_run: bool,
}

#[tracing::instrument(
    name = "/admin/maintenance/rewrite-image-urls - Moves image URLs to another bucket base",
    skip(config)
)]
#[post("/admin/maintenance/rewrite-image-urls")]
pub async fn rewrite_image_urls(
    config: Data<Config>,
    _admin: AdminUser,
    body: Json<RewriteRequest>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    // Defaults to the bucket currently configured
    let to = body
        .to
        .unwrap_or_else(|| config.store.public_base_url().to_string());

    let report = rewrite_image_base_url(
        &config.client,
        &config.database,
        &body.from,
        &to,
        body.dry_run,
    )
    .await?;
    Ok(ok(report))
}

#[derive(Debug, Deserialize)]
pub struct RoleQuery {
    pub role: Option<Role>,
}

#[tracing::instrument(name = "/admin/users - Lists agents and admins", skip(config))]
#[get("/admin/users")]
pub async fn users(
    config: Data<Config>,
    _admin: AdminUser,
    query: Query<RoleQuery>,
) -> Result<HttpResponse, ApiError> {
    let users = list_users(&config.client, &config.database, query.role).await?;
    let users: Vec<UserResponse> = users.into_iter().map(UserResponse::from).collect();
    Ok(ok(users))
}

#[tracing::instrument(name = "/admin/agents - Adds an agent or admin", skip(config))]
#[post("/admin/agents")]
pub async fn add_agent(
    config: Data<Config>,
    admin: AdminUser,
    body: Json<NewUser>,
) -> Result<HttpResponse, ApiError> {
    let user = insert_user(&config.client, &config.database, body.into_inner()).await?;
    info!("{} added {} ({})", admin.0.email, user.email, user.role);
    Ok(created(UserResponse::from(user)))
}

#[tracing::instrument(name = "/admin/agents/{email} - Updates an agent profile", skip(config))]
#[put("/admin/agents/{email}")]
pub async fn update_agent(
    config: Data<Config>,
    admin: AdminUser,
    email: Path<String>,
    body: Json<ProfileUpdate>,
) -> Result<HttpResponse, ApiError> {
    let user = update_user_profile(&config.client, &config.database, &email, &body).await?;

    // Listings embed a copy of the agent, keep it current
    let synced = sync_agent_snapshot(
        &config.client,
        &config.database,
        &user.email,
        &user.agent_snapshot(),
    )
    .await?;
    info!("Updated {} and {} listing snapshot(s)", user.email, synced);

    Ok(ok(json!({ "user": UserResponse::from(user), "listingsUpdated": synced })))
}

#[tracing::instrument(name = "/admin/agents/{email} - Removes an agent", skip(config))]
#[delete("/admin/agents/{email}")]
pub async fn remove_agent(
    config: Data<Config>,
    admin: AdminUser,
    email: Path<String>,
) -> Result<HttpResponse, ApiError> {
    if email.eq_ignore_ascii_case(&admin.0.email) {
        return Err(ApiError::BadRequest("cannot remove yourself".to_string()));
    }
    delete_user(&config.client, &config.database, &email).await?;
    info!("{} removed {}", admin.0.email, email);
    Ok(ok(json!({ "removed": email.into_inner() })))
}

#[tracing::instrument(name = "/admin/agents/{email}/token - Issues an API token", skip(config))]
#[post("/admin/agents/{email}/token")]
pub async fn issue_token(
    config: Data<Config>,
    admin: AdminUser,
    email: Path<String>,
) -> Result<HttpResponse, ApiError> {
    let user = get_user(&config.client, &config.database, &email).await?;
    let token = create_jwt(&config.jwt_secret, &user.email, user.role, AGENT_TOKEN_SECONDS)?;
    info!("{} issued a token for {}", admin.0.email, user.email);
    Ok(ok(json!({ "token": token, "expiresIn": AGENT_TOKEN_SECONDS })))
}
