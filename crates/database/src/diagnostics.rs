// database/diagnostics.rs - connectivity checks and collection summaries for operators

use crate::error::DbError;
use crate::properties::model::{create_property_indexes, PropertyModel};
use crate::users::model::{create_user_index, UserModel};
use crate::{PROPERTIES_COLLECTION, USERS_COLLECTION};
use mongodb::{bson::doc, Client};
use serde::Serialize;
use std::time::Instant;
use tracing::info;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PingReport {
    pub database: String,
    pub ok: bool,
    pub latency_ms: u128,
}

/// Round trip to the server with `{ ping: 1 }`.
pub async fn ping(client: &Client, database: &str) -> Result<PingReport, DbError> {
    let started = Instant::now();
    let reply = client
        .database(database)
        .run_command(doc! { "ping": 1 }, None)
        .await?;
    let ok = reply
        .get("ok")
        .and_then(|v| v.as_f64().or_else(|| v.as_i32().map(f64::from)))
        .map_or(false, |v| v == 1.0);

    Ok(PingReport {
        database: database.to_string(),
        ok,
        latency_ms: started.elapsed().as_millis(),
    })
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSummary {
    pub properties_total: u64,
    pub active: u64,
    pub pending_deletion: u64,
    pub deleted: u64,
    pub missing_status: u64,
    pub flagged: u64,
    pub agents: u64,
    pub admins: u64,
}

pub async fn collection_summary(
    client: &Client,
    database: &str,
) -> Result<CollectionSummary, DbError> {
    let db = client.database(database);
    let properties = db.collection::<PropertyModel>(PROPERTIES_COLLECTION);
    let users = db.collection::<UserModel>(USERS_COLLECTION);

    Ok(CollectionSummary {
        properties_total: properties.count_documents(None, None).await?,
        active: properties
            .count_documents(doc! { "deletionStatus": "active" }, None)
            .await?,
        pending_deletion: properties
            .count_documents(doc! { "deletionStatus": "pending_deletion" }, None)
            .await?,
        deleted: properties
            .count_documents(doc! { "deletionStatus": "deleted" }, None)
            .await?,
        missing_status: properties
            .count_documents(doc! { "deletionStatus": { "$exists": false } }, None)
            .await?,
        flagged: properties
            .count_documents(doc! { "suspiciousActivity.flagged": true }, None)
            .await?,
        agents: users.count_documents(doc! { "role": "agent" }, None).await?,
        admins: users.count_documents(doc! { "role": "admin" }, None).await?,
    })
}

pub async fn create_indexes(client: &Client, database: &str) -> Result<(), DbError> {
    create_property_indexes(client, database).await?;
    create_user_index(client, database).await?;
    info!("Indexes created on {}", database);
    Ok(())
}
