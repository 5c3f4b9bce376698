// database/properties/query.rs - query functions for the properties collection

use super::model::{
    AgentSnapshot, DeletionStatus, NewProperty, PropertyModel, PropertyUpdate,
};
use crate::error::DbError;
use crate::PROPERTIES_COLLECTION;
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, oid::ObjectId, to_bson, DateTime, Document},
    options::{FindOneAndUpdateOptions, FindOptions, ReturnDocument},
    Client, Collection,
};
use serde::Deserialize;
use tracing::debug;

pub const DEFAULT_PAGE_SIZE: u64 = 12;
pub const MAX_PAGE_SIZE: u64 = 100;
pub const MAX_PAGE: u64 = 10_000;

pub(crate) fn properties(client: &Client, database: &str) -> Collection<PropertyModel> {
    client.database(database).collection(PROPERTIES_COLLECTION)
}

/// Listings are addressed either by their ObjectId or by their public propertyId.
pub fn key_filter(key: &str) -> Document {
    match ObjectId::parse_str(key) {
        Ok(id) => doc! { "_id": id },
        Err(_) => doc! { "propertyId": key },
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Newest,
    PriceAsc,
    PriceDesc,
    MostViewed,
}

impl SortOrder {
    pub fn to_document(self) -> Document {
        match self {
            SortOrder::Newest => doc! { "createdAt": -1 },
            SortOrder::PriceAsc => doc! { "price": 1, "createdAt": -1 },
            SortOrder::PriceDesc => doc! { "price": -1, "createdAt": -1 },
            SortOrder::MostViewed => doc! { "viewCount": -1, "createdAt": -1 },
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PropertyFilter {
    pub district: Option<String>,
    pub min_price: Option<i64>,
    pub max_price: Option<i64>,
    pub min_bedrooms: Option<i32>,
    pub search: Option<String>,
    /// Defaults to active listings only.
    pub status: Option<DeletionStatus>,
    pub agent_email: Option<String>,
}

impl PropertyFilter {
    pub fn to_document(&self) -> Document {
        let status = self.status.unwrap_or_default();
        let mut filter = if status == DeletionStatus::Active {
            // documents written before soft deletion existed have no status
            doc! { "deletionStatus": { "$in": [status.as_str(), mongodb::bson::Bson::Null] } }
        } else {
            doc! { "deletionStatus": status.as_str() }
        };

        if let Some(district) = non_blank(&self.district) {
            filter.insert("district", district);
        }

        let mut price = Document::new();
        if let Some(min) = self.min_price {
            price.insert("$gte", min);
        }
        if let Some(max) = self.max_price {
            price.insert("$lte", max);
        }
        if !price.is_empty() {
            filter.insert("price", price);
        }

        if let Some(bedrooms) = self.min_bedrooms {
            filter.insert("bedrooms", doc! { "$gte": bedrooms });
        }

        if let Some(email) = non_blank(&self.agent_email) {
            filter.insert("agent.email", email);
        }

        if let Some(search) = non_blank(&self.search) {
            let pattern = regex::escape(search);
            filter.insert(
                "$or",
                vec![
                    doc! { "title": { "$regex": pattern.as_str(), "$options": "i" } },
                    doc! { "location": { "$regex": pattern.as_str(), "$options": "i" } },
                ],
            );
        }

        filter
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub page: u64,
    pub limit: u64,
}

impl Page {
    /// Clamps to 1..=MAX_PAGE and 1..=MAX_PAGE_SIZE items.
    pub fn new(page: Option<u64>, limit: Option<u64>) -> Self {
        Self {
            page: page.unwrap_or(1).clamp(1, MAX_PAGE),
            limit: limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn skip(&self) -> u64 {
        self.page.saturating_sub(1).saturating_mul(self.limit)
    }
}

#[derive(Debug, Clone)]
pub struct PropertyPage {
    pub items: Vec<PropertyModel>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
}

pub async fn insert_property(
    client: &Client,
    database: &str,
    new_property: NewProperty,
) -> Result<PropertyModel, DbError> {
    new_property.validate()?;

    let collection = properties(client, database);

    // Check if the public id is taken
    if let Some(property_id) = &new_property.property_id {
        if collection
            .find_one(doc! { "propertyId": property_id.as_str() }, None)
            .await?
            .is_some()
        {
            return Err(DbError::Duplicate("propertyId"));
        }
    }

    let mut model = new_property.into_model(DateTime::now());
    let result = match collection.insert_one(&model, None).await {
        Ok(result) => result,
        Err(e) if DbError::is_duplicate_key(&e) => return Err(DbError::Duplicate("propertyId")),
        Err(e) => return Err(e.into()),
    };
    model.id = result.inserted_id.as_object_id();
    debug!("Inserted property {:?}", model.id);

    Ok(model)
}

pub async fn get_property(
    client: &Client,
    database: &str,
    key: &str,
) -> Result<PropertyModel, DbError> {
    properties(client, database)
        .find_one(key_filter(key), None)
        .await?
        .ok_or(DbError::NotFound("property"))
}

pub async fn list_properties(
    client: &Client,
    database: &str,
    filter: &PropertyFilter,
    sort: SortOrder,
    page: Page,
) -> Result<PropertyPage, DbError> {
    let collection = properties(client, database);
    let filter = filter.to_document();

    let total = collection.count_documents(filter.clone(), None).await?;

    // History and viewer arrays are only needed for analytics
    let options = FindOptions::builder()
        .sort(sort.to_document())
        .skip(page.skip())
        .limit(page.limit as i64)
        .projection(doc! { "viewHistory": 0, "viewedBy": 0 })
        .build();

    let items: Vec<PropertyModel> = collection.find(filter, options).await?.try_collect().await?;

    Ok(PropertyPage {
        items,
        total,
        page: page.page,
        limit: page.limit,
    })
}

impl PropertyUpdate {
    pub fn to_set_document(&self) -> Result<Document, DbError> {
        let mut set = Document::new();
        if let Some(title) = &self.title {
            set.insert("title", title.trim());
        }
        if let Some(description) = &self.description {
            set.insert("description", description.as_str());
        }
        if let Some(location) = &self.location {
            set.insert("location", location.trim());
        }
        if let Some(district) = &self.district {
            set.insert("district", district.trim());
        }
        if let Some(price) = self.price {
            set.insert("price", price);
        }
        if let Some(bedrooms) = self.bedrooms {
            set.insert("bedrooms", bedrooms);
        }
        if let Some(bathrooms) = self.bathrooms {
            set.insert("bathrooms", bathrooms);
        }
        if let Some(area) = self.area {
            set.insert("area", area);
        }
        if let Some(property_type) = &self.property_type {
            set.insert("propertyType", property_type.as_str());
        }
        if let Some(agent) = &self.agent {
            set.insert("agent", to_bson(agent)?);
        }
        if let Some(thumbnail) = &self.thumbnail {
            set.insert("thumbnail", thumbnail.as_str());
        }
        if let Some(images) = &self.images {
            set.insert("images", images.clone());
        }
        Ok(set)
    }
}

async fn find_and_update(
    client: &Client,
    database: &str,
    filter: Document,
    update: Document,
) -> Result<Option<PropertyModel>, DbError> {
    let options = FindOneAndUpdateOptions::builder()
        .return_document(ReturnDocument::After)
        .build();
    Ok(properties(client, database)
        .find_one_and_update(filter, update, options)
        .await?)
}

pub async fn update_property(
    client: &Client,
    database: &str,
    key: &str,
    update: &PropertyUpdate,
) -> Result<PropertyModel, DbError> {
    update.validate()?;
    let mut set = update.to_set_document()?;
    if set.is_empty() {
        return Err(DbError::Validation("nothing to update".to_string()));
    }
    set.insert("updatedAt", DateTime::now());

    find_and_update(client, database, key_filter(key), doc! { "$set": set })
        .await?
        .ok_or(DbError::NotFound("property"))
}

pub async fn add_image(
    client: &Client,
    database: &str,
    key: &str,
    url: &str,
    make_thumbnail: bool,
) -> Result<PropertyModel, DbError> {
    let property = get_property(client, database, key).await?;

    let mut set = doc! { "updatedAt": DateTime::now() };
    if make_thumbnail || property.thumbnail.as_deref().map_or(true, str::is_empty) {
        set.insert("thumbnail", url);
    }

    find_and_update(
        client,
        database,
        key_filter(key),
        doc! { "$addToSet": { "images": url }, "$set": set },
    )
    .await?
    .ok_or(DbError::NotFound("property"))
}

/// Pulls `url` from the images. A removed thumbnail falls back to the next
/// remaining image, or is unset when none is left.
pub fn remove_image_update(
    property: &PropertyModel,
    url: &str,
    now: DateTime,
) -> Result<Document, DbError> {
    if !property.images.iter().any(|i| i == url) && property.thumbnail.as_deref() != Some(url) {
        return Err(DbError::NotFound("image"));
    }

    let mut set = doc! { "updatedAt": now };
    let mut update = doc! { "$pull": { "images": url } };
    if property.thumbnail.as_deref() == Some(url) {
        match property.images.iter().find(|i| *i != url) {
            Some(next) => {
                set.insert("thumbnail", next.as_str());
            }
            None => {
                update.insert("$unset", doc! { "thumbnail": "" });
            }
        }
    }
    update.insert("$set", set);
    Ok(update)
}

pub async fn remove_image(
    client: &Client,
    database: &str,
    key: &str,
    url: &str,
) -> Result<PropertyModel, DbError> {
    let property = get_property(client, database, key).await?;
    let update = remove_image_update(&property, url, DateTime::now())?;

    find_and_update(client, database, key_filter(key), update)
        .await?
        .ok_or(DbError::NotFound("property"))
}

async fn transition(
    client: &Client,
    database: &str,
    key: &str,
    to: DeletionStatus,
    mut set: Document,
    unset: Option<Document>,
) -> Result<PropertyModel, DbError> {
    let current = get_property(client, database, key).await?;
    let from = current.deletion_status;
    if !from.can_transition_to(to) {
        return Err(DbError::InvalidTransition { from, to });
    }

    let filter = transition_filter(key, from);
    set.insert("deletionStatus", to.as_str());
    set.insert("updatedAt", DateTime::now());
    let mut update = doc! { "$set": set };
    if let Some(unset) = unset {
        update.insert("$unset", unset);
    }

    match find_and_update(client, database, filter, update).await? {
        Some(updated) => Ok(updated),
        None => {
            let now = get_property(client, database, key).await?;
            Err(lost_transition(now.deletion_status, to))
        }
    }
}

/// Matches the listing only while its status is still `from`; listings
/// without a status count as active.
pub fn transition_filter(key: &str, from: DeletionStatus) -> Document {
    let mut filter = key_filter(key);
    if from == DeletionStatus::Active {
        filter.insert(
            "deletionStatus",
            doc! { "$in": [from.as_str(), mongodb::bson::Bson::Null] },
        );
    } else {
        filter.insert("deletionStatus", from.as_str());
    }
    filter
}

/// Error for a conditional transition whose filter no longer matched.
fn lost_transition(current: DeletionStatus, to: DeletionStatus) -> DbError {
    DbError::InvalidTransition { from: current, to }
}

pub async fn request_deletion(
    client: &Client,
    database: &str,
    key: &str,
    requested_by: &str,
    reason: Option<&str>,
) -> Result<PropertyModel, DbError> {
    let mut set = doc! {
        "deletionRequestedAt": DateTime::now(),
        "deletionRequestedBy": requested_by,
    };
    if let Some(reason) = reason {
        set.insert("deletionReason", reason);
    }
    transition(
        client,
        database,
        key,
        DeletionStatus::PendingDeletion,
        set,
        None,
    )
    .await
}

pub async fn confirm_deletion(
    client: &Client,
    database: &str,
    key: &str,
) -> Result<PropertyModel, DbError> {
    transition(
        client,
        database,
        key,
        DeletionStatus::Deleted,
        doc! { "deletedAt": DateTime::now() },
        None,
    )
    .await
}

pub async fn cancel_deletion(
    client: &Client,
    database: &str,
    key: &str,
) -> Result<PropertyModel, DbError> {
    transition(
        client,
        database,
        key,
        DeletionStatus::Active,
        Document::new(),
        Some(doc! {
            "deletionRequestedAt": "",
            "deletionRequestedBy": "",
            "deletionReason": "",
        }),
    )
    .await
}

/// Rewrites the embedded agent on every listing owned by the agent.
pub async fn sync_agent_snapshot(
    client: &Client,
    database: &str,
    email: &str,
    snapshot: &AgentSnapshot,
) -> Result<u64, DbError> {
    let result = properties(client, database)
        .update_many(
            doc! { "agent.email": email },
            doc! { "$set": { "agent": to_bson(snapshot)?, "updatedAt": DateTime::now() } },
            None,
        )
        .await?;
    Ok(result.modified_count)
}
