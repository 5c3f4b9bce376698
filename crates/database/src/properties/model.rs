// database/properties/model.rs - the property document and its embedded types

use crate::error::DbError;
use crate::PROPERTIES_COLLECTION;
use mongodb::{
    bson::{doc, oid::ObjectId, DateTime},
    options::IndexOptions,
    Client, IndexModel,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Soft-delete lifecycle of a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeletionStatus {
    #[default]
    Active,
    PendingDeletion,
    Deleted,
}

impl DeletionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeletionStatus::Active => "active",
            DeletionStatus::PendingDeletion => "pending_deletion",
            DeletionStatus::Deleted => "deleted",
        }
    }

    /// Request moves active listings to pending, an admin then confirms or cancels.
    pub fn can_transition_to(&self, next: DeletionStatus) -> bool {
        matches!(
            (self, next),
            (DeletionStatus::Active, DeletionStatus::PendingDeletion)
                | (DeletionStatus::PendingDeletion, DeletionStatus::Deleted)
                | (DeletionStatus::PendingDeletion, DeletionStatus::Active)
        )
    }
}

impl fmt::Display for DeletionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DeletionStatus {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(DeletionStatus::Active),
            "pending_deletion" => Ok(DeletionStatus::PendingDeletion),
            "deleted" => Ok(DeletionStatus::Deleted),
            other => Err(DbError::Validation(format!(
                "unknown deletion status '{other}'"
            ))),
        }
    }
}

// Copy of the listing agent taken when the property is written
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentSnapshot {
    pub name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ViewRecord {
    pub viewer_id: String,
    pub viewed_at: DateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub counted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SuspiciousActivity {
    #[serde(default)]
    pub flagged: bool,
    #[serde(default)]
    pub reasons: Vec<String>,
    #[serde(default)]
    pub rapid_view_count: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_flagged_at: Option<DateTime>,
    #[serde(default = "default_quality_score")]
    pub view_quality_score: f64,
}

fn default_quality_score() -> f64 {
    1.0
}

impl Default for SuspiciousActivity {
    fn default() -> Self {
        Self {
            flagged: false,
            reasons: vec![],
            rapid_view_count: 0,
            last_flagged_at: None,
            view_quality_score: default_quality_score(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyModel {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub location: String,
    pub district: String,
    pub price: i64,
    #[serde(default)]
    pub bedrooms: i32,
    #[serde(default)]
    pub bathrooms: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property_type: Option<String>,
    #[serde(default)]
    pub agent: AgentSnapshot,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,

    #[serde(default)]
    pub deletion_status: DeletionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_requested_at: Option<DateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_requested_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime>,

    #[serde(default)]
    pub view_count: i64,
    #[serde(default)]
    pub unique_view_count: i64,
    #[serde(default)]
    pub viewed_by: Vec<String>,
    #[serde(default)]
    pub view_history: Vec<ViewRecord>,
    #[serde(default)]
    pub suspicious_activity: SuspiciousActivity,

    pub created_at: DateTime,
    pub updated_at: DateTime,
}

impl PropertyModel {
    pub fn is_owned_by(&self, email: &str) -> bool {
        self.agent
            .email
            .as_deref()
            .map(|owner| owner.eq_ignore_ascii_case(email))
            .unwrap_or(false)
    }
}

/// Input accepted when creating a listing.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct NewProperty {
    #[serde(default)]
    pub property_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub location: String,
    pub district: String,
    pub price: i64,
    #[serde(default)]
    pub bedrooms: i32,
    #[serde(default)]
    pub bathrooms: i32,
    #[serde(default)]
    pub area: Option<f64>,
    #[serde(default)]
    pub property_type: Option<String>,
    #[serde(default)]
    pub agent: AgentSnapshot,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
}

impl NewProperty {
    pub fn validate(&self) -> Result<(), DbError> {
        require_text("title", &self.title)?;
        require_text("location", &self.location)?;
        require_text("district", &self.district)?;
        check_numbers(Some(self.price), Some(self.bedrooms), Some(self.bathrooms))?;
        check_rating(self.agent.rating)?;
        if let Some(property_id) = &self.property_id {
            check_property_id(property_id)?;
        }
        Ok(())
    }

    pub fn into_model(self, now: DateTime) -> PropertyModel {
        let thumbnail = self
            .thumbnail
            .filter(|t| !t.trim().is_empty())
            .or_else(|| self.images.first().cloned());

        PropertyModel {
            id: None,
            property_id: self.property_id,
            title: self.title.trim().to_string(),
            description: self.description,
            location: self.location.trim().to_string(),
            district: self.district.trim().to_string(),
            price: self.price,
            bedrooms: self.bedrooms,
            bathrooms: self.bathrooms,
            area: self.area,
            property_type: self.property_type,
            agent: self.agent,
            thumbnail,
            images: self.images,
            deletion_status: DeletionStatus::Active,
            deletion_requested_at: None,
            deletion_requested_by: None,
            deletion_reason: None,
            deleted_at: None,
            view_count: 0,
            unique_view_count: 0,
            viewed_by: vec![],
            view_history: vec![],
            suspicious_activity: SuspiciousActivity::default(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update of the descriptive fields. Counters and deletion state are
/// not reachable from here.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PropertyUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub district: Option<String>,
    pub price: Option<i64>,
    pub bedrooms: Option<i32>,
    pub bathrooms: Option<i32>,
    pub area: Option<f64>,
    pub property_type: Option<String>,
    pub agent: Option<AgentSnapshot>,
    pub thumbnail: Option<String>,
    pub images: Option<Vec<String>>,
}

impl PropertyUpdate {
    pub fn validate(&self) -> Result<(), DbError> {
        if let Some(title) = &self.title {
            require_text("title", title)?;
        }
        if let Some(location) = &self.location {
            require_text("location", location)?;
        }
        if let Some(district) = &self.district {
            require_text("district", district)?;
        }
        check_numbers(self.price, self.bedrooms, self.bathrooms)?;
        check_rating(self.agent.as_ref().and_then(|a| a.rating))
    }
}

fn require_text(field: &str, value: &str) -> Result<(), DbError> {
    if value.trim().is_empty() {
        return Err(DbError::Validation(format!("{field} is required")));
    }
    Ok(())
}

fn check_numbers(
    price: Option<i64>,
    bedrooms: Option<i32>,
    bathrooms: Option<i32>,
) -> Result<(), DbError> {
    if price.map_or(false, |p| p < 0) {
        return Err(DbError::Validation("price cannot be negative".to_string()));
    }
    if bedrooms.map_or(false, |b| b < 0) || bathrooms.map_or(false, |b| b < 0) {
        return Err(DbError::Validation(
            "bedrooms and bathrooms cannot be negative".to_string(),
        ));
    }
    Ok(())
}

fn check_rating(rating: Option<f64>) -> Result<(), DbError> {
    match rating {
        Some(r) if !(0.0..=5.0).contains(&r) => Err(DbError::Validation(
            "agent rating must be between 0 and 5".to_string(),
        )),
        _ => Ok(()),
    }
}

pub fn check_property_id(property_id: &str) -> Result<(), DbError> {
    let valid = !property_id.is_empty()
        && property_id.len() <= 64
        && property_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        return Err(DbError::Validation(format!(
            "invalid propertyId '{property_id}'"
        )));
    }
    Ok(())
}

pub async fn create_property_indexes(client: &Client, database: &str) -> Result<(), DbError> {
    let collection = client
        .database(database)
        .collection::<PropertyModel>(PROPERTIES_COLLECTION);

    // propertyId is optional, so uniqueness only applies where it is set
    let unique = IndexModel::builder()
        .keys(doc! { "propertyId": 1 })
        .options(IndexOptions::builder().unique(true).sparse(true).build())
        .build();
    let listing = IndexModel::builder()
        .keys(doc! { "deletionStatus": 1, "district": 1, "createdAt": -1 })
        .build();
    let owner = IndexModel::builder()
        .keys(doc! { "agent.email": 1 })
        .build();

    collection
        .create_indexes(vec![unique, listing, owner], None)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> NewProperty {
        NewProperty {
            property_id: Some("HK-1001".to_string()),
            title: "Harbour view flat".to_string(),
            location: "1 Harbour Road".to_string(),
            district: "Wan Chai".to_string(),
            price: 8_500_000,
            bedrooms: 2,
            bathrooms: 1,
            images: vec!["https://img.example.com/a.jpg".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn deletion_status_serializes_snake_case() {
        let json = serde_json::to_string(&DeletionStatus::PendingDeletion).unwrap();
        assert_eq!(json, "\"pending_deletion\"");
        let parsed: DeletionStatus = serde_json::from_str("\"deleted\"").unwrap();
        assert_eq!(parsed, DeletionStatus::Deleted);
    }

    #[test]
    fn unknown_deletion_status_is_rejected() {
        assert!(serde_json::from_str::<DeletionStatus>("\"archived\"").is_err());
        assert!("archived".parse::<DeletionStatus>().is_err());
        assert_eq!(
            "pending_deletion".parse::<DeletionStatus>().unwrap(),
            DeletionStatus::PendingDeletion
        );
    }

    #[test]
    fn only_request_confirm_and_cancel_transitions_are_allowed() {
        use DeletionStatus::*;
        assert!(Active.can_transition_to(PendingDeletion));
        assert!(PendingDeletion.can_transition_to(Deleted));
        assert!(PendingDeletion.can_transition_to(Active));

        assert!(!Active.can_transition_to(Deleted));
        assert!(!Deleted.can_transition_to(Active));
        assert!(!Deleted.can_transition_to(PendingDeletion));
        assert!(!Active.can_transition_to(Active));
    }

    #[test]
    fn new_property_validation() {
        assert!(sample().validate().is_ok());

        let mut blank_title = sample();
        blank_title.title = "   ".to_string();
        assert!(matches!(blank_title.validate(), Err(DbError::Validation(_))));

        let mut negative = sample();
        negative.price = -1;
        assert!(negative.validate().is_err());

        let mut bad_id = sample();
        bad_id.property_id = Some("has spaces".to_string());
        assert!(bad_id.validate().is_err());

        let mut bad_rating = sample();
        bad_rating.agent.rating = Some(7.5);
        assert!(bad_rating.validate().is_err());
    }

    #[test]
    fn new_property_starts_active_with_zeroed_counters() {
        let now = DateTime::now();
        let model = sample().into_model(now);
        assert_eq!(model.deletion_status, DeletionStatus::Active);
        assert_eq!(model.view_count, 0);
        assert_eq!(model.unique_view_count, 0);
        assert_eq!(model.suspicious_activity.view_quality_score, 1.0);
        // first image becomes the thumbnail when none is given
        assert_eq!(
            model.thumbnail.as_deref(),
            Some("https://img.example.com/a.jpg")
        );
    }

    #[test]
    fn legacy_document_without_tracking_fields_deserializes() {
        let legacy = doc! {
            "title": "Old listing",
            "location": "2 Queen St",
            "district": "Central",
            "price": 100_i64,
            "createdAt": DateTime::from_millis(0),
            "updatedAt": DateTime::from_millis(0),
        };
        let model: PropertyModel = mongodb::bson::from_document(legacy).unwrap();
        assert_eq!(model.deletion_status, DeletionStatus::Active);
        assert_eq!(model.view_count, 0);
        assert!(model.viewed_by.is_empty());
    }

    #[test]
    fn ownership_is_case_insensitive() {
        let mut model = sample().into_model(DateTime::now());
        model.agent.email = Some("Agent@Example.com".to_string());
        assert!(model.is_owned_by("agent@example.com"));
        assert!(!model.is_owned_by("other@example.com"));
    }
}
