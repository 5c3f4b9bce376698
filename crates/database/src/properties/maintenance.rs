// database/properties/maintenance.rs - repairs for documents that drifted from the schema

use super::model::PropertyModel;
use super::query::properties;
use crate::error::DbError;
use crate::users::model::UserModel;
use crate::USERS_COLLECTION;
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, Bson, DateTime, Document},
    options::UpdateModifications,
    Client, Collection,
};
use serde::Serialize;
use tracing::{debug, info};

enum Fix {
    Set(Document),
    Pipeline(Vec<Document>),
}

impl From<Fix> for UpdateModifications {
    fn from(fix: Fix) -> Self {
        match fix {
            Fix::Set(update) => UpdateModifications::Document(update),
            Fix::Pipeline(stages) => UpdateModifications::Pipeline(stages),
        }
    }
}

struct Repair {
    name: &'static str,
    filter: Document,
    fix: Fix,
}

fn repairs() -> Vec<Repair> {
    vec![
        Repair {
            name: "missing_deletion_status",
            filter: doc! { "deletionStatus": { "$in": [Bson::Null] } },
            fix: Fix::Set(doc! { "$set": { "deletionStatus": "active" } }),
        },
        Repair {
            name: "missing_view_counters",
            filter: doc! { "$or": [
                { "viewCount": { "$in": [Bson::Null] } },
                { "uniqueViewCount": { "$in": [Bson::Null] } },
            ] },
            fix: Fix::Pipeline(vec![doc! { "$set": {
                "viewCount": { "$ifNull": ["$viewCount", 0_i64] },
                "uniqueViewCount": { "$ifNull": ["$uniqueViewCount", 0_i64] },
            } }]),
        },
        Repair {
            // counters only grow, so the total is raised rather than the unique count lowered
            name: "unique_exceeds_total",
            filter: doc! { "$expr": { "$gt": ["$uniqueViewCount", "$viewCount"] } },
            fix: Fix::Pipeline(vec![doc! { "$set": { "viewCount": "$uniqueViewCount" } }]),
        },
        Repair {
            name: "missing_thumbnail",
            filter: doc! {
                "thumbnail": { "$in": [Bson::Null, ""] },
                "images.0": { "$exists": true },
            },
            fix: Fix::Pipeline(vec![
                doc! { "$set": { "thumbnail": { "$arrayElemAt": ["$images", 0] } } },
            ]),
        },
        Repair {
            name: "deleted_without_timestamp",
            filter: doc! { "deletionStatus": "deleted", "deletedAt": { "$in": [Bson::Null] } },
            fix: Fix::Pipeline(vec![
                doc! { "$set": { "deletedAt": { "$ifNull": ["$updatedAt", "$$NOW"] } } },
            ]),
        },
        Repair {
            name: "pending_without_timestamp",
            filter: doc! {
                "deletionStatus": "pending_deletion",
                "deletionRequestedAt": { "$in": [Bson::Null] },
            },
            fix: Fix::Pipeline(vec![doc! { "$set": {
                "deletionRequestedAt": { "$ifNull": ["$updatedAt", "$$NOW"] },
            } }]),
        },
    ]
}

pub fn repair_names() -> Vec<&'static str> {
    repairs().iter().map(|r| r.name).collect()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairResult {
    pub name: &'static str,
    pub affected: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairReport {
    pub dry_run: bool,
    pub results: Vec<RepairResult>,
    pub total: u64,
}

/// Runs every repair in order. A dry run only counts the matching documents.
pub async fn repair_inconsistencies(
    client: &Client,
    database: &str,
    dry_run: bool,
) -> Result<RepairReport, DbError> {
    let collection = properties(client, database);
    let mut results = vec![];

    for repair in repairs() {
        let affected = if dry_run {
            collection.count_documents(repair.filter, None).await?
        } else {
            collection
                .update_many(repair.filter, repair.fix, None)
                .await?
                .modified_count
        };
        debug!("Repair {}: {} document(s)", repair.name, affected);
        results.push(RepairResult {
            name: repair.name,
            affected,
        });
    }

    let total = results.iter().map(|r| r.affected).sum();
    info!("Data repair finished (dry_run={}): {} document(s)", dry_run, total);

    Ok(RepairReport {
        dry_run,
        results,
        total,
    })
}

fn normalize_base(base: &str) -> &str {
    base.trim().trim_end_matches('/')
}

/// Moves a URL from one base to another. Returns None when the URL is not
/// under `from`.
pub fn rebase_url(url: &str, from: &str, to: &str) -> Option<String> {
    let from = normalize_base(from);
    let to = normalize_base(to);
    if from.is_empty() {
        return None;
    }
    let rest = url.strip_prefix(from)?;
    if !(rest.is_empty() || rest.starts_with('/') || rest.starts_with('?')) {
        return None;
    }
    Some(format!("{to}{rest}"))
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RewriteReport {
    pub dry_run: bool,
    pub properties_matched: u64,
    pub properties_updated: u64,
    pub users_updated: u64,
    pub urls_rewritten: u64,
}

/// Computes the `$set` needed to move every image URL of a listing, if any.
pub fn rewrite_property_urls(
    property: &PropertyModel,
    from: &str,
    to: &str,
) -> Option<(Document, u64)> {
    let mut set = Document::new();
    let mut rewritten = 0;

    if let Some(thumb) = property.thumbnail.as_deref().and_then(|t| rebase_url(t, from, to)) {
        set.insert("thumbnail", thumb);
        rewritten += 1;
    }

    let mut changed = false;
    let images: Vec<String> = property
        .images
        .iter()
        .map(|image| match rebase_url(image, from, to) {
            Some(moved) => {
                changed = true;
                rewritten += 1;
                moved
            }
            None => image.clone(),
        })
        .collect();
    if changed {
        set.insert("images", images);
    }

    if let Some(avatar) = property.agent.image.as_deref().and_then(|i| rebase_url(i, from, to)) {
        set.insert("agent.image", avatar);
        rewritten += 1;
    }

    if set.is_empty() {
        None
    } else {
        Some((set, rewritten))
    }
}

pub async fn rewrite_image_base_url(
    client: &Client,
    database: &str,
    from: &str,
    to: &str,
    dry_run: bool,
) -> Result<RewriteReport, DbError> {
    let (from, to) = (normalize_base(from), normalize_base(to));
    if from.is_empty() || to.is_empty() || from == to {
        return Err(DbError::Validation(
            "both base URLs are required and must differ".to_string(),
        ));
    }

    let prefix = format!("^{}", regex::escape(from));
    let matches = doc! { "$regex": prefix.as_str() };
    let collection = properties(client, database);
    let mut cursor = collection
        .find(
            doc! { "$or": [
                { "thumbnail": matches.clone() },
                { "images": matches.clone() },
                { "agent.image": matches.clone() },
            ] },
            None,
        )
        .await?;

    let mut report = RewriteReport {
        dry_run,
        ..Default::default()
    };

    while let Some(property) = cursor.try_next().await? {
        let Some((mut set, rewritten)) = rewrite_property_urls(&property, from, to) else {
            continue;
        };
        report.properties_matched += 1;
        report.urls_rewritten += rewritten;
        if dry_run {
            continue;
        }
        set.insert("updatedAt", DateTime::now());
        collection
            .update_one(doc! { "_id": property.id }, doc! { "$set": set }, None)
            .await?;
        report.properties_updated += 1;
    }

    let users: Collection<UserModel> = client.database(database).collection(USERS_COLLECTION);
    let mut cursor = users.find(doc! { "image": matches }, None).await?;
    while let Some(user) = cursor.try_next().await? {
        let Some(moved) = user.image.as_deref().and_then(|i| rebase_url(i, from, to)) else {
            continue;
        };
        report.urls_rewritten += 1;
        if dry_run {
            continue;
        }
        users
            .update_one(
                doc! { "email": user.email.as_str() },
                doc! { "$set": { "image": moved } },
                None,
            )
            .await?;
        report.users_updated += 1;
    }

    info!(
        "Rewrote image base {} -> {}: {:?}",
        from, to, report
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties::model::NewProperty;

    const OLD: &str = "https://pub-old.r2.dev";
    const NEW: &str = "https://images.example.com/";

    #[test]
    fn rebase_only_touches_urls_under_the_old_base() {
        assert_eq!(
            rebase_url("https://pub-old.r2.dev/properties/a.jpg", OLD, NEW).as_deref(),
            Some("https://images.example.com/properties/a.jpg")
        );
        assert_eq!(rebase_url("https://elsewhere.com/a.jpg", OLD, NEW), None);
        // a longer host sharing the prefix is a different bucket
        assert_eq!(rebase_url("https://pub-old.r2.devx/a.jpg", OLD, NEW), None);
        assert_eq!(rebase_url("https://pub-old.r2.dev/a.jpg", "", NEW), None);
    }

    #[test]
    fn property_rewrite_collects_every_image_field() {
        let mut property = NewProperty {
            title: "t".to_string(),
            location: "l".to_string(),
            district: "d".to_string(),
            images: vec![
                format!("{OLD}/properties/1.jpg"),
                "https://other.com/2.jpg".to_string(),
            ],
            ..Default::default()
        }
        .into_model(DateTime::now());
        property.agent.image = Some(format!("{OLD}/avatars/agent.png"));

        let (set, count) = rewrite_property_urls(&property, OLD, NEW).unwrap();
        assert_eq!(count, 3);
        assert_eq!(
            set.get_str("thumbnail").unwrap(),
            "https://images.example.com/properties/1.jpg"
        );
        let images = set.get_array("images").unwrap();
        assert_eq!(images[1].as_str(), Some("https://other.com/2.jpg"));
        assert_eq!(
            set.get_str("agent.image").unwrap(),
            "https://images.example.com/avatars/agent.png"
        );
    }

    #[test]
    fn untouched_property_needs_no_update() {
        let property = NewProperty {
            title: "t".to_string(),
            location: "l".to_string(),
            district: "d".to_string(),
            ..Default::default()
        }
        .into_model(DateTime::now());
        assert!(rewrite_property_urls(&property, OLD, NEW).is_none());
    }

    #[test]
    fn repairs_have_stable_names() {
        assert_eq!(
            repair_names(),
            vec![
                "missing_deletion_status",
                "missing_view_counters",
                "unique_exceeds_total",
                "missing_thumbnail",
                "deleted_without_timestamp",
                "pending_without_timestamp",
            ]
        );
    }
}
