// database/properties/views.rs - view tracking and the anti-inflation heuristics

use super::model::{DeletionStatus, PropertyModel, SuspiciousActivity, ViewRecord};
use super::query::{get_property, key_filter, properties};
use crate::error::DbError;
use mongodb::{
    bson::{doc, to_bson, DateTime, Document},
    Client,
};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone)]
pub struct ViewPolicy {
    /// Repeat views by the same viewer inside this window are logged but not counted.
    pub repeat_cooldown: Duration,
    pub burst_window: Duration,
    pub burst_threshold: usize,
    pub spike_window: Duration,
    pub spike_threshold: usize,
    pub low_ratio_min_views: i64,
    pub low_ratio: f64,
    pub history_limit: usize,
}

impl Default for ViewPolicy {
    fn default() -> Self {
        Self {
            repeat_cooldown: Duration::from_secs(30 * 60),
            burst_window: Duration::from_secs(10 * 60),
            burst_threshold: 5,
            spike_window: Duration::from_secs(10 * 60),
            spike_threshold: 200,
            low_ratio_min_views: 50,
            low_ratio: 0.1,
            history_limit: 200,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspicionReason {
    ViewerBurst,
    TrafficSpike,
    LowUniqueRatio,
}

impl SuspicionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuspicionReason::ViewerBurst => "viewer_burst",
            SuspicionReason::TrafficSpike => "traffic_spike",
            SuspicionReason::LowUniqueRatio => "low_unique_ratio",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewAssessment {
    pub counted: bool,
    pub first_visit: bool,
    pub reasons: Vec<SuspicionReason>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewOutcome {
    pub counted: bool,
    pub unique: bool,
    pub view_count: i64,
    pub unique_view_count: i64,
    pub flagged: bool,
    pub view_quality_score: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewStats {
    pub view_count: i64,
    pub unique_view_count: i64,
    pub views_last_24h: usize,
    pub flagged: bool,
    pub reasons: Vec<String>,
    pub rapid_view_count: i64,
    pub view_quality_score: f64,
}

fn window_ms(window: Duration) -> i64 {
    i64::try_from(window.as_millis()).unwrap_or(i64::MAX)
}

fn within(record: &ViewRecord, now_ms: i64, window: Duration) -> bool {
    now_ms - record.viewed_at.timestamp_millis() < window_ms(window)
}

/// Decides whether a view counts and which heuristics it trips. The incoming
/// view is included in the burst and spike tallies.
pub fn assess_view(
    property: &PropertyModel,
    viewer_id: &str,
    now: DateTime,
    policy: &ViewPolicy,
) -> ViewAssessment {
    let now_ms = now.timestamp_millis();

    let recent_repeat = property
        .view_history
        .iter()
        .any(|r| r.viewer_id == viewer_id && within(r, now_ms, policy.repeat_cooldown));
    let first_visit = !property.viewed_by.iter().any(|v| v == viewer_id);
    let counted = first_visit || !recent_repeat;

    let mut reasons = vec![];

    let viewer_burst = property
        .view_history
        .iter()
        .filter(|r| r.viewer_id == viewer_id && within(r, now_ms, policy.burst_window))
        .count()
        + 1;
    if viewer_burst >= policy.burst_threshold {
        reasons.push(SuspicionReason::ViewerBurst);
    }

    let spike = property
        .view_history
        .iter()
        .filter(|r| within(r, now_ms, policy.spike_window))
        .count()
        + 1;
    if spike >= policy.spike_threshold {
        reasons.push(SuspicionReason::TrafficSpike);
    }

    let (views, unique) = projected_counts(property, counted, first_visit);
    if views >= policy.low_ratio_min_views && (unique as f64) / (views as f64) < policy.low_ratio {
        reasons.push(SuspicionReason::LowUniqueRatio);
    }

    ViewAssessment {
        counted,
        first_visit,
        reasons,
    }
}

fn projected_counts(property: &PropertyModel, counted: bool, first_visit: bool) -> (i64, i64) {
    let views = property.view_count + i64::from(counted);
    let unique = property.unique_view_count + i64::from(counted && first_visit);
    (views, unique)
}

/// Share of views that come from distinct viewers, discounted by 0.25 for
/// every active suspicion reason.
pub fn view_quality_score(view_count: i64, unique_view_count: i64, active_reasons: usize) -> f64 {
    let ratio = if view_count <= 0 {
        1.0
    } else {
        (unique_view_count.min(view_count) as f64) / (view_count as f64)
    };
    let score = (ratio - 0.25 * active_reasons as f64).clamp(0.0, 1.0);
    (score * 1000.0).round() / 1000.0
}

/// Counter and history update for one view. `unique` is only set for the request
/// whose filtered update added the viewer; a counted view that lost that race
/// still raises the total.
pub fn view_update(
    assessment: &ViewAssessment,
    record: &ViewRecord,
    unique: bool,
    history_limit: usize,
) -> Result<Document, DbError> {
    let mut update = doc! {
        "$push": {
            "viewHistory": {
                "$each": [to_bson(record)?],
                "$slice": -(history_limit as i64),
            }
        }
    };
    if unique {
        update.insert("$inc", doc! { "viewCount": 1_i64, "uniqueViewCount": 1_i64 });
        update.insert("$addToSet", doc! { "viewedBy": record.viewer_id.as_str() });
    } else if assessment.counted {
        update.insert("$inc", doc! { "viewCount": 1_i64 });
    }
    Ok(update)
}

pub async fn record_view(
    client: &Client,
    database: &str,
    key: &str,
    viewer_id: &str,
    user_agent: Option<&str>,
    policy: &ViewPolicy,
) -> Result<ViewOutcome, DbError> {
    let collection = properties(client, database);

    let property = get_property(client, database, key).await?;
    if property.deletion_status != DeletionStatus::Active {
        return Err(DbError::NotFound("property"));
    }
    let id = property.id.ok_or(DbError::NotFound("property"))?;

    let now = DateTime::now();
    let assessment = assess_view(&property, viewer_id, now, policy);
    debug!(
        "View assessment for {}: counted={} first_visit={} reasons={:?}",
        key, assessment.counted, assessment.first_visit, assessment.reasons
    );

    let record = ViewRecord {
        viewer_id: viewer_id.to_string(),
        viewed_at: now,
        user_agent: user_agent.map(|ua| ua.chars().take(256).collect()),
        counted: assessment.counted,
    };
    let mut unique = false;
    if assessment.counted && assessment.first_visit {
        // Only one concurrent request can add the viewer, the filter decides who
        let result = collection
            .update_one(
                doc! { "_id": id, "viewedBy": { "$ne": viewer_id } },
                view_update(&assessment, &record, true, policy.history_limit)?,
                None,
            )
            .await?;
        unique = result.matched_count == 1;
    }

    if !unique {
        collection
            .update_one(
                doc! { "_id": id },
                view_update(&assessment, &record, false, policy.history_limit)?,
                None,
            )
            .await?;
    }

    let view_count = property.view_count + i64::from(assessment.counted);
    let unique_view_count = property.unique_view_count + i64::from(unique);
    let flagged = property.suspicious_activity.flagged || !assessment.reasons.is_empty();
    let score = view_quality_score(view_count, unique_view_count, assessment.reasons.len());

    let mut suspicious = doc! {
        "$set": { "suspiciousActivity.viewQualityScore": score },
    };
    if !assessment.reasons.is_empty() {
        warn!(
            "Suspicious view activity on {}: {:?} (viewer {})",
            key, assessment.reasons, viewer_id
        );
        let reasons: Vec<&str> = assessment.reasons.iter().map(|r| r.as_str()).collect();
        suspicious = doc! {
            "$set": {
                "suspiciousActivity.flagged": true,
                "suspiciousActivity.lastFlaggedAt": now,
                "suspiciousActivity.viewQualityScore": score,
            },
            "$addToSet": { "suspiciousActivity.reasons": { "$each": reasons } },
            "$inc": { "suspiciousActivity.rapidViewCount": 1_i64 },
        };
    }
    collection
        .update_one(doc! { "_id": id }, suspicious, None)
        .await?;

    Ok(ViewOutcome {
        counted: assessment.counted,
        unique,
        view_count,
        unique_view_count,
        flagged,
        view_quality_score: score,
    })
}

pub fn stats_for(property: &PropertyModel, now: DateTime) -> ViewStats {
    let now_ms = now.timestamp_millis();
    let SuspiciousActivity {
        flagged,
        reasons,
        rapid_view_count,
        view_quality_score,
        ..
    } = property.suspicious_activity.clone();

    ViewStats {
        view_count: property.view_count,
        unique_view_count: property.unique_view_count,
        views_last_24h: property
            .view_history
            .iter()
            .filter(|r| now_ms - r.viewed_at.timestamp_millis() < DAY_MS)
            .count(),
        flagged,
        reasons,
        rapid_view_count,
        view_quality_score,
    }
}

/// Stats as shown to the public; soft-deleted listings are not found.
pub fn public_stats(property: &PropertyModel, now: DateTime) -> Result<ViewStats, DbError> {
    if property.deletion_status != DeletionStatus::Active {
        return Err(DbError::NotFound("property"));
    }
    Ok(stats_for(property, now))
}

pub async fn view_stats(client: &Client, database: &str, key: &str) -> Result<ViewStats, DbError> {
    let filter = key_filter(key);
    let property = properties(client, database)
        .find_one(filter, None)
        .await?
        .ok_or(DbError::NotFound("property"))?;
    public_stats(&property, DateTime::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties::model::NewProperty;

    const MINUTE: i64 = 60 * 1000;

    fn listing() -> PropertyModel {
        NewProperty {
            title: "Sea view".to_string(),
            location: "8 Beach Rd".to_string(),
            district: "Repulse Bay".to_string(),
            price: 1,
            ..Default::default()
        }
        .into_model(DateTime::from_millis(0))
    }

    fn seen(property: &mut PropertyModel, viewer: &str, at_ms: i64) {
        if !property.viewed_by.iter().any(|v| v == viewer) {
            property.viewed_by.push(viewer.to_string());
            property.unique_view_count += 1;
        }
        property.view_count += 1;
        property.view_history.push(ViewRecord {
            viewer_id: viewer.to_string(),
            viewed_at: DateTime::from_millis(at_ms),
            user_agent: None,
            counted: true,
        });
    }

    #[test]
    fn first_view_is_counted_and_unique() {
        let property = listing();
        let a = assess_view(
            &property,
            "v1",
            DateTime::from_millis(100 * MINUTE),
            &ViewPolicy::default(),
        );
        assert!(a.counted);
        assert!(a.first_visit);
        assert!(a.reasons.is_empty());
    }

    #[test]
    fn repeat_within_cooldown_is_not_counted() {
        let mut property = listing();
        seen(&mut property, "v1", 100 * MINUTE);

        let policy = ViewPolicy::default();
        let soon = assess_view(&property, "v1", DateTime::from_millis(110 * MINUTE), &policy);
        assert!(!soon.counted);
        assert!(!soon.first_visit);

        let later = assess_view(&property, "v1", DateTime::from_millis(140 * MINUTE), &policy);
        assert!(later.counted);
        assert!(!later.first_visit);
    }

    #[test]
    fn burst_from_one_viewer_is_flagged() {
        let mut property = listing();
        for i in 0..4 {
            seen(&mut property, "bot", 100 * MINUTE + i * 1000);
        }
        let a = assess_view(
            &property,
            "bot",
            DateTime::from_millis(100 * MINUTE + 5000),
            &ViewPolicy::default(),
        );
        assert!(a.reasons.contains(&SuspicionReason::ViewerBurst));
        assert!(!a.counted);
    }

    #[test]
    fn traffic_spike_counts_all_viewers() {
        let mut property = listing();
        let policy = ViewPolicy {
            spike_threshold: 10,
            ..ViewPolicy::default()
        };
        for i in 0..9 {
            seen(&mut property, &format!("v{i}"), 100 * MINUTE + i * 1000);
        }
        let a = assess_view(&property, "new", DateTime::from_millis(101 * MINUTE), &policy);
        assert_eq!(a.reasons, vec![SuspicionReason::TrafficSpike]);
        assert!(a.counted && a.first_visit);
    }

    #[test]
    fn low_unique_ratio_needs_enough_views() {
        let mut property = listing();
        property.view_count = 60;
        property.unique_view_count = 3;
        property.viewed_by = vec!["a".into(), "b".into(), "c".into()];
        let a = assess_view(
            &property,
            "a",
            DateTime::from_millis(500 * MINUTE),
            &ViewPolicy::default(),
        );
        assert!(a.reasons.contains(&SuspicionReason::LowUniqueRatio));

        property.view_count = 20;
        let b = assess_view(
            &property,
            "a",
            DateTime::from_millis(500 * MINUTE),
            &ViewPolicy::default(),
        );
        assert!(!b.reasons.contains(&SuspicionReason::LowUniqueRatio));
    }

    #[test]
    fn quality_score_is_ratio_minus_penalties() {
        assert_eq!(view_quality_score(0, 0, 0), 1.0);
        assert_eq!(view_quality_score(10, 5, 0), 0.5);
        assert_eq!(view_quality_score(10, 5, 1), 0.25);
        assert_eq!(view_quality_score(10, 5, 3), 0.0);
        assert_eq!(view_quality_score(3, 1, 0), 0.333);
        // unique never exceeds total in the ratio
        assert_eq!(view_quality_score(2, 5, 0), 1.0);
    }

    #[test]
    fn stats_count_only_the_last_day() {
        let mut property = listing();
        let now = 3 * DAY_MS;
        seen(&mut property, "old", now - DAY_MS - MINUTE);
        seen(&mut property, "recent", now - 5 * MINUTE);
        seen(&mut property, "recent2", now - MINUTE);

        let stats = stats_for(&property, DateTime::from_millis(now));
        assert_eq!(stats.view_count, 3);
        assert_eq!(stats.unique_view_count, 3);
        assert_eq!(stats.views_last_24h, 2);
        assert!(!stats.flagged);
    }

    #[test]
    fn soft_deleted_listings_have_no_public_stats() {
        let mut property = listing();
        assert!(public_stats(&property, DateTime::from_millis(0)).is_ok());

        for status in [DeletionStatus::PendingDeletion, DeletionStatus::Deleted] {
            property.deletion_status = status;
            assert!(matches!(
                public_stats(&property, DateTime::from_millis(0)),
                Err(DbError::NotFound("property"))
            ));
        }
    }

    fn record(viewer: &str, counted: bool) -> ViewRecord {
        ViewRecord {
            viewer_id: viewer.to_string(),
            viewed_at: DateTime::from_millis(100 * MINUTE),
            user_agent: None,
            counted,
        }
    }

    #[test]
    fn winning_first_view_is_unique() {
        let a = assess_view(
            &listing(),
            "v1",
            DateTime::from_millis(100 * MINUTE),
            &ViewPolicy::default(),
        );
        let update = view_update(&a, &record("v1", true), true, 200).unwrap();

        let inc = update.get_document("$inc").unwrap();
        assert_eq!(inc.get_i64("viewCount").unwrap(), 1);
        assert_eq!(inc.get_i64("uniqueViewCount").unwrap(), 1);
        assert_eq!(
            update.get_document("$addToSet").unwrap().get_str("viewedBy").unwrap(),
            "v1"
        );
        let push = update.get_document("$push").unwrap().get_document("viewHistory").unwrap();
        assert_eq!(push.get_i64("$slice").unwrap(), -200);
    }

    #[test]
    fn first_view_that_lost_the_race_counts_but_is_not_unique() {
        let a = assess_view(
            &listing(),
            "v1",
            DateTime::from_millis(100 * MINUTE),
            &ViewPolicy::default(),
        );
        assert!(a.counted && a.first_visit);

        let update = view_update(&a, &record("v1", true), false, 200).unwrap();
        let inc = update.get_document("$inc").unwrap();
        assert_eq!(inc.get_i64("viewCount").unwrap(), 1);
        assert!(!inc.contains_key("uniqueViewCount"));
        assert!(!update.contains_key("$addToSet"));
        assert!(update.contains_key("$push"));
    }

    #[test]
    fn uncounted_repeat_is_only_logged() {
        let mut property = listing();
        seen(&mut property, "v1", 100 * MINUTE);
        let a = assess_view(
            &property,
            "v1",
            DateTime::from_millis(101 * MINUTE),
            &ViewPolicy::default(),
        );
        assert!(!a.counted);

        let update = view_update(&a, &record("v1", false), false, 200).unwrap();
        assert!(!update.contains_key("$inc"));
        assert!(update.contains_key("$push"));
    }
}
