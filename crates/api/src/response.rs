// response.rs - JSON envelope and the shapes handlers send back

use actix_web::HttpResponse;
use chrono::{SecondsFormat, TimeZone, Utc};
use database::{
    properties::{
        model::{AgentSnapshot, DeletionStatus, PropertyModel},
        query::PropertyPage,
    },
    users::model::{Role, UserModel},
};
use mongodb::bson::DateTime;
use serde::Serialize;

// Every endpoint answers with { success, data?, error? }
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

pub fn ok<T: Serialize>(data: T) -> HttpResponse {
    HttpResponse::Ok().json(ApiResponse::ok(data))
}

pub fn created<T: Serialize>(data: T) -> HttpResponse {
    HttpResponse::Created().json(ApiResponse::ok(data))
}

pub fn rfc3339(value: DateTime) -> String {
    Utc.timestamp_millis_opt(value.timestamp_millis())
        .single()
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_default()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyResponse {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub property_id: Option<String>,
    pub title: String,
    pub description: String,
    pub location: String,
    pub district: String,
    pub price: i64,
    pub bedrooms: i32,
    pub bathrooms: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub area: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub property_type: Option<String>,
    pub agent: AgentSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    pub images: Vec<String>,
    pub deletion_status: DeletionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deletion_requested_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deletion_requested_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deletion_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<String>,
    pub view_count: i64,
    pub unique_view_count: i64,
    pub view_quality_score: f64,
    pub flagged: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl From<PropertyModel> for PropertyResponse {
    fn from(p: PropertyModel) -> Self {
        Self {
            id: p.id.map(|id| id.to_hex()).unwrap_or_default(),
            property_id: p.property_id,
            title: p.title,
            description: p.description,
            location: p.location,
            district: p.district,
            price: p.price,
            bedrooms: p.bedrooms,
            bathrooms: p.bathrooms,
            area: p.area,
            property_type: p.property_type,
            agent: p.agent,
            thumbnail: p.thumbnail,
            images: p.images,
            deletion_status: p.deletion_status,
            deletion_requested_at: p.deletion_requested_at.map(rfc3339),
            deletion_requested_by: p.deletion_requested_by,
            deletion_reason: p.deletion_reason,
            deleted_at: p.deleted_at.map(rfc3339),
            view_count: p.view_count,
            unique_view_count: p.unique_view_count,
            view_quality_score: p.suspicious_activity.view_quality_score,
            flagged: p.suspicious_activity.flagged,
            created_at: rfc3339(p.created_at),
            updated_at: rfc3339(p.updated_at),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResponse<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub pages: u64,
}

impl From<PropertyPage> for PageResponse<PropertyResponse> {
    fn from(page: PropertyPage) -> Self {
        Self {
            pages: (page.total + page.limit.max(1) - 1) / page.limit.max(1),
            items: page.items.into_iter().map(PropertyResponse::from).collect(),
            total: page.total,
            page: page.page,
            limit: page.limit,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub email: String,
    pub name: String,
    pub phone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    pub role: Role,
    pub created_at: String,
}

impl From<UserModel> for UserResponse {
    fn from(u: UserModel) -> Self {
        Self {
            email: u.email,
            name: u.name,
            phone: u.phone,
            image: u.image,
            rating: u.rating,
            role: u.role,
            created_at: rfc3339(u.created_at),
        }
    }
}
