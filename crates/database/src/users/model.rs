// database/users/model.rs - model for the users collection
use crate::error::DbError;
use crate::properties::model::AgentSnapshot;
use crate::USERS_COLLECTION;
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use mongodb::{
    bson::{doc, oid::ObjectId, DateTime},
    options::IndexOptions,
    Client, IndexModel,
};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Agent,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Agent => "agent",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "agent" => Ok(Role::Agent),
            "admin" => Ok(Role::Admin),
            other => Err(DbError::Validation(format!("unknown role '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserModel {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    #[serde(default)]
    pub role: Role,
    pub created_at: DateTime,
}

impl UserModel {
    pub fn agent_snapshot(&self) -> AgentSnapshot {
        AgentSnapshot {
            name: self.name.clone(),
            phone: self.phone.clone(),
            email: Some(self.email.clone()),
            image: self.image.clone(),
            rating: self.rating,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub role: Role,
}

impl NewUser {
    pub fn validate(&self) -> Result<(), DbError> {
        validate_email(&self.email)?;
        if self.name.trim().is_empty() {
            return Err(DbError::Validation("name is required".to_string()));
        }
        validate_rating(self.rating)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub image: Option<String>,
    pub rating: Option<f64>,
    pub role: Option<Role>,
}

impl ProfileUpdate {
    pub fn validate(&self) -> Result<(), DbError> {
        if self.name.as_deref().map_or(false, |n| n.trim().is_empty()) {
            return Err(DbError::Validation("name cannot be blank".to_string()));
        }
        validate_rating(self.rating)
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

fn validate_email(email: &str) -> Result<(), DbError> {
    let email = email.trim();
    let valid = match email.split_once('@') {
        Some((user, domain)) => !user.is_empty() && domain.contains('.') && !domain.starts_with('.'),
        None => false,
    };
    if !valid {
        return Err(DbError::Validation(format!("invalid email '{email}'")));
    }
    Ok(())
}

fn validate_rating(rating: Option<f64>) -> Result<(), DbError> {
    match rating {
        Some(r) if !(0.0..=5.0).contains(&r) => Err(DbError::Validation(
            "rating must be between 0 and 5".to_string(),
        )),
        _ => Ok(()),
    }
}

pub const JWT_ALGORITHM: Algorithm = Algorithm::HS512;

// Claims carried by API bearer tokens
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Claims {
    pub exp: usize,  // Expiration time (as UTC timestamp)
    pub sub: String, // User email
    pub role: Role,
}

impl Claims {
    pub fn new(email: &str, role: Role, validity: Duration) -> Result<Self, DbError> {
        let expiration = Utc::now()
            .checked_add_signed(validity)
            .ok_or_else(|| DbError::Validation("token expiration out of range".to_string()))?
            .timestamp();

        Ok(Self {
            exp: expiration.max(0) as usize,
            sub: email.to_owned(),
            role,
        })
    }

    /// Signs the claims with the shared secret; the API decodes with the same algorithm.
    pub fn sign(&self, secret: &str) -> Result<String, DbError> {
        Ok(encode(
            &Header::new(JWT_ALGORITHM),
            self,
            &EncodingKey::from_secret(secret.as_ref()),
        )?)
    }
}

pub async fn create_user_index(client: &Client, database: &str) -> Result<(), DbError> {
    let options = IndexOptions::builder().unique(true).build();

    let model = IndexModel::builder()
        .keys(doc! { "email": 1 })
        .options(options)
        .build();

    client
        .database(database)
        .collection::<UserModel>(USERS_COLLECTION)
        .create_index(model, None)
        .await?;
    Ok(())
}
