// database/users/query.rs - query functions for the users collection

use super::model::{normalize_email, NewUser, ProfileUpdate, Role, UserModel};
use crate::error::DbError;
use crate::USERS_COLLECTION;
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, DateTime, Document},
    options::{FindOneAndUpdateOptions, FindOptions, ReturnDocument},
    Client, Collection,
};

fn users(client: &Client, database: &str) -> Collection<UserModel> {
    client.database(database).collection(USERS_COLLECTION)
}

// Insert a new agent or admin
pub async fn insert_user(
    client: &Client,
    database: &str,
    new_user: NewUser,
) -> Result<UserModel, DbError> {
    new_user.validate()?;
    let collection = users(client, database);
    let email = normalize_email(&new_user.email);

    // Check if the user already exists
    if collection
        .find_one(doc! { "email": email.as_str() }, None)
        .await?
        .is_some()
    {
        return Err(DbError::Duplicate("user"));
    }

    let mut user = UserModel {
        id: None,
        email,
        name: new_user.name.trim().to_string(),
        phone: new_user.phone,
        image: new_user.image,
        rating: new_user.rating,
        role: new_user.role,
        created_at: DateTime::now(),
    };

    match collection.insert_one(&user, None).await {
        Ok(result) => {
            user.id = result.inserted_id.as_object_id();
            Ok(user)
        }
        Err(e) if DbError::is_duplicate_key(&e) => Err(DbError::Duplicate("user")),
        Err(e) => Err(e.into()),
    }
}

pub async fn get_user(client: &Client, database: &str, email: &str) -> Result<UserModel, DbError> {
    users(client, database)
        .find_one(doc! { "email": normalize_email(email) }, None)
        .await?
        .ok_or(DbError::NotFound("user"))
}

pub async fn list_users(
    client: &Client,
    database: &str,
    role: Option<Role>,
) -> Result<Vec<UserModel>, DbError> {
    let filter = match role {
        Some(role) => doc! { "role": role.as_str() },
        None => Document::new(),
    };
    let options = FindOptions::builder().sort(doc! { "name": 1 }).build();

    Ok(users(client, database)
        .find(filter, options)
        .await?
        .try_collect()
        .await?)
}

pub async fn update_user_profile(
    client: &Client,
    database: &str,
    email: &str,
    update: &ProfileUpdate,
) -> Result<UserModel, DbError> {
    update.validate()?;

    let mut set = Document::new();
    if let Some(name) = &update.name {
        set.insert("name", name.trim());
    }
    if let Some(phone) = &update.phone {
        set.insert("phone", phone.as_str());
    }
    if let Some(image) = &update.image {
        set.insert("image", image.as_str());
    }
    if let Some(rating) = update.rating {
        set.insert("rating", rating);
    }
    if let Some(role) = update.role {
        set.insert("role", role.as_str());
    }
    if set.is_empty() {
        return Err(DbError::Validation("nothing to update".to_string()));
    }

    let options = FindOneAndUpdateOptions::builder()
        .return_document(ReturnDocument::After)
        .build();
    users(client, database)
        .find_one_and_update(
            doc! { "email": normalize_email(email) },
            doc! { "$set": set },
            options,
        )
        .await?
        .ok_or(DbError::NotFound("user"))
}

pub async fn delete_user(client: &Client, database: &str, email: &str) -> Result<(), DbError> {
    let result = users(client, database)
        .delete_one(doc! { "email": normalize_email(email) }, None)
        .await?;

    match result.deleted_count {
        0 => Err(DbError::NotFound("user")),
        _ => Ok(()),
    }
}
