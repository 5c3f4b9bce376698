// storage.rs - S3-compatible object storage for listing photos and agent avatars

use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use url::Url;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("invalid storage url: {0}")]
    InvalidUrl(String),

    #[error("storage client could not be built: {0}")]
    Client(#[source] reqwest::Error),

    #[error("storage request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("storage returned status {status} for {url}")]
    Status { status: u16, url: String },
}

#[derive(Clone)]
pub struct ObjectStore {
    endpoint: String,
    bucket: String,
    public_base_url: String,
    bearer_token: Option<String>,
    http: reqwest::Client,
}

impl fmt::Debug for ObjectStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStore")
            .field("endpoint", &self.endpoint)
            .field("bucket", &self.bucket)
            .field("public_base_url", &self.public_base_url)
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "***"))
            .finish()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlCheck {
    pub url: String,
    pub in_bucket: bool,
    pub status: Option<u16>,
    pub reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreInfo {
    pub endpoint: String,
    pub bucket: String,
    pub public_base_url: String,
    pub authenticated: bool,
}

fn trim_base(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

fn parse_base(name: &str, url: &str) -> Result<String, StorageError> {
    let trimmed = trim_base(url);
    let parsed = Url::parse(&trimmed).map_err(|e| StorageError::InvalidUrl(format!("{name}: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(StorageError::InvalidUrl(format!(
            "{name}: unsupported scheme {}",
            parsed.scheme()
        )));
    }
    Ok(trimmed)
}

impl ObjectStore {
    pub fn new(
        endpoint: &str,
        bucket: &str,
        public_base_url: &str,
        bearer_token: Option<String>,
    ) -> Result<Self, StorageError> {
        if bucket.trim().is_empty() {
            return Err(StorageError::InvalidUrl("bucket name is empty".to_string()));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(StorageError::Client)?;

        Ok(Self {
            endpoint: parse_base("endpoint", endpoint)?,
            bucket: bucket.trim().to_string(),
            public_base_url: parse_base("public base url", public_base_url)?,
            bearer_token: bearer_token.filter(|t| !t.is_empty()),
            http,
        })
    }

    pub fn info(&self) -> StoreInfo {
        StoreInfo {
            endpoint: self.endpoint.clone(),
            bucket: self.bucket.clone(),
            public_base_url: self.public_base_url.clone(),
            authenticated: self.bearer_token.is_some(),
        }
    }

    pub fn public_base_url(&self) -> &str {
        &self.public_base_url
    }

    // Path-style address used for writes
    fn object_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint, self.bucket, key)
    }

    pub fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base_url, key)
    }

    pub fn key_from_public_url(&self, url: &str) -> Option<String> {
        let rest = url.strip_prefix(&self.public_base_url)?.strip_prefix('/')?;
        let key = rest.split(|c: char| c == '?' || c == '#').next().unwrap_or_default();
        if key.is_empty() {
            None
        } else {
            Some(key.to_string())
        }
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Uploads the object and returns its public URL.
    #[instrument(name = "storage_put_object", skip(self, body))]
    pub async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StorageError> {
        let url = self.object_url(key);
        debug!("Uploading {} bytes to {}", body.len(), url);

        let response = self
            .authorize(self.http.put(&url))
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StorageError::Status {
                status: response.status().as_u16(),
                url,
            });
        }
        Ok(self.public_url(key))
    }

    /// Deleting a missing object is not an error.
    #[instrument(name = "storage_delete_object", skip(self))]
    pub async fn delete_object(&self, key: &str) -> Result<(), StorageError> {
        let url = self.object_url(key);
        let response = self.authorize(self.http.delete(&url)).send().await?;
        let status = response.status();
        if status.is_success() || status == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(StorageError::Status {
            status: status.as_u16(),
            url,
        })
    }

    /// HEAD request against a stored URL, reporting instead of failing.
    pub async fn check_url(&self, url: &str) -> UrlCheck {
        let in_bucket = self.key_from_public_url(url).is_some();
        match self.http.head(url).send().await {
            Ok(response) => UrlCheck {
                url: url.to_string(),
                in_bucket,
                status: Some(response.status().as_u16()),
                reachable: response.status().is_success(),
                error: None,
            },
            Err(e) => {
                warn!("HEAD {} failed: {}", url, e);
                UrlCheck {
                    url: url.to_string(),
                    in_bucket,
                    status: None,
                    reachable: false,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Checks the public base URL; any HTTP answer means the bucket host is up.
    pub async fn check_public_base(&self) -> UrlCheck {
        let mut check = self.check_url(&format!("{}/", self.public_base_url)).await;
        check.reachable = check.status.is_some();
        check
    }
}

/// Lowercase ascii alphanumerics separated by single dashes.
pub fn sanitize_segment(value: &str) -> String {
    let mut out = String::new();
    for c in value.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') && !out.is_empty() {
            out.push('-');
        }
    }
    let out: String = out.trim_end_matches('-').chars().take(64).collect();
    if out.is_empty() {
        "file".to_string()
    } else {
        out
    }
}

/// `<prefix>/<owner>/<uuid>-<name>.<ext>`; the uuid keeps re-uploads of the same file apart.
pub fn object_key(prefix: &str, owner: &str, file_name: &str, ext: &str) -> String {
    let stem = match file_name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => file_name,
    };
    format!(
        "{}/{}/{}-{}.{}",
        prefix,
        sanitize_segment(owner),
        Uuid::new_v4().simple(),
        sanitize_segment(stem),
        ext
    )
}

/// Accepted image types and the extension stored for each.
pub fn image_extension(content_type: &str) -> Option<&'static str> {
    let mime: mime::Mime = content_type.parse().ok()?;
    if mime.type_() != mime::IMAGE {
        return None;
    }
    match mime.subtype().as_str() {
        "jpeg" | "jpg" | "pjpeg" => Some("jpg"),
        "png" => Some("png"),
        "webp" => Some("webp"),
        "gif" => Some("gif"),
        _ => None,
    }
}
