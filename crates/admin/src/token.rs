// token.rs - bearer tokens for agents, signed the same way the API verifies them

use anyhow::{bail, Context, Result};
use chrono::Duration;
use database::users::model::{Claims, Role};

pub fn issue_token(secret: &str, email: &str, role: Role, days: i64) -> Result<String> {
    if secret.is_empty() {
        bail!("JWT secret is empty");
    }
    if days <= 0 {
        bail!("token validity must be at least one day");
    }

    Claims::new(email, role, Duration::days(days))
        .and_then(|claims| claims.sign(secret))
        .context("failed to issue token")
}
