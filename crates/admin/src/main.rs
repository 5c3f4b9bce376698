// admin/main.rs - scripts for initializing the database, fixing data and backing up images

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use database::{
    diagnostics::{collection_summary, create_indexes, ping},
    properties::maintenance::{repair_inconsistencies, repair_names, rewrite_image_base_url},
    users::{
        model::{NewUser, Role},
        query::{get_user, insert_user},
    },
    DbError,
};
use dotenvy::dotenv;
use mongodb::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod backup;
mod token;

use backup::{create_backup, list_backups, resolve_backup, restore_backup, DEFAULT_RETENTION};

#[derive(Parser, Debug)]
#[clap(name = "admin")]
struct Args {
    #[clap(subcommand)]
    subcommand: Subcommands,
    #[arg(short, long, env = "ENVIRONMENT", default_value = "local")]
    environment: String,
    #[arg(
        long,
        env = "DATABASE_URI",
        default_value = "mongodb://localhost:27017"
    )]
    database_uri: String,
    #[arg(long, env = "DATABASE_NAME", default_value = "listings")]
    database_name: String,
    /// Seed data for init-db
    #[arg(long, default_value = "./crates/admin/config.toml")]
    config: PathBuf,
}

#[derive(Debug, Subcommand)]
enum Subcommands {
    /// Creates indexes and seeds the users listed for the environment
    #[clap(name = "init-db")]
    InitDatabase {
        /// Drop the database first
        #[arg(long)]
        drop: bool,
    },
    #[clap(name = "add-user")]
    AddUser {
        #[arg(short, long)]
        email: String,
        #[arg(short, long)]
        name: String,
        #[arg(short, long, default_value = "")]
        phone: String,
        #[arg(short, long, default_value = "agent")]
        role: Role,
    },
    #[clap(name = "issue-token")]
    IssueToken {
        email: String,
        #[arg(long, default_value_t = 30)]
        days: i64,
        #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
        jwt_secret: String,
    },
    /// Database connectivity and document counts
    #[clap(name = "diagnose")]
    Diagnose,
    #[clap(name = "repair")]
    Repair {
        #[arg(long)]
        dry_run: bool,
    },
    /// Moves stored image URLs from one bucket base URL to another
    #[clap(name = "rewrite-image-urls")]
    RewriteImageUrls {
        #[arg(long)]
        from: String,
        #[arg(long, env = "BUCKET_PUBLIC_URL")]
        to: String,
        #[arg(long)]
        dry_run: bool,
    },
    #[clap(name = "backup-images")]
    BackupImages {
        #[arg(long, env = "IMAGES_DIR", default_value = "./images")]
        source: PathBuf,
        #[arg(long, env = "BACKUPS_DIR", default_value = "./backups")]
        backups_dir: PathBuf,
        #[arg(long, default_value_t = DEFAULT_RETENTION)]
        keep: usize,
    },
    #[clap(name = "restore-images")]
    RestoreImages {
        /// Backup directory name, or "latest"
        #[arg(default_value = backup::LATEST)]
        name: String,
        #[arg(long, env = "BACKUPS_DIR", default_value = "./backups")]
        backups_dir: PathBuf,
        #[arg(long, env = "IMAGES_DIR", default_value = "./images")]
        target: PathBuf,
        /// Empty the target directory before restoring
        #[arg(long)]
        clear: bool,
    },
    #[clap(name = "list-backups")]
    ListBackups {
        #[arg(long, env = "BACKUPS_DIR", default_value = "./backups")]
        backups_dir: PathBuf,
    },
}

// Allows nesting seed users under a specific environment
// local -> admin -> NewUser data
#[derive(Debug, Deserialize)]
struct Config {
    users: HashMap<String, HashMap<String, NewUser>>,
}

fn load_config(path: &PathBuf) -> Result<Config> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv().ok();

    // Parse CLI args, using ENV vars if not provided
    let args = Args::parse();

    // Set up tracing
    let env_layer = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    tracing_subscriber::fmt()
        .with_env_filter(env_layer)
        .with_target(true)
        .init();

    // Create database client; nothing connects until a command queries
    let db_client = Client::with_uri_str(&args.database_uri)
        .await
        .context("Failed to create database client.")?;
    let database = args.database_name.as_str();

    // Perform subcommand logic
    match args.subcommand {
        Subcommands::InitDatabase { drop } => {
            let config = load_config(&args.config)?;

            // 1. Optionally start from an empty database
            if drop {
                warn!("Dropping database {}", database);
                db_client.database(database).drop(None).await?;
            }

            // 2. Create the database indexes defined in the database models
            info!("Creating database indexes.");
            create_indexes(&db_client, database).await?;

            // 3. Seed the users configured for this environment
            let users = match config.users.get(&args.environment) {
                Some(users) => users,
                None => bail!("No users found for the {} environment.", args.environment),
            };
            for (name, user) in users {
                match insert_user(&db_client, database, user.clone()).await {
                    Ok(user) => info!("Inserted {} ({}) as {}", name, user.email, user.role),
                    Err(DbError::Duplicate(_)) => debug!("{} already exists, skipping", name),
                    Err(e) => return Err(e).with_context(|| format!("Failed to insert {name}")),
                }
            }

            info!("Database initialized for {} environment.", args.environment);
        }
        Subcommands::AddUser {
            email,
            name,
            phone,
            role,
        } => {
            let user = insert_user(
                &db_client,
                database,
                NewUser {
                    email,
                    name,
                    phone,
                    image: None,
                    rating: None,
                    role,
                },
            )
            .await
            .context("Failed to add user.")?;
            info!("Added {} as {}", user.email, user.role);
        }
        Subcommands::IssueToken {
            email,
            days,
            jwt_secret,
        } => {
            let user = get_user(&db_client, database, &email).await?;
            let token = token::issue_token(&jwt_secret, &user.email, user.role, days)?;
            info!("Issued a {} day token for {} ({})", days, user.email, user.role);
            println!("{token}");
        }
        Subcommands::Diagnose => {
            let report = ping(&db_client, database)
                .await
                .context("Database is unreachable.")?;
            let summary = collection_summary(&db_client, database).await?;
            print_json(&serde_json::json!({ "ping": report, "collections": summary }))?;
        }
        Subcommands::Repair { dry_run } => {
            debug!("Repairs: {}", repair_names().join(", "));
            let report = repair_inconsistencies(&db_client, database, dry_run).await?;
            print_json(&report)?;
        }
        Subcommands::RewriteImageUrls { from, to, dry_run } => {
            let report = rewrite_image_base_url(&db_client, database, &from, &to, dry_run).await?;
            print_json(&report)?;
        }
        Subcommands::BackupImages {
            source,
            backups_dir,
            keep,
        } => {
            let entry = create_backup(&source, &backups_dir, Utc::now(), keep)?;
            println!("{}", entry.path.display());
        }
        Subcommands::RestoreImages {
            name,
            backups_dir,
            target,
            clear,
        } => {
            let entry = resolve_backup(&backups_dir, &name)?;
            let stats = restore_backup(&entry.path, &target, clear)?;
            info!(
                "Restored {} ({} file(s)) into {}",
                entry.name,
                stats.files,
                target.display()
            );
        }
        Subcommands::ListBackups { backups_dir } => {
            let backups = list_backups(&backups_dir)?;
            if backups.is_empty() {
                info!("No backups in {}", backups_dir.display());
            }
            for backup in backups {
                println!(
                    "{}\t{}\t{} file(s)\t{} bytes",
                    backup.name,
                    backup.metadata.created_at.to_rfc3339(),
                    backup.metadata.file_count,
                    backup.metadata.total_bytes
                );
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_subcommands() {
        let args = Args::try_parse_from([
            "admin",
            "add-user",
            "--email",
            "a@example.com",
            "--name",
            "Ann",
            "--role",
            "admin",
        ])
        .unwrap();
        assert!(matches!(
            args.subcommand,
            Subcommands::AddUser { role: Role::Admin, .. }
        ));

        let args = Args::try_parse_from(["admin", "restore-images", "--clear"]).unwrap();
        match args.subcommand {
            Subcommands::RestoreImages { name, clear, .. } => {
                assert_eq!(name, "latest");
                assert!(clear);
            }
            other => panic!("unexpected {other:?}"),
        }

        let unknown_role = [
            "admin", "add-user", "--email", "x", "--name", "y", "--role", "owner",
        ];
        assert!(Args::try_parse_from(unknown_role).is_err());
    }

    #[test]
    fn bundled_config_has_local_seed_users() {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config.toml");
        let config = load_config(&path).unwrap();
        let local = config.users.get("local").unwrap();
        assert!(local.values().any(|u| u.role == Role::Admin));
        for user in local.values() {
            user.validate().unwrap();
        }
    }
}
