// main.rs - entry point to run the listings API server

use actix_cors::Cors;
use actix_web::{http::Method, web, App, HttpServer};
use clap::Parser;
use dotenvy::dotenv;
use tracing::info;
use tracing::subscriber::set_global_default;
use tracing_actix_web::TracingLogger;
use tracing_log::LogTracer;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

mod admin_routes;
mod auth;
mod config;
mod error;
mod response;
mod routes;
mod storage;
mod utils;

use config::{Config, DEFAULT_MAX_UPLOAD_BYTES};
use database::properties::views::ViewPolicy;
use error::ApiError;
use storage::ObjectStore;

#[derive(Parser, Debug)]
struct Args {
    /// Database URI and Name
    #[arg(
        long,
        env = "DATABASE_URI",
        default_value = "mongodb://localhost:27017"
    )]
    database_uri: String,
    #[arg(long, env = "DATABASE_NAME", default_value = "listings")]
    database_name: String,
    /// Environment: local, staging or production
    #[arg(long, env = "ENVIRONMENT", default_value = "local")]
    environment: String,
    #[arg(long, env = "PORT", default_value_t = 10000)]
    port: u16,
    /// Origin allowed by CORS outside of local
    #[arg(long, env = "ALLOWED_ORIGIN")]
    allowed_origin: Option<String>,
    #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
    jwt_secret: String,
    /// Object storage
    #[arg(long, env = "BUCKET_ENDPOINT")]
    bucket_endpoint: String,
    #[arg(long, env = "BUCKET_NAME")]
    bucket_name: String,
    #[arg(long, env = "BUCKET_PUBLIC_URL")]
    bucket_public_url: String,
    #[arg(long, env = "BUCKET_TOKEN", hide_env_values = true)]
    bucket_token: Option<String>,
    #[arg(long, env = "MAX_UPLOAD_BYTES", default_value_t = DEFAULT_MAX_UPLOAD_BYTES)]
    max_upload_bytes: usize,
}

/// Registers every route; shared by the server and the request tests.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(routes::health)
        .service(routes::list)
        .service(routes::create)
        .service(routes::show)
        .service(routes::update)
        .service(routes::view)
        .service(routes::stats)
        .service(routes::upload_image)
        .service(routes::delete_image)
        .service(routes::request_delete)
        .service(routes::agents)
        .service(admin_routes::list_all)
        .service(admin_routes::confirm_delete)
        .service(admin_routes::cancel_delete)
        .service(admin_routes::inspect_images)
        .service(admin_routes::database_diagnostics)
        .service(admin_routes::storage_diagnostics)
        .service(admin_routes::repair)
        .service(admin_routes::rewrite_image_urls)
        .service(admin_routes::users)
        .service(admin_routes::add_agent)
        .service(admin_routes::update_agent)
        .service(admin_routes::remove_agent)
        .service(admin_routes::issue_token);
}

// Extractor failures are reported in the same envelope as handler errors
fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(256 * 1024)
        .error_handler(|err, _req| ApiError::BadRequest(err.to_string()).into())
}

fn query_config() -> web::QueryConfig {
    web::QueryConfig::default()
        .error_handler(|err, _req| ApiError::BadRequest(err.to_string()).into())
}

fn path_config() -> web::PathConfig {
    web::PathConfig::default()
        .error_handler(|err, _req| ApiError::BadRequest(err.to_string()).into())
}

fn cors_for(environment: &str, allowed_origin: Option<&str>) -> Cors {
    match (environment, allowed_origin) {
        ("local", _) => Cors::permissive(),
        ("staging" | "production", Some(origin)) => Cors::default()
            .allowed_origin(origin)
            .allowed_methods(vec![Method::GET, Method::POST, Method::PUT, Method::DELETE])
            .allow_any_header()
            .supports_credentials()
            .max_age(3600),
        ("staging" | "production", None) => panic!("ALLOWED_ORIGIN is required outside local"),
        _ => panic!("Invalid environment"),
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load environment variables from .env file if local
    dotenv().ok();

    // Parse CLI args, using ENV vars if not provided
    let args = Args::parse();

    // Adds log tracer as the default tracer for the log crate
    LogTracer::init().expect("Failed to set log tracer");
    // Set log level based on env variable
    let env_layer = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .expect("Failed to build log filter");
    let fmt_layer = fmt::layer().with_target(false);
    let subscriber = Registry::default().with(env_layer).with(fmt_layer);
    set_global_default(subscriber).expect("Failed to set global default subscriber");

    // Create database client
    let client = mongodb::Client::with_uri_str(&args.database_uri)
        .await
        .expect("Failed to connect to database.");

    let store = ObjectStore::new(
        &args.bucket_endpoint,
        &args.bucket_name,
        &args.bucket_public_url,
        args.bucket_token.clone(),
    )
    .expect("Invalid object storage configuration.");

    // Set api config
    let config = Config {
        client,
        database: args.database_name.clone(),
        jwt_secret: args.jwt_secret.clone(),
        store,
        view_policy: ViewPolicy::default(),
        max_upload_bytes: args.max_upload_bytes,
    };

    // Create and run http server
    let binding = if args.environment.as_str() == "local" {
        ("127.0.0.1", 8080)
    } else {
        ("0.0.0.0", args.port)
    };
    info!(
        "Starting listings API ({}) on {}:{}",
        args.environment, binding.0, binding.1
    );

    let environment = args.environment.clone();
    let allowed_origin = args.allowed_origin.clone();
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(config.clone()))
            .app_data(json_config())
            .app_data(query_config())
            .app_data(path_config())
            .wrap(TracingLogger::default())
            .wrap(cors_for(&environment, allowed_origin.as_deref()))
            .configure(configure)
    })
    .bind(binding)?
    .run()
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test as actix_test;
    use actix_web::{
        dev::ServiceResponse,
        http::{header, StatusCode},
    };
    use database::users::model::Role;
    use serde_json::Value;

    const SECRET: &str = "route-test-secret";

    async fn test_config() -> Config {
        // The driver connects lazily; these requests resolve before any query runs
        let client = mongodb::Client::with_uri_str("mongodb://127.0.0.1:1")
            .await
            .unwrap();
        Config {
            client,
            database: "listings-test".to_string(),
            jwt_secret: SECRET.to_string(),
            store: ObjectStore::new("http://127.0.0.1:1", "bucket", "http://127.0.0.1:1", None)
                .unwrap(),
            view_policy: ViewPolicy::default(),
            max_upload_bytes: 1024,
        }
    }

    macro_rules! test_app {
        () => {
            actix_test::init_service(
                App::new()
                    .app_data(web::Data::new(test_config().await))
                    .app_data(json_config())
                    .app_data(query_config())
                    .app_data(path_config())
                    .configure(configure),
            )
            .await
        };
    }

    fn bearer(role: Role) -> (header::HeaderName, String) {
        let token = auth::create_jwt(SECRET, "someone@example.com", role, 600).unwrap();
        (header::AUTHORIZATION, format!("Bearer {token}"))
    }

    async fn envelope(resp: ServiceResponse) -> Value {
        actix_test::read_body_json(resp).await
    }

    #[actix_web::test]
    async fn health_answers_in_the_envelope() {
        let app = test_app!();
        let req = actix_test::TestRequest::get().uri("/health").to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = envelope(resp).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["status"], "ok");
    }

    #[actix_web::test]
    async fn writes_require_a_bearer_token() {
        let app = test_app!();
        let req = actix_test::TestRequest::post()
            .uri("/properties")
            .set_json(serde_json::json!({
                "title": "Flat", "location": "1 Road", "district": "Central", "price": 1
            }))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body = envelope(resp).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "Auth header not found");
    }

    #[actix_web::test]
    async fn agents_cannot_reach_admin_routes() {
        let app = test_app!();
        let req = actix_test::TestRequest::get()
            .uri("/admin/diagnostics/database")
            .insert_header(bearer(Role::Agent))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[actix_web::test]
    async fn invalid_listing_is_rejected_before_storage() {
        let app = test_app!();
        let req = actix_test::TestRequest::post()
            .uri("/properties")
            .insert_header(bearer(Role::Admin))
            .set_json(serde_json::json!({
                "title": "  ", "location": "1 Road", "district": "Central", "price": 1
            }))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = envelope(resp).await;
        assert_eq!(body["error"], "title is required");
    }

    #[actix_web::test]
    async fn malformed_query_parameters_are_bad_requests() {
        let app = test_app!();
        for uri in [
            "/properties?min_price=abc",
            "/properties?min_price=10&max_price=5",
            "/properties?sort=cheapest",
        ] {
            let req = actix_test::TestRequest::get().uri(uri).to_request();
            let resp = actix_test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{uri}");
            assert_eq!(envelope(resp).await["success"], false);
        }
    }

    #[actix_web::test]
    async fn uploads_must_be_images() {
        let app = test_app!();
        let req = actix_test::TestRequest::post()
            .uri("/properties/HK-1/images?filename=plan.pdf")
            .insert_header(bearer(Role::Agent))
            .insert_header((header::CONTENT_TYPE, "application/pdf"))
            .set_payload("%PDF-1.4")
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[actix_web::test]
    async fn oversized_uploads_answer_in_the_envelope() {
        let app = test_app!();
        let req = actix_test::TestRequest::post()
            .uri("/properties/HK-1/images?filename=front.png")
            .insert_header(bearer(Role::Agent))
            .insert_header((header::CONTENT_TYPE, "image/png"))
            .set_payload(vec![0_u8; 4096])
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
        let body = envelope(resp).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "upload exceeds 1024 bytes");
    }

    #[test]
    fn known_environments_build_cors() {
        let _ = cors_for("local", None);
        let _ = cors_for("production", Some("https://listings.example.com"));
    }

    #[test]
    #[should_panic(expected = "Invalid environment")]
    fn unknown_environment_is_fatal() {
        let _ = cors_for("moon", None);
    }
}
