pub mod auth;
pub mod email;
pub mod error;
pub mod handlers;
pub mod ical;
pub mod models;
pub mod openapi;
pub mod payments;
pub mod settings;
pub mod store;
pub mod validation;
pub mod webhook;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use http::{HeaderValue, Method, header};
use handlers::{auth as account, bookings, classes, contact, healthz_live, healthz_ready, root, stripe};
use tower_http::LatencyUnit;
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{Level, info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::email::Mailer;
use crate::ical::ICalExporter;
use crate::openapi::ApiDoc;
use crate::payments::StripeClient;
use crate::settings::Settings;
use crate::store::Database;

#[derive(Clone)]
pub struct AppState {
    pub settings: Settings,
    pub db: Database,
    pub payments: Arc<StripeClient>,
    pub mailer: Arc<Mailer>,
    pub exporter: Arc<ICalExporter>,
}

impl AppState {
    pub fn new(settings: Settings, db: Database) -> Self {
        let payments = StripeClient::new(
            settings.stripe_api_base.clone(),
            settings.stripe_secret_key.clone(),
            settings.stripe_webhook_secret.clone(),
            settings.webhook_tolerance_secs,
        );
        let mailer = Mailer::new(
            settings.resend_api_base.clone(),
            settings.resend_api_key.clone(),
            settings.email_from.clone(),
        );
        Self {
            settings,
            db,
            payments: Arc::new(payments),
            mailer: Arc::new(mailer),
            exporter: Arc::new(ICalExporter::new()),
        }
    }
}

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::from_env()?;

    let env_filter = if settings.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .without_time()
        .init();

    if settings.stripe_webhook_secret.is_empty() {
        warn!("Stripe webhook secret is not set; every webhook will be rejected");
    }
    if settings.resend_api_key.is_empty() {
        warn!("Resend API key is not set; emails will not be sent");
    }

    let db = Database::connect(&settings.database_url).await?;
    db.migrate().await?;

    let state = AppState::new(settings, db);
    let app = build_router(state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], state.settings.port));
    info!("Starting Dance Studio Booking API on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn cors_layer(settings: &Settings) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);
    let origin = settings.frontend_url.origin().ascii_serialization();
    match HeaderValue::from_str(&origin) {
        Ok(origin) => layer.allow_origin(origin),
        Err(e) => {
            warn!("Frontend origin {origin} is not a valid header value: {e}");
            layer
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(
            DefaultOnResponse::new()
                .level(Level::INFO)
                .latency_unit(LatencyUnit::Millis),
        );

    let mut router = Router::new()
        .route("/", get(root))
        .route("/healthz/live", get(healthz_live))
        .route("/healthz/ready", get(healthz_ready))
        .route(
            "/class-occurrences",
            get(classes::list_classes).post(classes::create_class),
        )
        .route("/class-occurrences.ics", get(classes::get_ical))
        .route("/class-occurrences/slug/{slug}", get(classes::get_class_by_slug))
        .route(
            "/class-occurrences/{id}",
            get(classes::get_class)
                .put(classes::update_class)
                .delete(classes::delete_class),
        )
        .route("/bookings/me", get(bookings::my_bookings))
        .route(
            "/bookings",
            get(bookings::list_bookings).post(bookings::create_booking),
        )
        .route(
            "/bookings/{id}",
            get(bookings::get_booking)
                .put(bookings::update_booking)
                .delete(bookings::delete_booking),
        )
        .route("/auth/local/register", post(account::register))
        .route("/auth/local", post(account::login))
        .route("/auth/forgot-password", post(account::forgot_password))
        .route("/custom-auth/forgot-password", post(account::custom_forgot_password))
        .route("/auth/reset-password", post(account::reset_password))
        .route("/users/me", get(account::me).put(account::update_me))
        .route(
            "/stripe/create-checkout-session",
            post(stripe::create_checkout_session),
        )
        .route("/stripe/webhook", post(stripe::stripe_webhook))
        .route("/contact", post(contact::contact))
        .with_state(state.clone());

    if state.settings.enable_swagger {
        let openapi = ApiDoc::openapi();
        let swagger = SwaggerUi::new("/docs").url("/openapi.json", openapi);
        router = router.merge(swagger);
    }

    router.layer(cors_layer(&state.settings)).layer(trace_layer)
}
