use chrono_tz::Tz;
use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Settings {
    pub port: u16,
    pub debug: bool,
    pub enable_swagger: bool,
    pub database_url: String,
    pub frontend_url: Url,
    pub admin_token: String,
    pub jwt_secret: String,
    pub jwt_ttl_hours: i64,
    pub stripe_secret_key: String,
    pub stripe_webhook_secret: String,
    pub stripe_api_base: Url,
    pub webhook_tolerance_secs: i64,
    pub currency: String,
    pub resend_api_key: String,
    pub resend_api_base: Url,
    pub email_from: String,
    pub contact_email: String,
    pub studio_name: String,
    pub timezone: String,
    pub reset_token_ttl_minutes: i64,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let config = Config::builder()
            // APP_STRIPE_SECRET_KEY -> stripe_secret_key
            .add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_default("port", 1337)?
            .set_default("debug", false)?
            .set_default("enable_swagger", true)?
            .set_default("database_url", "sqlite://studio.db?mode=rwc")?
            .set_default("frontend_url", "http://localhost:3000")?
            .set_default("admin_token", "default-token-change-me")?
            .set_default("jwt_secret", "default-jwt-secret-change-me")?
            .set_default("jwt_ttl_hours", 720)?
            .set_default("stripe_secret_key", "")?
            .set_default("stripe_webhook_secret", "")?
            .set_default("stripe_api_base", "https://api.stripe.com")?
            .set_default("webhook_tolerance_secs", 300)?
            .set_default("currency", "gbp")?
            .set_default("resend_api_key", "")?
            .set_default("resend_api_base", "https://api.resend.com")?
            .set_default("email_from", "Masala Moves <no-reply@masalamoves.co.uk>")?
            .set_default("contact_email", "hello@masalamoves.co.uk")?
            .set_default("studio_name", "Masala Moves")?
            .set_default("timezone", "Europe/London")?
            .set_default("reset_token_ttl_minutes", 60)?
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        settings.check_durations()?;
        Ok(settings)
    }

    fn check_durations(&self) -> Result<(), ConfigError> {
        let durations = [
            ("jwt_ttl_hours", self.jwt_ttl_hours),
            ("reset_token_ttl_minutes", self.reset_token_ttl_minutes),
            ("webhook_tolerance_secs", self.webhook_tolerance_secs),
        ];
        for (key, value) in durations {
            if value <= 0 {
                return Err(ConfigError::Message(format!("{key} must be positive, got {value}")));
            }
        }
        Ok(())
    }

    /// Studio time zone; an unknown name falls back to UTC.
    pub fn tz(&self) -> Tz {
        self.timezone.parse().unwrap_or(Tz::UTC)
    }

    /// Frontend link with `path` appended, without doubling slashes.
    pub fn frontend_link(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.frontend_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}
