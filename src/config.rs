use anyhow::Context;
use serde::Deserialize;
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub ttl_minutes: i64,
}

/// Google OAuth client settings. Federated login is disabled when absent.
#[derive(Debug, Clone, Deserialize)]
pub struct GoogleConfig {
    pub client_id: String,
    pub client_secret: String,
    pub callback_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub frontend_url: String,
    pub jwt: JwtConfig,
    pub google: Option<GoogleConfig>,
}

/// Parses `JWT_TTL_MINUTES`, defaulting to 60 when unset.
fn ttl_minutes(raw: Option<&str>) -> anyhow::Result<i64> {
    let Some(raw) = raw else {
        return Ok(60);
    };
    let minutes = raw
        .trim()
        .parse::<i64>()
        .context("JWT_TTL_MINUTES must be a whole number of minutes")?;
    anyhow::ensure!(minutes > 0, "JWT_TTL_MINUTES must be positive");
    Ok(minutes)
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is not set")?;

        let secret = std::env::var("JWT_SECRET").context("JWT_SECRET is not set")?;
        anyhow::ensure!(!secret.trim().is_empty(), "JWT_SECRET must not be empty");
        let jwt = JwtConfig {
            secret,
            ttl_minutes: ttl_minutes(std::env::var("JWT_TTL_MINUTES").ok().as_deref())?,
        };

        let port = match std::env::var("APP_PORT") {
            Ok(v) => v.parse::<u16>().context("APP_PORT must be a port number")?,
            Err(_) => 8080,
        };

        let frontend_url =
            std::env::var("FRONTEND_URL").unwrap_or_else(|_| "http://localhost:3000".into());
        Url::parse(&frontend_url).context("FRONTEND_URL must be an absolute URL")?;

        let google = match (
            std::env::var("GOOGLE_CLIENT_ID"),
            std::env::var("GOOGLE_CLIENT_SECRET"),
            std::env::var("GOOGLE_CALLBACK_URL"),
        ) {
            (Ok(client_id), Ok(client_secret), Ok(callback_url)) => Some(GoogleConfig {
                client_id,
                client_secret,
                callback_url,
            }),
            _ => None,
        };

        Ok(Self {
            database_url,
            host: std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port,
            frontend_url,
            jwt,
            google,
        })
    }
}
