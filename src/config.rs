use anyhow::{Context, Result};

/// Environment-driven service configuration, loaded once at startup.
pub struct Config {
    pub daraja: DarajaConfig,
    pub port: u16,
}

/// Credentials and addressing for the Daraja STK-push integration.
#[derive(Clone)]
pub struct DarajaConfig {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub passkey: String,
    pub shortcode: String,
    pub base_url: String,
    pub callback_url: String,
}

pub fn load() -> Result<Config> {
    let daraja = DarajaConfig {
        consumer_key: required("DARAJA_CONSUMER_KEY")?,
        consumer_secret: required("DARAJA_CONSUMER_SECRET")?,
        passkey: required("DARAJA_PASSKEY")?,
        shortcode: required("DARAJA_SHORTCODE")?,
        base_url: std::env::var("DARAJA_BASE_URL")
            .unwrap_or_else(|_| "https://sandbox.safaricom.co.ke".to_string()),
        callback_url: required("CALLBACK_URL")?,
    };

    let port = match std::env::var("PORT") {
        Ok(port) => port.parse().context("PORT must be a number")?,
        Err(_) => 3000,
    };

    Ok(Config { daraja, port })
}

fn required(name: &str) -> Result<String> {
    std::env::var(name).with_context(|| format!("Missing required env var {name}"))
}
