//! Environment-driven configuration

use std::time::Duration;

use rust_decimal::Decimal;

/// Runtime configuration, gathered once at startup from the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Address the HTTP listener binds to.
    pub bind_addr: String,
    /// Postgres connection string. Absent means the in-memory store is used.
    pub database_url: Option<String>,
    /// NATS endpoint for best-effort domain event publishing.
    pub nats_url: Option<String>,
    /// Flat cash-on-delivery surcharge added at checkout.
    pub cod_charge: Decimal,
    /// Lifetime of a delivery confirmation code.
    pub delivery_otp_ttl: Duration,
    /// Lifetime of a pickup confirmation code.
    pub pickup_otp_ttl: Duration,
    /// Return window applied when neither the order line nor the product
    /// document carries one.
    pub default_return_window_days: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8084".to_string(),
            database_url: None,
            nats_url: None,
            cod_charge: Decimal::new(40, 0),
            delivery_otp_ttl: Duration::from_secs(10 * 60),
            pickup_otp_ttl: Duration::from_secs(24 * 60 * 60),
            default_return_window_days: 7,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let port = std::env::var("PORT").unwrap_or_else(|_| "8084".to_string());
        Self {
            bind_addr: format!("0.0.0.0:{}", port),
            database_url: std::env::var("DATABASE_URL").ok(),
            nats_url: std::env::var("NATS_URL").ok(),
            cod_charge: std::env::var("COD_CHARGE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.cod_charge),
            delivery_otp_ttl: env_secs("DELIVERY_OTP_TTL_SECS", defaults.delivery_otp_ttl),
            pickup_otp_ttl: env_secs("PICKUP_OTP_TTL_SECS", defaults.pickup_otp_ttl),
            default_return_window_days: std::env::var("DEFAULT_RETURN_WINDOW_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.default_return_window_days),
        }
    }
}

fn env_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}
