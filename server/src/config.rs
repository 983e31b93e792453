use std::{net::SocketAddr, path::PathBuf};

use anyhow::{Context, Result, anyhow};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::Duration;
use platform_authn::{MIN_SECRET_BYTES, TokenKeys};
use platform_gate::Policy;

const DEFAULT_TOKEN_TTL_MINUTES: i64 = 24 * 60;
const DEFAULT_SHARE_TOKEN_TTL_SECONDS: i64 = 30 * 24 * 60 * 60;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: Option<String>,
    pub token_secret: Option<Vec<u8>>,
    pub token_ttl: Duration,
    pub share_token_ttl: Duration,
    pub policy_path: Option<PathBuf>,
    pub bind: SocketAddr,
    pub cors_allowed_origins: Vec<String>,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let token_secret = match var("TOKEN_SECRET_BASE64") {
            Some(encoded) => {
                let bytes = STANDARD
                    .decode(encoded)
                    .context("invalid TOKEN_SECRET_BASE64")?;
                if bytes.len() < MIN_SECRET_BYTES {
                    return Err(anyhow!(
                        "TOKEN_SECRET_BASE64 must decode to at least {MIN_SECRET_BYTES} bytes"
                    ));
                }
                Some(bytes)
            }
            None => None,
        };

        let token_ttl_minutes = match var("TOKEN_TTL_MINUTES") {
            Some(raw) => raw.parse().context("invalid TOKEN_TTL_MINUTES")?,
            None => DEFAULT_TOKEN_TTL_MINUTES,
        };
        let share_ttl_seconds = match var("SHARE_TOKEN_TTL_SECONDS") {
            Some(raw) => raw.parse().context("invalid SHARE_TOKEN_TTL_SECONDS")?,
            None => DEFAULT_SHARE_TOKEN_TTL_SECONDS,
        };
        if token_ttl_minutes <= 0 || share_ttl_seconds <= 0 {
            return Err(anyhow!("token lifetimes must be positive"));
        }

        let bind = var("BIND")
            .unwrap_or_else(|| "0.0.0.0:8080".into())
            .parse()
            .context("invalid BIND address")?;

        let cors_allowed_origins = var("CORS_ALLOWED_ORIGINS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Self {
            database_url: var("DATABASE_URL"),
            token_secret,
            token_ttl: Duration::minutes(token_ttl_minutes),
            share_token_ttl: Duration::seconds(share_ttl_seconds),
            policy_path: var("POLICY_PATH").map(PathBuf::from),
            bind,
            cors_allowed_origins,
        })
    }

    pub fn database_url(&self) -> Result<&str> {
        self.database_url
            .as_deref()
            .ok_or_else(|| anyhow!("DATABASE_URL missing"))
    }

    pub fn token_keys(&self) -> Result<TokenKeys> {
        let secret = self
            .token_secret
            .as_deref()
            .ok_or_else(|| anyhow!("TOKEN_SECRET_BASE64 missing"))?;
        Ok(TokenKeys::new(secret, self.token_ttl, self.share_token_ttl)?)
    }

    /// The policy at `POLICY_PATH`, or the built-in one.
    pub fn policy(&self) -> Result<Policy> {
        load_policy(self.policy_path.as_deref())
    }
}

pub fn load_policy(path: Option<&std::path::Path>) -> Result<Policy> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read policy {}", path.display()))?;
            Policy::from_json(&raw).with_context(|| format!("invalid policy {}", path.display()))
        }
        None => Policy::builtin().context("built-in policy is invalid"),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<AppConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply() {
        let config = config(&[]).unwrap();
        assert_eq!(config.token_ttl, Duration::minutes(1440));
        assert_eq!(config.share_token_ttl, Duration::days(30));
        assert_eq!(config.bind.port(), 8080);
        assert!(config.cors_allowed_origins.is_empty());
        assert!(config.token_keys().is_err());
        assert!(config.policy().is_ok());
    }

    #[test]
    fn short_secret_is_rejected() {
        let short = STANDARD.encode([1u8; 16]);
        assert!(config(&[("TOKEN_SECRET_BASE64", &short)]).is_err());
        let good = STANDARD.encode([1u8; 32]);
        let config = config(&[("TOKEN_SECRET_BASE64", &good), ("TOKEN_TTL_MINUTES", "15")]).unwrap();
        assert_eq!(config.token_ttl, Duration::minutes(15));
        assert!(config.token_keys().is_ok());
    }

    #[test]
    fn origins_are_split_and_trimmed() {
        let config = config(&[("CORS_ALLOWED_ORIGINS", "https://a.test, ,https://b.test")]).unwrap();
        assert_eq!(config.cors_allowed_origins, ["https://a.test", "https://b.test"]);
    }
}
