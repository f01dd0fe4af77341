//! Configuration management for the PESCO dispatch server
//!
//! Supports hierarchical configuration loading:
//! 1. Default values in code
//! 2. Configuration files (config/development.toml, config/production.toml)
//! 3. Environment variable overrides with PESCO prefix (`PESCO__DATABASE__URL`)

use config::{ConfigError, Environment, File};
use serde::Deserialize;

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Current environment (development, production)
    pub environment: String,

    pub server: ServerConfig,

    pub database: DatabaseConfig,

    /// Secret used to verify bearer tokens issued by the identity provider
    pub jwt: JwtConfig,

    /// Machine intake endpoint
    #[serde(default)]
    pub intake: IntakeConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    pub min_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct JwtConfig {
    pub secret: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct IntakeConfig {
    /// Expected `X-API-TOKEN`; the endpoint is open when unset
    pub api_token: Option<String>,
}

/// Signing secret assumed when running locally without one configured
const DEVELOPMENT_JWT_SECRET: &str = "development-secret-key";

impl Config {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let environment =
            std::env::var("PESCO__ENVIRONMENT").unwrap_or_else(|_| "development".into());

        Self::from_sources(
            &environment,
            Environment::with_prefix("PESCO")
                .separator("__")
                .try_parsing(true),
        )
    }

    /// Build the configuration for `environment`; only development falls back
    /// to a built-in JWT secret, every other environment must provide one.
    fn from_sources(environment: &str, env: Environment) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("environment", environment)?
            .set_default("server.port", 8000)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?;
        if environment == "development" {
            builder = builder.set_default("jwt.secret", DEVELOPMENT_JWT_SECRET)?;
        }

        let config: Self = builder
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            .add_source(env)
            .build()?
            .try_deserialize()?;

        if config.jwt.secret.trim().is_empty() {
            return Err(ConfigError::Message(format!(
                "jwt.secret must be set in the {} environment",
                environment
            )));
        }
        Ok(config)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            host: "0.0.0.0".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_with(vars: &[(&str, &str)]) -> Environment {
        let mut map = config::Map::new();
        map.insert(
            "PESCO__DATABASE__URL".to_string(),
            "postgres://localhost/pesco".to_string(),
        );
        for (key, value) in vars {
            map.insert(key.to_string(), value.to_string());
        }
        Environment::with_prefix("PESCO")
            .separator("__")
            .try_parsing(true)
            .source(Some(map))
    }

    #[test]
    fn test_production_requires_jwt_secret() {
        assert!(Config::from_sources("production", env_with(&[])).is_err());
        assert!(
            Config::from_sources("production", env_with(&[("PESCO__JWT__SECRET", "  ")])).is_err()
        );
    }

    #[test]
    fn test_production_uses_configured_secret() {
        let config =
            Config::from_sources("production", env_with(&[("PESCO__JWT__SECRET", "s3cret")]))
                .unwrap();
        assert_eq!(config.jwt.secret, "s3cret");
        assert_eq!(config.environment, "production");
    }

    #[test]
    fn test_development_falls_back_to_local_secret() {
        let config = Config::from_sources("development", env_with(&[])).unwrap();
        assert_eq!(config.jwt.secret, DEVELOPMENT_JWT_SECRET);
        assert_eq!(config.server.port, 8000);
    }
}
