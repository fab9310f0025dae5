// Copyright (c) 2025 sbksba
//
// This software is licensed under the terms of the MIT License.
// See the LICENSE file in the project root for the full license text.
use std::env;
use std::net::{IpAddr, SocketAddr};

const DEFAULT_DATABASE_URL: &str = "sqlite://database/sqlite.db";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_CORS_ORIGINS: &str = "http://localhost:5173";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Administrator created on first start when the user table is empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapAdmin {
    pub email: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub database_url: String,
    pub host: IpAddr,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub bootstrap_admin: Option<BootstrapAdmin>,
}

impl AppConfig {
    /// Reads the configuration from the environment, after loading `.env` if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup, so it can be tested without
    /// touching the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url =
            lookup("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());

        let host = lookup("APP_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string());
        let host = host.parse::<IpAddr>().map_err(|e| ConfigError::InvalidValue {
            key: "APP_HOST".to_string(),
            message: e.to_string(),
        })?;

        let port = match lookup("APP_PORT") {
            Some(raw) => raw.parse::<u16>().map_err(|e| ConfigError::InvalidValue {
                key: "APP_PORT".to_string(),
                message: e.to_string(),
            })?,
            None => DEFAULT_PORT,
        };

        let cors_origins = lookup("CORS_ALLOWED_ORIGINS")
            .unwrap_or_else(|| DEFAULT_CORS_ORIGINS.to_string())
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(str::to_string)
            .collect();

        let bootstrap_admin = lookup("BOOTSTRAP_ADMIN_EMAIL")
            .filter(|email| !email.trim().is_empty())
            .map(|email| BootstrapAdmin {
                email: email.trim().to_lowercase(),
                name: lookup("BOOTSTRAP_ADMIN_NAME").unwrap_or_else(|| "Administrator".to_string()),
            });

        Ok(Self {
            database_url,
            host,
            port,
            cors_origins,
            bootstrap_admin,
        })
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}
