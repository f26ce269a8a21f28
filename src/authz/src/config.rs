//! Resolver configuration loading and validation

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::roles::RoleCatalog;
use crate::store::{ApiKeyRecord, RoleRecord};

/// Environment variable selecting the running environment
pub const RUN_ENVIRONMENT_VAR: &str = "RUN_ENVIRONMENT";

/// Environment variable overriding the custom-token signing secret
pub const SIGNING_KEY_OVERRIDE_VAR: &str = "JwtSigningKey";

/// Upper bound for every configurable interval (one week)
pub const MAX_INTERVAL_SECS: u64 = 7 * 24 * 60 * 60;

/// Running environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunEnvironment {
    #[default]
    Dev,
    Prod,
}

impl RunEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, RunEnvironment::Prod)
    }
}

impl fmt::Display for RunEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunEnvironment::Dev => f.write_str("dev"),
            RunEnvironment::Prod => f.write_str("prod"),
        }
    }
}

impl FromStr for RunEnvironment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dev" => Ok(RunEnvironment::Dev),
            "prod" => Ok(RunEnvironment::Prod),
            other => anyhow::bail!("Unknown run environment '{}'", other),
        }
    }
}

/// Static per-environment settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EnvironmentConfig {
    /// Client id whose `api://` audience AAD tokens must carry
    #[serde(default)]
    pub aad_valid_client_id: Option<String>,

    /// AAD app-role name to application roles
    #[serde(default)]
    pub azure_role_mapping: HashMap<String, Vec<String>>,
}

impl EnvironmentConfig {
    /// Audience AAD tokens must carry, if a client id is configured
    pub fn required_audience(&self) -> Option<String> {
        self.aad_valid_client_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .map(|id| format!("api://{}", id))
    }
}

/// Decision cache settings
///
/// Entry lifetime is fixed at [`crate::cache::AUTH_DECISION_CACHE_TTL`]; only the sweep
/// cadence is tunable. Unknown keys such as `ttl_secs` are rejected.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CacheSection {
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl CacheSection {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JwksSection {
    #[serde(default = "default_jwks_uri")]
    pub uri: String,
    #[serde(default = "default_key_cache")]
    pub key_cache_secs: u64,
    /// Minimum time between fetches triggered by an unknown `kid`
    #[serde(default = "default_refetch_interval")]
    pub refetch_interval_secs: u64,
}

impl Default for JwksSection {
    fn default() -> Self {
        Self {
            uri: default_jwks_uri(),
            key_cache_secs: default_key_cache(),
            refetch_interval_secs: default_refetch_interval(),
        }
    }
}

impl JwksSection {
    pub fn key_cache(&self) -> Duration {
        Duration::from_secs(self.key_cache_secs)
    }

    pub fn refetch_interval(&self) -> Duration {
        Duration::from_secs(self.refetch_interval_secs)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RolesSection {
    /// Overrides the built-in application role catalog
    #[serde(default)]
    pub catalog: Option<Vec<String>>,
}

/// Initial store contents for the bundled server
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SeedSection {
    #[serde(default)]
    pub user_roles: HashMap<String, RoleRecord>,
    #[serde(default)]
    pub group_roles: HashMap<String, RoleRecord>,
    #[serde(default)]
    pub api_keys: Vec<ApiKeyRecord>,
}

/// Complete resolver configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuthzConfig {
    #[serde(default)]
    pub run_environment: RunEnvironment,

    /// Per-environment settings keyed by `dev` / `prod`
    #[serde(default)]
    pub environments: HashMap<String, EnvironmentConfig>,

    #[serde(default)]
    pub cache: CacheSection,

    #[serde(default)]
    pub jwks: JwksSection,

    #[serde(default)]
    pub roles: RolesSection,

    #[serde(default)]
    pub seed: SeedSection,

    /// Custom-token secret taken from the process environment
    #[serde(skip)]
    pub signing_key_override: Option<String>,
}

// Default value functions
fn default_sweep_interval() -> u64 { 30 }
fn default_jwks_uri() -> String { "https://login.microsoftonline.com/common/discovery/keys".to_string() }
fn default_key_cache() -> u64 { 21_600 }
fn default_refetch_interval() -> u64 { 60 }

impl AuthzConfig {
    /// Load configuration from TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read configuration file {}", path.as_ref().display()))?;

        Self::from_toml(&contents)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("Failed to parse configuration file")
    }

    /// Apply `RUN_ENVIRONMENT` and `JwtSigningKey` from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(env) = std::env::var(RUN_ENVIRONMENT_VAR) {
            self.run_environment = env
                .parse()
                .with_context(|| format!("Invalid {}", RUN_ENVIRONMENT_VAR))?;
        }

        self.signing_key_override = std::env::var(SIGNING_KEY_OVERRIDE_VAR)
            .ok()
            .filter(|key| !key.is_empty());

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.cache.sweep_interval_secs == 0 || self.cache.sweep_interval_secs > MAX_INTERVAL_SECS {
            anyhow::bail!(
                "cache.sweep_interval_secs must be between 1 and {}",
                MAX_INTERVAL_SECS
            );
        }

        if self.jwks.key_cache_secs == 0 || self.jwks.key_cache_secs > MAX_INTERVAL_SECS {
            anyhow::bail!("jwks.key_cache_secs must be between 1 and {}", MAX_INTERVAL_SECS);
        }

        if self.jwks.refetch_interval_secs > MAX_INTERVAL_SECS {
            anyhow::bail!("jwks.refetch_interval_secs must be at most {}", MAX_INTERVAL_SECS);
        }

        if self.roles.catalog.is_some() && self.role_catalog().is_empty() {
            anyhow::bail!("roles.catalog must name at least one role");
        }

        Ok(())
    }

    /// Settings for the running environment
    ///
    /// A missing section yields an empty config, which leaves the AAD
    /// audience unset.
    pub fn active_environment(&self) -> EnvironmentConfig {
        self.environments
            .get(&self.run_environment.to_string())
            .cloned()
            .unwrap_or_default()
    }

    /// Role catalog used to expand the all-roles sentinel
    pub fn role_catalog(&self) -> RoleCatalog {
        match &self.roles.catalog {
            Some(roles) => RoleCatalog::new(roles.iter().cloned()),
            None => RoleCatalog::default(),
        }
    }
}
