use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use reqwest::Url;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::ConfigError;

const ENV_KEYS: &[&str] = &[
    "PFSENSE_HOSTNAME",
    "PFSENSE_API_TOKEN",
    "ADD_ALIASES_ON_STARTUP",
    "PFSENSE_VERIFY_TLS",
    "PFSENSE_TIMEOUT_SECS",
];

const API_PATH: &str = "/api/v2/services/dns_resolver";

#[derive(Clone, Deserialize, Serialize)]
pub struct Config {
    pub pfsense_hostname: String,
    pub pfsense_api_token: String,
    #[serde(deserialize_with = "flag")]
    pub add_aliases_on_startup: bool,
    /// Validate the appliance certificate. Off by default since pfSense
    /// ships with a self-signed one.
    #[serde(deserialize_with = "flag")]
    pub pfsense_verify_tls: bool,
    pub pfsense_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pfsense_hostname: String::new(),
            pfsense_api_token: String::new(),
            add_aliases_on_startup: false,
            pfsense_verify_tls: false,
            pfsense_timeout_secs: 10,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("pfsense_hostname", &self.pfsense_hostname)
            .field("pfsense_api_token", &"<redacted>")
            .field("add_aliases_on_startup", &self.add_aliases_on_startup)
            .field("pfsense_verify_tls", &self.pfsense_verify_tls)
            .field("pfsense_timeout_secs", &self.pfsense_timeout_secs)
            .finish()
    }
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let mut config: Config = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("pfsense-docker-alias.toml"))
            .merge(Json::file("pfsense-docker-alias.json"))
            .merge(Env::raw().only(ENV_KEYS))
            .extract()?;

        // Support Docker-style secrets
        if let Ok(secret_file) = std::env::var("PFSENSE_API_TOKEN_FILE") {
            config.pfsense_api_token = std::fs::read_to_string(&secret_file)
                .map_err(|source| ConfigError::SecretFile {
                    path: secret_file,
                    source,
                })?
                .trim()
                .to_string();
        }

        config.pfsense_hostname = config.pfsense_hostname.trim().to_string();
        if config.pfsense_hostname.is_empty() {
            return Err(ConfigError::Missing("PFSENSE_HOSTNAME"));
        }
        if config.pfsense_api_token.trim().is_empty() {
            return Err(ConfigError::Missing("PFSENSE_API_TOKEN"));
        }
        config.api_base()?;

        Ok(config)
    }

    /// Base URL of the DNS resolver endpoints. A bare hostname gets `https://`.
    pub fn api_base(&self) -> Result<Url, ConfigError> {
        let host = self.pfsense_hostname.trim_end_matches('/');
        let base = if host.contains("://") {
            format!("{host}{API_PATH}")
        } else {
            format!("https://{host}{API_PATH}")
        };
        Url::parse(&base).map_err(|_| ConfigError::InvalidHost(self.pfsense_hostname.clone()))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.pfsense_timeout_secs)
    }
}

/// Accept a real boolean or any string, where only "true" (any case) is true.
fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
        Other(serde_json::Value),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Text(s) => s.trim().eq_ignore_ascii_case("true"),
        Flag::Other(_) => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn loads_required_values_from_env() {
        Jail::expect_with(|jail| {
            jail.set_env("PFSENSE_HOSTNAME", "pfsense.lab.internal");
            jail.set_env("PFSENSE_API_TOKEN", "secret");

            let cfg = Config::load().expect("config loads");
            assert_eq!(cfg.pfsense_hostname, "pfsense.lab.internal");
            assert_eq!(cfg.pfsense_api_token, "secret");
            assert!(!cfg.add_aliases_on_startup);
            assert!(!cfg.pfsense_verify_tls);
            assert_eq!(cfg.timeout(), Duration::from_secs(10));
            Ok(())
        });
    }

    #[test]
    fn missing_hostname_is_an_error() {
        Jail::expect_with(|jail| {
            jail.set_env("PFSENSE_API_TOKEN", "secret");
            let err = Config::load().unwrap_err();
            assert!(matches!(err, ConfigError::Missing("PFSENSE_HOSTNAME")));
            Ok(())
        });
    }

    #[test]
    fn empty_token_is_an_error() {
        Jail::expect_with(|jail| {
            jail.set_env("PFSENSE_HOSTNAME", "pfsense.lab.internal");
            jail.set_env("PFSENSE_API_TOKEN", "");
            let err = Config::load().unwrap_err();
            assert!(matches!(err, ConfigError::Missing("PFSENSE_API_TOKEN")));
            Ok(())
        });
    }

    #[test]
    fn startup_flag_is_case_insensitive() {
        for (value, expected) in [("true", true), ("TRUE", true), ("True", true), ("yes", false), ("1", false), ("false", false)] {
            Jail::expect_with(|jail| {
                jail.set_env("PFSENSE_HOSTNAME", "pfsense.lab.internal");
                jail.set_env("PFSENSE_API_TOKEN", "secret");
                jail.set_env("ADD_ALIASES_ON_STARTUP", value);
                let cfg = Config::load().expect("config loads");
                assert_eq!(cfg.add_aliases_on_startup, expected, "value {value:?}");
                Ok(())
            });
        }
    }

    #[test]
    fn env_overrides_toml_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "pfsense-docker-alias.toml",
                r#"
                    pfsense_hostname = "from-file.lab.internal"
                    pfsense_api_token = "file-token"
                    pfsense_timeout_secs = 30
                "#,
            )?;
            jail.set_env("PFSENSE_HOSTNAME", "from-env.lab.internal");

            let cfg = Config::load().expect("config loads");
            assert_eq!(cfg.pfsense_hostname, "from-env.lab.internal");
            assert_eq!(cfg.pfsense_api_token, "file-token");
            assert_eq!(cfg.pfsense_timeout_secs, 30);
            Ok(())
        });
    }

    #[test]
    fn token_file_overrides_token() {
        Jail::expect_with(|jail| {
            jail.create_file("token", "  from-secret\n")?;
            let path = jail.directory().join("token");
            jail.set_env("PFSENSE_HOSTNAME", "pfsense.lab.internal");
            jail.set_env("PFSENSE_API_TOKEN", "plain");
            jail.set_env("PFSENSE_API_TOKEN_FILE", path.display());

            let cfg = Config::load().expect("config loads");
            assert_eq!(cfg.pfsense_api_token, "from-secret");
            Ok(())
        });
    }

    #[test]
    fn api_base_defaults_to_https() {
        let cfg = Config {
            pfsense_hostname: "pfsense.lab.internal".into(),
            ..Config::default()
        };
        assert_eq!(
            cfg.api_base().unwrap().as_str(),
            "https://pfsense.lab.internal/api/v2/services/dns_resolver"
        );

        let cfg = Config {
            pfsense_hostname: "http://10.0.0.1:8080/".into(),
            ..Config::default()
        };
        assert_eq!(
            cfg.api_base().unwrap().as_str(),
            "http://10.0.0.1:8080/api/v2/services/dns_resolver"
        );
    }

    #[test]
    fn debug_redacts_token() {
        let cfg = Config {
            pfsense_api_token: "hunter2".into(),
            ..Config::default()
        };
        let printed = format!("{cfg:?}");
        assert!(!printed.contains("hunter2"));
    }
}
