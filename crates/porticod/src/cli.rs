//! CLI parsing and configuration loading for porticod.

use anyhow::{bail, Context};
use clap::Parser;
use portico_server::{AdapterConfig, GatewayConfig};
use std::path::PathBuf;

/// Environment variable listing extra sqld replica URLs, comma separated.
const SQLD_REPLICA_URLS_ENV: &str = "PORTICO_SQLD_REPLICA_URLS";

/// Portico database gateway daemon
#[derive(Debug, Parser)]
#[command(name = "porticod", version, about)]
pub struct Cli {
    /// Path to a JSON configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Bind address, overrides the configuration file
    #[arg(long)]
    pub bind: Option<String>,

    /// Port, overrides the configuration file
    #[arg(long)]
    pub port: Option<u16>,

    /// Log level when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// sqld URL; repeat for replicas (first occurrence is the primary)
    #[arg(long = "sqld-url")]
    pub sqld_urls: Vec<String>,

    /// Convenience backend URL (postgres://, mysql://, or a sqlite path)
    #[arg(long)]
    pub database_url: Option<String>,
}

impl Cli {
    /// Assemble the gateway configuration from file, flags, and environment.
    pub fn load_config(&self) -> anyhow::Result<GatewayConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                serde_json::from_str::<GatewayConfig>(&raw)
                    .with_context(|| format!("invalid configuration in {}", path.display()))?
            }
            None => GatewayConfig::default(),
        };

        if let Some(bind) = &self.bind {
            config.bind_address = bind.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }

        if !self.sqld_urls.is_empty() {
            config.adapters.push(AdapterConfig::Sqld {
                urls: self.sqld_urls.clone(),
                auth_token: None,
                default: false,
            });
        }
        if let Some(url) = &self.database_url {
            config.adapters.push(adapter_from_url(url)?);
        }

        resolve_environment(&mut config)?;
        config.validate()?;
        Ok(config)
    }
}

/// Map a convenience URL onto an adapter entry by scheme.
fn adapter_from_url(url: &str) -> anyhow::Result<AdapterConfig> {
    let entry = if url.starts_with("postgres://") || url.starts_with("postgresql://") {
        AdapterConfig::Postgres {
            url: url.to_string(),
            default: false,
        }
    } else if url.starts_with("mysql://") {
        AdapterConfig::Mysql {
            url: url.to_string(),
            default: false,
        }
    } else if url.starts_with("http://") || url.starts_with("https://") {
        AdapterConfig::Sqld {
            urls: vec![url.to_string()],
            auth_token: None,
            default: false,
        }
    } else if !url.contains("://") {
        AdapterConfig::Sqlite {
            path: url.to_string(),
            default: false,
        }
    } else {
        bail!("unsupported database URL scheme in '{url}'");
    };
    Ok(entry)
}

/// Expand `${VAR}` references and apply replica discovery.
fn resolve_environment(config: &mut GatewayConfig) -> anyhow::Result<()> {
    for adapter in &mut config.adapters {
        match adapter {
            AdapterConfig::Sqld {
                urls, auth_token, ..
            } => {
                for url in urls.iter_mut() {
                    *url = expand_env(url)?;
                }
                if let Some(token) = auth_token {
                    *token = expand_env(token)?;
                }
                if let Ok(extra) = std::env::var(SQLD_REPLICA_URLS_ENV) {
                    for replica in extra.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                        if !urls.iter().any(|u| u == replica) {
                            urls.push(replica.to_string());
                        }
                    }
                }
            }
            AdapterConfig::Postgres { url, .. } | AdapterConfig::Mysql { url, .. } => {
                *url = expand_env(url)?;
            }
            AdapterConfig::Sqlite { path, .. } => {
                *path = expand_env(path)?;
            }
        }
    }
    Ok(())
}

/// Substitute `${VAR}` with the named environment variable.
///
/// An unset variable is an error, not an empty string; a missing credential
/// must fail loudly at startup.
fn expand_env(input: &str) -> anyhow::Result<String> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let tail = &rest[start + 2..];
        let Some(end) = tail.find('}') else {
            bail!("unterminated ${{}} reference in '{input}'");
        };
        let name = &tail[..end];
        let value = std::env::var(name)
            .with_context(|| format!("environment variable '{name}' is not set"))?;
        out.push_str(&value);
        rest = &tail[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env() {
        std::env::set_var("PORTICO_TEST_TOKEN", "s3cret");
        assert_eq!(
            expand_env("Bearer ${PORTICO_TEST_TOKEN}").unwrap(),
            "Bearer s3cret"
        );
        assert_eq!(expand_env("no refs").unwrap(), "no refs");
        assert!(expand_env("${PORTICO_TEST_UNSET_VAR}").is_err());
        assert!(expand_env("${unterminated").is_err());
    }

    #[test]
    fn test_adapter_from_url() {
        assert!(matches!(
            adapter_from_url("postgres://localhost/db").unwrap(),
            AdapterConfig::Postgres { .. }
        ));
        assert!(matches!(
            adapter_from_url("mysql://localhost/db").unwrap(),
            AdapterConfig::Mysql { .. }
        ));
        assert!(matches!(
            adapter_from_url("http://sqld:8080").unwrap(),
            AdapterConfig::Sqld { .. }
        ));
        assert!(matches!(
            adapter_from_url("data/app.db").unwrap(),
            AdapterConfig::Sqlite { .. }
        ));
        assert!(adapter_from_url("ftp://nope").is_err());
    }

    #[test]
    fn test_cli_flags_build_adapters() {
        let cli = Cli::parse_from([
            "porticod",
            "--sqld-url",
            "http://primary:8080",
            "--sqld-url",
            "http://replica:8080",
            "--port",
            "9090",
        ]);
        let config = cli.load_config().unwrap();
        assert_eq!(config.port, 9090);
        assert_eq!(config.adapters.len(), 1);
        match &config.adapters[0] {
            AdapterConfig::Sqld { urls, .. } => {
                assert_eq!(urls[0], "http://primary:8080");
                assert_eq!(urls.len(), 2);
            }
            other => panic!("expected sqld adapter, got {other:?}"),
        }
    }
}
