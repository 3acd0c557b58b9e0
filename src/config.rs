// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Configuration loading.

use crate::forward::Target;
use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    /// Listen address, e.g. 127.0.0.1:9000
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Upstream base URL every proxied request is forwarded to
    #[serde(default = "default_target")]
    pub target: String,
}

fn default_listen() -> String {
    "127.0.0.1:9000".to_string()
}

fn default_target() -> String {
    "https://jsonplaceholder.typicode.com".to_string()
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            target: default_target(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DashboardConfig {
    /// Path segment the dashboard is mounted under
    #[serde(default = "default_dashboard_name")]
    pub name: String,

    /// How many captures are retained before the oldest is evicted
    #[serde(default = "default_max_captures")]
    pub max_captures: usize,
}

fn default_dashboard_name() -> String {
    "dashboard".to_string()
}

fn default_max_captures() -> usize {
    16
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            name: default_dashboard_name(),
            max_captures: default_max_captures(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    /// Upper bound for one upstream round trip, body included
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Request headers removed before forwarding
    #[serde(default)]
    pub suppress_headers: Vec<String>,
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            suppress_headers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub dashboard: DashboardConfig,

    #[serde(default)]
    pub proxy: ProxyConfig,
}

impl Config {
    /// Load configuration from a TOML file. Missing sections and keys take
    /// their defaults.
    pub async fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> anyhow::Result<Self> {
        let s = tokio::fs::read_to_string(path.as_ref()).await?;
        let cfg: Self = toml::from_str(&s)?;
        Ok(cfg)
    }

    /// Check the values that would otherwise only fail once traffic arrives.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.listen_addr()?;
        self.target()?;
        if self.dashboard.name.trim_matches('/').is_empty() {
            anyhow::bail!("dashboard name must not be empty");
        }
        if self.dashboard.name.contains(['?', '#']) {
            anyhow::bail!("dashboard name must be a plain path: {}", self.dashboard.name);
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> anyhow::Result<SocketAddr> {
        self.general
            .listen
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid listen address {}: {}", self.general.listen, e))
    }

    pub fn target(&self) -> anyhow::Result<Target> {
        Target::parse(&self.general.target)
    }

    /// Dashboard mount point with a single leading slash and no trailing one.
    pub fn dashboard_prefix(&self) -> String {
        format!("/{}", self.dashboard.name.trim_matches('/'))
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_millis(self.proxy.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tokio::fs;
    use uuid::Uuid;

    async fn write_tmp(toml: &str) -> anyhow::Result<std::path::PathBuf> {
        let tmp =
            std::env::temp_dir().join(format!("http-capture_cfg_test_{}.toml", Uuid::new_v4()));
        fs::write(&tmp, toml).await?;
        Ok(tmp)
    }

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.general.listen, "127.0.0.1:9000");
        assert_eq!(cfg.general.target, "https://jsonplaceholder.typicode.com");
        assert_eq!(cfg.dashboard.name, "dashboard");
        assert_eq!(cfg.dashboard.max_captures, 16);
        assert_eq!(cfg.proxy.timeout_ms, 30_000);
        assert!(cfg.proxy.suppress_headers.is_empty());
        assert!(cfg.validate().is_ok());
    }

    #[tokio::test]
    async fn load_toml_file() -> anyhow::Result<()> {
        let tmp = write_tmp(
            r#"[general]
listen = "0.0.0.0:8080"
target = "http://localhost:3000/api"

[dashboard]
name = "inspect"
max_captures = 100

[proxy]
timeout_ms = 500
suppress_headers = ["x-debug-token", "cookie"]
"#,
        )
        .await?;

        let cfg = Config::load_from_path(&tmp).await?;
        assert_eq!(cfg.general.listen, "0.0.0.0:8080");
        assert_eq!(cfg.general.target, "http://localhost:3000/api");
        assert_eq!(cfg.dashboard.name, "inspect");
        assert_eq!(cfg.dashboard.max_captures, 100);
        assert_eq!(cfg.upstream_timeout(), Duration::from_millis(500));
        assert_eq!(cfg.proxy.suppress_headers, vec!["x-debug-token", "cookie"]);

        fs::remove_file(&tmp).await?;
        Ok(())
    }

    #[tokio::test]
    async fn partial_file_keeps_defaults() -> anyhow::Result<()> {
        let tmp = write_tmp("[dashboard]\nmax_captures = 3\n").await?;

        let cfg = Config::load_from_path(&tmp).await?;
        assert_eq!(cfg.dashboard.max_captures, 3);
        assert_eq!(cfg.dashboard.name, "dashboard");
        assert_eq!(cfg.general.listen, "127.0.0.1:9000");
        assert_eq!(cfg.proxy.timeout_ms, 30_000);

        fs::remove_file(&tmp).await?;
        Ok(())
    }

    #[tokio::test]
    async fn load_missing_file_errors() {
        let p = std::env::temp_dir().join(format!("http-capture_missing_{}.toml", Uuid::new_v4()));
        assert!(Config::load_from_path(&p).await.is_err());
    }

    #[tokio::test]
    async fn load_malformed_toml_errors() -> anyhow::Result<()> {
        let tmp = write_tmp("[dashboard]\nmax_captures = \"many\"\n").await?;
        assert!(Config::load_from_path(&tmp).await.is_err());
        fs::remove_file(&tmp).await?;
        Ok(())
    }

    #[rstest]
    #[case("dashboard", "/dashboard")]
    #[case("/dashboard/", "/dashboard")]
    #[case("admin/captures", "/admin/captures")]
    fn dashboard_prefix_cases(#[case] name: &str, #[case] expected: &str) {
        let mut cfg = Config::default();
        cfg.dashboard.name = name.to_string();
        assert_eq!(cfg.dashboard_prefix(), expected);
    }

    #[rstest]
    #[case::empty_dashboard("", "127.0.0.1:9000", "http://x")]
    #[case::slash_dashboard("/", "127.0.0.1:9000", "http://x")]
    #[case::query_dashboard("dash?x", "127.0.0.1:9000", "http://x")]
    #[case::bad_listen("dashboard", "not-an-addr", "http://x")]
    #[case::bad_target("dashboard", "127.0.0.1:9000", "ftp://x")]
    fn validate_rejects(#[case] name: &str, #[case] listen: &str, #[case] target: &str) {
        let mut cfg = Config::default();
        cfg.dashboard.name = name.to_string();
        cfg.general.listen = listen.to_string();
        cfg.general.target = target.to_string();
        assert!(cfg.validate().is_err());
    }
}
