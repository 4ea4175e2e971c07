use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub token: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,
    #[serde(default = "default_stale_after_minutes")]
    pub stale_after_minutes: i64,
    /// How long a terminal notice stays on screen before the redirect fires.
    #[serde(default = "default_redirect_delay_ms")]
    pub redirect_delay_ms: u64,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_poll_attempts: default_max_poll_attempts(),
            stale_after_minutes: default_stale_after_minutes(),
            redirect_delay_ms: default_redirect_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CertificateConfig {
    #[serde(default = "default_assets_dir")]
    pub assets_dir: String,
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    #[serde(default = "default_batch_item_delay_ms")]
    pub batch_item_delay_ms: u64,
}

impl Default for CertificateConfig {
    fn default() -> Self {
        Self {
            assets_dir: default_assets_dir(),
            output_dir: default_output_dir(),
            batch_item_delay_ms: default_batch_item_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RevilConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub payment: PaymentConfig,
    #[serde(default)]
    pub certificates: CertificateConfig,
}

fn default_base_url() -> String {
    "https://api.revil.example.org".to_string()
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

fn default_max_poll_attempts() -> u32 {
    10
}

fn default_stale_after_minutes() -> i64 {
    15
}

fn default_redirect_delay_ms() -> u64 {
    2_500
}

fn default_assets_dir() -> String {
    "assets".to_string()
}

fn default_output_dir() -> String {
    "certificates".to_string()
}

fn default_batch_item_delay_ms() -> u64 {
    1_000
}

pub fn load_revil_config(config_path: &Path) -> Result<RevilConfig, String> {
    if !config_path.exists() {
        info!(
            "config.toml not found, using defaults: {}",
            config_path.display()
        );
        return Ok(RevilConfig::default());
    }

    let raw = fs::read_to_string(config_path).map_err(|err| {
        format!(
            "Failed to read config.toml at {}: {}",
            config_path.display(),
            err
        )
    })?;

    toml::from_str::<RevilConfig>(&raw).map_err(|err| {
        format!(
            "Failed to parse config.toml at {}: {}",
            config_path.display(),
            err
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_revil_config(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config.payment.max_poll_attempts, 10);
        assert_eq!(config.payment.poll_interval_ms, 2_000);
        assert_eq!(config.certificates.batch_item_delay_ms, 1_000);
    }

    #[test]
    fn partial_file_keeps_defaults_for_absent_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[api]\nbase_url = \"https://staging.revil.example.org\"\n\n[payment]\nstale_after_minutes = 30"
        )
        .unwrap();

        let config = load_revil_config(&path).unwrap();
        assert_eq!(config.api.base_url, "https://staging.revil.example.org");
        assert_eq!(config.payment.stale_after_minutes, 30);
        assert_eq!(config.payment.max_poll_attempts, 10);
    }

    #[test]
    fn invalid_toml_is_reported_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[payment\n").unwrap();

        let err = load_revil_config(&path).unwrap_err();
        assert!(err.contains("config.toml"));
    }
}
