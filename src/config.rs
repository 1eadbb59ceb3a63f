use serde::{Deserialize, Serialize};
use std::fs;

use crate::charge::types::NetworkErrorPolicy;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub gateway: GatewayConfig,
    /// PostgreSQL connection URL; absent means the in-memory store is used
    #[serde(default)]
    pub postgres_url: Option<String>,
    /// API key accepted when no PostgreSQL is configured
    #[serde(default)]
    pub dev_api_key: Option<String>,
    #[serde(default)]
    pub charge: ChargeConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ChargeConfig {
    #[serde(default)]
    pub network_error_policy: NetworkErrorPolicy,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub tick_interval_ms: u64,
    pub eligibility_floor_secs: u64,
    pub batch_size: u32,
    pub retry_schedule_secs: Vec<u64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval_ms: 10_000,
            eligibility_floor_secs: 20,
            batch_size: 50,
            retry_schedule_secs: vec![20, 40, 120, 300, 600],
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub easypaisa: Option<EasypaisaConfig>,
    #[serde(default)]
    pub jazzcash: Option<JazzCashConfig>,
    #[serde(default)]
    pub mock: Option<MockProviderConfig>,
}

/// Easypaisa REST (MA channel) credentials
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EasypaisaConfig {
    #[serde(default = "default_easypaisa_url")]
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub store_id: String,
    #[serde(default)]
    pub account_num: Option<String>,
    #[serde(default = "default_email")]
    pub default_email: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// JazzCash REST (MWALLET channel) credentials
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JazzCashConfig {
    #[serde(default = "default_jazzcash_url")]
    pub base_url: String,
    pub merchant_id: String,
    pub password: String,
    pub integrity_salt: String,
    #[serde(default)]
    pub return_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct MockProviderConfig {
    pub enabled: bool,
}

fn default_easypaisa_url() -> String {
    "https://easypay.easypaisa.com.pk".to_string()
}

fn default_jazzcash_url() -> String {
    "https://payments.jazzcash.com.pk".to_string()
}

fn default_email() -> String {
    "noreply@mypay.mx".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl AppConfig {
    pub fn load(env: &str) -> Self {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .unwrap_or_else(|_| panic!("Failed to read config file: {}", config_path));
        Self::from_yaml(&content).expect("Failed to parse config yaml")
    }

    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_gets_defaults() {
        let yaml = r#"
log_level: info
log_dir: ./logs
log_file: test.log
use_json: false
rotation: never
gateway:
  host: 127.0.0.1
  port: 4003
"#;
        let config = AppConfig::from_yaml(yaml).unwrap();

        assert!(config.postgres_url.is_none());
        assert_eq!(config.charge.network_error_policy, NetworkErrorPolicy::Fail);
        assert_eq!(config.scheduler.retry_schedule_secs, vec![20, 40, 120, 300, 600]);
        assert_eq!(config.scheduler.batch_size, 50);
        assert!(config.providers.easypaisa.is_none());
    }

    #[test]
    fn test_provider_blocks_deserialize() {
        let yaml = r#"
log_level: debug
log_dir: ./logs
log_file: test.log
use_json: true
rotation: daily
gateway:
  host: 0.0.0.0
  port: 4004
charge:
  network_error_policy: pending
scheduler:
  enabled: false
  tick_interval_ms: 5000
  eligibility_floor_secs: 30
  batch_size: 10
  retry_schedule_secs: [10, 20]
providers:
  easypaisa:
    username: user
    password: pass
    store_id: "12345"
  jazzcash:
    merchant_id: MC1
    password: secret
    integrity_salt: salt
    return_url: https://example.com/cb
"#;
        let config = AppConfig::from_yaml(yaml).unwrap();

        assert_eq!(config.charge.network_error_policy, NetworkErrorPolicy::Pending);
        assert!(!config.scheduler.enabled);
        assert_eq!(config.scheduler.retry_schedule_secs, vec![10, 20]);

        let ep = config.providers.easypaisa.unwrap();
        assert_eq!(ep.base_url, "https://easypay.easypaisa.com.pk");
        assert_eq!(ep.timeout_secs, 30);
        assert_eq!(ep.default_email, "noreply@mypay.mx");

        let jc = config.providers.jazzcash.unwrap();
        assert_eq!(jc.merchant_id, "MC1");
        assert_eq!(jc.base_url, "https://payments.jazzcash.com.pk");
    }

    #[test]
    fn test_missing_credentials_rejected() {
        let yaml = r#"
log_level: info
log_dir: ./logs
log_file: test.log
use_json: false
rotation: never
gateway:
  host: 127.0.0.1
  port: 4003
providers:
  jazzcash:
    merchant_id: MC1
"#;
        assert!(AppConfig::from_yaml(yaml).is_err());
    }
}
