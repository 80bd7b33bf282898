use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use super::{
    gateway::GatewayConfig, listener::ListenerConfig, logging::ObservabilityConfig,
    notification::NotificationConfig,
};
use crate::validation::ConfigValidator;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub listeners: Vec<ListenerConfig>,
    pub gateway: GatewayConfig,
    pub observability: ObservabilityConfig,
    pub notification: NotificationConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        let notification = NotificationConfig::default();
        Self {
            listeners: vec![
                ListenerConfig::new("notification"),
                ListenerConfig::new(notification.discipline_topic.clone()),
            ],
            gateway: GatewayConfig::default(),
            observability: ObservabilityConfig::default(),
            notification,
        }
    }
}

impl AppConfig {
    /// Loads configuration from an optional TOML file, then applies
    /// `COURIER_<SECTION>__<KEY>` environment overrides.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = ["config/courier.toml", "courier.toml", "/etc/courier/config.toml"];
            if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("COURIER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    pub fn listener(&self, topic: &str) -> Option<&ListenerConfig> {
        self.listeners.iter().find(|l| l.topic == topic)
    }
}

impl ConfigValidator for AppConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        let mut topics = HashSet::new();
        for listener in &self.listeners {
            listener.validate()?;
            if !topics.insert(listener.topic.as_str()) {
                return Err(crate::ConfigError::Validation(format!(
                    "duplicate listener topic: {}",
                    listener.topic
                )));
            }
        }
        self.gateway.validate()?;
        self.observability.validate()?;
        self.notification.validate()?;
        Ok(())
    }
}
