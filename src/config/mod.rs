//! # 配置管理模块
//!
//! 处理应用配置加载、验证和管理

mod app_config;
mod database;

pub use app_config::{AppConfig, ProvidersConfig, QueueConfig, RelayConfig};
pub use database::DatabaseConfig;

use std::env;
use std::path::{Path, PathBuf};

use crate::error::{Context, ProxyError, Result};
use crate::logging::{LogComponent, LogStage};
use crate::{linfo, lwarn};

/// 按 `RUST_ENV` 推导的默认配置文件路径
#[must_use]
pub fn default_config_path() -> PathBuf {
    let env = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());
    PathBuf::from(format!("config/config.{env}.toml"))
}

/// 加载配置文件
///
/// 显式指定的文件必须存在；未指定时尝试默认路径，不存在则使用内置默认值。
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => read_config_file(path)?,
        None => {
            let default_path = default_config_path();
            if default_path.exists() {
                read_config_file(&default_path)?
            } else {
                lwarn!(
                    "system",
                    LogStage::Configuration,
                    LogComponent::Config,
                    "load_config",
                    &format!("配置文件不存在，使用默认配置: {}", default_path.display())
                );
                AppConfig::default()
            }
        }
    };

    config.validate().map_err(ProxyError::config)?;
    Ok(config)
}

fn read_config_file(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        return Err(ProxyError::config(format!(
            "配置文件不存在: {}",
            path.display()
        )));
    }

    let content = std::fs::read_to_string(path).map_err(|e| {
        ProxyError::config_with_source(format!("读取配置文件失败: {}", path.display()), e)
    })?;
    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("解析配置文件失败: {}", path.display()))?;

    linfo!(
        "system",
        LogStage::Configuration,
        LogComponent::Config,
        "load_config",
        &format!("已加载配置文件: {}", path.display())
    );
    Ok(config)
}
