//! # Provider 存储
//!
//! 每个协议族一份 JSON 文件，外层包裹 `{"providers": [...]}`。
//! relay 每次请求都重新读取，不在进程内缓存。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::types::{Platform, Provider};
use crate::error::{ProxyError, Result};
use crate::logging::{LogComponent, LogStage};
use crate::{ldebug, linfo};

/// Provider 列表的读写接口
#[async_trait]
pub trait ProviderStore: Send + Sync {
    /// 读取某个协议族的 provider 列表，按文件中的顺序返回
    async fn load_providers(&self, platform: Platform) -> Result<Vec<Provider>>;

    /// 整体覆盖某个协议族的 provider 列表
    async fn save_providers(&self, platform: Platform, providers: &[Provider]) -> Result<()>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ProviderEnvelope {
    #[serde(default)]
    providers: Vec<Provider>,
}

/// 基于 JSON 文件的 provider 存储
#[derive(Debug, Clone)]
pub struct JsonProviderStore {
    dir: PathBuf,
    /// 保存时的读取、校验、写入必须串行
    write_lock: Arc<Mutex<()>>,
}

impl JsonProviderStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn path_for(&self, platform: Platform) -> PathBuf {
        self.dir.join(platform.store_file_name())
    }

    async fn read_envelope(&self, platform: Platform) -> Result<ProviderEnvelope> {
        let path = self.path_for(platform);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(ProviderEnvelope::default()),
            Err(err) => {
                return Err(ProxyError::provider_store_with_source(
                    format!("读取 {} 失败", path.display()),
                    err,
                ));
            }
        };

        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(ProviderEnvelope::default());
        }

        serde_json::from_slice(&raw).map_err(|err| {
            ProxyError::provider_store_with_source(format!("解析 {} 失败", path.display()), err)
        })
    }
}

/// 已存在的 id 不允许改名
fn check_renames(existing: &[Provider], incoming: &[Provider]) -> Result<()> {
    let names: HashMap<i64, &str> = existing
        .iter()
        .map(|provider| (provider.id, provider.name.as_str()))
        .collect();

    for provider in incoming {
        if let Some(old_name) = names.get(&provider.id)
            && *old_name != provider.name
        {
            return Err(ProxyError::provider_store(format!(
                "provider id {} 的名称不可修改（'{}' -> '{}'）",
                provider.id, old_name, provider.name
            )));
        }
    }
    Ok(())
}

#[async_trait]
impl ProviderStore for JsonProviderStore {
    async fn load_providers(&self, platform: Platform) -> Result<Vec<Provider>> {
        let envelope = self.read_envelope(platform).await?;
        ldebug!(
            "system",
            LogStage::Configuration,
            LogComponent::ProviderStore,
            "load_providers",
            "Loaded provider list",
            platform = platform.as_str(),
            count = envelope.providers.len()
        );
        Ok(envelope.providers)
    }

    async fn save_providers(&self, platform: Platform, providers: &[Provider]) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let existing = self.read_envelope(platform).await?;
        check_renames(&existing.providers, providers)?;

        tokio::fs::create_dir_all(&self.dir).await.map_err(|err| {
            ProxyError::provider_store_with_source(
                format!("创建目录 {} 失败", self.dir.display()),
                err,
            )
        })?;

        let envelope = ProviderEnvelope {
            providers: providers.to_vec(),
        };
        let data = serde_json::to_vec_pretty(&envelope)?;

        let path = self.path_for(platform);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &data).await.map_err(|err| {
            ProxyError::provider_store_with_source(format!("写入 {} 失败", tmp.display()), err)
        })?;
        tokio::fs::rename(&tmp, &path).await.map_err(|err| {
            ProxyError::provider_store_with_source(format!("替换 {} 失败", path.display()), err)
        })?;

        linfo!(
            "system",
            LogStage::Configuration,
            LogComponent::ProviderStore,
            "save_providers",
            "Saved provider list",
            platform = platform.as_str(),
            count = providers.len()
        );
        Ok(())
    }
}
