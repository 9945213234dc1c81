//! Provider 模块。
//!
//! - `types`：协议族与 provider 配置结构
//! - `model_mapping`：模型支持判断、映射与请求改写
//! - `config_store`：provider 列表的持久化

mod config_store;
pub mod model_mapping;
mod types;

pub use config_store::{JsonProviderStore, ProviderStore};
pub use model_mapping::{
    MappingError, effective_model, rewrite_body, rewrite_path_model, supports,
    validate_configuration,
};
pub use types::{Platform, Provider};
