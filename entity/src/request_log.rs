//! # 请求日志实体
//!
//! 每次上游转发尝试一条记录，失败的尝试同样入库（`http_code` 为 0 表示未拿到响应）。

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "request_log")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    /// claude / codex / gemini
    pub platform: String,
    pub model: String,
    /// provider 名称
    pub provider: String,
    pub http_code: i32,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cache_create_tokens: i64,
    pub cache_read_tokens: i64,
    pub reasoning_tokens: i64,
    pub is_stream: bool,
    pub duration_sec: f64,
    pub created_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// 是否拿到了 2xx 响应
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.http_code >= 200 && self.http_code < 300
    }

    #[must_use]
    pub const fn total_tokens(&self) -> i64 {
        self.input_tokens + self.output_tokens
    }
}
