//! # 数据库模块
//!
//! 数据库连接、迁移与请求日志查询

use entity::request_log;
use sea_orm::sqlx::sqlite::SqliteJournalMode;
use sea_orm::{
    ColumnTrait, ConnectOptions, Database, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect,
};
use sea_orm_migration::MigratorTrait;
use serde::Deserialize;
use std::time::Duration;

use crate::config::DatabaseConfig;
use crate::error::{ProxyError, Result};
use crate::logging::{LogComponent, LogStage};
use crate::{lerror, linfo};

/// 日志查询的默认与最大条数
const DEFAULT_LOG_LIMIT: u64 = 100;
const MAX_LOG_LIMIT: u64 = 1000;

const SQLITE_BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// 初始化数据库连接
///
/// SQLite 文件库会先创建父目录，池中每个连接都开启 WAL 并设置 `busy_timeout`。
pub async fn init_database(config: &DatabaseConfig) -> Result<DatabaseConnection> {
    config.ensure_database_path()?;

    let mut options = ConnectOptions::new(config.url.clone());
    options
        .max_connections(config.max_connections)
        .connect_timeout(Duration::from_secs(config.connect_timeout))
        .sqlx_logging(false);
    if config.is_memory_database() {
        // 内存库每个连接各自独立，只能使用单连接
        options.max_connections(1).min_connections(1);
    } else if config.is_sqlite() {
        // 连接池中每个新连接都要带上这些设置
        options.map_sqlx_sqlite_opts(|opts| {
            opts.busy_timeout(SQLITE_BUSY_TIMEOUT)
                .journal_mode(SqliteJournalMode::Wal)
        });
    }

    let db = Database::connect(options)
        .await
        .map_err(|e| ProxyError::database_with_source("数据库连接失败", e))?;

    linfo!(
        "system",
        LogStage::Startup,
        LogComponent::Database,
        "db_connected",
        "数据库连接成功",
        sqlite = config.is_sqlite()
    );
    Ok(db)
}

/// 运行数据库迁移
pub async fn run_migrations(db: &DatabaseConnection) -> std::result::Result<(), DbErr> {
    match ::migration::Migrator::up(db, None).await {
        Ok(()) => {
            linfo!(
                "system",
                LogStage::Startup,
                LogComponent::Database,
                "migrations_applied",
                "数据库迁移完成"
            );
            Ok(())
        }
        Err(e) => {
            lerror!(
                "system",
                LogStage::Startup,
                LogComponent::Database,
                "migrations_failed",
                &format!("数据库迁移失败: {e}")
            );
            Err(e)
        }
    }
}

/// 请求日志查询条件
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestLogQuery {
    pub platform: Option<String>,
    pub provider: Option<String>,
    pub limit: Option<u64>,
}

impl RequestLogQuery {
    /// 生效的条数：未指定或为 0 时取默认值，超过上限时截断
    #[must_use]
    pub fn effective_limit(&self) -> u64 {
        match self.limit {
            None | Some(0) => DEFAULT_LOG_LIMIT,
            Some(limit) => limit.min(MAX_LOG_LIMIT),
        }
    }
}

/// 按 id 倒序查询最近的请求日志
pub async fn list_request_logs(
    db: &DatabaseConnection,
    query: &RequestLogQuery,
) -> Result<Vec<request_log::Model>> {
    let mut select = request_log::Entity::find();
    if let Some(platform) = query.platform.as_deref().filter(|p| !p.is_empty()) {
        select = select.filter(request_log::Column::Platform.eq(platform));
    }
    if let Some(provider) = query.provider.as_deref().filter(|p| !p.is_empty()) {
        select = select.filter(request_log::Column::Provider.eq(provider));
    }

    let logs = select
        .order_by_desc(request_log::Column::Id)
        .limit(query.effective_limit())
        .all(db)
        .await?;
    Ok(logs)
}
