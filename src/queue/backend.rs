//! # 写入后端
//!
//! 队列只依赖 [`WriteBackend`]，生产环境由 sea-orm 连接实现，测试中可替换。

use async_trait::async_trait;
use sea_orm::{ConnectionTrait, DatabaseConnection, Statement, TransactionTrait, Value};

use super::QueueError;

/// 参数化写语句
#[derive(Debug, Clone, PartialEq)]
pub struct WriteStatement {
    pub sql: String,
    pub values: Vec<Value>,
}

impl WriteStatement {
    pub fn new<S, I>(sql: S, values: I) -> Self
    where
        S: Into<String>,
        I: IntoIterator<Item = Value>,
    {
        Self {
            sql: sql.into(),
            values: values.into_iter().collect(),
        }
    }
}

/// 写语句执行器
#[async_trait]
pub trait WriteBackend: Send + Sync + 'static {
    /// 执行单条语句
    async fn execute(&self, statement: &WriteStatement) -> Result<(), QueueError>;

    /// 在一个事务中执行整批语句，任一失败则整批回滚
    async fn execute_batch(&self, statements: &[WriteStatement]) -> Result<(), QueueError>;
}

fn to_statement(db: &impl ConnectionTrait, statement: &WriteStatement) -> Statement {
    Statement::from_sql_and_values(
        db.get_database_backend(),
        statement.sql.as_str(),
        statement.values.clone(),
    )
}

#[async_trait]
impl WriteBackend for DatabaseConnection {
    async fn execute(&self, statement: &WriteStatement) -> Result<(), QueueError> {
        ConnectionTrait::execute(self, to_statement(self, statement))
            .await
            .map(|_| ())
            .map_err(|err| QueueError::Database(err.to_string()))
    }

    async fn execute_batch(&self, statements: &[WriteStatement]) -> Result<(), QueueError> {
        let txn = self
            .begin()
            .await
            .map_err(|err| QueueError::Database(format!("开启事务失败: {err}")))?;

        for statement in statements {
            if let Err(err) = txn.execute(to_statement(&txn, statement)).await {
                // 回滚失败时事务随 drop 一并丢弃
                let _ = txn.rollback().await;
                return Err(QueueError::BatchFailed(err.to_string()));
            }
        }

        txn.commit()
            .await
            .map_err(|err| QueueError::Database(format!("事务提交失败: {err}")))
    }
}
