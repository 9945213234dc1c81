//! # Entity 模块
//!
//! 包含所有 Sea-ORM 实体定义

pub mod request_log;

pub use request_log::Entity as RequestLog;
