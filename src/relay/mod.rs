//! # relay 核心
//!
//! 路由 → 执行器 →（筛选、映射、转发）→ 记录 → 写入队列，数据只向下流动。

pub mod executor;
pub mod forwarder;
pub mod router;
pub mod selector;

pub use executor::{AttemptFailure, FailoverExecutor, RelayFailure, RelayRequest};
pub use forwarder::{
    Forwarder, HttpUpstream, Outcome, Upstream, UpstreamError, UpstreamRequest, UpstreamResponse,
    classify_outcome,
};
pub use router::{RelayState, create_router};
pub use selector::{CandidatePlan, LevelGroup, SkipReason, SkippedProvider, select_candidates};
