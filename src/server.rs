//! # relay 服务启动与关闭
//!
//! 监听回环地址，收到 Ctrl+C 后停止接收新连接，等待在途请求结束，再排空写入队列。

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::app::AppContext;
use crate::error::{ProxyError, Result};
use crate::logging::{LogComponent, LogStage};
use crate::relay::create_router;
use crate::{lerror, linfo, lwarn};

/// 处理 Ctrl+C 信号
async fn handle_ctrl_c_signal() -> String {
    match tokio::signal::ctrl_c().await {
        Ok(()) => "Ctrl+C signal".to_string(),
        Err(e) => {
            lerror!(
                "system",
                LogStage::Shutdown,
                LogComponent::ServerSetup,
                "ctrl_c_error",
                &format!("Failed to listen for Ctrl+C: {e:?}")
            );
            "Ctrl+C handler error".to_string()
        }
    }
}

/// 在已绑定的监听器上运行 relay，直到 `shutdown` 完成
pub async fn serve_with_shutdown<F>(
    context: Arc<AppContext>,
    listener: TcpListener,
    shutdown: F,
) -> Result<()>
where
    F: std::future::Future<Output = String> + Send + 'static,
{
    let addr = listener
        .local_addr()
        .map_err(|e| ProxyError::server_start_with_source("读取监听地址失败", e))?;
    linfo!(
        "system",
        LogStage::Startup,
        LogComponent::ServerSetup,
        "server_start",
        &format!("Starting relay server on {addr}")
    );

    let router = create_router(Arc::clone(&context));
    let served = axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let reason = shutdown.await;
            linfo!(
                "system",
                LogStage::Shutdown,
                LogComponent::ServerSetup,
                "shutdown_initiated",
                &format!("🛑 Graceful shutdown: {reason}")
            );
        })
        .await
        .map_err(|e| ProxyError::network_with_source("relay 服务异常退出", e));

    if let Err(e) = context.shutdown().await {
        lwarn!(
            "system",
            LogStage::Shutdown,
            LogComponent::ServerSetup,
            "queue_shutdown_warning",
            &format!("⚠️  写入队列关闭未完成: {e}")
        );
    }
    served
}

/// 绑定配置中的地址并运行 relay，Ctrl+C 时优雅关闭
pub async fn run_relay_server(context: Arc<AppContext>) -> Result<()> {
    let addr: SocketAddr = context
        .config
        .relay
        .bind_addr()
        .map_err(ProxyError::config)?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ProxyError::server_start_with_source(format!("无法监听 {addr}"), e))?;

    serve_with_shutdown(context, listener, handle_ctrl_c_signal()).await
}
