//! # Code Relay 主程序
//!
//! 本地回环 AI provider 转发服务

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use code_relay::{
    ProxyError, Result,
    app::AppContext,
    config::load_config,
    lerror, linfo,
    logging::{self, LogComponent, LogStage},
    server::run_relay_server,
};

/// 命令行参数
#[derive(Parser, Debug)]
#[command(name = "code-relay")]
#[command(version, about = "Loopback failover relay for AI coding assistants", long_about = None)]
struct Cli {
    /// 配置文件路径，默认 `config/config.{RUST_ENV}.toml`
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// 日志级别（RUST_LOG 优先）
    #[arg(long, env = "CODE_RELAY_LOG_LEVEL")]
    log_level: Option<String>,

    /// 覆盖监听地址，例如 127.0.0.1:18100
    #[arg(long)]
    bind: Option<String>,

    /// 打印日志配置说明后退出
    #[arg(long)]
    logging_help: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.logging_help {
        logging::print_logging_help();
        return Ok(());
    }

    // 初始化日志系统
    logging::init_optimized_logging(cli.log_level.as_ref());

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(bind) = cli.bind {
        config.relay.bind = bind;
        config.validate().map_err(ProxyError::config)?;
    }

    let context = match AppContext::build(config).await {
        Ok(context) => Arc::new(context),
        Err(e) => {
            lerror!(
                "system",
                LogStage::Startup,
                LogComponent::Main,
                "context_init_failed",
                &format!("初始化失败: {e:?}")
            );
            return Err(e);
        }
    };

    linfo!(
        "system",
        LogStage::Startup,
        LogComponent::Main,
        "service_starting",
        "服务启动",
        bind = context.config.relay.bind,
        providers_dir = context.config.providers.dir
    );
    if let Err(e) = run_relay_server(context).await {
        lerror!(
            "system",
            LogStage::Startup,
            LogComponent::Main,
            "service_start_failed",
            &format!("服务启动失败: {e:?}")
        );
        std::process::exit(1);
    }

    linfo!(
        "system",
        LogStage::Shutdown,
        LogComponent::Main,
        "service_shutdown",
        "服务正常关闭"
    );
    Ok(())
}
