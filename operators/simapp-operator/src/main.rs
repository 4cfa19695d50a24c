use anyhow::Result;
use clap::Parser;
use simapp_operator::config::OperatorConfig;
use simapp_operator::SimAppOperator;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// 5G SIMAPP 工作负载的 Kubernetes Operator
#[derive(Parser, Debug)]
#[command(name = "simapp-operator", version, about)]
struct Args {
    /// 配置文件（YAML 或 JSON）
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 命名空间
    #[arg(short, long)]
    namespace: Option<String>,

    /// SimApp 资源名称
    #[arg(long)]
    name: Option<String>,

    /// 日志级别
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = OperatorConfig::load(args.config.as_deref())?;
    if let Some(namespace) = args.namespace {
        config.namespace = namespace;
    }
    if let Some(name) = args.name {
        config.name = name;
    }
    if let Some(log_level) = args.log_level {
        config.log_level = log_level;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut operator = SimAppOperator::new(config).await?;
    operator.start().await?;

    tokio::signal::ctrl_c().await?;
    info!("收到退出信号");

    operator.stop().await
}
