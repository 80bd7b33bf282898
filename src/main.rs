use anyhow::Result;
use clap::Parser;
use courier::common::{start_application, StartupConfig};
use courier_config::{LogLevel, OutputFormat};

/// 消息投递与调用容错服务
#[derive(Parser, Debug)]
#[command(name = "courier")]
#[command(version = "1.0.0")]
#[command(about = "带重试、死信与熔断保护的消息投递服务")]
struct Cli {
    /// 配置文件路径，不指定时按默认路径查找
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// 日志级别，覆盖配置文件 (trace/debug/info/warn/error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<LogLevel>,

    /// 日志格式，覆盖配置文件 (json/pretty)
    #[arg(long, value_name = "FORMAT")]
    log_format: Option<OutputFormat>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    start_application(StartupConfig {
        config_path: cli.config,
        log_level: cli.log_level,
        log_format: cli.log_format,
    })
    .await
}
