use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use courier_config::{AppConfig, LogLevel, OutputFormat};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::app::{spawn_stdin_reader, Application};
use crate::shutdown::ShutdownManager;

/// 命令行给出的启动参数，未给出的项使用配置文件中的值
#[derive(Debug, Clone, Default)]
pub struct StartupConfig {
    pub config_path: Option<String>,
    pub log_level: Option<LogLevel>,
    pub log_format: Option<OutputFormat>,
}

/// 初始化日志系统，`RUST_LOG` 优先于配置的级别
pub fn init_logging(log_level: LogLevel, log_format: OutputFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        OutputFormat::Json => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .context("初始化JSON日志格式失败")?;
        }
        OutputFormat::Pretty => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()
                .context("初始化Pretty日志格式失败")?;
        }
    }

    Ok(())
}

/// 安装Prometheus导出器，需要在tokio运行时内调用
pub fn init_metrics(listen: &str) -> Result<()> {
    let addr: SocketAddr = listen
        .parse()
        .with_context(|| format!("无效的指标监听地址: {listen}"))?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("安装Prometheus导出器失败: {e}"))?;

    info!("Prometheus指标导出器监听于 {}", addr);
    Ok(())
}

/// 加载配置并叠加命令行参数
pub fn load_config(startup_config: &StartupConfig) -> Result<AppConfig> {
    let mut config = AppConfig::load(startup_config.config_path.as_deref()).with_context(|| {
        format!(
            "加载配置失败: {}",
            startup_config.config_path.as_deref().unwrap_or("<默认路径>")
        )
    })?;

    if let Some(level) = startup_config.log_level {
        config.observability.log_level = level;
    }
    if let Some(format) = startup_config.log_format {
        config.observability.log_format = format;
    }

    Ok(config)
}

/// 启动应用程序并阻塞到收到关闭信号
pub async fn start_application(startup_config: StartupConfig) -> Result<()> {
    let config = load_config(&startup_config)?;

    init_logging(
        config.observability.log_level,
        config.observability.log_format,
    )?;
    info!("启动 courier 服务");
    if let Some(path) = &startup_config.config_path {
        info!("配置文件: {}", path);
    }

    if config.observability.metrics_enabled {
        init_metrics(&config.observability.metrics_listen)?;
    }

    let app = Arc::new(Application::new(config)?);
    let shutdown_manager = ShutdownManager::new();

    let app_handle = {
        let shutdown_rx = shutdown_manager.subscribe().await;
        let app = Arc::clone(&app);

        tokio::spawn(async move {
            if let Err(e) = app.run(shutdown_rx).await {
                error!("应用运行失败: {e}");
            }
        })
    };

    let lines = spawn_stdin_reader()?;
    {
        let shutdown_rx = shutdown_manager.subscribe().await;
        let app = Arc::clone(&app);
        tokio::spawn(async move { app.publish_lines(lines, shutdown_rx).await });
    }

    wait_for_shutdown_signal().await;
    info!("收到关闭信号，开始优雅关闭...");

    shutdown_manager.shutdown().await;

    match tokio::time::timeout(Duration::from_secs(30), app_handle).await {
        Ok(Ok(())) => info!("courier 服务已优雅关闭"),
        Ok(Err(e)) => error!("应用关闭时发生错误: {e}"),
        Err(_) => warn!("courier 服务关闭超时，强制退出"),
    }

    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("安装Ctrl+C信号处理器失败: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("安装SIGTERM信号处理器失败: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_cli_arguments_override_file_settings() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[[listeners]]
topic = "testEmail"

[observability]
log_level = "warn"
log_format = "pretty"
"#
        )
        .unwrap();

        let startup = StartupConfig {
            config_path: Some(file.path().to_string_lossy().into_owned()),
            log_level: Some(LogLevel::Debug),
            log_format: None,
        };
        let config = load_config(&startup).unwrap();

        assert_eq!(config.observability.log_level, LogLevel::Debug);
        assert_eq!(config.observability.log_format, OutputFormat::Pretty);
        assert_eq!(config.listeners.len(), 1);
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let startup = StartupConfig {
            config_path: Some("/no/such/courier.toml".to_string()),
            ..StartupConfig::default()
        };
        assert!(load_config(&startup).is_err());
    }

    #[test]
    fn test_invalid_metrics_address_is_rejected() {
        assert!(init_metrics("not-an-address").is_err());
    }
}
