use std::io::BufRead;
use std::sync::Arc;

use anyhow::{Context, Result};
use courier_config::AppConfig;
use courier_dispatcher::MessagePipeline;
use courier_domain::{
    EventPublisher, HandlerRegistry, LaneSubstrate, LoggingMonitoringSink, MessageHandler,
    MonitoringSink,
};
use courier_infrastructure::{BreakerRegistry, CallGateway, InMemoryLaneSubstrate};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::notification::{DisciplineHandler, EmployeeDirectory, LoggingHandler};

/// 主应用程序：每个监听器一条流水线，共享同一个内存通道和调用网关
pub struct Application {
    config: AppConfig,
    substrate: InMemoryLaneSubstrate,
    publisher: EventPublisher,
    gateway: CallGateway,
    pipelines: Vec<MessagePipeline>,
}

impl Application {
    pub fn new(config: AppConfig) -> Result<Self> {
        info!("初始化应用程序，监听器数: {}", config.listeners.len());

        let substrate = InMemoryLaneSubstrate::new();
        let shared: Arc<dyn LaneSubstrate> = Arc::new(substrate.clone());

        let registry = BreakerRegistry::new(config.gateway.clone()).context("创建熔断器注册表失败")?;
        let gateway = CallGateway::new(registry);
        let directory = EmployeeDirectory::new(&config.notification, gateway.clone())
            .context("创建员工查询客户端失败")?;

        let handlers = Arc::new(build_handlers(&config, directory)?);
        let sink: Arc<dyn MonitoringSink> = Arc::new(LoggingMonitoringSink);

        let pipelines = config
            .listeners
            .iter()
            .map(|listener| {
                MessagePipeline::new(
                    listener.clone(),
                    shared.clone(),
                    handlers.clone(),
                    sink.clone(),
                )
                .with_context(|| format!("创建监听器 {} 失败", listener.topic))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            publisher: EventPublisher::new(shared),
            config,
            substrate,
            gateway,
            pipelines,
        })
    }

    pub fn publisher(&self) -> &EventPublisher {
        &self.publisher
    }

    pub fn pipelines(&self) -> &[MessagePipeline] {
        &self.pipelines
    }

    /// 启动全部流水线，直到收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        for pipeline in &self.pipelines {
            pipeline
                .start()
                .await
                .with_context(|| format!("启动监听器 {} 失败", pipeline.topic()))?;
        }

        let _ = shutdown_rx.recv().await;
        info!("应用收到关闭信号");

        for pipeline in &self.pipelines {
            pipeline.shutdown().await;
        }

        self.report().await;
        info!("所有监听器已停止");
        Ok(())
    }

    /// 把 `<topic> <payload>` 形式的输入行发布到对应主题，输入结束或收到关闭信号时返回
    pub async fn publish_lines(
        &self,
        mut lines: mpsc::Receiver<String>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        loop {
            let line = tokio::select! {
                _ = shutdown_rx.recv() => break,
                line = lines.recv() => match line {
                    Some(line) => line,
                    None => {
                        debug!("输入已结束");
                        break;
                    }
                },
            };

            if line.trim().is_empty() {
                continue;
            }
            let Some((topic, payload)) = parse_publish_line(&line) else {
                warn!("忽略无法解析的输入: {}", line);
                continue;
            };
            if self.config.listener(topic).is_none() {
                warn!("主题 {} 没有监听器，消息会一直保留在通道中", topic);
            }

            match self.publisher.send(topic, payload).await {
                Ok(id) => info!(topic = topic, message_id = %id, "消息已发布"),
                Err(e) => error!("发布消息到 {} 失败: {}", topic, e),
            }
        }
    }

    /// 记录退出时的通道与熔断器状态
    async fn report(&self) {
        match self.substrate.lane_stats() {
            Ok(stats) => {
                info!(
                    "通道总数: {}，保留消息总数: {}",
                    stats.total_lanes, stats.total_messages
                );
                for lane in stats.lane_details.iter().filter(|l| l.depth > 0) {
                    info!(
                        lane = %lane.name,
                        depth = lane.depth,
                        pending = lane.pending,
                        consumer_groups = lane.consumer_groups,
                        "通道仍有保留消息"
                    );
                }
            }
            Err(e) => warn!("读取通道统计失败: {}", e),
        }

        for (operation, snapshot) in self.gateway.registry().snapshots().await {
            info!(
                operation = %operation,
                state = %snapshot.state,
                failure_rate = ?snapshot.failure_rate,
                samples = snapshot.sample_count,
                short_circuits = snapshot.short_circuit_count,
                "熔断器状态"
            );
        }
    }
}

/// 通知主题使用员工查询处理器，其余主题只记录消息
fn build_handlers(config: &AppConfig, directory: EmployeeDirectory) -> Result<HandlerRegistry> {
    let mut handlers = HandlerRegistry::new();
    for listener in &config.listeners {
        let handler: Arc<dyn MessageHandler> =
            if listener.topic == config.notification.discipline_topic {
                Arc::new(DisciplineHandler::new(directory.clone()))
            } else {
                Arc::new(LoggingHandler)
            };
        handlers
            .register(listener.topic.clone(), handler)
            .with_context(|| format!("注册处理器失败: {}", listener.topic))?;
    }
    debug!("已注册处理器: {:?}", handlers.event_types());
    Ok(handlers)
}

/// 解析 `<topic> <payload>` 形式的一行输入
pub fn parse_publish_line(line: &str) -> Option<(&str, &str)> {
    let (topic, payload) = line.trim().split_once(char::is_whitespace)?;
    let payload = payload.trim();
    if topic.is_empty() || payload.is_empty() {
        return None;
    }
    Some((topic, payload))
}

/// 在独立线程上逐行读取标准输入
///
/// 阻塞读无法取消，因此使用独立线程而不是运行时的阻塞线程池。
pub fn spawn_stdin_reader() -> Result<mpsc::Receiver<String>> {
    let (tx, rx) = mpsc::channel(64);
    std::thread::Builder::new()
        .name("stdin-reader".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.blocking_send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!("读取标准输入失败: {}", e);
                        break;
                    }
                }
            }
        })
        .context("启动标准输入读取线程失败")?;
    info!("从标准输入读取消息，格式: <topic> <payload>");
    Ok(rx)
}
