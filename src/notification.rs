//! 员工通知
//!
//! 员工被处分的事件到达后，通过调用网关查询员工服务；员工服务不可用或超时时
//! 使用匿名员工作为降级值，通知照常发出。

use async_trait::async_trait;
use courier_config::NotificationConfig;
use courier_domain::{CourierError, CourierResult, HandlerFailure, Message, MessageHandler};
use courier_infrastructure::CallGateway;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

/// 员工服务的查询响应
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeResponse {
    #[serde(default)]
    pub id: Option<String>,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub kin: Option<String>,
    #[serde(default)]
    pub is_disciplined: Option<bool>,
}

impl EmployeeResponse {
    /// 查询失败时的降级值
    pub fn anonymous() -> Self {
        Self {
            id: None,
            first_name: "Anonymous".to_string(),
            last_name: "Employee".to_string(),
            kin: None,
            is_disciplined: None,
        }
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// 受熔断保护的员工查询客户端
#[derive(Debug, Clone)]
pub struct EmployeeDirectory {
    client: Client,
    base_url: Url,
    operation: String,
    gateway: CallGateway,
}

impl EmployeeDirectory {
    pub fn new(config: &NotificationConfig, gateway: CallGateway) -> CourierResult<Self> {
        let base_url = Url::parse(&config.employee_service_url).map_err(|e| {
            CourierError::Configuration(format!(
                "无效的员工服务地址 {}: {e}",
                config.employee_service_url
            ))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(CourierError::Configuration(format!(
                "员工服务地址不能作为基础路径: {}",
                config.employee_service_url
            )));
        }

        Ok(Self {
            client: Client::new(),
            base_url,
            operation: config.lookup_operation.clone(),
            gateway,
        })
    }

    /// 员工ID作为单个路径段追加，其中的 `/`、`?`、`#` 会被转义
    pub fn employee_url(&self, employee_id: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(employee_id);
        }
        url
    }

    #[instrument(skip(self))]
    pub async fn lookup(&self, employee_id: &str) -> CourierResult<EmployeeResponse> {
        let url = self.employee_url(employee_id);
        let client = self.client.clone();
        self.gateway
            .call_or_default(
                &self.operation,
                || async move {
                    let response = client.get(url).send().await?.error_for_status()?;
                    response.json::<EmployeeResponse>().await
                },
                EmployeeResponse::anonymous(),
            )
            .await
    }
}

/// 处理员工处分事件，消息体为员工ID
pub struct DisciplineHandler {
    directory: EmployeeDirectory,
}

impl DisciplineHandler {
    pub fn new(directory: EmployeeDirectory) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl MessageHandler for DisciplineHandler {
    async fn handle(&self, message: &Message) -> Result<(), HandlerFailure> {
        let employee_id = message
            .text()
            .map(str::trim)
            .filter(|id| !id.is_empty() && !matches!(*id, "." | ".."))
            .ok_or_else(|| HandlerFailure::invalid_payload("消息体不是有效的员工ID"))?;

        let employee = self
            .directory
            .lookup(employee_id)
            .await
            .map_err(HandlerFailure::from)?;

        info!(
            employee_id = employee_id,
            "Employee {} has been disciplined.",
            employee.full_name()
        );
        Ok(())
    }
}

/// 只记录收到的消息
pub struct LoggingHandler;

#[async_trait]
impl MessageHandler for LoggingHandler {
    async fn handle(&self, message: &Message) -> Result<(), HandlerFailure> {
        let body = message
            .text()
            .ok_or_else(|| HandlerFailure::invalid_payload("消息体不是UTF-8文本"))?;
        info!(
            topic = %message.topic,
            attempt = message.attempt,
            "收到消息: {}",
            body
        );
        Ok(())
    }
}
