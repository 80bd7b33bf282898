use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;
use crate::validation::{ConfigValidator, ValidationUtils};

/// One consuming listener: a topic lane, its consumer group and its retry policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListenerConfig {
    pub topic: String,
    #[serde(default)]
    pub consumer_group: Option<String>,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Workers per retry tier; falls back to `concurrency` when unset.
    #[serde(default)]
    pub retry_concurrency: Option<usize>,
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_concurrency() -> usize {
    1
}

impl ListenerConfig {
    pub fn new<S: Into<String>>(topic: S) -> Self {
        Self {
            topic: topic.into(),
            consumer_group: None,
            concurrency: default_concurrency(),
            retry_concurrency: None,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_consumer_group<S: Into<String>>(mut self, group: S) -> Self {
        self.consumer_group = Some(group.into());
        self
    }

    pub fn group_name(&self) -> String {
        self.consumer_group
            .clone()
            .unwrap_or_else(|| format!("{}-group", self.topic))
    }

    pub fn retry_workers(&self) -> usize {
        self.retry_concurrency.unwrap_or(self.concurrency)
    }
}

impl ConfigValidator for ListenerConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_lane_name(&self.topic, "listener.topic")?;
        if let Some(group) = &self.consumer_group {
            ValidationUtils::validate_not_empty(group, "listener.consumer_group")?;
        }
        ValidationUtils::validate_count(self.concurrency, "listener.concurrency")?;
        if let Some(retry_concurrency) = self.retry_concurrency {
            ValidationUtils::validate_count(retry_concurrency, "listener.retry_concurrency")?;
        }
        self.retry.validate()
    }
}
