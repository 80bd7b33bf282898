use serde::{Deserialize, Serialize};

use crate::validation::{ConfigValidator, ValidationUtils};

/// Settings for the notification service's employee lookups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Topic carrying ids of employees that were disciplined.
    pub discipline_topic: String,
    /// Base URL of the employee query endpoint; the employee id is appended.
    pub employee_service_url: String,
    /// Breaker operation name used for the lookup.
    pub lookup_operation: String,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            discipline_topic: "employee-disciplined".to_string(),
            employee_service_url: "http://localhost:9002/api/v1/employees".to_string(),
            lookup_operation: "getEmployee".to_string(),
        }
    }
}

impl ConfigValidator for NotificationConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_lane_name(&self.discipline_topic, "notification.discipline_topic")?;
        ValidationUtils::validate_not_empty(
            &self.employee_service_url,
            "notification.employee_service_url",
        )?;
        if !self.employee_service_url.starts_with("http://")
            && !self.employee_service_url.starts_with("https://")
        {
            return Err(crate::ConfigError::Validation(format!(
                "notification.employee_service_url must be an http(s) URL: {}",
                self.employee_service_url
            )));
        }
        ValidationUtils::validate_not_empty(&self.lookup_operation, "notification.lookup_operation")
    }
}
