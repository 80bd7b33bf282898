#[cfg(test)]
mod error_tests {
    use crate::*;

    #[test]
    fn test_courier_error_display() {
        let lane_error = CourierError::Lane("lane closed".to_string());
        assert_eq!(lane_error.to_string(), "消息通道错误: lane closed");

        let fallback = CourierError::fallback("getEmployee", "no default");
        assert_eq!(fallback.to_string(), "降级处理失败: getEmployee - no default");

        let validation = CourierError::validation_error("max_attempts must be at least 1");
        assert_eq!(
            validation.to_string(),
            "数据验证失败: max_attempts must be at least 1"
        );

        let handler = CourierError::from(HandlerFailure::transient("broker unavailable"));
        assert_eq!(
            handler.to_string(),
            "消息处理失败: transient: broker unavailable"
        );
    }

    #[test]
    fn test_failure_kind_mapping() {
        let scenarios = vec![
            (CourierError::Lane("x".to_string()), FailureKind::Transient),
            (
                CourierError::Serialization("x".to_string()),
                FailureKind::InvalidPayload,
            ),
            (
                CourierError::ValidationError("x".to_string()),
                FailureKind::InvalidPayload,
            ),
            (CourierError::fallback("op", "x"), FailureKind::Runtime),
            (
                CourierError::Configuration("x".to_string()),
                FailureKind::Runtime,
            ),
            (
                CourierError::Handler(HandlerFailure::rejected("x")),
                FailureKind::Rejected,
            ),
        ];

        for (error, expected) in scenarios {
            assert_eq!(error.failure_kind(), expected, "{error}");
        }
    }

    #[test]
    fn test_error_converts_to_handler_failure() {
        let failure: HandlerFailure = CourierError::Lane("gone".to_string()).into();
        assert_eq!(failure.kind, FailureKind::Transient);
        assert!(failure.reason.contains("gone"));

        let original = HandlerFailure::rejected("duplicate order");
        let unwrapped: HandlerFailure = CourierError::Handler(original.clone()).into();
        assert_eq!(unwrapped, original);
    }

    #[test]
    fn test_serde_json_error_is_serialization() {
        let err = serde_json::from_str::<FailureKind>("not json").unwrap_err();
        let courier: CourierError = err.into();
        assert!(matches!(courier, CourierError::Serialization(_)));
        assert_eq!(courier.failure_kind(), FailureKind::InvalidPayload);
    }

    #[test]
    fn test_failure_kind_serde_names() {
        let json = serde_json::to_string(&FailureKind::InvalidPayload).unwrap();
        assert_eq!(json, "\"invalid_payload\"");
        let parsed: FailureKind = serde_json::from_str("\"transient\"").unwrap();
        assert_eq!(parsed, FailureKind::Transient);

        for kind in FailureKind::ALL {
            assert_eq!(format!("\"{kind}\""), serde_json::to_string(&kind).unwrap());
        }
    }

    #[test]
    fn test_default_retryable_kinds() {
        let retryable = FailureKind::default_retryable();
        assert!(retryable.contains(&FailureKind::Transient));
        assert!(retryable.contains(&FailureKind::Runtime));
        assert!(retryable.contains(&FailureKind::Timeout));
        assert!(!retryable.contains(&FailureKind::InvalidPayload));
        assert!(!retryable.contains(&FailureKind::Unhandled));
    }

    #[test]
    fn test_error_chain_compatibility() {
        let result: Result<(), CourierError> = Err(CourierError::lane_error("lane closed"));
        let anyhow_result: Result<(), anyhow::Error> = result.map_err(|e| e.into());
        assert!(anyhow_result
            .expect_err("Should be Err")
            .to_string()
            .contains("消息通道错误"));
    }
}
