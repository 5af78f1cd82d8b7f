use crate::error::SdnError;
use std::time::Duration;

#[tokio::test]
async fn test_join_error_conversion() {
    async fn task_that_panics() -> Result<(), &'static str> {
        panic!("test panic");
    }

    async fn test_function() -> Result<(), SdnError> {
        let handle = tokio::spawn(task_that_panics());
        let _result = handle.await?;
        Ok(())
    }

    match test_function().await {
        Err(SdnError::Internal { message }) => assert!(message.contains("Task panicked")),
        other => panic!("Expected Internal error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_timeout_error_conversion() {
    async fn test_function() -> Result<(), SdnError> {
        tokio::time::timeout(
            Duration::from_millis(1),
            tokio::time::sleep(Duration::from_secs(1)),
        )
        .await?;
        Ok(())
    }

    let result = test_function().await;
    assert!(matches!(result, Err(SdnError::Timeout { .. })));
}

#[test]
fn test_retryable_classification() {
    assert!(SdnError::store_unavailable("mastership").is_retryable());
    assert!(SdnError::timeout("request_role", Duration::from_secs(3)).is_retryable());
    assert!(!SdnError::invalid_operation("demote", "node is master").is_retryable());
    assert!(!SdnError::StaleTerm {
        device_id: "of:1".into(),
        presented: 1,
        current: 2,
    }
    .is_retryable());
}

#[test]
fn test_display_includes_context() {
    let err = SdnError::invalid_config("events.queue_capacity", 0, "must be positive");
    let msg = err.to_string();
    assert!(msg.contains("events.queue_capacity"));
    assert!(msg.contains("must be positive"));
}
