use gattpool::core::session::{Session, TransitionError};
use gattpool::{GattPoolError, GattPoolResult, GattResponseDecoder, ToolConfig};
use std::error::Error;
use std::sync::Arc;

/// Error handling and resilience tests
#[cfg(test)]
mod error_handling_tests {
    use super::*;

    #[test]
    fn test_error_types() {
        let errors = vec![
            GattPoolError::Config { message: "Config error".to_string() },
            GattPoolError::AlreadyInitialized,
            GattPoolError::SessionNotHeld(2),
            GattPoolError::ConnectFailed { address: "AA:BB:CC:DD:EE:FF".to_string() },
            GattPoolError::InvalidInput("Invalid input".to_string()),
            GattPoolError::Timeout,
            GattPoolError::Output("Output error".to_string()),
        ];

        for error in errors {
            assert!(!error.to_string().is_empty(), "Error display should not be empty");
            assert!(!error.is_retryable());
        }

        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<GattPoolError>();
    }

    #[test]
    fn test_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let error: GattPoolError = io_error.into();
        assert!(matches!(error, GattPoolError::Io(_)));

        let error: GattPoolError = TransitionError::NotConnected.into();
        assert!(error.to_string().contains("Command rejected"));
    }

    #[test]
    fn test_retry_classification() {
        use gattpool::Status;

        let in_flight: GattPoolError = TransitionError::CommandInFlight { current: Status::SetMtu }.into();
        assert!(in_flight.is_retryable());

        let wrong_order: GattPoolError = TransitionError::InvalidOrder {
            operation: "connect",
            current: Status::Connected,
        }
        .into();
        assert!(!wrong_order.is_retryable());
    }

    #[test]
    fn test_error_sources() {
        let write_failure = GattPoolError::CommandWrite(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "closed",
        ));
        assert!(write_failure.source().is_some());

        let spawn_failure = GattPoolError::Spawn {
            program: "gatttool".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        assert!(spawn_failure.to_string().contains("gatttool"));
        assert!(spawn_failure.source().is_some());
    }

    #[tokio::test]
    async fn test_unheld_session_rejects_commands() {
        let session = Session::spawn(0, &ToolConfig::new("cat", Vec::new()), Arc::new(GattResponseDecoder)).unwrap();

        let result: GattPoolResult<()> = session.connect("AA:BB:CC:DD:EE:FF", "").await;
        assert!(matches!(result, Err(GattPoolError::SessionNotHeld(0))));

        session.shutdown().await;
    }
}
