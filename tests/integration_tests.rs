use gattpool::{ChannelListener, GattEvent, GattPoolError, SessionPool, Status, ToolConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

const ADDR: &str = "AA:BB:CC:DD:EE:FF";

/// Answers like gatttool for connect, primary and disconnect
const SCRIPTED_TOOL: &str = r#"
while read cmd rest; do
  case "$cmd" in
    connect) echo "[CON][AA:BB:CC:DD:EE:FF][LE]>" ;;
    primary)
      echo "PRIMARY-ALL: AA:BB:CC:DD:EE:FF 0x0001 0x0005 1800"
      echo "PRIMARY-ALL: AA:BB:CC:DD:EE:FF 0x0006 0x0009 180f"
      echo "PRIMARY-ALL-END: AA:BB:CC:DD:EE:FF 0" ;;
    disconnect) echo "[   ][AA:BB:CC:DD:EE:FF][LE]>" ;;
  esac
done
"#;

fn sh(script: &str) -> ToolConfig {
    ToolConfig::new("sh", vec!["-c".to_string(), script.to_string()])
}

async fn next_event(events: &mut UnboundedReceiver<GattEvent>) -> GattEvent {
    timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("no event in time")
        .expect("listener channel closed")
}

async fn wait_for(session: &gattpool::Session, status: Status) {
    timeout(Duration::from_secs(5), async {
        while session.status().await != status {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("session never reached {}", status));
}

/// Integration tests for the GattPool library
#[cfg(test)]
mod integration_tests {
    use super::*;

    #[tokio::test]
    async fn test_pool_capacity_and_reuse() {
        let pool = SessionPool::new(ToolConfig::new("cat", Vec::new()));
        pool.initialize(2).await.unwrap();

        let first = pool.acquire().await.expect("first session");
        let _second = pool.acquire().await.expect("second session");
        assert!(pool.acquire().await.is_none());

        pool.release(&first).await;
        assert!(pool.acquire().await.is_some());

        pool.shutdown().await;
        assert!(pool.acquire().await.is_none());
    }

    #[tokio::test]
    async fn test_discovery_round_trip() {
        let pool = SessionPool::new(sh(SCRIPTED_TOOL));
        pool.initialize(1).await.unwrap();
        let session = pool.acquire().await.unwrap();

        let (listener, mut events) = ChannelListener::new();
        session.set_listener(Arc::new(listener)).await;

        session.connect(ADDR, "").await.unwrap();
        assert_eq!(session.status().await, Status::Connecting);
        wait_for(&session, Status::Connected).await;
        assert_eq!(session.last_address().await.as_deref(), Some(ADDR));

        session.primary_discovery().await.unwrap();
        let mut services = Vec::new();
        loop {
            match next_event(&mut events).await {
                GattEvent::PrimaryAll { start, end, uuid, .. } => services.push((start, end, uuid)),
                GattEvent::PrimaryAllEnd { status, .. } => {
                    assert_eq!(status, 0);
                    break;
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert_eq!(services.len(), 2);
        assert_eq!(services[1].2.to_string(), "0000180f-0000-1000-8000-00805f9b34fb");
        wait_for(&session, Status::Connected).await;

        pool.release(&session).await;
        wait_for(&session, Status::Idle).await;
        assert!(!session.is_busy().await);

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_second_connect_is_retryable() {
        let pool = SessionPool::new(ToolConfig::new("cat", Vec::new()));
        pool.initialize(1).await.unwrap();
        let session = pool.acquire().await.unwrap();

        session.connect(ADDR, "public").await.unwrap();
        let err = session.connect(ADDR, "public").await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(session.status().await, Status::Connecting);

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_spawn_failure_propagates() {
        let pool = SessionPool::new(ToolConfig::new("/nonexistent/gatttool-for-tests", Vec::new()));
        let err = pool.initialize(2).await.unwrap_err();
        assert!(matches!(err, GattPoolError::Spawn { .. }));
        assert_eq!(pool.size().await, 0);
    }

    #[tokio::test]
    async fn test_tool_exit_code_is_reported() {
        let pool = SessionPool::new(sh("read line; exit 3"));
        pool.initialize(1).await.unwrap();
        let session = pool.acquire().await.unwrap();
        let (listener, mut events) = ChannelListener::new();
        session.set_listener(Arc::new(listener)).await;

        session.connect(ADDR, "").await.unwrap();
        assert_eq!(next_event(&mut events).await, GattEvent::ProcessExit { code: 3 });

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_output_closed_while_running() {
        let pool = SessionPool::new(sh("read line; exec >&- 2>&-; sleep 5"));
        pool.initialize(1).await.unwrap();
        let session = pool.acquire().await.unwrap();
        let (listener, mut events) = ChannelListener::new();
        session.set_listener(Arc::new(listener)).await;

        session.connect(ADDR, "").await.unwrap();
        assert_eq!(next_event(&mut events).await, GattEvent::ProcessStreamClosed);

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_summaries_serialize() {
        let pool = SessionPool::new(ToolConfig::new("cat", Vec::new()));
        pool.initialize(3).await.unwrap();
        let _held = pool.acquire().await.unwrap();

        let json = serde_json::to_value(pool.summaries().await).unwrap();
        let sessions = json.as_array().unwrap();
        assert_eq!(sessions.len(), 3);
        assert_eq!(sessions.iter().filter(|s| s["busy"] == true).count(), 1);
        assert_eq!(pool.busy_count().await, 1);

        pool.shutdown().await;
    }
}
