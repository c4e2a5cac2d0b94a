//! Session registry behavior.

mod common;

use std::sync::Arc;

use common::MockHelper;
use fsbridge::protocol::{AttributeSet, FileAttribute};
use fsbridge::{BridgeError, SessionManager};

fn manager(mock: &MockHelper) -> SessionManager {
    SessionManager::new(mock.bridge_config())
}

async fn pid(manager: &SessionManager, user: &str) -> u32 {
    manager
        .with_session(user, |session| Ok(session.pid()))
        .await
        .unwrap()
}

// ============================================================================
// Session reuse
// ============================================================================

mod reuse {
    use super::*;

    #[tokio::test]
    async fn test_session_opened_once_per_user() {
        let mock = MockHelper::new();
        let manager = manager(&mock);

        let first = pid(&manager, "alice#cloud").await;
        let second = pid(&manager, "alice#cloud").await;
        assert_eq!(first, second);

        let bob = pid(&manager, "bob#cloud").await;
        assert_ne!(first, bob);
        assert_eq!(manager.active_users(), vec!["alice#cloud", "bob#cloud"]);
    }

    #[tokio::test]
    async fn test_unknown_user() {
        let mock = MockHelper::new();
        let manager = manager(&mock);
        let result = manager.with_session("mallory#cloud", |_| Ok(())).await;
        assert!(matches!(result, Err(BridgeError::UnknownUser(_))));
        assert!(manager.active_users().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_users() {
        let mock = MockHelper::new();
        let manager = Arc::new(manager(&mock));

        let mut handles = Vec::new();
        for user in ["alice#cloud", "bob#cloud", "alice#cloud", "bob#cloud"] {
            let manager = Arc::clone(&manager);
            handles.push(tokio::spawn(async move {
                manager
                    .with_fs(user, |fs| {
                        fs.list_directory(
                            "/home/alice",
                            AttributeSet::from([FileAttribute::FileType, FileAttribute::Size]),
                        )
                    })
                    .await
            }));
        }
        for handle in handles {
            let result = handle.await.unwrap().unwrap();
            assert_eq!(result.value.len(), 3);
        }
        assert_eq!(manager.active_users().len(), 2);
    }
}

// ============================================================================
// Recovery
// ============================================================================

mod recovery {
    use super::*;

    #[tokio::test]
    async fn test_crashed_helper_is_replaced() {
        let mock = MockHelper::new();
        let manager = manager(&mock);
        let before = pid(&manager, "alice#cloud").await;

        let result = manager
            .with_fs("alice#cloud", |fs| {
                fs.stat("/home/alice/crash", AttributeSet::from([FileAttribute::FileType]))
            })
            .await;
        assert!(result.unwrap_err().is_fatal());

        let after = pid(&manager, "alice#cloud").await;
        assert_ne!(before, after);
    }

    #[tokio::test]
    async fn test_non_fatal_error_keeps_session() {
        let mock = MockHelper::new();
        let manager = manager(&mock);
        let before = pid(&manager, "alice#cloud").await;

        let result = manager
            .with_fs("alice#cloud", |fs| fs.write("data\n".as_bytes()))
            .await;
        assert!(matches!(result, Err(BridgeError::MissingCacheEntry(_))));

        assert_eq!(pid(&manager, "alice#cloud").await, before);
    }

    #[tokio::test]
    async fn test_panic_is_reported_as_worker_error() {
        let mock = MockHelper::new();
        let manager = manager(&mock);
        let before = pid(&manager, "alice#cloud").await;

        let result: fsbridge::Result<()> = manager
            .with_session("alice#cloud", |_| panic!("handler failed"))
            .await;
        assert!(matches!(result, Err(BridgeError::Worker(_))));

        assert_eq!(pid(&manager, "alice#cloud").await, before);
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

mod lifecycle {
    use super::*;

    #[tokio::test]
    async fn test_logout() {
        let mock = MockHelper::new();
        let manager = manager(&mock);
        pid(&manager, "alice#cloud").await;

        assert!(manager.logout("alice#cloud").await);
        assert!(!manager.logout("alice#cloud").await);
        assert!(manager.active_users().is_empty());
    }

    #[tokio::test]
    async fn test_reap_idle_sessions() {
        let mock = MockHelper::new();
        let mut config = mock.bridge_config();
        config.sessions.idle_timeout_secs = 0;
        let manager = SessionManager::new(config);

        pid(&manager, "alice#cloud").await;
        pid(&manager, "bob#cloud").await;
        assert_eq!(manager.reap_idle().await, 2);
        assert!(manager.active_users().is_empty());
    }

    #[tokio::test]
    async fn test_reap_after_panicking_handler() {
        let mock = MockHelper::new();
        let mut config = mock.bridge_config();
        config.sessions.idle_timeout_secs = 0;
        let manager = SessionManager::new(config);

        let result: fsbridge::Result<()> = manager
            .with_session("alice#cloud", |_| panic!("handler failed"))
            .await;
        assert!(matches!(result, Err(BridgeError::Worker(_))));
        assert_eq!(manager.active_users(), vec!["alice#cloud"]);

        assert_eq!(manager.reap_idle().await, 1);
        assert!(manager.active_users().is_empty());
    }

    #[tokio::test]
    async fn test_panic_does_not_pin_session_for_reaper() {
        let mock = MockHelper::new();
        let mut config = mock.bridge_config();
        config.sessions.idle_timeout_secs = 0;
        let manager = SessionManager::new(config);

        pid(&manager, "alice#cloud").await;
        let _: fsbridge::Result<()> = manager
            .with_session("alice#cloud", |_| panic!("handler failed"))
            .await;
        pid(&manager, "alice#cloud").await;

        assert_eq!(manager.reap_idle().await, 1);
    }

    #[tokio::test]
    async fn test_recent_sessions_survive_reaping() {
        let mock = MockHelper::new();
        let manager = manager(&mock);
        pid(&manager, "alice#cloud").await;
        assert_eq!(manager.reap_idle().await, 0);
        assert_eq!(manager.active_users(), vec!["alice#cloud"]);
    }

    #[tokio::test]
    async fn test_shutdown_closes_everything() {
        let mock = MockHelper::new();
        let manager = manager(&mock);
        pid(&manager, "alice#cloud").await;
        pid(&manager, "bob#cloud").await;

        assert_eq!(manager.shutdown().await, 2);
        assert!(manager.active_users().is_empty());
        assert_eq!(manager.shutdown().await, 0);
    }
}

// ============================================================================
// Ownership
// ============================================================================

mod ownership {
    use super::*;

    #[tokio::test]
    async fn test_owner_of_uses_shared_cache() {
        let mock = MockHelper::new();
        let manager = manager(&mock);

        let owner = manager
            .owner_of("alice#cloud", "/home/bob/docs/report.txt")
            .await
            .unwrap();
        assert_eq!(owner.as_deref(), Some("bob#cloud"));

        let owner = manager.owner_of("bob#cloud", "/home/bob/x").await.unwrap();
        assert_eq!(owner.as_deref(), Some("bob#cloud"));
        assert_eq!(manager.ownership().len(), 1);
        assert_eq!(
            manager.ownership().cached("bob").as_deref(),
            Some("bob#cloud")
        );
    }
}
