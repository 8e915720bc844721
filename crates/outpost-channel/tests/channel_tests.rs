// SPDX-FileCopyrightText: 2026 Outpost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Lifecycle and recovery tests for the channel manager, on paused time.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use outpost_channel::ChannelManager;
use outpost_config::model::ChannelConfig;
use outpost_core::{
    ChannelEvent, ConnectionState, CredentialStore, DeliveryChannel, DriverFactory, OutpostError,
    RecoveryListener, SessionHealth,
};
use outpost_test_utils::{MockCredentialStore, MockDriverFactory};

struct Fixture {
    manager: Arc<ChannelManager>,
    factory: Arc<MockDriverFactory>,
    credentials: Arc<MockCredentialStore>,
}

fn fixture() -> Fixture {
    fixture_with(ChannelConfig::default(), MockDriverFactory::new())
}

fn fixture_with(config: ChannelConfig, factory: MockDriverFactory) -> Fixture {
    let factory = Arc::new(factory);
    let credentials = Arc::new(MockCredentialStore::paired());
    let manager = ChannelManager::new(
        config,
        Arc::clone(&factory) as Arc<dyn DriverFactory>,
        Arc::clone(&credentials) as Arc<dyn CredentialStore>,
    );
    Fixture {
        manager,
        factory,
        credentials,
    }
}

async fn wait_for(manager: &ChannelManager, state: ConnectionState) {
    let mut rx = manager.subscribe_state();
    tokio::time::timeout(Duration::from_secs(600), rx.wait_for(|s| *s == state))
        .await
        .unwrap_or_else(|_| panic!("channel never reached {state}"))
        .unwrap();
}

/// Lets the event pump drain without moving the clock.
async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

async fn connected() -> Fixture {
    let f = fixture();
    f.manager.connect().await.unwrap();
    wait_for(&f.manager, ConnectionState::Ready).await;
    f
}

#[derive(Default)]
struct CountingListener(AtomicUsize);

#[async_trait]
impl RecoveryListener for CountingListener {
    async fn on_recovered(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test(start_paused = true)]
async fn connect_reaches_ready_and_exposes_a_handle() {
    let f = fixture();
    assert!(!f.manager.is_ready());
    assert!(f.manager.delivery_handle().is_none());

    f.manager.connect().await.unwrap();
    wait_for(&f.manager, ConnectionState::Ready).await;

    let status = f.manager.status();
    assert!(status.is_ready);
    assert_eq!(status.generation, 1);
    assert!(!status.recovering);

    let driver = f.factory.latest().unwrap();
    driver.mark_unregistered("999@c.us");
    let handle = f.manager.delivery_handle().unwrap();
    assert!(handle.validate_recipient("6281234567890@c.us").await.unwrap());
    assert!(!handle.validate_recipient("999@c.us").await.unwrap());
    let receipt = handle.send("6281234567890@c.us", "hi").await.unwrap();
    assert_eq!(receipt.0, "mock-receipt-1");
    assert_eq!(driver.sent().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn connect_while_ready_is_a_no_op() {
    let f = connected().await;
    f.manager.connect().await.unwrap();
    settle().await;
    assert_eq!(f.factory.created_count(), 1);
    assert_eq!(f.manager.state(), ConnectionState::Ready);
}

#[tokio::test(start_paused = true)]
async fn auth_failure_purges_and_reconnects_after_delay() {
    let f = connected().await;
    let listener = Arc::new(CountingListener::default());
    f.manager.add_listener(Arc::clone(&listener) as Arc<dyn RecoveryListener>);
    let first = f.factory.driver(0).unwrap();

    first.emit(ChannelEvent::AuthFailure {
        reason: "session expired".into(),
    });
    wait_for(&f.manager, ConnectionState::Recovering).await;
    assert!(f.manager.is_recovering());
    assert_eq!(f.credentials.purge_count(), 1);
    assert!(first.is_shut_down());
    assert!(!f.manager.is_ready());

    // The torn-down session is fenced off; its events change nothing.
    first.emit(ChannelEvent::AuthFailure {
        reason: "session expired".into(),
    });
    settle().await;
    assert_eq!(f.credentials.purge_count(), 1);
    assert_eq!(f.manager.state(), ConnectionState::Recovering);

    tokio::time::sleep(Duration::from_millis(9_500)).await;
    assert_eq!(f.factory.created_count(), 1);

    tokio::time::sleep(Duration::from_secs(1)).await;
    wait_for(&f.manager, ConnectionState::Ready).await;
    assert_eq!(f.factory.created_count(), 2);
    assert!(!f.manager.is_recovering());
    assert_eq!(listener.0.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn recoverable_disconnect_keeps_credentials() {
    let f = connected().await;
    f.factory.driver(0).unwrap().emit(ChannelEvent::Disconnected {
        reason: "NAVIGATION".into(),
    });
    wait_for(&f.manager, ConnectionState::Recovering).await;
    assert_eq!(f.credentials.purge_count(), 0);

    tokio::time::sleep(Duration::from_millis(2_500)).await;
    assert_eq!(f.factory.created_count(), 1);

    wait_for(&f.manager, ConnectionState::Ready).await;
    assert_eq!(f.factory.created_count(), 2);
    assert_eq!(f.manager.status().generation, 2);
}

#[tokio::test(start_paused = true)]
async fn failure_from_new_session_during_recovery_is_deferred() {
    let f = connected().await;
    let listener = Arc::new(CountingListener::default());
    f.manager.add_listener(Arc::clone(&listener) as Arc<dyn RecoveryListener>);
    f.factory.set_init_delay(Duration::from_millis(500));
    f.factory.emit_on_next_init(ChannelEvent::AuthFailure {
        reason: "restore failed".into(),
    });

    f.factory.driver(0).unwrap().emit(ChannelEvent::Disconnected {
        reason: "NAVIGATION".into(),
    });
    wait_for(&f.manager, ConnectionState::Recovering).await;

    // The first attempt's session fails while it is still initializing.
    tokio::time::sleep(Duration::from_millis(3_600)).await;
    assert_eq!(f.factory.created_count(), 2);
    assert!(f.factory.driver(1).unwrap().is_shut_down());
    assert!(f.manager.is_recovering());
    assert_eq!(f.manager.state(), ConnectionState::Recovering);
    assert_eq!(f.credentials.purge_count(), 0);
    assert_eq!(listener.0.load(Ordering::SeqCst), 0);
    let reason = f.manager.status().last_reason.unwrap_or_default();
    assert!(reason.contains("restore failed"), "got: {reason}");

    tokio::time::sleep(Duration::from_secs(32)).await;
    assert_eq!(f.manager.state(), ConnectionState::Ready);
    assert_eq!(f.factory.created_count(), 3);
    assert_eq!(f.manager.status().generation, 3);
    assert!(!f.manager.is_recovering());
    assert_eq!(listener.0.load(Ordering::SeqCst), 1);
    assert_eq!(f.credentials.purge_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn connect_during_recovery_teardown_is_ignored() {
    let f = fixture();
    f.factory.set_shutdown_delay(Duration::from_secs(1));
    f.manager.connect().await.unwrap();
    wait_for(&f.manager, ConnectionState::Ready).await;

    f.factory.driver(0).unwrap().emit(ChannelEvent::Disconnected {
        reason: "NAVIGATION".into(),
    });
    wait_for(&f.manager, ConnectionState::Disconnected).await;
    assert!(f.manager.is_recovering());

    f.manager.connect().await.unwrap();
    settle().await;
    assert_eq!(f.factory.created_count(), 1);

    wait_for(&f.manager, ConnectionState::Recovering).await;
    wait_for(&f.manager, ConnectionState::Ready).await;
    assert_eq!(f.factory.created_count(), 2);
    assert_eq!(f.manager.status().generation, 2);
    assert!(!f.manager.is_recovering());
}

#[tokio::test(start_paused = true)]
async fn logout_disconnect_purges_credentials() {
    let f = connected().await;
    f.factory.driver(0).unwrap().emit(ChannelEvent::Disconnected {
        reason: "LOGOUT".into(),
    });
    wait_for(&f.manager, ConnectionState::Recovering).await;
    assert_eq!(f.credentials.purge_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn unknown_disconnect_waits_for_operator() {
    let f = connected().await;
    f.factory.driver(0).unwrap().emit(ChannelEvent::Disconnected {
        reason: "REPLACED_ELSEWHERE".into(),
    });
    wait_for(&f.manager, ConnectionState::Disconnected).await;

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(f.factory.created_count(), 1);
    assert!(!f.manager.is_recovering());
    assert_eq!(
        f.manager.status().last_reason.as_deref(),
        Some("REPLACED_ELSEWHERE")
    );

    f.manager.connect().await.unwrap();
    wait_for(&f.manager, ConnectionState::Ready).await;
    assert_eq!(f.factory.created_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn exhausted_recovery_fails_until_reset() {
    let f = connected().await;
    f.factory.fail_next_inits(2);
    f.factory.driver(0).unwrap().emit(ChannelEvent::Disconnected {
        reason: "CONFLICT".into(),
    });

    wait_for(&f.manager, ConnectionState::Failed).await;
    assert_eq!(f.factory.created_count(), 3);
    assert!(!f.manager.is_recovering());

    let err = f.manager.connect().await.unwrap_err();
    assert!(matches!(err, OutpostError::NotReady(_)));

    f.manager.reset().await.unwrap();
    wait_for(&f.manager, ConnectionState::Ready).await;
    assert_eq!(f.factory.created_count(), 4);
    assert_eq!(f.credentials.purge_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_connect_leaves_error_state() {
    let f = fixture();
    f.factory.fail_next_inits(1);

    assert!(f.manager.connect().await.is_err());
    assert_eq!(f.manager.state(), ConnectionState::Error);
    assert!(f.factory.driver(0).unwrap().is_shut_down());

    f.manager.connect().await.unwrap();
    wait_for(&f.manager, ConnectionState::Ready).await;
}

#[tokio::test(start_paused = true)]
async fn unhealthy_probe_triggers_recovery() {
    let f = connected().await;
    let first = f.factory.driver(0).unwrap();
    first.set_health(Ok(SessionHealth::Unpaired));

    tokio::time::sleep(Duration::from_secs(121)).await;
    assert_eq!(first.probe_count(), 1);
    assert_eq!(f.manager.state(), ConnectionState::Recovering);
    assert_eq!(f.credentials.purge_count(), 1);

    wait_for(&f.manager, ConnectionState::Ready).await;
    assert_eq!(f.factory.created_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn unrecognised_probe_error_is_tolerated() {
    let f = connected().await;
    let first = f.factory.driver(0).unwrap();
    first.set_health(Err("Cannot read properties of undefined".into()));

    tokio::time::sleep(Duration::from_secs(250)).await;
    assert_eq!(first.probe_count(), 2);
    assert_eq!(f.manager.state(), ConnectionState::Ready);
    assert_eq!(f.factory.created_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn pairing_code_is_reported_until_authenticated() {
    let f = fixture();
    f.factory.set_auto_ready(false);
    f.manager.connect().await.unwrap();
    assert_eq!(f.manager.state(), ConnectionState::Initializing);

    let driver = f.factory.latest().unwrap();
    driver.emit(ChannelEvent::PairingRequired {
        code: "2@pairing-payload".into(),
    });
    settle().await;
    let status = f.manager.status();
    assert!(status.pairing_pending);
    assert_eq!(status.pairing_code.as_deref(), Some("2@pairing-payload"));

    driver.emit(ChannelEvent::Authenticated);
    wait_for(&f.manager, ConnectionState::Ready).await;
    assert!(!f.manager.status().pairing_pending);
}

#[tokio::test(start_paused = true)]
async fn shutdown_tears_down_and_refuses_connect() {
    let f = connected().await;
    f.manager.shutdown().await;

    assert_eq!(f.manager.state(), ConnectionState::Idle);
    assert!(f.factory.driver(0).unwrap().is_shut_down());
    assert!(f.manager.delivery_handle().is_none());
    assert!(f.manager.connect().await.is_err());
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_pending_recovery() {
    let f = connected().await;
    f.factory.driver(0).unwrap().emit(ChannelEvent::Disconnected {
        reason: "TIMEOUT".into(),
    });
    wait_for(&f.manager, ConnectionState::Recovering).await;

    f.manager.shutdown().await;
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(f.factory.created_count(), 1);
    assert_eq!(f.manager.state(), ConnectionState::Idle);
}
