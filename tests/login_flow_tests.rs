//! Integration tests for the login flow
//!
//! These tests drive LoginFlow against a scripted platform API and verify:
//! - QR login from an empty vault through to the ready state
//! - Stored-account loading, with valid and expired sessions
//! - QR expiry, retry and stale poll results
//! - The four-way join firing exactly once per session
//! - Account switching, logout and clearing credentials, also while the
//!   post-login fetches of the previous session are still running

mod common;

use common::{FakeApi, Harness, QR_KEY, poll, poll_success, session};
use startlive::LoginPhase;
use startlive::login::PollState;
use startlive::services::api::{QR_EXPIRED, QR_NOT_CONFIRMED, QR_NOT_SCANNED};
use startlive::tasks::TaskKind;
use startlive::ui::{LoginHint, ViewEvent};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::Semaphore;

const WAIT: Duration = Duration::from_secs(5);

fn ready_count(h: &Harness) -> usize {
    h.presenter.count(|e| *e == ViewEvent::Ready)
}

#[test]
fn test_qr_login_scenario_reaches_ready() {
    let api = FakeApi::new()
        .with_polls([
            poll(QR_NOT_SCANNED),
            poll(QR_NOT_SCANNED),
            poll(QR_NOT_SCANNED),
            poll_success(session("42")),
        ])
        .with_user("42", "alice");
    let h = Harness::new(api);
    let flow = h.flow(true);

    flow.start(0, false);
    assert!(h.pump_until(WAIT, || flow.is_ready()), "never became ready");

    let scan = h.state.scan.snapshot();
    assert!(scan.scanned);
    assert_eq!(scan.qr_key.as_deref(), Some(QR_KEY));
    assert!(scan.area_updated && scan.room_updated && scan.announce_updated && scan.const_updated);

    // The captured bundle was persisted under its derived key.
    assert_eq!(h.store.list_accounts().unwrap(), vec!["cookies|42".to_string()]);
    let stored = h.store.read_bundle("cookies|42").unwrap().unwrap();
    assert_eq!(stored.get("SESSDATA"), Some("sess-42"));
    assert_eq!(h.state.cookies.snapshot(), session("42"));

    assert!(h.api.polls_served.load(Ordering::SeqCst) >= 4);
    assert_eq!(h.state.room.read(|r| r.room_id.clone()), "1001");
    assert_eq!(h.state.areas.read(|a| a.code_of("Terraria")), Some(86));
    assert_eq!(h.state.constants.read(|c| c.build.clone()), "9999");
    assert!(h.presenter.events().contains(&ViewEvent::QrReady {
        url: format!("https://passport.example/qr?key={QR_KEY}")
    }));

    h.pump_for(Duration::from_millis(100));
    assert_eq!(ready_count(&h), 1);
    assert_eq!(flow.current_account(), 0);
}

#[test]
fn test_not_scanned_stays_polling() {
    let h = Harness::new(FakeApi::new());
    let flow = h.flow(false);

    flow.start(0, false);
    assert!(h.pump_until(WAIT, || h.api.polls_served.load(Ordering::SeqCst) >= 3));

    assert_eq!(flow.phase(), LoginPhase::Polling(PollState::NotScanned));
    assert!(!h.state.scan.read(|s| s.scanned));
    assert!(h.scheduler.is_running(TaskKind::PollLogin));
    assert!(h.store.list_accounts().unwrap().is_empty());

    h.scheduler.stop_all();
    assert!(h.scheduler.run_until_idle(WAIT));
}

#[test]
fn test_unconfirmed_scan_updates_hint_only() {
    let api = FakeApi::new().with_polls([poll(QR_NOT_CONFIRMED), poll(QR_NOT_CONFIRMED)]);
    let h = Harness::new(api);
    let flow = h.flow(false);

    flow.start(0, false);
    assert!(h.pump_until(WAIT, || {
        flow.phase() == LoginPhase::Polling(PollState::ScannedUnconfirmed)
    }));
    assert!(h.state.scan.read(|s| s.wait_for_confirm));
    assert_eq!(
        h.presenter
            .count(|e| *e == ViewEvent::Hint(LoginHint::WaitingForConfirm)),
        1
    );

    h.scheduler.stop_all();
    assert!(h.scheduler.run_until_idle(WAIT));
}

#[test]
fn test_expired_qr_then_retry() {
    let api = FakeApi::new()
        .with_polls([poll(QR_NOT_SCANNED), poll(QR_EXPIRED)])
        .with_user("7", "bob");
    let h = Harness::new(api);
    let flow = h.flow(false);

    flow.start(0, false);
    assert!(h.pump_until(WAIT, || flow.phase() == LoginPhase::Expired));
    assert!(h.state.scan.read(|s| s.timeout));
    assert!(h.presenter.events().contains(&ViewEvent::Hint(LoginHint::QrExpired)));
    // Expiry is terminal until a retry.
    assert!(h.pump_until(WAIT, || !h.scheduler.is_running(TaskKind::PollLogin)));

    h.api.push_polls([poll_success(session("7"))]);
    assert!(flow.retry());
    assert!(!h.state.scan.read(|s| s.timeout));

    assert!(h.pump_until(WAIT, || flow.is_ready()));
    assert_eq!(h.api.qr_generated.load(Ordering::SeqCst), 2);
    assert_eq!(h.store.list_accounts().unwrap(), vec!["cookies|7".to_string()]);
}

#[test]
fn test_retry_while_polling_discards_old_poller() {
    let h = Harness::new(FakeApi::new());
    let flow = h.flow(false);

    flow.start(0, false);
    assert!(h.pump_until(WAIT, || {
        flow.phase() == LoginPhase::Polling(PollState::NotScanned)
    }));

    assert!(flow.retry());
    // The replacement poller starts once the old one has wound down.
    assert!(h.pump_until(WAIT, || {
        h.scheduler.is_running(TaskKind::PollLogin)
            && h.state.scan.read(|s| s.qr_key.is_some())
            && flow.phase() == LoginPhase::Polling(PollState::NotScanned)
    }));
    assert_eq!(h.api.qr_generated.load(Ordering::SeqCst), 2);
    assert!(
        h.scheduler.metrics().tasks_stopped.load(Ordering::Relaxed) >= 1,
        "old poller was not reported as stopped"
    );

    h.scheduler.stop_all();
    assert!(h.scheduler.run_until_idle(WAIT));
}

#[test]
fn test_stored_account_skips_qr() {
    let h = Harness::new(FakeApi::new().with_user("42", "alice").with_user("43", "carol"));
    h.seed_account("42");
    h.seed_account("43");
    let flow = h.flow(true);

    flow.start(0, false);
    assert!(h.pump_until(WAIT, || flow.is_ready()));

    assert_eq!(h.api.qr_generated.load(Ordering::SeqCst), 0);
    assert_eq!(h.state.cookies.snapshot(), session("42"));
    assert!(h.pump_until(WAIT, || {
        !h.scheduler.is_running(TaskKind::FetchUsernames)
    }));
    let names = h.state.accounts.read(|a| {
        (a.display_name("cookies|42"), a.display_name("cookies|43"))
    });
    assert_eq!(names, ("alice (42)".to_string(), "carol (43)".to_string()));
}

#[test]
fn test_expired_stored_account_falls_back_to_qr() {
    let h = Harness::new(FakeApi::new());
    h.seed_account("42");
    let flow = h.flow(false);

    flow.start(0, false);
    assert!(h.pump_until(WAIT, || h.state.scan.read(|s| s.qr_url.is_some())));
    assert!(h.state.scan.read(|s| s.expired && s.cred_loaded && !s.scanned));
    assert!(h.presenter.count(|e| matches!(e, ViewEvent::QrReady { .. })) >= 1);

    h.scheduler.stop_all();
    assert!(h.scheduler.run_until_idle(WAIT));
}

#[test]
fn test_ready_fires_once_per_session() {
    let h = Harness::new(FakeApi::new().with_user("42", "alice"));
    h.seed_account("42");
    let flow = h.flow(false);

    flow.start(0, false);
    assert!(h.pump_until(WAIT, || flow.is_ready()));
    assert!(h.scheduler.run_until_idle(WAIT));
    assert_eq!(ready_count(&h), 1);

    // A new session may fire once more.
    flow.start(0, false);
    assert!(h.pump_until(WAIT, || ready_count(&h) == 2));
    assert!(h.scheduler.run_until_idle(WAIT));
    assert_eq!(ready_count(&h), 2);
}

#[test]
fn test_switch_account_is_refused_while_loading() {
    let gate = Arc::new(Semaphore::new(0));
    let api = FakeApi::new()
        .with_user("42", "alice")
        .with_user("43", "carol")
        .with_nav_gate(Arc::clone(&gate));
    let h = Harness::new(api);
    h.seed_account("42");
    h.seed_account("43");
    let flow = h.flow(false);

    flow.start(0, false);
    h.pump_for(Duration::from_millis(50));
    assert_eq!(flow.phase(), LoginPhase::LoadingCredentials);
    assert!(!flow.switch_account(1));

    gate.add_permits(100);
    assert!(h.pump_until(WAIT, || flow.is_ready()));

    assert!(flow.switch_account(1));
    assert_eq!(flow.current_account(), 1);
    assert!(h.pump_until(WAIT, || flow.is_ready()));
    assert_eq!(h.state.cookies.snapshot(), session("43"));
}

#[test]
fn test_logout_during_fan_out_reaches_ready_once() {
    let gate = Arc::new(Semaphore::new(0));
    let api = FakeApi::new()
        .with_user("1", "bob")
        .with_user("2", "carol")
        .with_room_gate(Arc::clone(&gate));
    let h = Harness::new(api);
    h.seed_account("1");
    h.seed_account("2");
    let flow = h.flow(false);

    flow.start(0, false);
    assert!(h.pump_until(WAIT, || {
        h.state.scan.read(|s| s.area_updated && s.announce_updated)
    }));
    assert_eq!(flow.phase(), LoginPhase::Confirmed);
    assert!(h.scheduler.is_running(TaskKind::FetchRoom));

    // Switching waits for the session to settle; logout does not.
    assert!(!flow.switch_account(1));
    assert_eq!(flow.logout().unwrap().as_deref(), Some("cookies|1"));
    let current = flow.session();

    assert!(h.pump_until(WAIT, || {
        h.state
            .scan
            .read(|s| s.scanned && s.area_updated && s.announce_updated)
    }));
    assert!(!h.state.scan.read(|s| s.room_updated));
    assert_eq!(h.api.room_calls.load(Ordering::SeqCst), 1);

    gate.add_permits(10);
    assert!(
        h.pump_until(WAIT, || flow.is_ready()),
        "session after logout never reached Ready"
    );
    h.pump_for(Duration::from_millis(200));
    assert!(h.scheduler.run_until_idle(WAIT));

    assert_eq!(ready_count(&h), 1);
    assert_eq!(flow.session(), current);
    assert_eq!(h.api.room_calls.load(Ordering::SeqCst), 2);
    assert_eq!(h.state.cookies.snapshot(), session("2"));
    assert_eq!(h.state.room.read(|r| r.room_id.clone()), "1001");
    assert_eq!(h.store.list_accounts().unwrap(), vec!["cookies|2".to_string()]);
}

#[test]
fn test_clear_during_fan_out_drops_stale_room() {
    let gate = Arc::new(Semaphore::new(0));
    let api = FakeApi::new()
        .with_user("1", "bob")
        .with_room_gate(Arc::clone(&gate));
    let h = Harness::new(api);
    h.seed_account("1");
    let flow = h.flow(false);

    flow.start(0, false);
    assert!(h.pump_until(WAIT, || h.scheduler.is_running(TaskKind::FetchRoom)));

    flow.clear_all_credentials().unwrap();
    assert!(h.pump_until(WAIT, || h.state.scan.read(|s| s.qr_url.is_some())));

    gate.add_permits(10);
    assert!(h.pump_until(WAIT, || !h.scheduler.is_running(TaskKind::FetchRoom)));
    h.pump_for(Duration::from_millis(100));

    let scan = h.state.scan.snapshot();
    assert!(scan.is_new);
    assert!(!scan.room_updated);
    assert!(h.state.room.read(|r| r.room_id.is_empty()));
    assert_eq!(ready_count(&h), 0);

    h.scheduler.stop_all();
    assert!(h.scheduler.run_until_idle(WAIT));
}

#[test]
fn test_add_new_account_starts_qr_login() {
    let h = Harness::new(FakeApi::new().with_user("42", "alice").with_user("43", "carol"));
    h.seed_account("42");
    let flow = h.flow(false);

    flow.start(0, false);
    assert!(h.pump_until(WAIT, || flow.is_ready()));

    h.api.push_polls([poll_success(session("43"))]);
    assert!(flow.add_new_account());
    assert!(h.pump_until(WAIT, || flow.is_ready()));

    assert_eq!(
        h.store.list_accounts().unwrap(),
        vec!["cookies|42".to_string(), "cookies|43".to_string()]
    );
    assert_eq!(flow.current_account(), 1);
    assert_eq!(h.api.qr_generated.load(Ordering::SeqCst), 1);
}

#[test]
fn test_logout_moves_to_previous_account() {
    let h = Harness::new(FakeApi::new().with_user("42", "alice").with_user("43", "carol"));
    h.seed_account("42");
    h.seed_account("43");
    let flow = h.flow(false);

    let titles = vec!["Speedrun".to_string()];
    h.deps.config.save_recent_titles("42", &titles).unwrap();
    h.deps.config.save_recent_titles("43", &titles).unwrap();

    flow.start(1, false);
    assert!(h.pump_until(WAIT, || flow.is_ready()));
    assert_eq!(h.state.cookies.snapshot(), session("43"));

    let removed = flow.logout().unwrap();
    assert_eq!(removed.as_deref(), Some("cookies|43"));
    assert_eq!(flow.current_account(), 0);
    assert!(h.pump_until(WAIT, || flow.is_ready()));
    assert_eq!(h.state.cookies.snapshot(), session("42"));
    assert_eq!(h.store.list_accounts().unwrap(), vec!["cookies|42".to_string()]);

    // Only the removed account loses its title history.
    assert!(h.deps.config.load_recent_titles("43").unwrap().is_empty());
    assert_eq!(h.deps.config.load_recent_titles("42").unwrap(), titles);
    assert!(h.pump_until(WAIT, || {
        h.state.room.read(|room| room.recent_titles == titles)
    }));
}

#[test]
fn test_logout_of_last_account_opens_new_slot() {
    let h = Harness::new(FakeApi::new().with_user("42", "alice"));
    h.seed_account("42");
    let flow = h.flow(false);

    flow.start(0, false);
    assert!(h.pump_until(WAIT, || flow.is_ready()));

    flow.logout().unwrap();
    assert!(h.pump_until(WAIT, || h.state.scan.read(|s| s.qr_url.is_some())));
    assert!(h.state.scan.read(|s| s.is_new));
    assert!(h.store.list_accounts().unwrap().is_empty());

    h.scheduler.stop_all();
    assert!(h.scheduler.run_until_idle(WAIT));
}

#[test]
fn test_clear_all_credentials() {
    let h = Harness::new(FakeApi::new().with_user("42", "alice"));
    h.seed_account("42");
    h.store
        .save_obs_settings(&startlive::models::ObsSettings {
            port: "4455".to_string(),
            ..Default::default()
        })
        .unwrap();
    let flow = h.flow(false);

    flow.start(0, false);
    assert!(h.pump_until(WAIT, || flow.is_ready()));

    flow.clear_all_credentials().unwrap();
    assert!(h.store.list_accounts().unwrap().is_empty());
    assert!(h.store.load_obs_settings().unwrap().is_none());
    assert!(h.pump_until(WAIT, || h.state.scan.read(|s| s.qr_url.is_some())));

    h.scheduler.stop_all();
    assert!(h.scheduler.run_until_idle(WAIT));
}

#[test]
fn test_constants_refresh_disabled_sets_flag() {
    let h = Harness::new(FakeApi::new());
    let flow = h.flow(false);

    flow.start(0, false);
    assert!(h.state.scan.read(|s| s.const_updated));
    assert!(!h.scheduler.is_running(TaskKind::ConstUpdate));

    h.scheduler.stop_all();
    assert!(h.scheduler.run_until_idle(WAIT));
}
