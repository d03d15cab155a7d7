//! Convergence under chaos.
//!
//! Random scenarios run the client against a lossy push channel, random
//! completion order and forced disconnects. Every step is checked against
//! the standard invariants and every run must agree with the server once
//! chaos stops and the client resyncs.

use std::time::Duration;

use chatsync_client::ClientEvent;
use chatsync_core::{ConnectionState, Session, SyncConfig};
use chatsync_harness::{ChaosConfig, InvariantRegistry, Scenario, SimDriver, SimEnv, SimServer};
use chatsync_proto::{MessageId, RoomKind};
use proptest::prelude::*;

const STEP: Duration = Duration::from_millis(250);

fn lossy(seed: u64) -> Scenario {
    Scenario { seed, steps: 120, ..Scenario::default() }
}

#[test]
fn lossy_scenario_converges() {
    let report = lossy(7).run();
    assert!(report.is_success(), "{report}");
    assert!(report.peer_posts > 0);
}

#[test]
fn scenario_without_echo_correlation_converges() {
    let mut chaos = ChaosConfig::lossy();
    chaos.echo_client_ref = false;
    let report = Scenario { chaos, ..lossy(21) }.run();
    assert!(report.is_success(), "{report}");
}

#[test]
fn heavy_reordering_converges() {
    let chaos = ChaosConfig { reorder_rate: 0.6, duplicate_rate: 0.3, ..ChaosConfig::none() };
    let report = Scenario { chaos, ..lossy(99) }.run();
    assert!(report.is_success(), "{report}");
}

#[test]
fn client_clock_skew_converges() {
    for (seed, skew) in [(31, 3_600_000), (32, -3_600_000)] {
        let chaos = ChaosConfig { client_clock_skew_ms: skew, ..ChaosConfig::lossy() };
        let report = Scenario { chaos, ..lossy(seed) }.run();
        assert!(report.is_success(), "skew {skew}: {report}");
        assert!(report.sent > 0);
    }
}

#[test]
fn client_clock_skew_without_echo_correlation_converges() {
    let chaos = ChaosConfig {
        client_clock_skew_ms: 90_000,
        echo_client_ref: false,
        ..ChaosConfig::lossy()
    };
    let report = Scenario { chaos, ..lossy(47) }.run();
    assert!(report.is_success(), "{report}");
}

#[test]
fn messages_missed_while_disconnected_arrive_after_reconnect() {
    let env = SimEnv::with_seed(5);
    let server = SimServer::new(env.clone(), 5);
    let room = server.add_room(&"alice".into(), vec!["bob".into()], RoomKind::Mentoring, "Weekly");
    let mut driver =
        SimDriver::new(env, server.clone(), Session::new("alice", "Alice"), SyncConfig::default())
            .with_invariants(InvariantRegistry::standard());

    driver.start();
    assert!(driver.run_until_quiet(8));
    driver.intent(ClientEvent::OpenRoom { room_id: room.id.clone() }).unwrap();
    driver.run_until_quiet(8);

    server.disconnect_all();
    let bob = Session::new("bob", "Bob");
    let missed = server.post(&bob, &room.id, "sent into the gap", None).unwrap();
    driver.pump_push();
    assert_eq!(driver.client().connection_state(), ConnectionState::Reconnecting);

    assert!(driver.tick_until_open(STEP, Duration::from_secs(60)));
    assert!(driver.run_until_quiet(16));

    let ids: Vec<MessageId> = driver
        .client()
        .timeline(&room.id)
        .unwrap()
        .iter()
        .map(|message| message.id.clone())
        .collect();
    assert_eq!(ids, vec![missed.id]);
    let summary = driver.client().directory().get(&room.id).unwrap();
    assert_eq!(summary.message_count, 1);
    assert_eq!(driver.client().unread(&room.id), 0);
    assert!(driver.violations().is_empty(), "{:?}", driver.violations());
}

#[test]
fn refused_subscription_retries_until_accepted() {
    let env = SimEnv::with_seed(8);
    let server = SimServer::new(env.clone(), 8);
    server.add_room(&"alice".into(), vec!["bob".into()], RoomKind::Group, "Cohort");
    server.refuse_subscriptions(Some(chatsync_core::SubscriptionError::Transport(
        "refused".into(),
    )));
    let mut driver =
        SimDriver::new(env, server.clone(), Session::new("alice", "Alice"), SyncConfig::default());

    driver.start();
    driver.run_until_quiet(8);
    assert_ne!(driver.client().connection_state(), ConnectionState::Open);
    assert!(!driver.tick_until_open(STEP, Duration::from_secs(5)));

    server.refuse_subscriptions(None);
    assert!(driver.tick_until_open(STEP, Duration::from_secs(120)));
    assert_eq!(driver.client().directory().len(), 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_random_scenarios_converge(seed in any::<u64>()) {
        let report = Scenario { seed, steps: 80, ..Scenario::default() }.run();
        prop_assert!(report.is_success(), "{}", report);
    }

    #[test]
    fn prop_same_seed_same_outcome(seed in any::<u64>()) {
        let first = Scenario { seed, steps: 40, ..Scenario::default() }.run();
        let second = Scenario { seed, steps: 40, ..Scenario::default() }.run();
        prop_assert_eq!(first.to_string(), second.to_string());
    }
}
