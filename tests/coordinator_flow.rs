//! End-to-end flows through the bus: fills, prices, proposals, and
//! overrides in, decisions, close instructions, and alerts out.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use risk_core::bus::{topics, BusMessage, InMemoryBus, MessageBus};
use risk_core::clock::ManualClock;
use risk_core::coordinator::{CoordinatorSettings, RiskCoordinator};
use risk_core::store::{MemoryStore, StateStore};

fn settings() -> CoordinatorSettings {
    let mut settings = CoordinatorSettings::default();
    settings.breaker.authorized_identities = vec!["risk-admin".to_string()];
    settings
}

async fn start_core(
    settings: CoordinatorSettings,
) -> (Arc<InMemoryBus>, Arc<MemoryStore>, Arc<ManualClock>) {
    let bus = Arc::new(InMemoryBus::new(64));
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 3, 4, 15, 0, 0).unwrap(),
    ));
    let store = Arc::new(MemoryStore::new(clock.clone()));
    let coordinator = Arc::new(RiskCoordinator::new(
        bus.clone(),
        store.clone(),
        clock.clone(),
        settings,
    ));
    coordinator.start().await.unwrap();
    (bus, store, clock)
}

/// Wait for the first payload on the channel matching the predicate,
/// skipping cadenced traffic like summaries.
async fn next_matching(
    rx: &mut mpsc::Receiver<BusMessage>,
    pred: impl Fn(&Value) -> bool,
) -> Value {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let message = rx.recv().await.expect("bus closed");
            if pred(&message.payload) {
                return message.payload;
            }
        }
    })
    .await
    .expect("expected message not seen within 2s")
}

/// Wait until a mid-cadence summary reports the fill booked, so a
/// following price update cannot overtake it across topics.
async fn wait_until_booked(rx: &mut mpsc::Receiver<BusMessage>, open: usize) {
    next_matching(rx, |p| p["open_positions"] == open as u64).await;
}

fn opened_fill(id: &str, strategy: &str, entry: &str, size: &str) -> Value {
    json!({
        "event": "opened",
        "position_id": id,
        "strategy_kind": strategy,
        "symbol": "BTC-USD",
        "side": "long",
        "entry_price": entry,
        "size": size,
    })
}

fn price_update(id: &str, price: &str) -> Value {
    json!({
        "position_id": id,
        "current_price": price,
        "timestamp": "2024-03-04T15:00:00Z",
    })
}

#[tokio::test]
async fn test_trailing_stop_flow_over_the_bus() {
    let mut run_settings = settings();
    run_settings.cadence.mid_interval = Duration::from_millis(50);
    let (bus, _store, _clock) = start_core(run_settings).await;
    let mut risk_output = bus.subscribe(topics::RISK_OUTPUT).await.unwrap();
    let mut execution = bus.subscribe(topics::EXECUTION).await.unwrap();

    bus.publish(
        topics::FILLS,
        opened_fill("pos-1", "trend_following", "100", "1"),
    )
    .await
    .unwrap();
    wait_until_booked(&mut risk_output, 1).await;

    bus.publish(topics::PRICES, price_update("pos-1", "101"))
        .await
        .unwrap();
    let update = next_matching(&mut risk_output, |p| p["action"] == "update_stop").await;
    assert_eq!(update["position_id"], "pos-1");
    // 1% profit activates: 101 * (1 - 0.005) = 100.495
    assert_eq!(update["new_stop_price"], "100.495");

    bus.publish(topics::PRICES, price_update("pos-1", "103"))
        .await
        .unwrap();
    bus.publish(topics::PRICES, price_update("pos-1", "101.5"))
        .await
        .unwrap();

    let close = next_matching(&mut execution, |p| p["action"] == "close").await;
    assert_eq!(close["position_id"], "pos-1");
    assert_eq!(close["reason"], "trailing_stop");
}

#[tokio::test]
async fn test_daily_breach_halts_trading_over_the_bus() {
    let mut run_settings = settings();
    run_settings.cadence.mid_interval = Duration::from_millis(50);
    let (bus, _store, _clock) = start_core(run_settings).await;
    let mut risk_output = bus.subscribe(topics::RISK_OUTPUT).await.unwrap();
    let mut execution = bus.subscribe(topics::EXECUTION).await.unwrap();
    let mut alerts = bus.subscribe(topics::RISK_ALERTS).await.unwrap();

    bus.publish(
        topics::FILLS,
        opened_fill("pos-1", "news_driven", "100", "100"),
    )
    .await
    .unwrap();
    wait_until_booked(&mut risk_output, 1).await;

    // -200 on a 10,000 start breaches the 2% daily limit.
    bus.publish(topics::PRICES, price_update("pos-1", "98"))
        .await
        .unwrap();

    let alert = next_matching(&mut alerts, |p| p["alert"] == "breaker_transition").await;
    assert_eq!(alert["to"], "open");

    let close = next_matching(&mut execution, |p| p["action"] == "close").await;
    assert_eq!(close["reason"], "daily_loss_breach");

    // A proposal arriving while the breaker is open is rejected.
    bus.publish(
        topics::PROPOSALS,
        json!({
            "proposal_id": "prop-1",
            "symbol": "ETH-USD",
            "strategy_kind": "arbitrage",
            "side": "long",
            "size": "1",
            "leverage": "1",
            "entry_price": "100",
        }),
    )
    .await
    .unwrap();

    let decision = next_matching(&mut risk_output, |p| p["decision"].is_object()).await;
    assert_eq!(decision["decision"]["decision"], "rejected");
}

#[tokio::test]
async fn test_proposal_audit_published_and_persisted() {
    let (bus, store, _clock) = start_core(settings()).await;
    let mut risk_output = bus.subscribe(topics::RISK_OUTPUT).await.unwrap();

    bus.publish(
        topics::PROPOSALS,
        json!({
            "proposal_id": "prop-7",
            "symbol": "BTC-USD",
            "strategy_kind": "trend_following",
            "side": "long",
            "size": "10",
            "leverage": "1",
            "entry_price": "100",
        }),
    )
    .await
    .unwrap();

    let audit = next_matching(&mut risk_output, |p| p["decision"].is_object()).await;
    assert_eq!(audit["decision"]["decision"], "approved");
    assert_eq!(audit["proposal_id"], "prop-7");

    let id = audit["id"].as_str().unwrap();
    let stored = store.load(&format!("audit:{id}")).await.unwrap();
    assert!(stored.is_some());
}

#[tokio::test]
async fn test_override_moves_open_breaker_to_recovering() {
    let mut run_settings = settings();
    run_settings.cadence.mid_interval = Duration::from_millis(50);
    let (bus, _store, _clock) = start_core(run_settings).await;
    let mut risk_output = bus.subscribe(topics::RISK_OUTPUT).await.unwrap();
    let mut alerts = bus.subscribe(topics::RISK_ALERTS).await.unwrap();

    bus.publish(
        topics::FILLS,
        opened_fill("pos-1", "news_driven", "100", "100"),
    )
    .await
    .unwrap();
    wait_until_booked(&mut risk_output, 1).await;
    bus.publish(topics::PRICES, price_update("pos-1", "98"))
        .await
        .unwrap();
    let opened = next_matching(&mut alerts, |p| p["alert"] == "breaker_transition").await;
    assert_eq!(opened["to"], "open");

    bus.publish(
        topics::OVERRIDES,
        json!({
            "authorized_identity": "risk-admin",
            "reason": "verified bad tick from the feed",
        }),
    )
    .await
    .unwrap();

    let recovered = next_matching(&mut alerts, |p| p["alert"] == "breaker_transition").await;
    assert_eq!(recovered["from"], "open");
    assert_eq!(recovered["to"], "recovering");
}

#[tokio::test]
async fn test_summary_published_on_mid_cadence() {
    let mut settings = settings();
    settings.cadence.mid_interval = Duration::from_millis(100);
    let (bus, _store, _clock) = start_core(settings).await;
    let mut risk_output = bus.subscribe(topics::RISK_OUTPUT).await.unwrap();

    let summary =
        next_matching(&mut risk_output, |p| p["circuit_breaker_state"].is_string()).await;
    assert_eq!(summary["circuit_breaker_state"], "closed");
    assert_eq!(summary["open_positions"], 0);
    assert_eq!(summary["balance"], "10000");

    // The next cadence tick publishes another one.
    let again =
        next_matching(&mut risk_output, |p| p["circuit_breaker_state"].is_string()).await;
    assert_eq!(again["circuit_breaker_state"], "closed");
}

#[tokio::test]
async fn test_restart_restores_trailing_stops_from_store() {
    let bus = Arc::new(InMemoryBus::new(64));
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 3, 4, 15, 0, 0).unwrap(),
    ));
    let store = Arc::new(MemoryStore::new(clock.clone()));

    let mut run_settings = settings();
    run_settings.cadence.mid_interval = Duration::from_millis(50);
    let first = Arc::new(RiskCoordinator::new(
        bus.clone(),
        store.clone(),
        clock.clone(),
        run_settings.clone(),
    ));
    let handle = first.start().await.unwrap();
    let mut risk_output = bus.subscribe(topics::RISK_OUTPUT).await.unwrap();

    bus.publish(
        topics::FILLS,
        opened_fill("pos-1", "trend_following", "100", "1"),
    )
    .await
    .unwrap();
    wait_until_booked(&mut risk_output, 1).await;
    bus.publish(topics::PRICES, price_update("pos-1", "101"))
        .await
        .unwrap();

    // Wait for a mid sweep to checkpoint the armed stop.
    let stops = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let Some(checkpoint) = store
                .load(risk_core::store::keys::TRAILING_STOPS)
                .await
                .unwrap()
            {
                let stops = checkpoint.as_array().unwrap().clone();
                if stops.iter().any(|s| s["stop_price"] == "100.495") {
                    return stops;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("trailing checkpoint written");
    handle.abort();

    assert_eq!(stops.len(), 1);
    assert_eq!(stops[0]["position_id"], "pos-1");

    // A second coordinator on the same store picks the stop back up.
    let second = Arc::new(RiskCoordinator::new(
        bus.clone(),
        store.clone(),
        clock.clone(),
        run_settings,
    ));
    second.start().await.unwrap();

    let mut execution = bus.subscribe(topics::EXECUTION).await.unwrap();
    let mut second_output = bus.subscribe(topics::RISK_OUTPUT).await.unwrap();
    // The restored ledger is rebuilt from fills before prices flow.
    bus.publish(
        topics::FILLS,
        opened_fill("pos-1", "trend_following", "100", "1"),
    )
    .await
    .unwrap();
    wait_until_booked(&mut second_output, 1).await;
    // 100.2 crosses the restored 100.495 stop but not the 99 static level
    // a fresh registration would sit at.
    bus.publish(topics::PRICES, price_update("pos-1", "100.2"))
        .await
        .unwrap();

    let close = next_matching(&mut execution, |p| p["action"] == "close").await;
    assert_eq!(close["position_id"], "pos-1");
    assert_eq!(close["reason"], "trailing_stop");
    assert_eq!(close["stop_price"], "100.495");
}
