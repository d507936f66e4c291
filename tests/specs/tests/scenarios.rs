// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end protocol scenarios over real WebSockets.

use std::time::Duration;

use tillsync_specs::{append_event, TestHub, WsClient};

const TIMEOUT: Duration = Duration::from_secs(5);
const SILENCE: Duration = Duration::from_millis(300);

// -- Scenario A: idempotent append --------------------------------------------

#[tokio::test]
async fn idempotent_append_relays_once() -> anyhow::Result<()> {
    let hub = TestHub::start().await?;
    let mut c1 = WsClient::connect(&hub.ws_url()).await?;
    c1.hello("D1", "demo", "store_001", None).await?;

    c1.send_json(&append_event("E1", "demo", "store_001", "O1", 1, 1, "D1")).await?;
    let relay = c1.recv_type("events.relay", TIMEOUT).await?;
    assert_eq!(relay["event"]["eventId"], "E1");

    // Resend: no new relay, no error, still one stored event.
    c1.send_json(&append_event("E1", "demo", "store_001", "O1", 1, 1, "D1")).await?;
    c1.expect_silence(SILENCE).await?;

    let stats = hub.stats().await?;
    assert_eq!(stats["totalEvents"], 1);
    Ok(())
}

// -- Scenario B: catch-up -----------------------------------------------------

#[tokio::test]
async fn late_joiner_catches_up_in_order() -> anyhow::Result<()> {
    let hub = TestHub::start().await?;
    let mut c1 = WsClient::connect(&hub.ws_url()).await?;
    c1.hello("D1", "demo", "store_001", None).await?;

    for lamport in 1..=3u64 {
        c1.send_json(&append_event(
            &format!("E{lamport}"),
            "demo",
            "store_001",
            "O1",
            lamport,
            lamport,
            "D1",
        ))
        .await?;
        c1.recv_type("events.relay", TIMEOUT).await?;
    }

    let mut c2 = WsClient::connect(&hub.ws_url()).await?;
    c2.hello("D2", "demo", "store_001", Some(0)).await?;

    let bulk = c2.recv_type("events.bulk", TIMEOUT).await?;
    let lamports: Vec<u64> = bulk["events"]
        .as_array()
        .map(|events| {
            events.iter().filter_map(|e| e["clock"]["lamport"].as_u64()).collect::<Vec<_>>()
        })
        .unwrap_or_default();
    assert_eq!(lamports, [1, 2, 3]);
    assert_eq!(bulk["fromLamport"], 0);
    assert_eq!(bulk["toLamport"], 3);
    Ok(())
}

// -- Scenario C: Lamport tiebreak ---------------------------------------------

#[tokio::test]
async fn same_lamport_orders_by_device_id() -> anyhow::Result<()> {
    let hub = TestHub::start().await?;
    let mut ca = WsClient::connect(&hub.ws_url()).await?;
    ca.hello("A", "demo", "store_001", None).await?;
    let mut cb = WsClient::connect(&hub.ws_url()).await?;
    cb.hello("B", "demo", "store_001", None).await?;

    // Both devices independently mint lamport 5.
    cb.send_json(&append_event("E-b", "demo", "store_001", "O2", 1, 5, "B")).await?;
    cb.recv_type("events.relay", TIMEOUT).await?;
    ca.send_json(&append_event("E-a", "demo", "store_001", "O1", 1, 5, "A")).await?;
    ca.recv_type("events.relay", TIMEOUT).await?;

    let mut c3 = WsClient::connect(&hub.ws_url()).await?;
    c3.hello("C", "demo", "store_001", Some(4)).await?;
    let bulk = c3.recv_type("events.bulk", TIMEOUT).await?;
    let ids: Vec<&str> = bulk["events"]
        .as_array()
        .map(|events| events.iter().filter_map(|e| e["eventId"].as_str()).collect::<Vec<_>>())
        .unwrap_or_default();
    assert_eq!(ids, ["E-a", "E-b"], "device A sorts before device B at equal lamport");
    Ok(())
}

// -- Scenario D: lock contention and disconnect sweep -------------------------

#[tokio::test]
async fn lock_contention_and_disconnect_release() -> anyhow::Result<()> {
    let hub = TestHub::start().await?;
    let mut c1 = WsClient::connect(&hub.ws_url()).await?;
    c1.hello("D1", "demo", "store_001", None).await?;
    let mut c2 = WsClient::connect(&hub.ws_url()).await?;
    c2.hello("D2", "demo", "store_001", None).await?;

    let lock_request = serde_json::json!({
        "type": "order.lock.request",
        "orderId": "O1",
        "tenantId": "demo",
        "storeId": "store_001",
    });

    c1.send_json(&lock_request).await?;
    let granted = c1.recv_type("order.lock.response", TIMEOUT).await?;
    assert_eq!(granted["success"], true);

    // C2 sees the side-band notification, then loses the race.
    let locked = c2.recv_type("order.locked", TIMEOUT).await?;
    assert_eq!(locked["deviceId"], "D1");

    c2.send_json(&lock_request).await?;
    let refused = c2.recv_type("order.lock.response", TIMEOUT).await?;
    assert_eq!(refused["success"], false);
    let reason = refused["reason"].as_str().unwrap_or_default();
    assert!(reason.contains("held_by:D1"), "reason was {reason}");

    // Holder disconnects: the room hears the release, and the lock is free.
    c1.close().await?;
    let released = c2.recv_type("order.lock.released", TIMEOUT).await?;
    assert_eq!(released["reason"], "device_disconnected");
    assert_eq!(released["deviceId"], "D1");

    c2.send_json(&lock_request).await?;
    let regranted = c2.recv_type("order.lock.response", TIMEOUT).await?;
    assert_eq!(regranted["success"], true);
    Ok(())
}

// -- Scenario E: TTL expiry ---------------------------------------------------

#[tokio::test]
async fn expired_lock_is_reacquirable_after_sweep() -> anyhow::Result<()> {
    let hub = TestHub::start_with(|mut config| {
        config.lock_ttl_ms = 300;
        config.lock_sweep_ms = 100;
        config
    })
    .await?;

    let mut c1 = WsClient::connect(&hub.ws_url()).await?;
    c1.hello("D1", "demo", "store_001", None).await?;
    let mut c2 = WsClient::connect(&hub.ws_url()).await?;
    c2.hello("D2", "demo", "store_001", None).await?;

    let lock_request = serde_json::json!({
        "type": "order.lock.request",
        "orderId": "O2",
        "tenantId": "demo",
        "storeId": "store_001",
    });
    c1.send_json(&lock_request).await?;
    let granted = c1.recv_type("order.lock.response", TIMEOUT).await?;
    assert_eq!(granted["success"], true);

    // C1 falls silent past TTL + sweep interval.
    tokio::time::sleep(Duration::from_millis(700)).await;

    let status = serde_json::json!({
        "type": "order.lock.status",
        "orderId": "O2",
        "tenantId": "demo",
        "storeId": "store_001",
    });
    c2.send_json(&status).await?;
    let resp = c2.recv_type("order.lock.status.response", TIMEOUT).await?;
    assert_eq!(resp["isLocked"], false);

    c2.send_json(&lock_request).await?;
    let regranted = c2.recv_type("order.lock.response", TIMEOUT).await?;
    assert_eq!(regranted["success"], true);
    Ok(())
}

// -- Scenario F: cross-room isolation -----------------------------------------

#[tokio::test]
async fn rooms_are_isolated_and_cross_room_appends_rejected() -> anyhow::Result<()> {
    let hub = TestHub::start().await?;
    let mut c1 = WsClient::connect(&hub.ws_url()).await?;
    c1.hello("D1", "demo", "store_001", None).await?;
    let mut c2 = WsClient::connect(&hub.ws_url()).await?;
    c2.hello("D2", "demo", "store_002", None).await?;

    c1.send_json(&append_event("E1", "demo", "store_001", "O1", 1, 1, "D1")).await?;
    c1.recv_type("events.relay", TIMEOUT).await?;
    c2.expect_silence(SILENCE).await?;

    // Injecting into another room is refused and leaves the store unchanged.
    c1.send_json(&append_event("E2", "demo", "store_002", "O1", 1, 2, "D1")).await?;
    let error = c1.recv_type("error", TIMEOUT).await?;
    assert_eq!(error["code"], "UNAUTHORIZED");

    let stats = hub.stats().await?;
    assert_eq!(stats["totalEvents"], 1);
    Ok(())
}

// -- Cursor replay is lossless ------------------------------------------------

#[tokio::test]
async fn reconnect_from_cursor_misses_nothing() -> anyhow::Result<()> {
    let hub = TestHub::start().await?;
    let mut c1 = WsClient::connect(&hub.ws_url()).await?;
    c1.hello("D1", "demo", "store_001", None).await?;

    c1.send_json(&append_event("E1", "demo", "store_001", "O1", 1, 1, "D1")).await?;
    c1.recv_type("events.relay", TIMEOUT).await?;

    // C2 observes up to lamport 1, then drops.
    let mut c2 = WsClient::connect(&hub.ws_url()).await?;
    c2.hello("D2", "demo", "store_001", Some(0)).await?;
    c2.recv_type("events.bulk", TIMEOUT).await?;
    c2.close().await?;

    // Two more appends happen while C2 is away.
    for lamport in 2..=3u64 {
        c1.send_json(&append_event(
            &format!("E{lamport}"),
            "demo",
            "store_001",
            "O1",
            lamport,
            lamport,
            "D1",
        ))
        .await?;
        c1.recv_type("events.relay", TIMEOUT).await?;
    }

    let mut c2 = WsClient::connect(&hub.ws_url()).await?;
    c2.hello("D2", "demo", "store_001", Some(1)).await?;
    let bulk = c2.recv_type("events.bulk", TIMEOUT).await?;
    let ids: Vec<&str> = bulk["events"]
        .as_array()
        .map(|events| events.iter().filter_map(|e| e["eventId"].as_str()).collect::<Vec<_>>())
        .unwrap_or_default();
    assert_eq!(ids, ["E2", "E3"]);
    Ok(())
}

// -- Login + authenticated hello ----------------------------------------------

#[tokio::test]
async fn login_session_attaches_user_identity_to_locks() -> anyhow::Result<()> {
    let users = serde_json::json!([{
        "email": "alice@demo.example",
        "password": "till-1234",
        "tenantId": "demo",
        "userId": "U1",
        "userName": "Alice"
    }]);
    let users_dir = std::env::temp_dir().join(format!("tillsync-users-{}", std::process::id()));
    std::fs::create_dir_all(&users_dir)?;
    let users_path = users_dir.join("users.json");
    std::fs::write(&users_path, serde_json::to_vec(&users)?)?;

    let users_file = users_path.clone();
    let hub = TestHub::start_with(move |mut config| {
        config.users_file = Some(users_file);
        config
    })
    .await?;

    let client = reqwest::Client::new();
    let login: serde_json::Value = client
        .post(format!("{}/api/auth/login", hub.base_url()))
        .json(&serde_json::json!({
            "email": "alice@demo.example",
            "password": "till-1234",
            "tenantId": "demo"
        }))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(login["success"], true);
    let session_id = login["data"]["session"]["sessionId"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("missing session id"))?
        .to_owned();

    let mut c1 = WsClient::connect(&hub.ws_url()).await?;
    c1.send_json(&serde_json::json!({
        "type": "hello",
        "deviceId": "till-1",
        "tenantId": "demo",
        "storeId": "store_001",
        "auth": { "sessionId": session_id }
    }))
    .await?;
    c1.recv_type("hello.ack", TIMEOUT).await?;

    let mut c2 = WsClient::connect(&hub.ws_url()).await?;
    c2.hello("kds-1", "demo", "store_001", None).await?;

    c1.send_json(&serde_json::json!({
        "type": "order.lock.request",
        "orderId": "O1",
        "tenantId": "demo",
        "storeId": "store_001",
    }))
    .await?;
    let granted = c1.recv_type("order.lock.response", TIMEOUT).await?;
    assert_eq!(granted["lock"]["userName"], "Alice");

    // The kitchen display learns who is editing the order.
    let locked = c2.recv_type("order.locked", TIMEOUT).await?;
    assert_eq!(locked["userName"], "Alice");

    std::fs::remove_file(&users_path).ok();
    Ok(())
}
