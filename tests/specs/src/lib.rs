// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end protocol scenarios.
//!
//! Runs the hub in-process on a free port and exercises the real WebSocket
//! sync protocol plus the HTTP side channel.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

use tillsync::config::HubConfig;

/// Find a free TCP port by binding to :0 then releasing.
pub fn free_port() -> anyhow::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// Default config for an in-process test hub.
pub fn test_config(port: u16) -> HubConfig {
    HubConfig {
        host: "127.0.0.1".to_owned(),
        port,
        max_events: 10_000,
        lock_ttl_ms: 300_000,
        lock_sweep_ms: 60_000,
        replay_batch: 500,
        users_file: None,
    }
}

/// A hub running inside the test process; the server task is aborted on drop.
pub struct TestHub {
    pub port: u16,
    handle: tokio::task::JoinHandle<()>,
}

impl TestHub {
    pub async fn start() -> anyhow::Result<Self> {
        Self::start_with(|config| config).await
    }

    pub async fn start_with(
        reconfigure: impl FnOnce(HubConfig) -> HubConfig,
    ) -> anyhow::Result<Self> {
        let port = free_port()?;
        let config = reconfigure(test_config(port));
        let handle = tokio::spawn(async move {
            if let Err(e) = tillsync::run(config).await {
                eprintln!("test hub exited: {e:#}");
            }
        });

        let hub = Self { port, handle };
        hub.wait_healthy(Duration::from_secs(10)).await?;
        Ok(hub)
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://127.0.0.1:{}/ws", self.port)
    }

    /// Poll `/health` until the listener answers.
    pub async fn wait_healthy(&self, timeout: Duration) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        let url = format!("{}/health", self.base_url());
        loop {
            if let Ok(resp) = reqwest::get(&url).await {
                if resp.status().is_success() {
                    return Ok(());
                }
            }
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("hub never became healthy on port {}", self.port);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    pub async fn stats(&self) -> anyhow::Result<serde_json::Value> {
        Ok(reqwest::get(format!("{}/api/stats", self.base_url())).await?.json().await?)
    }
}

impl Drop for TestHub {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// A device-side WebSocket connection speaking the sync protocol.
pub struct WsClient {
    stream: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
}

impl WsClient {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let (stream, _) = tokio_tungstenite::connect_async(url).await?;
        Ok(Self { stream })
    }

    pub async fn send_json(&mut self, msg: &serde_json::Value) -> anyhow::Result<()> {
        self.stream.send(Message::Text(msg.to_string().into())).await?;
        Ok(())
    }

    /// Next text frame as JSON, or an error at the deadline.
    pub async fn recv_json(&mut self, timeout: Duration) -> anyhow::Result<serde_json::Value> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline
                .checked_duration_since(tokio::time::Instant::now())
                .ok_or_else(|| anyhow::anyhow!("timed out waiting for a message"))?;
            let frame = tokio::time::timeout(remaining, self.stream.next())
                .await
                .map_err(|_| anyhow::anyhow!("timed out waiting for a message"))?;
            match frame {
                Some(Ok(Message::Text(text))) => return Ok(serde_json::from_str(&text)?),
                Some(Ok(Message::Close(_))) | None => anyhow::bail!("connection closed"),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }

    /// Skip frames until one with the given `type` arrives.
    pub async fn recv_type(
        &mut self,
        msg_type: &str,
        timeout: Duration,
    ) -> anyhow::Result<serde_json::Value> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline
                .checked_duration_since(tokio::time::Instant::now())
                .ok_or_else(|| anyhow::anyhow!("timed out waiting for {msg_type}"))?;
            let msg = self.recv_json(remaining).await?;
            if msg["type"] == msg_type {
                return Ok(msg);
            }
        }
    }

    /// Assert that nothing arrives within the window.
    pub async fn expect_silence(&mut self, window: Duration) -> anyhow::Result<()> {
        match tokio::time::timeout(window, self.stream.next()).await {
            Err(_) => Ok(()),
            Ok(Some(Ok(Message::Text(text)))) => anyhow::bail!("unexpected message: {text}"),
            Ok(Some(Ok(_))) => Ok(()),
            Ok(Some(Err(e))) => Err(e.into()),
            Ok(None) => anyhow::bail!("connection closed"),
        }
    }

    /// Send `hello` and wait for the ack.
    pub async fn hello(
        &mut self,
        device_id: &str,
        tenant_id: &str,
        store_id: &str,
        cursor: Option<u64>,
    ) -> anyhow::Result<serde_json::Value> {
        let mut msg = serde_json::json!({
            "type": "hello",
            "deviceId": device_id,
            "tenantId": tenant_id,
            "storeId": store_id,
        });
        if let Some(cursor) = cursor {
            msg["cursor"] = cursor.into();
        }
        self.send_json(&msg).await?;
        self.recv_type("hello.ack", Duration::from_secs(5)).await
    }

    pub async fn close(mut self) -> anyhow::Result<()> {
        self.stream.close(None).await?;
        Ok(())
    }
}

/// Build an `events.append` frame.
pub fn append_event(
    event_id: &str,
    tenant_id: &str,
    store_id: &str,
    aggregate_id: &str,
    version: u64,
    lamport: u64,
    device_id: &str,
) -> serde_json::Value {
    serde_json::json!({
        "type": "events.append",
        "event": {
            "eventId": event_id,
            "tenantId": tenant_id,
            "storeId": store_id,
            "aggregateType": "order",
            "aggregateId": aggregate_id,
            "version": version,
            "type": "order.item.added",
            "at": 1_700_000_000_000u64 + lamport,
            "actor": { "deviceId": device_id },
            "clock": { "lamport": lamport, "deviceId": device_id },
            "payload": { "sku": "espresso" }
        }
    })
}
