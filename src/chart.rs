use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::model::{Candle, Market, TriggerMark};

/// Outbound message shape for the chart WebSocket surface. Serializes to the
/// same `{type, ...}` JSON envelope regardless of transport.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ChartMessage {
    #[serde(rename = "candle_update")]
    CandleUpdate {
        symbol: String,
        market: Market,
        candle: CandlePayload,
    },
    #[serde(rename = "trigger_mark")]
    TriggerMarkEvent {
        symbol: String,
        market: Market,
        trigger: TriggerMarkPayload,
    },
    #[serde(rename = "status")]
    Status { status: ConnectionStatus },
}

#[derive(Debug, Clone, Serialize)]
pub struct CandlePayload {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl From<Candle> for CandlePayload {
    fn from(c: Candle) -> Self {
        Self {
            time: c.timestamp,
            open: c.open,
            high: c.high,
            low: c.low,
            close: c.close,
            volume: c.volume,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TriggerMarkPayload {
    pub time: i64,
    pub filter_name: String,
    pub filter_type: &'static str,
}

impl From<TriggerMark> for TriggerMarkPayload {
    fn from(m: TriggerMark) -> Self {
        Self {
            time: m.timestamp,
            filter_name: m.filter_name,
            filter_type: m.filter_type,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Live,
    Reconnecting,
    Offline,
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

struct Connection {
    sender: mpsc::Sender<ChartMessage>,
    subscriptions: HashSet<(String, Market)>,
}

/// Registry of live chart WebSocket connections and their subscriptions.
///
/// Transport-agnostic: the HTTP layer owns the actual socket and drains the
/// receiver handed back by [`ChartHub::register`]. A send failure to any
/// connection deregisters it immediately rather than retrying, per the
/// broadcast contract.
pub struct ChartHub {
    connections: DashMap<ConnectionId, Connection>,
    next_id: AtomicU64,
}

impl Default for ChartHub {
    fn default() -> Self {
        Self::new()
    }
}

impl ChartHub {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a new connection and return its id plus the receiving end of
    /// its outbound message channel.
    pub fn register(&self) -> (ConnectionId, mpsc::Receiver<ChartMessage>) {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(32);
        self.connections.insert(
            id,
            Connection {
                sender: tx,
                subscriptions: HashSet::new(),
            },
        );
        (id, rx)
    }

    pub fn deregister(&self, id: ConnectionId) {
        self.connections.remove(&id);
    }

    pub fn subscribe(&self, id: ConnectionId, symbol: &str, market: Market) {
        if let Some(mut conn) = self.connections.get_mut(&id) {
            conn.subscriptions.insert((symbol.to_owned(), market));
        }
    }

    pub fn unsubscribe(&self, id: ConnectionId, symbol: &str, market: Market) {
        if let Some(mut conn) = self.connections.get_mut(&id) {
            conn.subscriptions.remove(&(symbol.to_owned(), market));
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn broadcast_candle_update(&self, symbol: &str, market: Market, candle: Candle) {
        let message = ChartMessage::CandleUpdate {
            symbol: symbol.to_owned(),
            market,
            candle: candle.into(),
        };
        self.broadcast_to_subscribers(symbol, market, message);
    }

    pub fn broadcast_trigger_mark(&self, symbol: &str, market: Market, mark: TriggerMark) {
        let message = ChartMessage::TriggerMarkEvent {
            symbol: symbol.to_owned(),
            market,
            trigger: mark.into(),
        };
        self.broadcast_to_subscribers(symbol, market, message);
    }

    pub fn broadcast_status(&self, status: ConnectionStatus) {
        let message = ChartMessage::Status { status };
        let mut stale = Vec::new();
        for entry in self.connections.iter() {
            if entry.sender.try_send(message.clone()).is_err() {
                stale.push(*entry.key());
            }
        }
        for id in stale {
            self.deregister(id);
        }
    }

    fn broadcast_to_subscribers(&self, symbol: &str, market: Market, message: ChartMessage) {
        let key = (symbol.to_owned(), market);
        let mut stale = Vec::new();
        for entry in self.connections.iter() {
            if !entry.subscriptions.contains(&key) {
                continue;
            }
            if entry.sender.try_send(message.clone()).is_err() {
                stale.push(*entry.key());
            }
        }
        for id in stale {
            self.deregister(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(ts: i64) -> Candle {
        Candle {
            timestamp: ts,
            open: 1.0,
            high: 2.0,
            low: 0.5,
            close: 1.5,
            volume: 10.0,
        }
    }

    #[tokio::test]
    async fn subscribed_connection_receives_candle_update() {
        let hub = ChartHub::new();
        let (id, mut rx) = hub.register();
        hub.subscribe(id, "BTC/USDT", Market::Spot);

        hub.broadcast_candle_update("BTC/USDT", Market::Spot, candle(60));

        let message = rx.recv().await.expect("message delivered");
        match message {
            ChartMessage::CandleUpdate { symbol, market, candle } => {
                assert_eq!(symbol, "BTC/USDT");
                assert_eq!(market, Market::Spot);
                assert_eq!(candle.time, 60);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unsubscribed_pair_receives_nothing() {
        let hub = ChartHub::new();
        let (id, mut rx) = hub.register();
        hub.subscribe(id, "BTC/USDT", Market::Spot);

        hub.broadcast_candle_update("ETH/USDT", Market::Spot, candle(60));

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn status_broadcast_reaches_every_connection_regardless_of_subscription() {
        let hub = ChartHub::new();
        let (_id_a, mut rx_a) = hub.register();
        let (_id_b, mut rx_b) = hub.register();

        hub.broadcast_status(ConnectionStatus::Reconnecting);

        assert!(matches!(
            rx_a.recv().await.unwrap(),
            ChartMessage::Status { status: ConnectionStatus::Reconnecting }
        ));
        assert!(matches!(
            rx_b.recv().await.unwrap(),
            ChartMessage::Status { status: ConnectionStatus::Reconnecting }
        ));
    }

    #[tokio::test]
    async fn dropping_receiver_deregisters_connection_on_next_send() {
        let hub = ChartHub::new();
        let (id, rx) = hub.register();
        hub.subscribe(id, "BTC/USDT", Market::Spot);
        drop(rx);

        hub.broadcast_candle_update("BTC/USDT", Market::Spot, candle(60));

        assert_eq!(hub.connection_count(), 0);
    }

    #[tokio::test]
    async fn unsubscribe_stops_future_delivery() {
        let hub = ChartHub::new();
        let (id, mut rx) = hub.register();
        hub.subscribe(id, "BTC/USDT", Market::Spot);
        hub.unsubscribe(id, "BTC/USDT", Market::Spot);

        hub.broadcast_candle_update("BTC/USDT", Market::Spot, candle(60));

        assert!(rx.try_recv().is_err());
    }
}
