//! Parser module for Binance market data messages
//!
//! Decodes depth diffs, book tickers and REST depth snapshots into
//! [`UpdateEvent`]s for the sync controller.

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use std::str::FromStr;

use crate::orderbook::{Diff, PriceLevel, Snapshot, UpdateEvent};

/// Binance depth update message
#[derive(Debug, Clone, Deserialize)]
pub struct DepthUpdate {
    /// Event type
    #[serde(rename = "e")]
    pub event_type: String,

    /// Event time (milliseconds)
    #[serde(rename = "E")]
    pub event_time: u64,

    /// Symbol
    #[serde(rename = "s")]
    pub symbol: String,

    /// First update ID in event
    #[serde(rename = "U")]
    pub first_update_id: u64,

    /// Final update ID in event
    #[serde(rename = "u")]
    pub final_update_id: u64,

    /// Bids to update
    #[serde(rename = "b", deserialize_with = "deserialize_price_levels")]
    pub bids: Vec<PriceLevel>,

    /// Asks to update
    #[serde(rename = "a", deserialize_with = "deserialize_price_levels")]
    pub asks: Vec<PriceLevel>,
}

/// Binance best bid/ask message (no event type field)
#[derive(Debug, Clone, Deserialize)]
pub struct BookTicker {
    /// Order book update ID
    #[serde(rename = "u")]
    pub update_id: u64,

    #[serde(rename = "s")]
    pub symbol: String,

    #[serde(rename = "b", deserialize_with = "deserialize_decimal")]
    pub bid_price: Decimal,

    #[serde(rename = "B", deserialize_with = "deserialize_decimal")]
    pub bid_quantity: Decimal,

    #[serde(rename = "a", deserialize_with = "deserialize_decimal")]
    pub ask_price: Decimal,

    #[serde(rename = "A", deserialize_with = "deserialize_decimal")]
    pub ask_quantity: Decimal,
}

/// Order book snapshot from REST API
#[derive(Debug, Clone, Deserialize)]
pub struct OrderBookSnapshot {
    /// Last update ID
    #[serde(rename = "lastUpdateId")]
    pub last_update_id: u64,

    /// Bids
    #[serde(deserialize_with = "deserialize_price_levels")]
    pub bids: Vec<PriceLevel>,

    /// Asks
    #[serde(deserialize_with = "deserialize_price_levels")]
    pub asks: Vec<PriceLevel>,
}

/// Combined stream message wrapper
#[derive(Debug, Clone, Deserialize)]
pub struct StreamMessage {
    /// Stream name
    pub stream: String,

    /// Data payload
    pub data: serde_json::Value,
}

/// Parsed WebSocket message
#[derive(Debug, Clone)]
pub enum ParsedMessage {
    DepthUpdate(DepthUpdate),
    BookTicker(BookTicker),
    Unknown(String),
}

impl ParsedMessage {
    /// Parse a raw WebSocket message
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        // Try to parse as stream message first (combined streams)
        if let Ok(stream_msg) = serde_json::from_str::<StreamMessage>(raw) {
            return Self::parse_stream_data(&stream_msg.stream, stream_msg.data);
        }

        let value: serde_json::Value = serde_json::from_str(raw)?;
        match value.get("e").and_then(|e| e.as_str()) {
            Some("depthUpdate") => Ok(ParsedMessage::DepthUpdate(serde_json::from_value(value)?)),
            Some(_) => Ok(ParsedMessage::Unknown(raw.to_string())),
            None if value.get("u").is_some() && value.get("b").is_some() => {
                Ok(ParsedMessage::BookTicker(serde_json::from_value(value)?))
            }
            None => Ok(ParsedMessage::Unknown(raw.to_string())),
        }
    }

    fn parse_stream_data(stream: &str, data: serde_json::Value) -> Result<Self, serde_json::Error> {
        if stream.contains("@depth") {
            Ok(ParsedMessage::DepthUpdate(serde_json::from_value(data)?))
        } else if stream.contains("@bookTicker") {
            Ok(ParsedMessage::BookTicker(serde_json::from_value(data)?))
        } else {
            Ok(ParsedMessage::Unknown(data.to_string()))
        }
    }

    /// Symbol the message refers to, if any
    pub fn symbol(&self) -> Option<&str> {
        match self {
            ParsedMessage::DepthUpdate(depth) => Some(&depth.symbol),
            ParsedMessage::BookTicker(ticker) => Some(&ticker.symbol),
            ParsedMessage::Unknown(_) => None,
        }
    }

    /// Convert into a book update, `None` for unknown messages
    pub fn into_event(self) -> Option<UpdateEvent> {
        match self {
            ParsedMessage::DepthUpdate(depth) => Some(UpdateEvent::Diff(depth.into())),
            ParsedMessage::BookTicker(ticker) => Some(UpdateEvent::Snapshot(ticker.into())),
            ParsedMessage::Unknown(_) => None,
        }
    }
}

impl From<DepthUpdate> for Diff {
    fn from(update: DepthUpdate) -> Self {
        Diff {
            first_update_id: update.first_update_id,
            last_update_id: update.final_update_id,
            event_time: update.event_time,
            bids: update.bids,
            asks: update.asks,
        }
    }
}

impl From<BookTicker> for Snapshot {
    fn from(ticker: BookTicker) -> Self {
        Snapshot::top_of_book(
            ticker.update_id,
            PriceLevel::new(ticker.bid_price, ticker.bid_quantity),
            PriceLevel::new(ticker.ask_price, ticker.ask_quantity),
        )
    }
}

impl From<OrderBookSnapshot> for Snapshot {
    fn from(snapshot: OrderBookSnapshot) -> Self {
        Snapshot {
            last_update_id: snapshot.last_update_id,
            event_time: 0,
            bids: snapshot.bids,
            asks: snapshot.asks,
        }
    }
}

/// Custom deserializer for Decimal from string
fn deserialize_decimal<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    Decimal::from_str(&s).map_err(serde::de::Error::custom)
}

/// Custom deserializer for price levels from array of string pairs
fn deserialize_price_levels<'de, D>(deserializer: D) -> Result<Vec<PriceLevel>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Vec<Vec<String>> = Deserialize::deserialize(deserializer)?;
    raw.into_iter()
        .map(|pair| {
            if pair.len() != 2 {
                return Err(serde::de::Error::custom("Invalid price level format"));
            }
            Ok(PriceLevel {
                price: Decimal::from_str(&pair[0]).map_err(serde::de::Error::custom)?,
                quantity: Decimal::from_str(&pair[1]).map_err(serde::de::Error::custom)?,
            })
        })
        .collect()
}
