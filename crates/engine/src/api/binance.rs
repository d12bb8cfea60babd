//! Binance public API client for market data (no authentication required)

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::ports::CandleSource;
use crate::types::Candle;

const DEFAULT_BASE_URL: &str = "https://api.binance.com";
const MAX_KLINES_PER_REQUEST: usize = 1000;

/// Binance public market data client
#[derive(Clone)]
pub struct BinanceClient {
    client: Client,
    base_url: String,
}

/// Raw kline data from Binance API (array of arrays)
#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct RawKline(
    i64,    // 0: Open time
    String, // 1: Open
    String, // 2: High
    String, // 3: Low
    String, // 4: Close
    String, // 5: Volume
    i64,    // 6: Close time
    String, // 7: Quote asset volume
    u64,    // 8: Number of trades
    String, // 9: Taker buy base
    String, // 10: Taker buy quote
    String, // 11: Ignore
);

impl RawKline {
    fn into_candle(self) -> Option<Candle> {
        Some(Candle {
            open_time: self.0,
            open: self.1.parse().ok()?,
            high: self.2.parse().ok()?,
            low: self.3.parse().ok()?,
            close: self.4.parse().ok()?,
            volume: self.5.parse().ok()?,
            close_time: self.6,
        })
    }
}

/// Binance error payload, e.g. `{"code":-1121,"msg":"Invalid symbol."}`
#[derive(Debug, Deserialize)]
struct ApiError {
    msg: String,
}

fn parse_klines(body: &str) -> Result<Vec<Candle>> {
    let raw: Vec<RawKline> = serde_json::from_str(body).context("malformed klines payload")?;
    Ok(raw.into_iter().filter_map(RawKline::into_candle).collect())
}

impl BinanceClient {
    /// Create a new Binance client with default base URL
    pub fn new() -> Result<Self> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self> {
        Ok(Self {
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .context("failed to build HTTP client")?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Fetch up to `limit` klines ending at `end_time` (latest when `None`)
    pub async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        end_time: Option<i64>,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let mut url = format!(
            "{}/api/v3/klines?symbol={}&interval={}",
            self.base_url, symbol, interval
        );
        if let Some(end) = end_time {
            url.push_str(&format!("&endTime={}", end));
        }
        url.push_str(&format!("&limit={}", limit.clamp(1, MAX_KLINES_PER_REQUEST)));

        debug!(symbol, interval, ?end_time, "Fetching klines from Binance");

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            if status == StatusCode::BAD_REQUEST {
                if let Ok(err) = serde_json::from_str::<ApiError>(&body) {
                    if err.msg.contains("Invalid symbol") {
                        anyhow::bail!("unknown symbol {}", symbol);
                    }
                }
            }
            anyhow::bail!("Binance API error {}: {}", status, body);
        }

        let klines = parse_klines(&body)?;
        debug!(count = klines.len(), "Fetched klines");
        Ok(klines)
    }

    /// The most recent `lookback` klines, paging backwards past the
    /// per-request cap
    pub async fn fetch_recent(
        &self,
        symbol: &str,
        interval: &str,
        lookback: usize,
    ) -> Result<Vec<Candle>> {
        let mut all_klines: Vec<Candle> = Vec::with_capacity(lookback);
        let mut end_time = None;

        while all_klines.len() < lookback {
            let remaining = lookback - all_klines.len();
            let page = self
                .get_klines(symbol, interval, end_time, remaining)
                .await?;
            let Some(first) = page.first() else {
                break;
            };
            end_time = Some(first.open_time - 1);
            let short_page = page.len() < remaining.min(MAX_KLINES_PER_REQUEST);
            all_klines.extend(page);
            if short_page {
                break;
            }

            // Small delay to respect rate limits
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        all_klines.sort_by_key(|c| c.open_time);
        all_klines.dedup_by_key(|c| c.open_time);
        if all_klines.len() > lookback {
            all_klines.drain(..all_klines.len() - lookback);
        }
        Ok(all_klines)
    }
}

#[async_trait]
impl CandleSource for BinanceClient {
    async fn fetch_candles(
        &self,
        symbol: &str,
        interval: &str,
        lookback: usize,
    ) -> EngineResult<Vec<Candle>> {
        self.fetch_recent(symbol, interval, lookback)
            .await
            .map_err(|e| EngineError::DataUnavailable {
                symbol: symbol.to_string(),
                reason: format!("{e:#}"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYLOAD: &str = r#"[
        [1700000000000,"100.5","101.0","99.5","100.8","12.5",1700000899999,"1260.0",42,"6.0","600.0","0"],
        [1700000900000,"100.8","102.0","100.1","101.9","8.25",1700001799999,"840.0",30,"4.0","400.0","0"]
    ]"#;

    #[test]
    fn test_parse_klines() {
        let candles = parse_klines(PAYLOAD).unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].open_time, 1_700_000_000_000);
        assert_eq!(candles[0].close, 100.8);
        assert_eq!(candles[1].volume, 8.25);
        assert_eq!(candles[1].close_time, 1_700_001_799_999);
    }

    #[test]
    fn test_parse_klines_skips_unparsable_rows() {
        let payload = r#"[
            [1700000000000,"abc","101.0","99.5","100.8","12.5",1700000899999,"0",1,"0","0","0"],
            [1700000900000,"100.8","102.0","100.1","101.9","8.25",1700001799999,"0",1,"0","0","0"]
        ]"#;
        let candles = parse_klines(payload).unwrap();
        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].open_time, 1_700_000_900_000);
    }

    #[test]
    fn test_parse_klines_rejects_error_object() {
        assert!(parse_klines(r#"{"code":-1121,"msg":"Invalid symbol."}"#).is_err());
    }

    #[test]
    fn test_with_base_url_trims_slash() {
        let client = BinanceClient::with_base_url("http://localhost:9/").unwrap();
        assert_eq!(client.base_url, "http://localhost:9");
    }
}
