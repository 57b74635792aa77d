//! Binance spot REST client implementing the execution gateway.
//!
//! Handles:
//! - Public market data (klines, ticker, exchange filters)
//! - HMAC-SHA256 signed account endpoints (balance, orders, trade history)
//! - Dry-run mode that simulates fills at the last price

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, Response};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::de::DeserializeOwned;
use serde_json::Value;
use sha2::Sha256;
use tracing::{debug, info, warn};

use crate::error::GatewayError;
use crate::models::{group_by_order, Bar, Fill, LogicalFill, Side};
use crate::trading::ExecutionGateway;

use super::types::*;

const TESTNET_URL: &str = "https://testnet.binance.vision/api";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const RECV_WINDOW_MS: u64 = 5000;

/// Quote balance reported in dry-run mode without account credentials.
const PAPER_BALANCE: Decimal = dec!(1000);

/// Error codes Binance returns for orders that will never be accepted as sent.
const REJECTION_CODES: &[i64] = &[-1013, -1111, -2010, -2011];

type HmacSha256 = Hmac<Sha256>;

/// API key plus a MAC pre-keyed with the secret.
struct Credentials {
    api_key: String,
    mac: HmacSha256,
}

/// Client for the Binance spot API.
pub struct BinanceClient {
    http: Client,
    base_url: String,
    credentials: Option<Credentials>,
    dry_run: bool,
}

impl BinanceClient {
    /// Create a new client.
    ///
    /// # Arguments
    /// * `base_url` - REST root including `/api`, e.g. the testnet URL
    /// * `keys` - API key and secret; without them orders are simulated
    /// * `dry_run` - simulate orders even when keys are present
    pub fn new(base_url: &str, keys: Option<(String, String)>, dry_run: bool) -> Result<Self> {
        let http = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        let credentials = match keys {
            Some((api_key, secret)) => Some(Credentials {
                api_key,
                mac: HmacSha256::new_from_slice(secret.as_bytes())
                    .map_err(|e| anyhow::anyhow!("Invalid API secret: {}", e))?,
            }),
            None => None,
        };

        if credentials.is_none() && !dry_run {
            warn!("Exchange credentials not configured. Orders will be simulated.");
        }

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            dry_run: dry_run || credentials.is_none(),
            credentials,
        })
    }

    /// Create from environment variables:
    /// - BINANCE_API_KEY
    /// - BINANCE_API_SECRET
    /// - BINANCE_BASE_URL (defaults to the spot testnet)
    pub fn from_env(dry_run: bool) -> Result<Self> {
        let base_url = std::env::var("BINANCE_BASE_URL").unwrap_or_else(|_| TESTNET_URL.to_string());
        let keys = match (std::env::var("BINANCE_API_KEY"), std::env::var("BINANCE_API_SECRET")) {
            (Ok(key), Ok(secret)) if !key.is_empty() && !secret.is_empty() => Some((key, secret)),
            _ => None,
        };

        Self::new(&base_url, keys, dry_run)
    }

    /// Whether orders are simulated.
    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Hex HMAC-SHA256 of a query string.
    fn sign(mac: &HmacSha256, query: &str) -> String {
        let mut mac = mac.clone();
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn encode_query(params: &[(&str, String)]) -> String {
        params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Map a non-2xx response body to a gateway error.
    fn classify_error(status: u16, body: String) -> GatewayError {
        if status == 400 {
            if let Ok(err) = serde_json::from_str::<ApiErrorBody>(&body) {
                if REJECTION_CODES.contains(&err.code) {
                    return GatewayError::Rejected(err.msg);
                }
            }
        }
        GatewayError::Api { status, body }
    }

    async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, GatewayError> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Self::classify_error(status.as_u16(), body));
        }

        resp.json().await.map_err(|e| GatewayError::Decode(e.to_string()))
    }

    async fn get_public<T: DeserializeOwned>(&self, path: &str, params: &[(&str, String)]) -> Result<T, GatewayError> {
        let url = format!("{}{}?{}", self.base_url, path, Self::encode_query(params));
        debug!(url = %url, "GET");

        let resp = self.http.get(&url).send().await?;
        Self::decode(resp).await
    }

    async fn signed<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        mut params: Vec<(&str, String)>,
    ) -> Result<T, GatewayError> {
        let creds = self
            .credentials
            .as_ref()
            .ok_or_else(|| GatewayError::Rejected("API credentials not configured".to_string()))?;

        params.push(("recvWindow", RECV_WINDOW_MS.to_string()));
        params.push(("timestamp", Utc::now().timestamp_millis().to_string()));
        let query = Self::encode_query(&params);
        let signature = Self::sign(&creds.mac, &query);

        let url = format!("{}{}?{}&signature={}", self.base_url, path, query, signature);
        debug!(method = %method, path = %path, "Signed request");

        let resp = self
            .http
            .request(method, &url)
            .header("X-MBX-APIKEY", &creds.api_key)
            .send()
            .await?;
        Self::decode(resp).await
    }

    /// Simulated market order filled at the last price with no fee.
    async fn simulate_order(&self, symbol: &str, side: Side, quantity: Decimal) -> Result<LogicalFill, GatewayError> {
        let price = self.fetch_ticker(symbol).await?;
        let order_id = format!("dry-{}", uuid::Uuid::new_v4());

        info!(
            symbol = %symbol,
            side = %side,
            quantity = %quantity,
            price = %price,
            "[DRY RUN] Simulated market order"
        );

        Ok(LogicalFill {
            order_id,
            symbol: symbol.to_string(),
            side,
            quantity,
            avg_price: price,
            fee: Decimal::ZERO,
            timestamp: Utc::now(),
        })
    }
}

#[async_trait]
impl ExecutionGateway for BinanceClient {
    async fn fetch_ohlcv(&self, symbol: &str, timeframe: &str, limit: u32) -> Result<Vec<Bar>, GatewayError> {
        let rows: Vec<Vec<Value>> = self
            .get_public(
                "/v3/klines",
                &[
                    ("symbol", symbol.to_string()),
                    ("interval", timeframe.to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;

        // The last row is the candle still forming until its close time passes
        let now_ms = Utc::now().timestamp_millis();
        rows.iter()
            .filter(|row| kline_is_closed(row, now_ms))
            .map(|row| parse_kline(row))
            .collect()
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Decimal, GatewayError> {
        let ticker: TickerPrice = self
            .get_public("/v3/ticker/price", &[("symbol", symbol.to_string())])
            .await?;
        Ok(ticker.price)
    }

    async fn fetch_balance(&self, asset: &str) -> Result<Decimal, GatewayError> {
        if self.credentials.is_none() {
            return Ok(PAPER_BALANCE);
        }

        let account: AccountInfo = self.signed(Method::GET, "/v3/account", Vec::new()).await?;
        Ok(account
            .balances
            .iter()
            .find(|b| b.asset == asset)
            .map(|b| b.free)
            .unwrap_or(Decimal::ZERO))
    }

    async fn create_market_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: Decimal,
    ) -> Result<LogicalFill, GatewayError> {
        if self.dry_run {
            return self.simulate_order(symbol, side, quantity).await;
        }

        let resp: OrderResponse = self
            .signed(
                Method::POST,
                "/v3/order",
                vec![
                    ("symbol", symbol.to_string()),
                    ("side", side.as_str().to_string()),
                    ("type", "MARKET".to_string()),
                    ("quantity", quantity.normalize().to_string()),
                    ("newOrderRespType", "FULL".to_string()),
                ],
            )
            .await?;

        info!(
            symbol = %symbol,
            order_id = resp.order_id,
            status = %resp.status,
            executed = %resp.executed_qty,
            "Market order placed"
        );

        group_by_order(&resp.to_fills(side))
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::Rejected(format!("order {} returned no fills", resp.order_id)))
    }

    async fn quantity_precision(&self, symbol: &str) -> Result<u32, GatewayError> {
        let info: ExchangeInfo = self
            .get_public("/v3/exchangeInfo", &[("symbol", symbol.to_string())])
            .await?;

        info.symbols
            .iter()
            .find(|s| s.symbol == symbol)
            .and_then(SymbolInfo::quantity_precision)
            .ok_or_else(|| GatewayError::Decode(format!("no LOT_SIZE filter for {}", symbol)))
    }

    async fn fetch_my_trades(&self, symbol: &str) -> Result<Vec<Fill>, GatewayError> {
        let trades: Vec<AccountTrade> = self
            .signed(
                Method::GET,
                "/v3/myTrades",
                vec![("symbol", symbol.to_string()), ("limit", "1000".to_string())],
            )
            .await?;

        Ok(trades.into_iter().map(Fill::from).collect())
    }
}
