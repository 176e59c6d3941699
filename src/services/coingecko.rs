//! CoinGecko markets client.
//!
//! One paged endpoint: `/coins/markets`, market-cap descending, `per_page`
//! assets per page. The client owns the retry/backoff policy and the token
//! bucket that enforces the upstream quota; callers only see a page result.

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::entities::coin_data;
use crate::error::FetchError;
use crate::services::{backoff, clock};

const QUOTE_CURRENCY: &str = "usd";
const BACKOFF_CAP: Duration = Duration::from_secs(30);
const ERROR_BODY_MAX: usize = 200;

// Declared column widths; oversized ids reject the row, other strings
// are truncated to fit.
pub const COIN_ID_MAX: usize = 100;
pub const SYMBOL_MAX: usize = 50;
pub const NAME_MAX: usize = 255;

const FALLBACK_RPS: NonZeroU32 = NonZeroU32::new(2).unwrap();
const BURST: NonZeroU32 = NonZeroU32::new(1).unwrap();

/// One asset object as returned by the markets endpoint. Numeric fields
/// arrive as JSON numbers or strings and deserialize to high-precision
/// decimals; anything missing stays null. Unknown fields are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct MarketTicker {
    #[serde(default)]
    pub id: Option<String>,
    pub symbol: Option<String>,
    pub name: Option<String>,
    pub image: Option<String>,
    pub current_price: Option<Decimal>,
    pub market_cap: Option<Decimal>,
    pub market_cap_rank: Option<i32>,
    pub fully_diluted_valuation: Option<Decimal>,
    pub total_volume: Option<Decimal>,
    pub circulating_supply: Option<Decimal>,
    pub max_supply: Option<Decimal>,
    pub price_change_24h: Option<Decimal>,
    pub price_change_percentage_24h: Option<Decimal>,
    #[serde(alias = "price_change_percentage_7d_in_currency")]
    pub price_change_percentage_7d: Option<Decimal>,
    #[serde(alias = "price_change_percentage_30d_in_currency")]
    pub price_change_percentage_30d: Option<Decimal>,
    pub market_cap_change_24h: Option<Decimal>,
    pub market_cap_change_percentage_24h: Option<Decimal>,
    pub ath: Option<Decimal>,
    pub ath_change_percentage: Option<Decimal>,
    pub ath_date: Option<String>,
    pub atl: Option<Decimal>,
    pub atl_change_percentage: Option<Decimal>,
    pub atl_date: Option<String>,
    pub last_updated: Option<String>,
}

/// Why a single row was dropped from a page.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum RowRejection {
    #[error("missing or empty asset id")]
    MissingId,
    #[error("asset id exceeds column width: {0}")]
    IdTooLong(String),
}

impl MarketTicker {
    /// Normalize into a snapshot row for the tick identified by
    /// `(aligned_time_ms, raw_time_ms)`.
    pub fn into_snapshot(
        self,
        aligned_time_ms: i64,
        raw_time_ms: i64,
    ) -> Result<coin_data::Model, RowRejection> {
        let coin_id = match self.id {
            Some(id) if !id.is_empty() => id,
            _ => return Err(RowRejection::MissingId),
        };
        if coin_id.chars().count() > COIN_ID_MAX {
            return Err(RowRejection::IdTooLong(coin_id));
        }

        Ok(coin_data::Model {
            time: aligned_time_ms,
            coin_id,
            raw_time: raw_time_ms,
            symbol: self.symbol.map(|s| truncate(s, SYMBOL_MAX)),
            name: self.name.map(|s| truncate(s, NAME_MAX)),
            image: self.image,
            current_price: self.current_price,
            market_cap: self.market_cap,
            market_cap_rank: self.market_cap_rank,
            fully_diluted_valuation: self.fully_diluted_valuation,
            total_volume: self.total_volume,
            circulating_supply: self.circulating_supply,
            max_supply: self.max_supply,
            price_change_24h: self.price_change_24h,
            price_change_percentage_24h: self.price_change_percentage_24h,
            price_change_percentage_7d: self.price_change_percentage_7d,
            price_change_percentage_30d: self.price_change_percentage_30d,
            market_cap_change_24h: self.market_cap_change_24h,
            market_cap_change_percentage_24h: self.market_cap_change_percentage_24h,
            ath: self.ath,
            ath_change_percentage: self.ath_change_percentage,
            ath_date: clock::rfc3339_to_ms(self.ath_date.as_deref()),
            atl: self.atl,
            atl_change_percentage: self.atl_change_percentage,
            atl_date: clock::rfc3339_to_ms(self.atl_date.as_deref()),
            last_updated: clock::rfc3339_to_ms(self.last_updated.as_deref()),
            created_at: Some(raw_time_ms),
        })
    }
}

fn truncate(s: String, max: usize) -> String {
    if s.chars().count() <= max {
        s
    } else {
        s.chars().take(max).collect()
    }
}

/// Normalize one page into snapshot rows for the tick. Rejected rows are
/// logged and counted, never fatal for the page.
pub fn normalize_page(
    items: Vec<MarketTicker>,
    aligned_time_ms: i64,
    raw_time_ms: i64,
) -> (Vec<coin_data::Model>, u32) {
    let mut rows = Vec::with_capacity(items.len());
    let mut rejected: u32 = 0;
    for ticker in items {
        match ticker.into_snapshot(aligned_time_ms, raw_time_ms) {
            Ok(row) => rows.push(row),
            Err(rejection) => {
                rejected += 1;
                tracing::warn!("row dropped: {}", rejection);
            }
        }
    }
    (rows, rejected)
}

#[derive(Clone)]
pub struct CoinGeckoClient {
    client: Client,
    base_url: String,
    api_key: String,
    page_size: u32,
    retries: u32,
    limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl CoinGeckoClient {
    /// The `Client` is built once in `main` and shared across components.
    pub fn new(http: Client, config: &Config) -> Self {
        // Burst 1: the bucket period doubles as the minimum inter-request gap.
        let period = Duration::from_secs_f64(1.0 / config.rate_limit_rps);
        let quota = Quota::with_period(period)
            .unwrap_or(Quota::per_second(FALLBACK_RPS))
            .allow_burst(BURST);

        Self {
            client: http,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            page_size: config.page_size,
            retries: config.retries.max(1),
            limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    /// Fetch one page, retrying transient failures with exponential backoff
    /// and honoring any `Retry-After` the upstream sends.
    pub async fn fetch_markets_page(&self, page: u32) -> Result<Vec<MarketTicker>, FetchError> {
        let mut attempt: u32 = 0;
        loop {
            self.limiter.until_ready().await;

            match self.request_page(page).await {
                Ok(items) => return Ok(items),
                Err(e) if e.is_transient() && attempt + 1 < self.retries => {
                    let wait = backoff::delay(attempt, retry_hint(&e), BACKOFF_CAP);
                    tracing::warn!(
                        page,
                        attempt = attempt + 1,
                        wait_ms = wait.as_millis() as u64,
                        "page fetch failed, retrying: {}",
                        e
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(e) if e.is_transient() => {
                    return Err(FetchError::RetriesExhausted {
                        page,
                        attempts: attempt + 1,
                        last_error: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn request_page(&self, page: u32) -> Result<Vec<MarketTicker>, FetchError> {
        let url = format!("{}/coins/markets", self.base_url);
        let per_page = self.page_size.to_string();
        let page_param = page.to_string();

        let response = self
            .client
            .get(&url)
            .header("accept", "application/json")
            .header("x-cg-pro-api-key", &self.api_key)
            .query(&[
                ("vs_currency", QUOTE_CURRENCY),
                ("order", "market_cap_desc"),
                ("per_page", per_page.as_str()),
                ("page", page_param.as_str()),
                ("sparkline", "false"),
                ("price_change_percentage", "24h,7d,30d"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok());
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                status,
                body: truncate(body, ERROR_BODY_MAX),
                retry_after_secs,
            });
        }

        Ok(response.json::<Vec<MarketTicker>>().await?)
    }
}

fn retry_hint(err: &FetchError) -> Option<Duration> {
    match err {
        FetchError::Status {
            retry_after_secs: Some(secs),
            ..
        } => Some(Duration::from_secs(*secs)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALIGNED: i64 = 1_699_999_920_000;
    const RAW: i64 = 1_700_000_030_000;

    #[test]
    fn deserializes_numbers_and_strings() {
        let payload = r#"[
            {"id": "btc", "current_price": "50000", "total_volume": "1000"},
            {"id": "eth", "symbol": "eth", "name": "Ethereum",
             "current_price": 3000.5, "total_volume": 500,
             "market_cap": 360000000000, "market_cap_rank": 2,
             "unknown_future_field": {"nested": true}}
        ]"#;

        let tickers: Vec<MarketTicker> = serde_json::from_str(payload).unwrap();
        assert_eq!(tickers.len(), 2);
        assert_eq!(
            tickers[0].current_price,
            Some(Decimal::from_str_exact("50000").unwrap())
        );
        assert_eq!(
            tickers[1].current_price,
            Some(Decimal::from_str_exact("3000.5").unwrap())
        );
        assert_eq!(tickers[1].market_cap_rank, Some(2));
        assert_eq!(tickers[0].market_cap, None);
    }

    #[test]
    fn passthrough_aliases_resolve() {
        let payload = r#"[{"id": "btc",
            "price_change_percentage_7d_in_currency": -1.25,
            "price_change_percentage_30d_in_currency": "4.5"}]"#;
        let tickers: Vec<MarketTicker> = serde_json::from_str(payload).unwrap();
        assert_eq!(
            tickers[0].price_change_percentage_7d,
            Some(Decimal::from_str_exact("-1.25").unwrap())
        );
        assert_eq!(
            tickers[0].price_change_percentage_30d,
            Some(Decimal::from_str_exact("4.5").unwrap())
        );
    }

    #[test]
    fn normalizes_tick_times() {
        let payload = r#"[{"id": "btc", "current_price": "50000",
            "last_updated": "2023-11-14T22:13:50.000Z"}]"#;
        let tickers: Vec<MarketTicker> = serde_json::from_str(payload).unwrap();
        let row = tickers[0].clone().into_snapshot(ALIGNED, RAW).unwrap();

        assert_eq!(row.time, ALIGNED);
        assert_eq!(row.raw_time, RAW);
        assert_eq!(row.created_at, Some(RAW));
        assert_eq!(row.last_updated, Some(1_700_000_030_000));
        assert_eq!(row.time % 180_000, 0);
        assert!(row.time <= row.raw_time);
    }

    #[test]
    fn rejects_missing_or_empty_id() {
        let ticker: MarketTicker = serde_json::from_str(r#"{"symbol": "???"}"#).unwrap();
        assert_eq!(
            ticker.into_snapshot(ALIGNED, RAW),
            Err(RowRejection::MissingId)
        );

        let ticker: MarketTicker = serde_json::from_str(r#"{"id": ""}"#).unwrap();
        assert_eq!(
            ticker.into_snapshot(ALIGNED, RAW),
            Err(RowRejection::MissingId)
        );
    }

    #[test]
    fn rejects_oversized_id_but_truncates_other_strings() {
        let long_id = "x".repeat(COIN_ID_MAX + 1);
        let ticker: MarketTicker =
            serde_json::from_str(&format!(r#"{{"id": "{long_id}"}}"#)).unwrap();
        assert!(matches!(
            ticker.into_snapshot(ALIGNED, RAW),
            Err(RowRejection::IdTooLong(_))
        ));

        let long_name = "n".repeat(NAME_MAX + 40);
        let long_symbol = "s".repeat(SYMBOL_MAX + 6);
        let ticker: MarketTicker = serde_json::from_str(&format!(
            r#"{{"id": "ok", "name": "{long_name}", "symbol": "{long_symbol}"}}"#
        ))
        .unwrap();
        let row = ticker.into_snapshot(ALIGNED, RAW).unwrap();
        assert_eq!(row.name.unwrap().chars().count(), NAME_MAX);
        assert_eq!(row.symbol.unwrap().chars().count(), SYMBOL_MAX);
    }

    #[test]
    fn normalizes_whole_page() {
        // Cold-start page: two assets, bucket boundary just before the
        // fetch instant.
        let payload = r#"[
            {"id": "btc", "current_price": "50000", "total_volume": "1000"},
            {"id": "eth", "current_price": "3000", "total_volume": "500"}
        ]"#;
        let tickers: Vec<MarketTicker> = serde_json::from_str(payload).unwrap();
        let (rows, rejected) = normalize_page(tickers, ALIGNED, RAW);

        assert_eq!(rejected, 0);
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.time == ALIGNED && r.raw_time == RAW));
        assert_eq!(rows[0].coin_id, "btc");
        assert_eq!(
            rows[0].current_price,
            Some(Decimal::from_str_exact("50000").unwrap())
        );
        assert_eq!(rows[1].coin_id, "eth");
        assert_eq!(
            rows[1].total_volume,
            Some(Decimal::from_str_exact("500").unwrap())
        );
    }

    #[test]
    fn bad_rows_are_counted_not_fatal() {
        let payload = r#"[
            {"id": "btc", "current_price": 50000},
            {"symbol": "noid"},
            {"id": ""}
        ]"#;
        let tickers: Vec<MarketTicker> = serde_json::from_str(payload).unwrap();
        let (rows, rejected) = normalize_page(tickers, ALIGNED, RAW);
        assert_eq!(rows.len(), 1);
        assert_eq!(rejected, 2);
    }

    #[test]
    fn null_numerics_stay_null() {
        let payload = r#"[{"id": "btc", "current_price": null, "max_supply": null}]"#;
        let tickers: Vec<MarketTicker> = serde_json::from_str(payload).unwrap();
        let row = tickers[0].clone().into_snapshot(ALIGNED, RAW).unwrap();
        assert_eq!(row.current_price, None);
        assert_eq!(row.max_supply, None);
    }
}
