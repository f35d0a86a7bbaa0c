use std::cmp::Ordering;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::ingest::types::{Currency, ExchangeRate, RateProvider, RateType, Source};

pub const BINANCE_P2P_URL: &str = "https://p2p.binance.com/bapi/c2c/v2/friendly/c2c/adv/search";
pub const BINANCE_P2P_SOURCE: &str = "BinanceP2P";
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10 * 60);

const PAGES: u32 = 3;
const ROWS_PER_PAGE: u32 = 10;
const MEDIAN_SAMPLE: usize = 12;
const TYPICAL_AMOUNT: f64 = 100.0;
const MIN_AVAILABLE: f64 = 50.0;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchRequest {
    asset: Currency,
    fiat: Currency,
    trade_type: RateType,
    rows: u32,
    page: u32,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<RawOffer>,
}

#[derive(Debug, Deserialize)]
struct RawOffer {
    adv: RawAdv,
    #[serde(default)]
    advertiser: RawAdvertiser,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawAdv {
    price: Option<String>,
    min_single_trans_amount: Option<String>,
    max_single_trans_amount: Option<String>,
    surplus_amount: Option<String>,
    tradable_quantity: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawAdvertiser {
    month_order_count: i64,
    month_finish_rate: f64,
}

/// A parsed P2P advert.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Offer {
    pub price: f64,
    pub min_limit: f64,
    pub max_limit: f64,
    pub available: f64,
    pub orders: i64,
    pub finish_rate: f64,
    pub quality: f64,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct OfferFilter {
    pub min_orders: i64,
    pub min_finish: f64,
    pub min_available: f64,
    pub typical_amount: f64,
}

const STRICT: OfferFilter = OfferFilter {
    min_orders: 50,
    min_finish: 0.95,
    min_available: MIN_AVAILABLE,
    typical_amount: TYPICAL_AMOUNT,
};

const RELAXED: OfferFilter = OfferFilter {
    min_orders: 20,
    min_finish: 0.90,
    min_available: MIN_AVAILABLE,
    typical_amount: TYPICAL_AMOUNT,
};

/// USDT/VES buy and sell quotes from the Binance P2P advert board.
pub struct BinanceP2pProvider {
    mode: Mode,
    interval: Duration,
}

enum Mode {
    // Serves one canned response page; later pages come back empty.
    Fixture(String),
    Http { url: String, client: reqwest::Client },
}

impl BinanceP2pProvider {
    pub fn new(timeout: Duration) -> Result<Self> {
        Self::from_url(BINANCE_P2P_URL, timeout)
    }

    pub fn from_url(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building binance p2p http client")?;
        Ok(Self {
            mode: Mode::Http {
                url: url.into(),
                client,
            },
            interval: DEFAULT_INTERVAL,
        })
    }

    pub fn from_fixture(s: &str) -> Self {
        Self {
            mode: Mode::Fixture(s.to_string()),
            interval: DEFAULT_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    async fn fetch_page(&self, trade_type: RateType, page: u32) -> Result<Vec<Offer>> {
        match &self.mode {
            Mode::Fixture(s) => {
                if page == 1 {
                    parse_page(s)
                } else {
                    Ok(Vec::new())
                }
            }
            Mode::Http { url, client } => {
                let req = SearchRequest {
                    asset: Currency::Usdt,
                    fiat: Currency::Ves,
                    trade_type,
                    rows: ROWS_PER_PAGE,
                    page,
                };
                let body = client
                    .post(url)
                    .json(&req)
                    .send()
                    .await
                    .context("binance p2p http post()")?
                    .error_for_status()
                    .context("binance p2p status")?
                    .text()
                    .await
                    .context("binance p2p http .text()")?;
                parse_page(&body)
            }
        }
    }

    async fn fetch_offers(&self, trade_type: RateType, cancel: &CancellationToken) -> Result<Vec<Offer>> {
        let mut offers = Vec::with_capacity((PAGES * ROWS_PER_PAGE) as usize);
        for page in 1..=PAGES {
            let batch = tokio::select! {
                biased;
                _ = cancel.cancelled() => bail!("binance p2p fetch cancelled"),
                res = self.fetch_page(trade_type, page) => res?,
            };
            if batch.is_empty() {
                break;
            }
            offers.extend(batch);
        }

        if offers.is_empty() {
            bail!("no valid offers found for {trade_type}");
        }
        Ok(offers)
    }
}

#[async_trait]
impl RateProvider for BinanceP2pProvider {
    fn name(&self) -> &str {
        "Binance P2P (USDT)"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn fetch(&self, cancel: &CancellationToken) -> Result<Vec<ExchangeRate>> {
        let fetched_at = Utc::now();

        let buy = self.fetch_offers(RateType::Buy, cancel).await?;
        let buy = median_price(buy, RateType::Buy).context("BUY price")?;

        let sell = self.fetch_offers(RateType::Sell, cancel).await?;
        let sell = median_price(sell, RateType::Sell).context("SELL price")?;

        Ok([(RateType::Buy, buy), (RateType::Sell, sell)]
            .into_iter()
            .map(|(rate_type, rate)| ExchangeRate {
                as_of: fetched_at,
                fetched_at,
                base: Currency::Usdt,
                target: Currency::Ves,
                rate_type,
                source: Source::new(BINANCE_P2P_SOURCE),
                rate,
            })
            .collect())
    }
}

fn parse_page(s: &str) -> Result<Vec<Offer>> {
    let resp: SearchResponse = serde_json::from_str(s).context("parsing binance p2p json")?;
    Ok(resp.data.into_iter().filter_map(Offer::from_raw).collect())
}

impl Offer {
    fn from_raw(raw: RawOffer) -> Option<Self> {
        let price = parse_amount(raw.adv.price.as_deref())?;
        let available = parse_amount(raw.adv.surplus_amount.as_deref())
            .or_else(|| parse_amount(raw.adv.tradable_quantity.as_deref()))
            .unwrap_or(0.0);
        let finish_rate = normalize_finish_rate(raw.advertiser.month_finish_rate);
        let orders = raw.advertiser.month_order_count;
        Some(Self {
            price,
            min_limit: parse_amount(raw.adv.min_single_trans_amount.as_deref()).unwrap_or(0.0),
            max_limit: parse_amount(raw.adv.max_single_trans_amount.as_deref()).unwrap_or(0.0),
            available,
            orders,
            finish_rate,
            quality: wilson_lower_bound(finish_rate, orders),
        })
    }
}

fn parse_amount(s: Option<&str>) -> Option<f64> {
    s.map(str::trim)
        .filter(|v| !v.is_empty())
        .and_then(|v| v.parse::<f64>().ok())
}

/// Completion rates arrive either as a fraction or as a percentage.
pub(crate) fn normalize_finish_rate(rate: f64) -> f64 {
    if rate <= 0.0 {
        0.0
    } else if rate > 1.0 {
        rate / 100.0
    } else {
        rate
    }
}

/// Lower bound of the Wilson score interval (95%) for a completion rate.
pub(crate) fn wilson_lower_bound(rate: f64, n: i64) -> f64 {
    if n <= 0 {
        return 0.0;
    }
    let n = n as f64;
    let z = 1.96_f64;
    let denominator = 1.0 + z * z / n;
    let center = rate + z * z / (2.0 * n);
    let adjust = z * ((rate * (1.0 - rate) + z * z / (4.0 * n)) / n).sqrt();
    (center - adjust) / denominator
}

pub(crate) fn filter_offers(offers: &[Offer], f: OfferFilter) -> Vec<Offer> {
    offers
        .iter()
        .filter(|o| o.orders >= f.min_orders && o.finish_rate >= f.min_finish)
        .filter(|o| !(f.min_available > 0.0 && o.available > 0.0 && o.available < f.min_available))
        .filter(|o| {
            f.typical_amount <= 0.0
                || !((o.min_limit > 0.0 && f.typical_amount < o.min_limit)
                    || (o.max_limit > 0.0 && f.typical_amount > o.max_limit))
        })
        .cloned()
        .collect()
}

pub(crate) fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let n = values.len();
    Some(if n % 2 == 0 {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    } else {
        values[n / 2]
    })
}

/// Median of the best reputable offers, rounded to 4 decimals.
pub(crate) fn median_price(offers: Vec<Offer>, trade_type: RateType) -> Result<f64> {
    let mut picked = filter_offers(&offers, STRICT);
    if picked.len() < MEDIAN_SAMPLE {
        let relaxed = filter_offers(&offers, RELAXED);
        if relaxed.len() > picked.len() {
            picked = relaxed;
        }
    }
    if picked.is_empty() {
        picked = offers;
    }

    picked.sort_by(|a, b| {
        let by_price = match trade_type {
            RateType::Sell => b.price.total_cmp(&a.price),
            _ => a.price.total_cmp(&b.price),
        };
        match by_price {
            Ordering::Equal => b.quality.total_cmp(&a.quality),
            o => o,
        }
    });
    picked.truncate(MEDIAN_SAMPLE);

    let mut prices: Vec<f64> = picked.iter().map(|o| o.price).collect();
    let m = median(&mut prices).ok_or_else(|| anyhow!("no valid prices found for {trade_type}"))?;
    Ok((m * 1e4).round() / 1e4)
}
