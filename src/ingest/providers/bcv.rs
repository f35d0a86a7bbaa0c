// src/ingest/providers/bcv.rs
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use scraper::{ElementRef, Html, Selector};
use tokio_util::sync::CancellationToken;

use crate::ingest::types::{Currency, ExchangeRate, RateProvider, RateType, Source};

pub const BCV_URL: &str = "https://www.bcv.org.ve/";
pub const BCV_SOURCE: &str = "BCV";
/// The official rates are published once a day.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Section ids on the BCV home page and the currency each one quotes.
const SECTIONS: [(&str, Currency); 5] = [
    ("dolar", Currency::Usd),
    ("euro", Currency::Eur),
    ("yuan", Currency::Cny),
    ("lira", Currency::Try),
    ("rublo", Currency::Rub),
];

/// Where a BCV page comes from.
pub(crate) enum HtmlSource {
    Fixture(String),
    Http { url: String, client: reqwest::Client },
}

impl HtmlSource {
    /// `insecure_tls` skips certificate checks; bcv.org.ve has served an
    /// incomplete chain for years.
    pub(crate) fn http(url: impl Into<String>, timeout: Duration, insecure_tls: bool) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(insecure_tls)
            .build()
            .context("building bcv http client")?;
        Ok(HtmlSource::Http {
            url: url.into(),
            client,
        })
    }

    pub(crate) async fn load(&self, cancel: &CancellationToken) -> Result<String> {
        match self {
            HtmlSource::Fixture(s) => Ok(s.clone()),
            HtmlSource::Http { url, client } => {
                let request = async {
                    client
                        .get(url)
                        .send()
                        .await
                        .context("bcv http get()")?
                        .error_for_status()
                        .context("bcv status")?
                        .text()
                        .await
                        .context("bcv http .text()")
                };
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => bail!("bcv fetch cancelled"),
                    res = request => res,
                }
            }
        }
    }
}

pub(crate) fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow!("invalid selector {css:?}: {e:?}"))
}

pub(crate) fn text_of(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

/// BCV prints numbers with a comma decimal separator and dots for thousands:
/// "1.234,56" is 1234.56.
pub(crate) fn parse_bcv_number(s: &str) -> Result<f64> {
    let s = s.trim();
    if s.is_empty() {
        bail!("invalid rate: empty");
    }
    let normalized = s.replace('.', "").replace(',', ".");
    normalized
        .parse::<f64>()
        .with_context(|| format!("unable to parse rate {s:?}"))
}

pub(crate) fn utc_midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

/// Official USD, EUR, CNY, TRY and RUB mid rates against VES.
pub struct BcvProvider {
    page: HtmlSource,
    interval: Duration,
}

impl BcvProvider {
    pub fn new(timeout: Duration, insecure_tls: bool) -> Result<Self> {
        Self::from_url(BCV_URL, timeout, insecure_tls)
    }

    pub fn from_url(url: impl Into<String>, timeout: Duration, insecure_tls: bool) -> Result<Self> {
        Ok(Self {
            page: HtmlSource::http(url, timeout, insecure_tls)?,
            interval: DEFAULT_INTERVAL,
        })
    }

    pub fn from_fixture(html: &str) -> Self {
        Self {
            page: HtmlSource::Fixture(html.to_string()),
            interval: DEFAULT_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

#[async_trait]
impl RateProvider for BcvProvider {
    fn name(&self) -> &str {
        "BCV"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn fetch(&self, cancel: &CancellationToken) -> Result<Vec<ExchangeRate>> {
        let html = self.page.load(cancel).await?;
        parse_official_rates(&html, Utc::now())
    }
}

/// Extracts the official rates from the BCV home page.
///
/// Sections that are missing or unreadable are skipped; the page as a whole
/// is an error only when none of them yields a rate. `as_of` is the published
/// value date, or `fetched_at` when the page does not carry one.
pub fn parse_official_rates(html: &str, fetched_at: DateTime<Utc>) -> Result<Vec<ExchangeRate>> {
    let doc = Html::parse_document(html);
    let as_of = effective_date(&doc)?.unwrap_or(fetched_at);

    let primary = selector(".col-sm-6.col-xs-6.centrado")?;
    let fallback = selector(".centrado")?;

    let mut out = Vec::with_capacity(SECTIONS.len());
    for (id, currency) in SECTIONS {
        let Some(section) = doc.select(&selector(&format!("#{id}"))?).next() else {
            tracing::debug!(target: "ingest", section = id, "bcv section missing");
            continue;
        };

        let mut txt = section.select(&primary).next().map(text_of).unwrap_or_default();
        if txt.is_empty() {
            txt = section.select(&fallback).next().map(text_of).unwrap_or_default();
        }

        match parse_bcv_number(&txt) {
            Ok(v) => out.push(ExchangeRate {
                as_of,
                fetched_at,
                base: currency,
                target: Currency::Ves,
                rate_type: RateType::Mid,
                source: Source::new(BCV_SOURCE),
                rate: (v * 1e4).round() / 1e4,
            }),
            Err(e) => {
                tracing::debug!(target: "ingest", section = id, error = ?e, "bcv rate unreadable");
            }
        }
    }

    if out.is_empty() {
        bail!("no bcv rates found on page");
    }
    Ok(out)
}

/// The "Fecha Valor" shown next to the rates.
fn effective_date(doc: &Html) -> Result<Option<DateTime<Utc>>> {
    let tagged = selector(r#"span.date-display-single[property="dc:date"]"#)?;
    let any = selector("span.date-display-single")?;
    let Some(el) = doc.select(&tagged).next().or_else(|| doc.select(&any).next()) else {
        return Ok(None);
    };

    if let Some(content) = el.value().attr("content").map(str::trim).filter(|c| !c.is_empty()) {
        if let Ok(t) = DateTime::parse_from_rfc3339(content) {
            return Ok(Some(t.with_timezone(&Utc)));
        }
    }

    Ok(parse_spanish_date(&text_of(el)).map(utc_midnight))
}

/// Parses dates like "Martes, 13 Enero 2026"; the weekday is optional.
pub(crate) fn parse_spanish_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    let s = match s.find(',') {
        Some(i) => s[i + 1..].trim(),
        None => s,
    };

    let mut parts = s.split_whitespace();
    let day: u32 = parts.next()?.parse().ok()?;
    let month = match parts.next()?.to_lowercase().as_str() {
        "enero" => 1,
        "febrero" => 2,
        "marzo" => 3,
        "abril" => 4,
        "mayo" => 5,
        "junio" => 6,
        "julio" => 7,
        "agosto" => 8,
        "septiembre" | "setiembre" => 9,
        "octubre" => 10,
        "noviembre" => 11,
        "diciembre" => 12,
        _ => return None,
    };
    let year: i32 = parts.next()?.parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}
