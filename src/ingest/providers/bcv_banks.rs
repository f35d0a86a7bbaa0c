// src/ingest/providers/bcv_banks.rs
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use scraper::{Html, Selector};
use tokio_util::sync::CancellationToken;

use crate::ingest::providers::bcv::{parse_bcv_number, selector, text_of, utc_midnight, HtmlSource};
use crate::ingest::types::{Currency, ExchangeRate, RateProvider, RateType, Source};

pub const BCV_BANKS_URL: &str = "https://www.bcv.org.ve/tasas-informativas-sistema-bancario";
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Venezuela has been on UTC-4 without DST since 2016.
const CARACAS_UTC_OFFSET_HOURS: i64 = -4;
/// Older tables mean the page stopped updating.
const MAX_AGE_DAYS: i64 = 7;

/// Per-bank USD buy/sell rates published by BCV. Each bank becomes its own
/// source.
pub struct BcvBanksProvider {
    page: HtmlSource,
    interval: Duration,
}

impl BcvBanksProvider {
    pub fn new(timeout: Duration, insecure_tls: bool) -> Result<Self> {
        Self::from_url(BCV_BANKS_URL, timeout, insecure_tls)
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
impl RateProvider for BcvBanksProvider {
    fn name(&self) -> &str {
        "BCV Banks"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn fetch(&self, cancel: &CancellationToken) -> Result<Vec<ExchangeRate>> {
        let html = self.page.load(cancel).await?;
        parse_bank_rates(&html, Utc::now())
    }
}

/// Calendar date in Caracas for an instant.
fn caracas_date(t: DateTime<Utc>) -> NaiveDate {
    (t + chrono::Duration::hours(CARACAS_UTC_OFFSET_HOURS)).date_naive()
}

struct BankRow {
    date: NaiveDate,
    bank: String,
    buy: f64,
    sell: f64,
}

/// Extracts the newest day of bank rates from the table, as seen at `now`.
///
/// Rows dated after today (Caracas) or that fail to parse are skipped. Only
/// rows of the most recent remaining date are returned, as one BUY and one
/// SELL rate per bank, effective at UTC midnight of that date.
pub fn parse_bank_rates(html: &str, now: DateTime<Utc>) -> Result<Vec<ExchangeRate>> {
    let today = caracas_date(now);
    let rows = parse_rows(html, today)?;

    let Some(chosen) = rows.iter().map(|r| r.date).max() else {
        bail!("no bank table rows found");
    };
    if (today - chosen).num_days() > MAX_AGE_DAYS {
        bail!("latest available date too old: {chosen}");
    }

    let as_of = utc_midnight(chosen);
    let out: Vec<ExchangeRate> = rows
        .into_iter()
        .filter(|r| r.date == chosen)
        .flat_map(|r| {
            let source = Source::new(r.bank);
            [(RateType::Buy, r.buy), (RateType::Sell, r.sell)].map(|(rate_type, rate)| ExchangeRate {
                as_of,
                fetched_at: now,
                base: Currency::Usd,
                target: Currency::Ves,
                rate_type,
                source: source.clone(),
                rate,
            })
        })
        .collect();

    Ok(out)
}

fn parse_rows(html: &str, today: NaiveDate) -> Result<Vec<BankRow>> {
    let doc = Html::parse_document(html);
    let row_sel = selector("table.views-table tbody tr")?;
    let date_sel = selector("td.views-field-field-fecha-del-indicador span.date-display-single")?;
    let bank_sel = selector("td.views-field-views-conditional")?;
    let buy_sel = selector("td.views-field-field-tasa-compra")?;
    let sell_sel = selector("td.views-field-field-tasa-venta")?;

    let mut rows = Vec::new();
    for tr in doc.select(&row_sel) {
        let Some(date) = tr
            .select(&date_sel)
            .next()
            .and_then(|el| el.value().attr("content"))
            .and_then(|c| DateTime::parse_from_rfc3339(c.trim()).ok())
            .map(|t| caracas_date(t.with_timezone(&Utc)))
        else {
            continue;
        };
        if date > today {
            continue;
        }

        let cell = |sel: &Selector| tr.select(sel).next().map(text_of).unwrap_or_default();
        let bank = cell(&bank_sel);
        if bank.is_empty() {
            continue;
        }
        let (Ok(buy), Ok(sell)) = (parse_bcv_number(&cell(&buy_sel)), parse_bcv_number(&cell(&sell_sel))) else {
            continue;
        };

        rows.push(BankRow { date, bank, buy, sell });
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn row(date: &str, bank: &str, buy: &str, sell: &str) -> String {
        format!(
            r#"<tr>
              <td class="views-field views-field-field-fecha-del-indicador"><span class="date-display-single" content="{date}">x</span></td>
              <td class="views-field views-field-views-conditional"> {bank} </td>
              <td class="views-field views-field-field-tasa-compra">{buy}</td>
              <td class="views-field views-field-field-tasa-venta">{sell}</td>
            </tr>"#
        )
    }

    fn table(rows: &[String]) -> String {
        format!(
            r#"<table class="views-table"><thead><tr><th>Fecha</th></tr></thead><tbody>{}</tbody></table>"#,
            rows.concat()
        )
    }

    #[test]
    fn caracas_day_boundary() {
        // 02:00 UTC is still the previous evening in Caracas
        let t = Utc.with_ymd_and_hms(2026, 1, 14, 2, 0, 0).unwrap();
        assert_eq!(caracas_date(t), NaiveDate::from_ymd_opt(2026, 1, 13).unwrap());
    }

    #[test]
    fn future_rows_and_bad_numbers_are_skipped() {
        let now = Utc.with_ymd_and_hms(2026, 1, 13, 15, 0, 0).unwrap();
        let html = table(&[
            row("2026-01-14T00:00:00-04:00", "Futuro", "1,0", "2,0"),
            row("2026-01-13T00:00:00-04:00", "Banesco", "n/a", "36,90"),
            row("2026-01-13T00:00:00-04:00", "Mercantil", "36,20", "36,80"),
        ]);
        let rates = parse_bank_rates(&html, now).unwrap();
        assert_eq!(rates.len(), 2);
        assert!(rates.iter().all(|r| r.source.as_str() == "Mercantil"));
    }

    #[test]
    fn stale_table_is_an_error() {
        let now = Utc.with_ymd_and_hms(2026, 1, 30, 15, 0, 0).unwrap();
        let html = table(&[row("2026-01-13T00:00:00-04:00", "Mercantil", "36,20", "36,80")]);
        let err = parse_bank_rates(&html, now).unwrap_err();
        assert!(err.to_string().contains("too old"));
    }

    #[test]
    fn empty_table_is_an_error() {
        assert!(parse_bank_rates(&table(&[]), Utc::now()).is_err());
    }
}
