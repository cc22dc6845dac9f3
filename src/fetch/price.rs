//! Monthly price exports

use async_trait::async_trait;
use chrono::{Months, NaiveDate};

use crate::config::FetchConfig;
use crate::error::{Error, Result, SourceError};

/// Anything that can produce the raw CSV export of one month of prices
///
/// The market operator only offers the export through its website; this trait
/// is the seam where a scraper, a mirror or a test double is plugged in.
#[async_trait]
pub trait PriceExport: Send + Sync {
    /// Raw CSV bytes (as delivered, ISO-8859-1) for the given month
    async fn export_month(&self, year: i32, month: u32) -> std::result::Result<Vec<u8>, SourceError>;
}

/// Export window of a month as `(from, until)` in `dd/mm/yyyy`
///
/// `until` is the first day of the following month.
pub fn export_window(year: i32, month: u32) -> Option<(String, String)> {
    let from = NaiveDate::from_ymd_opt(year, month, 1)?;
    let until = from.checked_add_months(Months::new(1))?;
    Some((
        from.format("%d/%m/%Y").to_string(),
        until.format("%d/%m/%Y").to_string(),
    ))
}

/// Downloads the export from a URL template with `{from}` and `{until}` placeholders
#[derive(Clone, Debug)]
pub struct CsvExportClient {
    http: reqwest::Client,
    url_template: String,
}

impl CsvExportClient {
    /// Build a client for the given template
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created
    pub fn new(url_template: impl Into<String>, config: &FetchConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("energy-ingest/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            url_template: url_template.into(),
        })
    }

    /// URL of the export for a month
    pub fn url_for(&self, year: i32, month: u32) -> Option<String> {
        let (from, until) = export_window(year, month)?;
        Some(
            self.url_template
                .replace("{from}", &from)
                .replace("{until}", &until),
        )
    }
}

#[async_trait]
impl PriceExport for CsvExportClient {
    async fn export_month(&self, year: i32, month: u32) -> std::result::Result<Vec<u8>, SourceError> {
        let url = self
            .url_for(year, month)
            .ok_or_else(|| SourceError::Decode(format!("invalid month {}-{:02}", year, month)))?;

        let response = self.http.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                status: status.as_u16(),
                url,
            });
        }
        Ok(response.bytes().await?.to_vec())
    }
}

/// Export used when no price source is configured; every month fails permanently
#[derive(Clone, Copy, Debug, Default)]
pub struct NoPriceExport;

#[async_trait]
impl PriceExport for NoPriceExport {
    async fn export_month(&self, year: i32, month: u32) -> std::result::Result<Vec<u8>, SourceError> {
        Err(SourceError::Decode(format!(
            "no price export configured, cannot fetch {}-{:02}",
            year, month
        )))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_window_ends_on_first_of_next_month() {
        assert_eq!(
            export_window(2024, 2),
            Some(("01/02/2024".to_string(), "01/03/2024".to_string()))
        );
        assert_eq!(
            export_window(2023, 12),
            Some(("01/12/2023".to_string(), "01/01/2024".to_string()))
        );
        assert_eq!(export_window(2023, 13), None);
    }

    #[test]
    fn template_placeholders_are_filled() {
        let client = CsvExportClient::new(
            "https://prices.example/export?from={from}&until={until}",
            &FetchConfig::default(),
        )
        .unwrap();
        assert_eq!(
            client.url_for(2024, 11).as_deref(),
            Some("https://prices.example/export?from=01/11/2024&until=01/12/2024")
        );
    }
}
