//! Elia Open Data client (solar and wind datasets)

use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::config::FetchConfig;
use crate::error::{Error, Result, SourceError};
use crate::types::SourceType;

/// One page of the explore API `records` endpoint
#[derive(Debug, Deserialize)]
struct RecordsPage {
    #[serde(default)]
    results: Vec<Value>,
}

/// Client for the Elia explore API v2.1
///
/// A day is requested page by page (`limit`/`offset`, ordered by `datetime`)
/// until the API returns an empty page; the pages are concatenated into one
/// JSON array.
#[derive(Clone, Debug)]
pub struct EliaClient {
    http: reqwest::Client,
    base_url: String,
    solar_dataset: String,
    wind_dataset: String,
    solar_region: Option<String>,
    wind_region: Option<String>,
    page_limit: u32,
}

impl EliaClient {
    /// Build a client from the fetch settings
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("energy-ingest/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.elia_base_url.trim_end_matches('/').to_string(),
            solar_dataset: config.solar_dataset.clone(),
            wind_dataset: config.wind_dataset.clone(),
            solar_region: config.solar_region.clone(),
            wind_region: config.wind_region.clone(),
            page_limit: config.page_limit,
        })
    }

    fn dataset(&self, source: SourceType) -> std::result::Result<(&str, Option<&str>), SourceError> {
        match source {
            SourceType::Solar => Ok((&self.solar_dataset, self.solar_region.as_deref())),
            SourceType::Wind => Ok((&self.wind_dataset, self.wind_region.as_deref())),
            SourceType::Price => Err(SourceError::Decode(
                "prices are not published on the Elia open data platform".to_string(),
            )),
        }
    }

    /// All records of one day as a JSON array payload
    pub async fn fetch_day(
        &self,
        source: SourceType,
        date: NaiveDate,
    ) -> std::result::Result<Vec<u8>, SourceError> {
        let (dataset, region) = self.dataset(source)?;
        let url = format!("{}/{}/records", self.base_url, dataset);
        let day_refine = format!("datetime:\"{}\"", date.format("%Y-%m-%d"));

        let mut records: Vec<Value> = Vec::new();
        let mut offset: u32 = 0;
        loop {
            let mut query: Vec<(&str, String)> = vec![
                ("order_by", "datetime".to_string()),
                ("limit", self.page_limit.to_string()),
                ("offset", offset.to_string()),
                ("refine", day_refine.clone()),
            ];
            if let Some(region) = region {
                query.push(("refine", format!("region:\"{}\"", region)));
            }

            let response = self.http.get(&url).query(&query).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(SourceError::Status {
                    status: status.as_u16(),
                    url: response.url().to_string(),
                });
            }

            let body = response.bytes().await?;
            let page: RecordsPage = serde_json::from_slice(&body)
                .map_err(|e| SourceError::Decode(format!("unexpected response from {}: {}", url, e)))?;

            if page.results.is_empty() {
                break;
            }
            debug!(
                source = %source,
                date = %date,
                offset = offset,
                count = page.results.len(),
                "Fetched page"
            );
            records.extend(page.results);
            offset += self.page_limit;
        }

        serde_json::to_vec(&Value::Array(records))
            .map_err(|e| SourceError::Decode(format!("Failed to encode records: {}", e)))
    }
}
