use crate::enrich::enrich;
use crate::types::{EnrichedRecord, RawRecord, SourceType};
use chrono::{Duration, NaiveDate};


/// `count` consecutive quarter-hour solar records starting at midnight of `date`
fn solar_records(date: NaiveDate, count: usize) -> Vec<EnrichedRecord> {
    let start = date.and_hms_opt(0, 0, 0).unwrap();
    (0..count)
        .map(|i| {
            let at = start + Duration::minutes(15 * i as i64);
            record(
                SourceType::Solar,
                &format!("{}+00:00", at.format("%Y-%m-%dT%H:%M:%S")),
                Some(i as f64),
            )
        })
        .collect()
}

fn record(source: SourceType, timestamp: &str, value: Option<f64>) -> EnrichedRecord {
    let mut fields = serde_json::Map::new();
    fields.insert("region".to_string(), "Belgium".into());
    enrich(RawRecord {
        source,
        timestamp: timestamp.to_string(),
        value,
        fields,
    })
    .unwrap()
}
