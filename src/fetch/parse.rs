//! Payload decoding for stored and freshly fetched raw data

use serde_json::{Map, Value};

use crate::error::SourceError;
use crate::types::{RawRecord, SourceType};

/// Timestamp field of Elia records
const ELIA_TIMESTAMP_FIELD: &str = "datetime";
/// Measurement field of Elia records
const ELIA_VALUE_FIELD: &str = "measured";
/// Timestamp column of the price export
const PRICE_DATE_COLUMN: &str = "Date";
/// Price column of the price export
const PRICE_VALUE_COLUMN: &str = "Euro";

/// Decode a raw payload into records
///
/// An empty payload yields no records.
pub fn parse_payload(source: SourceType, payload: &[u8]) -> Result<Vec<RawRecord>, SourceError> {
    if payload.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    match source {
        SourceType::Solar | SourceType::Wind => parse_elia_json(source, payload),
        SourceType::Price => parse_price_csv(payload),
    }
}

fn parse_elia_json(source: SourceType, payload: &[u8]) -> Result<Vec<RawRecord>, SourceError> {
    let value: Value = serde_json::from_slice(payload)
        .map_err(|e| SourceError::Decode(format!("{source} payload is not JSON: {e}")))?;

    let items = match value {
        Value::Array(items) => items,
        object @ Value::Object(_) => vec![object],
        other => {
            return Err(SourceError::Decode(format!(
                "{source} payload must be an array of records, got {}",
                json_kind(&other)
            )));
        }
    };

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            let Value::Object(mut fields) = item else {
                return Err(SourceError::Decode(format!(
                    "{source} record {index} is not an object"
                )));
            };
            let timestamp = match fields.remove(ELIA_TIMESTAMP_FIELD) {
                Some(Value::String(ts)) => ts,
                _ => {
                    return Err(SourceError::Decode(format!(
                        "{source} record {index} has no '{ELIA_TIMESTAMP_FIELD}' text"
                    )));
                }
            };
            let value = fields.get(ELIA_VALUE_FIELD).and_then(Value::as_f64);
            Ok(RawRecord {
                source,
                timestamp,
                value,
                fields,
            })
        })
        .collect()
}

fn parse_price_csv(payload: &[u8]) -> Result<Vec<RawRecord>, SourceError> {
    // ISO-8859-1 maps every byte to the code point of the same value
    let text: String = payload.iter().map(|&b| char::from(b)).collect();

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let columns: Vec<String> = reader
        .headers()
        .map_err(|e| SourceError::Decode(format!("price export header is unreadable: {e}")))?
        .iter()
        .map(normalize_header)
        .collect();

    let date_idx = column_index(&columns, PRICE_DATE_COLUMN)?;
    let price_idx = column_index(&columns, PRICE_VALUE_COLUMN)?;

    let mut records = Vec::new();
    for (line, row) in reader.records().enumerate() {
        let row = row.map_err(|e| {
            SourceError::Decode(format!("price export row {} is unreadable: {e}", line + 2))
        })?;
        let Some(timestamp) = row.get(date_idx).filter(|c| !c.is_empty()) else {
            continue;
        };
        let price_raw = row.get(price_idx).unwrap_or_default();

        let mut fields = Map::new();
        for (name, cell) in columns.iter().zip(row.iter()) {
            if name != PRICE_DATE_COLUMN {
                fields.insert(name.clone(), Value::String(cell.to_string()));
            }
        }

        records.push(RawRecord {
            source: SourceType::Price,
            timestamp: timestamp.to_string(),
            value: parse_price(price_raw),
            fields,
        });
    }
    Ok(records)
}

fn normalize_header(name: &str) -> String {
    // a UTF-8 byte order mark reads as "ï»¿" in Latin-1
    name.trim_start_matches(['\u{feff}', 'ï', '»', '¿'])
        .trim()
        .to_string()
}

fn column_index(columns: &[String], name: &str) -> Result<usize, SourceError> {
    columns
        .iter()
        .position(|c| c == name)
        .ok_or_else(|| SourceError::Decode(format!("price export has no '{name}' column")))
}

/// Price text such as `"€ 87,35"` as a number, `None` when nothing numeric remains
pub fn parse_price(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, ',' | '.' | '-'))
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    cleaned.parse().ok()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
