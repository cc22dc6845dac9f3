//! Table descriptions for the persisted datasets
//!
//! Each dataset is described once as a [`TableSchema`]; the DDL, the INSERT
//! statement and the values bound for a record are all derived from it.

use serde_json::Value;

use crate::types::{EnrichedRecord, SourceType};

/// SQLite storage class of a column
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnType {
    /// INTEGER
    Integer,
    /// REAL
    Real,
    /// TEXT
    Text,
}

impl ColumnType {
    fn sql(self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Text => "TEXT",
        }
    }
}

/// Calendar field of an enriched record
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CalendarField {
    /// Calendar year
    Year,
    /// Month, 1-12
    Month,
    /// Day of month
    Day,
    /// ISO week number
    Week,
    /// Hour, 0-23
    Hour,
    /// Minute, 0-59
    Minute,
}

/// Where a column's value comes from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnSource {
    /// The normalized timestamp
    Datetime,
    /// The record's numeric value
    Value,
    /// A derived calendar field
    Calendar(CalendarField),
    /// A pass-through field of the raw record, by key
    Field(&'static str),
}

/// One column of a table
#[derive(Clone, Copy, Debug)]
pub struct Column {
    /// Column name
    pub name: &'static str,
    /// Storage class
    pub ty: ColumnType,
    /// Value source
    pub source: ColumnSource,
    /// Whether the column rejects NULL
    pub not_null: bool,
}

impl Column {
    const fn new(name: &'static str, ty: ColumnType, source: ColumnSource) -> Self {
        Self {
            name,
            ty,
            source,
            not_null: false,
        }
    }

    const fn required(name: &'static str, ty: ColumnType, source: ColumnSource) -> Self {
        Self {
            name,
            ty,
            source,
            not_null: true,
        }
    }

    const fn real(name: &'static str, field: &'static str) -> Self {
        Self::new(name, ColumnType::Real, ColumnSource::Field(field))
    }

    const fn text(name: &'static str, field: &'static str) -> Self {
        Self::new(name, ColumnType::Text, ColumnSource::Field(field))
    }

    const fn calendar(name: &'static str, field: CalendarField) -> Self {
        Self::required(name, ColumnType::Integer, ColumnSource::Calendar(field))
    }
}

/// A value ready to be bound to a statement
#[derive(Clone, Debug, PartialEq)]
pub enum SqlValue {
    /// NULL
    Null,
    /// INTEGER
    Integer(i64),
    /// REAL
    Real(f64),
    /// TEXT
    Text(String),
}

/// Description of a persisted table
#[derive(Debug)]
pub struct TableSchema {
    /// Table name
    pub name: &'static str,
    /// Columns in insertion order (the surrogate `id` is implicit)
    pub columns: &'static [Column],
    /// Columns of the unique constraint
    pub unique_key: &'static [&'static str],
    /// Single-column indexes besides the unique key
    pub indexes: &'static [&'static str],
}

const DATETIME: Column = Column::required("datetime", ColumnType::Text, ColumnSource::Datetime);
const YEAR: Column = Column::calendar("year", CalendarField::Year);
const MONTH: Column = Column::calendar("month", CalendarField::Month);
const DAY: Column = Column::calendar("day", CalendarField::Day);
const WEEK: Column = Column::calendar("week", CalendarField::Week);
const HOUR: Column = Column::calendar("hour", CalendarField::Hour);
const MINUTE: Column = Column::calendar("minute", CalendarField::Minute);

/// Elia solar data (15-minute resolution)
pub const SOLAR: TableSchema = TableSchema {
    name: "solar_data",
    columns: &[
        DATETIME,
        YEAR,
        MONTH,
        DAY,
        WEEK,
        HOUR,
        MINUTE,
        Column::text("resolution_code", "resolutioncode"),
        Column::text("region", "region"),
        Column::new("measured", ColumnType::Real, ColumnSource::Value),
        Column::real("monitored_capacity", "monitoredcapacity"),
        Column::real("most_recent_forecast", "mostrecentforecast"),
        Column::real("most_recent_confidence_10", "mostrecentconfidence10"),
        Column::real("most_recent_confidence_90", "mostrecentconfidence90"),
        Column::real("day_ahead_11h_forecast", "dayahead11hforecast"),
        Column::real("day_ahead_forecast", "dayaheadforecast"),
        Column::real("day_ahead_confidence_10", "dayaheadconfidence10"),
        Column::real("day_ahead_confidence_90", "dayaheadconfidence90"),
        Column::real("day_ahead_11h_confidence_10", "dayahead11hconfidence10"),
        Column::real("day_ahead_11h_confidence_90", "dayahead11hconfidence90"),
        Column::real("week_ahead_forecast", "weekaheadforecast"),
        Column::real("week_ahead_confidence_10", "weekaheadconfidence10"),
        Column::real("week_ahead_confidence_90", "weekaheadconfidence90"),
        Column::real("load_factor", "loadfactor"),
    ],
    unique_key: &["year", "month", "day", "hour", "minute"],
    indexes: &["datetime", "week"],
};

/// Elia wind data (15-minute resolution)
pub const WIND: TableSchema = TableSchema {
    name: "wind_data",
    columns: &[
        DATETIME,
        YEAR,
        MONTH,
        DAY,
        WEEK,
        HOUR,
        MINUTE,
        Column::text("resolution_code", "resolutioncode"),
        Column::text("region", "region"),
        Column::text("offshore_onshore", "offshoreonshore"),
        Column::text("grid_connection_type", "gridconnectiontype"),
        Column::new("measured", ColumnType::Real, ColumnSource::Value),
        Column::real("monitored_capacity", "monitoredcapacity"),
        Column::real("most_recent_forecast", "mostrecentforecast"),
        Column::real("most_recent_confidence_10", "mostrecentconfidence10"),
        Column::real("most_recent_confidence_90", "mostrecentconfidence90"),
        Column::real("day_ahead_11h_forecast", "dayahead11hforecast"),
        Column::real("day_ahead_forecast", "dayaheadforecast"),
        Column::real("day_ahead_confidence_10", "dayaheadconfidence10"),
        Column::real("day_ahead_confidence_90", "dayaheadconfidence90"),
        Column::real("day_ahead_11h_confidence_10", "dayahead11hconfidence10"),
        Column::real("day_ahead_11h_confidence_90", "dayahead11hconfidence90"),
        Column::real("week_ahead_forecast", "weekaheadforecast"),
        Column::real("week_ahead_confidence_10", "weekaheadconfidence10"),
        Column::real("week_ahead_confidence_90", "weekaheadconfidence90"),
        Column::real("load_factor", "loadfactor"),
        Column::text("decremental_bid_id", "decrementalbidid"),
    ],
    unique_key: &["year", "month", "day", "hour", "minute"],
    indexes: &["datetime", "week"],
};

/// Belpex day-ahead prices (hourly)
pub const PRICE: TableSchema = TableSchema {
    name: "belpex_prices",
    columns: &[
        DATETIME,
        YEAR,
        MONTH,
        DAY,
        WEEK,
        HOUR,
        MINUTE,
        Column::required("price_eur_per_mwh", ColumnType::Real, ColumnSource::Value),
    ],
    unique_key: &["year", "month", "day", "hour"],
    indexes: &["datetime", "week"],
};

/// Every table, in migration order
pub const ALL_TABLES: [&TableSchema; 3] = [&SOLAR, &WIND, &PRICE];

impl TableSchema {
    /// Schema records of a source type are persisted with
    pub fn for_source(source: SourceType) -> &'static TableSchema {
        match source {
            SourceType::Solar => &SOLAR,
            SourceType::Wind => &WIND,
            SourceType::Price => &PRICE,
        }
    }

    /// `CREATE TABLE` statement
    pub fn create_table_sql(&self) -> String {
        let mut sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    id INTEGER PRIMARY KEY AUTOINCREMENT",
            self.name
        );
        for column in self.columns {
            sql.push_str(&format!(",\n    {} {}", column.name, column.ty.sql()));
            if column.not_null {
                sql.push_str(" NOT NULL");
            }
        }
        sql.push_str(&format!(",\n    UNIQUE ({})\n)", self.unique_key.join(", ")));
        sql
    }

    /// `CREATE INDEX` statements
    pub fn create_index_sql(&self) -> Vec<String> {
        self.indexes
            .iter()
            .map(|column| {
                format!(
                    "CREATE INDEX IF NOT EXISTS idx_{table}_{column} ON {table}({column})",
                    table = self.name,
                    column = column
                )
            })
            .collect()
    }

    /// `INSERT INTO t (c1, c2, ...) ` prefix, followed by the VALUES list
    pub fn insert_prefix(&self) -> String {
        let names: Vec<&str> = self.columns.iter().map(|c| c.name).collect();
        format!("INSERT INTO {} ({}) ", self.name, names.join(", "))
    }

    /// Clause appended after the VALUES list: skip conflicting rows, return inserted keys
    pub fn conflict_clause(&self) -> String {
        let key = self.unique_key.join(", ");
        format!(" ON CONFLICT({key}) DO NOTHING RETURNING {key}")
    }

    /// Number of rows per statement that stays within SQLite's 999 bind variables
    pub fn rows_per_statement(&self) -> usize {
        (999 / self.columns.len().max(1)).max(1)
    }

    /// Values bound for a record, one per column
    pub fn row(&self, record: &EnrichedRecord) -> Vec<SqlValue> {
        self.columns.iter().map(|c| column_value(c, record)).collect()
    }

    /// Unique key of a record, in `unique_key` order
    pub fn key(&self, record: &EnrichedRecord) -> Vec<SqlValue> {
        self.unique_key
            .iter()
            .map(|name| {
                self.columns
                    .iter()
                    .find(|c| c.name == *name)
                    .map(|c| column_value(c, record))
                    .unwrap_or(SqlValue::Null)
            })
            .collect()
    }

    /// Storage class of a named column
    pub fn column_type(&self, name: &str) -> Option<ColumnType> {
        self.columns.iter().find(|c| c.name == name).map(|c| c.ty)
    }
}

fn column_value(column: &Column, record: &EnrichedRecord) -> SqlValue {
    let calendar = &record.calendar;
    match column.source {
        ColumnSource::Datetime => SqlValue::Text(record.datetime.clone()),
        ColumnSource::Value => record.record.value.map_or(SqlValue::Null, SqlValue::Real),
        ColumnSource::Calendar(field) => SqlValue::Integer(match field {
            CalendarField::Year => i64::from(calendar.year),
            CalendarField::Month => i64::from(calendar.month),
            CalendarField::Day => i64::from(calendar.day),
            CalendarField::Week => i64::from(calendar.week),
            CalendarField::Hour => i64::from(calendar.hour),
            CalendarField::Minute => i64::from(calendar.minute),
        }),
        ColumnSource::Field(key) => match record.record.fields.get(key) {
            None | Some(Value::Null) => SqlValue::Null,
            Some(value) => json_to_sql(column.ty, value),
        },
    }
}

fn json_to_sql(ty: ColumnType, value: &Value) -> SqlValue {
    match ty {
        ColumnType::Text => match value {
            Value::String(s) => SqlValue::Text(s.clone()),
            other => SqlValue::Text(other.to_string()),
        },
        ColumnType::Real => value
            .as_f64()
            .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
            .map_or(SqlValue::Null, SqlValue::Real),
        ColumnType::Integer => value
            .as_i64()
            .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
            .map_or(SqlValue::Null, SqlValue::Integer),
    }
}
