//! Batch inserts that skip duplicate keys.

use crate::error::DatabaseError;
use crate::types::EnrichedRecord;
use crate::{Error, Result};
use sqlx::query_builder::Separated;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};
use std::collections::HashMap;
use tracing::{debug, warn};

use super::schema::{ColumnType, SqlValue, TableSchema};
use super::{BatchResult, Database, SkipReason, SkippedRecord};

/// Hashable form of a unique-key value
#[derive(Debug, PartialEq, Eq, Hash)]
enum KeyPart {
    Null,
    Integer(i64),
    Real(u64),
    Text(String),
}

impl From<SqlValue> for KeyPart {
    fn from(value: SqlValue) -> Self {
        match value {
            SqlValue::Null => KeyPart::Null,
            SqlValue::Integer(v) => KeyPart::Integer(v),
            SqlValue::Real(v) => KeyPart::Real(v.to_bits()),
            SqlValue::Text(v) => KeyPart::Text(v),
        }
    }
}

type Key = Vec<KeyPart>;

impl Database {
    /// Insert enriched records into the table described by `schema`
    ///
    /// All records go in one transaction. Rows whose unique key already exists,
    /// or repeats an earlier record of the same batch, are skipped and reported
    /// as [`SkipReason::DuplicateKey`]; the first occurrence wins. If the
    /// storage engine rejects the batch as a whole, it is rolled back and the
    /// records are retried one transaction each, so a single bad record is
    /// reported as [`SkipReason::Rejected`] without losing the rest.
    pub async fn insert_batch(
        &self,
        records: &[EnrichedRecord],
        schema: &TableSchema,
    ) -> Result<BatchResult> {
        if records.is_empty() {
            return Ok(BatchResult::default());
        }

        let rows: Vec<Vec<SqlValue>> = records.iter().map(|r| schema.row(r)).collect();

        let mut inserted_keys = match self.insert_all(schema, &rows).await {
            Ok(keys) => keys,
            Err(e) => {
                let err = DatabaseError::BatchInsert {
                    table: schema.name,
                    reason: e.to_string(),
                };
                warn!(
                    error = %err,
                    records = records.len(),
                    "Bulk insert failed, inserting records one by one"
                );
                return self.insert_each(schema, records, &rows).await;
            }
        };

        let mut result = BatchResult::default();
        for record in records {
            match inserted_keys.get_mut(&record_key(schema, record)) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    result.inserted += 1;
                }
                _ => result.skipped.push(SkippedRecord {
                    record: record.clone(),
                    reason: SkipReason::DuplicateKey,
                }),
            }
        }

        debug!(
            table = schema.name,
            inserted = result.inserted,
            skipped = result.skipped.len(),
            "Batch inserted"
        );
        Ok(result)
    }

    /// Number of rows in a table
    pub async fn count_rows(&self, schema: &TableSchema) -> Result<i64> {
        sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {}", schema.name))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to count rows in {}: {}",
                    schema.name, e
                )))
            })
    }

    /// Insert every row in one transaction, returning how often each key was inserted
    async fn insert_all(
        &self,
        schema: &TableSchema,
        rows: &[Vec<SqlValue>],
    ) -> std::result::Result<HashMap<Key, usize>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let mut inserted: HashMap<Key, usize> = HashMap::new();

        // SQLite has a limit of 999 variables per query
        for chunk in rows.chunks(schema.rows_per_statement()) {
            let mut query = insert_query(schema, chunk);
            let returned = query.build().fetch_all(&mut *tx).await?;
            for row in &returned {
                *inserted.entry(returned_key(schema, row)?).or_insert(0) += 1;
            }
        }

        tx.commit().await?;
        Ok(inserted)
    }

    /// Insert each row in its own transaction
    async fn insert_each(
        &self,
        schema: &TableSchema,
        records: &[EnrichedRecord],
        rows: &[Vec<SqlValue>],
    ) -> Result<BatchResult> {
        let mut result = BatchResult::default();

        for (record, row) in records.iter().zip(rows) {
            let mut tx = self.pool.begin().await.map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to begin transaction: {}",
                    e
                )))
            })?;

            let mut query = insert_query(schema, std::slice::from_ref(row));
            let outcome = match query.build().fetch_all(&mut *tx).await {
                Ok(returned) => tx.commit().await.map(|()| returned.len()),
                Err(e) => Err(e),
            };

            let reason = match outcome {
                Ok(0) => SkipReason::DuplicateKey,
                Ok(_) => {
                    result.inserted += 1;
                    continue;
                }
                Err(e) => {
                    debug!(
                        table = schema.name,
                        datetime = %record.datetime,
                        error = %e,
                        "Record rejected"
                    );
                    SkipReason::Rejected(e.to_string())
                }
            };
            result.skipped.push(SkippedRecord {
                record: record.clone(),
                reason,
            });
        }

        Ok(result)
    }
}

fn insert_query<'args>(schema: &TableSchema, rows: &'args [Vec<SqlValue>]) -> QueryBuilder<'args, Sqlite> {
    let mut query = QueryBuilder::new(schema.insert_prefix());
    query.push_values(rows, |mut b, row| {
        for value in row {
            push_value(&mut b, value);
        }
    });
    query.push(schema.conflict_clause());
    query
}

fn push_value<'args>(b: &mut Separated<'_, 'args, Sqlite, &'static str>, value: &'args SqlValue) {
    match value {
        SqlValue::Null => {
            b.push_bind(None::<i64>);
        }
        SqlValue::Integer(v) => {
            b.push_bind(*v);
        }
        SqlValue::Real(v) => {
            b.push_bind(*v);
        }
        SqlValue::Text(v) => {
            b.push_bind(v.as_str());
        }
    }
}

fn record_key(schema: &TableSchema, record: &EnrichedRecord) -> Key {
    schema.key(record).into_iter().map(KeyPart::from).collect()
}

fn returned_key(schema: &TableSchema, row: &SqliteRow) -> std::result::Result<Key, sqlx::Error> {
    schema
        .unique_key
        .iter()
        .enumerate()
        .map(|(index, name)| {
            let value = match schema.column_type(name) {
                Some(ColumnType::Integer) => row
                    .try_get::<Option<i64>, _>(index)?
                    .map_or(SqlValue::Null, SqlValue::Integer),
                Some(ColumnType::Real) => row
                    .try_get::<Option<f64>, _>(index)?
                    .map_or(SqlValue::Null, SqlValue::Real),
                Some(ColumnType::Text) | None => row
                    .try_get::<Option<String>, _>(index)?
                    .map_or(SqlValue::Null, SqlValue::Text),
            };
            Ok(KeyPart::from(value))
        })
        .collect()
}
