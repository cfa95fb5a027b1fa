//! SQLite-backed transaction repository

use super::{validate_table_name, TransactionRepository, UploadRecord, TABLE_PREFIX};
use crate::error::RepositoryError;
use crate::types::dataset::{TabularDataset, TransactionRow, LABEL_COLUMN, REQUIRED_FEATURES};
use chrono::SecondsFormat;
use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};
use std::path::Path;
use tracing::{debug, info};

const CATALOG_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS master_table (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    table_name  TEXT NOT NULL,
    file_name   TEXT NOT NULL DEFAULT '',
    uploaded_at TEXT NOT NULL
)
"#;

const TRAINING_SOURCES_SQL: &str = r#"
SELECT m.table_name
  FROM master_table AS m
  JOIN pragma_table_info(m.table_name) AS c
    ON c.name = 'fraud'
 WHERE m.table_name LIKE 'transactions\_%' ESCAPE '\'
 ORDER BY m.uploaded_at, m.id
"#;

const LATEST_TABLE_SQL: &str = r#"
SELECT table_name
  FROM master_table
 WHERE table_name LIKE 'transactions\_%' ESCAPE '\'
 ORDER BY uploaded_at DESC, id DESC
 LIMIT 1
"#;

/// Repository over a single SQLite database holding one table per upload plus
/// the `master_table` upload catalog.
pub struct SqliteRepository {
    conn: Mutex<Connection>,
}

impl SqliteRepository {
    /// Open (or create) the database file and ensure the catalog exists.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, RepositoryError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| RepositoryError::Unavailable(e.to_string()))?;
        }
        let conn = Connection::open(path)?;
        info!(path = %path.display(), "Opened transaction database");
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self, RepositoryError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, RepositoryError> {
        conn.execute_batch(CATALOG_DDL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn query_rows(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<TransactionRow>, RepositoryError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let rows = stmt
            .query_map(params, |row| {
                let mut record = TransactionRow::default();
                for (idx, column) in columns.iter().enumerate() {
                    let value: Value = row.get(idx)?;
                    assign_column(&mut record, column, value);
                }
                Ok(record)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

impl TransactionRepository for SqliteRepository {
    fn list_training_sources(&self) -> Result<Vec<String>, RepositoryError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(TRAINING_SOURCES_SQL)?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut tables: Vec<String> = Vec::with_capacity(names.len());
        for name in names {
            if !tables.contains(&name) {
                tables.push(name);
            }
        }
        debug!(count = tables.len(), "Listed training sources");
        Ok(tables)
    }

    fn read_source(&self, table: &str) -> Result<TabularDataset, RepositoryError> {
        validate_table_name(table)?;
        let columns: Vec<&str> = REQUIRED_FEATURES
            .iter()
            .copied()
            .chain(std::iter::once(LABEL_COLUMN))
            .collect();
        let sql = format!(
            "SELECT {} FROM \"{}\" WHERE fraud IN (0, 1)",
            columns.join(", "),
            table
        );
        Ok(TabularDataset::new(self.query_rows(&sql, [])?))
    }

    fn read_labels(&self, table: &str) -> Result<Vec<u8>, RepositoryError> {
        validate_table_name(table)?;
        let sql = format!("SELECT fraud FROM \"{}\" WHERE fraud IN (0, 1)", table);
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let labels = stmt
            .query_map([], |row| row.get::<_, Value>(0))?
            .collect::<Result<Vec<_>, _>>()?
            .iter()
            .filter_map(value_as_i64)
            .filter_map(|label| u8::try_from(label).ok())
            .collect();
        Ok(labels)
    }

    fn write_source(&self, table: &str, dataset: &TabularDataset) -> Result<(), RepositoryError> {
        validate_table_name(table)?;
        let columns: Vec<&str> = REQUIRED_FEATURES
            .iter()
            .copied()
            .chain(std::iter::once(LABEL_COLUMN))
            .filter(|column| !dataset.is_empty() && dataset.has_column(column))
            .collect();
        if columns.is_empty() {
            return Err(RepositoryError::Unavailable(format!(
                "dataset for {} has no storable columns",
                table
            )));
        }

        let definitions: Vec<String> = columns
            .iter()
            .map(|column| format!("{} {}", column, sql_type(column)))
            .collect();
        let placeholders = vec!["?"; columns.len()].join(", ");

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute_batch(&format!(
            "DROP TABLE IF EXISTS \"{table}\"; CREATE TABLE \"{table}\" ({});",
            definitions.join(", ")
        ))?;
        {
            let mut insert = tx.prepare(&format!(
                "INSERT INTO \"{}\" ({}) VALUES ({})",
                table,
                columns.join(", "),
                placeholders
            ))?;
            for row in &dataset.rows {
                insert.execute(params_from_iter(
                    columns.iter().map(|column| column_value(row, column)),
                ))?;
            }
        }
        tx.commit()?;

        info!(table = %table, rows = dataset.len(), columns = columns.len(), "Stored dataset");
        Ok(())
    }

    fn record_upload(&self, record: &UploadRecord) -> Result<(), RepositoryError> {
        validate_table_name(&record.table_name)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO master_table (table_name, file_name, uploaded_at) VALUES (?1, ?2, ?3)",
            params![
                record.table_name,
                record.source_name,
                record.uploaded_at.to_rfc3339_opts(SecondsFormat::Micros, true)
            ],
        )?;
        debug!(table = %record.table_name, source = %record.source_name, "Recorded upload");
        Ok(())
    }

    fn latest_transactions(&self, limit: usize) -> Result<TabularDataset, RepositoryError> {
        let latest: Option<String> = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare(LATEST_TABLE_SQL)?;
            let mut rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            let first = rows.next().transpose()?;
            first
        };
        let Some(table) = latest else {
            return Ok(TabularDataset::default());
        };
        debug_assert!(table.starts_with(TABLE_PREFIX));
        validate_table_name(&table)?;

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let sql = format!("SELECT * FROM \"{}\" LIMIT ?1", table);
        Ok(TabularDataset::new(self.query_rows(&sql, [limit])?))
    }
}

fn sql_type(column: &str) -> &'static str {
    match column {
        "step" | "fraud" => "INTEGER",
        "amount" => "REAL",
        _ => "TEXT",
    }
}

fn column_value(row: &TransactionRow, column: &str) -> Value {
    match column {
        "step" => row.step.map_or(Value::Null, Value::Integer),
        "amount" => row.amount.map_or(Value::Null, Value::Real),
        "fraud" => row.fraud.map_or(Value::Null, Value::Integer),
        _ => row
            .categorical(column)
            .map_or(Value::Null, |v| Value::Text(v.to_string())),
    }
}

fn assign_column(record: &mut TransactionRow, column: &str, value: Value) {
    match column {
        "step" => record.step = value_as_i64(&value),
        "amount" => record.amount = value_as_f64(&value),
        "fraud" => record.fraud = value_as_i64(&value),
        "customer" => record.customer = value_as_string(value),
        "age" => record.age = value_as_string(value),
        "gender" => record.gender = value_as_string(value),
        "zipcodeOri" => record.zipcode_ori = value_as_string(value),
        "merchant" => record.merchant = value_as_string(value),
        "zipMerchant" => record.zip_merchant = value_as_string(value),
        "category" => record.category = value_as_string(value),
        _ => {}
    }
}

// Older uploads may hold every column as text.
fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Integer(v) => Some(*v),
        Value::Real(v) => Some(*v as i64),
        Value::Text(v) => v.trim().parse().ok(),
        _ => None,
    }
}

fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Integer(v) => Some(*v as f64),
        Value::Real(v) => Some(*v),
        Value::Text(v) => v.trim().parse().ok(),
        _ => None,
    }
}

fn value_as_string(value: Value) -> Option<String> {
    match value {
        Value::Text(v) => Some(v),
        Value::Integer(v) => Some(v.to_string()),
        Value::Real(v) => Some(v.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::persist_upload;
    use crate::testing::{labeled_row, unlabeled_row};
    use chrono::{Duration, Utc};

    #[test]
    fn test_write_and_read_source() {
        let repo = SqliteRepository::in_memory().unwrap();
        let dataset = TabularDataset::new(vec![labeled_row(1, 0), labeled_row(2, 1)]);

        repo.write_source("transactions_a", &dataset).unwrap();
        let read = repo.read_source("transactions_a").unwrap();

        assert_eq!(read, dataset);
        assert_eq!(repo.read_labels("transactions_a").unwrap(), vec![0, 1]);
    }

    #[test]
    fn test_write_replaces_existing_table() {
        let repo = SqliteRepository::in_memory().unwrap();
        let first = TabularDataset::new(vec![labeled_row(1, 0), labeled_row(2, 0)]);
        let second = TabularDataset::new(vec![labeled_row(3, 1)]);

        repo.write_source("transactions_a", &first).unwrap();
        repo.write_source("transactions_a", &second).unwrap();

        assert_eq!(repo.read_labels("transactions_a").unwrap(), vec![1]);
    }

    #[test]
    fn test_reads_skip_labels_outside_binary() {
        let repo = SqliteRepository::in_memory().unwrap();
        let dataset = TabularDataset::new(vec![labeled_row(1, 0), labeled_row(2, 7)]);
        repo.write_source("transactions_a", &dataset).unwrap();

        assert_eq!(repo.read_source("transactions_a").unwrap().len(), 1);
        assert_eq!(repo.read_labels("transactions_a").unwrap(), vec![0]);
    }

    #[test]
    fn test_training_sources_require_catalog_and_label() {
        let repo = SqliteRepository::in_memory().unwrap();
        let start = Utc::now();
        let labeled = TabularDataset::new(vec![labeled_row(1, 1)]);
        let unlabeled = TabularDataset::new(vec![unlabeled_row(1)]);

        let first = persist_upload(&repo, &labeled, "a.csv", start).unwrap();
        persist_upload(&repo, &unlabeled, "b.csv", start + Duration::seconds(1)).unwrap();
        let third = persist_upload(&repo, &labeled, "c.csv", start + Duration::seconds(2)).unwrap();
        // labeled but never cataloged
        repo.write_source("transactions_orphan", &labeled).unwrap();
        // cataloged but wrong prefix
        repo.write_source("scratch", &labeled).unwrap();
        repo.record_upload(&UploadRecord {
            table_name: "scratch".to_string(),
            source_name: "x.csv".to_string(),
            uploaded_at: start,
        })
        .unwrap();

        assert_eq!(repo.list_training_sources().unwrap(), vec![first, third]);
    }

    #[test]
    fn test_cataloged_table_without_label_column_is_ignored() {
        let repo = SqliteRepository::in_memory().unwrap();
        let unlabeled = TabularDataset::new(vec![unlabeled_row(1)]);
        repo.write_source("transactions_x", &unlabeled).unwrap();
        repo.record_upload(&UploadRecord {
            table_name: "transactions_x".to_string(),
            source_name: "x.csv".to_string(),
            uploaded_at: Utc::now(),
        })
        .unwrap();

        assert!(repo.list_training_sources().unwrap().is_empty());
    }

    #[test]
    fn test_read_missing_table_fails() {
        let repo = SqliteRepository::in_memory().unwrap();
        assert!(repo.read_source("transactions_missing").is_err());
        assert!(matches!(
            repo.read_labels("bad name"),
            Err(RepositoryError::InvalidTableName(_))
        ));
    }

    #[test]
    fn test_latest_transactions() {
        let repo = SqliteRepository::in_memory().unwrap();
        assert!(repo.latest_transactions(100).unwrap().is_empty());

        let start = Utc::now();
        let older = TabularDataset::new(vec![labeled_row(1, 0)]);
        let newer = TabularDataset::new((0..5).map(|i| labeled_row(i, 1)).collect());
        persist_upload(&repo, &older, "old.csv", start).unwrap();
        persist_upload(&repo, &newer, "new.csv", start + Duration::seconds(5)).unwrap();

        let latest = repo.latest_transactions(3).unwrap();
        assert_eq!(latest.len(), 3);
        assert!(latest.rows.iter().all(|row| row.fraud == Some(1)));
    }

    #[test]
    fn test_text_columns_are_coerced() {
        let repo = SqliteRepository::in_memory().unwrap();
        {
            let conn = repo.conn.lock();
            conn.execute_batch(
                "CREATE TABLE transactions_legacy (step TEXT, customer TEXT, age INTEGER, \
                 gender TEXT, zipcodeOri TEXT, merchant TEXT, zipMerchant TEXT, \
                 category TEXT, amount TEXT, fraud TEXT);
                 INSERT INTO transactions_legacy VALUES \
                 ('4', 'C1', 3, 'F', '28007', 'M1', '28007', 'es_food', '12.5', '1');",
            )
            .unwrap();
        }

        let rows = repo.read_source("transactions_legacy").unwrap();
        assert_eq!(rows.len(), 1);
        let row = &rows.rows[0];
        assert_eq!(row.step, Some(4));
        assert_eq!(row.age.as_deref(), Some("3"));
        assert_eq!(row.amount, Some(12.5));
        assert_eq!(row.fraud, Some(1));
    }
}
