//! Source Reader - full-table reads against the operational schema
//!
//! Rows come back as ordered column/value pairs. Typing into per-entity
//! records happens in `records`, so a bad value costs one row, not a table.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use sqlx::mysql::types::MySqlTime;
use sqlx::mysql::{MySqlConnection, MySqlRow};
use sqlx::{Column, Connection, Row, TypeInfo, ValueRef};
use std::fmt;
use tracing::{error, info};

use crate::error::{EtlError, StoreError, TransformError};

/// Operational tables read by the ETL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SourceTable {
    Specialties,
    Patients,
    Doctors,
    Appointments,
}

impl SourceTable {
    pub const ALL: [SourceTable; 4] = [
        SourceTable::Patients,
        SourceTable::Doctors,
        SourceTable::Specialties,
        SourceTable::Appointments,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SourceTable::Specialties => "Especialidades",
            SourceTable::Patients => "Pacientes",
            SourceTable::Doctors => "Medicos",
            SourceTable::Appointments => "Citas",
        }
    }

    /// Auto-generated numeric identifier column.
    pub fn id_column(self) -> &'static str {
        match self {
            SourceTable::Specialties => "EspecialidadID",
            SourceTable::Patients => "PacienteID",
            SourceTable::Doctors => "MedicoID",
            SourceTable::Appointments => "CitaID",
        }
    }
}

impl fmt::Display for SourceTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single column value as read from the source.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    /// Time-of-day column.
    Time(NaiveTime),
    /// Interval since midnight, the shape some drivers use for `TIME`.
    Interval(TimeDelta),
    DateTime(NaiveDateTime),
    /// Column type the reader does not decode; carries the type name.
    Unsupported(String),
}

impl SqlValue {
    pub fn kind(&self) -> &'static str {
        match self {
            SqlValue::Null => "null",
            SqlValue::Int(_) | SqlValue::UInt(_) => "integer",
            SqlValue::Float(_) => "float",
            SqlValue::Text(_) => "text",
            SqlValue::Date(_) => "date",
            SqlValue::Time(_) => "time",
            SqlValue::Interval(_) => "interval",
            SqlValue::DateTime(_) => "datetime",
            SqlValue::Unsupported(_) => "unsupported",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => f.write_str("NULL"),
            SqlValue::Int(v) => write!(f, "{v}"),
            SqlValue::UInt(v) => write!(f, "{v}"),
            SqlValue::Float(v) => write!(f, "{v}"),
            SqlValue::Text(v) => write!(f, "{v:?}"),
            SqlValue::Date(v) => write!(f, "{v}"),
            SqlValue::Time(v) => write!(f, "{v}"),
            SqlValue::Interval(v) => write!(f, "{v}"),
            SqlValue::DateTime(v) => write!(f, "{v}"),
            SqlValue::Unsupported(ty) => write!(f, "<{ty}>"),
        }
    }
}

/// One source row, columns in table order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceRow {
    columns: Vec<(String, SqlValue)>,
}

impl SourceRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style append, used by in-memory sources.
    pub fn with(mut self, column: &str, value: SqlValue) -> Self {
        self.push(column, value);
        self
    }

    pub fn push(&mut self, column: &str, value: SqlValue) {
        self.columns.push((column.to_string(), value));
    }

    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    /// Value of a required column. Absent and NULL both count as missing.
    pub fn require(&self, column: &'static str) -> Result<&SqlValue, TransformError> {
        match self.get(column) {
            Some(value) if !value.is_null() => Ok(value),
            _ => Err(TransformError::MissingField { field: column }),
        }
    }

    /// Value of a nullable column; the column itself must still exist.
    pub fn optional(&self, column: &'static str) -> Result<Option<&SqlValue>, TransformError> {
        match self.get(column) {
            Some(SqlValue::Null) => Ok(None),
            Some(value) => Ok(Some(value)),
            None => Err(TransformError::MissingField { field: column }),
        }
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.columns.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Read access to the operational schema.
#[allow(async_fn_in_trait)]
pub trait Source {
    async fn read_table(&mut self, table: SourceTable) -> Result<Vec<SourceRow>, StoreError>;
}

/// Read every row of `table`.
///
/// A failed read is logged and degrades to an empty result; downstream
/// dimensions and facts for that entity simply come out empty.
pub async fn extract<S: Source>(source: &mut S, table: SourceTable) -> Vec<SourceRow> {
    match source.read_table(table).await {
        Ok(rows) => {
            info!(table = %table, rows = rows.len(), "extracted source table");
            rows
        }
        Err(source_err) => {
            let err = EtlError::Extraction {
                table,
                source: source_err,
            };
            error!(error = %err, "continuing with no rows for this table");
            Vec::new()
        }
    }
}

/// Source reader over a dedicated MySQL connection.
pub struct MySqlSource {
    conn: MySqlConnection,
}

impl MySqlSource {
    pub fn new(conn: MySqlConnection) -> Self {
        Self { conn }
    }

    pub async fn close(self) -> Result<(), sqlx::Error> {
        self.conn.close().await
    }
}

impl Source for MySqlSource {
    async fn read_table(&mut self, table: SourceTable) -> Result<Vec<SourceRow>, StoreError> {
        let sql = format!(
            "SELECT * FROM {} ORDER BY {}",
            table.name(),
            table.id_column()
        );
        let rows = sqlx::query(&sql).fetch_all(&mut self.conn).await?;

        Ok(rows.iter().map(decode_row).collect())
    }
}

fn decode_row(row: &MySqlRow) -> SourceRow {
    let mut decoded = SourceRow::new();
    for column in row.columns() {
        let type_name = column.type_info().name();
        let value = or_unsupported(type_name, decode_value(row, column.ordinal(), type_name));
        decoded.push(column.name(), value);
    }
    decoded
}

/// A cell that fails to decode (a zero DATE, a DATETIME out of range) is kept
/// as `Unsupported`, so typing rejects its row and the rest of the table loads.
fn or_unsupported(type_name: &str, decoded: Result<SqlValue, sqlx::Error>) -> SqlValue {
    decoded.unwrap_or_else(|err| SqlValue::Unsupported(format!("{type_name} ({err})")))
}

/// Decode one column by its declared MySQL type.
fn decode_value(row: &MySqlRow, idx: usize, type_name: &str) -> Result<SqlValue, sqlx::Error> {
    if row.try_get_raw(idx)?.is_null() {
        return Ok(SqlValue::Null);
    }

    let value = match type_name {
        "BOOLEAN" | "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
            SqlValue::Int(row.try_get::<i64, _>(idx)?)
        }
        name if name.ends_with("UNSIGNED") => SqlValue::UInt(row.try_get::<u64, _>(idx)?),
        "FLOAT" => SqlValue::Float(f64::from(row.try_get::<f32, _>(idx)?)),
        "DOUBLE" => SqlValue::Float(row.try_get::<f64, _>(idx)?),
        "DATE" => SqlValue::Date(row.try_get::<NaiveDate, _>(idx)?),
        // TIME is a signed interval in MySQL and may leave the 0..24h range.
        "TIME" => SqlValue::Interval(TimeDelta::from(row.try_get::<MySqlTime, _>(idx)?)),
        "DATETIME" | "TIMESTAMP" => SqlValue::DateTime(row.try_get::<NaiveDateTime, _>(idx)?),
        "CHAR" | "VARCHAR" | "TINYTEXT" | "TEXT" | "MEDIUMTEXT" | "LONGTEXT" | "ENUM" | "SET" => {
            SqlValue::Text(row.try_get::<String, _>(idx)?)
        }
        other => SqlValue::Unsupported(other.to_string()),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemorySource;

    #[test]
    fn test_require_treats_null_as_missing() {
        let row = SourceRow::new()
            .with("PacienteID", SqlValue::Int(1))
            .with("Nombre", SqlValue::Null);

        assert_eq!(row.require("PacienteID"), Ok(&SqlValue::Int(1)));
        assert_eq!(
            row.require("Nombre"),
            Err(TransformError::MissingField { field: "Nombre" })
        );
        assert_eq!(
            row.require("Apellido"),
            Err(TransformError::MissingField { field: "Apellido" })
        );
    }

    #[test]
    fn test_optional_requires_column_presence() {
        let row = SourceRow::new().with("Telefono", SqlValue::Null);
        assert_eq!(row.optional("Telefono"), Ok(None));
        assert!(row.optional("Direccion").is_err());
    }

    #[test]
    fn test_columns_keep_table_order() {
        let row = SourceRow::new()
            .with("B", SqlValue::Int(2))
            .with("A", SqlValue::Int(1));
        let names: Vec<&str> = row.columns().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["B", "A"]);
    }

    #[tokio::test]
    async fn test_extract_returns_rows() {
        let mut source = MemorySource::new().with_rows(
            SourceTable::Specialties,
            vec![SourceRow::new().with("EspecialidadID", SqlValue::Int(1))],
        );
        let rows = extract(&mut source, SourceTable::Specialties).await;
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_extract_failure_degrades_to_empty() {
        let mut source = MemorySource::new()
            .with_rows(
                SourceTable::Patients,
                vec![SourceRow::new().with("PacienteID", SqlValue::Int(1))],
            )
            .failing(SourceTable::Patients);

        let rows = extract(&mut source, SourceTable::Patients).await;
        assert!(rows.is_empty());
    }

    #[test]
    fn test_undecodable_cell_becomes_unsupported() {
        let bad = Err(sqlx::Error::Decode("invalid date 0000-00-00".into()));
        match or_unsupported("DATE", bad) {
            SqlValue::Unsupported(reason) => {
                assert!(reason.starts_with("DATE"));
                assert!(reason.contains("0000-00-00"));
            }
            other => panic!("expected Unsupported, got {other:?}"),
        }

        let good = Ok(SqlValue::Int(7));
        assert_eq!(or_unsupported("INT", good), SqlValue::Int(7));
    }
}
