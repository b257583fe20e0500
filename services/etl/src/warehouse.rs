//! Warehouse schema and store access.
//!
//! The star schema is owned by this system: four dimensions keyed by string
//! surrogate keys and one fact table referencing them.

use serde::Serialize;
use sqlx::mysql::MySqlConnection;
use sqlx::query_builder::Separated;
use sqlx::{Connection, MySql, QueryBuilder, Transaction};
use std::fmt;
use tracing::warn;

use crate::error::StoreError;

/// Rows per multi-row INSERT statement.
const INSERT_CHUNK: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Table {
    #[serde(rename = "dim_especialidades")]
    Specialties,
    #[serde(rename = "dim_pacientes")]
    Patients,
    #[serde(rename = "dim_medicos")]
    Doctors,
    #[serde(rename = "dim_tiempo")]
    Time,
    #[serde(rename = "citas_hechos")]
    Appointments,
}

impl Table {
    /// Load order of the dimensions.
    pub const DIMENSIONS: [Table; 4] = [Table::Specialties, Table::Patients, Table::Doctors, Table::Time];

    /// Emptying order for a reset: the fact table first.
    pub const RESET_ORDER: [Table; 5] = [
        Table::Appointments,
        Table::Time,
        Table::Doctors,
        Table::Patients,
        Table::Specialties,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Table::Specialties => "dim_especialidades",
            Table::Patients => "dim_pacientes",
            Table::Doctors => "dim_medicos",
            Table::Time => "dim_tiempo",
            Table::Appointments => "citas_hechos",
        }
    }

    pub fn columns(self) -> &'static [&'static str] {
        match self {
            Table::Specialties => &[
                "id_especialidad_sk",
                "id_especialidad",
                "nombre_especialidad",
                "fecha_carga",
            ],
            Table::Patients => &[
                "id_paciente_sk",
                "id_paciente",
                "apellido",
                "direccion",
                "fecha_nacimiento",
                "genero",
                "nombre",
                "telefono",
                "fecha_carga",
            ],
            Table::Doctors => &[
                "id_medico_sk",
                "id_medico",
                "id_especialidad",
                "codigo_empleado",
                "nombre",
                "apellido",
                "genero",
                "fecha_carga",
            ],
            Table::Time => &[
                "id_tiempo_sk",
                "fecha",
                "anio",
                "mes",
                "dia",
                "hora",
                "minuto",
                "segundo",
                "nombre_mes",
                "dia_semana",
                "fecha_carga",
            ],
            Table::Appointments => &[
                "id_cita",
                "id_paciente_sk",
                "id_medico_sk",
                "id_tiempo_sk",
                "fecha_hora_cita",
                "estado_cita",
                "motivo_cita",
                "fecha_carga",
            ],
        }
    }

    /// `(surrogate, business)` key columns of a dimension.
    ///
    /// The time dimension's key is its own business key, so both are the same column.
    pub fn key_columns(self) -> Option<(&'static str, &'static str)> {
        match self {
            Table::Specialties => Some(("id_especialidad_sk", "id_especialidad")),
            Table::Patients => Some(("id_paciente_sk", "id_paciente")),
            Table::Doctors => Some(("id_medico_sk", "id_medico")),
            Table::Time => Some(("id_tiempo_sk", "id_tiempo_sk")),
            Table::Appointments => None,
        }
    }

    pub fn is_dimension(self) -> bool {
        self != Table::Appointments
    }

    /// Dimensions are insert-if-absent; facts must insert cleanly.
    fn insert_prefix(self) -> String {
        let verb = if self.is_dimension() {
            "INSERT IGNORE"
        } else {
            "INSERT"
        };
        format!("{} INTO {} ({}) ", verb, self.name(), self.columns().join(", "))
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A row destined for one warehouse table.
pub trait WarehouseRow: Serialize {
    const TABLE: Table;

    /// Unique key of the row within its table.
    fn business_key(&self) -> &str;

    /// Surrogate key; `None` for fact rows.
    fn surrogate_key(&self) -> Option<&str>;

    /// Surrogate keys this row references in other tables.
    fn references(&self) -> Vec<(Table, &str)> {
        Vec::new()
    }

    /// Push the row's values in `Table::columns` order.
    fn bind_columns(&self, row: &mut Separated<'_, '_, MySql, &'static str>);
}

/// Write access to the warehouse.
///
/// Each `insert_rows` call is one transaction: every row lands or none does.
#[allow(async_fn_in_trait)]
pub trait Warehouse {
    /// Empty every table with referential checks suspended, atomically.
    async fn reset(&mut self) -> Result<(), StoreError>;

    /// Insert a batch; returns the number of rows actually inserted.
    async fn insert_rows<R: WarehouseRow>(&mut self, rows: &[R]) -> Result<u64, StoreError>;

    /// `(surrogate, business)` pairs currently stored in a dimension.
    async fn key_pairs(&mut self, table: Table) -> Result<Vec<(String, String)>, StoreError>;

    async fn row_count(&mut self, table: Table) -> Result<u64, StoreError>;
}

/// Warehouse over a dedicated MySQL connection.
///
/// `FOREIGN_KEY_CHECKS` is session state, so everything runs on one connection.
pub struct MySqlWarehouse {
    conn: MySqlConnection,
}

impl MySqlWarehouse {
    pub fn new(conn: MySqlConnection) -> Self {
        Self { conn }
    }

    pub async fn close(self) -> Result<(), sqlx::Error> {
        self.conn.close().await
    }
}

async fn clear_tables(tx: &mut Transaction<'_, MySql>) -> Result<(), sqlx::Error> {
    sqlx::query("SET FOREIGN_KEY_CHECKS = 0").execute(&mut **tx).await?;
    for table in Table::RESET_ORDER {
        sqlx::query(&format!("DELETE FROM {}", table.name()))
            .execute(&mut **tx)
            .await?;
    }
    sqlx::query("SET FOREIGN_KEY_CHECKS = 1").execute(&mut **tx).await?;
    Ok(())
}

async fn insert_chunks<R: WarehouseRow>(
    tx: &mut Transaction<'_, MySql>,
    rows: &[R],
) -> Result<u64, sqlx::Error> {
    let mut inserted = 0;
    for chunk in rows.chunks(INSERT_CHUNK) {
        let mut builder: QueryBuilder<MySql> = QueryBuilder::new(R::TABLE.insert_prefix());
        builder.push_values(chunk, |mut row, value| value.bind_columns(&mut row));
        let done = builder.build().execute(&mut **tx).await?;
        inserted += done.rows_affected();
    }
    Ok(inserted)
}

/// The statement error is what the caller sees; cleanup failures after it are logged.
fn after_cleanup<const N: usize>(
    err: sqlx::Error,
    cleanup: [(&'static str, Result<(), sqlx::Error>); N],
) -> StoreError {
    for (step, result) in cleanup {
        if let Err(cleanup_err) = result {
            warn!(step, error = %cleanup_err, original = %err, "cleanup after failed statement failed");
        }
    }
    err.into()
}

impl Warehouse for MySqlWarehouse {
    async fn reset(&mut self) -> Result<(), StoreError> {
        let mut tx = self.conn.begin().await?;
        match clear_tables(&mut tx).await {
            Ok(()) => {
                tx.commit().await?;
                Ok(())
            }
            Err(err) => {
                let rolled_back = tx.rollback().await;
                let restored = sqlx::query("SET FOREIGN_KEY_CHECKS = 1")
                    .execute(&mut self.conn)
                    .await
                    .map(|_| ());
                Err(after_cleanup(
                    err,
                    [("rollback", rolled_back), ("restore foreign key checks", restored)],
                ))
            }
        }
    }

    async fn insert_rows<R: WarehouseRow>(&mut self, rows: &[R]) -> Result<u64, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut tx = self.conn.begin().await?;
        match insert_chunks(&mut tx, rows).await {
            Ok(inserted) => {
                tx.commit().await?;
                Ok(inserted)
            }
            Err(err) => {
                let rolled_back = tx.rollback().await;
                Err(after_cleanup(err, [("rollback", rolled_back)]))
            }
        }
    }

    async fn key_pairs(&mut self, table: Table) -> Result<Vec<(String, String)>, StoreError> {
        let Some((surrogate, business)) = table.key_columns() else {
            return Ok(Vec::new());
        };
        let sql = format!("SELECT {}, {} FROM {}", surrogate, business, table.name());
        let pairs: Vec<(String, String)> = sqlx::query_as(&sql).fetch_all(&mut self.conn).await?;
        Ok(pairs)
    }

    async fn row_count(&mut self, table: Table) -> Result<u64, StoreError> {
        let sql = format!("SELECT COUNT(*) FROM {}", table.name());
        let (count,): (i64,) = sqlx::query_as(&sql).fetch_one(&mut self.conn).await?;
        Ok(count.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_inserts_ignore_duplicates() {
        assert_eq!(
            Table::Specialties.insert_prefix(),
            "INSERT IGNORE INTO dim_especialidades (id_especialidad_sk, id_especialidad, nombre_especialidad, fecha_carga) "
        );
        assert!(Table::Time.insert_prefix().starts_with("INSERT IGNORE INTO dim_tiempo"));
    }

    #[test]
    fn test_fact_insert_is_strict() {
        assert!(Table::Appointments
            .insert_prefix()
            .starts_with("INSERT INTO citas_hechos (id_cita, id_paciente_sk"));
    }

    #[test]
    fn test_reset_empties_facts_first() {
        assert_eq!(Table::RESET_ORDER[0], Table::Appointments);
        assert_eq!(Table::RESET_ORDER.len(), Table::DIMENSIONS.len() + 1);
    }

    #[test]
    fn test_key_columns() {
        assert_eq!(
            Table::Patients.key_columns(),
            Some(("id_paciente_sk", "id_paciente"))
        );
        assert_eq!(Table::Appointments.key_columns(), None);
    }

    #[test]
    fn test_cleanup_failure_keeps_statement_error() {
        let err = after_cleanup(
            sqlx::Error::RowNotFound,
            [
                ("rollback", Err(sqlx::Error::PoolClosed)),
                ("restore foreign key checks", Ok(())),
            ],
        );
        assert!(matches!(err, StoreError::Sql(sqlx::Error::RowNotFound)));
    }
}
