//! Full-load orchestration.
//!
//! Reset -> extract -> dimensions (specialty, patient, doctor, time) ->
//! surrogate keys -> facts. Only a failed reset stops the run; every other
//! failure is logged, recorded in the report, and the next phase still runs.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use crate::dimension::{self, load_dimension, LoadContext};
use crate::error::Result;
use crate::fact::{load_facts, resolve_facts, FactKeys};
use crate::keys::{KeyMap, SurrogateKeys};
use crate::records::{typed_records, FromSourceRow, SourceSnapshot};
use crate::reset::reset_warehouse;
use crate::source::{extract, Source, SourceRow, SourceTable};
use crate::warehouse::{Table, Warehouse};

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub surrogate_keys: SurrogateKeys,
}

#[derive(Debug, Clone, Serialize)]
pub struct DimensionOutcome {
    pub table: Table,
    pub rows: usize,
    pub inserted: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FactOutcome {
    pub appointments: usize,
    pub resolved: usize,
    pub dropped: usize,
    pub inserted: u64,
    pub error: Option<String>,
}

/// Summary of one full-load run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub surrogate_keys: SurrogateKeys,
    /// Rows read per source table.
    pub extracted: BTreeMap<&'static str, usize>,
    /// Rows rejected at validation per source table.
    pub skipped: BTreeMap<&'static str, usize>,
    pub dimensions: Vec<DimensionOutcome>,
    pub facts: FactOutcome,
    /// Row counts per warehouse table after the run.
    pub warehouse_rows: BTreeMap<&'static str, u64>,
}

impl RunReport {
    /// True when nothing was skipped, dropped or rolled back.
    pub fn is_clean(&self) -> bool {
        self.skipped.values().all(|n| *n == 0)
            && self.dimensions.iter().all(|d| d.error.is_none())
            && self.facts.error.is_none()
            && self.facts.dropped == 0
    }

    pub fn dimension(&self, table: Table) -> Option<&DimensionOutcome> {
        self.dimensions.iter().find(|d| d.table == table)
    }
}

/// Run one full load from `source` into `warehouse`.
///
/// Returns `Err` only when the reset fails.
pub async fn run<S: Source, W: Warehouse>(
    source: &mut S,
    warehouse: &mut W,
    options: RunOptions,
) -> Result<RunReport> {
    let run_id = Uuid::new_v4();
    run_inner(run_id, source, warehouse, options)
        .instrument(info_span!("etl_run", %run_id))
        .await
}

async fn run_inner<S: Source, W: Warehouse>(
    run_id: Uuid,
    source: &mut S,
    warehouse: &mut W,
    options: RunOptions,
) -> Result<RunReport> {
    let started_at = Utc::now();
    let ctx = LoadContext {
        keys: options.surrogate_keys,
        loaded_at: started_at.naive_utc(),
    };

    reset_warehouse(warehouse).await?;

    info!("extracting source data");
    let mut extracted = BTreeMap::new();
    let mut raw: BTreeMap<SourceTable, Vec<SourceRow>> = BTreeMap::new();
    for table in SourceTable::ALL {
        let rows = extract(source, table).await;
        extracted.insert(table.name(), rows.len());
        raw.insert(table, rows);
    }

    let mut skipped = BTreeMap::new();
    let snapshot = SourceSnapshot {
        specialties: typed(&raw, &mut skipped),
        patients: typed(&raw, &mut skipped),
        doctors: typed(&raw, &mut skipped),
        appointments: typed(&raw, &mut skipped),
    };

    info!("loading dimensions");
    let specialty_rows = dimension::specialty_rows(&snapshot.specialties, &ctx);
    let patient_rows = dimension::patient_rows(&snapshot.patients, &ctx);
    let doctor_rows = dimension::doctor_rows(&snapshot.doctors, &ctx);
    let time_rows = dimension::time_rows(&snapshot.appointments, &ctx);

    let dimensions = vec![
        outcome(
            Table::Specialties,
            specialty_rows.len(),
            load_dimension(warehouse, &specialty_rows).await,
        ),
        outcome(
            Table::Patients,
            patient_rows.len(),
            load_dimension(warehouse, &patient_rows).await,
        ),
        outcome(
            Table::Doctors,
            doctor_rows.len(),
            load_dimension(warehouse, &doctor_rows).await,
        ),
        outcome(
            Table::Time,
            time_rows.len(),
            load_dimension(warehouse, &time_rows).await,
        ),
    ];

    info!("loading fact table");
    let keys = FactKeys {
        patients: KeyMap::load(warehouse, Table::Patients).await,
        doctors: KeyMap::load(warehouse, Table::Doctors).await,
        time: KeyMap::load(warehouse, Table::Time).await,
    };
    let resolution = resolve_facts(&snapshot.appointments, &keys, ctx.loaded_at);
    let mut facts = FactOutcome {
        appointments: snapshot.appointments.len(),
        resolved: resolution.rows.len(),
        dropped: resolution.dropped,
        ..FactOutcome::default()
    };
    match load_facts(warehouse, &resolution.rows).await {
        Ok(inserted) => facts.inserted = inserted,
        Err(err) => {
            error!(error = %err, "fact table left empty");
            facts.error = Some(err.to_string());
        }
    }

    let mut warehouse_rows = BTreeMap::new();
    for table in Table::RESET_ORDER {
        match warehouse.row_count(table).await {
            Ok(count) => {
                warehouse_rows.insert(table.name(), count);
            }
            Err(err) => error!(table = %table, error = %err, "could not count warehouse rows"),
        }
    }

    let report = RunReport {
        run_id,
        started_at,
        finished_at: Utc::now(),
        surrogate_keys: options.surrogate_keys,
        extracted,
        skipped,
        dimensions,
        facts,
        warehouse_rows,
    };
    info!(
        facts = report.facts.inserted,
        dropped = report.facts.dropped,
        clean = report.is_clean(),
        "ETL run finished"
    );
    Ok(report)
}

fn typed<T: FromSourceRow>(
    raw: &BTreeMap<SourceTable, Vec<SourceRow>>,
    skipped: &mut BTreeMap<&'static str, usize>,
) -> Vec<T> {
    let rows = raw.get(&T::TABLE).map(Vec::as_slice).unwrap_or(&[]);
    let (records, rejected) = typed_records::<T>(rows);
    skipped.insert(T::TABLE.name(), rejected);
    records
}

fn outcome(table: Table, rows: usize, result: Result<u64>) -> DimensionOutcome {
    match result {
        Ok(inserted) => DimensionOutcome {
            table,
            rows,
            inserted,
            error: None,
        },
        Err(err) => {
            error!(error = %err, "continuing without this dimension");
            DimensionOutcome {
                table,
                rows,
                inserted: 0,
                error: Some(err.to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Fault, MemorySource, MemoryWarehouse};
    use crate::records::fixtures::*;
    use crate::source::SqlValue;

    /// One specialty, one doctor in it, one patient, two appointments.
    fn clinic() -> MemorySource {
        MemorySource::new()
            .with_rows(SourceTable::Specialties, vec![specialty_row(1, "Cardiología")])
            .with_rows(SourceTable::Doctors, vec![doctor_row(10, 1)])
            .with_rows(SourceTable::Patients, vec![patient_row(100, "Ana")])
            .with_rows(
                SourceTable::Appointments,
                vec![
                    appointment_row(1000, 100, 10, "2024-03-15", at(9, 30, 0)),
                    appointment_row(1001, 100, 10, "2024-03-16", SqlValue::Text("11:00:00".to_string())),
                ],
            )
    }

    async fn run_memory(source: &mut MemorySource, warehouse: &mut MemoryWarehouse) -> RunReport {
        run(source, warehouse, RunOptions::default()).await.unwrap()
    }

    #[tokio::test]
    async fn test_end_to_end_counts() {
        let mut source = clinic();
        let mut warehouse = MemoryWarehouse::new();
        let report = run_memory(&mut source, &mut warehouse).await;

        assert_eq!(warehouse.rows(Table::Specialties).len(), 1);
        assert_eq!(warehouse.rows(Table::Doctors).len(), 1);
        assert_eq!(warehouse.rows(Table::Patients).len(), 1);
        assert_eq!(warehouse.rows(Table::Time).len(), 2);
        assert_eq!(warehouse.rows(Table::Appointments).len(), 2);

        for fact in warehouse.rows(Table::Appointments) {
            assert_eq!(fact.values["id_paciente_sk"], "100");
            assert_eq!(fact.values["id_medico_sk"], "10");
        }

        assert!(report.is_clean());
        assert_eq!(report.facts.inserted, 2);
        assert_eq!(report.extracted["Citas"], 2);
        assert_eq!(report.warehouse_rows["dim_tiempo"], 2);
    }

    #[tokio::test]
    async fn test_end_to_end_with_uuid_keys() {
        let mut source = clinic();
        let mut warehouse = MemoryWarehouse::new();
        let options = RunOptions {
            surrogate_keys: SurrogateKeys::Uuid,
        };
        run(&mut source, &mut warehouse, options).await.unwrap();

        let doctor_sk = SurrogateKeys::Uuid.derive(Table::Doctors, "10");
        let patient_sk = SurrogateKeys::Uuid.derive(Table::Patients, "100");
        let facts = warehouse.rows(Table::Appointments);
        assert_eq!(facts.len(), 2);
        assert!(facts.iter().all(|f| f.values["id_medico_sk"] == doctor_sk.as_str()));
        assert!(facts.iter().all(|f| f.values["id_paciente_sk"] == patient_sk.as_str()));
    }

    #[tokio::test]
    async fn test_rerun_yields_same_key_mapping() {
        let mut source = clinic();
        let mut warehouse = MemoryWarehouse::new();

        run_memory(&mut source, &mut warehouse).await;
        let mut first = Vec::new();
        for table in Table::DIMENSIONS {
            let mut pairs = warehouse.key_pairs(table).await.unwrap();
            pairs.sort();
            first.push(pairs);
        }

        run_memory(&mut source, &mut warehouse).await;
        for (table, expected) in Table::DIMENSIONS.into_iter().zip(first) {
            let mut pairs = warehouse.key_pairs(table).await.unwrap();
            pairs.sort();
            assert_eq!(pairs, expected, "{table} changed between runs");
        }
        assert_eq!(warehouse.rows(Table::Appointments).len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_patient_yields_no_fact() {
        let mut source = clinic().with_rows(
            SourceTable::Appointments,
            vec![appointment_row(1002, 9999, 10, "2024-03-17", at(8, 0, 0))],
        );
        let mut warehouse = MemoryWarehouse::new();
        let report = run_memory(&mut source, &mut warehouse).await;

        assert_eq!(report.facts.dropped, 1);
        assert_eq!(warehouse.rows(Table::Appointments).len(), 2);
        assert!(warehouse
            .rows(Table::Appointments)
            .iter()
            .all(|f| f.business_key != "1002"));
    }

    #[tokio::test]
    async fn test_shared_timestamp_shares_time_row() {
        let mut source = MemorySource::new()
            .with_rows(SourceTable::Specialties, vec![specialty_row(1, "Pediatría")])
            .with_rows(SourceTable::Doctors, vec![doctor_row(10, 1)])
            .with_rows(
                SourceTable::Patients,
                vec![patient_row(100, "Ana"), patient_row(101, "Luis")],
            )
            .with_rows(
                SourceTable::Appointments,
                vec![
                    appointment_row(1, 100, 10, "2024-03-15", at(9, 30, 0)),
                    appointment_row(
                        2,
                        101,
                        10,
                        "2024-03-15",
                        SqlValue::Interval(chrono::TimeDelta::seconds(34_200)),
                    ),
                ],
            );
        let mut warehouse = MemoryWarehouse::new();
        run_memory(&mut source, &mut warehouse).await;

        assert_eq!(warehouse.rows(Table::Time).len(), 1);
        let facts = warehouse.rows(Table::Appointments);
        assert_eq!(facts.len(), 2);
        assert!(facts
            .iter()
            .all(|f| f.values["id_tiempo_sk"] == "20240315093000"));
    }

    #[tokio::test]
    async fn test_reset_failure_aborts_before_loading() {
        let mut source = clinic();
        let mut warehouse = MemoryWarehouse::new().with_fault(Fault::Reset);

        let result = run(&mut source, &mut warehouse, RunOptions::default()).await;
        assert!(matches!(result, Err(crate::error::EtlError::Reset(_))));
        assert!(warehouse.rows(Table::Specialties).is_empty());
    }

    #[tokio::test]
    async fn test_failed_extraction_cascades_to_empty_facts() {
        let mut source = clinic().failing(SourceTable::Patients);
        let mut warehouse = MemoryWarehouse::new();
        let report = run_memory(&mut source, &mut warehouse).await;

        assert_eq!(report.extracted["Pacientes"], 0);
        assert!(warehouse.rows(Table::Patients).is_empty());
        assert_eq!(warehouse.rows(Table::Doctors).len(), 1);
        assert_eq!(warehouse.rows(Table::Time).len(), 2);
        assert!(warehouse.rows(Table::Appointments).is_empty());
        assert_eq!(report.facts.dropped, 2);
    }

    #[tokio::test]
    async fn test_failed_dimension_leaves_others_loaded() {
        let mut source = clinic();
        let mut warehouse = MemoryWarehouse::new().with_fault(Fault::Insert(Table::Doctors));
        let report = run_memory(&mut source, &mut warehouse).await;

        let doctors = report.dimension(Table::Doctors).unwrap();
        assert!(doctors.error.is_some());
        assert_eq!(doctors.inserted, 0);
        assert_eq!(warehouse.rows(Table::Specialties).len(), 1);
        assert_eq!(warehouse.rows(Table::Patients).len(), 1);
        assert_eq!(warehouse.rows(Table::Time).len(), 2);
        assert!(warehouse.rows(Table::Appointments).is_empty());
        assert_eq!(report.facts.dropped, 2);
        assert!(!report.is_clean());
    }

    #[tokio::test]
    async fn test_failed_fact_batch_keeps_dimensions() {
        let mut source = clinic();
        let mut warehouse = MemoryWarehouse::new().with_fault(Fault::Insert(Table::Appointments));
        let report = run_memory(&mut source, &mut warehouse).await;

        assert!(report.facts.error.is_some());
        assert_eq!(report.facts.resolved, 2);
        assert_eq!(report.facts.inserted, 0);
        assert!(warehouse.rows(Table::Appointments).is_empty());
        assert_eq!(warehouse.rows(Table::Doctors).len(), 1);
        assert_eq!(warehouse.rows(Table::Time).len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_rows_are_skipped_and_counted() {
        let mut source = clinic().with_rows(
            SourceTable::Appointments,
            vec![
                appointment_row(1003, 100, 10, "2024-03-18", SqlValue::Text("9h".to_string())),
                SourceRow::new().with("CitaID", SqlValue::Int(1004)),
            ],
        );
        let mut warehouse = MemoryWarehouse::new();
        let report = run_memory(&mut source, &mut warehouse).await;

        assert_eq!(report.extracted["Citas"], 4);
        assert_eq!(report.skipped["Citas"], 2);
        assert_eq!(report.facts.appointments, 2);
        assert_eq!(warehouse.rows(Table::Appointments).len(), 2);
    }

    #[tokio::test]
    async fn test_repeated_source_keys_load_once() {
        let mut source = clinic().with_rows(
            SourceTable::Patients,
            vec![patient_row(100, "Ana duplicada")],
        );
        let mut warehouse = MemoryWarehouse::new();
        let report = run_memory(&mut source, &mut warehouse).await;

        let patients = report.dimension(Table::Patients).unwrap();
        assert_eq!(patients.rows, 2);
        assert_eq!(patients.inserted, 1);
        // first writer wins
        assert_eq!(warehouse.rows(Table::Patients)[0].values["nombre"], "Ana");
    }

    #[tokio::test]
    async fn test_report_serializes_with_table_names() {
        let mut source = clinic();
        let mut warehouse = MemoryWarehouse::new();
        let report = run_memory(&mut source, &mut warehouse).await;

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["dimensions"][0]["table"], "dim_especialidades");
        assert_eq!(json["surrogate_keys"], "business-key");
        assert_eq!(json["facts"]["inserted"], 2);
    }
}
