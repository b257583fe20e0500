//! Fact Loader - appointments resolved against the loaded dimensions.

use chrono::NaiveDateTime;
use serde::Serialize;
use sqlx::query_builder::Separated;
use sqlx::MySql;
use tracing::{info, warn};

use crate::error::{EtlError, Result};
use crate::keys::KeyMap;
use crate::records::AppointmentRecord;
use crate::warehouse::{Table, Warehouse, WarehouseRow};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FactRow {
    #[serde(rename = "id_cita")]
    pub appointment_id: String,
    #[serde(rename = "id_paciente_sk")]
    pub patient_sk: String,
    #[serde(rename = "id_medico_sk")]
    pub doctor_sk: String,
    #[serde(rename = "id_tiempo_sk")]
    pub time_sk: String,
    #[serde(rename = "fecha_hora_cita")]
    pub scheduled_at: NaiveDateTime,
    #[serde(rename = "estado_cita")]
    pub status: String,
    #[serde(rename = "motivo_cita")]
    pub reason: Option<String>,
    #[serde(rename = "fecha_carga")]
    pub loaded_at: NaiveDateTime,
}

impl WarehouseRow for FactRow {
    const TABLE: Table = Table::Appointments;

    fn business_key(&self) -> &str {
        &self.appointment_id
    }

    fn surrogate_key(&self) -> Option<&str> {
        None
    }

    fn references(&self) -> Vec<(Table, &str)> {
        vec![
            (Table::Patients, self.patient_sk.as_str()),
            (Table::Doctors, self.doctor_sk.as_str()),
            (Table::Time, self.time_sk.as_str()),
        ]
    }

    fn bind_columns(&self, row: &mut Separated<'_, '_, MySql, &'static str>) {
        row.push_bind(self.appointment_id.clone())
            .push_bind(self.patient_sk.clone())
            .push_bind(self.doctor_sk.clone())
            .push_bind(self.time_sk.clone())
            .push_bind(self.scheduled_at)
            .push_bind(self.status.clone())
            .push_bind(self.reason.clone())
            .push_bind(self.loaded_at);
    }
}

/// Surrogate-key maps the fact loader resolves against.
#[derive(Debug, Clone, Default)]
pub struct FactKeys {
    pub patients: KeyMap,
    pub doctors: KeyMap,
    pub time: KeyMap,
}

/// Outcome of resolving appointments into fact rows.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub rows: Vec<FactRow>,
    pub dropped: usize,
}

/// Build one fact row per appointment whose three keys all resolve.
///
/// An appointment with any unresolved key is dropped and logged; it is never
/// emitted with an empty or dangling key.
pub fn resolve_facts(
    appointments: &[AppointmentRecord],
    keys: &FactKeys,
    loaded_at: NaiveDateTime,
) -> Resolution {
    let mut resolution = Resolution::default();

    for appointment in appointments {
        let time_key = appointment.time_key();
        let patient_sk = keys.patients.resolve(&appointment.patient_id);
        let doctor_sk = keys.doctors.resolve(&appointment.doctor_id);
        let time_sk = keys.time.resolve(&time_key);

        match (patient_sk, doctor_sk, time_sk) {
            (Some(patient_sk), Some(doctor_sk), Some(time_sk)) => {
                resolution.rows.push(FactRow {
                    appointment_id: appointment.appointment_id.clone(),
                    patient_sk: patient_sk.to_string(),
                    doctor_sk: doctor_sk.to_string(),
                    time_sk: time_sk.to_string(),
                    scheduled_at: appointment.scheduled_at,
                    status: appointment.status.to_string(),
                    reason: appointment.reason.clone(),
                    loaded_at,
                });
            }
            _ => {
                resolution.dropped += 1;
                let mut unresolved = Vec::new();
                if patient_sk.is_none() {
                    unresolved.push(format!("PacienteID={}", appointment.patient_id));
                }
                if doctor_sk.is_none() {
                    unresolved.push(format!("MedicoID={}", appointment.doctor_id));
                }
                if time_sk.is_none() {
                    unresolved.push(format!("tiempo={time_key}"));
                }
                warn!(
                    appointment = %appointment.appointment_id,
                    unresolved = %unresolved.join(", "),
                    "no surrogate key found, dropping appointment"
                );
            }
        }
    }

    resolution
}

/// Insert the resolved facts as one batch; rolled back as a whole on failure.
pub async fn load_facts<W: Warehouse>(warehouse: &mut W, rows: &[FactRow]) -> Result<u64> {
    if rows.is_empty() {
        info!("no appointments to load into the fact table");
        return Ok(0);
    }

    info!(rows = rows.len(), "loading facts");
    let inserted = warehouse
        .insert_rows(rows)
        .await
        .map_err(EtlError::FactLoad)?;

    info!(inserted, "facts loaded");
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimension::{self, LoadContext};
    use crate::keys::SurrogateKeys;
    use crate::memory::{Fault, MemoryWarehouse};
    use crate::records::fixtures::*;

    fn loaded_at() -> NaiveDateTime {
        chrono::NaiveDate::from_ymd_opt(2025, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn keys_for(appointments: &[AppointmentRecord], patients: &[&str], doctors: &[&str]) -> FactKeys {
        let ctx = LoadContext {
            keys: SurrogateKeys::BusinessKey,
            loaded_at: loaded_at(),
        };
        let time = dimension::time_rows(appointments, &ctx)
            .into_iter()
            .map(|row| (row.time_sk.clone(), row.time_sk));
        let pairs = |ids: &[&str]| -> Vec<(String, String)> {
            ids.iter().map(|id| (format!("sk-{id}"), id.to_string())).collect()
        };
        FactKeys {
            patients: KeyMap::from_pairs(pairs(patients)),
            doctors: KeyMap::from_pairs(pairs(doctors)),
            time: KeyMap::from_pairs(time),
        }
    }

    #[test]
    fn test_unknown_patient_is_dropped() {
        let appointments = vec![appointment(1, 9999, 1, "2024-03-15", at(9, 30, 0))];
        let keys = keys_for(&appointments, &["1"], &["1"]);

        let resolution = resolve_facts(&appointments, &keys, loaded_at());
        assert!(resolution.rows.is_empty());
        assert_eq!(resolution.dropped, 1);
    }

    #[test]
    fn test_unknown_doctor_is_dropped() {
        let appointments = vec![
            appointment(1, 1, 1, "2024-03-15", at(9, 30, 0)),
            appointment(2, 1, 77, "2024-03-15", at(10, 0, 0)),
        ];
        let keys = keys_for(&appointments, &["1"], &["1"]);

        let resolution = resolve_facts(&appointments, &keys, loaded_at());
        assert_eq!(resolution.rows.len(), 1);
        assert_eq!(resolution.rows[0].appointment_id, "1");
        assert_eq!(resolution.dropped, 1);
    }

    #[test]
    fn test_missing_time_row_drops_fact() {
        let appointments = vec![appointment(1, 1, 1, "2024-03-15", at(9, 30, 0))];
        let mut keys = keys_for(&appointments, &["1"], &["1"]);
        keys.time = KeyMap::default();

        let resolution = resolve_facts(&appointments, &keys, loaded_at());
        assert_eq!(resolution.dropped, 1);
    }

    #[test]
    fn test_resolved_fact_uses_surrogate_keys() {
        let appointments = vec![appointment(8, 1, 2, "2024-03-15", at(9, 30, 0))];
        let keys = keys_for(&appointments, &["1"], &["2"]);

        let resolution = resolve_facts(&appointments, &keys, loaded_at());
        let fact = &resolution.rows[0];
        assert_eq!(fact.appointment_id, "8");
        assert_eq!(fact.patient_sk, "sk-1");
        assert_eq!(fact.doctor_sk, "sk-2");
        assert_eq!(fact.time_sk, "20240315093000");
        assert_eq!(fact.status, "Programada");
        assert_eq!(fact.reason.as_deref(), Some("Control"));
    }

    #[test]
    fn test_time_keys_match_time_dimension() {
        let appointments = vec![
            appointment(1, 1, 1, "2024-01-31", at(23, 59, 59)),
            appointment(2, 1, 1, "2024-02-01", crate::source::SqlValue::Text("00:00:00".to_string())),
        ];
        let ctx = LoadContext {
            keys: SurrogateKeys::BusinessKey,
            loaded_at: loaded_at(),
        };
        let time_keys: Vec<String> = dimension::time_rows(&appointments, &ctx)
            .into_iter()
            .map(|row| row.time_sk)
            .collect();
        let keys = keys_for(&appointments, &["1"], &["1"]);
        let fact_keys: Vec<String> = resolve_facts(&appointments, &keys, loaded_at())
            .rows
            .into_iter()
            .map(|row| row.time_sk)
            .collect();

        assert_eq!(time_keys, fact_keys);
    }

    #[test]
    fn test_shared_timestamp_gives_two_facts_one_time_key() {
        let appointments = vec![
            appointment(1, 1, 1, "2024-03-15", at(9, 30, 0)),
            appointment(2, 1, 1, "2024-03-15", at(9, 30, 0)),
        ];
        let keys = keys_for(&appointments, &["1"], &["1"]);
        assert_eq!(keys.time.len(), 1);

        let resolution = resolve_facts(&appointments, &keys, loaded_at());
        assert_eq!(resolution.rows.len(), 2);
        assert!(resolution.rows.iter().all(|r| r.time_sk == "20240315093000"));
    }

    #[tokio::test]
    async fn test_load_facts_empty_batch() {
        let mut warehouse = MemoryWarehouse::new();
        assert_eq!(load_facts(&mut warehouse, &[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_fact_batch_rolls_back_on_failure() {
        let mut warehouse = MemoryWarehouse::new().with_fault(Fault::Insert(Table::Appointments));
        let appointments = vec![appointment(1, 1, 1, "2024-03-15", at(9, 30, 0))];
        let keys = keys_for(&appointments, &["1"], &["1"]);
        let rows = resolve_facts(&appointments, &keys, loaded_at()).rows;

        let err = load_facts(&mut warehouse, &rows).await.unwrap_err();
        assert!(matches!(err, EtlError::FactLoad(_)));
        assert!(warehouse.rows(Table::Appointments).is_empty());
    }
}
