//! Dimension Loader - source records to warehouse dimension rows.

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use sqlx::query_builder::Separated;
use sqlx::MySql;
use std::collections::HashSet;
use tracing::{debug, info};

use crate::error::{EtlError, Result};
use crate::keys::SurrogateKeys;
use crate::records::{AppointmentRecord, DoctorRecord, PatientRecord, SpecialtyRecord};
use crate::time::CalendarParts;
use crate::warehouse::{Table, Warehouse, WarehouseRow};

/// Settings shared by every row built in one run.
#[derive(Debug, Clone, Copy)]
pub struct LoadContext {
    pub keys: SurrogateKeys,
    /// Load timestamp stamped on every warehouse row of the run.
    pub loaded_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpecialtyRow {
    #[serde(rename = "id_especialidad_sk")]
    pub specialty_sk: String,
    #[serde(rename = "id_especialidad")]
    pub specialty_id: String,
    #[serde(rename = "nombre_especialidad")]
    pub name: String,
    #[serde(rename = "fecha_carga")]
    pub loaded_at: NaiveDateTime,
}

impl WarehouseRow for SpecialtyRow {
    const TABLE: Table = Table::Specialties;

    fn business_key(&self) -> &str {
        &self.specialty_id
    }

    fn surrogate_key(&self) -> Option<&str> {
        Some(&self.specialty_sk)
    }

    fn bind_columns(&self, row: &mut Separated<'_, '_, MySql, &'static str>) {
        row.push_bind(self.specialty_sk.clone())
            .push_bind(self.specialty_id.clone())
            .push_bind(self.name.clone())
            .push_bind(self.loaded_at);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatientRow {
    #[serde(rename = "id_paciente_sk")]
    pub patient_sk: String,
    #[serde(rename = "id_paciente")]
    pub patient_id: String,
    #[serde(rename = "apellido")]
    pub last_name: String,
    #[serde(rename = "direccion")]
    pub address: Option<String>,
    #[serde(rename = "fecha_nacimiento")]
    pub birth_date: Option<NaiveDate>,
    #[serde(rename = "genero")]
    pub gender: Option<String>,
    #[serde(rename = "nombre")]
    pub first_name: String,
    #[serde(rename = "telefono")]
    pub phone: Option<String>,
    #[serde(rename = "fecha_carga")]
    pub loaded_at: NaiveDateTime,
}

impl WarehouseRow for PatientRow {
    const TABLE: Table = Table::Patients;

    fn business_key(&self) -> &str {
        &self.patient_id
    }

    fn surrogate_key(&self) -> Option<&str> {
        Some(&self.patient_sk)
    }

    fn bind_columns(&self, row: &mut Separated<'_, '_, MySql, &'static str>) {
        row.push_bind(self.patient_sk.clone())
            .push_bind(self.patient_id.clone())
            .push_bind(self.last_name.clone())
            .push_bind(self.address.clone())
            .push_bind(self.birth_date)
            .push_bind(self.gender.clone())
            .push_bind(self.first_name.clone())
            .push_bind(self.phone.clone())
            .push_bind(self.loaded_at);
    }
}

/// Doctor dimension row.
///
/// `specialty_id` is the specialty's business key, not its surrogate key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DoctorRow {
    #[serde(rename = "id_medico_sk")]
    pub doctor_sk: String,
    #[serde(rename = "id_medico")]
    pub doctor_id: String,
    #[serde(rename = "id_especialidad")]
    pub specialty_id: String,
    #[serde(rename = "codigo_empleado")]
    pub employee_code: String,
    #[serde(rename = "nombre")]
    pub first_name: String,
    #[serde(rename = "apellido")]
    pub last_name: String,
    #[serde(rename = "genero")]
    pub gender: Option<String>,
    #[serde(rename = "fecha_carga")]
    pub loaded_at: NaiveDateTime,
}

impl WarehouseRow for DoctorRow {
    const TABLE: Table = Table::Doctors;

    fn business_key(&self) -> &str {
        &self.doctor_id
    }

    fn surrogate_key(&self) -> Option<&str> {
        Some(&self.doctor_sk)
    }

    fn bind_columns(&self, row: &mut Separated<'_, '_, MySql, &'static str>) {
        row.push_bind(self.doctor_sk.clone())
            .push_bind(self.doctor_id.clone())
            .push_bind(self.specialty_id.clone())
            .push_bind(self.employee_code.clone())
            .push_bind(self.first_name.clone())
            .push_bind(self.last_name.clone())
            .push_bind(self.gender.clone())
            .push_bind(self.loaded_at);
    }
}

/// Time dimension row, one per distinct appointment timestamp.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeRow {
    #[serde(rename = "id_tiempo_sk")]
    pub time_sk: String,
    #[serde(rename = "fecha")]
    pub date: NaiveDate,
    #[serde(rename = "anio")]
    pub year: i32,
    #[serde(rename = "mes")]
    pub month: u32,
    #[serde(rename = "dia")]
    pub day: u32,
    #[serde(rename = "hora")]
    pub hour: u32,
    #[serde(rename = "minuto")]
    pub minute: u32,
    #[serde(rename = "segundo")]
    pub second: u32,
    #[serde(rename = "nombre_mes")]
    pub month_name: String,
    #[serde(rename = "dia_semana")]
    pub weekday_name: String,
    #[serde(rename = "fecha_carga")]
    pub loaded_at: NaiveDateTime,
}

impl WarehouseRow for TimeRow {
    const TABLE: Table = Table::Time;

    fn business_key(&self) -> &str {
        &self.time_sk
    }

    fn surrogate_key(&self) -> Option<&str> {
        Some(&self.time_sk)
    }

    fn bind_columns(&self, row: &mut Separated<'_, '_, MySql, &'static str>) {
        row.push_bind(self.time_sk.clone())
            .push_bind(self.date)
            .push_bind(self.year)
            .push_bind(self.month)
            .push_bind(self.day)
            .push_bind(self.hour)
            .push_bind(self.minute)
            .push_bind(self.second)
            .push_bind(self.month_name.clone())
            .push_bind(self.weekday_name.clone())
            .push_bind(self.loaded_at);
    }
}

pub fn specialty_rows(records: &[SpecialtyRecord], ctx: &LoadContext) -> Vec<SpecialtyRow> {
    records
        .iter()
        .map(|record| SpecialtyRow {
            specialty_sk: ctx.keys.derive(Table::Specialties, &record.specialty_id),
            specialty_id: record.specialty_id.clone(),
            name: record.name.clone(),
            loaded_at: ctx.loaded_at,
        })
        .collect()
}

pub fn patient_rows(records: &[PatientRecord], ctx: &LoadContext) -> Vec<PatientRow> {
    records
        .iter()
        .map(|record| PatientRow {
            patient_sk: ctx.keys.derive(Table::Patients, &record.patient_id),
            patient_id: record.patient_id.clone(),
            last_name: record.last_name.clone(),
            address: record.address.clone(),
            birth_date: record.birth_date,
            gender: record.gender.clone(),
            first_name: record.first_name.clone(),
            phone: record.phone.clone(),
            loaded_at: ctx.loaded_at,
        })
        .collect()
}

pub fn doctor_rows(records: &[DoctorRecord], ctx: &LoadContext) -> Vec<DoctorRow> {
    records
        .iter()
        .map(|record| DoctorRow {
            doctor_sk: ctx.keys.derive(Table::Doctors, &record.doctor_id),
            doctor_id: record.doctor_id.clone(),
            specialty_id: record.specialty_id.clone(),
            employee_code: record.employee_code.clone(),
            first_name: record.first_name.clone(),
            last_name: record.last_name.clone(),
            gender: record.gender.clone(),
            loaded_at: ctx.loaded_at,
        })
        .collect()
}

/// One row per distinct appointment timestamp, in order of first appearance.
///
/// Duplicates are dropped here, before the batch is built, not left to the
/// warehouse's insert-if-absent.
pub fn time_rows(appointments: &[AppointmentRecord], ctx: &LoadContext) -> Vec<TimeRow> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut rows = Vec::new();

    for appointment in appointments {
        let key = appointment.time_key();
        if !seen.insert(key.clone()) {
            debug!(time_key = %key, appointment = %appointment.appointment_id, "time key already scheduled");
            continue;
        }

        let parts = CalendarParts::of(&appointment.scheduled_at);
        rows.push(TimeRow {
            time_sk: key,
            date: parts.date,
            year: parts.year,
            month: parts.month,
            day: parts.day,
            hour: parts.hour,
            minute: parts.minute,
            second: parts.second,
            month_name: parts.month_name,
            weekday_name: parts.weekday_name,
            loaded_at: ctx.loaded_at,
        });
    }

    rows
}

/// Insert-if-absent one dimension in a single transaction.
///
/// On failure nothing of this dimension is kept; the caller decides whether
/// the run goes on.
pub async fn load_dimension<W: Warehouse, R: WarehouseRow>(
    warehouse: &mut W,
    rows: &[R],
) -> Result<u64> {
    let table = R::TABLE;
    info!(table = %table, rows = rows.len(), "loading dimension");

    let inserted = warehouse
        .insert_rows(rows)
        .await
        .map_err(|source| EtlError::DimensionLoad { table, source })?;

    info!(table = %table, inserted, "dimension loaded");
    Ok(inserted)
}
