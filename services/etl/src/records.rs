//! Typed source records, validated at the extraction boundary.

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::fmt;
use tracing::warn;

use crate::error::{EtlError, TransformError};
use crate::source::{SourceRow, SourceTable, SqlValue};
use crate::time::{appointment_timestamp, time_key, RawTime};

/// Conversion from an untyped source row into a fixed-field record.
pub trait FromSourceRow: Sized {
    const TABLE: SourceTable;

    fn from_row(row: &SourceRow) -> Result<Self, TransformError>;
}

/// Convert every row, skipping (and logging) the ones that fail validation.
///
/// Returns the records plus the number of skipped rows.
pub fn typed_records<T: FromSourceRow>(rows: &[SourceRow]) -> (Vec<T>, usize) {
    let mut records = Vec::with_capacity(rows.len());
    let mut skipped = 0;

    for (idx, row) in rows.iter().enumerate() {
        match T::from_row(row) {
            Ok(record) => records.push(record),
            Err(source) => {
                skipped += 1;
                let err = EtlError::Transform {
                    table: T::TABLE,
                    row: idx + 1,
                    source,
                };
                let id = row
                    .get(T::TABLE.id_column())
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "?".to_string());
                warn!(id = %id, error = %err, "skipping source row");
            }
        }
    }

    (records, skipped)
}

/// Business key: string form of a numeric identifier.
fn business_key(row: &SourceRow, column: &'static str) -> Result<String, TransformError> {
    match row.require(column)? {
        SqlValue::Int(id) => Ok(id.to_string()),
        SqlValue::UInt(id) => Ok(id.to_string()),
        SqlValue::Text(id) if !id.trim().is_empty() => Ok(id.trim().to_string()),
        other => Err(invalid(column, other)),
    }
}

fn text(row: &SourceRow, column: &'static str) -> Result<String, TransformError> {
    match row.require(column)? {
        SqlValue::Text(value) => Ok(value.clone()),
        other => Err(invalid(column, other)),
    }
}

fn optional_text(row: &SourceRow, column: &'static str) -> Result<Option<String>, TransformError> {
    match row.optional(column)? {
        None => Ok(None),
        Some(SqlValue::Text(value)) => Ok(Some(value.clone())),
        Some(other) => Err(invalid(column, other)),
    }
}

fn date_value(column: &'static str, value: &SqlValue) -> Result<NaiveDate, TransformError> {
    match value {
        SqlValue::Date(date) => Ok(*date),
        SqlValue::DateTime(ts) => Ok(ts.date()),
        SqlValue::Text(text) => NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d")
            .map_err(|_| invalid(column, value)),
        other => Err(invalid(column, other)),
    }
}

fn invalid(field: &'static str, value: &SqlValue) -> TransformError {
    TransformError::InvalidField {
        field,
        found: format!("{} {}", value.kind(), value),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpecialtyRecord {
    pub specialty_id: String,
    pub name: String,
}

impl FromSourceRow for SpecialtyRecord {
    const TABLE: SourceTable = SourceTable::Specialties;

    fn from_row(row: &SourceRow) -> Result<Self, TransformError> {
        Ok(Self {
            specialty_id: business_key(row, "EspecialidadID")?,
            name: text(row, "NombreEspecialidad")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatientRecord {
    pub patient_id: String,
    pub first_name: String,
    pub last_name: String,
    pub birth_date: Option<NaiveDate>,
    pub gender: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
}

impl FromSourceRow for PatientRecord {
    const TABLE: SourceTable = SourceTable::Patients;

    fn from_row(row: &SourceRow) -> Result<Self, TransformError> {
        let birth_date = row
            .optional("FechaNacimiento")?
            .map(|value| date_value("FechaNacimiento", value))
            .transpose()?;

        Ok(Self {
            patient_id: business_key(row, "PacienteID")?,
            first_name: text(row, "Nombre")?,
            last_name: text(row, "Apellido")?,
            birth_date,
            gender: optional_text(row, "Genero")?,
            address: optional_text(row, "Direccion")?,
            phone: optional_text(row, "Telefono")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DoctorRecord {
    pub doctor_id: String,
    /// Business key of the doctor's specialty.
    pub specialty_id: String,
    pub employee_code: String,
    pub first_name: String,
    pub last_name: String,
    pub gender: Option<String>,
}

impl FromSourceRow for DoctorRecord {
    const TABLE: SourceTable = SourceTable::Doctors;

    fn from_row(row: &SourceRow) -> Result<Self, TransformError> {
        Ok(Self {
            doctor_id: business_key(row, "MedicoID")?,
            specialty_id: business_key(row, "EspecialidadID")?,
            employee_code: text(row, "CodigoEmpleado")?,
            first_name: text(row, "Nombre")?,
            last_name: text(row, "Apellido")?,
            gender: optional_text(row, "Genero")?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AppointmentStatus {
    Programada,
    Atendida,
    Cancelada,
    Reprogramada,
}

impl AppointmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::Programada => "Programada",
            AppointmentStatus::Atendida => "Atendida",
            AppointmentStatus::Cancelada => "Cancelada",
            AppointmentStatus::Reprogramada => "Reprogramada",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "programada" => Some(AppointmentStatus::Programada),
            "atendida" => Some(AppointmentStatus::Atendida),
            "cancelada" => Some(AppointmentStatus::Cancelada),
            "reprogramada" => Some(AppointmentStatus::Reprogramada),
            _ => None,
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An appointment with its timestamp already normalized.
#[derive(Debug, Clone, PartialEq)]
pub struct AppointmentRecord {
    pub appointment_id: String,
    pub patient_id: String,
    pub doctor_id: String,
    pub scheduled_at: NaiveDateTime,
    pub status: AppointmentStatus,
    pub reason: Option<String>,
}

impl AppointmentRecord {
    /// Key of the time dimension row this appointment belongs to.
    pub fn time_key(&self) -> String {
        time_key(&self.scheduled_at)
    }
}

impl FromSourceRow for AppointmentRecord {
    const TABLE: SourceTable = SourceTable::Appointments;

    fn from_row(row: &SourceRow) -> Result<Self, TransformError> {
        let date = date_value("FechaCita", row.require("FechaCita")?)?;
        let raw_time = RawTime::from(row.require("HoraCita")?);
        let scheduled_at = appointment_timestamp(date, &raw_time)?;

        let status_text = text(row, "EstadoCita")?;
        let status = AppointmentStatus::parse(&status_text).ok_or(TransformError::InvalidField {
            field: "EstadoCita",
            found: status_text.clone(),
        })?;

        Ok(Self {
            appointment_id: business_key(row, "CitaID")?,
            patient_id: business_key(row, "PacienteID")?,
            doctor_id: business_key(row, "MedicoID")?,
            scheduled_at,
            status,
            reason: optional_text(row, "MotivoCita")?,
        })
    }
}

/// Every entity of one source snapshot, typed.
#[derive(Debug, Clone, Default)]
pub struct SourceSnapshot {
    pub specialties: Vec<SpecialtyRecord>,
    pub patients: Vec<PatientRecord>,
    pub doctors: Vec<DoctorRecord>,
    pub appointments: Vec<AppointmentRecord>,
}
