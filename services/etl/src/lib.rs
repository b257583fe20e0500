//! Clinical appointments ETL - full load from the operational schema into
//! the star schema warehouse.
//!
//! Responsibilities:
//! - Empty the warehouse before every run (full load, no deltas)
//! - Extract the source tables and type their rows
//! - Load the specialty, patient, doctor and time dimensions (insert-if-absent)
//! - Resolve surrogate keys and load the appointment facts
//!
//! Every run starts from an empty warehouse, so reloading the same source
//! snapshot always produces the same warehouse.

pub mod config;
pub mod dimension;
pub mod error;
pub mod fact;
pub mod keys;
pub mod memory;
pub mod pipeline;
pub mod records;
pub mod reset;
pub mod source;
pub mod time;
pub mod warehouse;

pub use error::{EtlError, Result};
pub use keys::SurrogateKeys;
pub use pipeline::{run, RunOptions, RunReport};
