//! In-memory source and warehouse.
//!
//! The warehouse keeps the same contract as the MySQL one: unique business
//! keys, insert-if-absent for dimensions, strict inserts and foreign-key
//! checks for facts, and all-or-nothing batches. `--dry-run` loads into it.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::error::StoreError;
use crate::source::{Source, SourceRow, SourceTable};
use crate::warehouse::{Table, Warehouse, WarehouseRow};

#[derive(Debug, Default, Clone)]
pub struct MemorySource {
    tables: HashMap<SourceTable, Vec<SourceRow>>,
    failing: HashSet<SourceTable>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(mut self, table: SourceTable, rows: Vec<SourceRow>) -> Self {
        self.tables.entry(table).or_default().extend(rows);
        self
    }

    /// Make every read of `table` fail.
    pub fn failing(mut self, table: SourceTable) -> Self {
        self.failing.insert(table);
        self
    }
}

impl Source for MemorySource {
    async fn read_table(&mut self, table: SourceTable) -> Result<Vec<SourceRow>, StoreError> {
        if self.failing.contains(&table) {
            return Err(StoreError::Rejected {
                table: table.name(),
                reason: "table is not readable".to_string(),
            });
        }
        Ok(self.tables.get(&table).cloned().unwrap_or_default())
    }
}

/// Injected store failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Reset,
    Insert(Table),
    ReadKeys(Table),
}

/// A stored warehouse row with its column values as JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub business_key: String,
    pub surrogate_key: Option<String>,
    pub values: serde_json::Value,
}

#[derive(Debug, Clone, Default)]
struct MemoryTable {
    rows: Vec<StoredRow>,
    business_keys: HashSet<String>,
    surrogate_keys: HashSet<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryWarehouse {
    tables: BTreeMap<Table, MemoryTable>,
    faults: Vec<Fault>,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fault(mut self, fault: Fault) -> Self {
        self.faults.push(fault);
        self
    }

    pub fn rows(&self, table: Table) -> &[StoredRow] {
        self.tables
            .get(&table)
            .map(|t| t.rows.as_slice())
            .unwrap_or(&[])
    }

    fn has_fault(&self, fault: Fault) -> bool {
        self.faults.contains(&fault)
    }

    fn references_exist(&self, target: Table, key: &str) -> bool {
        self.tables
            .get(&target)
            .is_some_and(|t| t.surrogate_keys.contains(key))
    }
}

impl Warehouse for MemoryWarehouse {
    async fn reset(&mut self) -> Result<(), StoreError> {
        if self.has_fault(Fault::Reset) {
            return Err(StoreError::Rejected {
                table: Table::Appointments.name(),
                reason: "reset refused".to_string(),
            });
        }
        self.tables.clear();
        Ok(())
    }

    async fn insert_rows<R: WarehouseRow>(&mut self, rows: &[R]) -> Result<u64, StoreError> {
        let table = R::TABLE;
        let rejected = |reason: String| StoreError::Rejected {
            table: table.name(),
            reason,
        };

        if self.has_fault(Fault::Insert(table)) {
            return Err(rejected("insert refused".to_string()));
        }

        // Work on a copy so a failure leaves the table untouched.
        let mut staged = self.tables.get(&table).cloned().unwrap_or_default();
        let mut inserted = 0;

        for row in rows {
            let business_key = row.business_key();
            if staged.business_keys.contains(business_key) {
                if table.is_dimension() {
                    continue;
                }
                return Err(rejected(format!("duplicate key {business_key}")));
            }

            for (target, key) in row.references() {
                if !self.references_exist(target, key) {
                    return Err(rejected(format!(
                        "row {business_key}: foreign key {key} not found in {target}"
                    )));
                }
            }

            let values = serde_json::to_value(row).map_err(|e| rejected(e.to_string()))?;
            staged.business_keys.insert(business_key.to_string());
            if let Some(surrogate) = row.surrogate_key() {
                staged.surrogate_keys.insert(surrogate.to_string());
            }
            staged.rows.push(StoredRow {
                business_key: business_key.to_string(),
                surrogate_key: row.surrogate_key().map(str::to_string),
                values,
            });
            inserted += 1;
        }

        self.tables.insert(table, staged);
        Ok(inserted)
    }

    async fn key_pairs(&mut self, table: Table) -> Result<Vec<(String, String)>, StoreError> {
        if self.has_fault(Fault::ReadKeys(table)) {
            return Err(StoreError::Rejected {
                table: table.name(),
                reason: "key read refused".to_string(),
            });
        }
        if !table.is_dimension() {
            return Ok(Vec::new());
        }
        Ok(self
            .rows(table)
            .iter()
            .filter_map(|row| {
                row.surrogate_key
                    .clone()
                    .map(|surrogate| (surrogate, row.business_key.clone()))
            })
            .collect())
    }

    async fn row_count(&mut self, table: Table) -> Result<u64, StoreError> {
        Ok(self.rows(table).len() as u64)
    }
}
