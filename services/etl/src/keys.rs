//! Surrogate keys: derivation at load time and resolution for the fact loader.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{error, info};
use uuid::Uuid;

use crate::warehouse::{Table, Warehouse};

/// Namespace for UUIDv5 surrogate keys.
const SURROGATE_NAMESPACE: Uuid = Uuid::from_u128(0x6c1b_7a52_93e4_4d0f_8a7e_2f51_c0d3_9b84);

/// How a dimension's surrogate key is derived from its business key.
///
/// Both strategies are deterministic, so reloading the same snapshot always
/// yields the same mapping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SurrogateKeys {
    /// Surrogate key is the business key itself.
    #[default]
    BusinessKey,
    /// UUIDv5 over `table:business_key`.
    Uuid,
}

impl SurrogateKeys {
    pub fn derive(self, table: Table, business_key: &str) -> String {
        match self {
            SurrogateKeys::BusinessKey => business_key.to_string(),
            SurrogateKeys::Uuid => {
                let name = format!("{}:{}", table.name(), business_key);
                Uuid::new_v5(&SURROGATE_NAMESPACE, name.as_bytes()).to_string()
            }
        }
    }
}

impl FromStr for SurrogateKeys {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "business-key" | "business_key" => Ok(SurrogateKeys::BusinessKey),
            "uuid" => Ok(SurrogateKeys::Uuid),
            other => Err(format!(
                "unknown surrogate key strategy {other:?}, expected business-key or uuid"
            )),
        }
    }
}

/// Business key -> surrogate key for one dimension, as stored in the warehouse.
#[derive(Debug, Clone, Default)]
pub struct KeyMap {
    keys: HashMap<String, String>,
}

impl KeyMap {
    /// Build from `(surrogate, business)` pairs as read from a dimension.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        let keys = pairs
            .into_iter()
            .map(|(surrogate, business)| (business, surrogate))
            .collect();
        Self { keys }
    }

    /// Read the mapping back from the warehouse.
    ///
    /// Reading the table rather than reusing the transform output means the
    /// map reflects what insert-if-absent actually kept. A failed read is
    /// logged and yields an empty map, so every lookup against it fails.
    pub async fn load<W: Warehouse>(warehouse: &mut W, table: Table) -> Self {
        match warehouse.key_pairs(table).await {
            Ok(pairs) => {
                let map = Self::from_pairs(pairs);
                info!(table = %table, keys = map.len(), "resolved surrogate keys");
                map
            }
            Err(err) => {
                error!(table = %table, error = %err, "could not read surrogate keys");
                Self::default()
            }
        }
    }

    pub fn resolve(&self, business_key: &str) -> Option<&str> {
        self.keys.get(business_key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
