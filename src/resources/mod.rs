// resources/mod.rs - Resource Negotiation

//! Requirement matching, crafting and bounded fulfillment.
//!
//! A consumer publishes a bill of materials ([`Bom`]); a producer gathers
//! until its [`Holdings`] satisfy it under the [`ConversionTable`] (pooled
//! materials count for each other, convertible materials count at their
//! conversion yield), deducts the bill and delivers it.
//!
//! Checks walk the bill in material name order and reserve every unit they
//! count, so one stack of WOOD never satisfies both WOOD_PLANKS and TORCH.

mod coordinator;
mod fulfillment;
mod rules;

pub use coordinator::ResourceCoordinator;
pub use fulfillment::{
    FulfillmentError, FulfillmentOutcome, FulfillmentPolicy, Gatherer,
    DEFAULT_MAX_FULFILLMENT_ATTEMPTS,
};
pub use rules::{Conversion, ConversionTable, Draw, DrawSource, Plan};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Resource errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResourceError {
    #[error("Malformed material map: {0}")]
    Malformed(String),

    #[error("Missing field '{0}' in payload")]
    MissingField(&'static str),

    #[error("Conversion for {0} has no inputs or zero output")]
    InvalidConversion(String),
}

/// Material name -> quantity, iterated in name order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Materials(BTreeMap<String, u64>);

/// Requirement set (bill of materials)
pub type Bom = Materials;

/// What an actor currently holds
pub type Holdings = Materials;

impl Materials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Quantity of `material`, zero when absent
    pub fn get(&self, material: &str) -> u64 {
        self.0.get(material).copied().unwrap_or(0)
    }

    pub fn set(&mut self, material: impl Into<String>, quantity: u64) {
        self.0.insert(material.into(), quantity);
    }

    pub fn add(&mut self, material: &str, quantity: u64) {
        if quantity == 0 {
            return;
        }
        let entry = self.0.entry(material.to_string()).or_insert(0);
        *entry = entry.saturating_add(quantity);
    }

    /// Remove up to `quantity`; returns the amount actually removed
    pub fn take(&mut self, material: &str, quantity: u64) -> u64 {
        let Some(held) = self.0.get_mut(material) else {
            return 0;
        };
        let taken = quantity.min(*held);
        *held -= taken;
        if *held == 0 {
            self.0.remove(material);
        }
        taken
    }

    pub fn merge(&mut self, other: &Materials) {
        for (material, quantity) in other.iter() {
            self.add(material, quantity);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(m, q)| (m.as_str(), *q))
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(|q| *q == 0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn total(&self) -> u64 {
        self.0.values().sum()
    }

    pub fn to_value(&self) -> Value {
        Value::Object(
            self.0
                .iter()
                .map(|(m, q)| (m.clone(), Value::from(*q)))
                .collect(),
        )
    }

    pub fn from_value(value: &Value) -> Result<Self, ResourceError> {
        serde_json::from_value(value.clone()).map_err(|e| ResourceError::Malformed(e.to_string()))
    }
}

impl<S: Into<String>> FromIterator<(S, u64)> for Materials {
    fn from_iter<I: IntoIterator<Item = (S, u64)>>(iter: I) -> Self {
        let mut materials = Materials::new();
        for (material, quantity) in iter {
            materials.add(&material.into(), quantity);
        }
        materials
    }
}

impl fmt::Display for Materials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (material, quantity)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{material}: {quantity}")?;
        }
        f.write_str("}")
    }
}

/// First requirement that holdings cannot cover
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shortfall {
    pub material: String,
    pub required: u64,
    /// Units countable towards `material` after earlier reservations
    pub available: u64,
}

impl Shortfall {
    pub fn missing(&self) -> u64 {
        self.required.saturating_sub(self.available)
    }
}

impl fmt::Display for Shortfall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} short by {} ({} of {})",
            self.material,
            self.missing(),
            self.available,
            self.required
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_materials_arithmetic() {
        let mut held: Holdings = [("WOOD", 3), ("STONE", 0)].into_iter().collect();
        assert_eq!(held.get("WOOD"), 3);
        assert_eq!(held.get("STONE"), 0);
        assert_eq!(held.len(), 1);

        held.add("WOOD", 2);
        assert_eq!(held.take("WOOD", 10), 5);
        assert!(held.is_empty());
        assert_eq!(held.take("COAL_ORE", 1), 0);
    }

    #[test]
    fn test_materials_json() {
        let bom = Bom::from_value(&json!({ "WOOD_PLANKS": 40, "TORCH": 4 })).unwrap();
        assert_eq!(bom.get("WOOD_PLANKS"), 40);
        assert_eq!(bom.to_value(), json!({ "TORCH": 4, "WOOD_PLANKS": 40 }));
        assert_eq!(bom.to_string(), "{TORCH: 4, WOOD_PLANKS: 40}");

        assert!(Bom::from_value(&json!({ "WOOD": -1 })).is_err());
        assert!(Bom::from_value(&json!(["WOOD"])).is_err());
    }
}
