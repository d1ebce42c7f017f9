// resources/rules.rs - Equivalence and conversion rules

use super::{Bom, Holdings, Materials, ResourceError, Shortfall};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// `inputs` (per batch) become `output` units of `target`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversion {
    pub target: String,
    pub inputs: BTreeMap<String, u64>,
    pub output: u64,
}

impl Conversion {
    pub fn new(target: impl Into<String>, output: u64) -> Self {
        Self {
            target: target.into(),
            inputs: BTreeMap::new(),
            output,
        }
    }

    pub fn with_input(mut self, material: impl Into<String>, per_batch: u64) -> Self {
        self.inputs.insert(material.into(), per_batch);
        self
    }

    /// Batches that `available` input quantities allow
    fn batches_from(&self, available: impl Fn(&str) -> u64) -> u64 {
        self.inputs
            .iter()
            .filter(|(_, per_batch)| **per_batch > 0)
            .map(|(material, per_batch)| available(material) / per_batch)
            .min()
            .unwrap_or(0)
    }

    /// Whole batches needed to produce `quantity`
    pub(super) fn batches_for(&self, quantity: u64) -> u64 {
        quantity.div_ceil(self.output.max(1))
    }
}

/// Global material equivalences
///
/// Pools are sets of interchangeable materials. Conversions are keyed by the
/// material they produce.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionTable {
    pub pools: Vec<BTreeSet<String>>,
    pub conversions: BTreeMap<String, Conversion>,
}

impl ConversionTable {
    /// Empty table: only literal matches count
    pub fn new() -> Self {
        Self::default()
    }

    /// STONE/COBBLESTONE pool, WOOD -> 4 WOOD_PLANKS, COAL_ORE + WOOD -> 4 TORCH
    pub fn standard() -> Self {
        Self::new()
            .with_pool(["STONE", "COBBLESTONE"])
            .with_conversion(Conversion::new("WOOD_PLANKS", 4).with_input("WOOD", 1))
            .with_conversion(
                Conversion::new("TORCH", 4)
                    .with_input("COAL_ORE", 1)
                    .with_input("WOOD", 1),
            )
    }

    pub fn with_pool<I, S>(mut self, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pools.push(members.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_conversion(mut self, conversion: Conversion) -> Self {
        self.conversions.insert(conversion.target.clone(), conversion);
        self
    }

    /// Reject conversions that can never produce anything
    pub fn validate(&self) -> Result<(), ResourceError> {
        for (target, conversion) in &self.conversions {
            if conversion.output == 0
                || conversion.inputs.is_empty()
                || conversion.inputs.values().all(|q| *q == 0)
                || conversion.target != *target
            {
                return Err(ResourceError::InvalidConversion(target.clone()));
            }
        }
        Ok(())
    }

    /// Other members of the pool containing `material`, in name order
    pub fn pool_siblings<'a>(&'a self, material: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.pools
            .iter()
            .filter(move |pool| pool.contains(material))
            .flat_map(|pool| pool.iter())
            .map(String::as_str)
            .filter(move |m| *m != material)
    }

    pub fn conversion_for(&self, material: &str) -> Option<&Conversion> {
        self.conversions.get(material)
    }

    /// Plan how `holdings` cover `bom`, stopping at the first shortfall
    pub fn plan(&self, bom: &Bom, holdings: &Holdings) -> Plan {
        let mut planner = Planner::new(holdings);

        for (material, required) in bom.iter() {
            let mut need = required;
            need -= planner.draw(material, material, need, DrawSource::Literal);

            for sibling in self.pool_siblings(material) {
                if need == 0 {
                    break;
                }
                need -= planner.draw(material, sibling, need, DrawSource::Pooled);
            }

            if need > 0 {
                if let Some(conversion) = self.conversion_for(material) {
                    let possible = conversion.batches_from(|m| planner.available(m));
                    let batches = possible.min(conversion.batches_for(need));
                    if batches > 0 {
                        for (input, per_batch) in &conversion.inputs {
                            planner.draw(material, input, per_batch * batches, DrawSource::Converted);
                        }
                        let produced = conversion.output * batches;
                        let used = produced.min(need);
                        planner.surplus.add(material, produced - used);
                        need -= used;
                    }
                }
            }

            if need > 0 {
                return Plan {
                    draws: planner.draws,
                    surplus: planner.surplus,
                    shortfall: Some(Shortfall {
                        material: material.to_string(),
                        required,
                        available: required - need,
                    }),
                };
            }
        }

        Plan {
            draws: planner.draws,
            surplus: planner.surplus,
            shortfall: None,
        }
    }
}

/// How a requirement unit was covered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawSource {
    Literal,
    Pooled,
    /// Consumed as a conversion input
    Converted,
}

/// Units of `source` reserved for `requirement`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draw {
    pub requirement: String,
    pub source: String,
    pub quantity: u64,
    pub kind: DrawSource,
}

/// Result of matching a bill against holdings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub draws: Vec<Draw>,
    /// Conversion output beyond what the bill needs
    pub surplus: Materials,
    pub shortfall: Option<Shortfall>,
}

impl Plan {
    pub fn is_satisfied(&self) -> bool {
        self.shortfall.is_none()
    }

    /// Remove every draw from `holdings` and credit conversion surplus
    pub(super) fn apply(&self, holdings: &mut Holdings) {
        for draw in &self.draws {
            holdings.take(&draw.source, draw.quantity);
        }
        for (material, quantity) in self.surplus.iter() {
            holdings.add(material, quantity);
        }
    }
}

/// Tracks reservations over one pass
struct Planner<'a> {
    holdings: &'a Holdings,
    reserved: Materials,
    draws: Vec<Draw>,
    surplus: Materials,
}

impl<'a> Planner<'a> {
    fn new(holdings: &'a Holdings) -> Self {
        Self {
            holdings,
            reserved: Materials::new(),
            draws: Vec::new(),
            surplus: Materials::new(),
        }
    }

    fn available(&self, material: &str) -> u64 {
        self.holdings
            .get(material)
            .saturating_sub(self.reserved.get(material))
    }

    /// Reserve up to `wanted` units of `source`; returns the amount reserved
    fn draw(&mut self, requirement: &str, source: &str, wanted: u64, kind: DrawSource) -> u64 {
        let quantity = wanted.min(self.available(source));
        if quantity > 0 {
            self.reserved.add(source, quantity);
            self.draws.push(Draw {
                requirement: requirement.to_string(),
                source: source.to_string(),
                quantity,
                kind,
            });
        }
        quantity
    }
}
