// resources/coordinator.rs - Requirement checks, crafting and delivery

use std::iter;
use std::sync::Arc;

use tracing::{debug, warn};

use super::fulfillment::FulfillmentPolicy;
use super::{Bom, ConversionTable, Holdings, Materials, Plan, Shortfall};
use crate::observability::record_fallback_injection;

/// Applies one conversion table and fulfillment policy to bills and holdings
#[derive(Debug, Clone)]
pub struct ResourceCoordinator {
    table: Arc<ConversionTable>,
    policy: FulfillmentPolicy,
}

impl ResourceCoordinator {
    pub fn new(table: Arc<ConversionTable>, policy: FulfillmentPolicy) -> Self {
        Self { table, policy }
    }

    /// Standard table, default policy
    pub fn standard() -> Self {
        Self::new(Arc::new(ConversionTable::standard()), FulfillmentPolicy::default())
    }

    pub fn table(&self) -> &ConversionTable {
        &self.table
    }

    pub fn policy(&self) -> &FulfillmentPolicy {
        &self.policy
    }

    pub fn is_satisfied(&self, bom: &Bom, holdings: &Holdings) -> bool {
        self.table.plan(bom, holdings).is_satisfied()
    }

    pub fn first_shortfall(&self, bom: &Bom, holdings: &Holdings) -> Option<Shortfall> {
        self.table.plan(bom, holdings).shortfall
    }

    /// Craft whatever short materials the unreserved inputs fully cover
    ///
    /// A conversion only runs when it can close the whole shortfall, rounded
    /// up to whole batches. Returns the quantities produced.
    pub fn attempt_craft(&self, bom: &Bom, holdings: &mut Holdings) -> Materials {
        let mut crafted = Materials::new();
        let mut reserved = Materials::new();

        for (material, required) in bom.iter() {
            let mut need = required;
            for source in iter::once(material).chain(self.table.pool_siblings(material)) {
                let taken = need.min(unreserved(holdings, &reserved, source));
                reserved.add(source, taken);
                need -= taken;
            }
            if need == 0 {
                continue;
            }

            let Some(conversion) = self.table.conversion_for(material) else {
                continue;
            };

            let batches = conversion.batches_for(need);
            let covered = conversion
                .inputs
                .iter()
                .all(|(input, per_batch)| unreserved(holdings, &reserved, input) >= per_batch * batches);
            if !covered {
                debug!(material, need, batches, "Not enough inputs to craft");
                continue;
            }

            for (input, per_batch) in &conversion.inputs {
                holdings.take(input, per_batch * batches);
            }
            let produced = conversion.output * batches;
            holdings.add(material, produced);
            reserved.add(material, need);
            crafted.add(material, produced);

            debug!(material, batches, produced, "Crafted");
        }

        crafted
    }

    /// Remove `bom` from `holdings`: literal first, then pool siblings, then
    /// conversion inputs. Leaves holdings untouched on a shortfall.
    pub fn deduct(&self, bom: &Bom, holdings: &mut Holdings) -> Result<Plan, Shortfall> {
        let plan = self.table.plan(bom, holdings);
        if let Some(shortfall) = plan.shortfall {
            return Err(shortfall);
        }
        plan.apply(holdings);
        Ok(plan)
    }

    /// Inject exactly the missing quantity of each short material
    ///
    /// Afterwards `is_satisfied(bom, holdings)` holds. Returns what was added.
    pub fn inject_fallback(&self, actor: &str, bom: &Bom, holdings: &mut Holdings) -> Materials {
        let mut injected = Materials::new();

        // Each injection clears the first shortfall, so one pass per material suffices
        for _ in 0..=bom.len() {
            let Some(shortfall) = self.first_shortfall(bom, holdings) else {
                break;
            };
            let missing = shortfall.missing();
            warn!(
                actor,
                material = %shortfall.material,
                missing,
                required = shortfall.required,
                "Attempt bound reached, injecting missing material"
            );
            holdings.add(&shortfall.material, missing);
            injected.add(&shortfall.material, missing);
            record_fallback_injection(actor, &shortfall.material, missing);
        }

        injected
    }
}

fn unreserved(holdings: &Holdings, reserved: &Materials, material: &str) -> u64 {
    holdings.get(material).saturating_sub(reserved.get(material))
}
