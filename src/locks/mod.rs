// locks/mod.rs - Advisory Sector Locks

//! Broadcast-based advisory locks over fixed-size spatial tiles.
//!
//! There is no lock server. Each actor owns one [`SectorLockRegistry`] that
//! records the sectors it holds (`locally_owned`) and the sectors other actors
//! have announced (`globally_observed`). Acquiring a sector checks both sets,
//! records ownership and broadcasts `lock.acquire`; releasing broadcasts
//! `lock.release`. Other registries learn about claims through the bus, so the
//! view is eventually consistent: two actors deciding inside the same
//! propagation window can both succeed.
//!
//! The bus does not order deliveries, so every broadcast carries the claim's
//! `seq`, a per-owner number that only grows. An observer keeps the last `seq`
//! seen for each (owner, sector) and drops anything older. A release keeps its
//! entry as a tombstone, so an acquire that arrives after its own release is
//! ignored.
//!
//! Acquisition returns a [`SectorGuard`] that releases the sector when dropped,
//! so every exit path (success, error, cancellation) gives the sector back.
//! [`SectorLockRegistry::release_all`] force-releases everything when an actor
//! stops or faults.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::bus::{BusError, MessageBus, SubscriptionId};
use crate::message::{topics, Message, Payload};
use crate::observability::{record_lock_acquired, record_lock_conflict, record_lock_released};

/// Default tile edge length in world units
pub const DEFAULT_TILE_SIZE: i64 = 16;

/// Sector lock errors
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("Sector {0} is already claimed")]
    Conflict(Sector),

    #[error("Sectors {preferred} and {alternate} are both claimed")]
    Exhausted { preferred: Sector, alternate: Sector },

    #[error("Failed to broadcast lock claim: {0}")]
    Broadcast(#[from] BusError),
}

/// A fixed-size tile of the world, `floor(coordinate / tile_size)`
///
/// Travels on the wire as a two-element array `[x, z]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "(i64, i64)", into = "(i64, i64)")]
pub struct Sector {
    pub x: i64,
    pub z: i64,
}

impl Sector {
    pub const fn new(x: i64, z: i64) -> Self {
        Self { x, z }
    }

    /// Sector containing a world position
    pub fn from_position(x: i64, z: i64, tile_size: i64) -> Self {
        let tile = tile_size.max(1);
        Self {
            x: x.div_euclid(tile),
            z: z.div_euclid(tile),
        }
    }

    pub fn offset(self, (dx, dz): (i64, i64)) -> Self {
        Self {
            x: self.x + dx,
            z: self.z + dz,
        }
    }

    /// Parse the `sector` field of a lock payload
    pub fn from_payload(payload: &Payload) -> Option<Self> {
        serde_json::from_value(payload.get("sector")?.clone()).ok()
    }

    /// `{sector: [x, z], seq}`
    fn to_payload(self, seq: u64) -> Payload {
        let mut payload = Payload::new();
        payload.insert("sector".into(), json!([self.x, self.z]));
        payload.insert("seq".into(), json!(seq));
        payload
    }
}

impl From<(i64, i64)> for Sector {
    fn from((x, z): (i64, i64)) -> Self {
        Self { x, z }
    }
}

impl From<Sector> for (i64, i64) {
    fn from(sector: Sector) -> Self {
        (sector.x, sector.z)
    }
}

impl fmt::Display for Sector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.z)
    }
}

/// Lock tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockPolicy {
    pub tile_size: i64,

    /// Shift applied to the preferred sector when it is claimed
    pub alternate_offset: (i64, i64),
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            tile_size: DEFAULT_TILE_SIZE,
            alternate_offset: (1, 0),
        }
    }
}

#[derive(Default)]
struct LockSets {
    /// Sector -> generation of the claim that owns it
    locally_owned: HashMap<Sector, u64>,
    /// Sector -> owners currently believed to hold it
    globally_observed: HashMap<Sector, HashSet<String>>,
    /// Last `seq` applied per (owner, sector); kept after a release
    last_seen: HashMap<(String, Sector), u64>,
}

impl LockSets {
    fn is_claimed(&self, sector: &Sector) -> bool {
        self.locally_owned.contains_key(sector)
            || self
                .globally_observed
                .get(sector)
                .is_some_and(|holders| !holders.is_empty())
    }

    /// Record `seq` for (owner, sector) unless a newer event is already known
    ///
    /// Acquires need a strictly newer `seq`; a release may share the `seq` of
    /// the acquire it ends.
    fn advance(&mut self, owner: &str, sector: Sector, seq: Option<u64>, is_release: bool) -> bool {
        let Some(seq) = seq else {
            return true;
        };
        let key = (owner.to_string(), sector);
        match self.last_seen.get(&key) {
            Some(&last) if seq < last || (seq == last && !is_release) => false,
            _ => {
                self.last_seen.insert(key, seq);
                true
            }
        }
    }
}

/// First generation of a new registry
///
/// Taken from the clock so a restarted owner keeps numbering above the claims
/// its previous incarnation announced.
fn initial_generation() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_micros())
        .unwrap_or(0)
        .max(1)
}

/// Per-actor view of sector claims
pub struct SectorLockRegistry {
    owner: String,
    bus: Arc<MessageBus>,
    policy: LockPolicy,
    sets: Mutex<LockSets>,
    next_generation: AtomicU64,
}

impl SectorLockRegistry {
    pub fn new(owner: impl Into<String>, bus: Arc<MessageBus>, policy: LockPolicy) -> Arc<Self> {
        Arc::new(Self {
            owner: owner.into(),
            bus,
            policy,
            sets: Mutex::new(LockSets::default()),
            next_generation: AtomicU64::new(initial_generation()),
        })
    }

    /// Subscribe to other actors' lock broadcasts
    pub fn install(self: &Arc<Self>) -> Vec<SubscriptionId> {
        [topics::LOCK_ACQUIRE, topics::LOCK_RELEASE]
            .into_iter()
            .map(|topic| {
                let registry: Weak<Self> = Arc::downgrade(self);
                self.bus.subscribe(topic, move |msg| {
                    let registry = registry.clone();
                    async move {
                        if let Some(registry) = registry.upgrade() {
                            registry.observe(&msg);
                        }
                        Ok(())
                    }
                })
            })
            .collect()
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn policy(&self) -> &LockPolicy {
        &self.policy
    }

    /// Sector containing a world position under this registry's tile size
    pub fn sector_at(&self, x: i64, z: i64) -> Sector {
        Sector::from_position(x, z, self.policy.tile_size)
    }

    /// Claim `sector` if neither we nor anyone we have heard from holds it
    pub fn try_acquire(self: &Arc<Self>, sector: Sector) -> Result<SectorGuard, LockError> {
        let mut sets = self.sets.lock();

        if sets.is_claimed(&sector) {
            debug!(actor = %self.owner, %sector, "Sector claimed, refusing");
            record_lock_conflict(&self.owner);
            return Err(LockError::Conflict(sector));
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        self.bus.publish(
            Message::broadcast(topics::LOCK_ACQUIRE, self.owner.as_str())
                .with_payload(sector.to_payload(generation)),
        )?;

        sets.locally_owned.insert(sector, generation);
        drop(sets);

        info!(actor = %self.owner, %sector, seq = generation, "Sector lock acquired");
        record_lock_acquired(&self.owner);

        Ok(SectorGuard {
            registry: Arc::clone(self),
            sector,
            generation,
        })
    }

    /// Claim `preferred`, or its neighbour at the alternate offset
    pub fn acquire(self: &Arc<Self>, preferred: Sector) -> Result<SectorGuard, LockError> {
        match self.try_acquire(preferred) {
            Err(LockError::Conflict(_)) => {
                let alternate = preferred.offset(self.policy.alternate_offset);
                debug!(actor = %self.owner, %preferred, %alternate, "Shifting to alternate sector");
                match self.try_acquire(alternate) {
                    Err(LockError::Conflict(_)) => Err(LockError::Exhausted {
                        preferred,
                        alternate,
                    }),
                    other => other,
                }
            }
            other => other,
        }
    }

    /// Release a locally owned sector; returns whether we held it
    pub fn release(&self, sector: Sector) -> bool {
        let Some(generation) = self.sets.lock().locally_owned.remove(&sector) else {
            return false;
        };
        self.broadcast_release(sector, generation);
        info!(actor = %self.owner, %sector, "Sector lock released");
        record_lock_released(&self.owner, 1);
        true
    }

    /// Release only if the claim is still the one identified by `generation`
    fn release_generation(&self, sector: Sector, generation: u64) -> bool {
        let mut sets = self.sets.lock();
        if sets.locally_owned.get(&sector) != Some(&generation) {
            return false;
        }
        sets.locally_owned.remove(&sector);
        drop(sets);

        self.broadcast_release(sector, generation);
        debug!(actor = %self.owner, %sector, "Sector lock released by guard");
        record_lock_released(&self.owner, 1);
        true
    }

    /// Release every locally owned sector
    pub fn release_all(&self, reason: &str) -> Vec<Sector> {
        let mut drained: Vec<(Sector, u64)> = self.sets.lock().locally_owned.drain().collect();
        drained.sort();

        for (sector, generation) in &drained {
            self.broadcast_release(*sector, *generation);
        }
        let released: Vec<Sector> = drained.into_iter().map(|(sector, _)| sector).collect();

        if !released.is_empty() {
            warn!(
                actor = %self.owner,
                count = released.len(),
                reason,
                "Force-released sector locks"
            );
            record_lock_released(&self.owner, released.len());
        }
        released
    }

    /// Apply a lock broadcast from another actor
    ///
    /// Returns false for our own broadcasts, unrelated or malformed messages
    /// and events older than what was already applied for that owner and
    /// sector. Broadcasts without a `seq` are applied as they arrive.
    pub fn observe(&self, message: &Message) -> bool {
        if message.source() == self.owner {
            return false;
        }

        let Some(sector) = Sector::from_payload(message.payload()) else {
            warn!(
                actor = %self.owner,
                topic = message.kind(),
                source = message.source(),
                "Lock broadcast without a valid sector"
            );
            return false;
        };

        let is_release = match message.kind() {
            topics::LOCK_ACQUIRE => false,
            topics::LOCK_RELEASE => true,
            _ => return false,
        };
        let seq = message.payload().get("seq").and_then(Value::as_u64);
        let source = message.source();

        let mut sets = self.sets.lock();
        if !sets.advance(source, sector, seq, is_release) {
            debug!(actor = %self.owner, source, topic = message.kind(), %sector, ?seq, "Stale lock broadcast dropped");
            return false;
        }

        if is_release {
            if let Some(holders) = sets.globally_observed.get_mut(&sector) {
                holders.remove(source);
                if holders.is_empty() {
                    sets.globally_observed.remove(&sector);
                }
            }
        } else {
            sets.globally_observed
                .entry(sector)
                .or_default()
                .insert(source.to_string());
        }
        debug!(actor = %self.owner, source, topic = message.kind(), %sector, ?seq, "Observed lock broadcast");
        true
    }

    pub fn is_locally_owned(&self, sector: Sector) -> bool {
        self.sets.lock().locally_owned.contains_key(&sector)
    }

    pub fn is_observed(&self, sector: Sector) -> bool {
        self.sets
            .lock()
            .globally_observed
            .get(&sector)
            .is_some_and(|holders| !holders.is_empty())
    }

    /// Sectors other actors are believed to hold
    pub fn observed(&self) -> Vec<Sector> {
        let mut observed: Vec<Sector> = self.sets.lock().globally_observed.keys().copied().collect();
        observed.sort();
        observed
    }

    pub fn owned(&self) -> Vec<Sector> {
        let mut owned: Vec<Sector> = self.sets.lock().locally_owned.keys().copied().collect();
        owned.sort();
        owned
    }

    fn broadcast_release(&self, sector: Sector, generation: u64) {
        let notice = Message::broadcast(topics::LOCK_RELEASE, self.owner.as_str())
            .with_payload(sector.to_payload(generation));
        if let Err(e) = self.bus.publish(notice) {
            warn!(actor = %self.owner, %sector, error = %e, "Failed to broadcast lock release");
        }
    }
}

/// Held sector claim, released on drop
#[must_use = "dropping the guard releases the sector"]
pub struct SectorGuard {
    registry: Arc<SectorLockRegistry>,
    sector: Sector,
    generation: u64,
}

impl SectorGuard {
    pub fn sector(&self) -> Sector {
        self.sector
    }

    /// Release now instead of at end of scope
    pub fn release(self) {}
}

impl fmt::Debug for SectorGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SectorGuard")
            .field("owner", &self.registry.owner)
            .field("sector", &self.sector)
            .finish()
    }
}

impl Drop for SectorGuard {
    fn drop(&mut self) {
        // A force release may already have taken the sector back
        self.registry.release_generation(self.sector, self.generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusConfig;
    use std::time::Duration;

    fn pair() -> (Arc<MessageBus>, Arc<SectorLockRegistry>, Arc<SectorLockRegistry>) {
        let bus = Arc::new(MessageBus::new(BusConfig::default()).unwrap());
        let a = SectorLockRegistry::new("miner_a", bus.clone(), LockPolicy::default());
        let b = SectorLockRegistry::new("miner_b", bus.clone(), LockPolicy::default());
        a.install();
        b.install();
        (bus, a, b)
    }

    #[test]
    fn test_sector_from_position() {
        assert_eq!(Sector::from_position(0, 0, 16), Sector::new(0, 0));
        assert_eq!(Sector::from_position(15, 31, 16), Sector::new(0, 1));
        assert_eq!(Sector::from_position(-1, -16, 16), Sector::new(-1, -1));
        assert_eq!(Sector::from_position(-17, 16, 16), Sector::new(-2, 1));
    }

    #[test]
    fn test_sector_wire_format() {
        let json = serde_json::to_value(Sector::new(3, -2)).unwrap();
        assert_eq!(json, serde_json::json!([3, -2]));

        let back: Sector = serde_json::from_value(json).unwrap();
        assert_eq!(back, Sector::new(3, -2));
    }

    #[tokio::test]
    async fn test_lock_exclusivity() {
        let (bus, a, b) = pair();
        let sector = Sector::new(0, 0);

        let guard = a.try_acquire(sector).unwrap();
        assert!(a.is_locally_owned(sector));
        assert!(matches!(a.try_acquire(sector), Err(LockError::Conflict(_))));

        assert!(bus.wait_idle(Duration::from_secs(2)).await);
        assert!(b.is_observed(sector));
        assert!(!a.is_observed(sector), "own broadcasts are ignored");
        assert!(matches!(b.try_acquire(sector), Err(LockError::Conflict(_))));

        drop(guard);
        assert!(!a.is_locally_owned(sector));
        assert!(bus.wait_idle(Duration::from_secs(2)).await);
        assert!(!b.is_observed(sector));
        assert!(b.try_acquire(sector).is_ok());
    }

    #[tokio::test]
    async fn test_acquire_shifts_once() {
        let (bus, a, b) = pair();
        let preferred = Sector::new(4, 4);
        let alternate = preferred.offset(LockPolicy::default().alternate_offset);

        let _first = a.acquire(preferred).unwrap();
        assert!(bus.wait_idle(Duration::from_secs(2)).await);

        let shifted = b.acquire(preferred).unwrap();
        assert_eq!(shifted.sector(), alternate);
        assert!(bus.wait_idle(Duration::from_secs(2)).await);

        let _other = a.acquire(alternate.offset((0, 5))).unwrap();
        let err = a.acquire(preferred).unwrap_err();
        assert!(matches!(err, LockError::Exhausted { .. }));
    }

    #[tokio::test]
    async fn test_release_all_and_stale_guard() {
        let (bus, a, b) = pair();
        let guard = a.try_acquire(Sector::new(1, 1)).unwrap();
        let _other = a.try_acquire(Sector::new(2, 2)).unwrap();
        assert!(bus.wait_idle(Duration::from_secs(2)).await);

        let released = a.release_all("stopped");
        assert_eq!(released, vec![Sector::new(1, 1), Sector::new(2, 2)]);
        assert!(a.owned().is_empty());

        // Reclaim, then drop the stale guard: the new claim must survive
        let fresh = a.try_acquire(Sector::new(1, 1)).unwrap();
        drop(guard);
        assert!(a.is_locally_owned(Sector::new(1, 1)));
        drop(fresh);

        assert!(bus.wait_idle(Duration::from_secs(2)).await);
        assert!(!b.is_observed(Sector::new(2, 2)));
    }

    #[tokio::test]
    async fn test_observe_ignores_malformed() {
        let (_bus, a, _b) = pair();
        let msg = Message::broadcast(topics::LOCK_ACQUIRE, "stranger");
        assert!(!a.observe(&msg));
    }

    fn broadcast(kind: &str, source: &str, sector: Sector, seq: u64) -> Message {
        Message::broadcast(kind, source).with_payload(sector.to_payload(seq))
    }

    #[tokio::test]
    async fn test_broadcasts_carry_claim_seq() {
        let bus = Arc::new(MessageBus::new(BusConfig::default()).unwrap());
        let a = SectorLockRegistry::new("miner_a", bus.clone(), LockPolicy::default());

        let first = a.try_acquire(Sector::new(0, 0)).unwrap();
        let second = a.try_acquire(Sector::new(0, 1)).unwrap();
        drop(first);
        drop(second);

        let seq = |msg: &Arc<Message>| msg.payload()["seq"].as_u64().unwrap();
        let acquired = bus.history_of(topics::LOCK_ACQUIRE);
        let released = bus.history_of(topics::LOCK_RELEASE);
        assert!(seq(&acquired[0]) < seq(&acquired[1]));
        assert_eq!(seq(&released[0]), seq(&acquired[0]));
        assert_eq!(seq(&released[1]), seq(&acquired[1]));
    }

    #[tokio::test]
    async fn test_release_before_acquire_leaves_sector_free() {
        let (_bus, a, _b) = pair();
        let sector = Sector::new(7, -3);

        // Delivered out of order: the release overtakes its acquire
        assert!(a.observe(&broadcast(topics::LOCK_RELEASE, "miner_b", sector, 10)));
        assert!(!a.observe(&broadcast(topics::LOCK_ACQUIRE, "miner_b", sector, 10)));
        assert!(!a.is_observed(sector));
        assert!(a.try_acquire(sector).is_ok());
    }

    #[tokio::test]
    async fn test_stale_broadcasts_are_dropped() {
        let (_bus, a, _b) = pair();
        let sector = Sector::new(1, 2);

        assert!(a.observe(&broadcast(topics::LOCK_ACQUIRE, "miner_b", sector, 20)));
        // An older claim's release must not free the newer claim
        assert!(!a.observe(&broadcast(topics::LOCK_RELEASE, "miner_b", sector, 19)));
        assert!(a.is_observed(sector));

        // Another owner's release leaves miner_b's claim alone
        assert!(a.observe(&broadcast(topics::LOCK_ACQUIRE, "miner_c", sector, 1)));
        assert!(a.observe(&broadcast(topics::LOCK_RELEASE, "miner_c", sector, 1)));
        assert!(a.is_observed(sector));

        assert!(a.observe(&broadcast(topics::LOCK_RELEASE, "miner_b", sector, 20)));
        assert!(!a.is_observed(sector));

        // Replayed acquire from before the release
        assert!(!a.observe(&broadcast(topics::LOCK_ACQUIRE, "miner_b", sector, 20)));
        assert!(a.observed().is_empty());
    }

    #[tokio::test]
    async fn test_unsequenced_broadcasts_apply_in_arrival_order() {
        let (_bus, a, _b) = pair();
        let payload = |x| {
            let mut payload = Payload::new();
            payload.insert("sector".into(), json!([x, 0]));
            payload
        };

        assert!(a.observe(&Message::broadcast(topics::LOCK_ACQUIRE, "legacy").with_payload(payload(3))));
        assert!(a.is_observed(Sector::new(3, 0)));
        assert!(a.observe(&Message::broadcast(topics::LOCK_RELEASE, "legacy").with_payload(payload(3))));
        assert!(!a.is_observed(Sector::new(3, 0)));
    }

    #[tokio::test]
    async fn test_restarted_owner_supersedes_old_release() {
        let (bus, a, _b) = pair();
        let sector = Sector::new(5, 5);

        let old = SectorLockRegistry::new("miner_c", bus.clone(), LockPolicy::default());
        let old_guard = old.try_acquire(sector).unwrap();
        assert!(bus.wait_idle(Duration::from_secs(2)).await);
        let old_release = broadcast(topics::LOCK_RELEASE, "miner_c", sector, old_guard.generation);
        std::mem::forget(old_guard);

        tokio::time::sleep(Duration::from_millis(2)).await;
        let restarted = SectorLockRegistry::new("miner_c", bus.clone(), LockPolicy::default());
        let _claim = restarted.try_acquire(sector).unwrap();
        assert!(bus.wait_idle(Duration::from_secs(2)).await);
        assert!(a.is_observed(sector));

        // The previous incarnation's release shows up late
        assert!(!a.observe(&old_release));
        assert!(a.is_observed(sector));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_churn_leaves_no_stale_observations() {
        let (bus, a, b) = pair();

        for x in 0..500 {
            let guard = a.try_acquire(Sector::new(x, 0)).unwrap();
            drop(guard);
        }
        assert!(bus.wait_idle(Duration::from_secs(10)).await);

        assert!(a.owned().is_empty());
        assert!(b.observed().is_empty(), "stale sectors: {:?}", b.observed());
        assert!(b.try_acquire(Sector::new(250, 0)).is_ok());
    }
}
