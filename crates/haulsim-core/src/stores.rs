//! Reference stockpile and construction storage.
//!
//! These implement the provider traits from `haulsim_logic::providers` so
//! the engine, the harness and tests have something concrete to haul
//! between. A host game would normally supply its own.

use std::collections::BTreeMap;

use log::debug;
use serde::{Deserialize, Serialize};

use haulsim_logic::cell::Cell;
use haulsim_logic::ids::{AgentId, BlockKey, SiteId, SlotKey, StockpileId};
use haulsim_logic::providers::{
    ConstructionProvider, MaterialNeed, ResourceSource, SiteSummary, StockpileProvider,
};

// ── Stockpiles ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub agent: AgentId,
    pub quantity: u32,
}

/// One slot holding a single resource type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockSlot {
    pub key: SlotKey,
    pub position: Cell,
    pub resource: u8,
    pub quantity: u32,
    reservations: Vec<Reservation>,
}

impl StockSlot {
    pub fn reserved(&self) -> u32 {
        self.reservations.iter().map(|r| r.quantity).sum()
    }

    /// Units not promised to anyone.
    pub fn available(&self) -> u32 {
        self.quantity.saturating_sub(self.reserved())
    }

    pub fn reservations(&self) -> &[Reservation] {
        &self.reservations
    }

    fn take_reservation(&mut self, agent: AgentId) -> Option<Reservation> {
        let idx = self.reservations.iter().position(|r| r.agent == agent)?;
        Some(self.reservations.remove(idx))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stockpile {
    pub id: StockpileId,
    pub slots: Vec<StockSlot>,
}

/// How every reservation ended. `reserved == released + consumed +
/// outstanding` must always hold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationLedger {
    pub reserved: u64,
    pub released: u64,
    pub consumed: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stockpiles {
    piles: BTreeMap<StockpileId, Stockpile>,
    ledger: ReservationLedger,
}

impl Stockpiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_stockpile(&mut self, id: StockpileId) -> bool {
        if self.piles.contains_key(&id) {
            return false;
        }
        self.piles.insert(
            id,
            Stockpile {
                id,
                slots: Vec::new(),
            },
        );
        true
    }

    /// Add a slot to an existing stockpile. False if the stockpile is
    /// unknown or the key is taken.
    pub fn add_slot(
        &mut self,
        stockpile: StockpileId,
        key: SlotKey,
        position: Cell,
        resource: u8,
        quantity: u32,
    ) -> bool {
        let Some(pile) = self.piles.get_mut(&stockpile) else {
            return false;
        };
        if pile.slots.iter().any(|s| s.key == key) {
            return false;
        }
        pile.slots.push(StockSlot {
            key,
            position,
            resource,
            quantity,
            reservations: Vec::new(),
        });
        true
    }

    pub fn deposit(&mut self, stockpile: StockpileId, key: SlotKey, quantity: u32) -> bool {
        match self.slot_mut(stockpile, key) {
            Some(slot) => {
                slot.quantity += quantity;
                true
            }
            None => false,
        }
    }

    /// Remove stock regardless of reservations, as another consumer
    /// would. Returns how much was removed.
    pub fn withdraw(&mut self, stockpile: StockpileId, key: SlotKey, quantity: u32) -> u32 {
        let Some(slot) = self.slot_mut(stockpile, key) else {
            return 0;
        };
        let taken = quantity.min(slot.quantity);
        slot.quantity -= taken;
        taken
    }

    pub fn stockpile(&self, id: StockpileId) -> Option<&Stockpile> {
        self.piles.get(&id)
    }

    pub fn stockpiles(&self) -> impl Iterator<Item = &Stockpile> {
        self.piles.values()
    }

    pub fn slot(&self, stockpile: StockpileId, key: SlotKey) -> Option<&StockSlot> {
        self.piles.get(&stockpile)?.slots.iter().find(|s| s.key == key)
    }

    fn slot_mut(&mut self, stockpile: StockpileId, key: SlotKey) -> Option<&mut StockSlot> {
        self.piles
            .get_mut(&stockpile)?
            .slots
            .iter_mut()
            .find(|s| s.key == key)
    }

    /// Total stock of `resource` across all slots.
    pub fn total(&self, resource: u8) -> u32 {
        self.slots()
            .filter(|s| s.resource == resource)
            .map(|s| s.quantity)
            .sum()
    }

    pub fn outstanding_reservations(&self) -> usize {
        self.slots().map(|s| s.reservations.len()).sum()
    }

    pub fn reservations_held_by(&self, agent: AgentId) -> usize {
        self.slots()
            .flat_map(|s| s.reservations.iter())
            .filter(|r| r.agent == agent)
            .count()
    }

    pub fn ledger(&self) -> ReservationLedger {
        self.ledger
    }

    /// Check the ledger against the reservations actually held.
    pub fn ledger_balanced(&self) -> bool {
        let l = self.ledger;
        l.reserved == l.released + l.consumed + self.outstanding_reservations() as u64
    }

    fn slots(&self) -> impl Iterator<Item = &StockSlot> {
        self.piles.values().flat_map(|p| p.slots.iter())
    }
}

impl StockpileProvider for Stockpiles {
    fn find_nearest_resource(
        &self,
        resource: u8,
        origin: Cell,
        quantity: u32,
    ) -> Option<ResourceSource> {
        let mut best: Option<(ResourceSource, i64)> = None;
        for pile in self.piles.values() {
            for slot in &pile.slots {
                if slot.resource != resource || slot.available() < quantity {
                    continue;
                }
                let dist = slot.position.distance_squared(&origin);
                if best.map_or(true, |(_, d)| dist < d) {
                    best = Some((
                        ResourceSource {
                            stockpile_id: pile.id,
                            slot: slot.key,
                            position: slot.position,
                        },
                        dist,
                    ));
                }
            }
        }
        best.map(|(source, _)| source)
    }

    fn reserve_for_pickup(
        &mut self,
        source: &ResourceSource,
        resource: u8,
        agent: AgentId,
        quantity: u32,
    ) -> bool {
        let Some(slot) = self.slot_mut(source.stockpile_id, source.slot) else {
            return false;
        };
        if slot.resource != resource
            || slot.available() < quantity
            || slot.reservations.iter().any(|r| r.agent == agent)
        {
            return false;
        }
        slot.reservations.push(Reservation { agent, quantity });
        self.ledger.reserved += 1;
        true
    }

    fn release_reservation(&mut self, source: &ResourceSource, agent: AgentId) -> bool {
        let released = self
            .slot_mut(source.stockpile_id, source.slot)
            .and_then(|slot| slot.take_reservation(agent))
            .is_some();
        if released {
            self.ledger.released += 1;
        }
        released
    }

    fn take_reserved(
        &mut self,
        source: &ResourceSource,
        resource: u8,
        agent: AgentId,
        quantity: u32,
    ) -> u32 {
        let Some(slot) = self.slot_mut(source.stockpile_id, source.slot) else {
            return 0;
        };
        let Some(reservation) = slot.take_reservation(agent) else {
            return 0;
        };
        let taken = if slot.resource == resource {
            quantity.min(reservation.quantity).min(slot.quantity)
        } else {
            0
        };
        slot.quantity -= taken;
        self.ledger.consumed += 1;
        debug!(
            "{agent} took {taken} from {}/{}",
            source.stockpile_id, source.slot
        );
        taken
    }

    fn release_all_reservations(&mut self, agent: AgentId) -> usize {
        let mut released = 0;
        for pile in self.piles.values_mut() {
            for slot in &mut pile.slots {
                let before = slot.reservations.len();
                slot.reservations.retain(|r| r.agent != agent);
                released += before - slot.reservations.len();
            }
        }
        self.ledger.released += released as u64;
        released
    }
}

// ── Construction sites ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteBlock {
    pub key: BlockKey,
    pub position: Cell,
    pub resource: u8,
    pub required: u32,
    pub delivered: u32,
}

impl SiteBlock {
    pub fn remaining(&self) -> u32 {
        self.required.saturating_sub(self.delivered)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstructionSite {
    pub id: SiteId,
    /// 0-100
    pub priority: u8,
    pub open: bool,
    pub blocks: Vec<SiteBlock>,
}

impl ConstructionSite {
    pub fn is_complete(&self) -> bool {
        self.blocks.iter().all(|b| b.remaining() == 0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstructionSites {
    sites: BTreeMap<SiteId, ConstructionSite>,
}

impl ConstructionSites {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_site(&mut self, id: SiteId, priority: u8) -> bool {
        if self.sites.contains_key(&id) {
            return false;
        }
        self.sites.insert(
            id,
            ConstructionSite {
                id,
                priority: priority.min(100),
                open: true,
                blocks: Vec::new(),
            },
        );
        true
    }

    pub fn add_block(
        &mut self,
        site: SiteId,
        key: BlockKey,
        position: Cell,
        resource: u8,
        required: u32,
    ) -> bool {
        let Some(site) = self.sites.get_mut(&site) else {
            return false;
        };
        if site.blocks.iter().any(|b| b.key == key) {
            return false;
        }
        site.blocks.push(SiteBlock {
            key,
            position,
            resource,
            required,
            delivered: 0,
        });
        true
    }

    pub fn set_priority(&mut self, site: SiteId, priority: u8) -> bool {
        match self.sites.get_mut(&site) {
            Some(s) => {
                s.priority = priority.min(100);
                true
            }
            None => false,
        }
    }

    /// Stop accepting deliveries and stop reporting needs.
    pub fn close_site(&mut self, site: SiteId) -> bool {
        match self.sites.get_mut(&site) {
            Some(s) => {
                s.open = false;
                true
            }
            None => false,
        }
    }

    pub fn site(&self, id: SiteId) -> Option<&ConstructionSite> {
        self.sites.get(&id)
    }

    pub fn sites(&self) -> impl Iterator<Item = &ConstructionSite> {
        self.sites.values()
    }

    pub fn total_delivered(&self) -> u64 {
        self.sites
            .values()
            .flat_map(|s| s.blocks.iter())
            .map(|b| u64::from(b.delivered))
            .sum()
    }

    pub fn total_remaining(&self) -> u64 {
        self.sites
            .values()
            .filter(|s| s.open)
            .flat_map(|s| s.blocks.iter())
            .map(|b| u64::from(b.remaining()))
            .sum()
    }
}

impl ConstructionProvider for ConstructionSites {
    fn active_sites(&self) -> Vec<SiteSummary> {
        self.sites
            .values()
            .filter(|s| s.open && !s.is_complete())
            .map(|s| SiteSummary {
                site_id: s.id,
                priority: s.priority,
            })
            .collect()
    }

    fn material_needs(&self, site: SiteId) -> Vec<MaterialNeed> {
        let Some(site) = self.sites.get(&site).filter(|s| s.open) else {
            return Vec::new();
        };
        site.blocks
            .iter()
            .filter(|b| b.remaining() > 0)
            .map(|b| MaterialNeed {
                resource: b.resource,
                quantity: b.remaining(),
                position: b.position,
                block: b.key,
            })
            .collect()
    }

    fn deliver(&mut self, site: SiteId, block: BlockKey, resource: u8, quantity: u32) -> bool {
        let Some(site) = self.sites.get_mut(&site).filter(|s| s.open) else {
            return false;
        };
        let Some(block) = site.blocks.iter_mut().find(|b| b.key == block) else {
            return false;
        };
        if block.resource != resource || block.remaining() == 0 {
            return false;
        }
        block.delivered = (block.delivered + quantity).min(block.required);
        true
    }
}
