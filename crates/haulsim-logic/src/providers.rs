//! Interfaces to the systems hauling depends on but does not own.
//!
//! The work allocator reads construction needs, reserves and takes stock
//! from stockpiles, and looks up live agent positions. Each of those lives
//! behind a trait so the allocator can be driven by the reference stores in
//! `haulsim-core`, by test doubles, or by a host game's own storage.

use crate::cell::Cell;
use crate::ids::{AgentId, BlockKey, SiteId, SlotKey, StockpileId};
use serde::{Deserialize, Serialize};

/// Where a haul picks up its resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceSource {
    pub stockpile_id: StockpileId,
    pub slot: SlotKey,
    pub position: Cell,
}

/// Where a haul delivers its resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HaulDestination {
    pub site_id: SiteId,
    pub block: BlockKey,
    pub position: Cell,
}

/// One unmet material requirement of a construction site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialNeed {
    pub resource: u8,
    pub quantity: u32,
    pub position: Cell,
    pub block: BlockKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteSummary {
    pub site_id: SiteId,
    /// 0-100, bucketed into a [`crate::haul::TaskPriority`].
    pub priority: u8,
}

pub trait StockpileProvider {
    /// Closest slot holding at least `quantity` unreserved units of `resource`.
    fn find_nearest_resource(
        &self,
        resource: u8,
        origin: Cell,
        quantity: u32,
    ) -> Option<ResourceSource>;

    /// Hold `quantity` units at the source slot for `agent`.
    fn reserve_for_pickup(
        &mut self,
        source: &ResourceSource,
        resource: u8,
        agent: AgentId,
        quantity: u32,
    ) -> bool;

    /// Drop `agent`'s hold on the source slot without taking anything.
    fn release_reservation(&mut self, source: &ResourceSource, agent: AgentId) -> bool;

    /// Remove up to `quantity` reserved units from the slot, ending the
    /// reservation. Returns how many units were taken.
    fn take_reserved(
        &mut self,
        source: &ResourceSource,
        resource: u8,
        agent: AgentId,
        quantity: u32,
    ) -> u32;

    /// Drop every hold `agent` has anywhere. Returns how many were dropped.
    fn release_all_reservations(&mut self, agent: AgentId) -> usize;
}

pub trait ConstructionProvider {
    fn active_sites(&self) -> Vec<SiteSummary>;

    fn material_needs(&self, site: SiteId) -> Vec<MaterialNeed>;

    /// Units of `resource` that `block` still needs; 0 once the site is
    /// closed or the block is complete.
    fn remaining_need(&self, site: SiteId, block: BlockKey, resource: u8) -> u32 {
        self.material_needs(site)
            .into_iter()
            .filter(|n| n.block == block && n.resource == resource)
            .map(|n| n.quantity)
            .sum()
    }

    /// Hand `quantity` units to a block. False if the site or block no
    /// longer accepts them.
    fn deliver(&mut self, site: SiteId, block: BlockKey, resource: u8, quantity: u32) -> bool;
}

pub trait AgentLocator {
    fn agent_position(&self, agent: AgentId) -> Option<Cell>;
}

impl<F> AgentLocator for F
where
    F: Fn(AgentId) -> Option<Cell>,
{
    fn agent_position(&self, agent: AgentId) -> Option<Cell> {
        self(agent)
    }
}
