//! Allocation selection with claim-then-confirm reservations.
//!
//! Selecting an allocation only reserves it in process. The creation flow
//! confirms the claim once the panel has created the server, or releases it
//! so the address returns to the free pool.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use crate::error::{ControlError, ControlResult};
use crate::panel::{with_timeout, ProvisioningClient};
use crate::types::{Allocation, Game, Node, NodeId};

/// An allocation reserved for one creation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationClaim {
    /// Node owning the allocation.
    pub node_id: NodeId,
    /// The reserved address.
    pub allocation: Allocation,
}

/// Picks free network allocations for new servers.
#[async_trait]
pub trait AllocationSelector: Send + Sync {
    /// Reserve a free allocation of `node` suitable for `game`.
    async fn select(&self, node: &Node, game: &Game) -> ControlResult<AllocationClaim>;

    /// Mark a claim as consumed by a created server.
    fn confirm(&self, claim: &AllocationClaim);

    /// Return a claim to the free pool.
    fn release(&self, claim: &AllocationClaim);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reservation {
    Tentative,
    Confirmed,
}

/// Selects allocations from the panel's free list.
///
/// Confirmed claims stay reserved until the panel's free list no longer
/// reports them, so a list fetched before the panel assigned the address
/// cannot hand it out again.
pub struct PanelAllocationSelector {
    panel: Arc<dyn ProvisioningClient>,
    timeout: Duration,
    reserved: DashMap<NodeId, HashMap<u64, Reservation>>,
}

impl PanelAllocationSelector {
    /// Create a selector backed by the given panel.
    pub fn new(panel: Arc<dyn ProvisioningClient>, timeout: Duration) -> Self {
        Self {
            panel,
            timeout,
            reserved: DashMap::new(),
        }
    }

    /// Returns true if the allocation is reserved or consumed.
    #[must_use]
    pub fn is_reserved(&self, node_id: &NodeId, allocation_id: u64) -> bool {
        self.reserved
            .get(node_id)
            .is_some_and(|r| r.contains_key(&allocation_id))
    }
}

#[async_trait]
impl AllocationSelector for PanelAllocationSelector {
    async fn select(&self, node: &Node, game: &Game) -> ControlResult<AllocationClaim> {
        let free = with_timeout(self.timeout, self.panel.list_allocations(node)).await?;
        let listed: HashSet<u64> = free.iter().map(|a| a.id).collect();

        let mut candidates: Vec<Allocation> = free
            .into_iter()
            .filter(|a| game.port_range.map_or(true, |range| range.contains(a.port)))
            .collect();
        candidates.sort_by(|a, b| (a.port, a.id).cmp(&(b.port, b.id)));

        let mut reserved = self.reserved.entry(node.id.clone()).or_default();
        // Once the panel stops listing a confirmed allocation it guards it itself.
        reserved.retain(|id, r| *r == Reservation::Tentative || listed.contains(id));
        let allocation = candidates
            .into_iter()
            .find(|a| !reserved.contains_key(&a.id))
            .ok_or_else(|| ControlError::AllocationExhausted {
                node: node.id.clone(),
            })?;

        reserved.insert(allocation.id, Reservation::Tentative);
        drop(reserved);

        debug!(node = %node.id, allocation = %allocation, "allocation reserved");

        Ok(AllocationClaim {
            node_id: node.id.clone(),
            allocation,
        })
    }

    fn confirm(&self, claim: &AllocationClaim) {
        if let Some(mut reserved) = self.reserved.get_mut(&claim.node_id) {
            reserved.insert(claim.allocation.id, Reservation::Confirmed);
        }
    }

    fn release(&self, claim: &AllocationClaim) {
        if let Some(mut reserved) = self.reserved.get_mut(&claim.node_id) {
            if reserved.get(&claim.allocation.id) == Some(&Reservation::Tentative) {
                reserved.remove(&claim.allocation.id);
                debug!(node = %claim.node_id, allocation = %claim.allocation, "allocation released");
            }
        }
    }
}

impl std::fmt::Debug for PanelAllocationSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PanelAllocationSelector")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
