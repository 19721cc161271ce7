//! In-memory panel for tests and local runs.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{ControlError, ControlResult};
use crate::types::{Allocation, Node, ServerResource};

use super::{BuildSpec, PowerSignal, ProvisioningClient, RemoteStatus, ServerSpec};

#[derive(Debug, Clone)]
struct MockAllocation {
    allocation: Allocation,
    assigned: bool,
}

/// Mock panel that records every call.
///
/// Created servers start uninstalled; tests flip them with
/// [`MockPanel::set_installed`].
#[derive(Debug)]
pub struct MockPanel {
    allocations: RwLock<HashMap<u64, Vec<MockAllocation>>>,
    statuses: RwLock<HashMap<u64, RemoteStatus>>,
    builds: RwLock<HashMap<u64, BuildSpec>>,
    powered: RwLock<Vec<(String, PowerSignal)>>,
    scripted: RwLock<VecDeque<Option<ServerResource>>>,
    next_id: AtomicU64,
    latency: RwLock<Option<Duration>>,
    fail_status: AtomicBool,
    fail_power: AtomicBool,
    create_calls: AtomicUsize,
    status_calls: AtomicUsize,
    list_calls: AtomicUsize,
    update_calls: AtomicUsize,
}

impl Default for MockPanel {
    fn default() -> Self {
        Self {
            allocations: RwLock::default(),
            statuses: RwLock::default(),
            builds: RwLock::default(),
            powered: RwLock::default(),
            scripted: RwLock::default(),
            next_id: AtomicU64::new(1),
            latency: RwLock::default(),
            fail_status: AtomicBool::new(false),
            fail_power: AtomicBool::new(false),
            create_calls: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
            update_calls: AtomicUsize::new(0),
        }
    }
}

impl MockPanel {
    /// Create an empty mock panel.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add free allocations to a panel node.
    pub fn add_allocations(&self, panel_node_id: u64, allocations: Vec<Allocation>) {
        if let Ok(mut nodes) = self.allocations.write() {
            nodes.entry(panel_node_id).or_default().extend(
                allocations.into_iter().map(|allocation| MockAllocation {
                    allocation,
                    assigned: false,
                }),
            );
        }
    }

    /// Queue the response of the next `create_server` call.
    ///
    /// `None` makes the panel answer without a resource.
    pub fn script_create(&self, response: Option<ServerResource>) {
        if let Ok(mut scripted) = self.scripted.write() {
            scripted.push_back(response);
        }
    }

    /// Set the installed flag of a server.
    pub fn set_installed(&self, panel_id: u64, installed: bool) {
        if let Ok(mut statuses) = self.statuses.write() {
            statuses.entry(panel_id).or_default().installed = installed;
        }
    }

    /// Set the suspended flag of a server.
    pub fn set_suspended(&self, panel_id: u64, suspended: bool) {
        if let Ok(mut statuses) = self.statuses.write() {
            statuses.entry(panel_id).or_default().suspended = suspended;
        }
    }

    /// Make `create_server` and `server_status` sleep before answering.
    pub fn set_latency(&self, latency: Option<Duration>) {
        if let Ok(mut slot) = self.latency.write() {
            *slot = latency;
        }
    }

    /// Make `power` fail with a panel error.
    pub fn set_power_failing(&self, failing: bool) {
        self.fail_power.store(failing, Ordering::SeqCst);
    }

    /// Mark an allocation as assigned, as if another server took it.
    pub fn assign_allocation(&self, allocation_id: u64) {
        if let Ok(mut nodes) = self.allocations.write() {
            for slot in nodes.values_mut().flatten() {
                if slot.allocation.id == allocation_id {
                    slot.assigned = true;
                }
            }
        }
    }

    /// Make `server_status` fail with a panel error.
    pub fn set_status_failing(&self, failing: bool) {
        self.fail_status.store(failing, Ordering::SeqCst);
    }

    /// Returns true if the allocation has been assigned to a server.
    #[must_use]
    pub fn is_assigned(&self, allocation_id: u64) -> bool {
        self.allocations.read().is_ok_and(|nodes| {
            nodes
                .values()
                .flatten()
                .any(|a| a.allocation.id == allocation_id && a.assigned)
        })
    }

    /// Last build pushed for a server.
    #[must_use]
    pub fn build_of(&self, panel_id: u64) -> Option<BuildSpec> {
        self.builds
            .read()
            .ok()
            .and_then(|builds| builds.get(&panel_id).copied())
    }

    /// Power signals sent so far.
    #[must_use]
    pub fn power_signals(&self) -> Vec<(String, PowerSignal)> {
        self.powered
            .read()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    /// Number of `create_server` calls.
    #[must_use]
    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    /// Number of `server_status` calls.
    #[must_use]
    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    /// Number of `list_allocations` calls.
    #[must_use]
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Number of `update_build` calls.
    #[must_use]
    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    async fn simulate_latency(&self) {
        let latency = self.latency.read().ok().and_then(|l| *l);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl ProvisioningClient for MockPanel {
    async fn create_server(&self, spec: &ServerSpec) -> ControlResult<Option<ServerResource>> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        let scripted = self
            .scripted
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?
            .pop_front();

        let resource = match scripted {
            Some(response) => response,
            None => {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                Some(ServerResource {
                    id,
                    identifier: format!("{id:08x}"),
                })
            }
        };

        let Some(resource) = resource else {
            return Ok(None);
        };

        {
            let mut nodes = self
                .allocations
                .write()
                .map_err(|_| ControlError::internal("lock poisoned"))?;
            if let Some(slot) = nodes
                .values_mut()
                .flatten()
                .find(|a| a.allocation.id == spec.allocation.default)
            {
                slot.assigned = true;
            }
        }

        self.statuses
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?
            .entry(resource.id)
            .or_default();

        Ok(Some(resource))
    }

    async fn server_status(&self, panel_id: u64) -> ControlResult<RemoteStatus> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        if self.fail_status.load(Ordering::SeqCst) {
            return Err(ControlError::panel("get server failed: 502 Bad Gateway"));
        }

        let statuses = self
            .statuses
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        statuses
            .get(&panel_id)
            .copied()
            .ok_or_else(|| ControlError::panel(format!("get server failed: 404 {panel_id}")))
    }

    async fn list_allocations(&self, node: &Node) -> ControlResult<Vec<Allocation>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);

        let nodes = self
            .allocations
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        Ok(nodes
            .get(&node.panel_node_id)
            .map(|allocations| {
                allocations
                    .iter()
                    .filter(|a| !a.assigned)
                    .map(|a| a.allocation.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn update_build(&self, panel_id: u64, build: &BuildSpec) -> ControlResult<()> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);

        let mut builds = self
            .builds
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;
        builds.insert(panel_id, *build);
        Ok(())
    }

    async fn power(&self, identifier: &str, signal: PowerSignal) -> ControlResult<()> {
        if self.fail_power.load(Ordering::SeqCst) {
            return Err(ControlError::panel("power failed: 502 Bad Gateway"));
        }

        let mut powered = self
            .powered
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;
        powered.push((identifier.to_owned(), signal));
        Ok(())
    }
}
