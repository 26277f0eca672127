use crate::topology::TopologyDescription;

/// How runtime threads relate to flattened partitions.
///
/// Under `Dedicated` placement every runtime thread serves exactly one
/// partition, so the thread-local current-partition binding is set and
/// partition lookup by current thread is allowed. Under `Shared`
/// placement threads may serve multiple partitions and the binding is
/// intentionally left unset, forcing callers to route work to an
/// explicit partition id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementPolicy {
    Dedicated,
    Shared,
}

/// Options controlling runtime construction.
///
/// These are plain data: option parsing lives outside this crate.
#[derive(Debug, Clone)]
pub struct SystemOptions {
    placement: PlacementPolicy,
    enable_network: bool,
    topology: TopologyDescription,
}

impl Default for SystemOptions {
    fn default() -> Self {
        Self {
            placement: PlacementPolicy::Dedicated,
            enable_network: false,
            topology: TopologyDescription::detect(),
        }
    }
}

impl SystemOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_placement(mut self, placement: PlacementPolicy) -> Self {
        self.placement = placement;
        self
    }

    /// Enables the networked execution path: transport resources are
    /// built for every partition and host memory registration is wired
    /// through them.
    pub fn with_network(mut self, enabled: bool) -> Self {
        self.enable_network = enabled;
        self
    }

    pub fn with_topology(mut self, topology: TopologyDescription) -> Self {
        self.topology = topology;
        self
    }

    pub fn placement(&self) -> PlacementPolicy {
        self.placement
    }

    pub fn network_enabled(&self) -> bool {
        self.enable_network
    }

    pub fn topology(&self) -> &TopologyDescription {
        &self.topology
    }
}
