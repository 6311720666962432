//! Device conditions: connectivity and battery.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Current network connectivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NetworkState {
    /// No connectivity.
    Offline,
    /// Connected over a metered link (cellular).
    Metered,
    /// Connected over an unmetered link (Wi-Fi).
    Unmetered,
}

/// Snapshot of the conditions scheduled work depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConditions {
    /// Network state.
    pub network: NetworkState,
    /// True when the battery is low.
    pub battery_low: bool,
}

impl DeviceConditions {
    /// Unmetered network, healthy battery.
    pub fn online() -> Self {
        Self {
            network: NetworkState::Unmetered,
            battery_low: false,
        }
    }

    /// Metered network, healthy battery.
    pub fn metered() -> Self {
        Self {
            network: NetworkState::Metered,
            battery_low: false,
        }
    }

    /// No network.
    pub fn offline() -> Self {
        Self {
            network: NetworkState::Offline,
            battery_low: false,
        }
    }

    /// Returns a copy with the battery marked low.
    #[must_use]
    pub fn with_low_battery(mut self) -> Self {
        self.battery_low = true;
        self
    }

    /// Returns true if any network is available.
    pub fn is_online(&self) -> bool {
        self.network != NetworkState::Offline
    }
}

/// Network a unit of work needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NetworkRequirement {
    /// Any connected network.
    Connected,
    /// Unmetered network only.
    Unmetered,
}

/// Execution preconditions for scheduled work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Constraints {
    /// Required network.
    pub network: NetworkRequirement,
    /// Requires the battery not to be low.
    pub battery_not_low: bool,
}

impl Constraints {
    /// Any connected network, battery ignored.
    pub fn any_network() -> Self {
        Self {
            network: NetworkRequirement::Connected,
            battery_not_low: false,
        }
    }

    /// Returns true if `conditions` satisfy these constraints.
    pub fn satisfied_by(&self, conditions: &DeviceConditions) -> bool {
        let network_ok = match self.network {
            NetworkRequirement::Connected => conditions.is_online(),
            NetworkRequirement::Unmetered => conditions.network == NetworkState::Unmetered,
        };
        network_ok && !(self.battery_not_low && conditions.battery_low)
    }
}

/// Source of device conditions.
pub trait DeviceMonitor: Send + Sync {
    /// Current conditions.
    fn conditions(&self) -> DeviceConditions;

    /// Returns true if any network is available.
    fn is_online(&self) -> bool {
        self.conditions().is_online()
    }
}

/// A monitor whose conditions are set by the host (or a test).
#[derive(Debug)]
pub struct StaticDeviceMonitor {
    conditions: RwLock<DeviceConditions>,
}

impl StaticDeviceMonitor {
    /// Creates a monitor reporting `conditions`.
    pub fn new(conditions: DeviceConditions) -> Self {
        Self {
            conditions: RwLock::new(conditions),
        }
    }

    /// Replaces the reported conditions.
    pub fn set(&self, conditions: DeviceConditions) {
        *self.conditions.write() = conditions;
    }

    /// Changes only the network state.
    pub fn set_network(&self, network: NetworkState) {
        self.conditions.write().network = network;
    }

    /// Changes only the battery flag.
    pub fn set_battery_low(&self, low: bool) {
        self.conditions.write().battery_low = low;
    }
}

impl Default for StaticDeviceMonitor {
    fn default() -> Self {
        Self::new(DeviceConditions::online())
    }
}

impl DeviceMonitor for StaticDeviceMonitor {
    fn conditions(&self) -> DeviceConditions {
        *self.conditions.read()
    }
}
