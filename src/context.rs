//! Node context
//!
//! The mutable state shared by the components: device registry and active
//! sector. It is owned by the supervisor and lent to each component per call;
//! the dispatcher is its only writer.

use crate::config;
use crate::devices::DeviceRegistry;
use core::fmt;

/// Longest sector name accepted from the server
pub const SECTOR_MAX: usize = 16;

/// Active logical zone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sector(heapless::String<SECTOR_MAX>);

impl Sector {
    pub fn new(name: &str) -> Option<Self> {
        heapless::String::try_from(name).ok().map(Sector)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Default for Sector {
    fn default() -> Self {
        let mut name = heapless::String::new();
        let _ = name.push_str(config::DEFAULT_SECTOR);
        Sector(name)
    }
}

impl fmt::Display for Sector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registry and sector, lent to components by reference
#[derive(Debug, Clone)]
pub struct NodeContext {
    pub devices: DeviceRegistry,
    pub sector: Sector,
}

impl NodeContext {
    pub fn new(devices: DeviceRegistry, sector: Sector) -> Self {
        Self { devices, sector }
    }
}
