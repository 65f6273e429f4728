//! MAC learning table.
//!
//! Maps `(switch, MAC)` to the port the address was last seen on. Entries are
//! partitioned by datapath id and every update to a partition happens under
//! its shard lock.

use std::collections::HashMap;

use dashmap::DashMap;

use crate::packet::MacAddr;

/// Datapath id of a connected switch.
pub type DatapathId = u64;
/// OpenFlow 1.3 port number.
pub type PortNo = u32;

#[derive(Debug, Default)]
pub struct MacLearningTable {
    partitions: DashMap<DatapathId, HashMap<MacAddr, PortNo>>,
}

impl MacLearningTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `mac` was seen on `port` of switch `sw`. Last write wins.
    ///
    /// Returns the port previously learned for this address, if any.
    pub fn learn(&self, sw: DatapathId, mac: MacAddr, port: PortNo) -> Option<PortNo> {
        self.partitions.entry(sw).or_default().insert(mac, port)
    }

    /// Port on which `mac` was last seen by switch `sw`.
    pub fn lookup(&self, sw: DatapathId, mac: &MacAddr) -> Option<PortNo> {
        self.partitions.get(&sw)?.get(mac).copied()
    }

    /// Forget everything learned on switch `sw`. Returns the number of entries dropped.
    pub fn drop_partition(&self, sw: DatapathId) -> usize {
        self.partitions
            .remove(&sw)
            .map(|(_, hosts)| hosts.len())
            .unwrap_or(0)
    }

    /// Number of hosts currently known on switch `sw`.
    pub fn known_hosts(&self, sw: DatapathId) -> usize {
        self.partitions.get(&sw).map(|hosts| hosts.len()).unwrap_or(0)
    }
}
