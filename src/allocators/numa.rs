//! NUMA locality manager.
//!
//! Detects the node topology, maps node-bound regions, keeps per-node
//! byte accounting for every tier and computes the balance report the
//! maintenance loop acts on.

use log::{debug, info};

use crate::allocators::region::{bind_range, page_size, Region};
use crate::api::error::{AllocError, AllocResult};
use crate::api::stats::NumaNodeSnapshot;
use crate::diagnostics;
use crate::util::size::{format_bytes, gib};

/// Nodes above this multiple of the mean load are overloaded.
const OVERLOAD_FACTOR: f64 = 1.2;

/// Nodes below this multiple of the mean load are underutilized.
const UNDERLOAD_FACTOR: f64 = 0.8;

/// Detected properties of one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub id: usize,
    pub total_memory: usize,
    pub cpus: Vec<usize>,
}

/// Node accounting state.
#[derive(Debug, Clone)]
struct NumaNode {
    info: NodeInfo,
    /// Bytes charged to this node by every tier.
    charged: usize,
    is_overloaded: bool,
    is_underutilized: bool,
}

impl NumaNode {
    fn allocated_memory(&self) -> usize {
        self.charged.min(self.info.total_memory)
    }

    fn utilization(&self) -> f64 {
        if self.info.total_memory == 0 {
            return 0.0;
        }
        self.allocated_memory() as f64 / self.info.total_memory as f64
    }
}

/// Outcome of a balance pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BalanceReport {
    /// `1 - stddev(utilization)`, clamped to `[0, 1]`.
    pub efficiency: f64,
    pub overloaded: Vec<usize>,
    pub underutilized: Vec<usize>,
}

/// NUMA topology plus per-node accounting.
pub struct NumaManager {
    nodes: Vec<NumaNode>,
    /// The kernel exposes a NUMA topology we can bind against.
    supported: bool,
}

impl NumaManager {
    /// Detect the platform topology. With `enable == false`, or where the
    /// platform has no NUMA support, a single node 0 is used.
    pub fn detect(enable: bool) -> Self {
        let detected = if enable { detect_topology() } else { None };
        match detected {
            Some(nodes) if !nodes.is_empty() => {
                info!("detected {} NUMA node(s)", nodes.len());
                Self::from_nodes(nodes, true)
            }
            _ => Self::single_node(),
        }
    }

    /// A single node 0 spanning physical memory.
    pub fn single_node() -> Self {
        let cpus = (0..std::thread::available_parallelism().map_or(1, |n| n.get())).collect();
        Self::from_nodes(
            vec![NodeInfo {
                id: 0,
                total_memory: physical_memory(),
                cpus,
            }],
            false,
        )
    }

    /// Build from an explicit topology.
    pub fn from_nodes(mut nodes: Vec<NodeInfo>, supported: bool) -> Self {
        nodes.sort_by_key(|n| n.id);
        Self {
            nodes: nodes
                .into_iter()
                .map(|info| NumaNode {
                    info,
                    charged: 0,
                    is_overloaded: false,
                    is_underutilized: false,
                })
                .collect(),
            supported,
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_multi_node(&self) -> bool {
        self.nodes.len() > 1
    }

    pub fn is_supported(&self) -> bool {
        self.supported
    }

    fn node(&self, id: usize) -> Option<&NumaNode> {
        self.nodes.iter().find(|n| n.info.id == id)
    }

    fn node_mut(&mut self, id: usize) -> Option<&mut NumaNode> {
        self.nodes.iter_mut().find(|n| n.info.id == id)
    }

    fn fallback_node(&self) -> usize {
        self.nodes.first().map_or(0, |n| n.info.id)
    }

    /// Map `node` to a known node, degrading to the first node.
    pub fn resolve(&self, node: usize) -> usize {
        if self.node(node).is_some() {
            return node;
        }
        diagnostics::emit_with_context(&diagnostics::TA101, &format!("node {}", node));
        self.fallback_node()
    }

    /// Node the calling thread is running on.
    pub fn current_node(&self) -> usize {
        if self.is_multi_node() {
            if let Some(cpu) = current_cpu() {
                if let Some(node) = self.nodes.iter().find(|n| n.info.cpus.contains(&cpu)) {
                    return node.info.id;
                }
            }
        }
        self.fallback_node()
    }

    /// Map a region for `size` bytes at `alignment`, bound to `node`.
    ///
    /// Returns the region and the node it was charged to. Binding failures
    /// are not errors: the region keeps the default policy and is still
    /// accounted to the requested node.
    pub fn allocate(&mut self, size: usize, node: usize, alignment: usize) -> AllocResult<(Region, usize)> {
        let node = self.resolve(node);
        let region = Region::map(size, alignment.max(page_size()))?;
        if self.supported && !region.bind_to_node(node, false) {
            diagnostics::emit_with_context(&diagnostics::TA102, &format!("node {}", node));
        }
        Ok((region, node))
    }

    /// Charge `bytes` to `node`.
    pub fn record_alloc(&mut self, node: usize, bytes: usize) {
        if let Some(n) = self.node_mut(node) {
            n.charged += bytes;
        }
    }

    /// Return `bytes` charged to `node`.
    pub fn record_free(&mut self, node: usize, bytes: usize) {
        if let Some(n) = self.node_mut(node) {
            n.charged = n.charged.saturating_sub(bytes);
        }
    }

    /// Classify nodes against the mean load and recompute efficiency.
    pub fn balance(&mut self) -> BalanceReport {
        let count = self.nodes.len().max(1) as f64;
        let mean = self.nodes.iter().map(|n| n.allocated_memory() as f64).sum::<f64>() / count;

        let mut report = BalanceReport::default();
        for node in &mut self.nodes {
            let allocated = node.allocated_memory() as f64;
            node.is_overloaded = allocated > mean * OVERLOAD_FACTOR;
            node.is_underutilized = allocated < mean * UNDERLOAD_FACTOR;
            if node.is_overloaded {
                report.overloaded.push(node.info.id);
            }
            if node.is_underutilized {
                report.underutilized.push(node.info.id);
            }
        }

        let mean_util = self.nodes.iter().map(NumaNode::utilization).sum::<f64>() / count;
        let variance = self
            .nodes
            .iter()
            .map(|n| (n.utilization() - mean_util).powi(2))
            .sum::<f64>()
            / count;
        report.efficiency = (1.0 - variance.sqrt()).clamp(0.0, 1.0);

        debug!(
            "numa balance: efficiency {:.3}, {} overloaded, {} underutilized",
            report.efficiency,
            report.overloaded.len(),
            report.underutilized.len()
        );
        report
    }

    pub fn is_overloaded(&self, node: usize) -> bool {
        self.node(node).map_or(false, |n| n.is_overloaded)
    }

    /// Least-loaded node that is not overloaded, other than `from`.
    pub fn migration_target(&self, from: usize) -> Option<usize> {
        self.nodes
            .iter()
            .filter(|n| n.info.id != from && !n.is_overloaded)
            .min_by_key(|n| n.allocated_memory())
            .map(|n| n.info.id)
    }

    /// Move the pages of `[addr, addr + len)` to `to` and shift the
    /// accounting. Fails without touching the accounting when the platform
    /// cannot bind or the kernel refuses.
    pub fn migrate(&mut self, addr: usize, len: usize, from: usize, to: usize) -> AllocResult<()> {
        if !self.supported || !bind_range(addr, len, to, true) {
            return Err(AllocError::NumaUnavailable { node: to });
        }
        self.transfer_charge(from, to, len);
        debug!("migrated {} at {:#x} from node {} to {}", format_bytes(len), addr, from, to);
        Ok(())
    }

    /// Move `bytes` of accounting from one node to another.
    pub fn transfer_charge(&mut self, from: usize, to: usize, bytes: usize) {
        self.record_free(from, bytes);
        self.record_alloc(to, bytes);
    }

    pub fn snapshots(&self) -> Vec<NumaNodeSnapshot> {
        self.nodes
            .iter()
            .map(|n| NumaNodeSnapshot {
                id: n.info.id,
                total_memory: n.info.total_memory,
                free_memory: n.info.total_memory - n.allocated_memory(),
                allocated_memory: n.allocated_memory(),
                utilization: n.utilization(),
                is_overloaded: n.is_overloaded,
                is_underutilized: n.is_underutilized,
            })
            .collect()
    }
}

/// CPU the calling thread is running on.
fn current_cpu() -> Option<usize> {
    #[cfg(target_os = "linux")]
    {
        // SAFETY: sched_getcpu has no preconditions.
        let cpu = unsafe { libc::sched_getcpu() };
        if cpu >= 0 {
            return Some(cpu as usize);
        }
    }
    None
}

/// Total physical memory, or 16 GiB when it cannot be queried.
fn physical_memory() -> usize {
    #[cfg(unix)]
    {
        // SAFETY: sysconf has no preconditions.
        let pages = unsafe { libc::sysconf(libc::_SC_PHYS_PAGES) };
        if pages > 0 {
            return pages as usize * page_size();
        }
    }
    gib(16)
}

#[cfg(target_os = "linux")]
fn detect_topology() -> Option<Vec<NodeInfo>> {
    use std::fs;
    use std::path::Path;

    let root = Path::new("/sys/devices/system/node");
    let mut nodes = Vec::new();
    for entry in fs::read_dir(root).ok()?.filter_map(|e| e.ok()) {
        let name = entry.file_name();
        let Some(id) = name
            .to_str()
            .and_then(|n| n.strip_prefix("node"))
            .and_then(|n| n.parse::<usize>().ok())
        else {
            continue;
        };

        let dir = entry.path();
        let total_memory = fs::read_to_string(dir.join("meminfo"))
            .ok()
            .and_then(|text| parse_meminfo_total(&text))
            .unwrap_or(0);
        let cpus = fs::read_to_string(dir.join("cpulist"))
            .map(|text| parse_cpulist(&text))
            .unwrap_or_default();
        nodes.push(NodeInfo { id, total_memory, cpus });
    }

    let share = physical_memory() / nodes.len().max(1);
    for node in nodes.iter_mut().filter(|n| n.total_memory == 0) {
        node.total_memory = share;
    }
    Some(nodes)
}

#[cfg(not(target_os = "linux"))]
fn detect_topology() -> Option<Vec<NodeInfo>> {
    None
}

/// Parse `Node N MemTotal: X kB` from a node meminfo file.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_meminfo_total(text: &str) -> Option<usize> {
    text.lines().find_map(|line| {
        let mut fields = line.split_whitespace().skip_while(|f| *f != "MemTotal:");
        fields.next()?;
        let kb: usize = fields.next()?.parse().ok()?;
        Some(kb * 1024)
    })
}

/// Parse a kernel cpulist such as `0-3,8,10-11`.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_cpulist(text: &str) -> Vec<usize> {
    let mut cpus = Vec::new();
    for part in text.trim().split(',').filter(|p| !p.is_empty()) {
        match part.split_once('-') {
            Some((lo, hi)) => {
                if let (Ok(lo), Ok(hi)) = (lo.parse::<usize>(), hi.parse::<usize>()) {
                    cpus.extend(lo..=hi);
                }
            }
            None => {
                if let Ok(cpu) = part.parse() {
                    cpus.push(cpu);
                }
            }
        }
    }
    cpus
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::size::mib;

    fn two_nodes() -> NumaManager {
        NumaManager::from_nodes(
            vec![
                NodeInfo { id: 0, total_memory: gib(1), cpus: vec![0, 1] },
                NodeInfo { id: 1, total_memory: gib(1), cpus: vec![2, 3] },
            ],
            false,
        )
    }

    #[test]
    fn test_parse_sysfs_formats() {
        let meminfo = "Node 0 MemTotal:       32657044 kB\nNode 0 MemFree:        1000 kB\n";
        assert_eq!(parse_meminfo_total(meminfo), Some(32657044 * 1024));
        assert_eq!(parse_cpulist("0-3,8,10-11\n"), vec![0, 1, 2, 3, 8, 10, 11]);
        assert!(parse_cpulist("\n").is_empty());
    }

    #[test]
    fn test_unknown_node_degrades_to_first() {
        let numa = two_nodes();
        assert_eq!(numa.resolve(1), 1);
        assert_eq!(numa.resolve(7), 0);
    }

    #[test]
    fn test_allocate_charges_requested_node() {
        let mut numa = NumaManager::single_node();
        let (region, node) = numa.allocate(10_000, 0, 64).unwrap();
        assert_eq!(node, 0);
        assert_eq!(region.base() % 64, 0);
        numa.record_alloc(node, 10_000);
        assert_eq!(numa.snapshots()[0].allocated_memory, 10_000);
        numa.record_free(node, 10_000);
        assert_eq!(numa.snapshots()[0].allocated_memory, 0);
    }

    #[test]
    fn test_balance_flags_and_efficiency() {
        let mut numa = two_nodes();
        numa.record_alloc(0, mib(512));
        numa.record_alloc(1, mib(64));

        let report = numa.balance();
        assert_eq!(report.overloaded, vec![0]);
        assert_eq!(report.underutilized, vec![1]);
        // Utilizations 0.5 and 0.0625: stddev 0.21875.
        assert!((report.efficiency - 0.78125).abs() < 1e-9);
        assert_eq!(numa.migration_target(0), Some(1));
    }

    #[test]
    fn test_migration_needs_binding_and_shifts_charge() {
        let mut numa = two_nodes();
        numa.record_alloc(0, mib(512));
        numa.record_alloc(1, mib(64));
        numa.balance();
        assert!(numa.is_overloaded(0));
        assert!(!numa.is_overloaded(1));
        assert_eq!(numa.migration_target(1), None);

        // No binding support: refused, accounting untouched.
        assert!(matches!(
            numa.migrate(0x10_0000, mib(128), 0, 1),
            Err(AllocError::NumaUnavailable { node: 1 })
        ));
        assert_eq!(numa.snapshots()[0].allocated_memory, mib(512));

        numa.transfer_charge(0, 1, mib(128));
        let nodes = numa.snapshots();
        assert_eq!(nodes[0].allocated_memory, mib(384));
        assert_eq!(nodes[1].allocated_memory, mib(192));
        // Utilizations 0.375 and 0.1875: stddev 0.09375.
        assert!((numa.balance().efficiency - 0.90625).abs() < 1e-9);
    }

    #[test]
    fn test_balanced_nodes_are_fully_efficient() {
        let mut numa = two_nodes();
        numa.record_alloc(0, mib(100));
        numa.record_alloc(1, mib(100));
        let report = numa.balance();
        assert!(report.overloaded.is_empty());
        assert!(report.underutilized.is_empty());
        assert_eq!(report.efficiency, 1.0);
    }

    #[test]
    fn test_allocated_never_exceeds_total() {
        let mut numa = two_nodes();
        numa.record_alloc(0, gib(2));
        let snap = &numa.snapshots()[0];
        assert_eq!(snap.allocated_memory, snap.total_memory);
        assert_eq!(snap.free_memory, 0);
        let report = numa.balance();
        assert!((0.0..=1.0).contains(&report.efficiency));
    }
}
