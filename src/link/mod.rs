//! Linked-block pairs.
//!
//! Two allocations can be linked into a pair whose affinity decays with use
//! and whose lifetime runs out after the coherence window. Pairs live in an
//! arena; partners refer to each other by arena index, never by pointer.
//!
//! Lifecycle per block: `Free -> Linked -> Accessed -> Expired`, and
//! `Expired -> Free` on unlink or deallocation. A block that is not in the
//! table is `Free`.

use std::collections::HashMap;
use std::f64::consts::TAU;

use log::trace;

use crate::api::error::{AllocError, AllocResult};
use crate::api::stats::LinkHealth;
use crate::diagnostics;

/// Strength at or below this counts as fully decayed.
const STRENGTH_EPSILON: f64 = 1e-9;

/// Amplitude weight of a fresh pair.
const INITIAL_WEIGHT: f64 = 0.5;

/// Link lifecycle state of one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkState {
    Free,
    Linked,
    Accessed,
    Expired,
}

impl LinkState {
    pub fn is_live(self) -> bool {
        matches!(self, LinkState::Linked | LinkState::Accessed)
    }
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LinkState::Free => "free",
            LinkState::Linked => "linked",
            LinkState::Accessed => "accessed",
            LinkState::Expired => "expired",
        };
        f.write_str(name)
    }
}

/// One side of a pair.
#[derive(Debug, Clone)]
pub struct LinkedBlock {
    pub address: usize,
    pub size: usize,
    pub state: LinkState,
    /// Arena index of the partner.
    partner: usize,
    /// Shared by both sides; assigned in link order.
    pair_id: u64,
    /// Pair affinity in `[0, 1]`.
    pub link_strength: f64,
    /// Milliseconds until the pair expires.
    pub ttl_remaining: f64,
    pub access_count: u32,
    /// Pair amplitude in `[0, 1]`; scales how fast the TTL runs down.
    pub weight: f64,
}

/// Result of a decay tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecayReport {
    pub live_pairs: usize,
    pub expired_pairs: usize,
    pub interfering_pairs: usize,
}

/// Arena of linked blocks keyed by address.
pub struct LinkTable {
    blocks: Vec<Option<LinkedBlock>>,
    by_address: HashMap<usize, usize>,
    vacant: Vec<usize>,
    next_pair_id: u64,
    health: LinkHealth,
    decay_rate: f64,
    coherence_window_ms: f64,
    interference_factor: f64,
}

impl LinkTable {
    pub fn new(decay_rate: f64, coherence_window_ms: u64, interference_factor: f64) -> Self {
        Self {
            blocks: Vec::new(),
            by_address: HashMap::new(),
            vacant: Vec::new(),
            next_pair_id: 0,
            health: LinkHealth::default(),
            decay_rate,
            coherence_window_ms: coherence_window_ms as f64,
            interference_factor,
        }
    }

    pub fn health(&self) -> LinkHealth {
        self.health
    }

    fn index_of(&self, address: usize) -> AllocResult<usize> {
        self.by_address
            .get(&address)
            .copied()
            .ok_or(AllocError::NotLinked { address })
    }

    fn block(&self, index: usize) -> &LinkedBlock {
        self.blocks[index].as_ref().expect("link arena index points at a vacant slot")
    }

    fn block_mut(&mut self, index: usize) -> &mut LinkedBlock {
        self.blocks[index].as_mut().expect("link arena index points at a vacant slot")
    }

    fn count(&mut self, state: LinkState, delta: isize) {
        let slot = match state {
            LinkState::Linked => &mut self.health.linked,
            LinkState::Accessed => &mut self.health.accessed,
            LinkState::Expired => &mut self.health.expired,
            LinkState::Free => return,
        };
        *slot = slot.wrapping_add_signed(delta);
    }

    fn set_state(&mut self, index: usize, state: LinkState) {
        let old = std::mem::replace(&mut self.block_mut(index).state, state);
        if old != state {
            self.count(old, -1);
            self.count(state, 1);
        }
    }

    fn insert(&mut self, block: LinkedBlock) -> usize {
        let address = block.address;
        let state = block.state;
        let index = match self.vacant.pop() {
            Some(index) => {
                self.blocks[index] = Some(block);
                index
            }
            None => {
                self.blocks.push(Some(block));
                self.blocks.len() - 1
            }
        };
        self.by_address.insert(address, index);
        self.health.total += 1;
        self.count(state, 1);
        index
    }

    fn remove(&mut self, index: usize) -> Option<LinkedBlock> {
        let block = self.blocks[index].take()?;
        self.by_address.remove(&block.address);
        self.vacant.push(index);
        self.health.total -= 1;
        self.count(block.state, -1);
        Some(block)
    }

    /// Link two free blocks, given as `(address, size)`.
    pub fn link(&mut self, a: (usize, usize), b: (usize, usize)) -> AllocResult<()> {
        if a.0 == b.0 {
            return Err(AllocError::AlreadyLinked { address: a.0 });
        }
        for address in [a.0, b.0] {
            if self.by_address.contains_key(&address) {
                return Err(AllocError::AlreadyLinked { address });
            }
        }

        let pair_id = self.next_pair_id;
        self.next_pair_id += 1;
        let fresh = |(address, size): (usize, usize)| LinkedBlock {
            address,
            size,
            state: LinkState::Linked,
            partner: usize::MAX,
            pair_id,
            link_strength: 1.0,
            ttl_remaining: self.coherence_window_ms,
            access_count: 0,
            weight: INITIAL_WEIGHT,
        };
        let (block_a, block_b) = (fresh(a), fresh(b));
        let ia = self.insert(block_a);
        let ib = self.insert(block_b);
        self.block_mut(ia).partner = ib;
        self.block_mut(ib).partner = ia;
        Ok(())
    }

    /// Break the pair containing `address`. Returns the partner's address.
    pub fn unlink(&mut self, address: usize) -> AllocResult<usize> {
        let index = self.index_of(address)?;
        let partner = self.block(index).partner;
        self.remove(index);
        let partner = self.remove(partner).map_or(0, |b| b.address);
        Ok(partner)
    }

    /// Drop link state for a block being freed; its partner becomes `Free`.
    pub fn release(&mut self, address: usize) -> Option<usize> {
        self.unlink(address).ok()
    }

    /// Record one access.
    ///
    /// Each access multiplies the pair strength by `1 - rate * n^2`, where
    /// `n` is this block's access count, so decay accelerates with use. A
    /// fully decayed pair expires. Accessing an expired block changes
    /// nothing.
    pub fn access(&mut self, address: usize) -> AllocResult<LinkState> {
        let index = self.index_of(address)?;
        if self.block(index).state == LinkState::Expired {
            return Ok(LinkState::Expired);
        }
        self.set_state(index, LinkState::Accessed);

        let rate = self.decay_rate;
        let block = self.block_mut(index);
        block.access_count += 1;
        let n = block.access_count as f64;
        let factor = (1.0 - rate * n * n).max(0.0);
        let strength = if block.link_strength * factor <= STRENGTH_EPSILON {
            0.0
        } else {
            block.link_strength * factor
        };
        block.link_strength = strength;
        let partner = block.partner;
        self.block_mut(partner).link_strength = strength;

        if strength == 0.0 {
            self.expire_pair(index);
            return Ok(LinkState::Expired);
        }
        Ok(LinkState::Accessed)
    }

    fn expire_pair(&mut self, index: usize) {
        let partner = self.block(index).partner;
        for i in [index, partner] {
            self.set_state(i, LinkState::Expired);
            self.block_mut(i).link_strength = 0.0;
            self.block_mut(i).ttl_remaining = 0.0;
        }
        let context = format!("{:#x} <-> {:#x}", self.block(index).address, self.block(partner).address);
        diagnostics::emit_with_context(&diagnostics::TA201, &context);
    }

    /// Revive an expired pair with full strength and a fresh window.
    /// Live pairs are left as they are.
    pub fn restore(&mut self, address: usize) -> AllocResult<LinkState> {
        let index = self.index_of(address)?;
        if self.block(index).state != LinkState::Expired {
            return Ok(self.block(index).state);
        }
        let partner = self.block(index).partner;
        let window = self.coherence_window_ms;
        for i in [index, partner] {
            self.set_state(i, LinkState::Linked);
            let block = self.block_mut(i);
            block.link_strength = 1.0;
            block.ttl_remaining = window;
            block.access_count = 0;
            block.weight = INITIAL_WEIGHT;
        }
        Ok(LinkState::Linked)
    }

    pub fn state(&self, address: usize) -> LinkState {
        self.by_address
            .get(&address)
            .map_or(LinkState::Free, |&i| self.block(i).state)
    }

    /// Pair strength, `0.0` for free blocks.
    pub fn strength(&self, address: usize) -> f64 {
        self.by_address
            .get(&address)
            .map_or(0.0, |&i| self.block(i).link_strength)
    }

    pub fn partner(&self, address: usize) -> Option<usize> {
        let &index = self.by_address.get(&address)?;
        Some(self.block(self.block(index).partner).address)
    }

    pub fn get(&self, address: usize) -> Option<&LinkedBlock> {
        self.by_address.get(&address).map(|&i| self.block(i))
    }

    /// Follow a block that moved to `new_address`.
    pub fn rekey(&mut self, old_address: usize, new_address: usize, new_size: usize) {
        if let Some(index) = self.by_address.remove(&old_address) {
            let block = self.block_mut(index);
            block.address = new_address;
            block.size = new_size;
            self.by_address.insert(new_address, index);
        }
    }

    /// Advance pair lifetimes by `elapsed_ms`, then run the interference pass.
    pub fn tick(&mut self, elapsed_ms: f64) -> DecayReport {
        let mut report = DecayReport::default();

        // Lower arena index of each live pair, ordered by pair id.
        let mut pairs: Vec<(u64, usize)> = self
            .blocks
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| {
                let block = slot.as_ref()?;
                (block.state.is_live() && i < block.partner).then_some((block.pair_id, i))
            })
            .collect();
        pairs.sort_unstable();

        for &(_, index) in &pairs {
            let partner = self.block(index).partner;
            let block = self.block_mut(index);
            block.ttl_remaining -= elapsed_ms * (0.5 + block.weight);
            let ttl = block.ttl_remaining;
            self.block_mut(partner).ttl_remaining = ttl;
            if ttl <= 0.0 {
                self.expire_pair(index);
                report.expired_pairs += 1;
            }
        }
        pairs.retain(|&(_, i)| self.block(i).state.is_live());
        report.live_pairs = pairs.len();

        // Disjoint pairing (0,1), (2,3), ... in link order.
        for chunk in pairs.chunks_exact(2) {
            let (a, b) = (chunk[0].1, chunk[1].1);
            let phase_a = TAU * self.block(a).ttl_remaining / self.coherence_window_ms;
            let phase_b = TAU * self.block(b).ttl_remaining / self.coherence_window_ms;
            let adjustment = (phase_a - phase_b).cos() * self.interference_factor;
            self.set_pair_weight(a, self.block(a).weight + adjustment);
            self.set_pair_weight(b, self.block(b).weight - adjustment);
            report.interfering_pairs += 1;
        }

        if report.expired_pairs > 0 {
            trace!("link tick: {} pairs expired, {} live", report.expired_pairs, report.live_pairs);
        }
        report
    }

    fn set_pair_weight(&mut self, index: usize, weight: f64) {
        let weight = weight.clamp(0.0, 1.0);
        let partner = self.block(index).partner;
        self.block_mut(index).weight = weight;
        self.block_mut(partner).weight = weight;
    }

    /// Every block's partner points back at it.
    pub fn is_symmetric(&self) -> bool {
        self.blocks.iter().enumerate().all(|(i, slot)| match slot {
            Some(block) => self.blocks[block.partner]
                .as_ref()
                .map_or(false, |p| p.partner == i),
            None => true,
        })
    }

    /// All tracked blocks, ordered by address.
    pub fn entries(&self) -> Vec<LinkedBlock> {
        let mut entries: Vec<LinkedBlock> = self.blocks.iter().flatten().cloned().collect();
        entries.sort_by_key(|b| b.address);
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> LinkTable {
        LinkTable::new(0.01, 1000, 0.05)
    }

    #[test]
    fn test_link_requires_free_blocks() {
        let mut links = table();
        links.link((0x1000, 64), (0x2000, 64)).unwrap();
        assert_eq!(links.state(0x1000), LinkState::Linked);
        assert_eq!(links.partner(0x1000), Some(0x2000));
        assert_eq!(links.partner(0x2000), Some(0x1000));

        let err = links.link((0x2000, 64), (0x3000, 64)).unwrap_err();
        assert!(matches!(err, AllocError::AlreadyLinked { address: 0x2000 }));
        assert_eq!(links.state(0x3000), LinkState::Free);
        assert!(matches!(
            links.link((0x3000, 64), (0x3000, 64)),
            Err(AllocError::AlreadyLinked { .. })
        ));
        assert!(links.is_symmetric());
    }

    #[test]
    fn test_ten_accesses_expire_pair() {
        let mut links = table();
        links.link((0xa000, 64), (0xb000, 64)).unwrap();

        let mut previous = links.strength(0xa000);
        for i in 1..=10 {
            let state = links.access(0xa000).unwrap();
            let strength = links.strength(0xa000);
            assert!(strength <= previous, "strength rose at access {}", i);
            assert_eq!(strength, links.strength(0xb000));
            assert!(links.is_symmetric());
            previous = strength;
            if i < 10 {
                assert_eq!(state, LinkState::Accessed);
            }
        }

        assert!(previous < 0.1);
        assert_eq!(links.state(0xa000), LinkState::Expired);
        assert_eq!(links.state(0xb000), LinkState::Expired);

        // Expired stays expired until restored.
        assert_eq!(links.access(0xb000).unwrap(), LinkState::Expired);
        assert_eq!(links.strength(0xb000), 0.0);
    }

    #[test]
    fn test_access_decay_is_quadratic_in_count() {
        let mut links = table();
        links.link((0xa000, 64), (0xb000, 64)).unwrap();

        links.access(0xa000).unwrap();
        assert!((links.strength(0xa000) - 0.99).abs() < 1e-12);
        links.access(0xa000).unwrap();
        assert!((links.strength(0xa000) - 0.99 * 0.96).abs() < 1e-12);
        links.access(0xa000).unwrap();
        assert!((links.strength(0xa000) - 0.99 * 0.96 * 0.91).abs() < 1e-12);
    }

    #[test]
    fn test_restore_and_unlink() {
        let mut links = table();
        links.link((1 << 12, 64), (2 << 12, 64)).unwrap();
        for _ in 0..10 {
            links.access(1 << 12).unwrap();
        }
        assert_eq!(links.restore(2 << 12).unwrap(), LinkState::Linked);
        assert_eq!(links.state(1 << 12), LinkState::Linked);
        assert_eq!(links.strength(1 << 12), 1.0);
        assert_eq!(links.get(1 << 12).unwrap().access_count, 0);

        assert_eq!(links.unlink(1 << 12).unwrap(), 2 << 12);
        assert_eq!(links.state(2 << 12), LinkState::Free);
        assert!(matches!(links.unlink(1 << 12), Err(AllocError::NotLinked { .. })));
        assert_eq!(links.health(), LinkHealth::default());
    }

    #[test]
    fn test_ttl_expires_pair() {
        let mut links = table();
        links.link((0x100, 16), (0x200, 16)).unwrap();
        let report = links.tick(600.0);
        assert_eq!(report.expired_pairs, 0);
        assert!((links.get(0x100).unwrap().ttl_remaining - 400.0).abs() < 1e-9);

        let report = links.tick(600.0);
        assert_eq!(report.expired_pairs, 1);
        assert_eq!(links.state(0x100), LinkState::Expired);
        assert_eq!(links.state(0x200), LinkState::Expired);
        assert!(links.is_symmetric());
    }

    #[test]
    fn test_interference_moves_weights_symmetrically() {
        let mut links = table();
        links.link((0x10, 16), (0x20, 16)).unwrap();
        links.link((0x30, 16), (0x40, 16)).unwrap();
        links.link((0x50, 16), (0x60, 16)).unwrap();

        let report = links.tick(1.0);
        assert_eq!(report.live_pairs, 3);
        assert_eq!(report.interfering_pairs, 1);

        // Equal phases: cos(0) * 0.05 moves the first two pairs apart.
        let first = links.get(0x10).unwrap().weight;
        let second = links.get(0x30).unwrap().weight;
        assert!((first - 0.55).abs() < 1e-9);
        assert!((second - 0.45).abs() < 1e-9);
        assert_eq!(links.get(0x20).unwrap().weight, first);
        assert_eq!(links.get(0x50).unwrap().weight, INITIAL_WEIGHT);

        // Strength is never raised by interference.
        assert_eq!(links.strength(0x10), 1.0);
    }

    #[test]
    fn test_release_and_rekey() {
        let mut links = table();
        links.link((0x1000, 64), (0x2000, 64)).unwrap();
        links.rekey(0x1000, 0x9000, 128);
        assert_eq!(links.partner(0x2000), Some(0x9000));
        assert_eq!(links.get(0x9000).unwrap().size, 128);
        assert_eq!(links.state(0x1000), LinkState::Free);

        assert_eq!(links.release(0x2000), Some(0x9000));
        assert_eq!(links.state(0x9000), LinkState::Free);
        assert_eq!(links.release(0x2000), None);
    }

    #[test]
    fn test_health_counts_follow_transitions() {
        let mut links = table();
        links.link((0x1, 1), (0x2, 1)).unwrap();
        links.link((0x3, 1), (0x4, 1)).unwrap();
        links.access(0x1).unwrap();
        let health = links.health();
        assert_eq!(health.total, 4);
        assert_eq!(health.linked, 3);
        assert_eq!(health.accessed, 1);

        for _ in 0..10 {
            links.access(0x3).unwrap();
        }
        assert_eq!(links.health().expired, 2);
        links.unlink(0x4).unwrap();
        assert_eq!(links.health().total, 2);
        assert_eq!(links.health().expired, 0);
    }
}
