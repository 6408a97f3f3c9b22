//! Weight-aware deterministic fork choice
//!
//! Maintains an append-only tree of validated headers plus an orphan buffer,
//! and selects the canonical tip by a **strict total order**:
//!
//! 1. higher cumulative weight (Σ `weight_micro` along the chain),
//! 2. on ties, greater height,
//! 3. still tied, lexicographically smallest block hash.
//!
//! The per-block weight is whatever monotone function of validated
//! difficulty the caller chooses — usually the block's Θ at seal time.
//!
//! Orphans (children of unknown parents) are buffered by parent hash and
//! attached breadth-first when the parent arrives, re-evaluating the best
//! tip after each attachment. Reorg paths are computed by aligning heights
//! and ascending jointly to the lowest common ancestor; an optional
//! `max_reorg_depth` guard refuses tip swaps whose detach path would exceed
//! the bound (the better block stays stored, non-canonical).
//!
//! The structure is a DAG rooted at genesis with unique parents, so there
//! are no cycles by construction. No clocks, no randomness.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::errors::ConsensusError;
use crate::{Hash32, Height, MicroNat};

/// One header in the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    /// Block hash.
    pub hash: Hash32,
    /// Parent hash (`None` only for genesis).
    pub parent: Option<Hash32>,
    /// Block height.
    pub height: Height,
    /// Per-block weight (µ-nats).
    pub weight_micro: MicroNat,
    /// Cumulative weight up to and including this node.
    pub cum_weight_micro: MicroNat,
    /// Hashes of attached children.
    pub children: std::collections::BTreeSet<Hash32>,
}

/// The currently selected canonical tip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BestTip {
    /// Tip hash.
    pub hash: Hash32,
    /// Tip height.
    pub height: Height,
    /// Cumulative weight of the tip's chain.
    pub cum_weight_micro: MicroNat,
}

impl BestTip {
    /// Tip hash as `0x`-prefixed hex.
    pub fn hex(&self) -> String {
        format!("0x{}", hex::encode(self.hash))
    }
}

/// Result of one `add_block` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddResult {
    /// Whether the block attached to the tree (false for duplicates and
    /// orphan-buffered blocks).
    pub accepted: bool,
    /// Whether this block became the canonical tip.
    pub became_best: bool,
    /// The best tip after the call (including any orphan cascades).
    pub best: BestTip,
    /// Depth of the detach path for the evaluated swap (0 when none; also
    /// reported when a swap was refused by `max_reorg_depth`).
    pub reorg_depth: usize,
    /// Old tip → … exclusive of the LCA (empty without a reorg).
    pub detached: Vec<Hash32>,
    /// LCA's child → … inclusive of the new tip.
    pub attached: Vec<Hash32>,
}

type PendingBlock = (Hash32, Height, MicroNat);

/// Weight-aware fork choice with deterministic tie-breaks.
#[derive(Debug, Clone)]
pub struct ForkChoice {
    nodes: BTreeMap<Hash32, Node>,
    /// parent hash → children waiting for it.
    orphans: BTreeMap<Hash32, Vec<PendingBlock>>,
    best: BestTip,
    max_reorg_depth: Option<usize>,
}

impl ForkChoice {
    /// Create a tree rooted at `genesis_hash`.
    pub fn new(genesis_hash: Hash32, genesis_weight_micro: MicroNat, genesis_height: Height) -> Self {
        let genesis = Node {
            hash: genesis_hash,
            parent: None,
            height: genesis_height,
            weight_micro: genesis_weight_micro,
            cum_weight_micro: genesis_weight_micro,
            children: Default::default(),
        };
        let best = BestTip {
            hash: genesis_hash,
            height: genesis_height,
            cum_weight_micro: genesis_weight_micro,
        };
        ForkChoice {
            nodes: BTreeMap::from([(genesis_hash, genesis)]),
            orphans: BTreeMap::new(),
            best,
            max_reorg_depth: None,
        }
    }

    /// Refuse tip swaps whose detach path exceeds `depth`.
    pub fn with_max_reorg_depth(mut self, depth: usize) -> Self {
        self.max_reorg_depth = Some(depth);
        self
    }

    /// Rebuild a tree from `(hash, parent, height, weight)` tuples in any
    /// order; orphan resolution and the best tip come out deterministic
    /// functions of the multiset.
    pub fn replay(
        genesis_hash: Hash32,
        genesis_weight_micro: MicroNat,
        genesis_height: Height,
        blocks: impl IntoIterator<Item = (Hash32, Hash32, Height, MicroNat)>,
    ) -> Self {
        let mut fc = ForkChoice::new(genesis_hash, genesis_weight_micro, genesis_height);
        for (hash, parent, height, weight) in blocks {
            fc.add_block(hash, parent, height, weight);
        }
        fc
    }

    /// The canonical tip.
    #[inline]
    pub fn best_tip(&self) -> &BestTip {
        &self.best
    }

    /// Whether `hash` is attached to the tree.
    #[inline]
    pub fn contains(&self, hash: &Hash32) -> bool {
        self.nodes.contains_key(hash)
    }

    /// Number of attached nodes (genesis included).
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false: the tree at least contains genesis.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// A node view, if attached.
    pub fn node(&self, hash: &Hash32) -> Option<&Node> {
        self.nodes.get(hash)
    }

    /// Insert an already-validated header and update the best tip if it
    /// wins. Unknown parents buffer the block as an orphan; duplicates are
    /// no-ops.
    pub fn add_block(
        &mut self,
        hash: Hash32,
        parent: Hash32,
        height: Height,
        weight_micro: MicroNat,
    ) -> AddResult {
        if self.nodes.contains_key(&hash) {
            return self.noop_result();
        }
        if !self.nodes.contains_key(&parent) {
            debug!(hash = %hex::encode(hash), parent = %hex::encode(parent), "buffering orphan");
            self.orphans.entry(parent).or_default().push((hash, height, weight_micro));
            return self.noop_result();
        }

        self.attach_to_known_parent(hash, parent, height, weight_micro);
        let (became_best, reorg_depth, detached, attached) = self.maybe_update_best(&hash);

        // Resolve descendants waiting on this node.
        self.connect_orphans(hash);

        AddResult {
            accepted: true,
            became_best,
            best: self.best,
            reorg_depth,
            detached,
            attached,
        }
    }

    /// Compute the detach/attach paths to move the canonical head from
    /// `from` to `to`. Detach runs `from` down to (excluding) the LCA;
    /// attach runs from the LCA's child up to and including `to`.
    pub fn reorg_path(
        &self,
        from: &Hash32,
        to: &Hash32,
    ) -> Result<(Vec<Hash32>, Vec<Hash32>), ConsensusError> {
        self.path_to_lca(from, to).ok_or_else(|| {
            ConsensusError::generic("reorg path endpoints not in tree")
                .with_context("from", hex::encode(from))
                .with_context("to", hex::encode(to))
        })
    }

    /// Iterate hashes from `tip` back to genesis (inclusive). Unknown tips
    /// yield an empty iterator.
    pub fn iter_chain_back<'a>(&'a self, tip: &Hash32) -> impl Iterator<Item = Hash32> + 'a {
        let start = self.nodes.get(tip).map(|n| n.hash);
        std::iter::successors(start, move |h| {
            self.nodes.get(h).and_then(|n| n.parent)
        })
    }

    /// Hashes with no children — the current tips of all branches, in
    /// lexicographic order.
    pub fn tip_set(&self) -> Vec<Hash32> {
        self.nodes
            .values()
            .filter(|n| n.children.is_empty())
            .map(|n| n.hash)
            .collect()
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn noop_result(&self) -> AddResult {
        AddResult {
            accepted: false,
            became_best: false,
            best: self.best,
            reorg_depth: 0,
            detached: Vec::new(),
            attached: Vec::new(),
        }
    }

    fn attach_to_known_parent(
        &mut self,
        hash: Hash32,
        parent: Hash32,
        height: Height,
        weight_micro: MicroNat,
    ) {
        let (parent_height, parent_cum) = match self.nodes.get(&parent) {
            Some(p) => (p.height, p.cum_weight_micro),
            None => return,
        };
        // Non-monotone heights are corrected rather than rejected.
        let height = if height <= parent_height { parent_height + 1 } else { height };
        let node = Node {
            hash,
            parent: Some(parent),
            height,
            weight_micro,
            cum_weight_micro: parent_cum.saturating_add(weight_micro),
            children: Default::default(),
        };
        self.nodes.insert(hash, node);
        if let Some(p) = self.nodes.get_mut(&parent) {
            p.children.insert(hash);
        }
    }

    fn connect_orphans(&mut self, parent: Hash32) {
        // Breadth-first so sibling subtrees re-evaluate the tip level by
        // level, independent of arrival order.
        let mut queue = std::collections::VecDeque::from([parent]);
        while let Some(p) = queue.pop_front() {
            let waiting = self.orphans.remove(&p).unwrap_or_default();
            for (hash, height, weight) in waiting {
                if self.nodes.contains_key(&hash) {
                    continue;
                }
                self.attach_to_known_parent(hash, p, height, weight);
                self.maybe_update_best(&hash);
                queue.push_back(hash);
            }
        }
    }

    /// True if `a` is strictly better than `b`.
    fn better(a: &Node, b: &Node) -> bool {
        if a.cum_weight_micro != b.cum_weight_micro {
            return a.cum_weight_micro > b.cum_weight_micro;
        }
        if a.height != b.height {
            return a.height > b.height;
        }
        a.hash < b.hash
    }

    fn maybe_update_best(&mut self, candidate: &Hash32) -> (bool, usize, Vec<Hash32>, Vec<Hash32>) {
        let (Some(cand), Some(old)) = (self.nodes.get(candidate), self.nodes.get(&self.best.hash))
        else {
            return (false, 0, Vec::new(), Vec::new());
        };
        if !Self::better(cand, old) {
            return (false, 0, Vec::new(), Vec::new());
        }
        let Some((detached, attached)) = self.path_to_lca(&old.hash, &cand.hash) else {
            return (false, 0, Vec::new(), Vec::new());
        };
        let depth = detached.len();
        if let Some(max_depth) = self.max_reorg_depth {
            if depth > max_depth {
                info!(depth, max_depth, "refusing reorg beyond depth bound");
                return (false, depth, Vec::new(), Vec::new());
            }
        }
        if depth > 0 {
            info!(
                depth,
                old = %hex::encode(old.hash),
                new = %hex::encode(cand.hash),
                "reorg to heavier branch"
            );
        }
        self.best = BestTip {
            hash: cand.hash,
            height: cand.height,
            cum_weight_micro: cand.cum_weight_micro,
        };
        (true, depth, detached, attached)
    }

    /// Walk both chains to their lowest common ancestor. `None` when either
    /// endpoint is missing or the walks escape the tree.
    fn path_to_lca(&self, a: &Hash32, b: &Hash32) -> Option<(Vec<Hash32>, Vec<Hash32>)> {
        if a == b {
            return if self.nodes.contains_key(a) { Some((Vec::new(), Vec::new())) } else { None };
        }
        let mut va = self.nodes.get(a)?;
        let mut vb = self.nodes.get(b)?;
        let mut path_a = Vec::new();
        let mut path_b = Vec::new();

        // Ascend the taller side until the heights align.
        while va.height > vb.height {
            path_a.push(va.hash);
            va = self.nodes.get(&va.parent?)?;
        }
        while vb.height > va.height {
            path_b.push(vb.hash);
            vb = self.nodes.get(&vb.parent?)?;
        }
        // Ascend jointly to the LCA.
        while va.hash != vb.hash {
            path_a.push(va.hash);
            path_b.push(vb.hash);
            va = self.nodes.get(&va.parent?)?;
            vb = self.nodes.get(&vb.parent?)?;
        }
        path_b.reverse();
        Some((path_a, path_b))
    }
}
