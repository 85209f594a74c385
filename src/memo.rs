//! # Memoization - Aliasing-Aware Forward Retention
//!
//! When one physical instance sits under several parents (an aliased
//! sub-network, the canonical case being `a ⊙ a`), it receives several
//! forward calls before any of their outputs is consumed by a backward
//! call. Each retained output must later be matched to the *correct*
//! backward call, in the correct order, without the concurrent results
//! overwriting one another.
//!
//! ## Protocol
//!
//! A [`Memo`] is created fresh for every top-level call under a [`Seed`]
//! and is consumed in four steps:
//!
//! 1. [`Network::init`] — pre-pass counting, per node, how many distinct
//!    parent paths will invoke it ("mirrors").
//! 2. [`Network::allocate`] — sizes each node's ring buffers to its mirror
//!    count, exactly once per seed.
//! 3. Forward — nodes that retain output *decrement* the cursor (wrapping),
//!    then write into the freed slot.
//! 4. Backward — nodes *take* the value at the cursor, then increment.
//!
//! Decrement-before-write paired with take-before-increment makes the ring
//! behave as a stack: the last forward write is the first value consumed by
//! the next backward read. That is exactly reverse-mode evaluation order for
//! nested combinators, and it stays correct under aliasing fan-out because
//! each extra mirror adds one slot.
//!
//! Over one seed, forward writes, backward reads, and the mirror count of a
//! node are all equal; any imbalance surfaces as
//! [`NetError::AliasingViolation`].
//!
//! A memo must never be shared between concurrent top-level calls — entries
//! and cursors are mutated in place.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use petgraph::graph::NodeIndex;
use tracing::trace;

use crate::error::NetError;
use crate::network::{Network, Operand, Plan};
use crate::tensor::{Matrix, Vector};

/// An opaque token scoping one logical top-level pass. Any string uniquely
/// identifying the pass will do; seeds must not be reused across calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seed {
    label: String,
}

impl Seed {
    /// Create a seed from a unique label.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }

    /// Stable numeric form, used to seed deterministic weight sampling.
    pub(crate) fn rng_seed(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.label.hash(&mut hasher);
        hasher.finish()
    }
}

impl fmt::Display for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label)
    }
}

/// Per-node bookkeeping for one seed: mirror count, ring-buffer cursor, and
/// the retained forward outputs in vector and batch form.
#[derive(Debug, Default)]
pub(crate) struct MemoEntry {
    pub(crate) num_mirrors: usize,
    pub(crate) mirror_index: usize,
    pub(crate) slots: Vec<Option<Vector>>,
    pub(crate) slots_m: Vec<Option<Matrix>>,
    pub(crate) allocated: bool,
}

/// Call-scoped memo table, keyed by instance index.
pub struct Memo {
    seed: Seed,
    entries: HashMap<NodeIndex, MemoEntry>,
}

impl Memo {
    /// Create an empty memo for one top-level call.
    pub fn new(seed: Seed) -> Self {
        Self {
            seed,
            entries: HashMap::new(),
        }
    }

    /// The seed this memo is scoped to.
    pub fn seed(&self) -> &Seed {
        &self.seed
    }

    /// Number of parallel usage contexts counted for a node by
    /// [`Network::init`]; zero if the node was never visited.
    pub fn num_mirrors(&self, id: NodeIndex) -> usize {
        self.entries.get(&id).map_or(0, |e| e.num_mirrors)
    }

    /// Record one more usage context for a node.
    pub(crate) fn register(&mut self, id: NodeIndex) {
        self.entries.entry(id).or_default().num_mirrors += 1;
    }

    pub(crate) fn entry_mut(&mut self, id: NodeIndex) -> Option<&mut MemoEntry> {
        self.entries.get_mut(&id)
    }

    /// Retain a forward result: decrement the cursor (wrapping), then write
    /// into the freed slot.
    pub(crate) fn push<T: Operand>(&mut self, id: NodeIndex, value: T) -> Result<(), NetError> {
        let entry = self.missing_guard(id)?;
        let n = entry.num_mirrors;
        let idx = (entry.mirror_index + n - 1) % n;
        entry.mirror_index = idx;
        let slot = &mut T::slots(entry)[idx];
        if slot.is_some() {
            return Err(NetError::AliasingViolation {
                node: id.index(),
                reason: format!(
                    "forward writes exceed the {n} mirror(s) declared by init"
                ),
            });
        }
        *slot = Some(value);
        Ok(())
    }

    /// Consume a retained forward result: take the value at the cursor,
    /// then increment (wrapping).
    pub(crate) fn pop<T: Operand>(&mut self, id: NodeIndex) -> Result<T, NetError> {
        let entry = self.missing_guard(id)?;
        let n = entry.num_mirrors;
        let idx = entry.mirror_index;
        let value = T::slots(entry)[idx].take().ok_or_else(|| {
            NetError::AliasingViolation {
                node: id.index(),
                reason: "ring buffer read without a matching forward write".to_string(),
            }
        })?;
        entry.mirror_index = (idx + 1) % n;
        Ok(value)
    }

    fn missing_guard(&mut self, id: NodeIndex) -> Result<&mut MemoEntry, NetError> {
        let entry = self
            .entries
            .get_mut(&id)
            .filter(|e| e.allocated)
            .ok_or_else(|| NetError::AliasingViolation {
                node: id.index(),
                reason: "init/allocate was not run under this seed".to_string(),
            })?;
        Ok(entry)
    }
}

// ============================================================================
// Extension to Network: the two-phase setup passes
// ============================================================================

impl Network {
    /// First setup phase: count, for every reachable node, how many distinct
    /// parent paths will invoke its forward method during the upcoming pass.
    /// Must run once per seed before [`Network::allocate`].
    pub fn init(&self, root: NodeIndex, memo: &mut Memo) -> Result<(), NetError> {
        self.node(root)?;
        self.init_node(root, memo);
        trace!(seed = %memo.seed(), root = root.index(), "memo initialised");
        Ok(())
    }

    fn init_node(&self, id: NodeIndex, memo: &mut Memo) {
        memo.register(id);
        match self.plan(id) {
            Plan::Identity | Plan::Linear => {}
            Plan::Pair { first, second, .. } => {
                self.init_node(first, memo);
                self.init_node(second, memo);
            }
            Plan::Repeat { blocks } => {
                for block in blocks {
                    self.init_node(block, memo);
                }
            }
        }
    }

    /// Second setup phase: size each node's ring buffers to its mirror
    /// count. Runs after [`Network::init`] and before any forward or
    /// backward call under the same seed.
    pub fn allocate(&self, root: NodeIndex, memo: &mut Memo) -> Result<(), NetError> {
        self.node(root)?;
        self.alloc_node(root, memo)?;
        trace!(seed = %memo.seed(), root = root.index(), "memo allocated");
        Ok(())
    }

    fn alloc_node(&self, id: NodeIndex, memo: &mut Memo) -> Result<(), NetError> {
        let needs_buffer = self.needs_buffer(id);
        let entry = memo
            .entry_mut(id)
            .ok_or_else(|| NetError::AliasingViolation {
                node: id.index(),
                reason: "allocate called before init under this seed".to_string(),
            })?;
        if entry.allocated {
            // Aliased subtree already sized earlier in this pass.
            return Ok(());
        }
        entry.allocated = true;
        if needs_buffer {
            entry.slots = vec![None; entry.num_mirrors];
            entry.slots_m = vec![None; entry.num_mirrors];
            entry.mirror_index = 0;
        }
        match self.plan(id) {
            Plan::Identity | Plan::Linear => Ok(()),
            Plan::Pair { first, second, .. } => {
                self.alloc_node(first, memo)?;
                self.alloc_node(second, memo)
            }
            Plan::Repeat { blocks } => {
                for block in blocks {
                    self.alloc_node(block, memo)?;
                }
                Ok(())
            }
        }
    }
}
