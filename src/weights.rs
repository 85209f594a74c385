//! # The Weight Protocol
//!
//! Five traversals read or mutate the flat parameter segment of a network:
//! get, set, random, dimension, and gradient. All five walk the instance
//! tree first-child-then-second and must count every *physical* instance
//! exactly once, even when it is reachable through several structural paths
//! (aliasing). The guard is a per-call visited set carried by
//! [`WeightPass`]: a node already visited under the current pass contributes
//! the identity element of its operation — the empty vector for
//! concatenations, zero for sums — instead of recursing again.
//!
//! Segments are concatenated in a fixed order: a combinator's first-child
//! segment precedes its second-child segment, and `Repeat` blocks follow
//! index order. Leaves own their segment directly; parameterless leaves own
//! the empty segment.
//!
//! ## Example
//!
//! ```rust
//! use combinet::{Network, Seed, Template, WeightBuffer, WeightPass};
//!
//! let mut net = Network::new();
//! let root = net.create(&Template::linear(2, 3))?;
//!
//! let mut pass = WeightPass::new(Seed::new("dim-pass"));
//! assert_eq!(net.weight_dim(root, &mut pass), 2 * 3 + 3);
//! # Ok::<(), combinet::NetError>(())
//! ```

use std::collections::HashSet;

use petgraph::graph::NodeIndex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::debug;

use crate::error::NetError;
use crate::memo::Seed;
use crate::network::{Network, Plan};
use crate::tensor::Vector;

/// A flat numeric buffer addressed by offset ranges. Networks read, write,
/// and accumulate their parameter segments through this type.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightBuffer {
    data: Vec<f64>,
}

impl WeightBuffer {
    /// The sentinel buffer for zero-dimensional weights.
    pub fn empty() -> Self {
        Self { data: Vec::new() }
    }

    /// A zeroed buffer of the given length.
    pub fn zeros(len: usize) -> Self {
        Self {
            data: vec![0.0; len],
        }
    }

    /// Wrap existing values.
    pub fn from_vector(vector: Vector) -> Self {
        Self { data: vector.data }
    }

    /// Total length.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True for the zero-dimensional sentinel.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Borrow the contiguous sub-range `[offset, offset + len)`.
    pub fn read(&self, offset: usize, len: usize) -> &[f64] {
        &self.data[offset..offset + len]
    }

    /// Mutably borrow the contiguous sub-range `[offset, offset + len)`.
    pub fn range_mut(&mut self, offset: usize, len: usize) -> &mut [f64] {
        &mut self.data[offset..offset + len]
    }

    /// Borrow the whole buffer.
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }
}

/// Call-scoped state for one weight-protocol traversal: the seed, the
/// visited set guarding against double counting, and a seed-derived rng for
/// deterministic random initialization. Create a fresh pass for every
/// top-level protocol call — reusing one suppresses legitimate traversal.
pub struct WeightPass {
    seed: Seed,
    visited: HashSet<NodeIndex>,
    rng: StdRng,
}

impl WeightPass {
    /// Create a fresh pass scoped to one protocol call.
    pub fn new(seed: Seed) -> Self {
        let rng = StdRng::seed_from_u64(seed.rng_seed());
        Self {
            seed,
            visited: HashSet::new(),
            rng,
        }
    }

    /// The seed this pass is scoped to.
    pub fn seed(&self) -> &Seed {
        &self.seed
    }

    /// Mark a node visited; false if it already was under this pass.
    fn visit(&mut self, id: NodeIndex) -> bool {
        self.visited.insert(id)
    }
}

impl Network {
    /// Current parameters of the network rooted at `root`, concatenated in
    /// traversal order. Every physical instance contributes exactly once.
    pub fn weights(&self, root: NodeIndex, pass: &mut WeightPass) -> Vector {
        if !pass.visit(root) {
            return Vector::empty();
        }
        match self.plan(root) {
            Plan::Identity => Vector::empty(),
            Plan::Linear => self
                .linear_state(root)
                .expect("plan said Linear")
                .weights_vector(),
            Plan::Pair { first, second, .. } => {
                let w1 = self.weights(first, pass);
                let w2 = self.weights(second, pass);
                w1.concat(&w2)
            }
            Plan::Repeat { blocks } => blocks
                .into_iter()
                .fold(Vector::empty(), |acc, block| {
                    acc.concat(&self.weights(block, pass))
                }),
        }
    }

    /// Freshly sampled parameters with the same layout as
    /// [`Network::weights`], deterministic per seed token.
    pub fn random_weights(&self, root: NodeIndex, pass: &mut WeightPass) -> Vector {
        if !pass.visit(root) {
            return Vector::empty();
        }
        match self.plan(root) {
            Plan::Identity => Vector::empty(),
            Plan::Linear => {
                let state = self.linear_state(root).expect("plan said Linear");
                state.random_vector(&mut pass.rng)
            }
            Plan::Pair { first, second, .. } => {
                let w1 = self.random_weights(first, pass);
                let w2 = self.random_weights(second, pass);
                w1.concat(&w2)
            }
            Plan::Repeat { blocks } => blocks
                .into_iter()
                .fold(Vector::empty(), |acc, block| {
                    acc.concat(&self.random_weights(block, pass))
                }),
        }
    }

    /// Total number of flat weight coordinates under `root`, each physical
    /// instance counted once.
    pub fn weight_dim(&self, root: NodeIndex, pass: &mut WeightPass) -> usize {
        if !pass.visit(root) {
            return 0;
        }
        match self.plan(root) {
            Plan::Identity => 0,
            Plan::Linear => self.linear_state(root).expect("plan said Linear").dim(),
            Plan::Pair { first, second, .. } => {
                self.weight_dim(first, pass) + self.weight_dim(second, pass)
            }
            Plan::Repeat { blocks } => blocks
                .into_iter()
                .map(|block| self.weight_dim(block, pass))
                .sum(),
        }
    }

    /// Distribute a flat buffer over the network's parameter segments in
    /// traversal order. The buffer length must equal the total weight
    /// dimension.
    pub fn set_weights(
        &mut self,
        root: NodeIndex,
        pass: &mut WeightPass,
        buffer: &WeightBuffer,
    ) -> Result<(), NetError> {
        let expected = {
            let mut dim_pass = WeightPass::new(pass.seed().clone());
            self.weight_dim(root, &mut dim_pass)
        };
        if buffer.len() != expected {
            return Err(NetError::WeightLength {
                expected,
                got: buffer.len(),
            });
        }
        debug!(seed = %pass.seed(), len = buffer.len(), "setting weights");
        self.distribute(root, pass, buffer, 0)?;
        Ok(())
    }

    fn distribute(
        &mut self,
        id: NodeIndex,
        pass: &mut WeightPass,
        buffer: &WeightBuffer,
        offset: usize,
    ) -> Result<usize, NetError> {
        if !pass.visit(id) {
            return Ok(0);
        }
        match self.plan(id) {
            Plan::Identity => Ok(0),
            Plan::Linear => {
                let dim = self.linear_state(id).expect("plan said Linear").dim();
                let segment = buffer.read(offset, dim).to_vec();
                self.linear_state_mut(id)
                    .expect("plan said Linear")
                    .assign(&segment);
                Ok(dim)
            }
            Plan::Pair { first, second, .. } => {
                let used = self.distribute(first, pass, buffer, offset)?;
                let used2 = self.distribute(second, pass, buffer, offset + used)?;
                Ok(used + used2)
            }
            Plan::Repeat { blocks } => {
                let mut used = 0;
                for block in blocks {
                    used += self.distribute(block, pass, buffer, offset + used)?;
                }
                Ok(used)
            }
        }
    }

    /// Write each parametrized leaf's accumulated gradient, averaged over
    /// `samples`, into its segment of `gradient`, clearing the
    /// accumulators. Returns the sum over leaves of the squared L2 norm of
    /// the written segments.
    pub fn weight_gradient(
        &mut self,
        root: NodeIndex,
        pass: &mut WeightPass,
        gradient: &mut WeightBuffer,
        samples: usize,
    ) -> Result<f64, NetError> {
        if samples == 0 {
            return Err(NetError::ZeroSamples);
        }
        let expected = {
            let mut dim_pass = WeightPass::new(pass.seed().clone());
            self.weight_dim(root, &mut dim_pass)
        };
        if gradient.len() != expected {
            return Err(NetError::WeightLength {
                expected,
                got: gradient.len(),
            });
        }
        debug!(seed = %pass.seed(), samples, "collecting weight gradient");
        let (_, norm_sq) = self.collect_gradient(root, pass, gradient, 0, samples)?;
        Ok(norm_sq)
    }

    fn collect_gradient(
        &mut self,
        id: NodeIndex,
        pass: &mut WeightPass,
        gradient: &mut WeightBuffer,
        offset: usize,
        samples: usize,
    ) -> Result<(usize, f64), NetError> {
        if !pass.visit(id) {
            return Ok((0, 0.0));
        }
        match self.plan(id) {
            Plan::Identity => Ok((0, 0.0)),
            Plan::Linear => {
                let state = self.linear_state_mut(id).expect("plan said Linear");
                let dim = state.dim();
                let norm_sq = state.gradient_into(gradient.range_mut(offset, dim), samples);
                Ok((dim, norm_sq))
            }
            Plan::Pair { first, second, .. } => {
                let (used, norm) = self.collect_gradient(first, pass, gradient, offset, samples)?;
                let (used2, norm2) =
                    self.collect_gradient(second, pass, gradient, offset + used, samples)?;
                Ok((used + used2, norm + norm2))
            }
            Plan::Repeat { blocks } => {
                let mut used = 0;
                let mut norm = 0.0;
                for block in blocks {
                    let (u, s) =
                        self.collect_gradient(block, pass, gradient, offset + used, samples)?;
                    used += u;
                    norm += s;
                }
                Ok((used, norm))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::Template;

    #[test]
    fn test_weight_dim_counts_distinct_instances() {
        let mut net = Network::new();
        // Two independent linear blocks: each 2·2 + 2 = 6 coordinates.
        let root = net
            .create(&Template::linear(2, 2).repeat(2).unwrap())
            .unwrap();
        let mut pass = WeightPass::new(Seed::new("dim"));
        assert_eq!(net.weight_dim(root, &mut pass), 12);
    }

    #[test]
    fn test_aliased_instance_counts_once() {
        let mut net = Network::new();
        let a = net.create(&Template::linear(3, 3)).unwrap();
        let alias = net.copy_of(a).unwrap();
        let root = net
            .create(&alias.clone().multiply(alias).unwrap())
            .unwrap();

        let mut pass = WeightPass::new(Seed::new("dedup"));
        assert_eq!(net.weight_dim(root, &mut pass), 3 * 3 + 3);
    }

    #[test]
    fn test_set_then_get_round_trips() {
        let mut net = Network::new();
        let root = net
            .create(&Template::linear(2, 1).share(Template::linear(2, 2)).unwrap())
            .unwrap();

        let values: Vec<f64> = (0..9).map(|i| i as f64 / 4.0).collect();
        net.set_weights(
            root,
            &mut WeightPass::new(Seed::new("set-1")),
            &WeightBuffer::from_vector(Vector::from_vec(values.clone())),
        )
        .unwrap();

        let read = net.weights(root, &mut WeightPass::new(Seed::new("get-1")));
        assert_eq!(read.data, values);

        // Writing back what was read changes nothing.
        net.set_weights(
            root,
            &mut WeightPass::new(Seed::new("set-2")),
            &WeightBuffer::from_vector(read),
        )
        .unwrap();
        let reread = net.weights(root, &mut WeightPass::new(Seed::new("get-2")));
        assert_eq!(reread.data, values);
    }

    #[test]
    fn test_set_weights_rejects_wrong_length() {
        let mut net = Network::new();
        let root = net.create(&Template::linear(2, 2)).unwrap();

        let err = net
            .set_weights(
                root,
                &mut WeightPass::new(Seed::new("bad-len")),
                &WeightBuffer::zeros(5),
            )
            .unwrap_err();
        assert_eq!(
            err,
            NetError::WeightLength {
                expected: 6,
                got: 5
            }
        );
    }

    #[test]
    fn test_weight_gradient_rejects_zero_samples() {
        let mut net = Network::new();
        let root = net.create(&Template::linear(2, 2)).unwrap();

        let mut grad = WeightBuffer::zeros(6);
        let err = net
            .weight_gradient(
                root,
                &mut WeightPass::new(Seed::new("zero-samples")),
                &mut grad,
                0,
            )
            .unwrap_err();
        assert_eq!(err, NetError::ZeroSamples);
    }

    #[test]
    fn test_random_weights_deterministic_per_seed() {
        let mut net = Network::new();
        let root = net
            .create(&Template::linear(3, 2).repeat(2).unwrap())
            .unwrap();

        let a = net.random_weights(root, &mut WeightPass::new(Seed::new("rand-7")));
        let b = net.random_weights(root, &mut WeightPass::new(Seed::new("rand-7")));
        let c = net.random_weights(root, &mut WeightPass::new(Seed::new("rand-8")));

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 2 * (3 * 2 + 2));
    }

    #[test]
    fn test_parameterless_network_has_empty_weights() {
        let mut net = Network::new();
        let root = net
            .create(&Template::identity(2).joint(Template::identity(3)).unwrap())
            .unwrap();

        let mut pass = WeightPass::new(Seed::new("empty"));
        assert_eq!(net.weight_dim(root, &mut pass), 0);
        let w = net.weights(root, &mut WeightPass::new(Seed::new("empty-2")));
        assert!(w.is_empty());
    }
}
