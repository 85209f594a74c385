//! # Networks - The Instance Arena
//!
//! A [`Network`] owns every executable instance created from templates.
//! Instances live in a petgraph [`DiGraph`] used as an arena: the stable
//! [`NodeIndex`] is the instance's identity, combinator instances hold the
//! indices of their children, and child edges are mirrored into the graph so
//! the topology can be rendered with `petgraph::dot`.
//!
//! ## Aliasing
//!
//! Holding indices instead of owned children is what makes aliasing sound:
//! [`Network::copy_of`] hands out a template that resolves to an *existing*
//! index at create time, so one physical instance can sit under several
//! parents. Aliases cannot form cycles — a node's children are fixed at
//! creation and only ever reference nodes that already exist.
//!
//! ## Example
//!
//! ```rust
//! use combinet::{Network, Template};
//!
//! let mut net = Network::new();
//! let root = net.create(&Template::linear(3, 2).chain(Template::identity(3))?)?;
//! assert_eq!(net.input_dim(root), Some(3));
//! assert_eq!(net.output_dim(root), Some(2));
//! # Ok::<(), combinet::NetError>(())
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use petgraph::dot::{Config, Dot};
use petgraph::graph::{DiGraph, NodeIndex};
use rand::Rng;
use tracing::trace;

use crate::error::NetError;
use crate::memo::MemoEntry;
use crate::template::{Template, TemplateKind};
use crate::tensor::{Matrix, Vector};

static NETWORK_TAG: AtomicU64 = AtomicU64::new(0);

/// Parameters and gradient accumulators of a linear leaf.
///
/// Weight layout in the flat protocol: the `output × input` matrix in
/// row-major order, followed by the bias.
#[derive(Debug, Clone)]
pub(crate) struct LinearState {
    pub(crate) weight: Matrix,
    pub(crate) bias: Vector,
    grad_weight: Matrix,
    grad_bias: Vector,
}

impl LinearState {
    fn new(input: usize, output: usize) -> Self {
        Self {
            weight: Matrix::zeros(output, input),
            bias: Vector::zeros(output),
            grad_weight: Matrix::zeros(output, input),
            grad_bias: Vector::zeros(output),
        }
    }

    /// Number of flat weight coordinates.
    pub(crate) fn dim(&self) -> usize {
        self.weight.data.len() + self.bias.len()
    }

    /// Current parameters as one flat segment.
    pub(crate) fn weights_vector(&self) -> Vector {
        Vector::from_vec(self.weight.data.clone()).concat(&self.bias)
    }

    /// Overwrite parameters from one flat segment.
    pub(crate) fn assign(&mut self, segment: &[f64]) {
        let split = self.weight.data.len();
        self.weight.data.copy_from_slice(&segment[..split]);
        self.bias.data.copy_from_slice(&segment[split..]);
    }

    /// Freshly sampled parameters, scaled by `1/√input` so layer outputs
    /// stay at unit order regardless of fan-in.
    pub(crate) fn random_vector(&self, rng: &mut impl Rng) -> Vector {
        let scale = 1.0 / (self.weight.cols.max(1) as f64).sqrt();
        Vector::random(self.dim(), rng, scale)
    }

    /// Write the accumulated gradient, averaged over `samples`, into
    /// `segment`, clear the accumulators, and return the squared L2 norm of
    /// what was written.
    pub(crate) fn gradient_into(&mut self, segment: &mut [f64], samples: usize) -> f64 {
        let inv = 1.0 / samples as f64;
        let split = self.grad_weight.data.len();
        let mut norm_sq = 0.0;
        for (dst, src) in segment[..split].iter_mut().zip(&self.grad_weight.data) {
            *dst = src * inv;
            norm_sq += *dst * *dst;
        }
        for (dst, src) in segment[split..].iter_mut().zip(&self.grad_bias.data) {
            *dst = src * inv;
            norm_sq += *dst * *dst;
        }
        self.grad_weight = Matrix::zeros(self.grad_weight.rows, self.grad_weight.cols);
        self.grad_bias = Vector::zeros(self.grad_bias.len());
        norm_sq
    }
}

/// Executable kind of an instance node. Combinators hold child indices;
/// leaves hold their own state.
#[derive(Debug)]
pub(crate) enum InstanceKind {
    Identity,
    Linear(LinearState),
    Joint { first: NodeIndex, second: NodeIndex },
    Chain { first: NodeIndex, second: NodeIndex },
    Share { first: NodeIndex, second: NodeIndex },
    Add { first: NodeIndex, second: NodeIndex },
    Multiply { first: NodeIndex, second: NodeIndex },
    Repeat { blocks: Vec<NodeIndex> },
}

/// One instance in the arena.
#[derive(Debug)]
pub(crate) struct InstanceNode {
    pub(crate) kind: InstanceKind,
    pub(crate) input_dim: usize,
    pub(crate) output_dim: usize,
}

impl InstanceNode {
    fn label(&self) -> &'static str {
        match self.kind {
            InstanceKind::Identity => "Identity",
            InstanceKind::Linear(_) => "Linear",
            InstanceKind::Joint { .. } => "Joint",
            InstanceKind::Chain { .. } => "Chain",
            InstanceKind::Share { .. } => "Share",
            InstanceKind::Add { .. } => "Add",
            InstanceKind::Multiply { .. } => "Multiply",
            InstanceKind::Repeat { .. } => "Repeat",
        }
    }
}

impl fmt::Display for InstanceNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}→{}", self.label(), self.input_dim, self.output_dim)
    }
}

/// Which child slot an arena edge represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChildRole {
    First,
    Second,
    Block(usize),
}

impl fmt::Display for ChildRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChildRole::First => write!(f, "first"),
            ChildRole::Second => write!(f, "second"),
            ChildRole::Block(i) => write!(f, "block {i}"),
        }
    }
}

/// Dispatch plan for one node: the lightweight copy of its structure that
/// forward/backward traversals match on, so recursion never holds a borrow
/// of the arena across child calls.
#[derive(Debug, Clone)]
pub(crate) enum Plan {
    Identity,
    Linear,
    Pair {
        op: PairOp,
        first: NodeIndex,
        second: NodeIndex,
    },
    Repeat {
        blocks: Vec<NodeIndex>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PairOp {
    Joint,
    Chain,
    Share,
    Add,
    Multiply,
}

/// The arena of executable instances.
pub struct Network {
    pub(crate) graph: DiGraph<InstanceNode, ChildRole>,
    tag: u64,
}

impl Network {
    /// Create an empty network.
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            tag: NETWORK_TAG.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Instantiate a template, recursively creating instances for its
    /// children. Every call produces independently-parametrized instances;
    /// only [`Network::copy_of`] templates resolve to existing nodes.
    pub fn create(&mut self, template: &Template) -> Result<NodeIndex, NetError> {
        let id = match &template.kind {
            TemplateKind::Identity => self.insert(
                InstanceKind::Identity,
                template.input_dim(),
                template.output_dim(),
            ),
            TemplateKind::Linear => self.insert(
                InstanceKind::Linear(LinearState::new(
                    template.input_dim(),
                    template.output_dim(),
                )),
                template.input_dim(),
                template.output_dim(),
            ),
            TemplateKind::Joint(f, g) => {
                let (first, second) = (self.create(f)?, self.create(g)?);
                self.insert_pair(PairOp::Joint, first, second, template)
            }
            TemplateKind::Chain(f, g) => {
                let (first, second) = (self.create(f)?, self.create(g)?);
                self.insert_pair(PairOp::Chain, first, second, template)
            }
            TemplateKind::Share(f, g) => {
                let (first, second) = (self.create(f)?, self.create(g)?);
                self.insert_pair(PairOp::Share, first, second, template)
            }
            TemplateKind::Add(f, g) => {
                let (first, second) = (self.create(f)?, self.create(g)?);
                self.insert_pair(PairOp::Add, first, second, template)
            }
            TemplateKind::Multiply(f, g) => {
                let (first, second) = (self.create(f)?, self.create(g)?);
                self.insert_pair(PairOp::Multiply, first, second, template)
            }
            TemplateKind::Repeat(inner, n) => {
                let blocks = (0..*n)
                    .map(|_| self.create(inner))
                    .collect::<Result<Vec<_>, _>>()?;
                let id = self.insert(
                    InstanceKind::Repeat {
                        blocks: blocks.clone(),
                    },
                    template.input_dim(),
                    template.output_dim(),
                );
                for (i, block) in blocks.into_iter().enumerate() {
                    self.graph.add_edge(id, block, ChildRole::Block(i));
                }
                id
            }
            TemplateKind::Copy { network, target } => {
                if *network != self.tag || self.graph.node_weight(*target).is_none() {
                    return Err(NetError::UnknownNode {
                        index: target.index(),
                    });
                }
                *target
            }
        };
        trace!(node = id.index(), kind = self.graph[id].label(), "instance created");
        Ok(id)
    }

    /// A template that aliases an already-created instance, letting one
    /// parameter set occupy several structural positions. All protocol
    /// calls on the alias reach the original node.
    pub fn copy_of(&self, target: NodeIndex) -> Result<Template, NetError> {
        let node = self
            .graph
            .node_weight(target)
            .ok_or(NetError::UnknownNode {
                index: target.index(),
            })?;
        Ok(Template::with_dims(
            TemplateKind::Copy {
                network: self.tag,
                target,
            },
            node.input_dim,
            node.output_dim,
        ))
    }

    /// Input dimension of an instance, if it exists.
    pub fn input_dim(&self, id: NodeIndex) -> Option<usize> {
        self.graph.node_weight(id).map(|n| n.input_dim)
    }

    /// Output dimension of an instance, if it exists.
    pub fn output_dim(&self, id: NodeIndex) -> Option<usize> {
        self.graph.node_weight(id).map(|n| n.output_dim)
    }

    /// Number of instances in the arena.
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Render the instance graph in Graphviz dot format.
    pub fn to_dot(&self) -> String {
        format!(
            "{}",
            Dot::with_config(&self.graph, &[Config::GraphContentOnly])
        )
    }

    fn insert(&mut self, kind: InstanceKind, input_dim: usize, output_dim: usize) -> NodeIndex {
        self.graph.add_node(InstanceNode {
            kind,
            input_dim,
            output_dim,
        })
    }

    fn insert_pair(
        &mut self,
        op: PairOp,
        first: NodeIndex,
        second: NodeIndex,
        template: &Template,
    ) -> NodeIndex {
        let kind = match op {
            PairOp::Joint => InstanceKind::Joint { first, second },
            PairOp::Chain => InstanceKind::Chain { first, second },
            PairOp::Share => InstanceKind::Share { first, second },
            PairOp::Add => InstanceKind::Add { first, second },
            PairOp::Multiply => InstanceKind::Multiply { first, second },
        };
        let id = self.insert(kind, template.input_dim(), template.output_dim());
        self.graph.add_edge(id, first, ChildRole::First);
        self.graph.add_edge(id, second, ChildRole::Second);
        id
    }

    pub(crate) fn node(&self, id: NodeIndex) -> Result<&InstanceNode, NetError> {
        self.graph
            .node_weight(id)
            .ok_or(NetError::UnknownNode { index: id.index() })
    }

    /// Copy out the structure needed to traverse one node.
    pub(crate) fn plan(&self, id: NodeIndex) -> Plan {
        match &self.graph[id].kind {
            InstanceKind::Identity => Plan::Identity,
            InstanceKind::Linear(_) => Plan::Linear,
            InstanceKind::Joint { first, second } => Plan::Pair {
                op: PairOp::Joint,
                first: *first,
                second: *second,
            },
            InstanceKind::Chain { first, second } => Plan::Pair {
                op: PairOp::Chain,
                first: *first,
                second: *second,
            },
            InstanceKind::Share { first, second } => Plan::Pair {
                op: PairOp::Share,
                first: *first,
                second: *second,
            },
            InstanceKind::Add { first, second } => Plan::Pair {
                op: PairOp::Add,
                first: *first,
                second: *second,
            },
            InstanceKind::Multiply { first, second } => Plan::Pair {
                op: PairOp::Multiply,
                first: *first,
                second: *second,
            },
            InstanceKind::Repeat { blocks } => Plan::Repeat {
                blocks: blocks.clone(),
            },
        }
    }

    pub(crate) fn linear_state(&self, id: NodeIndex) -> Option<&LinearState> {
        match &self.graph[id].kind {
            InstanceKind::Linear(state) => Some(state),
            _ => None,
        }
    }

    pub(crate) fn linear_state_mut(&mut self, id: NodeIndex) -> Option<&mut LinearState> {
        match &mut self.graph[id].kind {
            InstanceKind::Linear(state) => Some(state),
            _ => None,
        }
    }

    /// Whether this node retains forward output in the memo ring buffer.
    pub(crate) fn needs_buffer(&self, id: NodeIndex) -> bool {
        matches!(
            self.graph[id].kind,
            InstanceKind::Linear(_) | InstanceKind::Multiply { .. }
        )
    }
}

impl Default for Network {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Operand: the seam between vector and batch evaluation
// ============================================================================

/// Everything forward/backward traversal needs from a payload, implemented
/// for single vectors and for batches. The batch form is column-wise
/// equivalent to the vector form by construction.
pub(crate) trait Operand: Clone {
    /// Feature length: vector length, or matrix row count.
    fn width(&self) -> usize;

    /// Feature-wise concatenation.
    fn concat(&self, other: &Self) -> Self;

    /// Feature-wise sub-range, inverse of `concat`.
    fn segment(&self, offset: usize, len: usize) -> Self;

    /// Elementwise sum.
    fn add(&self, other: &Self) -> Self;

    /// Elementwise product.
    fn mul(&self, other: &Self) -> Self;

    /// Affine leaf forward: `W·x + b`.
    fn linear_apply(state: &LinearState, x: &Self) -> Self;

    /// Affine leaf backward: accumulate `dW`, `db` and return `Wᵀ·g`.
    fn linear_grad(state: &mut LinearState, x: &Self, g: &Self) -> Self;

    /// The memo ring buffer carrying this payload form.
    fn slots(entry: &mut MemoEntry) -> &mut Vec<Option<Self>>;
}

impl Operand for Vector {
    fn width(&self) -> usize {
        self.len()
    }

    fn concat(&self, other: &Self) -> Self {
        Vector::concat(self, other)
    }

    fn segment(&self, offset: usize, len: usize) -> Self {
        self.slice(offset, len)
    }

    fn add(&self, other: &Self) -> Self {
        Vector::add(self, other)
    }

    fn mul(&self, other: &Self) -> Self {
        Vector::mul(self, other)
    }

    fn linear_apply(state: &LinearState, x: &Self) -> Self {
        state.weight.matvec(x).add(&state.bias)
    }

    fn linear_grad(state: &mut LinearState, x: &Self, g: &Self) -> Self {
        let dx = state.weight.tr_matvec(g);
        state.grad_weight = state.grad_weight.add(&g.outer(x));
        state.grad_bias = state.grad_bias.add(g);
        dx
    }

    fn slots(entry: &mut MemoEntry) -> &mut Vec<Option<Self>> {
        &mut entry.slots
    }
}

impl Operand for Matrix {
    fn width(&self) -> usize {
        self.rows
    }

    fn concat(&self, other: &Self) -> Self {
        self.vstack(other)
    }

    fn segment(&self, offset: usize, len: usize) -> Self {
        self.row_slice(offset, len)
    }

    fn add(&self, other: &Self) -> Self {
        Matrix::add(self, other)
    }

    fn mul(&self, other: &Self) -> Self {
        Matrix::mul(self, other)
    }

    fn linear_apply(state: &LinearState, x: &Self) -> Self {
        state.weight.matmul(x).add_column_broadcast(&state.bias)
    }

    fn linear_grad(state: &mut LinearState, x: &Self, g: &Self) -> Self {
        let dx = state.weight.transpose().matmul(g);
        state.grad_weight = state.grad_weight.add(&g.matmul(&x.transpose()));
        state.grad_bias = state.grad_bias.add(&g.row_sums());
        dx
    }

    fn slots(entry: &mut MemoEntry) -> &mut Vec<Option<Self>> {
        &mut entry.slots_m
    }
}
