//! # Templates - The Combinator Algebra
//!
//! A [`Template`] is an immutable, parameter-free description of a network's
//! shape and composition. Templates are built from a closed algebra of
//! combinators and instantiated into executable instances by
//! [`Network::create`](crate::network::Network::create).
//!
//! ## Combinators
//!
//! | combinator | shape rule | meaning |
//! |---|---|---|
//! | [`joint`](Template::joint) | independent dims | `concat(f(x₁), g(x₂))`; dims add |
//! | [`chain`](Template::chain) | `f.input == g.output` | `f(g(x))` |
//! | [`share`](Template::share) | `f.input == g.input` | `concat(f(x), g(x))` |
//! | [`add`](Template::add) | `f.output == g.output` | `f(x₁) + g(x₂)` |
//! | [`multiply`](Template::multiply) | equal input and output dims | `f(x) ⊙ g(x)` |
//! | [`repeat`](Template::repeat) | `n ≥ 1` | `n` independent parallel copies |
//! | [`Network::copy_of`](crate::network::Network::copy_of) | n/a | reuse an already-created instance |
//!
//! Every shape rule is enforced here, at construction — an incompatible pair
//! never reaches instance creation or call time.
//!
//! ## Example
//!
//! ```rust
//! use combinet::Template;
//!
//! // Two identity lanes side by side: 2+2 in, 2+2 out.
//! let lanes = Template::identity(2).repeat(2)?;
//! assert_eq!(lanes.input_dim(), 4);
//! assert_eq!(lanes.output_dim(), 4);
//!
//! // Chaining requires the inner output to match the outer input.
//! assert!(Template::identity(3).chain(Template::identity(2)).is_err());
//! # Ok::<(), combinet::NetError>(())
//! ```

use petgraph::graph::NodeIndex;

use crate::error::NetError;

/// Structural kind of a template node.
///
/// A closed tagged variant: the combinator algebra is fixed, so
/// exhaustiveness is checked at compile time wherever templates are
/// traversed.
#[derive(Debug, Clone)]
pub(crate) enum TemplateKind {
    /// Parameterless leaf: `f(x) = x`.
    Identity,
    /// Parametrized leaf: `f(x) = W·x + b`.
    Linear,
    /// `concat(f(x₁), g(x₂))` over independent sub-inputs.
    Joint(Box<Template>, Box<Template>),
    /// `f(g(x))` — the first (outer) template is applied to the second's output.
    Chain(Box<Template>, Box<Template>),
    /// `concat(f(x), g(x))` over one shared input.
    Share(Box<Template>, Box<Template>),
    /// `f(x₁) + g(x₂)` over independent sub-inputs.
    Add(Box<Template>, Box<Template>),
    /// `f(x) ⊙ g(x)` over one shared input.
    Multiply(Box<Template>, Box<Template>),
    /// `n` independently-parametrized parallel copies of one template.
    Repeat(Box<Template>, usize),
    /// Alias of an instance already created in a specific network.
    Copy { network: u64, target: NodeIndex },
}

/// An immutable description of a network's shape and combinator structure.
///
/// Templates never hold parameters; instantiating the same template twice
/// yields two independently-parametrized instances.
#[derive(Debug, Clone)]
pub struct Template {
    pub(crate) kind: TemplateKind,
    input_dim: usize,
    output_dim: usize,
}

impl Template {
    pub(crate) fn with_dims(kind: TemplateKind, input_dim: usize, output_dim: usize) -> Self {
        Self {
            kind,
            input_dim,
            output_dim,
        }
    }

    /// The identity leaf: passes a `dim`-vector through unchanged.
    pub fn identity(dim: usize) -> Self {
        Self::with_dims(TemplateKind::Identity, dim, dim)
    }

    /// A fully-connected affine leaf: `f(x) = W·x + b` with a
    /// `output × input` weight matrix and an `output` bias.
    pub fn linear(input: usize, output: usize) -> Self {
        Self::with_dims(TemplateKind::Linear, input, output)
    }

    /// Dimension of the input this network expects.
    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    /// Dimension of the output this network produces.
    pub fn output_dim(&self) -> usize {
        self.output_dim
    }

    /// Parallel join over independent inputs: `concat(self(x₁), other(x₂))`.
    ///
    /// Input and output dimensions add; no compatibility constraint.
    pub fn joint(self, other: Template) -> Result<Template, NetError> {
        let (input, output) = (
            self.input_dim + other.input_dim,
            self.output_dim + other.output_dim,
        );
        Ok(Self::with_dims(
            TemplateKind::Joint(Box::new(self), Box::new(other)),
            input,
            output,
        ))
    }

    /// Sequential composition `self(inner(x))`: `inner` runs first and its
    /// output feeds `self`.
    ///
    /// Fails unless `self.input_dim == inner.output_dim`.
    pub fn chain(self, inner: Template) -> Result<Template, NetError> {
        if self.input_dim != inner.output_dim {
            return Err(NetError::ShapeMismatch {
                op: "chain",
                left: self.input_dim,
                right: inner.output_dim,
            });
        }
        let (input, output) = (inner.input_dim, self.output_dim);
        Ok(Self::with_dims(
            TemplateKind::Chain(Box::new(self), Box::new(inner)),
            input,
            output,
        ))
    }

    /// Input sharing: `concat(self(x), other(x))` over one input.
    ///
    /// Fails unless both templates expect the same input dimension.
    pub fn share(self, other: Template) -> Result<Template, NetError> {
        if self.input_dim != other.input_dim {
            return Err(NetError::ShapeMismatch {
                op: "share",
                left: self.input_dim,
                right: other.input_dim,
            });
        }
        let (input, output) = (self.input_dim, self.output_dim + other.output_dim);
        Ok(Self::with_dims(
            TemplateKind::Share(Box::new(self), Box::new(other)),
            input,
            output,
        ))
    }

    /// Elementwise sum over independent sub-inputs:
    /// `self(x₁) + other(x₂)`.
    ///
    /// Fails unless both templates produce the same output dimension.
    pub fn add(self, other: Template) -> Result<Template, NetError> {
        if self.output_dim != other.output_dim {
            return Err(NetError::ShapeMismatch {
                op: "add",
                left: self.output_dim,
                right: other.output_dim,
            });
        }
        let (input, output) = (self.input_dim + other.input_dim, self.output_dim);
        Ok(Self::with_dims(
            TemplateKind::Add(Box::new(self), Box::new(other)),
            input,
            output,
        ))
    }

    /// Elementwise product over one shared input: `self(x) ⊙ other(x)`.
    ///
    /// Fails unless both input and output dimensions agree. The backward
    /// pass of this combinator consults the memoization subsystem, since
    /// each branch's gradient needs the other branch's forward output.
    pub fn multiply(self, other: Template) -> Result<Template, NetError> {
        if self.input_dim != other.input_dim {
            return Err(NetError::ShapeMismatch {
                op: "multiply",
                left: self.input_dim,
                right: other.input_dim,
            });
        }
        if self.output_dim != other.output_dim {
            return Err(NetError::ShapeMismatch {
                op: "multiply",
                left: self.output_dim,
                right: other.output_dim,
            });
        }
        let (input, output) = (self.input_dim, self.output_dim);
        Ok(Self::with_dims(
            TemplateKind::Multiply(Box::new(self), Box::new(other)),
            input,
            output,
        ))
    }

    /// `n` independent parallel copies of `self`, each with its own
    /// parameters. Input and output are partitioned into `n` equal
    /// contiguous blocks, block `i` covering `[i·d, (i+1)·d)`.
    ///
    /// Fails when `n == 0`.
    pub fn repeat(self, n: usize) -> Result<Template, NetError> {
        if n == 0 {
            return Err(NetError::ShapeMismatch {
                op: "repeat",
                left: n,
                right: 1,
            });
        }
        let (input, output) = (self.input_dim * n, self.output_dim * n);
        Ok(Self::with_dims(
            TemplateKind::Repeat(Box::new(self), n),
            input,
            output,
        ))
    }
}
