//! # combinet - Compositional Neural Networks
//!
//! A small engine for building neural networks out of a closed algebra of
//! combinators, evaluating them forwards and backwards, and managing their
//! parameters through a flat weight protocol.
//!
//! ## Key Concepts
//!
//! | concept | type | role |
//! |---|---|---|
//! | Template | [`Template`] | immutable, parameter-free shape description |
//! | Network | [`Network`] | arena owning executable, parametrized instances |
//! | Memo | [`Memo`] | call-scoped retention for the backward pass |
//! | Weight protocol | [`WeightBuffer`], [`WeightPass`] | flat parameter get/set/random/dim/gradient |
//!
//! Templates compose with `joint`, `chain`, `share`, `add`, `multiply`, and
//! `repeat`; shape compatibility is checked at composition time. A template
//! is instantiated with [`Network::create`], and an existing instance can be
//! re-used in new structural positions through [`Network::copy_of`] —
//! aliasing that the memoization and weight subsystems account for exactly.
//!
//! ## Example
//!
//! ```rust
//! use combinet::{Memo, Network, Seed, Template, Vector};
//!
//! // Two independent identity lanes of width 2.
//! let template = Template::identity(2).repeat(2)?;
//!
//! let mut net = Network::new();
//! let root = net.create(&template)?;
//!
//! let mut memo = Memo::new(Seed::new("readme"));
//! net.init(root, &mut memo)?;
//! net.allocate(root, &mut memo)?;
//!
//! let y = net.apply(root, &Vector::from_vec(vec![1.0, 2.0, 3.0, 4.0]), &mut memo)?;
//! assert_eq!(y.as_slice(), &[1.0, 2.0, 3.0, 4.0]);
//! # Ok::<(), combinet::NetError>(())
//! ```

pub mod backward;
pub mod error;
pub mod forward;
pub mod memo;
pub mod network;
pub mod template;
pub mod tensor;
pub mod weights;

pub use backward::{grad_check, GradCheckError};
pub use error::NetError;
pub use memo::{Memo, Seed};
pub use network::Network;
pub use template::Template;
pub use tensor::{Matrix, Vector};
pub use weights::{WeightBuffer, WeightPass};

pub use petgraph::graph::NodeIndex;
