//! # Forward Evaluation
//!
//! Maps `(network, input) → output` for a single vector or a whole batch.
//! The batch form is column-wise equivalent to applying the vector form to
//! every column independently.
//!
//! ## Evaluation Order
//!
//! Every two-child combinator evaluates its **second child before its
//! first**, and `Repeat` evaluates blocks in reverse index order. For most
//! combinators this is pure scheduling with no numeric effect, but it is
//! load-bearing wherever the memoization protocol is involved: backward
//! traversal visits first-then-second, and the ring-buffer stack discipline
//! in [`crate::memo`] relies on forward order being the exact mirror of
//! backward order.
//!
//! ## Example
//!
//! ```rust
//! use combinet::{Memo, Network, Seed, Template, Vector};
//!
//! let mut net = Network::new();
//! let root = net.create(&Template::identity(2).repeat(2)?)?;
//!
//! let mut memo = Memo::new(Seed::new("forward-pass"));
//! net.init(root, &mut memo)?;
//! net.allocate(root, &mut memo)?;
//!
//! let y = net.apply(root, &Vector::from_vec(vec![1.0, 2.0, 3.0, 4.0]), &mut memo)?;
//! assert_eq!(y.as_slice(), &[1.0, 2.0, 3.0, 4.0]);
//! # Ok::<(), combinet::NetError>(())
//! ```

use petgraph::graph::NodeIndex;

use crate::error::NetError;
use crate::memo::Memo;
use crate::network::{Network, Operand, PairOp, Plan};
use crate::tensor::{Matrix, Vector};

impl Network {
    /// Evaluate the network rooted at `root` on a single input vector.
    ///
    /// [`Network::init`] and [`Network::allocate`] must have run on the same
    /// memo first.
    pub fn apply(
        &self,
        root: NodeIndex,
        input: &Vector,
        memo: &mut Memo,
    ) -> Result<Vector, NetError> {
        self.expect_input_dim(root, input.width())?;
        self.eval(root, input, memo)
    }

    /// Evaluate the network on a batch: each column of `input` is one
    /// sample, and each column of the result is the corresponding output.
    pub fn apply_batch(
        &self,
        root: NodeIndex,
        input: &Matrix,
        memo: &mut Memo,
    ) -> Result<Matrix, NetError> {
        self.expect_input_dim(root, input.width())?;
        self.eval(root, input, memo)
    }

    fn expect_input_dim(&self, root: NodeIndex, got: usize) -> Result<(), NetError> {
        let expected = self.node(root)?.input_dim;
        if got != expected {
            return Err(NetError::DimensionMismatch {
                what: "apply input",
                expected,
                got,
            });
        }
        Ok(())
    }

    fn eval<T: Operand>(&self, id: NodeIndex, x: &T, memo: &mut Memo) -> Result<T, NetError> {
        match self.plan(id) {
            Plan::Identity => Ok(x.clone()),
            Plan::Linear => {
                let state = self.linear_state(id).expect("plan said Linear");
                let y = T::linear_apply(state, x);
                // Retain the input; backward needs it for the weight gradient.
                memo.push(id, x.clone())?;
                Ok(y)
            }
            Plan::Pair { op, first, second } => match op {
                PairOp::Joint => {
                    let in1 = self.graph[first].input_dim;
                    let in2 = self.graph[second].input_dim;
                    let y2 = self.eval(second, &x.segment(in1, in2), memo)?;
                    let y1 = self.eval(first, &x.segment(0, in1), memo)?;
                    Ok(y1.concat(&y2))
                }
                PairOp::Chain => {
                    let mid = self.eval(second, x, memo)?;
                    self.eval(first, &mid, memo)
                }
                PairOp::Share => {
                    let y2 = self.eval(second, x, memo)?;
                    let y1 = self.eval(first, x, memo)?;
                    Ok(y1.concat(&y2))
                }
                PairOp::Add => {
                    let in1 = self.graph[first].input_dim;
                    let in2 = self.graph[second].input_dim;
                    let y2 = self.eval(second, &x.segment(in1, in2), memo)?;
                    let y1 = self.eval(first, &x.segment(0, in1), memo)?;
                    Ok(y1.add(&y2))
                }
                PairOp::Multiply => {
                    let y2 = self.eval(second, x, memo)?;
                    let y1 = self.eval(first, x, memo)?;
                    let out = y1.mul(&y2);
                    // Retain both branch outputs; each branch's backward
                    // needs the other branch's forward result.
                    memo.push(id, y1.concat(&y2))?;
                    Ok(out)
                }
            },
            Plan::Repeat { blocks } => {
                let n = blocks.len();
                let block_in = self.graph[blocks[0]].input_dim;
                let mut outs: Vec<Option<T>> = vec![None; n];
                for i in (0..n).rev() {
                    let xi = x.segment(i * block_in, block_in);
                    outs[i] = Some(self.eval(blocks[i], &xi, memo)?);
                }
                let mut parts = outs.into_iter().map(|o| o.expect("block evaluated"));
                let head = parts.next().expect("repeat has at least one block");
                Ok(parts.fold(head, |acc, part| acc.concat(&part)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memo::Seed;
    use crate::template::Template;

    fn setup(tpl: &Template) -> (Network, NodeIndex, Memo) {
        let mut net = Network::new();
        let root = net.create(tpl).unwrap();
        let mut memo = Memo::new(Seed::new("forward-test"));
        net.init(root, &mut memo).unwrap();
        net.allocate(root, &mut memo).unwrap();
        (net, root, memo)
    }

    #[test]
    fn test_repeat_identity_passes_through() {
        let tpl = Template::identity(2).repeat(2).unwrap();
        let (net, root, mut memo) = setup(&tpl);

        let x = Vector::from_vec(vec![1.0, 2.0, 3.0, 4.0]);
        let y = net.apply(root, &x, &mut memo).unwrap();
        assert_eq!(y, x);
    }

    #[test]
    fn test_share_concatenates_first_then_second() {
        // Share(scale-by-W, identity): output is [W·x, x].
        let tpl = Template::linear(2, 1).share(Template::identity(2)).unwrap();
        let (mut net, root, mut memo) = setup(&tpl);

        // Set the linear leaf to sum its input: W = [1, 1], b = 0.
        let linear = net
            .graph
            .node_indices()
            .find(|&id| net.linear_state(id).is_some())
            .unwrap();
        net.linear_state_mut(linear)
            .unwrap()
            .assign(&[1.0, 1.0, 0.0]);

        let y = net
            .apply(root, &Vector::from_vec(vec![2.0, 3.0]), &mut memo)
            .unwrap();
        assert_eq!(y.as_slice(), &[5.0, 2.0, 3.0]);
    }

    #[test]
    fn test_multiply_identity_squares() {
        let tpl = Template::identity(3)
            .multiply(Template::identity(3))
            .unwrap();
        let (net, root, mut memo) = setup(&tpl);

        let y = net
            .apply(root, &Vector::from_vec(vec![1.0, -2.0, 3.0]), &mut memo)
            .unwrap();
        assert_eq!(y.as_slice(), &[1.0, 4.0, 9.0]);
    }

    #[test]
    fn test_add_splits_independent_inputs() {
        let tpl = Template::identity(2).add(Template::identity(2)).unwrap();
        let (net, root, mut memo) = setup(&tpl);

        let y = net
            .apply(root, &Vector::from_vec(vec![1.0, 2.0, 10.0, 20.0]), &mut memo)
            .unwrap();
        assert_eq!(y.as_slice(), &[11.0, 22.0]);
    }

    #[test]
    fn test_joint_keeps_lanes_separate() {
        let tpl = Template::identity(1).joint(Template::identity(2)).unwrap();
        let (net, root, mut memo) = setup(&tpl);

        let y = net
            .apply(root, &Vector::from_vec(vec![7.0, 8.0, 9.0]), &mut memo)
            .unwrap();
        assert_eq!(y.as_slice(), &[7.0, 8.0, 9.0]);
    }

    #[test]
    fn test_apply_rejects_wrong_dimension() {
        let tpl = Template::identity(3);
        let (net, root, mut memo) = setup(&tpl);

        let err = net
            .apply(root, &Vector::from_vec(vec![1.0, 2.0]), &mut memo)
            .unwrap_err();
        assert_eq!(
            err,
            NetError::DimensionMismatch {
                what: "apply input",
                expected: 3,
                got: 2
            }
        );
    }

    #[test]
    fn test_multiply_without_setup_fails_loudly() {
        let mut net = Network::new();
        let root = net
            .create(&Template::identity(2).multiply(Template::identity(2)).unwrap())
            .unwrap();
        let mut memo = Memo::new(Seed::new("missing-setup"));

        assert!(matches!(
            net.apply(root, &Vector::from_vec(vec![1.0, 2.0]), &mut memo),
            Err(NetError::AliasingViolation { .. })
        ));
    }
}
