//! # Backward Evaluation
//!
//! Reverse-mode gradient propagation: given the gradient of some objective
//! with respect to a network's output, [`Network::backpropagate`] returns the
//! gradient with respect to its input, accumulating weight gradients in each
//! parametrized leaf along the way. The accumulated weight gradients are
//! harvested afterwards with [`Network::weight_gradient`].
//!
//! Traversal visits first-child-then-second (and `Repeat` blocks in index
//! order), the exact mirror of the forward pass in [`crate::forward`].
//! Combinators that retained forward output consume it here through the memo
//! ring buffers — always *before* recursing into their children, so the
//! stack discipline of [`crate::memo`] lines up.
//!
//! The module also provides [`grad_check`], which validates the analytic
//! gradient of a network against central finite differences.

use petgraph::graph::NodeIndex;
use thiserror::Error;
use tracing::debug;

use crate::error::NetError;
use crate::memo::{Memo, Seed};
use crate::network::{Network, Operand, PairOp, Plan};
use crate::tensor::{Matrix, Vector};
use crate::weights::{WeightBuffer, WeightPass};

impl Network {
    /// Propagate an output gradient back to an input gradient for a single
    /// vector. The same memo that carried the matching forward pass must be
    /// supplied.
    pub fn backpropagate(
        &mut self,
        root: NodeIndex,
        gradient: &Vector,
        memo: &mut Memo,
    ) -> Result<Vector, NetError> {
        self.expect_output_dim(root, gradient.width())?;
        self.backprop(root, gradient.clone(), memo)
    }

    /// Batch form of [`Network::backpropagate`]: each column of `gradient`
    /// is the output gradient of one sample.
    pub fn backpropagate_batch(
        &mut self,
        root: NodeIndex,
        gradient: &Matrix,
        memo: &mut Memo,
    ) -> Result<Matrix, NetError> {
        self.expect_output_dim(root, gradient.width())?;
        self.backprop(root, gradient.clone(), memo)
    }

    fn expect_output_dim(&self, root: NodeIndex, got: usize) -> Result<(), NetError> {
        let expected = self.node(root)?.output_dim;
        if got != expected {
            return Err(NetError::DimensionMismatch {
                what: "backpropagate gradient",
                expected,
                got,
            });
        }
        Ok(())
    }

    fn backprop<T: Operand>(
        &mut self,
        id: NodeIndex,
        g: T,
        memo: &mut Memo,
    ) -> Result<T, NetError> {
        match self.plan(id) {
            Plan::Identity => Ok(g),
            Plan::Linear => {
                let x: T = memo.pop(id)?;
                let state = self.linear_state_mut(id).expect("plan said Linear");
                Ok(T::linear_grad(state, &x, &g))
            }
            Plan::Pair { op, first, second } => match op {
                PairOp::Joint => {
                    let out1 = self.graph[first].output_dim;
                    let out2 = self.graph[second].output_dim;
                    let dx1 = self.backprop(first, g.segment(0, out1), memo)?;
                    let dx2 = self.backprop(second, g.segment(out1, out2), memo)?;
                    Ok(dx1.concat(&dx2))
                }
                PairOp::Chain => {
                    let mid = self.backprop(first, g, memo)?;
                    self.backprop(second, mid, memo)
                }
                PairOp::Share => {
                    let out1 = self.graph[first].output_dim;
                    let out2 = self.graph[second].output_dim;
                    let dx1 = self.backprop(first, g.segment(0, out1), memo)?;
                    let dx2 = self.backprop(second, g.segment(out1, out2), memo)?;
                    // One shared input: contributions sum.
                    Ok(dx1.add(&dx2))
                }
                PairOp::Add => {
                    let dx1 = self.backprop(first, g.clone(), memo)?;
                    let dx2 = self.backprop(second, g, memo)?;
                    Ok(dx1.concat(&dx2))
                }
                PairOp::Multiply => {
                    // Consume this node's retained pair before the children
                    // consume theirs.
                    let cached: T = memo.pop(id)?;
                    let out = self.graph[id].output_dim;
                    let y1 = cached.segment(0, out);
                    let y2 = cached.segment(out, out);
                    let dx1 = self.backprop(first, g.mul(&y2), memo)?;
                    let dx2 = self.backprop(second, g.mul(&y1), memo)?;
                    Ok(dx1.add(&dx2))
                }
            },
            Plan::Repeat { blocks } => {
                let block_out = self.graph[blocks[0]].output_dim;
                let mut parts: Option<T> = None;
                for (i, block) in blocks.into_iter().enumerate() {
                    let gi = g.segment(i * block_out, block_out);
                    let dxi = self.backprop(block, gi, memo)?;
                    parts = Some(match parts {
                        None => dxi,
                        Some(acc) => acc.concat(&dxi),
                    });
                }
                Ok(parts.expect("repeat has at least one block"))
            }
        }
    }
}

// ============================================================================
// Gradient checking
// ============================================================================

/// Failure modes of [`grad_check`].
#[derive(Debug, Error)]
pub enum GradCheckError {
    #[error(transparent)]
    Engine(#[from] NetError),
    #[error(
        "gradient mismatch at coordinate {coord}: analytical {analytical}, \
         numerical {numerical} (diff {diff})"
    )]
    Mismatch {
        coord: usize,
        analytical: f64,
        numerical: f64,
        diff: f64,
    },
}

/// Validate the analytic weight gradient of the network rooted at `root`
/// against central finite differences, under the objective `L = ½‖f(x)‖²`.
///
/// Every weight coordinate is perturbed by `±h` and the resulting slope is
/// compared to the analytic gradient with a relative tolerance. The
/// network's weights are restored before returning.
pub fn grad_check(
    net: &mut Network,
    root: NodeIndex,
    input: &Vector,
    h: f64,
    tolerance: f64,
) -> Result<(), GradCheckError> {
    let dim = {
        let mut pass = WeightPass::new(Seed::new("grad-check-dim"));
        net.weight_dim(root, &mut pass)
    };
    let original = net.weights(root, &mut WeightPass::new(Seed::new("grad-check-save")));

    // Analytic gradient in one forward/backward round trip.
    let mut memo = Memo::new(Seed::new("grad-check-analytic"));
    net.init(root, &mut memo)?;
    net.allocate(root, &mut memo)?;
    let y = net.apply(root, input, &mut memo)?;
    // dL/dy of L = ½‖y‖² is y itself.
    net.backpropagate(root, &y, &mut memo)?;
    let mut analytic = WeightBuffer::zeros(dim);
    net.weight_gradient(
        root,
        &mut WeightPass::new(Seed::new("grad-check-grad")),
        &mut analytic,
        1,
    )?;

    // Central differences, one coordinate at a time.
    let mut numerical = vec![0.0; dim];
    let mut perturbed = original.clone();
    for k in 0..dim {
        let saved = perturbed.data[k];

        perturbed.data[k] = saved + h;
        let plus = objective(net, root, input, &perturbed, &format!("grad-check-fd-{k}-plus"))?;

        perturbed.data[k] = saved - h;
        let minus = objective(
            net,
            root,
            input,
            &perturbed,
            &format!("grad-check-fd-{k}-minus"),
        )?;

        perturbed.data[k] = saved;
        numerical[k] = (plus - minus) / (2.0 * h);
    }

    net.set_weights(
        root,
        &mut WeightPass::new(Seed::new("grad-check-restore")),
        &WeightBuffer::from_vector(original),
    )?;

    for (k, (&a, &n)) in analytic.as_slice().iter().zip(&numerical).enumerate() {
        let diff = (a - n).abs();
        let scale = a.abs().max(n.abs()).max(1.0);
        if diff / scale > tolerance && diff > tolerance {
            return Err(GradCheckError::Mismatch {
                coord: k,
                analytical: a,
                numerical: n,
                diff,
            });
        }
    }
    debug!(coords = dim, "gradient check passed");
    Ok(())
}

fn objective(
    net: &mut Network,
    root: NodeIndex,
    input: &Vector,
    weights: &Vector,
    label: &str,
) -> Result<f64, NetError> {
    net.set_weights(
        root,
        &mut WeightPass::new(Seed::new(format!("{label}-set"))),
        &WeightBuffer::from_vector(weights.clone()),
    )?;
    let mut memo = Memo::new(Seed::new(label.to_string()));
    net.init(root, &mut memo)?;
    net.allocate(root, &mut memo)?;
    let y = net.apply(root, input, &mut memo)?;
    Ok(0.5 * y.as_slice().iter().map(|v| v * v).sum::<f64>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::Template;

    fn setup(tpl: &Template, label: &str) -> (Network, NodeIndex, Memo) {
        let mut net = Network::new();
        let root = net.create(tpl).unwrap();
        let mut memo = Memo::new(Seed::new(label));
        net.init(root, &mut memo).unwrap();
        net.allocate(root, &mut memo).unwrap();
        (net, root, memo)
    }

    #[test]
    fn test_identity_passes_gradient_through() {
        let tpl = Template::identity(2).repeat(2).unwrap();
        let (mut net, root, mut memo) = setup(&tpl, "bp-identity");

        net.apply(root, &Vector::from_vec(vec![1.0, 2.0, 3.0, 4.0]), &mut memo)
            .unwrap();
        let dx = net
            .backpropagate(root, &Vector::from_vec(vec![5.0, 6.0, 7.0, 8.0]), &mut memo)
            .unwrap();
        assert_eq!(dx.as_slice(), &[5.0, 6.0, 7.0, 8.0]);
    }

    #[test]
    fn test_share_sums_branch_gradients() {
        let tpl = Template::identity(2).share(Template::identity(2)).unwrap();
        let (mut net, root, mut memo) = setup(&tpl, "bp-share");

        net.apply(root, &Vector::from_vec(vec![1.0, 1.0]), &mut memo)
            .unwrap();
        let dx = net
            .backpropagate(root, &Vector::from_vec(vec![1.0, 2.0, 10.0, 20.0]), &mut memo)
            .unwrap();
        assert_eq!(dx.as_slice(), &[11.0, 22.0]);
    }

    #[test]
    fn test_add_splits_gradient_to_both_inputs() {
        let tpl = Template::identity(2).add(Template::identity(2)).unwrap();
        let (mut net, root, mut memo) = setup(&tpl, "bp-add");

        net.apply(root, &Vector::from_vec(vec![1.0, 2.0, 3.0, 4.0]), &mut memo)
            .unwrap();
        let dx = net
            .backpropagate(root, &Vector::from_vec(vec![5.0, 6.0]), &mut memo)
            .unwrap();
        assert_eq!(dx.as_slice(), &[5.0, 6.0, 5.0, 6.0]);
    }

    #[test]
    fn test_multiply_uses_partner_forward_values() {
        // f(x) = x ⊙ x, so df/dx = 2x.
        let tpl = Template::identity(3)
            .multiply(Template::identity(3))
            .unwrap();
        let (mut net, root, mut memo) = setup(&tpl, "bp-mul");

        net.apply(root, &Vector::from_vec(vec![1.0, -2.0, 3.0]), &mut memo)
            .unwrap();
        let dx = net
            .backpropagate(root, &Vector::from_vec(vec![1.0, 1.0, 1.0]), &mut memo)
            .unwrap();
        assert_eq!(dx.as_slice(), &[2.0, -4.0, 6.0]);
    }

    #[test]
    fn test_backprop_rejects_wrong_gradient_dimension() {
        let tpl = Template::identity(3);
        let (mut net, root, mut memo) = setup(&tpl, "bp-dim");

        let err = net
            .backpropagate(root, &Vector::from_vec(vec![1.0]), &mut memo)
            .unwrap_err();
        assert_eq!(
            err,
            NetError::DimensionMismatch {
                what: "backpropagate gradient",
                expected: 3,
                got: 1
            }
        );
    }

    #[test]
    fn test_backprop_without_forward_is_a_violation() {
        let tpl = Template::linear(2, 2);
        let (mut net, root, mut memo) = setup(&tpl, "bp-no-fwd");

        assert!(matches!(
            net.backpropagate(root, &Vector::from_vec(vec![1.0, 2.0]), &mut memo),
            Err(NetError::AliasingViolation { .. })
        ));
    }

    #[test]
    fn test_grad_check_linear_chain() {
        let tpl = Template::linear(3, 2).chain(Template::linear(4, 3)).unwrap();
        let mut net = Network::new();
        let root = net.create(&tpl).unwrap();

        let w = net.random_weights(root, &mut WeightPass::new(Seed::new("gc-chain-init")));
        net.set_weights(
            root,
            &mut WeightPass::new(Seed::new("gc-chain-set")),
            &WeightBuffer::from_vector(w),
        )
        .unwrap();

        let x = Vector::from_vec(vec![0.3, -0.7, 0.5, 0.1]);
        grad_check(&mut net, root, &x, 1e-5, 1e-4).unwrap();
    }

    #[test]
    fn test_grad_check_aliased_multiply() {
        // One physical linear instance feeding both factors of a product.
        let mut net = Network::new();
        let a = net.create(&Template::linear(3, 3)).unwrap();
        let alias = net.copy_of(a).unwrap();
        let root = net
            .create(&alias.clone().multiply(alias).unwrap())
            .unwrap();

        let w = net.random_weights(root, &mut WeightPass::new(Seed::new("gc-alias-init")));
        net.set_weights(
            root,
            &mut WeightPass::new(Seed::new("gc-alias-set")),
            &WeightBuffer::from_vector(w),
        )
        .unwrap();

        let x = Vector::from_vec(vec![0.4, -0.2, 0.9]);
        grad_check(&mut net, root, &x, 1e-5, 1e-4).unwrap();
    }
}
