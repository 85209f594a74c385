//! Construction-time behavior of the combinator algebra: shape rules,
//! instance creation, and aliasing.

use combinet::{NetError, Network, Template};

// ============================================================================
// Shape rules
// ============================================================================

#[test]
fn test_combinator_dimension_table() {
    // joint: dims add on both sides.
    let t = Template::linear(2, 3).joint(Template::linear(4, 5)).unwrap();
    assert_eq!((t.input_dim(), t.output_dim()), (6, 8));

    // chain: outer input must equal inner output; outer output survives.
    let t = Template::linear(3, 5).chain(Template::linear(2, 3)).unwrap();
    assert_eq!((t.input_dim(), t.output_dim()), (2, 5));

    // share: one input, outputs concatenate.
    let t = Template::linear(4, 2).share(Template::linear(4, 3)).unwrap();
    assert_eq!((t.input_dim(), t.output_dim()), (4, 5));

    // add: inputs concatenate, one output.
    let t = Template::linear(2, 3).add(Template::linear(5, 3)).unwrap();
    assert_eq!((t.input_dim(), t.output_dim()), (7, 3));

    // multiply: both sides must agree exactly.
    let t = Template::linear(3, 4).multiply(Template::linear(3, 4)).unwrap();
    assert_eq!((t.input_dim(), t.output_dim()), (3, 4));

    // repeat: both dims scale by the copy count.
    let t = Template::linear(2, 3).repeat(4).unwrap();
    assert_eq!((t.input_dim(), t.output_dim()), (8, 12));
}

#[test]
fn test_incompatible_pairs_fail_at_construction() {
    assert!(matches!(
        Template::linear(3, 5).chain(Template::linear(2, 4)),
        Err(NetError::ShapeMismatch { op: "chain", .. })
    ));
    assert!(matches!(
        Template::linear(4, 2).share(Template::linear(3, 2)),
        Err(NetError::ShapeMismatch { op: "share", .. })
    ));
    assert!(matches!(
        Template::linear(2, 3).add(Template::linear(2, 4)),
        Err(NetError::ShapeMismatch { op: "add", .. })
    ));
    assert!(matches!(
        Template::linear(3, 2).multiply(Template::linear(3, 3)),
        Err(NetError::ShapeMismatch { op: "multiply", .. })
    ));
    assert!(matches!(
        Template::identity(2).repeat(0),
        Err(NetError::ShapeMismatch { op: "repeat", .. })
    ));
}

#[test]
fn test_deeply_nested_composition() {
    // ((linear ∘ linear) shared with identity), two lanes of it.
    let branch = Template::linear(3, 2).chain(Template::linear(4, 3)).unwrap();
    let shared = branch.share(Template::identity(4)).unwrap();
    let t = shared.repeat(2).unwrap();

    assert_eq!(t.input_dim(), 8);
    assert_eq!(t.output_dim(), 12);
}

// ============================================================================
// Instance creation
// ============================================================================

#[test]
fn test_create_instantiates_independent_parameters() {
    let mut net = Network::new();
    let tpl = Template::linear(2, 2);

    // Instantiating one template twice yields two separate instances.
    let a = net.create(&tpl).unwrap();
    let b = net.create(&tpl).unwrap();
    assert_ne!(a, b);
    assert_eq!(net.node_count(), 2);
}

#[test]
fn test_repeat_blocks_are_distinct_instances() {
    let mut net = Network::new();
    let root = net
        .create(&Template::linear(2, 2).repeat(3).unwrap())
        .unwrap();

    assert_eq!(net.node_count(), 4);
    assert_eq!(net.input_dim(root), Some(6));
}

#[test]
fn test_dimensions_of_missing_node_are_none() {
    let mut donor = Network::new();
    let id = donor.create(&Template::identity(5)).unwrap();

    let empty = Network::new();
    assert_eq!(empty.input_dim(id), None);
    assert_eq!(empty.output_dim(id), None);
}

// ============================================================================
// Aliasing
// ============================================================================

#[test]
fn test_copy_shares_the_physical_instance() {
    let mut net = Network::new();
    let a = net.create(&Template::linear(3, 3)).unwrap();
    let alias = net.copy_of(a).unwrap();

    let root = net.create(&alias.clone().multiply(alias).unwrap()).unwrap();

    // Only one new node: the Multiply combinator itself.
    assert_eq!(net.node_count(), 2);
    assert_eq!(net.input_dim(root), Some(3));
}

#[test]
fn test_copy_template_reports_target_dims() {
    let mut net = Network::new();
    let a = net.create(&Template::linear(4, 2)).unwrap();
    let alias = net.copy_of(a).unwrap();

    assert_eq!(alias.input_dim(), 4);
    assert_eq!(alias.output_dim(), 2);
}

#[test]
fn test_copy_rejects_cross_network_use() {
    let mut donor = Network::new();
    let a = donor.create(&Template::identity(2)).unwrap();
    let alias = donor.copy_of(a).unwrap();

    let mut other = Network::new();
    assert!(matches!(
        other.create(&alias),
        Err(NetError::UnknownNode { .. })
    ));
}

#[test]
fn test_copy_of_missing_node_fails() {
    let mut net = Network::new();
    let a = net.create(&Template::identity(2)).unwrap();

    let mut other = Network::new();
    let _ = other.create(&Template::identity(2)).unwrap();
    // Index from a foreign arena may happen to exist here; an index past the
    // end must not.
    assert!(net.copy_of(combinet::NodeIndex::new(a.index() + 10)).is_err());
}

#[test]
fn test_dot_rendering_lists_structure() {
    let mut net = Network::new();
    net.create(
        &Template::linear(2, 3)
            .chain(Template::identity(2))
            .unwrap(),
    )
    .unwrap();

    let dot = net.to_dot();
    assert!(dot.contains("Chain 2→3"));
    assert!(dot.contains("first"));
    assert!(dot.contains("second"));
}
