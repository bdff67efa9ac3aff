//! Unit tests for the server-side `PortRegistry`.

use pluggable_discovery::models::Port;
use pluggable_discovery::server::PortRegistry;

fn labelled(address: &str, label: &str) -> Port {
    let mut port = Port::new(address, "dummy");
    port.address_label = label.into();
    port
}

#[test]
fn new_registry_is_empty() {
    let registry = PortRegistry::new();
    assert!(registry.is_empty());
    assert!(registry.snapshot().is_empty());
}

#[test]
fn snapshot_lists_ports_in_first_seen_order() {
    let mut registry = PortRegistry::new();
    assert!(registry.add(Port::new("2", "dummy")));
    assert!(registry.add(Port::new("1", "dummy")));
    assert!(registry.add(Port::new("3", "dummy")));

    let addresses: Vec<String> = registry.snapshot().into_iter().map(|p| p.address).collect();
    assert_eq!(addresses, ["2", "1", "3"]);
}

#[test]
fn re_adding_refreshes_metadata_without_moving() {
    let mut registry = PortRegistry::new();
    registry.add(labelled("1", "old"));
    registry.add(labelled("2", "other"));
    assert!(!registry.add(labelled("1", "new")), "known port is not new");

    let snapshot = registry.snapshot();
    assert_eq!(registry.len(), 2);
    assert_eq!(snapshot[0].address_label, "new");
    assert_eq!(snapshot[1].address, "2");
}

#[test]
fn same_address_with_different_protocol_is_distinct() {
    let mut registry = PortRegistry::new();
    registry.add(Port::new("1", "dummy"));
    registry.add(Port::new("1", "serial"));
    assert_eq!(registry.len(), 2);
}

#[test]
fn remove_matches_by_identity_only() {
    let mut registry = PortRegistry::new();
    registry.add(labelled("1", "first"));
    registry.add(labelled("2", "second"));
    registry.add(labelled("3", "third"));

    let removed = registry.remove(&Port::new("2", "dummy")).expect("port 2 present");
    assert_eq!(removed.address_label, "second");

    let addresses: Vec<String> = registry.snapshot().into_iter().map(|p| p.address).collect();
    assert_eq!(addresses, ["1", "3"]);

    // Index stays consistent after the shift.
    assert!(registry.remove(&Port::new("3", "dummy")).is_some());
    assert!(registry.remove(&Port::new("1", "dummy")).is_some());
    assert!(registry.is_empty());
}

#[test]
fn removing_unknown_port_is_a_no_op() {
    let mut registry = PortRegistry::new();
    registry.add(Port::new("1", "dummy"));
    assert!(registry.remove(&Port::new("9", "dummy")).is_none());
    assert_eq!(registry.len(), 1);
}
