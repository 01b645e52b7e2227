//! Tests for the virtual LAN against an in-memory iproute2.
//!
//! Validates kernel object sequencing, address allocation, link toggling
//! and best-effort teardown without requiring privileges.

mod common;

use std::collections::HashSet;
use std::net::Ipv4Addr;

use common::{FakeIp, fake_sysctl};
use netfabric::{Error, Ipv4Subnet, VirtualLan};
use tempfile::TempDir;

fn subnet(cidr: &str) -> Ipv4Subnet {
    cidr.parse().unwrap()
}

async fn lan(fake: &std::sync::Arc<FakeIp>, dir: &TempDir, cidr: &str) -> VirtualLan {
    VirtualLan::with_sysctl(
        FakeIp::links(fake),
        "pgtest",
        subnet(cidr),
        fake_sysctl(dir.path()),
    )
    .await
    .unwrap()
}

// =============================================================================
// Creation
// =============================================================================

#[tokio::test]
async fn test_bridge_setup() {
    let dir = TempDir::new().unwrap();
    let fake = FakeIp::new();
    let mut lan = lan(&fake, &dir, "172.27.1.0/24").await;

    assert_eq!(lan.bridge(), "pgtest-br");
    assert_eq!(lan.bridge_address(), Ipv4Addr::new(172, 27, 1, 1));
    assert_eq!(fake.is_interface_up("pgtest-br"), Some(true));
    assert_eq!(
        fake.count(&["addr", "add", "172.27.1.1/24", "dev", "pgtest-br"]),
        1
    );
    assert_eq!(
        std::fs::read_to_string(dir.path().join("bridge-nf-call-iptables")).unwrap(),
        "0\n",
        "bridge netfilter should be disabled while the LAN exists"
    );

    assert!(lan.destroy().await.is_empty());
}

#[tokio::test]
async fn test_leftover_bridge_is_replaced() {
    let dir = TempDir::new().unwrap();
    let fake = FakeIp::new();
    fake.leak_interface("pgtest-br");

    let mut lan = lan(&fake, &dir, "172.27.1.0/24").await;

    let calls = fake.calls();
    let delete = calls
        .iter()
        .position(|c| c == &["link", "delete", "dev", "pgtest-br"])
        .expect("leftover bridge should be deleted");
    let add = calls
        .iter()
        .position(|c| c.starts_with(&["link".to_string(), "add".to_string()]))
        .expect("bridge should be created");
    assert!(delete < add, "leftover must be removed before creation");

    lan.destroy().await;
}

#[tokio::test]
async fn test_invalid_prefix_rejected() {
    let dir = TempDir::new().unwrap();
    let fake = FakeIp::new();

    let result = VirtualLan::with_sysctl(
        FakeIp::links(&fake),
        "much-too-long-prefix",
        subnet("172.27.1.0/24"),
        fake_sysctl(dir.path()),
    )
    .await;

    assert!(matches!(result, Err(Error::InvalidName { .. })));
    assert!(fake.calls().is_empty(), "nothing should reach the kernel");
}

#[tokio::test]
async fn test_nodes_get_unique_addresses() {
    let dir = TempDir::new().unwrap();
    let fake = FakeIp::new();
    let mut lan = lan(&fake, &dir, "172.27.1.0/24").await;

    let mut addresses = HashSet::new();
    addresses.insert(lan.bridge_address());
    for index in 0..3 {
        let node = lan.create_node().await.unwrap();
        assert_eq!(node.namespace(), format!("pgtest-{index}"));
        assert_eq!(node.veth_peer(), format!("pgtest-{index}p"));
        assert!(lan.subnet().contains(node.address()));
        assert!(addresses.insert(node.address()), "address reused");
        assert_eq!(fake.is_interface_up(node.veth_peer()), Some(true));
        assert_eq!(
            fake.count(&["link", "set", "dev", node.veth_peer(), "master", "pgtest-br"]),
            1
        );
    }

    assert_eq!(lan.nodes().len(), 3);
    assert_eq!(lan.nodes()[0].address(), Ipv4Addr::new(172, 27, 1, 2));
    assert_eq!(
        fake.namespaces(),
        vec!["pgtest-0", "pgtest-1", "pgtest-2"]
    );

    lan.destroy().await;
}

#[tokio::test]
async fn test_node_address_configured_inside_namespace() {
    let dir = TempDir::new().unwrap();
    let fake = FakeIp::new();
    let mut lan = lan(&fake, &dir, "10.20.0.0/16").await;

    let node = lan.create_node().await.unwrap();

    assert_eq!(node.prefix_len(), 16);
    assert_eq!(
        fake.count(&["-n", "pgtest-0", "addr", "add", "10.20.0.2/16", "dev", "veth0"]),
        1
    );
    assert_eq!(
        fake.count(&["-n", "pgtest-0", "link", "set", "dev", "lo", "up"]),
        1
    );

    lan.destroy().await;
}

#[tokio::test]
async fn test_subnet_exhaustion() {
    let dir = TempDir::new().unwrap();
    let fake = FakeIp::new();
    let mut lan = lan(&fake, &dir, "10.0.0.0/30").await;

    lan.create_node().await.unwrap();
    let err = lan.create_node().await.unwrap_err();

    assert!(matches!(err, Error::SubnetExhausted { .. }));
    assert_eq!(fake.namespaces().len(), 1);

    lan.destroy().await;
}

// =============================================================================
// Link State
// =============================================================================

#[tokio::test]
async fn test_ifdown_ifup() {
    let dir = TempDir::new().unwrap();
    let fake = FakeIp::new();
    let mut lan = lan(&fake, &dir, "172.27.1.0/24").await;
    let node = lan.create_node().await.unwrap();

    node.ifdown().await.unwrap();
    assert!(!node.is_link_up().await.unwrap());
    assert_eq!(fake.is_interface_up("pgtest-0p"), Some(false));

    node.ifup().await.unwrap();
    assert!(node.is_link_up().await.unwrap());

    lan.destroy().await;
}

// =============================================================================
// Teardown
// =============================================================================

#[tokio::test]
async fn test_destroy_removes_everything() {
    let dir = TempDir::new().unwrap();
    let fake = FakeIp::new();
    let mut lan = lan(&fake, &dir, "172.27.1.0/24").await;
    lan.create_node().await.unwrap();
    lan.create_node().await.unwrap();

    let errors = lan.destroy().await;

    assert!(errors.is_empty(), "unexpected errors: {errors:?}");
    assert!(lan.is_destroyed());
    assert!(fake.namespaces().is_empty());
    assert!(!fake.has_interface("pgtest-br"));
    assert!(!fake.has_interface("pgtest-0p"));
    assert!(lan.remaining_namespaces().await.unwrap().is_empty());
    assert_eq!(
        std::fs::read_to_string(dir.path().join("bridge-nf-call-iptables")).unwrap(),
        "1\n",
        "sysctl should be restored"
    );
}

#[tokio::test]
async fn test_destroy_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let fake = FakeIp::new();
    let mut lan = lan(&fake, &dir, "172.27.1.0/24").await;
    lan.create_node().await.unwrap();

    assert!(lan.destroy().await.is_empty());
    let calls = fake.calls().len();

    assert!(lan.destroy().await.is_empty());
    assert_eq!(fake.calls().len(), calls, "second destroy must be a no-op");
}

#[tokio::test]
async fn test_destroy_tolerates_vanished_objects() {
    let dir = TempDir::new().unwrap();
    let fake = FakeIp::new();
    let mut lan = lan(&fake, &dir, "172.27.1.0/24").await;
    let node = lan.create_node().await.unwrap();
    lan.create_node().await.unwrap();

    fake.vanish_namespace(node.namespace());
    fake.vanish_interface(node.veth_peer());
    fake.vanish_interface("pgtest-br");

    let errors = lan.destroy().await;
    assert!(errors.is_empty(), "absent objects are not errors: {errors:?}");
    assert!(fake.namespaces().is_empty());

    // Destroying a single node twice is fine too.
    node.destroy().await.unwrap();
}

#[tokio::test]
async fn test_destroy_continues_after_failure() {
    let dir = TempDir::new().unwrap();
    let fake = FakeIp::new();
    let mut lan = lan(&fake, &dir, "172.27.1.0/24").await;
    lan.create_node().await.unwrap();
    lan.create_node().await.unwrap();
    lan.create_node().await.unwrap();

    fake.fail_on("netns delete pgtest-1");
    let errors = lan.destroy().await;

    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], Error::KernelObject { .. }));
    assert_eq!(fake.namespaces(), vec!["pgtest-1"]);
    assert!(!fake.has_interface("pgtest-br"), "bridge still removed");
    assert_eq!(
        std::fs::read_to_string(dir.path().join("bridge-nf-call-iptables")).unwrap(),
        "1\n"
    );
}

#[tokio::test]
async fn test_unattached_node_is_removed() {
    let dir = TempDir::new().unwrap();
    let fake = FakeIp::new();
    let mut lan = lan(&fake, &dir, "172.27.1.0/24").await;

    fake.fail_on("master pgtest-br");
    let err = lan.create_node().await.unwrap_err();

    assert!(matches!(err, Error::KernelObject { .. }));
    assert!(fake.namespaces().is_empty(), "namespace must not leak");
    assert!(!fake.has_interface("pgtest-0p"), "veth peer must not leak");
    assert!(lan.nodes().is_empty());

    fake.clear_failure();
    let node = lan.create_node().await.unwrap();
    assert_eq!(node.namespace(), "pgtest-0");
    assert_eq!(
        node.address(),
        Ipv4Addr::new(172, 27, 1, 3),
        "addresses are never handed out twice"
    );

    assert!(lan.destroy().await.is_empty());
    assert!(fake.namespaces().is_empty());
}

#[tokio::test]
async fn test_partially_created_node_is_removed() {
    let dir = TempDir::new().unwrap();
    let fake = FakeIp::new();
    let mut lan = lan(&fake, &dir, "172.27.1.0/24").await;

    fake.fail_on("addr add 172.27.1.2/24 dev veth0");
    let err = lan.create_node().await.unwrap_err();

    assert!(matches!(err, Error::KernelObject { .. }));
    assert!(fake.namespaces().is_empty());
    assert!(!fake.has_interface("pgtest-0p"));
    assert!(lan.nodes().is_empty());

    fake.clear_failure();
    assert!(lan.destroy().await.is_empty());
}

#[tokio::test]
async fn test_create_node_after_destroy() {
    let dir = TempDir::new().unwrap();
    let fake = FakeIp::new();
    let mut lan = lan(&fake, &dir, "172.27.1.0/24").await;
    lan.destroy().await;

    let err = lan.create_node().await.unwrap_err();
    assert!(matches!(err, Error::NetworkDestroyed(ref prefix) if prefix == "pgtest"));
}

#[tokio::test]
async fn test_remaining_namespaces_filters_by_prefix() {
    let dir = TempDir::new().unwrap();
    let fake = FakeIp::new();
    let mut lan = lan(&fake, &dir, "172.27.1.0/24").await;
    lan.create_node().await.unwrap();
    lan.links().add_namespace("unrelated").await.unwrap();

    assert_eq!(lan.remaining_namespaces().await.unwrap(), vec!["pgtest-0"]);

    lan.destroy().await;
    assert_eq!(fake.namespaces(), vec!["unrelated"]);
}
