//! Tests for harness configuration loading and validation.

use std::path::PathBuf;
use std::time::Duration;

use netfabric::{Error, HarnessConfig};
use tempfile::TempDir;

// =============================================================================
// Parsing
// =============================================================================

#[test]
fn test_full_yaml() {
    let yaml = r#"
network_prefix: ha
subnet: 10.42.0.0/24
command_timeout: 2m
state_change_timeout: 3m 30s
poll_interval: 500ms
user: docker
programs:
  pg_autoctl: /usr/lib/postgresql/16/bin/pg_autoctl
bridge_sysctl: /tmp/bridge-nf-call-iptables
env:
  PGHOST: localhost
  PG_AUTOCTL_DEBUG: "1"
"#;

    let config = HarnessConfig::from_yaml_str(yaml, "inline").unwrap();

    assert_eq!(config.network_prefix, "ha");
    assert_eq!(config.subnet, "10.42.0.0/24");
    assert_eq!(config.command_timeout, Duration::from_secs(120));
    assert_eq!(config.state_change_timeout, Duration::from_secs(210));
    assert_eq!(config.poll_interval, Duration::from_millis(500));
    assert_eq!(config.user.as_deref(), Some("docker"));
    assert_eq!(
        config.programs.pg_autoctl,
        Some(PathBuf::from("/usr/lib/postgresql/16/bin/pg_autoctl"))
    );
    assert_eq!(config.programs.psql, None);
    assert_eq!(config.env.len(), 2, "env replaces the defaults entirely");
    assert_eq!(config.subnet_parsed().unwrap().prefix_len(), 24);
}

#[test]
fn test_empty_yaml_gives_defaults() {
    let config = HarnessConfig::from_yaml_str("{}", "inline").unwrap();
    let defaults = HarnessConfig::default();

    assert_eq!(config.network_prefix, defaults.network_prefix);
    assert_eq!(config.subnet, "172.27.1.0/24");
    assert_eq!(config.command_timeout, Duration::from_secs(60));
    assert_eq!(config.state_change_timeout, Duration::from_secs(90));
    assert_eq!(config.poll_interval, Duration::from_secs(1));
}

#[test]
fn test_unknown_field_rejected() {
    let err = HarnessConfig::from_yaml_str("network_prefx: typo\n", "typo.yaml").unwrap_err();

    match err {
        Error::Config { origin, reason } => {
            assert_eq!(origin, "typo.yaml");
            assert!(reason.contains("network_prefx"), "reason: {reason}");
        }
        other => panic!("expected Config error, got {other:?}"),
    }
}

#[test]
fn test_bad_duration_rejected() {
    let err = HarnessConfig::from_yaml_str("poll_interval: soon\n", "inline").unwrap_err();
    assert!(matches!(err, Error::Config { .. }));
}

// =============================================================================
// Validation
// =============================================================================

#[test]
fn test_prefix_too_long_for_interface_names() {
    // "<prefix>-999p" must fit in 15 bytes.
    let err = HarnessConfig::from_yaml_str("network_prefix: abcdefghijk\n", "p.yaml").unwrap_err();

    match err {
        Error::Config { origin, reason } => {
            assert_eq!(origin, "p.yaml");
            assert!(reason.contains("network_prefix"), "reason: {reason}");
        }
        other => panic!("expected Config error, got {other:?}"),
    }

    assert!(HarnessConfig::from_yaml_str("network_prefix: abcdefghij\n", "p.yaml").is_ok());
}

#[test]
fn test_invalid_subnet_rejected() {
    for subnet in ["172.27.1.0", "172.27.1.1/24", "300.0.0.0/8", "10.0.0.0/33"] {
        let yaml = format!("subnet: \"{subnet}\"\n");
        assert!(
            HarnessConfig::from_yaml_str(&yaml, "inline").is_err(),
            "{subnet} should be rejected"
        );
    }
}

#[test]
fn test_poll_interval_bounds() {
    assert!(HarnessConfig::from_yaml_str("poll_interval: 0s\n", "inline").is_err());
    assert!(
        HarnessConfig::from_yaml_str(
            "poll_interval: 10s\nstate_change_timeout: 5s\n",
            "inline"
        )
        .is_err()
    );
}

// =============================================================================
// Files and Contexts
// =============================================================================

#[test]
fn test_from_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("harness.yaml");
    std::fs::write(&path, "network_prefix: ci\nuser: runner\n").unwrap();

    let config = HarnessConfig::from_file(&path).unwrap();

    assert_eq!(config.network_prefix, "ci");
    assert_eq!(config.user.as_deref(), Some("runner"));
}

#[test]
fn test_missing_file() {
    let err = HarnessConfig::from_file(&PathBuf::from("/nonexistent/harness.yaml")).unwrap_err();
    assert!(matches!(err, Error::Io(_)));
}

#[test]
fn test_contexts_carry_environment() {
    let config = HarnessConfig::from_yaml_str(
        "user: docker\nenv:\n  PGHOST: localhost\n  LANG: C\n",
        "inline",
    )
    .unwrap();

    let node = config.exec_context();
    assert_eq!(node.user(), Some("docker"));
    assert_eq!(node.env().get("LANG").map(String::as_str), Some("C"));

    let host = config.host_context();
    assert_eq!(host.user(), None);
    assert_eq!(host.namespace(), None);
    assert_eq!(host.env().len(), 2);
}

#[test]
fn test_poller_from_config() {
    let config =
        HarnessConfig::from_yaml_str("state_change_timeout: 20s\npoll_interval: 2s\n", "inline")
            .unwrap();
    let poller = config.poller();

    assert_eq!(poller.timeout(), Duration::from_secs(20));
    assert_eq!(poller.interval(), Duration::from_secs(2));
}
