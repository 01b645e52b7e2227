//! Tests for error types.
//!
//! Validates display formatting, absence and timeout classification, and
//! that diagnostics survive into the rendered message.

use std::time::Duration;

use netfabric::network::link::{Removal, classify_failure, tolerate_absence};
use netfabric::{Diagnostics, Error};

// =============================================================================
// Kernel Object Errors
// =============================================================================

#[test]
fn test_kernel_object_display() {
    let err = Error::KernelObject {
        operation: "ip link add name pgauto-br type bridge".to_string(),
        object: "pgauto-br".to_string(),
        reason: "RTNETLINK answers: Operation not permitted".to_string(),
    };
    let msg = format!("{}", err);

    assert!(msg.contains("pgauto-br"), "should include object");
    assert!(msg.contains("ip link add"), "should include operation");
    assert!(msg.contains("Operation not permitted"), "should include reason");
    assert!(!err.is_absent());
}

#[test]
fn test_absence_classification() {
    for stderr in [
        "Cannot find device \"pgauto-3p\"",
        "Cannot remove namespace file \"/run/netns/pgauto-3\": No such file or directory",
        "Cannot open network namespace \"pgauto-3\": No such file or directory",
    ] {
        let err = classify_failure("pgauto-3", &["netns", "delete", "pgauto-3"], stderr);
        assert!(err.is_absent(), "'{stderr}' should mean absent");
    }

    let err = classify_failure("pgauto-3", &["netns", "add", "pgauto-3"], "File exists");
    assert!(!err.is_absent());
}

#[test]
fn test_tolerate_absence() {
    let absent = Err(Error::KernelObjectAbsent {
        object: "pgauto-br".to_string(),
    });
    assert_eq!(tolerate_absence(absent).unwrap(), Removal::AlreadyAbsent);
    assert_eq!(tolerate_absence(Ok(())).unwrap(), Removal::Removed);

    let fatal = Err(Error::KernelObject {
        operation: "ip link delete dev pgauto-br".to_string(),
        object: "pgauto-br".to_string(),
        reason: "Device or resource busy".to_string(),
    });
    assert!(tolerate_absence(fatal).is_err());
}

#[test]
fn test_subnet_exhausted_display() {
    let err = Error::SubnetExhausted {
        subnet: "10.0.0.0/30".to_string(),
    };
    assert!(err.to_string().contains("10.0.0.0/30"));
}

// =============================================================================
// Process Errors
// =============================================================================

#[test]
fn test_command_failed_display() {
    let err = Error::CommandFailed {
        name: "pg_autoctl create".to_string(),
        command: "pg_autoctl create postgres --pgdata /tmp/node1".to_string(),
        exit_code: 12,
        stdout: "partial".to_string(),
        stderr: "FATAL: monitor unreachable".to_string(),
    };
    let msg = format!("{}", err);

    assert!(msg.contains("exit code 12"), "should include exit code");
    assert!(msg.contains("--pgdata /tmp/node1"), "should include command");
    assert!(msg.contains("monitor unreachable"), "should include stderr");
    assert!(!err.is_timeout());
}

#[test]
fn test_timeouts_classified() {
    let errors = [
        Error::ProcessTimeout {
            command: "sleep 30".to_string(),
            timeout: Duration::from_secs(1),
            stdout: String::new(),
            stderr: String::new(),
        },
        Error::CommandTimeout {
            name: "show state".to_string(),
            command: "pg_autoctl show state".to_string(),
            timeout: Duration::from_secs(60),
            stdout: String::new(),
            stderr: String::new(),
        },
        Error::Timeout {
            operation: "postgres to be ready".to_string(),
            timeout: Duration::from_secs(30),
        },
    ];

    for err in errors {
        assert!(err.is_timeout(), "{err} should be a timeout");
    }
}

#[test]
fn test_process_timeout_keeps_output() {
    let err = Error::ProcessTimeout {
        command: "pg_autoctl run".to_string(),
        timeout: Duration::from_millis(500),
        stdout: "starting postgres".to_string(),
        stderr: "waiting for monitor".to_string(),
    };
    let msg = err.to_string();

    assert!(msg.contains("starting postgres"));
    assert!(msg.contains("waiting for monitor"));
}

// =============================================================================
// State Errors
// =============================================================================

#[test]
fn test_state_timeout_includes_diagnostics() {
    let err = Error::StateTimeout {
        subject: "/tmp/node2".to_string(),
        field: "state".to_string(),
        target: "secondary".to_string(),
        waited: Duration::from_secs(90),
        diagnostics: Box::new(Diagnostics {
            last_state: Some("catchingup".to_string()),
            logs: Some("FATAL: could not start WAL streaming".to_string()),
            ..Diagnostics::default()
        }),
    };
    let msg = err.to_string();

    assert!(err.is_timeout());
    assert!(msg.contains("/tmp/node2"));
    assert!(msg.contains("'secondary'"));
    assert!(msg.contains("last observed: catchingup"));
    assert!(msg.contains("could not start WAL streaming"));
}

#[test]
fn test_cluster_errors_display() {
    assert!(
        Error::MonitorAlreadyExists
            .to_string()
            .contains("already been created")
    );
    assert!(Error::UnknownNode(4).to_string().contains('4'));
    assert!(
        Error::NoMonitor("/tmp/node1".to_string())
            .to_string()
            .contains("/tmp/node1")
    );
}

// =============================================================================
// Trait Implementations
// =============================================================================

#[test]
fn test_error_is_send_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Error>();
}

#[test]
fn test_io_error_source() {
    use std::error::Error as StdError;

    let err = Error::from(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
    assert!(err.source().is_some(), "I/O errors keep their source");

    let err = Error::MonitorAlreadyExists;
    assert!(err.source().is_none());
}
