//! Execution context: where and as whom a child process runs.
//!
//! Replaces ambient process-wide state. The namespace, the user to switch
//! to and the child environment travel with the context and are applied to
//! each spawned command; the driver's own environment is never modified.

use std::collections::BTreeMap;
use std::process::Stdio;

use crate::error::{Error, Result};

/// Namespace, user and environment applied to spawned commands.
///
/// The final argument vector of a spawned command is:
///
/// ```text
/// ip netns exec <ns>  sudo -E -u <user> env PATH=<path> K=V...  argv...
/// └─ namespace set ┘  └──────────── user set ───────────────┘
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecContext {
    namespace: Option<String>,
    user: Option<String>,
    env: BTreeMap<String, String>,
}

impl ExecContext {
    /// Context running commands directly in the host namespace as the
    /// current user.
    pub fn host() -> Self {
        Self::default()
    }

    /// Runs commands inside the named network namespace.
    #[must_use]
    pub fn in_namespace(mut self, namespace: &str) -> Self {
        self.namespace = Some(namespace.to_string());
        self
    }

    /// Runs commands as `user` (through `sudo`).
    #[must_use]
    pub fn with_user(mut self, user: &str) -> Self {
        self.user = Some(user.to_string());
        self
    }

    /// Adds a variable to the child environment.
    #[must_use]
    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.env.insert(key.to_string(), value.to_string());
        self
    }

    /// Target namespace, if any.
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Target user, if any.
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// Child environment.
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Builds the full argument vector for `argv`.
    pub fn wrap(&self, argv: &[String]) -> Vec<String> {
        let mut full = Vec::with_capacity(argv.len() + 10);

        if let Some(ns) = &self.namespace {
            full.extend(["ip", "netns", "exec", ns.as_str()].map(String::from));
        }

        if let Some(user) = &self.user {
            // sudo resets PATH through secure_path; carry ours across.
            let path = self
                .env
                .get("PATH")
                .cloned()
                .or_else(|| std::env::var("PATH").ok())
                .unwrap_or_default();

            full.extend(["sudo", "-E", "-u", user.as_str(), "env"].map(String::from));
            full.push(format!("PATH={path}"));
            full.extend(
                self.env
                    .iter()
                    .filter(|(k, _)| k.as_str() != "PATH")
                    .map(|(k, v)| format!("{k}={v}")),
            );
        }

        full.extend(argv.iter().cloned());
        full
    }

    /// Prepares a command for `argv` with all three stdio streams piped and
    /// the child placed in its own process group.
    pub fn command(&self, argv: &[String]) -> Result<tokio::process::Command> {
        let full = self.wrap(argv);
        let (program, args) = full.split_first().ok_or_else(|| Error::SpawnFailed {
            command: String::new(),
            reason: "empty command".to_string(),
        })?;

        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);
        Ok(cmd)
    }
}
