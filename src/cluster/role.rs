//! Node roles and formation features.

use std::fmt;

/// Role of a node, as passed to `pg_autoctl create <role>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Control-plane node.
    Monitor,
    /// Plain Postgres data node.
    Postgres,
    /// Citus coordinator data node.
    Coordinator,
    /// Citus worker data node.
    Worker,
}

impl Role {
    /// Subcommand name.
    pub fn command(&self) -> &'static str {
        match self {
            Self::Monitor => "monitor",
            Self::Postgres => "postgres",
            Self::Coordinator => "coordinator",
            Self::Worker => "worker",
        }
    }

    /// Returns true for the control-plane role.
    pub fn is_monitor(&self) -> bool {
        matches!(self, Self::Monitor)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.command())
    }
}

/// Formation feature toggled with `pg_autoctl enable|disable <feature>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    /// Standby nodes.
    Secondary,
}

impl Feature {
    /// Subcommand name.
    pub fn command(&self) -> &'static str {
        match self {
            Self::Secondary => "secondary",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.command())
    }
}
