//! # Control Plane Query Contract
//!
//! The control plane is an external SQL-queryable service. The harness
//! reaches it with `psql` in unaligned, tuples-only mode and splits the
//! output on the ASCII unit separator:
//!
//! ```text
//! psql -X -A -t -F <US> -v ON_ERROR_STOP=1 -d postgres://... -c <sql>
//!      │  │  │  └ field separator
//!      │  │  └ tuples only (no header/footer)
//!      │  └ unaligned
//!      └ ignore ~/.psqlrc
//! ```
//!
//! Event history is fetched for diagnostics only and never drives control
//! flow.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use tracing::debug;

use crate::constants::{DIAGNOSTIC_EVENT_COUNT, QUERY_TIMEOUT};
use crate::error::{Error, Result};
use crate::process::{ExecContext, run_to_completion};

/// psql field separator (ASCII unit separator).
const FIELD_SEPARATOR: char = '\u{1f}';

/// Quotes `value` as a SQL string literal.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Splits unaligned tuples-only psql output into rows of fields.
pub fn parse_rows(output: &str) -> Vec<Vec<String>> {
    output
        .lines()
        .filter(|line| !line.is_empty())
        .map(|line| line.split(FIELD_SEPARATOR).map(str::to_string).collect())
        .collect()
}

// =============================================================================
// psql Client
// =============================================================================

/// Runs SQL through `psql` against one connection string.
#[derive(Debug, Clone)]
pub struct PsqlClient {
    context: ExecContext,
    program: PathBuf,
    conninfo: String,
    timeout: Duration,
}

impl PsqlClient {
    /// Creates a client running `program` under `context`.
    pub fn new(context: ExecContext, program: PathBuf, conninfo: String) -> Self {
        Self {
            context,
            program,
            conninfo,
            timeout: QUERY_TIMEOUT,
        }
    }

    /// Overrides the per-query timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Connection string in use.
    pub fn conninfo(&self) -> &str {
        &self.conninfo
    }

    fn argv(&self, sql: &str) -> Vec<String> {
        let program = self.program.display().to_string();
        let separator = FIELD_SEPARATOR.to_string();
        [
            program.as_str(),
            "-X",
            "-A",
            "-t",
            "-F",
            separator.as_str(),
            "-v",
            "ON_ERROR_STOP=1",
            "-d",
            self.conninfo.as_str(),
            "-c",
            sql,
        ]
        .map(String::from)
        .to_vec()
    }

    /// Runs `sql` and returns its rows. Statements without a result set
    /// return no rows.
    pub async fn query(&self, sql: &str) -> Result<Vec<Vec<String>>> {
        debug!(conninfo = %self.conninfo, "{sql}");
        let argv = self.argv(sql);
        let output = run_to_completion(&self.context, "psql", &argv, self.timeout).await?;

        if !output.success() {
            return Err(Error::CommandFailed {
                name: "psql".to_string(),
                command: sql.to_string(),
                exit_code: output.exit_code,
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }
        Ok(parse_rows(&output.stdout))
    }

    /// Runs `sql` and returns the single value of its first row.
    pub async fn query_scalar(&self, sql: &str) -> Result<String> {
        self.query(sql)
            .await?
            .into_iter()
            .next()
            .and_then(|row| row.into_iter().next())
            .ok_or_else(|| Error::QueryResult {
                query: sql.to_string(),
                reason: "no rows returned".to_string(),
            })
    }
}

// =============================================================================
// Records
// =============================================================================

/// Reported and assigned state of one node, as seen by the control plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeState {
    /// State the node reports having reached.
    pub reported: String,
    /// State the control plane told the node to converge to.
    pub assigned: String,
}

/// One row of the control plane's event history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeEvent {
    pub time: Option<DateTime<FixedOffset>>,
    pub node_id: u32,
    pub node_name: String,
    pub reported_state: String,
    pub goal_state: String,
    pub reported_rep_state: String,
    pub reported_lsn: String,
    pub description: String,
}

/// Parses a `timestamptz` as printed by psql, e.g.
/// `2024-03-01 10:15:42.123456+00`.
pub fn parse_timestamptz(value: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_str(value.trim(), "%Y-%m-%d %H:%M:%S%.f%#z").ok()
}

impl NodeEvent {
    fn from_row(query: &str, row: Vec<String>) -> Result<Self> {
        let [time, id, name, reported, goal, rep, lsn, description]: [String; 8] =
            row.try_into().map_err(|row: Vec<String>| Error::QueryResult {
                query: query.to_string(),
                reason: format!("expected 8 columns, got {}", row.len()),
            })?;

        let node_id = id.parse().map_err(|_| Error::QueryResult {
            query: query.to_string(),
            reason: format!("invalid node id '{id}'"),
        })?;

        Ok(Self {
            time: parse_timestamptz(&time),
            node_id,
            node_name: name,
            reported_state: reported,
            goal_state: goal,
            reported_rep_state: rep,
            reported_lsn: lsn,
            description,
        })
    }
}

/// Formats events as a fixed-width table for diagnostics.
pub fn events_table(events: &[NodeEvent]) -> String {
    let mut out = format!(
        "{:>2}:{:<14} {:>17}/{:<17} {:>7} {:>10} {}",
        "id", "nodename", "state", "goal state", "repl st", "lsn", "event"
    );
    for e in events {
        out.push('\n');
        out.push_str(&format!(
            "{:>2}:{:<14} {:>17}/{:<17} {:>7} {:>10} {}",
            e.node_id,
            e.node_name,
            e.reported_state,
            e.goal_state,
            e.reported_rep_state,
            e.reported_lsn,
            e.description
        ));
    }
    out
}

// =============================================================================
// Control Plane
// =============================================================================

/// Queries answered by the control plane.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Reported and assigned state of `node_id` in `group`.
    async fn node_state(&self, node_id: u32, group: u32) -> Result<NodeState>;

    /// Most recent events of `formation`, oldest first.
    async fn last_events(&self, formation: &str, count: u32) -> Result<Vec<NodeEvent>>;

    /// Rows describing the other nodes of the group `host:port` belongs to.
    /// The first column is the node id.
    async fn other_nodes(&self, host: &str, port: u16) -> Result<Vec<Vec<String>>>;
}

/// [`ControlPlane`] backed by the monitor database.
#[derive(Debug, Clone)]
pub struct MonitorClient {
    psql: PsqlClient,
}

impl MonitorClient {
    /// Wraps a psql client connected to the monitor database.
    pub fn new(psql: PsqlClient) -> Self {
        Self { psql }
    }

    /// Underlying client.
    pub fn psql(&self) -> &PsqlClient {
        &self.psql
    }

    /// Asks the control plane to fail over `group` of `formation`.
    pub async fn perform_failover(&self, formation: &str, group: u32) -> Result<()> {
        let sql = format!(
            "select * from pgautofailover.perform_failover({}, {group})",
            quote_literal(formation)
        );
        self.psql.query(&sql).await.map(|_| ())
    }

    /// Recent events of `formation`, formatted for diagnostics.
    pub async fn events_report(&self, formation: &str) -> Result<String> {
        let events = self.last_events(formation, DIAGNOSTIC_EVENT_COUNT).await?;
        Ok(events_table(&events))
    }
}

#[async_trait]
impl ControlPlane for MonitorClient {
    async fn node_state(&self, node_id: u32, group: u32) -> Result<NodeState> {
        let sql = format!(
            "select reportedstate, goalstate from pgautofailover.node \
             where nodeid = {node_id} and groupid = {group}"
        );
        let row = self
            .psql
            .query(&sql)
            .await?
            .into_iter()
            .next()
            .ok_or(Error::NodeNotFound { node_id, group })?;

        match <[String; 2]>::try_from(row) {
            Ok([reported, assigned]) => Ok(NodeState { reported, assigned }),
            Err(row) => Err(Error::QueryResult {
                query: sql,
                reason: format!("expected 2 columns, got {}", row.len()),
            }),
        }
    }

    async fn last_events(&self, formation: &str, count: u32) -> Result<Vec<NodeEvent>> {
        let sql = format!(
            "select eventtime, nodeid, nodename, reportedstate, goalstate, \
             reportedrepstate, reportedlsn, description \
             from pgautofailover.last_events({}, count => {count})",
            quote_literal(formation)
        );
        self.psql
            .query(&sql)
            .await?
            .into_iter()
            .map(|row| NodeEvent::from_row(&sql, row))
            .collect()
    }

    async fn other_nodes(&self, host: &str, port: u16) -> Result<Vec<Vec<String>>> {
        let sql = format!(
            "select * from pgautofailover.get_other_nodes({}, {port})",
            quote_literal(host)
        );
        self.psql.query(&sql).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_literal() {
        assert_eq!(quote_literal("default"), "'default'");
        assert_eq!(quote_literal("it's"), "'it''s'");
    }

    #[test]
    fn test_parse_rows() {
        let out = "single\u{1f}single\n\nprimary\u{1f}wait_primary\n";
        assert_eq!(
            parse_rows(out),
            vec![vec!["single", "single"], vec!["primary", "wait_primary"]]
        );
        assert!(parse_rows("").is_empty());
    }

    #[test]
    fn test_parse_timestamptz() {
        let t = parse_timestamptz("2024-03-01 10:15:42.123456+00").unwrap();
        assert_eq!(t.to_rfc3339(), "2024-03-01T10:15:42.123456+00:00");
        assert!(parse_timestamptz("2024-03-01 10:15:42+02").is_some());
        assert!(parse_timestamptz("yesterday").is_none());
    }

    #[test]
    fn test_event_from_row() {
        let row: Vec<String> = [
            "2024-03-01 10:15:42+00",
            "2",
            "node2",
            "secondary",
            "secondary",
            "quorum",
            "0/3000148",
            "New state is reported",
        ]
        .map(String::from)
        .to_vec();

        let event = NodeEvent::from_row("q", row).unwrap();
        assert_eq!(event.node_id, 2);
        assert_eq!(event.goal_state, "secondary");
        assert!(event.time.is_some());

        assert!(NodeEvent::from_row("q", vec!["1".to_string()]).is_err());
    }

    #[test]
    fn test_events_table() {
        let table = events_table(&[NodeEvent {
            time: None,
            node_id: 1,
            node_name: "node1".to_string(),
            reported_state: "single".to_string(),
            goal_state: "single".to_string(),
            reported_rep_state: "async".to_string(),
            reported_lsn: "0/0".to_string(),
            description: "registered".to_string(),
        }]);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("id:nodename"));
        assert!(lines[1].starts_with(" 1:node1"));
        assert!(lines[1].ends_with("registered"));
    }
}
