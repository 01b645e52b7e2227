//! Data nodes: Postgres instances registered with the monitor.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use super::pg::PgNode;
use crate::constants::{DEFAULT_FORMATION, DIAGNOSTIC_EVENT_COUNT};
use crate::control::{ControlPlane, MonitorClient, NodeEvent, NodeState, events_table};
use crate::error::{Error, Result};
use crate::poller::{Diagnostics, StateField, StatePoller, StateProbe, Supervised};

/// Prefix of the physical slots kept for every other node of a group.
pub const STANDBY_SLOT_PREFIX: &str = "pgautofailover_standby_";

/// Exit code of `pg_autoctl` for a rejected argument.
const EXIT_BAD_ARGS: i32 = 1;

/// Exit code of `pg_autoctl` when the monitor refused the change.
const EXIT_MONITOR_REFUSED: i32 = 6;

/// Registration parameters of a data node.
#[derive(Debug, Clone)]
pub(crate) struct Registration {
    pub node_id: u32,
    pub group: u32,
    pub listen: bool,
    pub formation: Option<String>,
    pub monitor: MonitorClient,
}

/// A data node: a [`PgNode`] whose state is tracked by the monitor.
#[derive(Debug)]
pub struct DataNode {
    pg: PgNode,
    node_id: u32,
    group: u32,
    listen: bool,
    formation: Option<String>,
    monitor: MonitorClient,
    poller: StatePoller,
    last_state: Option<NodeState>,
}

impl DataNode {
    pub(crate) fn new(pg: PgNode, registration: Registration, poller: StatePoller) -> Self {
        Self {
            pg,
            node_id: registration.node_id,
            group: registration.group,
            listen: registration.listen,
            formation: registration.formation,
            monitor: registration.monitor,
            poller,
            last_state: None,
        }
    }

    /// The Postgres instance behind this node.
    pub fn pg(&self) -> &PgNode {
        &self.pg
    }

    /// Mutable access to the Postgres instance.
    pub fn pg_mut(&mut self) -> &mut PgNode {
        &mut self.pg
    }

    /// Node id expected on the monitor.
    pub fn node_id(&self) -> u32 {
        self.node_id
    }

    /// Group the node belongs to.
    pub fn group(&self) -> u32 {
        self.group
    }

    /// Formation given at creation, if any.
    pub fn formation(&self) -> Option<&str> {
        self.formation.as_deref()
    }

    /// Client of the monitor this node registers with.
    pub fn monitor(&self) -> &MonitorClient {
        &self.monitor
    }

    fn create_args(&self, run: bool) -> Vec<String> {
        let address = self.pg.address().to_string();
        // Without --listen, the node name is left to automatic detection.
        let pghost = if self.listen {
            address.clone()
        } else {
            "localhost".to_string()
        };

        let mut args = vec![
            "create".to_string(),
            self.pg.role().command().to_string(),
            "--pgdata".to_string(),
            self.pg.pgdata().display().to_string(),
            "--pghost".to_string(),
            pghost,
            "--pgport".to_string(),
            self.pg.port().to_string(),
            "--pgctl".to_string(),
            self.pg.toolchain().pg_ctl.display().to_string(),
            "--monitor".to_string(),
            self.monitor.psql().conninfo().to_string(),
        ];
        if self.listen {
            args.extend(["--listen".to_string(), address]);
        }
        if let Some(formation) = &self.formation {
            args.extend(["--formation".to_string(), formation.clone()]);
        }
        if run {
            args.push("--run".to_string());
        }
        args
    }

    /// Runs `pg_autoctl create <role>`.
    ///
    /// With `run`, the command keeps running as the node's background agent.
    pub async fn create(&mut self, run: bool) -> Result<()> {
        let args = self.create_args(run);
        info!(
            address = %self.pg.address(),
            node_id = self.node_id,
            role = %self.pg.role(),
            run,
            "creating data node"
        );
        if run {
            self.pg.launch(args)
        } else {
            self.pg
                .command()
                .with_preset(args)
                .execute("pg_autoctl create", &[])
                .await
                .map(|_| ())
        }
    }

    // =========================================================================
    // State
    // =========================================================================

    /// Reported and assigned state as seen by the monitor.
    pub async fn get_state(&self) -> Result<NodeState> {
        self.monitor.node_state(self.node_id, self.group).await
    }

    /// State seen by the most recent wait, if any.
    pub fn last_known_state(&self) -> Option<&NodeState> {
        self.last_state.as_ref()
    }

    /// Waits until the reported state equals `target`.
    pub async fn wait_until_state(&mut self, target: &str) -> Result<()> {
        let poller = self.poller;
        poller.wait_until(self, StateField::Reported, target).await
    }

    /// Waits until the assigned state equals `target`.
    pub async fn wait_until_assigned_state(&mut self, target: &str) -> Result<()> {
        let poller = self.poller;
        poller.wait_until(self, StateField::Assigned, target).await
    }

    /// Same as [`wait_until_state`](Self::wait_until_state) with a custom
    /// timeout.
    pub async fn wait_until_state_within(&mut self, target: &str, timeout: Duration) -> Result<()> {
        let poller = StatePoller::new(timeout, self.poller.interval());
        poller.wait_until(self, StateField::Reported, target).await
    }

    /// Recent events of the default formation.
    pub async fn events(&self) -> Result<Vec<NodeEvent>> {
        self.monitor
            .last_events(DEFAULT_FORMATION, DIAGNOSTIC_EVENT_COUNT)
            .await
    }

    // =========================================================================
    // pg_autoctl Subcommands
    // =========================================================================

    async fn run_command(&self, name: &str, args: &[&str]) -> Result<String> {
        Ok(self.pg.command().execute(name, args).await?.stdout)
    }

    /// Runs a `set` subcommand; the listed exit codes mean "refused".
    async fn try_set(&self, name: &str, args: &[&str], refused: &[i32]) -> Result<bool> {
        let command = self.pg.command();
        let output = command.try_execute(name, args).await?;
        if output.success() {
            return Ok(true);
        }
        if refused.contains(&output.exit_code) {
            info!(task = name, exit_code = output.exit_code, "change refused");
            return Ok(false);
        }
        Err(Error::CommandFailed {
            name: name.to_string(),
            command: command.command_line(args).join(" "),
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    fn parse_output<T: std::str::FromStr>(command: &str, output: &str) -> Result<T> {
        output.trim().parse().map_err(|_| Error::UnexpectedOutput {
            command: command.to_string(),
            output: output.to_string(),
        })
    }

    /// `pg_autoctl enable maintenance`.
    pub async fn enable_maintenance(&self) -> Result<()> {
        self.run_command("enable maintenance", &["enable", "maintenance"])
            .await
            .map(|_| ())
    }

    /// `pg_autoctl disable maintenance`.
    pub async fn disable_maintenance(&self) -> Result<()> {
        self.run_command("disable maintenance", &["disable", "maintenance"])
            .await
            .map(|_| ())
    }

    /// `pg_autoctl drop node`: removes the node from its formation.
    pub async fn drop_node(&self) -> Result<()> {
        self.run_command("drop node", &["drop", "node"])
            .await
            .map(|_| ())
    }

    /// Sets the candidate priority. `Ok(false)` when the value was rejected.
    pub async fn set_candidate_priority(&self, priority: i32) -> Result<bool> {
        let value = priority.to_string();
        self.try_set(
            "set candidate priority",
            &["set", "node", "candidate-priority", "--", &value],
            &[EXIT_BAD_ARGS],
        )
        .await
    }

    /// Current candidate priority.
    pub async fn get_candidate_priority(&self) -> Result<i32> {
        let name = "get candidate priority";
        let out = self
            .run_command(name, &["get", "node", "candidate-priority"])
            .await?;
        Self::parse_output(name, &out)
    }

    /// Sets replication quorum. `Ok(false)` when the value was rejected.
    pub async fn set_replication_quorum(&self, quorum: bool) -> Result<bool> {
        let value = quorum.to_string();
        self.try_set(
            "set replication quorum",
            &["set", "node", "replication-quorum", &value],
            &[EXIT_BAD_ARGS],
        )
        .await
    }

    /// Current replication quorum.
    pub async fn get_replication_quorum(&self) -> Result<bool> {
        let name = "get replication quorum";
        let out = self
            .run_command(name, &["get", "node", "replication-quorum"])
            .await?;
        Self::parse_output(name, &out)
    }

    /// Sets the formation's number of synchronous standbys. `Ok(false)` when
    /// the argument or the monitor refused it.
    pub async fn set_number_sync_standbys(&self, count: u32) -> Result<bool> {
        let value = count.to_string();
        self.try_set(
            "set number sync standbys",
            &["set", "formation", "number-sync-standbys", &value],
            &[EXIT_BAD_ARGS, EXIT_MONITOR_REFUSED],
        )
        .await
    }

    /// The formation's number of synchronous standbys.
    pub async fn get_number_sync_standbys(&self) -> Result<u32> {
        let name = "get number sync standbys";
        let out = self
            .run_command(name, &["get", "formation", "number-sync-standbys"])
            .await?;
        Self::parse_output(name, &out)
    }

    /// `synchronous_standby_names` computed by the monitor.
    pub async fn synchronous_standby_names(&self) -> Result<String> {
        let out = self
            .run_command(
                "show synchronous_standby_names",
                &["show", "synchronous_standby_names"],
            )
            .await?;
        Ok(out.trim().to_string())
    }

    // =========================================================================
    // Replication Slots
    // =========================================================================

    /// Physical replication slots maintained by `pg_autoctl`, sorted.
    pub async fn replication_slot_names(&self) -> Result<Vec<String>> {
        let sql = format!(
            "select slot_name from pg_replication_slots \
             where slot_name ~ '^{STANDBY_SLOT_PREFIX}' and slot_type = 'physical'"
        );
        let mut names: Vec<String> = self
            .pg
            .run_sql_query(&sql)
            .await?
            .into_iter()
            .filter_map(|row| row.into_iter().next())
            .collect();
        names.sort();
        Ok(names)
    }

    /// True when the node keeps exactly one slot per other node of its group.
    pub async fn has_needed_replication_slots(&self) -> Result<bool> {
        let host = self.pg.address().to_string();
        let expected: BTreeSet<String> = self
            .monitor
            .other_nodes(&host, self.pg.port())
            .await?
            .into_iter()
            .filter_map(|row| row.into_iter().next())
            .map(|id| format!("{STANDBY_SLOT_PREFIX}{id}"))
            .collect();
        let current: BTreeSet<String> = self.replication_slot_names().await?.into_iter().collect();

        if expected == current {
            info!(pgdata = %self.pg.pgdata().display(), slots = ?current, "slots as expected");
        } else {
            info!(
                pgdata = %self.pg.pgdata().display(),
                slots = ?current,
                expected = ?expected,
                "slots differ"
            );
        }
        Ok(expected == current)
    }
}

#[async_trait]
impl Supervised for DataNode {
    fn describe(&self) -> String {
        self.pg.describe()
    }

    async fn keepalive(&mut self, window: Duration) -> Result<()> {
        self.pg.keepalive(window).await
    }

    fn diagnostics(&self) -> Diagnostics {
        self.pg.diagnostics()
    }
}

#[async_trait]
impl StateProbe for DataNode {
    async fn observe(&mut self) -> Result<NodeState> {
        let state = self.get_state().await?;
        self.last_state = Some(state.clone());
        Ok(state)
    }

    async fn event_history(&mut self) -> Result<Option<String>> {
        let events = self.events().await?;
        Ok(Some(events_table(&events)))
    }
}
