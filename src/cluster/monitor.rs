//! The control-plane node.

use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use super::pg::PgNode;
use super::role::Feature;
use crate::constants::DEFAULT_FORMATION;
use crate::control::{ControlPlane, MonitorClient};
use crate::error::Result;
use crate::poller::{Diagnostics, Supervised};

/// Monitor node: a [`PgNode`] serving the control-plane database.
#[derive(Debug)]
pub struct MonitorNode {
    pg: PgNode,
    nodename: String,
}

impl MonitorNode {
    pub(crate) fn new(pg: PgNode, nodename: Option<String>) -> Self {
        let nodename = nodename.unwrap_or_else(|| pg.address().to_string());
        Self { pg, nodename }
    }

    /// The Postgres instance serving the monitor database.
    pub fn pg(&self) -> &PgNode {
        &self.pg
    }

    /// Mutable access to the Postgres instance.
    pub fn pg_mut(&mut self) -> &mut PgNode {
        &mut self.pg
    }

    /// Name registered for the monitor; defaults to its address.
    pub fn nodename(&self) -> &str {
        &self.nodename
    }

    fn create_args(&self, run: bool) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "create".to_string(),
            self.pg.role().command().to_string(),
            "-vv".to_string(),
            "--pgdata".to_string(),
            self.pg.pgdata().display().to_string(),
            "--pgport".to_string(),
            self.pg.port().to_string(),
            "--nodename".to_string(),
            self.nodename.clone(),
        ];
        if let Some(auth) = self.pg.auth_method() {
            args.extend(["--auth".to_string(), auth.to_string()]);
        }
        if run {
            args.push("--run".to_string());
        }
        args
    }

    /// Runs `pg_autoctl create monitor`.
    ///
    /// With `run`, the command keeps running as the node's background agent;
    /// otherwise it runs to completion.
    pub async fn create(&mut self, run: bool) -> Result<()> {
        let args = self.create_args(run);
        info!(address = %self.pg.address(), run, "creating monitor");
        if run {
            self.pg.launch(args)
        } else {
            self.pg
                .command()
                .with_preset(args)
                .execute("create monitor", &[])
                .await
                .map(|_| ())
        }
    }

    /// Starts `pg_autoctl run -v`.
    pub fn run(&mut self) -> Result<()> {
        self.pg.run("-v")
    }

    /// Client for the control-plane queries.
    pub fn client(&self) -> MonitorClient {
        MonitorClient::new(self.pg.psql())
    }

    /// `pg_autoctl create formation`.
    pub async fn create_formation(
        &self,
        name: &str,
        kind: &str,
        secondary: Option<bool>,
        dbname: Option<&str>,
    ) -> Result<()> {
        let mut args = vec!["create", "formation", "--formation", name, "--kind", kind];
        if let Some(dbname) = dbname {
            args.extend(["--dbname", dbname]);
        }
        match secondary {
            Some(true) => args.push("--enable-secondary"),
            Some(false) => args.push("--disable-secondary"),
            None => {}
        }
        self.pg
            .command()
            .execute("create formation", &args)
            .await
            .map(|_| ())
    }

    /// Enables `feature` on `formation`.
    pub async fn enable(&self, feature: Feature, formation: &str) -> Result<()> {
        self.pg
            .command()
            .execute(
                &format!("enable {feature}"),
                &["enable", feature.command(), "--formation", formation],
            )
            .await
            .map(|_| ())
    }

    /// Disables `feature` on `formation`.
    pub async fn disable(&self, feature: Feature, formation: &str) -> Result<()> {
        self.pg
            .command()
            .execute(
                &format!("disable {feature}"),
                &["disable", feature.command(), "--formation", formation],
            )
            .await
            .map(|_| ())
    }

    /// Manual failover of `group` in `formation`.
    pub async fn failover(&self, formation: &str, group: u32) -> Result<()> {
        info!(formation, group, "performing manual failover");
        self.client().perform_failover(formation, group).await
    }

    /// Manual failover of group 0 of the default formation.
    pub async fn failover_default(&self) -> Result<()> {
        self.failover(DEFAULT_FORMATION, 0).await
    }

    /// Output of `pg_autoctl show state`.
    pub async fn show_state(&self) -> Result<String> {
        let output = self
            .pg
            .command()
            .execute("show state", &["show", "state"])
            .await?;
        Ok(output.stdout)
    }

    /// Other nodes of the group `host:port` belongs to.
    pub async fn other_nodes(&self, host: &str, port: u16) -> Result<Vec<Vec<String>>> {
        self.client().other_nodes(host, port).await
    }
}

#[async_trait]
impl Supervised for MonitorNode {
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
