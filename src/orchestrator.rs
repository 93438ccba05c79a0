//! Fetch pipeline for one host
//!
//! ```text
//! SelectTarget -> CheckNetworkPolicy -> Connect -> FetchAndCache
//!   -> AllocatePort -> RewriteAndMerge -> EnsureTunnel -> Done
//! ```
//!
//! Declining an advisory goes back to target selection. A failure between
//! Connect and RewriteAndMerge is reported and the operator decides whether
//! to pick another host or abort. A tunnel that cannot be started leaves the
//! run successful, with the command to start it by hand.

use async_trait::async_trait;
use std::fmt;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::cache::{fetch_with_cache, CacheStore, FsCacheStore};
use crate::config::Config;
use crate::context::Context;
use crate::error::{KubehopError, KubehopResult};
use crate::inventory::{HostTarget, Inventory, NetworkPolicy};
use crate::kubeconfig::{rewrite_server, write_backup, Endpoint, KubeconfigStore};
use crate::ssh::probe::internal_ipv4;
use crate::ssh::{connect_with_retry, Connector, RetryPolicy, Ssh2Connector, SshConfig};
use crate::tunnel::{allocate, EnsureOutcome, TunnelRecord, TunnelSupervisor};
use crate::ui::{self, TaskSpinner, UiContext};

/// Network precondition the operator must confirm before connecting
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advisory {
    Vpn,
    Sshuttle {
        range: String,
        /// Ready-to-run command when a jump host is configured
        command: Option<String>,
    },
}

impl Advisory {
    pub fn question(&self) -> &'static str {
        match self {
            Self::Vpn => "Are you connected to the VPN?",
            Self::Sshuttle { .. } => "Is sshuttle running for this network?",
        }
    }
}

impl fmt::Display for Advisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vpn => write!(f, "This host is only reachable over the VPN"),
            Self::Sshuttle { range, .. } => {
                write!(f, "This host needs an sshuttle session for {}", range)
            }
        }
    }
}

/// Decisions the pipeline delegates to a person
#[async_trait]
pub trait Operator: Send + Sync {
    /// `None` cancels the run
    async fn select_organization(&self, organizations: &[String]) -> KubehopResult<Option<String>>;

    /// `None` cancels the run
    async fn select_host(
        &self,
        organization: &str,
        hosts: &[HostTarget],
    ) -> KubehopResult<Option<HostTarget>>;

    async fn approve(&self, advisory: &Advisory) -> KubehopResult<bool>;

    /// Asked after a failed target; `false` aborts the run
    async fn retry_after_failure(
        &self,
        target: &HostTarget,
        error: &KubehopError,
    ) -> KubehopResult<bool>;
}

/// Operator backed by terminal prompts
pub struct InteractiveOperator {
    ui: UiContext,
}

impl InteractiveOperator {
    pub fn new(ui: UiContext) -> Self {
        Self { ui }
    }
}

#[async_trait]
impl Operator for InteractiveOperator {
    async fn select_organization(&self, organizations: &[String]) -> KubehopResult<Option<String>> {
        let options: Vec<_> = organizations
            .iter()
            .map(|org| (org.clone(), org.clone(), String::new()))
            .collect();
        ui::select(&self.ui, "Select organization:", &options).await
    }

    async fn select_host(
        &self,
        organization: &str,
        hosts: &[HostTarget],
    ) -> KubehopResult<Option<HostTarget>> {
        let options: Vec<_> = hosts
            .iter()
            .map(|h| (h.alias.clone(), h.alias.clone(), hint_for(h)))
            .collect();
        let message = format!("Select host ({}):", organization);
        let chosen = ui::select(&self.ui, &message, &options).await?;
        Ok(chosen.and_then(|alias| hosts.iter().find(|h| h.alias == alias).cloned()))
    }

    async fn approve(&self, advisory: &Advisory) -> KubehopResult<bool> {
        ui::approve(&self.ui, advisory.question()).await
    }

    async fn retry_after_failure(
        &self,
        _target: &HostTarget,
        _error: &KubehopError,
    ) -> KubehopResult<bool> {
        ui::confirm(&self.ui, "Try another host?", self.ui.is_interactive()).await
    }
}

fn hint_for(host: &HostTarget) -> String {
    let mut parts = vec![host.group.clone()];
    parts.extend(host.indicators());
    parts.join(" ")
}

/// Narrowing from the command line
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub organization: Option<String>,
    pub host: Option<String>,
    /// Point the kubeconfig at the node's internal address, no tunnel
    pub direct: bool,
}

/// What happened to the tunnel of a completed run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelReport {
    Reused(TunnelRecord),
    Created(TunnelRecord),
    Failed { reason: String, manual_command: String },
    /// Direct mode
    Skipped,
}

/// Summary of a completed run
#[derive(Debug, Clone)]
pub struct FetchReport {
    pub target: HostTarget,
    pub context: Context,
    pub internal_ip: Ipv4Addr,
    pub endpoint: Endpoint,
    pub cache_hit: bool,
    pub backup: Option<PathBuf>,
    pub kubeconfig: PathBuf,
    pub tunnel: TunnelReport,
}

#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed(Box<FetchReport>),
    /// Nothing was chosen
    Cancelled,
    /// The operator gave up after a failure
    Aborted,
}

/// Drives one run from target selection to a usable context
pub struct Orchestrator {
    config: Config,
    ui: UiContext,
    operator: Box<dyn Operator>,
    connector: Box<dyn Connector>,
    ssh_config: SshConfig,
    cache: Box<dyn CacheStore>,
    tunnels: TunnelSupervisor,
    kubeconfig: KubeconfigStore,
}

impl Orchestrator {
    /// Real SSH, on-disk cache and tunnel records, empty ssh_config
    pub fn new(config: Config, ui: UiContext, operator: Box<dyn Operator>) -> Self {
        let known_hosts = dirs::home_dir().map(|home| home.join(".ssh").join("known_hosts"));
        Self {
            connector: Box::new(
                Ssh2Connector::new(config.connect_timeout()).with_known_hosts(known_hosts),
            ),
            ssh_config: SshConfig::default(),
            cache: Box::new(FsCacheStore::new(config.cache_dir())),
            tunnels: TunnelSupervisor::from_config(&config),
            kubeconfig: KubeconfigStore::new(config.kubeconfig_path()),
            config,
            ui,
            operator,
        }
    }

    /// Like [`Orchestrator::new`], reading the configured ssh_config
    pub async fn from_config(
        config: Config,
        ui: UiContext,
        operator: Box<dyn Operator>,
    ) -> KubehopResult<Self> {
        let ssh_config = SshConfig::load(&config.ssh_config_path()).await?;
        Ok(Self::new(config, ui, operator).with_ssh_config(ssh_config))
    }

    pub fn with_connector(mut self, connector: Box<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn with_ssh_config(mut self, ssh_config: SshConfig) -> Self {
        self.ssh_config = ssh_config;
        self
    }

    pub fn with_cache(mut self, cache: Box<dyn CacheStore>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_tunnels(mut self, tunnels: TunnelSupervisor) -> Self {
        self.tunnels = tunnels;
        self
    }

    pub async fn run(
        &self,
        inventories: &[Inventory],
        options: &FetchOptions,
    ) -> KubehopResult<RunOutcome> {
        let candidates = narrow(inventories, options)?;

        loop {
            let Some((target, automatic)) = self.select_target(&candidates).await? else {
                return Ok(RunOutcome::Cancelled);
            };

            if !self.check_network_policy(&target).await? {
                if automatic {
                    ui::step_info(&self.ui, "No other host to choose from");
                    return Ok(RunOutcome::Cancelled);
                }
                continue;
            }

            match self.fetch_target(&target, options.direct).await {
                Ok(report) => return Ok(RunOutcome::Completed(Box::new(report))),
                Err(e) => {
                    warn!("Setting up {} failed: {}", target.alias, e);
                    ui::step_error_detail(&self.ui, &format!("{} failed", target.alias), &e.to_string());
                    if let Some(hint) = e.hint() {
                        ui::remark(&self.ui, hint);
                    }
                    if !self.operator.retry_after_failure(&target, &e).await? {
                        return Ok(RunOutcome::Aborted);
                    }
                }
            }
        }
    }

    /// The chosen host, and whether it was the only candidate
    ///
    /// Backing out of the host menu returns to the organization menu when
    /// there is more than one organization.
    async fn select_target(
        &self,
        candidates: &[(String, Vec<HostTarget>)],
    ) -> KubehopResult<Option<(HostTarget, bool)>> {
        loop {
            let (organization, hosts) = match candidates {
                [only] => only,
                _ => {
                    let names: Vec<String> =
                        candidates.iter().map(|(org, _)| org.clone()).collect();
                    let Some(chosen) = self.operator.select_organization(&names).await? else {
                        return Ok(None);
                    };
                    match candidates.iter().find(|(org, _)| *org == chosen) {
                        Some(found) => found,
                        None => return Ok(None),
                    }
                }
            };

            match hosts.as_slice() {
                [] => return Err(KubehopError::NoHosts(organization.clone())),
                [only] => {
                    ui::step_info(&self.ui, &format!("Using {} ({})", only.alias, organization));
                    return Ok(Some((only.clone(), candidates.len() == 1)));
                }
                _ => match self.operator.select_host(organization, hosts).await? {
                    Some(host) => return Ok(Some((host, false))),
                    None if candidates.len() > 1 => continue,
                    None => return Ok(None),
                },
            }
        }
    }

    /// `false` when the operator declined an advisory
    async fn check_network_policy(&self, target: &HostTarget) -> KubehopResult<bool> {
        for advisory in advisories(target, self.config.network.sshuttle_remote.as_deref()) {
            match &advisory {
                Advisory::Sshuttle {
                    command: Some(command),
                    ..
                } => ui::step_warn_hint(&self.ui, &advisory.to_string(), &format!("Run: {}", command)),
                _ => ui::step_warn(&self.ui, &advisory.to_string()),
            }
            if !self.operator.approve(&advisory).await? {
                info!("Advisory for {} declined", target.alias);
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn fetch_target(&self, target: &HostTarget, direct: bool) -> KubehopResult<FetchReport> {
        let context = target.context()?;
        let params = self.ssh_config.resolve(
            &target.alias,
            &self.config.ssh.default_user,
            &self.config.default_key_path(),
        );

        let mut spinner = TaskSpinner::new(&self.ui);
        spinner.start(&format!("Connecting to {}...", target.alias));
        let session = match connect_with_retry(
            self.connector.as_ref(),
            &params,
            &RetryPolicy::connect(self.config.ssh.connect_attempts),
        )
        .await
        {
            Ok(session) => session,
            Err(e) => {
                spinner.stop_error(&format!("Could not connect to {}", target.alias));
                return Err(e);
            }
        };
        spinner.stop(&format!(
            "Connected to {} ({}@{}:{})",
            target.alias, params.user, params.hostname, params.port
        ));

        let internal_ip = internal_ipv4(session.as_ref()).await?;
        ui::step_ok_detail(&self.ui, "Internal address", &internal_ip.to_string());

        let fetched = fetch_with_cache(
            session.as_ref(),
            &self.config.remote.config_path,
            &context,
            self.cache.as_ref(),
            &RetryPolicy::transfer(self.config.ssh.fetch_attempts),
        )
        .await?;
        drop(session);
        let source = if fetched.cache_hit { "unchanged, from cache" } else { "downloaded" };
        ui::step_ok_detail(&self.ui, "Fetched kubeconfig", source);

        let endpoint = if direct {
            Endpoint::Direct {
                host: internal_ip,
                port: self.config.remote.api_port,
            }
        } else {
            let bound = self.tunnels.live_ports().await?;
            let local_port = allocate(&context, &self.config.port_range()?, &bound)?;
            Endpoint::Tunnel { local_port }
        };

        let rewritten = rewrite_server(&fetched.content, &endpoint)?;

        let backup = match write_backup(
            &self.config.backup_dir(),
            &target.organization,
            &target.alias,
            &rewritten,
        )
        .await
        {
            Ok(path) => Some(path),
            Err(e) => {
                warn!("{}", e);
                ui::step_warn(&self.ui, &format!("Backup not written: {}", e));
                None
            }
        };

        self.kubeconfig.merge(&rewritten, &context).await?;
        ui::step_ok_detail(
            &self.ui,
            &format!("Context {} is current", context),
            &self.kubeconfig.path().display().to_string(),
        );

        let tunnel = match endpoint {
            Endpoint::Tunnel { local_port } => {
                self.ensure_tunnel(&context, target, internal_ip, local_port).await
            }
            Endpoint::Direct { .. } => TunnelReport::Skipped,
        };

        Ok(FetchReport {
            target: target.clone(),
            context,
            internal_ip,
            endpoint,
            cache_hit: fetched.cache_hit,
            backup,
            kubeconfig: self.kubeconfig.path().to_path_buf(),
            tunnel,
        })
    }

    async fn ensure_tunnel(
        &self,
        context: &Context,
        target: &HostTarget,
        internal_ip: Ipv4Addr,
        local_port: u16,
    ) -> TunnelReport {
        let remote_host = internal_ip.to_string();
        let remote_port = self.config.remote.api_port;

        match self
            .tunnels
            .ensure(context, &target.alias, &remote_host, local_port, remote_port)
            .await
        {
            Ok(EnsureOutcome::Reused(record)) => {
                ui::step_ok_detail(&self.ui, "Tunnel already running", &tunnel_detail(&record));
                TunnelReport::Reused(record)
            }
            Ok(EnsureOutcome::Created(record)) => {
                ui::step_ok_detail(&self.ui, "Tunnel started", &tunnel_detail(&record));
                TunnelReport::Created(record)
            }
            Err(e) => {
                let manual_command = self
                    .tunnels
                    .spec_for(context, &target.alias, &remote_host, local_port, remote_port)
                    .manual_command();
                warn!("Tunnel for {} not started: {}", context, e);
                ui::step_warn_hint(
                    &self.ui,
                    &format!("Tunnel not started: {}", e),
                    &format!("Start it manually: {}", manual_command),
                );
                TunnelReport::Failed {
                    reason: e.to_string(),
                    manual_command,
                }
            }
        }
    }
}

fn tunnel_detail(record: &TunnelRecord) -> String {
    format!("127.0.0.1:{}, pid {}", record.local_port, record.pid)
}

/// Advisories for a host, VPN first
pub fn advisories(target: &HostTarget, sshuttle_remote: Option<&str>) -> Vec<Advisory> {
    let mut out = Vec::new();
    if target.requires_vpn {
        out.push(Advisory::Vpn);
    }
    if let NetworkPolicy::Sshuttle { range } = &target.network {
        out.push(Advisory::Sshuttle {
            range: range.clone(),
            command: sshuttle_remote.map(|remote| format!("sshuttle -v -r {} {}", remote, range)),
        });
    }
    out
}

/// Apply `--org`/`--host`, keeping organizations in inventory order
///
/// Without a host filter, organizations with no hosts are kept so that
/// choosing one reports [`KubehopError::NoHosts`].
fn narrow(
    inventories: &[Inventory],
    options: &FetchOptions,
) -> KubehopResult<Vec<(String, Vec<HostTarget>)>> {
    let candidates: Vec<_> = inventories
        .iter()
        .filter(|inv| {
            options
                .organization
                .as_deref()
                .is_none_or(|org| inv.organization == org)
        })
        .map(|inv| {
            let hosts: Vec<HostTarget> = inv
                .hosts
                .iter()
                .filter(|h| options.host.as_deref().is_none_or(|host| h.alias == host))
                .cloned()
                .collect();
            (inv.organization.clone(), hosts)
        })
        .filter(|(_, hosts)| options.host.is_none() || !hosts.is_empty())
        .collect();

    if candidates.is_empty() {
        let what = match (&options.organization, &options.host) {
            (Some(org), Some(host)) => format!("{} in {}", host, org),
            (None, Some(host)) => host.clone(),
            (Some(org), None) => return Err(KubehopError::NoHosts(org.clone())),
            (None, None) => {
                return Err(KubehopError::Internal("inventory list is empty".to_string()))
            }
        };
        return Err(KubehopError::User(format!("No host matches {}", what)));
    }
    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{sha256_hex, MemoryCacheStore};
    use crate::kubeconfig::document::fixtures::K3S_YAML;
    use crate::kubeconfig::Kubeconfig;
    use crate::ssh::probe::IP_PROBES;
    use crate::ssh::testing::{ScriptedConnector, ScriptedSession};
    use crate::tunnel::supervisor::testing::FakeProcesses;
    use crate::tunnel::MemoryPidStore;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    const REMOTE: &str = "/etc/rancher/k3s/k3s.yaml";

    /// Operator replaying canned answers
    #[derive(Clone, Default)]
    struct FakeOperator {
        organizations: Arc<Mutex<VecDeque<Option<String>>>>,
        hosts: Arc<Mutex<VecDeque<Option<String>>>>,
        approvals: Arc<Mutex<VecDeque<bool>>>,
        retries: Arc<Mutex<VecDeque<bool>>>,
        asked: Arc<Mutex<Vec<String>>>,
    }

    impl FakeOperator {
        fn pick_org(self, org: Option<&str>) -> Self {
            self.organizations.lock().unwrap().push_back(org.map(str::to_string));
            self
        }

        fn pick(self, alias: Option<&str>) -> Self {
            self.hosts.lock().unwrap().push_back(alias.map(str::to_string));
            self
        }

        fn approve_next(self, yes: bool) -> Self {
            self.approvals.lock().unwrap().push_back(yes);
            self
        }

        fn retry_next(self, yes: bool) -> Self {
            self.retries.lock().unwrap().push_back(yes);
            self
        }

        fn asked(&self) -> Vec<String> {
            self.asked.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Operator for FakeOperator {
        async fn select_organization(&self, organizations: &[String]) -> KubehopResult<Option<String>> {
            self.asked.lock().unwrap().push("organization".to_string());
            match self.organizations.lock().unwrap().pop_front() {
                Some(scripted) => Ok(scripted),
                None => Ok(organizations.first().cloned()),
            }
        }

        async fn select_host(
            &self,
            _organization: &str,
            hosts: &[HostTarget],
        ) -> KubehopResult<Option<HostTarget>> {
            self.asked.lock().unwrap().push("host".to_string());
            let alias = self.hosts.lock().unwrap().pop_front().flatten();
            Ok(alias.and_then(|a| hosts.iter().find(|h| h.alias == a).cloned()))
        }

        async fn approve(&self, advisory: &Advisory) -> KubehopResult<bool> {
            self.asked.lock().unwrap().push(format!("approve {:?}", advisory));
            Ok(self.approvals.lock().unwrap().pop_front().unwrap_or(false))
        }

        async fn retry_after_failure(
            &self,
            target: &HostTarget,
            _error: &KubehopError,
        ) -> KubehopResult<bool> {
            self.asked.lock().unwrap().push(format!("retry {}", target.alias));
            Ok(self.retries.lock().unwrap().pop_front().unwrap_or(false))
        }
    }

    fn host(alias: &str, requires_vpn: bool, network: NetworkPolicy) -> HostTarget {
        HostTarget {
            organization: "acme".to_string(),
            alias: alias.to_string(),
            group: "k3s_cluster".to_string(),
            requires_vpn,
            network,
        }
    }

    fn inventory(hosts: Vec<HostTarget>) -> Vec<Inventory> {
        vec![Inventory {
            organization: "acme".to_string(),
            path: PathBuf::from("acme_hosts.yml"),
            hosts,
        }]
    }

    fn healthy_session() -> ScriptedSession {
        ScriptedSession::new()
            .respond(IP_PROBES[0], "10.0.0.5\n")
            .respond(
                &format!("sha256sum {}", REMOTE),
                &format!("{}  {}", sha256_hex(K3S_YAML.as_bytes()), REMOTE),
            )
            .read_result(Ok(K3S_YAML.as_bytes().to_vec()))
    }

    struct Harness {
        _temp: TempDir,
        config: Config,
        processes: FakeProcesses,
    }

    impl Harness {
        fn new() -> Self {
            let temp = TempDir::new().unwrap();
            let mut config = Config::default();
            config.paths.kubeconfig = Some(temp.path().join("kube/config"));
            config.paths.backup_dir = temp.path().join("backups");
            config.paths.state_dir = Some(temp.path().join("state"));
            config.paths.cache_dir = Some(temp.path().join("cache"));
            config.ports.range_start = 20000;
            config.ports.range_size = 5000;
            Self {
                _temp: temp,
                config,
                processes: FakeProcesses::new(),
            }
        }

        fn orchestrator(&self, operator: FakeOperator, connector: ScriptedConnector) -> Orchestrator {
            let tunnels = TunnelSupervisor::new(
                Box::new(MemoryPidStore::new()),
                Box::new(self.processes.clone()),
            );
            Orchestrator::new(self.config.clone(), UiContext::non_interactive(), Box::new(operator))
                .with_connector(Box::new(connector))
                .with_cache(Box::new(MemoryCacheStore::new()))
                .with_tunnels(tunnels)
        }

        fn kubeconfig(&self) -> Kubeconfig {
            let bytes = std::fs::read(self.config.kubeconfig_path()).unwrap();
            Kubeconfig::parse(&bytes).unwrap()
        }
    }

    fn completed(outcome: RunOutcome) -> FetchReport {
        match outcome {
            RunOutcome::Completed(report) => *report,
            other => panic!("expected completion, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn single_host_runs_to_completion() {
        let harness = Harness::new();
        let operator = FakeOperator::default();
        let orchestrator =
            harness.orchestrator(operator.clone(), ScriptedConnector::new(healthy_session()));

        let outcome = orchestrator
            .run(&inventory(vec![host("prod1", false, NetworkPolicy::Direct)]), &FetchOptions::default())
            .await
            .unwrap();
        let report = completed(outcome);

        assert_eq!(report.context.as_str(), "acme-prod1");
        assert_eq!(report.internal_ip, Ipv4Addr::new(10, 0, 0, 5));
        assert!(!report.cache_hit);
        assert!(operator.asked().is_empty());

        let Endpoint::Tunnel { local_port } = report.endpoint else {
            panic!("expected tunnel endpoint");
        };
        assert!((20000..25000).contains(&local_port));

        let doc = harness.kubeconfig();
        assert_eq!(doc.current_context.as_deref(), Some("acme-prod1"));
        assert_eq!(
            doc.server_of("acme-prod1"),
            Some(format!("https://127.0.0.1:{}", local_port).as_str())
        );

        let backup = report.backup.unwrap();
        assert!(backup.ends_with("acme_prod1.yml"));

        let spawned = harness.processes.spawned.lock().unwrap().clone();
        assert_eq!(spawned.len(), 1);
        assert_eq!(spawned[0].remote_host, "10.0.0.5");
        assert_eq!(spawned[0].remote_port, 6443);
        assert!(matches!(report.tunnel, TunnelReport::Created(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn second_run_reuses_cache_and_tunnel() {
        let harness = Harness::new();
        let session = healthy_session();
        let orchestrator =
            harness.orchestrator(FakeOperator::default(), ScriptedConnector::new(session.clone()));
        let inventories = inventory(vec![host("prod1", false, NetworkPolicy::Direct)]);

        let first = completed(orchestrator.run(&inventories, &FetchOptions::default()).await.unwrap());
        let second = completed(orchestrator.run(&inventories, &FetchOptions::default()).await.unwrap());

        assert!(second.cache_hit);
        assert_eq!(session.transfers(), 1);
        assert_eq!(first.endpoint, second.endpoint);
        assert!(matches!(second.tunnel, TunnelReport::Reused(_)));
        assert_eq!(harness.processes.spawned.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn direct_mode_skips_tunnel() {
        let harness = Harness::new();
        let orchestrator =
            harness.orchestrator(FakeOperator::default(), ScriptedConnector::new(healthy_session()));
        let options = FetchOptions {
            direct: true,
            ..FetchOptions::default()
        };

        let report = completed(
            orchestrator
                .run(&inventory(vec![host("prod1", false, NetworkPolicy::Direct)]), &options)
                .await
                .unwrap(),
        );

        assert_eq!(report.tunnel, TunnelReport::Skipped);
        assert_eq!(
            harness.kubeconfig().server_of("acme-prod1"),
            Some("https://10.0.0.5:6443")
        );
        assert!(harness.processes.spawned.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn declined_advisory_returns_to_selection() {
        let harness = Harness::new();
        let operator = FakeOperator::default()
            .pick(Some("vpnhost"))
            .approve_next(false)
            .pick(Some("plain"));
        let orchestrator =
            harness.orchestrator(operator.clone(), ScriptedConnector::new(healthy_session()));
        let hosts = vec![
            host("vpnhost", true, NetworkPolicy::Direct),
            host("plain", false, NetworkPolicy::Direct),
        ];

        let report = completed(orchestrator.run(&inventory(hosts), &FetchOptions::default()).await.unwrap());

        assert_eq!(report.target.alias, "plain");
        assert_eq!(operator.asked(), vec!["host", "approve Vpn", "host"]);
    }

    #[tokio::test(start_paused = true)]
    async fn declined_advisory_on_only_host_cancels() {
        let harness = Harness::new();
        let operator = FakeOperator::default().approve_next(false);
        let orchestrator =
            harness.orchestrator(operator, ScriptedConnector::new(healthy_session()));
        let network = NetworkPolicy::Sshuttle {
            range: "10.0.0.0/24".to_string(),
        };

        let outcome = orchestrator
            .run(&inventory(vec![host("edge", false, network)]), &FetchOptions::default())
            .await
            .unwrap();

        assert!(matches!(outcome, RunOutcome::Cancelled));
        assert!(!harness.config.kubeconfig_path().exists());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_selection() {
        let harness = Harness::new();
        let operator = FakeOperator::default().pick(None);
        let orchestrator =
            harness.orchestrator(operator, ScriptedConnector::new(healthy_session()));
        let hosts = vec![
            host("a", false, NetworkPolicy::Direct),
            host("b", false, NetworkPolicy::Direct),
        ];

        let outcome = orchestrator.run(&inventory(hosts), &FetchOptions::default()).await.unwrap();
        assert!(matches!(outcome, RunOutcome::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn backing_out_of_hosts_returns_to_organizations() {
        let harness = Harness::new();
        let operator = FakeOperator::default()
            .pick_org(Some("acme"))
            .pick(None)
            .pick_org(Some("beta"))
            .pick(Some("c"));
        let orchestrator =
            harness.orchestrator(operator.clone(), ScriptedConnector::new(healthy_session()));
        let mut inventories = inventory(vec![
            host("a", false, NetworkPolicy::Direct),
            host("b", false, NetworkPolicy::Direct),
        ]);
        inventories.push(Inventory {
            organization: "beta".to_string(),
            path: PathBuf::from("beta_hosts.yml"),
            hosts: vec![
                host("c", false, NetworkPolicy::Direct),
                host("d", false, NetworkPolicy::Direct),
            ],
        });

        let report = completed(orchestrator.run(&inventories, &FetchOptions::default()).await.unwrap());

        assert_eq!(report.target.alias, "c");
        assert_eq!(
            operator.asked(),
            vec!["organization", "host", "organization", "host"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failure_then_abort() {
        let harness = Harness::new();
        let operator = FakeOperator::default().retry_next(false);
        let connector = ScriptedConnector::new(healthy_session()).fail_with(
            KubehopError::ConnectionFailure {
                host: "prod1".to_string(),
                port: 22,
                reason: "Authentication failed".to_string(),
                retryable: false,
            },
        );
        let orchestrator = harness.orchestrator(operator.clone(), connector);

        let outcome = orchestrator
            .run(&inventory(vec![host("prod1", false, NetworkPolicy::Direct)]), &FetchOptions::default())
            .await
            .unwrap();

        assert!(matches!(outcome, RunOutcome::Aborted));
        assert_eq!(operator.asked(), vec!["retry prod1"]);
        assert!(!harness.config.kubeconfig_path().exists());
    }

    #[tokio::test(start_paused = true)]
    async fn failure_then_another_host() {
        let harness = Harness::new();
        let operator = FakeOperator::default()
            .pick(Some("broken"))
            .retry_next(true)
            .pick(Some("prod1"));
        // Fatal error: one attempt consumed, no backoff
        let connector = ScriptedConnector::new(healthy_session()).fail_with(
            KubehopError::ConnectionFailure {
                host: "broken".to_string(),
                port: 22,
                reason: "Host key mismatch".to_string(),
                retryable: false,
            },
        );
        let orchestrator = harness.orchestrator(operator.clone(), connector);
        let hosts = vec![
            host("broken", false, NetworkPolicy::Direct),
            host("prod1", false, NetworkPolicy::Direct),
        ];

        let report = completed(orchestrator.run(&inventory(hosts), &FetchOptions::default()).await.unwrap());

        assert_eq!(report.target.alias, "prod1");
        assert_eq!(operator.asked(), vec!["host", "retry broken", "host"]);
    }

    #[tokio::test(start_paused = true)]
    async fn tunnel_failure_still_completes() {
        let mut harness = Harness::new();
        harness.processes = FakeProcesses::new().failing_spawn();
        let orchestrator =
            harness.orchestrator(FakeOperator::default(), ScriptedConnector::new(healthy_session()));

        let report = completed(
            orchestrator
                .run(&inventory(vec![host("prod1", false, NetworkPolicy::Direct)]), &FetchOptions::default())
                .await
                .unwrap(),
        );

        match report.tunnel {
            TunnelReport::Failed { manual_command, .. } => {
                assert!(manual_command.starts_with("ssh -f -N -L "));
                assert!(manual_command.ends_with(":10.0.0.5:6443 prod1"));
            }
            other => panic!("expected failed tunnel, got {:?}", other),
        }
        assert_eq!(
            harness.kubeconfig().current_context.as_deref(),
            Some("acme-prod1")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn empty_organization_has_no_hosts() {
        let harness = Harness::new();
        let orchestrator =
            harness.orchestrator(FakeOperator::default(), ScriptedConnector::new(healthy_session()));

        let err = orchestrator
            .run(&inventory(Vec::new()), &FetchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, KubehopError::NoHosts(ref org) if org == "acme"));
    }

    #[test]
    fn narrowing_by_org_and_host() {
        let mut inventories = inventory(vec![
            host("prod1", false, NetworkPolicy::Direct),
            host("prod2", false, NetworkPolicy::Direct),
        ]);
        inventories.push(Inventory {
            organization: "beta".to_string(),
            path: PathBuf::from("beta_hosts.yml"),
            hosts: vec![host("prod2", false, NetworkPolicy::Direct)],
        });

        let by_host = narrow(
            &inventories,
            &FetchOptions {
                host: Some("prod1".to_string()),
                ..FetchOptions::default()
            },
        )
        .unwrap();
        assert_eq!(by_host.len(), 1);
        assert_eq!(by_host[0].0, "acme");

        let by_org = narrow(
            &inventories,
            &FetchOptions {
                organization: Some("beta".to_string()),
                ..FetchOptions::default()
            },
        )
        .unwrap();
        assert_eq!(by_org[0].1.len(), 1);

        let err = narrow(
            &inventories,
            &FetchOptions {
                host: Some("nope".to_string()),
                ..FetchOptions::default()
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn sshuttle_advisory_carries_command() {
        let target = host(
            "edge",
            true,
            NetworkPolicy::Sshuttle {
                range: "192.168.1.0/24".to_string(),
            },
        );
        let found = advisories(&target, Some("jump@bastion"));
        assert_eq!(found.len(), 2);
        assert_eq!(found[0], Advisory::Vpn);
        assert_eq!(
            found[1],
            Advisory::Sshuttle {
                range: "192.168.1.0/24".to_string(),
                command: Some("sshuttle -v -r jump@bastion 192.168.1.0/24".to_string()),
            }
        );
    }
}
