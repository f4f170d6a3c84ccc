// Process lifecycle contract.
//
// How processes are launched and killed belongs to the cluster launcher. The
// runner only ever calls this trait, and only from inside an interceptor.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    BeaconNode,
    ValidatorClient,
    /// Execution-layer companion process of a beacon node.
    ExecutionClient,
}

impl Component {
    pub fn as_str(&self) -> &'static str {
        match self {
            Component::BeaconNode => "beacon_node",
            Component::ValidatorClient => "validator_client",
            Component::ExecutionClient => "execution_client",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait ProcessLifecycle: Send + Sync {
    async fn stop(&self, component: Component, node: usize) -> Result<(), String>;
    async fn start(&self, component: Component, node: usize) -> Result<(), String>;
    async fn is_running(&self, component: Component, node: usize) -> Result<bool, String>;
}

/// Shell command templates for one component. `{index}` is replaced by the
/// node index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandTemplates {
    pub stop: String,
    pub start: String,
    /// Exit status 0 means running. Without it, the last issued action is
    /// taken as the process state.
    #[serde(default)]
    pub status: Option<String>,
}

/// `ProcessLifecycle` that shells out to configured commands.
///
/// Each command is killed once it runs past the command timeout.
pub struct CommandLifecycle {
    templates: HashMap<Component, CommandTemplates>,
    stopped: Mutex<HashSet<(Component, usize)>>,
    timeout: Duration,
}

impl CommandLifecycle {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

    pub fn new(templates: HashMap<Component, CommandTemplates>) -> Self {
        CommandLifecycle {
            templates,
            stopped: Mutex::new(HashSet::new()),
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn template(&self, component: Component) -> Result<&CommandTemplates, String> {
        self.templates
            .get(&component)
            .ok_or_else(|| format!("no commands configured for {}", component))
    }

    async fn run(&self, cmd: &str, node: usize) -> Result<bool, String> {
        let cmd = cmd.replace("{index}", &node.to_string());
        debug!(%cmd, "running lifecycle command");
        let status = Command::new("sh")
            .arg("-c")
            .arg(&cmd)
            .kill_on_drop(true)
            .status();
        let status = timeout(self.timeout, status)
            .await
            .map_err(|_| format!("`{}` did not finish within {:?}", cmd, self.timeout))?
            .map_err(|e| format!("`{}` could not be spawned: {}", cmd, e))?;
        Ok(status.success())
    }
}

#[async_trait]
impl ProcessLifecycle for CommandLifecycle {
    async fn stop(&self, component: Component, node: usize) -> Result<(), String> {
        let t = self.template(component)?;
        if !self.run(&t.stop, node).await? {
            return Err(format!("stop command for {} exited non-zero", component));
        }
        self.stopped.lock().insert((component, node));
        info!(%component, node, "stopped");
        Ok(())
    }

    async fn start(&self, component: Component, node: usize) -> Result<(), String> {
        let t = self.template(component)?;
        if !self.run(&t.start, node).await? {
            return Err(format!("start command for {} exited non-zero", component));
        }
        self.stopped.lock().remove(&(component, node));
        info!(%component, node, "started");
        Ok(())
    }

    async fn is_running(&self, component: Component, node: usize) -> Result<bool, String> {
        let t = self.template(component)?;
        match &t.status {
            Some(cmd) => self.run(cmd, node).await,
            None => Ok(!self.stopped.lock().contains(&(component, node))),
        }
    }
}
