//! Module process spawning and management
//!
//! Each loaded module runs as its own child process: a fresh namespace with
//! its own address space. The host talks to it over the child's stdin/stdout
//! and forwards its stderr to the log.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

use crate::module::ipc::client::ModuleIpcClient;
use crate::module::ipc::protocol::{HostRequest, ReplyPayload};
use crate::module::traits::ModuleError;

/// Spawn module processes
#[derive(Debug, Clone)]
pub struct ModuleProcessSpawner {
    /// Timeout applied to every request sent to a spawned process
    pub request_timeout: Duration,
}

impl ModuleProcessSpawner {
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }

    /// Spawn `artifact` for `module_name` with `working_dir` as its current directory
    pub async fn spawn(
        &self,
        module_name: &str,
        artifact: &Path,
        working_dir: &Path,
    ) -> Result<ModuleProcess, ModuleError> {
        info!("Spawning module process: {}", module_name);

        if !artifact.is_file() {
            return Err(ModuleError::backend(
                module_name,
                format!("Module artifact not found: {:?}", artifact),
            ));
        }

        let mut command = Command::new(artifact);
        command
            .current_dir(working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env("MODULE_NAME", module_name)
            .kill_on_drop(true);

        debug!("Spawning process: {:?}", command);

        let mut child = spawn_command(&mut command).await.map_err(|e| {
            ModuleError::backend(module_name, format!("Failed to spawn module process: {}", e))
        })?;

        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                let _ = child.kill().await;
                return Err(ModuleError::IpcError(format!(
                    "Module process {} has no stdio pipes",
                    module_name
                )));
            }
        };

        let stderr_task = child.stderr.take().map(|stderr| {
            let name = module_name.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    info!(module = %name, "{}", line);
                }
            })
        });

        Ok(ModuleProcess {
            module_name: module_name.to_string(),
            namespace: uuid::Uuid::new_v4().to_string(),
            process: child,
            client: Some(ModuleIpcClient::new(stdout, stdin, self.request_timeout)),
            stderr_task,
        })
    }
}

/// Spawn, retrying briefly while the artifact is still open for writing
/// (a freshly replaced artifact can report ETXTBSY)
#[cfg(all(unix, feature = "nix"))]
async fn spawn_command(command: &mut Command) -> std::io::Result<Child> {
    const ATTEMPTS: u32 = 5;

    let mut attempt = 1;
    loop {
        match command.spawn() {
            Err(e) if e.raw_os_error() == Some(nix::errno::Errno::ETXTBSY as i32) && attempt < ATTEMPTS => {
                debug!("Artifact busy, retrying spawn (attempt {})", attempt);
                tokio::time::sleep(Duration::from_millis(20 * u64::from(attempt))).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}

#[cfg(not(all(unix, feature = "nix")))]
async fn spawn_command(command: &mut Command) -> std::io::Result<Child> {
    command.spawn()
}

/// Running module process
pub struct ModuleProcess {
    /// Module name
    pub module_name: String,
    /// Namespace id, unique per spawned process
    pub namespace: String,
    process: Child,
    client: Option<ModuleIpcClient<ChildStdout, ChildStdin>>,
    stderr_task: Option<JoinHandle<()>>,
}

impl ModuleProcess {
    /// Get the process ID (None once reaped)
    pub fn id(&self) -> Option<u32> {
        self.process.id()
    }

    /// Check if process is still running
    pub fn is_running(&mut self) -> bool {
        !matches!(self.process.try_wait(), Ok(Some(_)))
    }

    /// Send a request to the module
    pub async fn request(&mut self, request: HostRequest) -> Result<ReplyPayload, ModuleError> {
        match self.client.as_mut() {
            Some(client) => client.request(request).await,
            None => Err(ModuleError::IpcError(format!(
                "Module process {} is shut down",
                self.module_name
            ))),
        }
    }

    /// Send a request that must be answered with `ok`
    pub async fn request_ok(&mut self, request: HostRequest) -> Result<(), ModuleError> {
        match self.client.as_mut() {
            Some(client) => client.request_ok(request).await,
            None => Err(ModuleError::IpcError(format!(
                "Module process {} is shut down",
                self.module_name
            ))),
        }
    }

    /// Send a request with an explicit timeout
    pub async fn request_within(
        &mut self,
        request: HostRequest,
        wait: Duration,
    ) -> Result<ReplyPayload, ModuleError> {
        match self.client.as_mut() {
            Some(client) => client.request_within(request, wait).await,
            None => Err(ModuleError::IpcError(format!(
                "Module process {} is shut down",
                self.module_name
            ))),
        }
    }

    /// Ask the module to exit, then make sure it did
    ///
    /// Sends `shutdown`, closes the pipes and waits up to `grace` for the
    /// process to exit. A process still alive after that is terminated. The
    /// child is always reaped before this returns.
    pub async fn shutdown(&mut self, grace: Duration) -> Result<ExitStatus, ModuleError> {
        debug!("Shutting down module process: {}", self.module_name);

        if let Some(mut client) = self.client.take() {
            if let Err(e) = client.request_ok(HostRequest::Shutdown).await {
                debug!("Module {} did not acknowledge shutdown: {}", self.module_name, e);
            }
            drop(client.into_inner());
        }

        let status = match timeout(grace, self.process.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                warn!(
                    "Module process {} did not exit within {:?}, terminating",
                    self.module_name, grace
                );
                self.terminate(grace).await?
            }
        };

        if let Some(task) = self.stderr_task.take() {
            if timeout(grace, task).await.is_err() {
                debug!("Stderr of module {} still open after exit", self.module_name);
            }
        }

        info!("Module process {} exited ({})", self.module_name, status);
        Ok(status)
    }

    /// Kill the process and reap it
    pub async fn kill(&mut self) -> Result<(), ModuleError> {
        debug!("Killing module process: {}", self.module_name);

        self.client.take();
        if let Err(e) = self.process.kill().await {
            warn!("Failed to kill module process {}: {}", self.module_name, e);
        }
        self.process.wait().await?;
        Ok(())
    }

    #[cfg(all(unix, feature = "nix"))]
    async fn terminate(&mut self, grace: Duration) -> Result<ExitStatus, ModuleError> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = self.process.id() {
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                debug!("SIGTERM to module {} failed: {}", self.module_name, e);
            } else if let Ok(status) = timeout(grace, self.process.wait()).await {
                return Ok(status?);
            }
        }
        self.kill().await?;
        Ok(self.process.wait().await?)
    }

    #[cfg(not(all(unix, feature = "nix")))]
    async fn terminate(&mut self, _grace: Duration) -> Result<ExitStatus, ModuleError> {
        self.kill().await?;
        Ok(self.process.wait().await?)
    }
}
