//! Simple example module
//!
//! Demonstrates:
//! - Registering an entry point with the guest runtime
//! - Reading constructor parameters (name, data directory, config)
//! - Start/stop hooks driving a background task
//!
//! Build it and copy the binary next to `module/module.json` as `module.bin`,
//! then point `module-host --modules-dir` at the parent directory.

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tracing::info;

use module_host::module::guest::{GuestRuntime, ModuleEntry};
use module_host::module::ModuleContext;
use module_host::utils::init_module_logging;

struct Heartbeat {
    context: ModuleContext,
    period: Duration,
    task: Option<JoinHandle<()>>,
}

impl Heartbeat {
    fn new(context: ModuleContext) -> anyhow::Result<Self> {
        let secs: u64 = context.get_config_or("heartbeat_secs", "5").parse()?;
        Ok(Self {
            context,
            period: Duration::from_secs(secs.max(1)),
            task: None,
        })
    }
}

#[async_trait]
impl ModuleEntry for Heartbeat {
    async fn start(&mut self) -> anyhow::Result<()> {
        info!(
            "Module {} v{} starting in {:?}",
            self.context.module_name, self.context.version, self.context.data_dir
        );

        let name = self.context.module_name.clone();
        let mut ticker = interval(self.period);
        self.task = Some(tokio::spawn(async move {
            loop {
                ticker.tick().await;
                info!("Module {} running (heartbeat)", name);
            }
        }));
        Ok(())
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        info!("Module {} stopped", self.context.module_name);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_module_logging("simple_module", None);

    GuestRuntime::new()
        .entry("simple.Heartbeat", |context| {
            Ok(Box::new(Heartbeat::new(context)?) as Box<dyn ModuleEntry>)
        })
        .export("simple.Heartbeat")
        .run()
        .await
}
