mod task;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use cell_core::Instance;
use cell_exec::select;
use cell_observe::init_logger;

use task::{TaskFile, task_path};

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    // 1) task file
    let path = task_path(std::env::args().skip(1))?;
    let task = TaskFile::load(&path)?;

    // 2) logger
    init_logger(&task.logger)?;
    info!(path = %path.display(), "task file loaded");

    // 3) instance
    let instance = select(task.instance.as_ref(), &task.commands, &task.working_dir)?;
    let config = task.run_config();
    info!(
        instance = instance.name(),
        working_dir = %instance.working_directory(config.project_dir(), config.dirty_mode()),
        "instance selected"
    );

    // 4) ctrl-c cancels the run; teardown still completes
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling task");
            on_signal.cancel();
        }
    });

    // 5) run
    instance
        .run(cancel, &config)
        .await
        .with_context(|| format!("{} instance failed", instance.name()))?;
    info!("task finished");
    Ok(())
}
