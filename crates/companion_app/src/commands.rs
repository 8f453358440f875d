use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use companion_core::{TaskId, TaskStatus};
use companion_engine::{
    DownloadTarget, FileStorage, PageStateStore, ReqwestTransport, StudyClient, SystemClock,
    TaskOptions, TaskTracker,
};
use companion_logging::{companion_debug, companion_info};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::time::MissedTickBehavior;

use crate::cli::{Command, StateCommand};
use crate::config::AppConfig;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Everything one invocation needs, wired from the configuration.
pub struct Session {
    store: PageStateStore,
    tracker: TaskTracker,
    client: StudyClient,
}

impl Session {
    pub fn open(config: &AppConfig, data_dir: &Path) -> Result<Self> {
        let storage = Arc::new(FileStorage::new(data_dir.join("storage")));
        let store = PageStateStore::open(storage.clone(), Arc::new(SystemClock), config.store_settings());
        let tracker = TaskTracker::new(store.clone(), config.task_settings(), Handle::current());
        let transport = ReqwestTransport::new(config.transport_settings())
            .context("failed to build the HTTP client")?;
        let client = StudyClient::new(Arc::new(transport), storage, config.client_settings());
        Ok(Self {
            store,
            tracker,
            client,
        })
    }

    pub async fn run(&self, command: Command) -> Result<()> {
        match command {
            Command::State { command } => self.run_state(command),
            Command::Login { token } => {
                self.client.login(&token).context("failed to store the session token")?;
                println!("Logged in.");
                Ok(())
            }
            Command::Logout => {
                self.client
                    .logout(&self.store)
                    .context("failed to remove the session token")?;
                println!("Logged out; cached state cleared.");
                Ok(())
            }
            Command::Upload { file, unit, page } => {
                let scope = self.tracker.scope(page);
                let options = TaskOptions::new().persist_on_navigation(true);
                let id = self.client.upload_document(&scope, file, unit, options);
                let output = self.wait_for(&id).await?;
                print_json(&output)
            }
            Command::Chat {
                message,
                session,
                page,
            } => {
                let scope = self.tracker.scope(page);
                let id = self
                    .client
                    .ask_assistant(&scope, message, session, TaskOptions::new());
                let output = self.wait_for(&id).await?;
                match output.get("response").and_then(Value::as_str) {
                    Some(text) => {
                        println!("{text}");
                        Ok(())
                    }
                    None => print_json(&output),
                }
            }
            Command::Summarize { document_id, page } => {
                let scope = self.tracker.scope(page);
                let id = self
                    .client
                    .summarize_document(&scope, document_id, TaskOptions::new());
                let output = self.wait_for(&id).await?;
                print_json(&output)
            }
            Command::Download {
                remote_path,
                out,
                name,
                page,
            } => {
                let scope = self.tracker.scope(page);
                let target = DownloadTarget {
                    remote_path,
                    dir: out,
                    file_name: name,
                };
                let id = self.client.download_document(&scope, target, TaskOptions::new());
                let output = self.wait_for(&id).await?;
                print_json(&output)
            }
            Command::Health => {
                let health = self.client.ai_health().await.context("health check failed")?;
                println!("{}: {}", health.status, health.message);
                if !health.is_ready() {
                    bail!("AI service is not ready");
                }
                Ok(())
            }
        }
    }

    /// Write any debounced state before the process exits.
    pub fn shutdown(&self) {
        if self.store.flush() {
            companion_debug!("Flushed pending page state on exit");
        }
    }

    fn run_state(&self, command: StateCommand) -> Result<()> {
        match command {
            StateCommand::Get { page } => match self.store.get_page_state(page.as_str()) {
                Some(entry) => print_json(&serde_json::to_value(&entry)?),
                None => bail!("no cached state for page {page}"),
            },
            StateCommand::Set { page, json } => {
                let data: Value =
                    serde_json::from_str(&json).with_context(|| format!("invalid JSON for page {page}"))?;
                self.store.update_page_state(page.as_str(), data);
                Ok(())
            }
            StateCommand::Clear { all: true, .. } => {
                self.store.clear_all_states();
                Ok(())
            }
            StateCommand::Clear { page: Some(page), .. } => {
                self.store.clear_page_state(page.as_str());
                Ok(())
            }
            StateCommand::Clear { page: None, .. } => bail!("a page or --all is required"),
        }
    }

    /// Follow a task until it settles, printing progress changes. Ctrl-C
    /// cancels the task.
    async fn wait_for(&self, id: &TaskId) -> Result<Value> {
        let mut ticker = tokio::time::interval(POLL_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let interrupt = tokio::signal::ctrl_c();
        tokio::pin!(interrupt);
        let mut last_progress = None;

        loop {
            tokio::select! {
                _ = &mut interrupt => {
                    companion_info!("Interrupted; cancelling task {}", id);
                    self.tracker.cancel_task(id);
                    bail!("cancelled");
                }
                _ = ticker.tick() => {}
            }

            let Some(task) = self.tracker.task(id) else {
                bail!("task {id} was cancelled");
            };
            if task.progress != last_progress {
                if let Some(progress) = task.progress {
                    eprintln!("{id}: {progress}%");
                }
                last_progress = task.progress;
            }
            match task.status {
                TaskStatus::Completed => {
                    return Ok(task.data.and_then(|data| data.output().cloned()).unwrap_or(Value::Null));
                }
                TaskStatus::Failed => {
                    let error = task
                        .data
                        .as_ref()
                        .and_then(|data| data.error())
                        .unwrap_or("task failed");
                    bail!("{error}");
                }
                TaskStatus::Pending | TaskStatus::Running => {}
            }
        }
    }
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
