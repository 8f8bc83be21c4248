//! Round-robin scheduler over all enabled streams.
//!
//! The scheduler owns the storage handle; streams are stepped one at a time
//! from the head of a priority queue and re-queued at the tail afterwards.
//! Refreshed streams are queued ahead of the rotation.

use crate::config::{SharedConfig, SyncConfig};
use crate::error::{Result, SyncError};
use crate::remote::{GitHubClient, HttpTransport, RequestPipeline, Transport};
use crate::storage::SqliteStorage;
use crate::sync::events::{EventBus, StreamEvent};
use crate::sync::stream::{ExecOutcome, StreamUnit, SyncContext};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Priority of the regular rotation.
pub const PRIORITY_NORMAL: u8 = 0;
/// Priority of streams the user asked to refresh.
pub const PRIORITY_REFRESH: u8 = 1;

const COMMAND_BUFFER: usize = 16;

/// Builds the transport for a configuration; called again on reconfigure.
pub type TransportFactory = Box<dyn Fn(&SyncConfig) -> Result<Arc<dyn Transport>> + Send + Sync>;

#[derive(Debug)]
struct Task {
    unit: StreamUnit,
    priority: u8,
}

/// Summary of one [`Scheduler::step`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub stream_id: i64,
    pub name: String,
    pub outcome: ExecOutcome,
    pub unread: u64,
}

/// Commands accepted by [`Scheduler::run`].
#[derive(Debug)]
pub enum SchedulerCommand {
    Stop,
    Restart,
    Refresh(i64),
    Delete(i64),
    Reconfigure(Box<SyncConfig>),
    Shutdown,
}

/// Cloneable sender for a running scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<SchedulerCommand>,
}

impl SchedulerHandle {
    /// Create a handle and the receiver to pass to [`Scheduler::run`].
    #[must_use]
    pub fn channel() -> (Self, mpsc::Receiver<SchedulerCommand>) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        (Self { tx }, rx)
    }

    /// # Errors
    ///
    /// Returns an error if the scheduler is no longer running.
    pub async fn send(&self, command: SchedulerCommand) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| SyncError::Other(anyhow::anyhow!("scheduler not running")))
    }

    /// # Errors
    ///
    /// Returns an error if the scheduler is no longer running.
    pub async fn refresh(&self, stream_id: i64) -> Result<()> {
        self.send(SchedulerCommand::Refresh(stream_id)).await
    }

    /// # Errors
    ///
    /// Returns an error if the scheduler is no longer running.
    pub async fn shutdown(&self) -> Result<()> {
        self.send(SchedulerCommand::Shutdown).await
    }
}

pub struct Scheduler {
    storage: SqliteStorage,
    config: SharedConfig,
    pipeline: RequestPipeline,
    client: GitHubClient,
    make_transport: TransportFactory,
    events: EventBus,
    queue: VecDeque<Task>,
    run_token: u64,
    running: bool,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("queue", &self.queue_ids())
            .field("run_token", &self.run_token)
            .field("running", &self.running)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// # Errors
    ///
    /// Returns an error if the transport cannot be built.
    pub fn new(
        storage: SqliteStorage,
        config: SharedConfig,
        make_transport: TransportFactory,
    ) -> Result<Self> {
        let transport = make_transport(&config.load())?;
        let pipeline = RequestPipeline::new(config.clone());
        let client = GitHubClient::new(transport, pipeline.clone());
        Ok(Self {
            storage,
            config,
            pipeline,
            client,
            make_transport,
            events: EventBus::new(),
            queue: VecDeque::new(),
            run_token: 0,
            running: false,
        })
    }

    /// Scheduler talking HTTP through reqwest.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn with_http(storage: SqliteStorage, config: SharedConfig) -> Result<Self> {
        Self::new(
            storage,
            config,
            Box::new(|config: &SyncConfig| {
                Ok(Arc::new(HttpTransport::new(config)?) as Arc<dyn Transport>)
            }),
        )
    }

    #[must_use]
    pub const fn events(&self) -> &EventBus {
        &self.events
    }

    #[must_use]
    pub const fn storage(&self) -> &SqliteStorage {
        &self.storage
    }

    pub const fn storage_mut(&mut self) -> &mut SqliteStorage {
        &mut self.storage
    }

    #[must_use]
    pub const fn client(&self) -> &GitHubClient {
        &self.client
    }

    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.running
    }

    /// Changes whenever the scheduler is started or stopped.
    #[must_use]
    pub const fn run_token(&self) -> u64 {
        self.run_token
    }

    /// Stream ids in queue order.
    #[must_use]
    pub fn queue_ids(&self) -> Vec<i64> {
        self.queue.iter().map(|t| t.unit.id()).collect()
    }

    /// Load enabled streams, system streams first, and start the pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if the streams cannot be loaded.
    pub fn start(&mut self) -> Result<()> {
        if self.running {
            return Ok(());
        }
        for record in self.storage.list_streams()? {
            if !record.enabled {
                continue;
            }
            match StreamUnit::from_record(&record) {
                Ok(unit) => self.push(unit, PRIORITY_NORMAL),
                Err(err) => warn!(stream = record.id, error = %err, "Skipping stream"),
            }
        }
        self.pipeline.start();
        self.running = true;
        self.run_token += 1;
        info!(streams = self.queue.len(), run_token = self.run_token, "Scheduler started");
        Ok(())
    }

    /// Clear the queue and drop this scheduler's pending requests.
    pub fn stop(&mut self) {
        self.queue.clear();
        self.run_token += 1;
        self.running = false;
        self.pipeline.stop();
        let cancelled = self.client.cancel();
        info!(cancelled, "Scheduler stopped");
    }

    /// # Errors
    ///
    /// Returns an error if the streams cannot be reloaded.
    pub fn restart(&mut self) -> Result<()> {
        self.stop();
        self.start()
    }

    /// Queue `unit` after the last task of the same or higher priority.
    /// A unit with the same id already queued is replaced.
    pub fn push(&mut self, unit: StreamUnit, priority: u8) {
        self.queue.retain(|t| t.unit.id() != unit.id());
        let index = self
            .queue
            .iter()
            .rposition(|t| t.priority >= priority)
            .map_or(0, |i| i + 1);
        self.queue.insert(index, Task { unit, priority });
    }

    /// Run the stream at the head of the queue once.
    ///
    /// Returns `None` when the queue is empty.
    ///
    /// # Errors
    ///
    /// Returns storage failures; the stream stays in the rotation.
    pub async fn step(&mut self) -> Result<Option<StepReport>> {
        let Some(Task { mut unit, .. }) = self.queue.pop_front() else {
            return Ok(None);
        };
        let token = self.run_token;
        let config = self.config.load();

        let result = {
            let mut ctx = SyncContext {
                storage: &mut self.storage,
                client: &self.client,
                config: &config,
                events: &self.events,
            };
            unit.exec(&mut ctx).await
        };

        let stream_id = unit.id();
        let name = unit.name().to_string();
        if self.running && self.run_token == token {
            self.push(unit, PRIORITY_NORMAL);
        } else {
            debug!(stream = stream_id, "Dropping stream from a stopped run");
        }

        let outcome = result?;
        let unread = self.storage.unread_count()?;
        self.events.emit(StreamEvent::UnreadCount(unread));

        Ok(Some(StepReport {
            stream_id,
            name,
            outcome,
            unread,
        }))
    }

    /// Reload a stream and queue it ahead of the rotation, clearing any halt.
    ///
    /// # Errors
    ///
    /// Returns `StreamNotFound` if the stream does not exist.
    pub fn refresh_stream(&mut self, id: i64) -> Result<()> {
        let record = self
            .storage
            .get_stream(id)?
            .ok_or(SyncError::StreamNotFound { id })?;
        if !record.enabled {
            self.delete_stream(id);
            return Ok(());
        }
        let mut unit = StreamUnit::from_record(&record)?;
        unit.reset_health();
        self.push(unit, PRIORITY_REFRESH);
        Ok(())
    }

    /// Remove a stream from the queue. Returns whether it was queued.
    pub fn delete_stream(&mut self, id: i64) -> bool {
        let before = self.queue.len();
        self.queue.retain(|t| t.unit.id() != id);
        before != self.queue.len()
    }

    /// Queries the queued unit currently holds.
    #[must_use]
    pub fn stream_queries(&self, id: i64) -> Option<Vec<String>> {
        self.queue
            .iter()
            .find(|t| t.unit.id() == id)
            .map(|t| t.unit.queries().to_vec())
    }

    /// Swap the configuration, rebuild the client, and restart.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot be built or streams cannot be reloaded.
    pub fn reconfigure(&mut self, config: SyncConfig) -> Result<()> {
        let transport = (self.make_transport)(&config)?;
        self.stop();
        self.config.reconfigure(config);
        self.client = GitHubClient::new(transport, self.pipeline.clone());
        self.start()
    }

    /// Step streams every `poll_interval` until shut down.
    ///
    /// # Errors
    ///
    /// Returns the first storage failure.
    pub async fn run(mut self, mut commands: mpsc::Receiver<SchedulerCommand>) -> Result<()> {
        self.start()?;
        loop {
            let interval = self.config.load().poll_interval;
            tokio::select! {
                () = sleep(interval) => {
                    if self.running {
                        if let Some(report) = self.step().await? {
                            debug!(stream = report.stream_id, outcome = ?report.outcome, "Step");
                        }
                    }
                }
                command = commands.recv() => {
                    match command {
                        None | Some(SchedulerCommand::Shutdown) => break,
                        Some(SchedulerCommand::Stop) => self.stop(),
                        Some(SchedulerCommand::Restart) => self.restart()?,
                        Some(SchedulerCommand::Refresh(id)) => {
                            if let Err(err) = self.refresh_stream(id) {
                                warn!(stream = id, error = %err, "Refresh failed");
                            }
                        }
                        Some(SchedulerCommand::Delete(id)) => {
                            self.delete_stream(id);
                        }
                        Some(SchedulerCommand::Reconfigure(config)) => self.reconfigure(*config)?,
                    }
                }
            }
        }
        self.stop();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StreamRecord;
    use crate::remote::RawResponse;
    use async_trait::async_trait;

    struct Unreachable;

    #[async_trait]
    impl Transport for Unreachable {
        async fn get(&self, _path: &str, _query: &[(String, String)]) -> Result<RawResponse> {
            Err(SyncError::api(503, "offline"))
        }
    }

    fn scheduler() -> Scheduler {
        let storage = SqliteStorage::open_memory().unwrap();
        Scheduler::new(
            storage,
            SharedConfig::default(),
            Box::new(|_: &SyncConfig| Ok(Arc::new(Unreachable) as Arc<dyn Transport>)),
        )
        .unwrap()
    }

    fn unit(id: i64) -> StreamUnit {
        StreamUnit::from_record(&StreamRecord {
            id,
            name: format!("s{id}"),
            queries: vec!["is:open".to_string()],
            position: id,
            enabled: true,
            searched_at: None,
        })
        .unwrap()
    }

    #[test]
    fn test_push_orders_by_priority_then_arrival() {
        let mut s = scheduler();
        s.push(unit(1), PRIORITY_NORMAL);
        s.push(unit(2), PRIORITY_NORMAL);
        s.push(unit(3), PRIORITY_REFRESH);
        s.push(unit(4), PRIORITY_REFRESH);
        s.push(unit(5), PRIORITY_NORMAL);
        assert_eq!(s.queue_ids(), vec![3, 4, 1, 2, 5]);

        s.push(unit(2), PRIORITY_REFRESH);
        assert_eq!(s.queue_ids(), vec![3, 4, 2, 1, 5]);
    }

    #[tokio::test]
    async fn test_start_loads_enabled_streams_system_first() {
        let mut s = scheduler();
        let a = s
            .storage_mut()
            .create_stream("a", &["is:open".to_string()], None)
            .unwrap();
        let b = s
            .storage_mut()
            .create_stream("b", &["is:pr".to_string()], None)
            .unwrap();
        s.storage_mut().set_stream_enabled(b.id, false).unwrap();
        s.storage_mut().set_stream_enabled(-2, false).unwrap();

        s.start().unwrap();
        assert_eq!(s.queue_ids(), vec![-1, -3, -4, a.id]);
        assert_eq!(s.stream_queries(a.id), Some(vec!["is:open".to_string()]));

        let token = s.run_token();
        s.stop();
        assert!(s.queue_ids().is_empty());
        assert_ne!(s.run_token(), token);
    }

    #[tokio::test]
    async fn test_refresh_and_delete() {
        let mut s = scheduler();
        let a = s
            .storage_mut()
            .create_stream("a", &["is:open".to_string()], None)
            .unwrap();
        s.start().unwrap();

        s.refresh_stream(a.id).unwrap();
        assert_eq!(s.queue_ids()[0], a.id);
        assert!(matches!(s.refresh_stream(99), Err(SyncError::StreamNotFound { id: 99 })));

        assert!(s.delete_stream(a.id));
        assert!(!s.delete_stream(a.id));
        assert!(s.stream_queries(a.id).is_none());
    }

    #[tokio::test]
    async fn test_step_requeues_after_failure() {
        let mut s = scheduler();
        let a = s
            .storage_mut()
            .create_stream("a", &["is:open".to_string()], None)
            .unwrap();
        for id in [-1, -2, -3, -4] {
            s.storage_mut().set_stream_enabled(id, false).unwrap();
        }
        s.reconfigure(SyncConfig {
            api_interval: std::time::Duration::ZERO,
            ..SyncConfig::default()
        })
        .unwrap();

        let mut events = s.events().subscribe();
        let report = s.step().await.unwrap().unwrap();
        assert_eq!(report.stream_id, a.id);
        assert_eq!(report.outcome, ExecOutcome::Failed);
        assert_eq!(s.queue_ids(), vec![a.id]);
        assert_eq!(events.recv().await.unwrap(), StreamEvent::UnreadCount(0));

        let report = s.step().await.unwrap().unwrap();
        assert_eq!(report.outcome, ExecOutcome::Skipped);
    }
}
