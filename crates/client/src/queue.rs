//! Bounded-concurrency upload queue.
//!
//! Tasks move `Waiting -> Uploading -> Success | Error`, with `Paused` via
//! [`UploadQueue::pause`]. At most `max_concurrent` tasks upload at once;
//! free slots go to the waiting task created first.
//!
//! Every run of a task gets its own [`CancellationToken`] and generation
//! number. Updates from a run are applied only while that generation is
//! still the task's active one, so a response that arrives after a pause or
//! cancel can never overwrite the state those set.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use chunkvault_hasher::{FileFingerprint, Fingerprinter};
use chunkvault_protocol::CancelRequest;
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ClientError;
use crate::progress::SpeedCalculator;
use crate::protocol::{ProtocolClient, ProtocolUpdate, UploadJob};
use crate::transport::UploadTransport;
use crate::types::{AddOptions, QueueConfig, QueueEvent, TaskStatus, UploadTask};

/// Handle to the queue. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct UploadQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    transport: Arc<dyn UploadTransport>,
    chunk_size: usize,
    hash_workers: Option<usize>,
    state: Mutex<QueueState>,
    events_tx: mpsc::UnboundedSender<QueueEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<QueueEvent>>>,
    changed: Notify,
    next_generation: AtomicU64,
}

struct QueueState {
    tasks: Vec<TaskEntry>,
    max_concurrent: usize,
    next_seq: u64,
}

struct TaskEntry {
    task: UploadTask,
    plan: Arc<FileFingerprint>,
    /// Tie-breaker for tasks created in the same instant.
    seq: u64,
    active: Option<ActiveRun>,
    speed: SpeedCalculator,
}

struct ActiveRun {
    generation: u64,
    cancel: CancellationToken,
}

/// A run that `pump` decided to start.
struct Launch {
    task_id: String,
    generation: u64,
    cancel: CancellationToken,
    job: UploadJob,
}

impl UploadQueue {
    pub fn new(transport: Arc<dyn UploadTransport>, config: QueueConfig) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(QueueInner {
                transport,
                chunk_size: config.chunk_size,
                hash_workers: config.hash_workers,
                state: Mutex::new(QueueState {
                    tasks: Vec::new(),
                    max_concurrent: config.max_concurrent.max(1),
                    next_seq: 0,
                }),
                events_tx,
                events_rx: Mutex::new(Some(events_rx)),
                changed: Notify::new(),
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<QueueEvent>> {
        self.inner
            .events_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    /// Fingerprints `path` on the blocking pool and queues it.
    pub async fn add_file(
        &self,
        path: impl AsRef<Path>,
        options: AddOptions,
    ) -> Result<String, ClientError> {
        let path = path.as_ref().to_path_buf();
        let fingerprinter =
            Fingerprinter::new(self.inner.chunk_size).with_workers(self.inner.hash_workers);
        let hash_path = path.clone();
        let plan = tokio::task::spawn_blocking(move || fingerprinter.fingerprint_file(&hash_path))
            .await
            .map_err(|e| ClientError::Protocol(format!("fingerprint task failed: {e}")))??;
        Ok(self.add_fingerprinted(path, plan, options))
    }

    /// Queues a file whose fingerprint is already known.
    pub fn add_fingerprinted(
        &self,
        path: PathBuf,
        plan: FileFingerprint,
        options: AddOptions,
    ) -> String {
        let task_id = uuid::Uuid::new_v4().to_string();
        let file_name = options.file_name.unwrap_or_else(|| {
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "upload.bin".to_string())
        });
        let task = UploadTask {
            id: task_id.clone(),
            file_path: path,
            file_name,
            file_size: plan.file_size,
            content_fingerprint: plan.fingerprint.clone(),
            chunk_digests: plan.chunk_digests.clone(),
            status: TaskStatus::Waiting,
            total_chunks: plan.chunk_count(),
            uploaded_chunk_count: 0,
            remaining_chunk_digests: plan.chunk_digests.clone(),
            result_file_id: None,
            last_error: None,
            created_at: Utc::now(),
            destination_folder_id: options.destination_folder_id,
            mime_type: options.mime_type,
        };
        info!(
            task_id = %task_id,
            file = %task.file_name,
            chunks = task.total_chunks,
            "task added"
        );

        {
            let mut state = self.inner.lock_state();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.tasks.push(TaskEntry {
                task,
                plan: Arc::new(plan),
                seq,
                active: None,
                speed: SpeedCalculator::default(),
            });
        }
        self.inner.emit(QueueEvent::TaskAdded {
            task_id: task_id.clone(),
        });
        self.pump();
        task_id
    }

    /// Stops an uploading or waiting task. The store keeps its session.
    pub fn pause(&self, task_id: &str) -> Result<(), ClientError> {
        {
            let mut state = self.inner.lock_state();
            let entry = find_mut(&mut state, task_id)?;
            match entry.task.status {
                TaskStatus::Uploading | TaskStatus::Waiting => {}
                status => return Err(invalid(task_id, status)),
            }
            if let Some(run) = entry.active.take() {
                run.cancel.cancel();
            }
            entry.task.status = TaskStatus::Paused;
            entry.speed.reset();
        }
        info!(task_id, "task paused");
        self.inner.status_changed(task_id, TaskStatus::Paused);
        self.pump();
        Ok(())
    }

    /// Re-queues a paused task.
    pub fn resume(&self, task_id: &str) -> Result<(), ClientError> {
        self.requeue(task_id, TaskStatus::Paused)?;
        info!(task_id, "task resumed");
        Ok(())
    }

    /// Re-queues a failed task.
    pub fn retry(&self, task_id: &str) -> Result<(), ClientError> {
        self.requeue(task_id, TaskStatus::Error)?;
        info!(task_id, "task retried");
        Ok(())
    }

    fn requeue(&self, task_id: &str, from: TaskStatus) -> Result<(), ClientError> {
        {
            let mut state = self.inner.lock_state();
            let entry = find_mut(&mut state, task_id)?;
            if entry.task.status != from {
                return Err(invalid(task_id, entry.task.status));
            }
            entry.task.status = TaskStatus::Waiting;
            entry.task.last_error = None;
        }
        self.inner.status_changed(task_id, TaskStatus::Waiting);
        self.pump();
        Ok(())
    }

    /// Removes an unfinished task, aborting its run, and asks the store to
    /// drop the session. The store notification is best effort.
    pub async fn cancel(&self, task_id: &str) -> Result<(), ClientError> {
        let fingerprint = {
            let mut state = self.inner.lock_state();
            let pos = state
                .tasks
                .iter()
                .position(|e| e.task.id == task_id)
                .ok_or_else(|| ClientError::TaskNotFound(task_id.to_string()))?;
            let status = state.tasks[pos].task.status;
            if status == TaskStatus::Success {
                return Err(invalid(task_id, status));
            }
            let entry = state.tasks.remove(pos);
            if let Some(run) = entry.active {
                run.cancel.cancel();
            }
            entry.task.content_fingerprint
        };
        info!(task_id, "task cancelled");
        self.inner.emit(QueueEvent::Removed {
            task_id: task_id.to_string(),
        });
        self.inner.changed.notify_waiters();
        self.pump();

        let req = CancelRequest {
            content_fingerprint: fingerprint,
        };
        match self.inner.transport.cancel(&req).await {
            Ok(resp) if resp.success => {}
            Ok(_) => warn!(task_id, "store could not discard session"),
            Err(e) => warn!(task_id, error = %e, "failed to notify store of cancel"),
        }
        Ok(())
    }

    /// Removes tasks in `Success` or `Error`. Returns how many were removed.
    pub fn clear_completed(&self) -> usize {
        let removed: Vec<String> = {
            let mut state = self.inner.lock_state();
            let (done, keep): (Vec<TaskEntry>, Vec<TaskEntry>) = state
                .tasks
                .drain(..)
                .partition(|e| e.task.status.is_finished());
            state.tasks = keep;
            done.into_iter().map(|e| e.task.id).collect()
        };
        for task_id in &removed {
            self.inner.emit(QueueEvent::Removed {
                task_id: task_id.clone(),
            });
        }
        if !removed.is_empty() {
            self.inner.changed.notify_waiters();
        }
        removed.len()
    }

    /// Changes the concurrency limit, starting waiting tasks if it grew.
    pub fn set_max_concurrent(&self, max_concurrent: usize) {
        self.inner.lock_state().max_concurrent = max_concurrent.max(1);
        self.pump();
    }

    pub fn max_concurrent(&self) -> usize {
        self.inner.lock_state().max_concurrent
    }

    /// Snapshot of all tasks in creation order.
    pub fn tasks(&self) -> Vec<UploadTask> {
        self.inner
            .lock_state()
            .tasks
            .iter()
            .map(|e| e.task.clone())
            .collect()
    }

    pub fn task(&self, task_id: &str) -> Option<UploadTask> {
        self.inner
            .lock_state()
            .tasks
            .iter()
            .find(|e| e.task.id == task_id)
            .map(|e| e.task.clone())
    }

    /// Waits until no task is waiting or uploading.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            let busy = self.inner.lock_state().tasks.iter().any(|e| {
                matches!(
                    e.task.status,
                    TaskStatus::Waiting | TaskStatus::Uploading
                )
            });
            if !busy {
                return;
            }
            notified.await;
        }
    }

    /// Promotes waiting tasks into free slots, oldest first.
    fn pump(&self) {
        let launches = {
            let mut state = self.inner.lock_state();
            let mut launches = Vec::new();
            loop {
                let uploading = state
                    .tasks
                    .iter()
                    .filter(|e| e.task.status == TaskStatus::Uploading)
                    .count();
                if uploading >= state.max_concurrent {
                    break;
                }
                let Some(entry) = state
                    .tasks
                    .iter_mut()
                    .filter(|e| e.task.status == TaskStatus::Waiting)
                    .min_by_key(|e| (e.task.created_at, e.seq))
                else {
                    break;
                };

                let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
                let cancel = CancellationToken::new();
                entry.task.status = TaskStatus::Uploading;
                entry.active = Some(ActiveRun {
                    generation,
                    cancel: cancel.clone(),
                });
                entry.speed.reset();
                entry.speed.add_sample(0);
                launches.push(Launch {
                    task_id: entry.task.id.clone(),
                    generation,
                    cancel,
                    job: UploadJob {
                        path: entry.task.file_path.clone(),
                        plan: Arc::clone(&entry.plan),
                        file_name: entry.task.file_name.clone(),
                        destination_folder_id: entry.task.destination_folder_id.clone(),
                        mime_type: entry.task.mime_type.clone(),
                    },
                });
            }
            launches
        };

        for launch in launches {
            debug!(task_id = %launch.task_id, generation = launch.generation, "task started");
            self.inner
                .status_changed(&launch.task_id, TaskStatus::Uploading);
            let queue = self.clone();
            tokio::spawn(async move { queue.run(launch).await });
        }
    }

    async fn run(self, launch: Launch) {
        let Launch {
            task_id,
            generation,
            cancel,
            job,
        } = launch;

        let result = {
            let client = ProtocolClient::new(self.inner.transport.as_ref(), cancel);
            let inner = Arc::clone(&self.inner);
            let id = task_id.clone();
            client
                .upload(&job, move |update| inner.apply_update(&id, generation, update))
                .await
        };

        self.inner.finish(&task_id, generation, result);
        self.pump();
    }
}

impl QueueInner {
    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: QueueEvent) {
        // The receiver may have been dropped; events are advisory.
        let _ = self.events_tx.send(event);
    }

    fn status_changed(&self, task_id: &str, status: TaskStatus) {
        self.emit(QueueEvent::StatusChanged {
            task_id: task_id.to_string(),
            status,
        });
        self.changed.notify_waiters();
    }

    fn apply_update(&self, task_id: &str, generation: u64, update: ProtocolUpdate) {
        let event = {
            let mut state = self.lock_state();
            let Some(entry) = active_entry(&mut state, task_id, generation) else {
                return;
            };
            let (uploaded, remaining, bytes) = match update {
                ProtocolUpdate::Handshake {
                    uploaded,
                    remaining,
                } => (uploaded, remaining, 0),
                ProtocolUpdate::ChunkSent {
                    uploaded,
                    remaining,
                    bytes,
                } => (uploaded, remaining, bytes),
            };
            entry.task.uploaded_chunk_count = uploaded;
            entry.task.remaining_chunk_digests = remaining;
            if bytes > 0 {
                entry.speed.add_sample(bytes);
            }
            QueueEvent::Progress {
                task_id: task_id.to_string(),
                uploaded,
                total: entry.task.total_chunks,
                bytes_per_second: entry.speed.bytes_per_second(),
            }
        };
        self.emit(event);
    }

    fn finish(&self, task_id: &str, generation: u64, result: Result<String, ClientError>) {
        let events = {
            let mut state = self.lock_state();
            let Some(entry) = active_entry(&mut state, task_id, generation) else {
                // Paused or cancelled while in flight; that outcome stands.
                debug!(task_id, generation, "ignoring result of superseded run");
                return;
            };
            entry.active = None;

            match result {
                Ok(file_id) => {
                    info!(task_id, file_id = %file_id, "upload complete");
                    entry.task.status = TaskStatus::Success;
                    entry.task.uploaded_chunk_count = entry.task.total_chunks;
                    entry.task.remaining_chunk_digests.clear();
                    entry.task.result_file_id = Some(file_id.clone());
                    vec![
                        QueueEvent::StatusChanged {
                            task_id: task_id.to_string(),
                            status: TaskStatus::Success,
                        },
                        QueueEvent::Completed {
                            task_id: task_id.to_string(),
                            file_id,
                        },
                    ]
                }
                Err(ClientError::Cancelled) => {
                    // Token fired without pause/cancel clearing the run.
                    entry.task.status = TaskStatus::Paused;
                    vec![QueueEvent::StatusChanged {
                        task_id: task_id.to_string(),
                        status: TaskStatus::Paused,
                    }]
                }
                Err(e) => {
                    warn!(task_id, error = %e, retryable = e.is_retryable(), "upload failed");
                    let error = e.to_string();
                    entry.task.status = TaskStatus::Error;
                    entry.task.last_error = Some(error.clone());
                    vec![
                        QueueEvent::StatusChanged {
                            task_id: task_id.to_string(),
                            status: TaskStatus::Error,
                        },
                        QueueEvent::Failed {
                            task_id: task_id.to_string(),
                            error,
                        },
                    ]
                }
            }
        };
        for event in events {
            self.emit(event);
        }
        self.changed.notify_waiters();
    }
}

/// The task's entry, if `generation` is still its active run.
fn active_entry<'s>(
    state: &'s mut QueueState,
    task_id: &str,
    generation: u64,
) -> Option<&'s mut TaskEntry> {
    state.tasks.iter_mut().find(|e| {
        e.task.id == task_id
            && e.active
                .as_ref()
                .is_some_and(|run| run.generation == generation)
    })
}

fn find_mut<'s>(state: &'s mut QueueState, task_id: &str) -> Result<&'s mut TaskEntry, ClientError> {
    state
        .tasks
        .iter_mut()
        .find(|e| e.task.id == task_id)
        .ok_or_else(|| ClientError::TaskNotFound(task_id.to_string()))
}

fn invalid(task_id: &str, status: TaskStatus) -> ClientError {
    ClientError::InvalidTransition {
        task_id: task_id.to_string(),
        status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{LocalTransport, Store, wait_until};

    fn config(chunk_size: usize, max_concurrent: usize) -> QueueConfig {
        QueueConfig {
            max_concurrent,
            chunk_size,
            hash_workers: Some(2),
        }
    }

    fn patterned(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8 ^ seed).collect()
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<QueueEvent>) -> Vec<QueueEvent> {
        let mut events = Vec::new();
        while let Ok(e) = rx.try_recv() {
            events.push(e);
        }
        events
    }

    fn count(queue: &UploadQueue, status: TaskStatus) -> usize {
        queue.tasks().iter().filter(|t| t.status == status).count()
    }

    #[tokio::test]
    async fn upload_completes_with_events() {
        let store = Store::new(u64::MAX);
        let transport = Arc::new(LocalTransport::new(store.service.clone(), "alice"));
        let queue = UploadQueue::new(transport.clone(), config(64, 3));
        let mut events = queue.take_events().unwrap();

        let path = store.write_file("a.bin", &patterned(300, 1));
        let id = queue.add_file(&path, AddOptions::default()).await.unwrap();
        queue.wait_idle().await;

        let task = queue.task(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Success);
        assert_eq!(task.total_chunks, 5);
        assert_eq!(task.uploaded_chunk_count, 5);
        assert!(task.remaining_chunk_digests.is_empty());
        assert!((task.percentage() - 100.0).abs() < f64::EPSILON);
        let file_id = task.result_file_id.clone().unwrap();

        let events = drain(&mut events);
        assert_eq!(events[0], QueueEvent::TaskAdded { task_id: id.clone() });
        assert!(events.contains(&QueueEvent::StatusChanged {
            task_id: id.clone(),
            status: TaskStatus::Uploading
        }));
        assert!(
            events
                .iter()
                .any(|e| matches!(e, QueueEvent::Progress { uploaded: 4, total: 5, .. }))
        );
        assert_eq!(
            events.last(),
            Some(&QueueEvent::Completed {
                task_id: id,
                file_id: file_id.clone()
            })
        );

        let records = store.catalog.records().await;
        assert_eq!(records[0].id, file_id);
        assert_eq!(records[0].name, "a.bin");
        assert_eq!(std::fs::read(&records[0].location).unwrap(), patterned(300, 1));
    }

    #[tokio::test]
    async fn twenty_five_mib_file_goes_up_in_three_chunks() {
        const MIB: usize = 1024 * 1024;
        let store = Store::new(u64::MAX);
        let transport = Arc::new(LocalTransport::new(store.service.clone(), "alice"));
        let queue = UploadQueue::new(transport.clone(), QueueConfig::default());

        let data = patterned(25 * MIB, 7);
        let path = store.write_file("big.bin", &data);
        let id = queue.add_file(&path, AddOptions::default()).await.unwrap();
        queue.wait_idle().await;

        let task = queue.task(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Success);
        assert_eq!(task.total_chunks, 3);
        assert!(task.result_file_id.is_some());

        let sizes: Vec<usize> = transport.chunks.lock().unwrap().iter().map(|c| c.1).collect();
        assert_eq!(sizes, vec![10 * MIB, 10 * MIB, 5 * MIB]);
        let records = store.catalog.records().await;
        assert_eq!(records[0].size, 25 * MIB as u64);
    }

    #[tokio::test]
    async fn empty_file_uploads_one_chunk() {
        let store = Store::new(u64::MAX);
        let transport = Arc::new(LocalTransport::new(store.service.clone(), "alice"));
        let queue = UploadQueue::new(transport.clone(), config(64, 3));

        let path = store.write_file("empty", b"");
        let id = queue.add_file(&path, AddOptions::default()).await.unwrap();
        queue.wait_idle().await;

        assert_eq!(queue.task(&id).unwrap().status, TaskStatus::Success);
        assert_eq!(
            *transport.chunks.lock().unwrap(),
            vec![("d41d8cd98f00b204e9800998ecf8427e".to_string(), 0)]
        );

        // Second empty file is instant.
        let path = store.write_file("empty2", b"");
        let id = queue.add_file(&path, AddOptions::default()).await.unwrap();
        queue.wait_idle().await;
        assert_eq!(queue.task(&id).unwrap().status, TaskStatus::Success);
        assert_eq!(transport.chunks.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn same_content_again_is_instant() {
        let store = Store::new(u64::MAX);
        let alice = Arc::new(LocalTransport::new(store.service.clone(), "alice"));
        let queue = UploadQueue::new(alice.clone(), config(64, 3));
        let path = store.write_file("a.bin", &patterned(200, 3));

        queue.add_file(&path, AddOptions::default()).await.unwrap();
        queue.wait_idle().await;
        let sent = alice.chunks.lock().unwrap().len();
        assert_eq!(sent, 4);

        let again = queue.add_file(&path, AddOptions::default()).await.unwrap();
        queue.wait_idle().await;
        assert_eq!(queue.task(&again).unwrap().status, TaskStatus::Success);
        assert_eq!(alice.chunks.lock().unwrap().len(), sent);

        // A different owner dedups too, with a record of their own.
        let bob = Arc::new(LocalTransport::new(store.service.clone(), "bob"));
        let bob_queue = UploadQueue::new(bob.clone(), config(64, 3));
        let id = bob_queue.add_file(&path, AddOptions::default()).await.unwrap();
        bob_queue.wait_idle().await;
        let task = bob_queue.task(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Success);
        assert!(bob.chunks.lock().unwrap().is_empty());

        let bobs = store.catalog.records_for("bob").await;
        assert_eq!(bobs.len(), 1);
        assert_eq!(Some(bobs[0].id.clone()), task.result_file_id);
        assert_eq!(store.catalog.records_for("alice").await.len(), 2);
    }

    #[tokio::test]
    async fn concurrency_limit_is_respected() {
        let store = Store::new(u64::MAX);
        let transport = Arc::new(LocalTransport::gated(store.service.clone(), "alice", 0));
        let queue = UploadQueue::new(transport.clone(), config(64, 3));

        for i in 0..5u8 {
            let path = store.write_file(&format!("f{i}"), &patterned(100, i));
            queue.add_file(&path, AddOptions::default()).await.unwrap();
        }
        transport.wait_arrived(3).await;
        assert_eq!(count(&queue, TaskStatus::Uploading), 3);
        assert_eq!(count(&queue, TaskStatus::Waiting), 2);

        transport.open_gate(100);
        queue.wait_idle().await;
        assert_eq!(count(&queue, TaskStatus::Success), 5);
    }

    #[tokio::test]
    async fn waiting_tasks_start_in_creation_order() {
        let store = Store::new(u64::MAX);
        let transport = Arc::new(LocalTransport::gated(store.service.clone(), "alice", 0));
        let queue = UploadQueue::new(transport.clone(), config(64, 1));

        let mut ids = Vec::new();
        for i in 0..3u8 {
            let path = store.write_file(&format!("f{i}"), &patterned(10, i));
            ids.push(queue.add_file(&path, AddOptions::default()).await.unwrap());
        }
        // Reorder the list; scheduling must still follow creation time.
        queue.inner.lock_state().tasks.reverse();

        transport.open_gate(100);
        queue.wait_idle().await;

        let fingerprints: Vec<String> = ids
            .iter()
            .map(|id| queue.task(id).unwrap().content_fingerprint)
            .collect();
        assert_eq!(*transport.handshakes.lock().unwrap(), fingerprints);
    }

    #[tokio::test]
    async fn pause_and_resume_sends_only_missing_chunks() {
        let store = Store::new(u64::MAX);
        let transport = Arc::new(LocalTransport::gated(store.service.clone(), "alice", 2));
        let queue = UploadQueue::new(transport.clone(), config(16, 3));
        let mut events = queue.take_events().unwrap();

        let data = patterned(64, 9);
        let path = store.write_file("p.bin", &data);
        let id = queue.add_file(&path, AddOptions::default()).await.unwrap();

        // Two chunks pass, the third blocks at the gate.
        transport.wait_arrived(3).await;
        queue.pause(&id).unwrap();
        let task = queue.task(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Paused);
        assert_eq!(task.uploaded_chunk_count, 2);

        let session = store
            .service
            .session(&task.content_fingerprint)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.received_chunks.len(), 2);

        queue.resume(&id).unwrap();
        transport.open_gate(100);
        queue.wait_idle().await;

        let task = queue.task(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Success);
        assert_eq!(transport.chunk_digests(), task.chunk_digests);

        let events = drain(&mut events);
        assert!(!events.iter().any(|e| matches!(e, QueueEvent::Failed { .. })));
    }

    #[tokio::test]
    async fn late_error_after_pause_is_ignored() {
        let store = Store::new(u64::MAX);
        let transport = Arc::new(LocalTransport::gated(store.service.clone(), "alice", 0));
        let queue = UploadQueue::new(transport.clone(), config(64, 3));

        let path = store.write_file("x", &patterned(100, 2));
        let id = queue.add_file(&path, AddOptions::default()).await.unwrap();
        transport.wait_arrived(1).await;

        let generation = {
            let state = queue.inner.lock_state();
            state.tasks[0].active.as_ref().unwrap().generation
        };
        queue.pause(&id).unwrap();

        // The aborted request's error arrives after the pause.
        queue.inner.finish(
            &id,
            generation,
            Err(ClientError::Transport("connection reset".into())),
        );
        queue.inner.apply_update(
            &id,
            generation,
            ProtocolUpdate::ChunkSent {
                uploaded: 1,
                remaining: vec![],
                bytes: 64,
            },
        );

        let task = queue.task(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Paused);
        assert!(task.last_error.is_none());
        assert_eq!(task.uploaded_chunk_count, 0);
    }

    #[tokio::test]
    async fn cancel_removes_task_and_store_session() {
        let store = Store::new(u64::MAX);
        let transport = Arc::new(LocalTransport::gated(store.service.clone(), "alice", 1));
        let queue = UploadQueue::new(transport.clone(), config(16, 3));
        let mut events = queue.take_events().unwrap();

        let path = store.write_file("c.bin", &patterned(64, 4));
        let id = queue.add_file(&path, AddOptions::default()).await.unwrap();
        transport.wait_arrived(2).await;
        let fingerprint = queue.task(&id).unwrap().content_fingerprint;
        assert!(store.service.session(&fingerprint).await.unwrap().is_some());

        queue.cancel(&id).await.unwrap();
        assert!(queue.task(&id).is_none());
        assert!(queue.tasks().is_empty());
        assert_eq!(*transport.cancels.lock().unwrap(), vec![fingerprint.clone()]);
        assert!(store.service.session(&fingerprint).await.unwrap().is_none());

        // Let the aborted run wind down; it must not resurrect the task.
        transport.open_gate(100);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(queue.tasks().is_empty());

        let events = drain(&mut events);
        assert!(events.contains(&QueueEvent::Removed { task_id: id }));
        assert!(!events.iter().any(|e| matches!(e, QueueEvent::Failed { .. })));
        assert!(
            !events
                .iter()
                .any(|e| matches!(e, QueueEvent::StatusChanged { status: TaskStatus::Error, .. }))
        );
    }

    #[tokio::test]
    async fn cancel_frees_a_slot() {
        let store = Store::new(u64::MAX);
        let transport = Arc::new(LocalTransport::gated(store.service.clone(), "alice", 0));
        let queue = UploadQueue::new(transport.clone(), config(64, 1));

        let first = store.write_file("a", &patterned(10, 1));
        let second = store.write_file("b", &patterned(10, 2));
        let a = queue.add_file(&first, AddOptions::default()).await.unwrap();
        let b = queue.add_file(&second, AddOptions::default()).await.unwrap();
        transport.wait_arrived(1).await;
        assert_eq!(queue.task(&b).unwrap().status, TaskStatus::Waiting);

        queue.cancel(&a).await.unwrap();
        transport.wait_arrived(2).await;
        assert_eq!(queue.task(&b).unwrap().status, TaskStatus::Uploading);
    }

    #[tokio::test]
    async fn failure_sets_error_and_retry_recovers() {
        let store = Store::new(u64::MAX);
        let transport = Arc::new(LocalTransport::new(store.service.clone(), "alice"));
        transport.fail_chunks.store(true, Ordering::SeqCst);
        let queue = UploadQueue::new(transport.clone(), config(64, 3));
        let mut events = queue.take_events().unwrap();

        let path = store.write_file("r.bin", &patterned(150, 5));
        let id = queue.add_file(&path, AddOptions::default()).await.unwrap();
        queue.wait_idle().await;

        let task = queue.task(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Error);
        assert!(task.last_error.as_deref().unwrap().contains("connection reset"));
        assert_eq!(task.remaining_chunk_digests.len(), 3);
        assert!(
            drain(&mut events)
                .iter()
                .any(|e| matches!(e, QueueEvent::Failed { .. }))
        );

        transport.fail_chunks.store(false, Ordering::SeqCst);
        queue.retry(&id).unwrap();
        queue.wait_idle().await;
        let task = queue.task(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Success);
        assert!(task.last_error.is_none());
    }

    #[tokio::test]
    async fn quota_exhaustion_fails_before_any_chunk() {
        let store = Store::new(10);
        let transport = Arc::new(LocalTransport::new(store.service.clone(), "alice"));
        let queue = UploadQueue::new(transport.clone(), config(64, 3));

        let path = store.write_file("q.bin", &patterned(100, 6));
        let id = queue.add_file(&path, AddOptions::default()).await.unwrap();
        queue.wait_idle().await;

        let task = queue.task(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Error);
        assert!(task.last_error.unwrap().contains("insufficient storage"));
        assert!(transport.chunks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn clear_completed_keeps_unfinished_tasks() {
        let store = Store::new(u64::MAX);
        let transport = Arc::new(LocalTransport::new(store.service.clone(), "alice"));
        let queue = UploadQueue::new(transport.clone(), config(64, 3));

        let ok = store.write_file("ok", &patterned(10, 1));
        queue.add_file(&ok, AddOptions::default()).await.unwrap();
        queue.wait_idle().await;

        transport.fail_chunks.store(true, Ordering::SeqCst);
        let bad = store.write_file("bad", &patterned(10, 2));
        queue.add_file(&bad, AddOptions::default()).await.unwrap();
        queue.wait_idle().await;

        // With a limit of 1 the second task is paused straight from waiting.
        let gate = Arc::new(LocalTransport::gated(store.service.clone(), "alice", 0));
        let held = UploadQueue::new(gate.clone(), config(64, 1));
        let p1 = store.write_file("p1", &patterned(10, 3));
        let p2 = store.write_file("p2", &patterned(10, 4));
        held.add_file(&p1, AddOptions::default()).await.unwrap();
        let waiting = held.add_file(&p2, AddOptions::default()).await.unwrap();
        held.pause(&waiting).unwrap();
        assert_eq!(held.clear_completed(), 0);
        assert_eq!(held.tasks().len(), 2);

        assert_eq!(queue.clear_completed(), 2);
        assert!(queue.tasks().is_empty());
    }

    #[tokio::test]
    async fn invalid_transitions_are_rejected() {
        let store = Store::new(u64::MAX);
        let transport = Arc::new(LocalTransport::new(store.service.clone(), "alice"));
        let queue = UploadQueue::new(transport.clone(), config(64, 3));

        let path = store.write_file("t", &patterned(10, 1));
        let id = queue.add_file(&path, AddOptions::default()).await.unwrap();
        queue.wait_idle().await;

        assert!(matches!(
            queue.resume(&id),
            Err(ClientError::InvalidTransition { .. })
        ));
        assert!(matches!(
            queue.retry(&id),
            Err(ClientError::InvalidTransition { .. })
        ));
        assert!(matches!(
            queue.pause(&id),
            Err(ClientError::InvalidTransition { .. })
        ));
        assert!(matches!(
            queue.cancel(&id).await,
            Err(ClientError::InvalidTransition { .. })
        ));
        assert!(matches!(
            queue.pause("missing"),
            Err(ClientError::TaskNotFound(_))
        ));
    }

    #[tokio::test]
    async fn raising_the_limit_starts_waiting_tasks() {
        let store = Store::new(u64::MAX);
        let transport = Arc::new(LocalTransport::gated(store.service.clone(), "alice", 0));
        let queue = UploadQueue::new(transport.clone(), config(64, 1));

        for i in 0..3u8 {
            let path = store.write_file(&format!("f{i}"), &patterned(10, i));
            queue.add_file(&path, AddOptions::default()).await.unwrap();
        }
        transport.wait_arrived(1).await;
        assert_eq!(count(&queue, TaskStatus::Uploading), 1);

        queue.set_max_concurrent(3);
        assert_eq!(queue.max_concurrent(), 3);
        wait_until(|| count(&queue, TaskStatus::Uploading) == 3).await;

        transport.open_gate(100);
        queue.wait_idle().await;
        assert_eq!(count(&queue, TaskStatus::Success), 3);
    }

    #[tokio::test]
    async fn take_events_once() {
        let store = Store::new(u64::MAX);
        let transport = Arc::new(LocalTransport::new(store.service.clone(), "alice"));
        let queue = UploadQueue::new(transport, QueueConfig::default());
        assert!(queue.take_events().is_some());
        assert!(queue.take_events().is_none());
    }
}
