use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use super::errors::{Result, UploadError};
use super::events::EventHub;
use super::input::UploadInput;
use super::strategy::{DirectOptions, ResumableOptions, TransportInfo};
use super::types::{BatchId, FileId, ManagerCommand, ManagerConfig, NewFile, UploadEvent, UploadFile};
use super::worker::ManagerWorker;

/// Cloneable front end of the upload session. Every call is forwarded to a
/// single worker task that owns the file set and the installed transport.
#[derive(Clone)]
pub struct UploadSessionManager {
    command_tx: mpsc::Sender<ManagerCommand>,
    events: EventHub,
}

/// Manager plus the join handle of its worker task
pub struct UploadSessionHandle {
    pub manager: UploadSessionManager,
    pub worker_handle: JoinHandle<()>,
}

impl UploadSessionHandle {
    /// Waits for the worker to exit, which happens once every clone of the
    /// manager has been dropped.
    pub async fn shutdown(self) -> Result<()> {
        drop(self.manager);
        self.worker_handle.await.map_err(|err| {
            UploadError::Io(std::io::Error::other(format!("Worker panic: {}", err)))
        })
    }
}

impl UploadSessionManager {
    pub fn new(config: ManagerConfig) -> UploadSessionHandle {
        let (command_tx, command_rx) = mpsc::channel(100);
        let events = EventHub::default();

        let worker_handle = tokio::spawn(ManagerWorker::run(config, command_rx, events.clone()));

        let manager = Self {
            command_tx,
            events,
        };

        UploadSessionHandle {
            manager,
            worker_handle,
        }
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> ManagerCommand) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.command_tx
            .send(command(reply_tx))
            .await
            .map_err(|_| UploadError::ManagerShutdown)?;

        reply_rx.await.map_err(|_| UploadError::ManagerShutdown)
    }

    /// Install the tus transport, or update its options in place when it is
    /// already the active one.
    pub async fn configure_resumable(&self, options: ResumableOptions) -> Result<TransportInfo> {
        self.request(|reply| ManagerCommand::ConfigureResumable { options, reply })
            .await
    }

    /// Install the single-request transport, or update its options in place.
    pub async fn configure_direct(&self, options: DirectOptions) -> Result<TransportInfo> {
        self.request(|reply| ManagerCommand::ConfigureDirect { options, reply })
            .await
    }

    /// Add files to the session. One result per input file, in order;
    /// rejected files never enter the tracked set.
    pub async fn enqueue(&self, files: Vec<NewFile>) -> Result<Vec<Result<FileId>>> {
        self.request(|reply| ManagerCommand::Enqueue { files, reply })
            .await
    }

    /// Start a batch with every queued file. `None` when nothing was queued.
    pub async fn upload(&self) -> Result<Option<BatchId>> {
        self.request(|reply| ManagerCommand::Upload { reply }).await
    }

    pub async fn pause(&self, file_id: FileId) -> Result<()> {
        self.request(|reply| ManagerCommand::Pause { file_id, reply })
            .await?
    }

    pub async fn resume(&self, file_id: FileId) -> Result<()> {
        self.request(|reply| ManagerCommand::Resume { file_id, reply })
            .await?
    }

    /// Returns how many transfers were paused.
    pub async fn pause_all(&self) -> Result<usize> {
        self.request(|reply| ManagerCommand::PauseAll { reply }).await?
    }

    pub async fn resume_all(&self) -> Result<usize> {
        self.request(|reply| ManagerCommand::ResumeAll { reply }).await?
    }

    pub async fn remove_file(&self, file_id: FileId) -> Result<()> {
        self.request(|reply| ManagerCommand::RemoveFile { file_id, reply })
            .await?
    }

    /// Abort every transfer and drop every tracked file.
    pub async fn cancel_all(&self) -> Result<()> {
        self.request(|reply| ManagerCommand::CancelAll { reply }).await
    }

    /// Bind an input so its selections are published as
    /// [`UploadEvent::FilesSelected`]. Returns `false` when the input already
    /// carries a listener.
    pub async fn register_input(&self, input: Arc<dyn UploadInput>) -> Result<bool> {
        self.request(|reply| ManagerCommand::RegisterInput { input, reply })
            .await
    }

    pub async fn unregister_input(&self, input: Arc<dyn UploadInput>) -> Result<bool> {
        self.request(|reply| ManagerCommand::UnregisterInput { input, reply })
            .await
    }

    pub async fn file(&self, file_id: FileId) -> Result<Option<UploadFile>> {
        self.request(|reply| ManagerCommand::GetFile { file_id, reply })
            .await
    }

    /// Tracked files in insertion order
    pub async fn files(&self) -> Result<Vec<UploadFile>> {
        self.request(|reply| ManagerCommand::GetFiles { reply }).await
    }

    pub async fn transport(&self) -> Result<Option<TransportInfo>> {
        self.request(|reply| ManagerCommand::GetTransport { reply }).await
    }

    /// Every event emitted after this call, in emission order. The queue is
    /// unbounded so a slow subscriber never misses one.
    pub fn subscribe_events(&self) -> mpsc::UnboundedReceiver<UploadEvent> {
        self.events.subscribe()
    }

    pub fn subscribe_filtered<F>(&self, filter: F) -> FilteredEventReceiver<F>
    where
        F: Fn(&UploadEvent) -> bool,
    {
        FilteredEventReceiver {
            receiver: self.events.subscribe(),
            filter,
        }
    }
}

/// Event subscription that skips events rejected by `filter`
pub struct FilteredEventReceiver<F> {
    receiver: mpsc::UnboundedReceiver<UploadEvent>,
    filter: F,
}

impl<F> FilteredEventReceiver<F>
where
    F: Fn(&UploadEvent) -> bool,
{
    /// `None` once the worker has exited and the queue is drained.
    pub async fn recv(&mut self) -> Option<UploadEvent> {
        while let Some(event) = self.receiver.recv().await {
            if (self.filter)(&event) {
                return Some(event);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use crate::core::{FileMeta, FileSource, Restrictions, RestrictionError, UploadStatus};

    fn memory_file(name: &str, data: &'static [u8]) -> NewFile {
        NewFile::new(
            name,
            FileSource::Memory(Bytes::from_static(data)),
            FileMeta::new("http://127.0.0.1:9/files/"),
        )
    }

    fn manual_config() -> ManagerConfig {
        ManagerConfig {
            auto_proceed: false,
            ..ManagerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_enqueue_without_auto_proceed_keeps_files_queued() {
        let handle = UploadSessionManager::new(manual_config());
        let manager = handle.manager.clone();

        let results = manager
            .enqueue(vec![memory_file("a.txt", b"hello"), memory_file("b.txt", b"world!")])
            .await
            .unwrap();
        assert!(results.iter().all(|result| result.is_ok()));

        let files = manager.files().await.unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].name, "a.txt");
        assert_eq!(files[1].size, 6);
        assert!(files.iter().all(|file| file.status == UploadStatus::Queued));

        drop(manager);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_restriction_failure_emits_event() {
        let handle = UploadSessionManager::new(ManagerConfig {
            restrictions: Restrictions {
                max_file_size: Some(3),
                ..Restrictions::default()
            },
            ..manual_config()
        });
        let manager = handle.manager;
        let mut events = manager.subscribe_filtered(|event| {
            matches!(event, UploadEvent::RestrictionFailed { .. })
        });

        let results = manager
            .enqueue(vec![memory_file("big.txt", b"too large")])
            .await
            .unwrap();
        assert!(matches!(
            results[0],
            Err(UploadError::Restriction(RestrictionError::TooLarge { .. }))
        ));
        assert!(manager.files().await.unwrap().is_empty());

        match events.recv().await.unwrap() {
            UploadEvent::RestrictionFailed { name, .. } => assert_eq!(name, "big.txt"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_upload_without_transport_fails_files() {
        let handle = UploadSessionManager::new(manual_config());
        let manager = handle.manager;
        let mut events = manager.subscribe_events();

        manager.enqueue(vec![memory_file("a.txt", b"abc")]).await.unwrap();
        let batch_id = manager.upload().await.unwrap();
        assert!(batch_id.is_some());

        let mut saw_completed = false;
        loop {
            match events.recv().await.unwrap() {
                UploadEvent::Completed { successful, failed, .. } => {
                    assert!(successful.is_empty());
                    assert_eq!(failed.len(), 1);
                    saw_completed = true;
                }
                UploadEvent::Error { file, error } => {
                    assert!(saw_completed);
                    assert_eq!(file.status, UploadStatus::Failed);
                    assert!(error.contains("transport"));
                    break;
                }
                _ => {}
            }
        }

        // Failed files stay tracked
        assert_eq!(manager.files().await.unwrap().len(), 1);
        assert_eq!(manager.upload().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_pause_requires_resumable_transport() {
        let handle = UploadSessionManager::new(manual_config());
        let manager = handle.manager;

        let file_id = FileId::new();
        assert!(matches!(manager.pause(file_id).await, Err(UploadError::PauseUnsupported)));

        manager.configure_direct(DirectOptions::default()).await.unwrap();
        assert!(matches!(manager.pause_all().await, Err(UploadError::PauseUnsupported)));

        manager.configure_resumable(ResumableOptions::default()).await.unwrap();
        assert!(matches!(manager.pause(file_id).await, Err(UploadError::FileNotFound(_))));
        assert_eq!(manager.pause_all().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_remove_unknown_file() {
        let handle = UploadSessionManager::new(manual_config());
        let result = handle.manager.remove_file(FileId::new()).await;
        assert!(matches!(result, Err(UploadError::FileNotFound(_))));
    }

    #[tokio::test]
    async fn test_shutdown_after_drop() {
        let handle = UploadSessionManager::new(ManagerConfig::default());
        handle.shutdown().await.unwrap();
    }
}
