use std::collections::HashMap;
use std::sync::Arc;
use chrono::Utc;
use reqwest::Client;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use crate::transport::{
    DirectUploader, ResumableUploader, TransferMessage, TransferReporter, TransferUpdate, Transport,
};
use super::errors::{Result, UploadError};
use super::events::EventHub;
use super::input::{same_input, UploadInput};
use super::strategy::{
    direct_endpoint, DirectConfig, DirectOptions, ResumableConfig, ResumableOptions, TransportInfo,
    TransportStrategy,
};
use super::types::{
    BatchId, FileId, ManagerCommand, ManagerConfig, NewFile, UploadEvent, UploadFile, UploadResponse,
    UploadStatus,
};

struct FileEntry {
    file: UploadFile,
    /// Bumped on every transfer start; messages from older attempts are dropped
    attempt: u64,
    cancellation_token: Option<CancellationToken>,
    response: Option<UploadResponse>,
}

struct Batch {
    id: BatchId,
    files: Vec<FileId>,
}

enum InstalledTransport {
    Resumable(Arc<ResumableUploader>),
    Direct(Arc<DirectUploader>),
}

impl InstalledTransport {
    fn transport(&self) -> Arc<dyn Transport> {
        match self {
            Self::Resumable(uploader) => uploader.clone(),
            Self::Direct(uploader) => uploader.clone(),
        }
    }
}

struct ActiveTransport {
    installation: u64,
    plugin: InstalledTransport,
}

pub(crate) struct ManagerWorker {
    config: ManagerConfig,
    client: Client,
    files: HashMap<FileId, FileEntry>,
    /// Insertion order of `files`
    order: Vec<FileId>,
    batches: Vec<Batch>,
    transport: Option<ActiveTransport>,
    installations: u64,
    inputs: Vec<Arc<dyn UploadInput>>,
    limiter: Option<Arc<Semaphore>>,

    events: EventHub,
    transfer_tx: mpsc::UnboundedSender<TransferMessage>,
    transfer_rx: mpsc::UnboundedReceiver<TransferMessage>,
}

impl ManagerWorker {
    fn new(config: ManagerConfig, events: EventHub) -> Self {
        let (transfer_tx, transfer_rx) = mpsc::unbounded_channel();
        let limiter = match config.max_concurrent {
            0 => None,
            limit => Some(Arc::new(Semaphore::new(limit))),
        };

        Self {
            config,
            client: Client::new(),
            files: HashMap::new(),
            order: Vec::new(),
            batches: Vec::new(),
            transport: None,
            installations: 0,
            inputs: Vec::new(),
            limiter,
            events,
            transfer_tx,
            transfer_rx,
        }
    }

    pub(crate) async fn run(
        config: ManagerConfig,
        mut command_rx: mpsc::Receiver<ManagerCommand>,
        events: EventHub,
    ) {
        let mut worker = Self::new(config, events);

        // Main loop: commands and transfer reports
        loop {
            tokio::select! {
                command = command_rx.recv() => match command {
                    Some(command) => worker.handle_command(command).await,
                    None => break,
                },
                Some(message) = worker.transfer_rx.recv() => {
                    worker.handle_transfer(message);
                }
            }
        }

        worker.abort_transfers();
        tracing::debug!("Upload manager worker stopped");
    }

    async fn handle_command(&mut self, command: ManagerCommand) {
        match command {
            ManagerCommand::ConfigureResumable { options, reply } => {
                let info = self.configure_resumable(options).await;
                let _ = reply.send(info);
            }
            ManagerCommand::ConfigureDirect { options, reply } => {
                let info = self.configure_direct(options).await;
                let _ = reply.send(info);
            }
            ManagerCommand::Enqueue { files, reply } => {
                let results = self.enqueue(files).await;
                let _ = reply.send(results);
            }
            ManagerCommand::Upload { reply } => {
                let queued = self.files_with_status(UploadStatus::Queued);
                let _ = reply.send(self.start_batch(queued));
            }
            ManagerCommand::Pause { file_id, reply } => {
                let _ = reply.send(self.pause(file_id));
            }
            ManagerCommand::Resume { file_id, reply } => {
                let _ = reply.send(self.resume(file_id));
            }
            ManagerCommand::PauseAll { reply } => {
                let _ = reply.send(self.pause_all());
            }
            ManagerCommand::ResumeAll { reply } => {
                let _ = reply.send(self.resume_all());
            }
            ManagerCommand::RemoveFile { file_id, reply } => {
                let _ = reply.send(self.remove_file(file_id));
            }
            ManagerCommand::CancelAll { reply } => {
                self.cancel_all();
                let _ = reply.send(());
            }
            ManagerCommand::RegisterInput { input, reply } => {
                let _ = reply.send(self.register_input(input));
            }
            ManagerCommand::UnregisterInput { input, reply } => {
                let _ = reply.send(self.unregister_input(&input));
            }
            ManagerCommand::GetFile { file_id, reply } => {
                let file = self.files.get(&file_id).map(|entry| entry.file.clone());
                let _ = reply.send(file);
            }
            ManagerCommand::GetFiles { reply } => {
                let files = self
                    .order
                    .iter()
                    .filter_map(|id| self.files.get(id))
                    .map(|entry| entry.file.clone())
                    .collect();
                let _ = reply.send(files);
            }
            ManagerCommand::GetTransport { reply } => {
                let _ = reply.send(self.transport_info().await);
            }
        }
    }

    // ------------------------------------------------------------------
    // Transport installation
    // ------------------------------------------------------------------

    async fn configure_resumable(&mut self, options: ResumableOptions) -> TransportInfo {
        let config = ResumableConfig::from(options);

        if let Some(ActiveTransport {
            installation,
            plugin: InstalledTransport::Resumable(uploader),
        }) = &self.transport
        {
            let installation = *installation;
            uploader.set_config(config.clone()).await;
            tracing::info!(chunk_size = ?config.chunk_size, "Updated resumable transport");
            return TransportInfo {
                strategy: TransportStrategy::Resumable(config),
                installation,
            };
        }

        if self.transport.take().is_some() {
            tracing::info!("Uninstalling direct transport");
        }

        let uploader = Arc::new(ResumableUploader::new(self.client.clone(), config.clone()));
        let installation = self.install(InstalledTransport::Resumable(uploader));
        tracing::info!(installation, chunk_size = ?config.chunk_size, "Installed resumable transport");

        for entry in self.files.values_mut() {
            if !entry.file.status.is_terminal() {
                entry.file.direct_endpoint = None;
            }
        }

        TransportInfo {
            strategy: TransportStrategy::Resumable(config),
            installation,
        }
    }

    async fn configure_direct(&mut self, options: DirectOptions) -> TransportInfo {
        let config = DirectConfig::from(options);

        if let Some(ActiveTransport {
            installation,
            plugin: InstalledTransport::Direct(uploader),
        }) = &self.transport
        {
            let installation = *installation;
            uploader.set_config(config.clone()).await;
            tracing::info!("Updated direct transport");
            return TransportInfo {
                strategy: TransportStrategy::Direct(config),
                installation,
            };
        }

        if self.transport.take().is_some() {
            tracing::info!("Uninstalling resumable transport");
        }

        let uploader = Arc::new(DirectUploader::new(self.client.clone(), config.clone()));
        let installation = self.install(InstalledTransport::Direct(uploader));
        tracing::info!(installation, "Installed direct transport");

        // Rebind tracked files to their direct targets
        for entry in self.files.values_mut() {
            if !entry.file.status.is_terminal() {
                let file = &mut entry.file;
                file.direct_endpoint = Some(direct_endpoint(&file.meta.endpoint, &file.name));
            }
        }

        TransportInfo {
            strategy: TransportStrategy::Direct(config),
            installation,
        }
    }

    fn install(&mut self, plugin: InstalledTransport) -> u64 {
        self.installations += 1;
        self.transport = Some(ActiveTransport {
            installation: self.installations,
            plugin,
        });
        self.installations
    }

    async fn transport_info(&self) -> Option<TransportInfo> {
        let active = self.transport.as_ref()?;
        let strategy = match &active.plugin {
            InstalledTransport::Resumable(uploader) => TransportStrategy::Resumable(uploader.config().await),
            InstalledTransport::Direct(uploader) => TransportStrategy::Direct(uploader.config().await),
        };

        Some(TransportInfo {
            strategy,
            installation: active.installation,
        })
    }

    fn is_direct(&self) -> bool {
        matches!(
            self.transport.as_ref().map(|active| &active.plugin),
            Some(InstalledTransport::Direct(_))
        )
    }

    // ------------------------------------------------------------------
    // Files
    // ------------------------------------------------------------------

    async fn enqueue(&mut self, files: Vec<NewFile>) -> Vec<Result<FileId>> {
        let mut results = Vec::with_capacity(files.len());
        let mut accepted = Vec::new();

        for new_file in files {
            let name = new_file.name.clone();
            match self.add_file(new_file).await {
                Ok(file_id) => {
                    accepted.push(file_id);
                    results.push(Ok(file_id));
                }
                Err(UploadError::Restriction(reason)) => {
                    tracing::warn!(file = %name, error = %reason, "Restriction error");
                    self.emit(UploadEvent::RestrictionFailed {
                        name,
                        reason: reason.clone(),
                    });
                    results.push(Err(UploadError::Restriction(reason)));
                }
                Err(err) => {
                    tracing::error!(file = %name, error = %err, "Error adding file");
                    results.push(Err(err));
                }
            }
        }

        if self.config.auto_proceed && !accepted.is_empty() {
            self.start_batch(accepted);
        }

        results
    }

    async fn add_file(&mut self, new_file: NewFile) -> Result<FileId> {
        let size = new_file.source.len().await?;
        self.config.restrictions.check(
            &new_file.name,
            size,
            &new_file.meta.endpoint,
            self.files.values().map(|entry| &entry.file),
        )?;

        let file = UploadFile::new(new_file, size);
        let file_id = file.id;
        let name = file.name.clone();
        tracing::info!(file_id = %file_id, file = %name, size, "File added");

        self.order.push(file_id);
        self.files.insert(file_id, FileEntry {
            file,
            attempt: 0,
            cancellation_token: None,
            response: None,
        });
        self.emit(UploadEvent::FileAdded { file_id, name });

        if self.is_direct() {
            if let Some(entry) = self.files.get_mut(&file_id) {
                let file = &mut entry.file;
                file.direct_endpoint = Some(direct_endpoint(&file.meta.endpoint, &file.name));
            }
        }

        Ok(file_id)
    }

    fn files_with_status(&self, status: UploadStatus) -> Vec<FileId> {
        self.order
            .iter()
            .filter(|id| self.files.get(id).is_some_and(|entry| entry.file.status == status))
            .copied()
            .collect()
    }

    fn set_status(&mut self, file_id: FileId, next: UploadStatus) -> bool {
        let Some(entry) = self.files.get_mut(&file_id) else {
            return false;
        };

        let current = entry.file.status;
        if !current.can_transition_to(next) {
            tracing::warn!(file_id = %file_id, from = %current, to = %next, "Ignoring invalid status change");
            return false;
        }

        entry.file.status = next;
        match next {
            UploadStatus::Uploading if entry.file.started_at.is_none() => {
                entry.file.started_at = Some(Utc::now());
            }
            UploadStatus::Succeeded | UploadStatus::Failed => {
                entry.file.completed_at = Some(Utc::now());
            }
            _ => {}
        }

        true
    }

    /// Drop a file from the tracked set and reset bound inputs.
    fn evict(&mut self, file_id: FileId) {
        if let Some(entry) = self.files.remove(&file_id) {
            if let Some(token) = entry.cancellation_token {
                token.cancel();
            }
            self.order.retain(|id| *id != file_id);
            tracing::debug!(file_id = %file_id, "File removed");
            self.emit(UploadEvent::Removed { file_id });
            self.clear_inputs();
        }
    }

    fn remove_file(&mut self, file_id: FileId) -> Result<()> {
        if !self.files.contains_key(&file_id) {
            return Err(UploadError::FileNotFound(file_id));
        }

        for batch in &mut self.batches {
            batch.files.retain(|id| *id != file_id);
        }

        self.evict(file_id);
        self.check_batches();
        Ok(())
    }

    fn cancel_all(&mut self) {
        tracing::info!(files = self.files.len(), "Cancelling all uploads");
        self.abort_transfers();
        self.emit(UploadEvent::Cancelled);

        self.batches.clear();
        for file_id in self.order.clone() {
            self.evict(file_id);
        }
    }

    fn abort_transfers(&mut self) {
        for entry in self.files.values_mut() {
            if let Some(token) = entry.cancellation_token.take() {
                token.cancel();
            }
        }
    }

    // ------------------------------------------------------------------
    // Batches and transfers
    // ------------------------------------------------------------------

    fn start_batch(&mut self, file_ids: Vec<FileId>) -> Option<BatchId> {
        let file_ids: Vec<FileId> = file_ids
            .into_iter()
            .filter(|id| {
                self.files
                    .get(id)
                    .is_some_and(|entry| entry.file.status == UploadStatus::Queued)
            })
            .collect();

        if file_ids.is_empty() {
            return None;
        }

        let batch_id = BatchId::new();
        tracing::info!(batch_id = %batch_id, files = file_ids.len(), "Upload started");

        self.batches.push(Batch {
            id: batch_id,
            files: file_ids.clone(),
        });
        self.emit(UploadEvent::Started {
            batch_id,
            file_ids: file_ids.clone(),
        });

        for file_id in &file_ids {
            self.set_status(*file_id, UploadStatus::Uploading);
        }
        for file_id in file_ids {
            self.spawn_transfer(file_id);
        }

        Some(batch_id)
    }

    fn spawn_transfer(&mut self, file_id: FileId) {
        let transport = match &self.transport {
            Some(active) => active.plugin.transport(),
            None => {
                self.complete_file(file_id, Err(UploadError::NoTransport));
                return;
            }
        };

        let Some(entry) = self.files.get_mut(&file_id) else {
            return;
        };

        entry.attempt += 1;
        let cancellation_token = CancellationToken::new();
        entry.cancellation_token = Some(cancellation_token.clone());

        let file = entry.file.clone();
        let reporter = TransferReporter::new(file_id, entry.attempt, self.transfer_tx.clone());
        let limiter = self.limiter.clone();
        tracing::debug!(file_id = %file_id, transport = %transport.kind(), attempt = entry.attempt, "Starting transfer");

        tokio::spawn(async move {
            let result = tokio::select! {
                result = run_transfer(transport, &file, &reporter, limiter) => result,
                _ = cancellation_token.cancelled() => Err(UploadError::Cancelled),
            };
            reporter.finish(result);
        });
    }

    fn handle_transfer(&mut self, message: TransferMessage) {
        let file_id = message.file_id;
        let Some(entry) = self.files.get_mut(&file_id) else {
            // Removed while the transfer was running
            return;
        };

        if message.attempt != entry.attempt {
            return;
        }
        let uploading = entry.file.status == UploadStatus::Uploading;

        match message.update {
            // Kept while paused so resume continues the same server-side upload
            TransferUpdate::UploadUrl(upload_url) => {
                entry.file.upload_url = Some(upload_url);
            }
            TransferUpdate::Progress(bytes_uploaded) if uploading => {
                entry.file.progress.bytes_uploaded = bytes_uploaded.min(entry.file.size);
                let progress = entry.file.progress;
                self.emit(UploadEvent::Progress { file_id, progress });
            }
            TransferUpdate::Finished(result) if uploading => {
                entry.cancellation_token = None;
                self.complete_file(file_id, result);
            }
            _ => {}
        }
    }

    fn complete_file(&mut self, file_id: FileId, result: Result<UploadResponse>) {
        match result {
            Ok(response) => {
                if self.set_status(file_id, UploadStatus::Succeeded) {
                    if let Some(entry) = self.files.get_mut(&file_id) {
                        entry.file.progress.bytes_uploaded = entry.file.size;
                        entry.response = Some(response);
                    }
                    tracing::info!(file_id = %file_id, "Upload succeeded");
                }
            }
            Err(err) => {
                if self.set_status(file_id, UploadStatus::Failed) {
                    if let Some(entry) = self.files.get_mut(&file_id) {
                        entry.file.error = Some(err.to_string());
                    }
                    tracing::warn!(file_id = %file_id, error = %err, "Upload failed");
                }
            }
        }

        self.check_batches();
    }

    fn is_batch_done(&self, batch: &Batch) -> bool {
        batch.files.iter().all(|id| {
            self.files
                .get(id)
                .is_none_or(|entry| entry.file.status.is_terminal())
        })
    }

    fn check_batches(&mut self) {
        while let Some(position) = self.batches.iter().position(|batch| self.is_batch_done(batch)) {
            let batch = self.batches.remove(position);
            self.finish_batch(batch);
        }
    }

    fn finish_batch(&mut self, batch: Batch) {
        let (successful, failed): (Vec<FileId>, Vec<FileId>) = batch
            .files
            .iter()
            .copied()
            .filter(|id| self.files.contains_key(id))
            .partition(|id| self.files[id].file.status == UploadStatus::Succeeded);

        if successful.is_empty() && failed.is_empty() {
            tracing::debug!(batch_id = %batch.id, "Batch emptied before completion");
            return;
        }

        tracing::info!(
            batch_id = %batch.id,
            successful = successful.len(),
            failed = failed.len(),
            "Upload complete"
        );
        self.emit(UploadEvent::Completed {
            batch_id: batch.id,
            successful: successful.clone(),
            failed: failed.clone(),
        });

        for file_id in successful {
            if let Some(entry) = self.files.get(&file_id) {
                let file = entry.file.clone();
                let response = entry.response.clone().unwrap_or_default();
                self.emit(UploadEvent::Success { file, response });
            }
            self.evict(file_id);
        }

        for file_id in failed {
            if let Some(entry) = self.files.get(&file_id) {
                let file = entry.file.clone();
                let error = file.error.clone().unwrap_or_default();
                self.emit(UploadEvent::Error { file, error });
            }
        }

        self.clear_inputs();
    }

    // ------------------------------------------------------------------
    // Pause / resume
    // ------------------------------------------------------------------

    fn ensure_pausable(&self) -> Result<()> {
        match &self.transport {
            Some(active) if active.plugin.transport().supports_pause() => Ok(()),
            _ => Err(UploadError::PauseUnsupported),
        }
    }

    fn pause(&mut self, file_id: FileId) -> Result<()> {
        self.ensure_pausable()?;

        let entry = self.files.get_mut(&file_id).ok_or(UploadError::FileNotFound(file_id))?;
        if entry.file.status != UploadStatus::Uploading {
            return Err(UploadError::InvalidState {
                action: "pause",
                state: entry.file.status.to_string(),
            });
        }

        if let Some(token) = entry.cancellation_token.take() {
            token.cancel();
        }
        self.set_status(file_id, UploadStatus::Paused);
        tracing::info!(file_id = %file_id, "Upload paused");
        self.emit(UploadEvent::Paused { file_id });

        Ok(())
    }

    fn resume(&mut self, file_id: FileId) -> Result<()> {
        self.ensure_pausable()?;

        let entry = self.files.get(&file_id).ok_or(UploadError::FileNotFound(file_id))?;
        if entry.file.status != UploadStatus::Paused {
            return Err(UploadError::InvalidState {
                action: "resume",
                state: entry.file.status.to_string(),
            });
        }

        self.set_status(file_id, UploadStatus::Uploading);
        tracing::info!(file_id = %file_id, "Upload resumed");
        self.emit(UploadEvent::Resumed { file_id });
        self.spawn_transfer(file_id);

        Ok(())
    }

    fn pause_all(&mut self) -> Result<usize> {
        self.ensure_pausable()?;

        let uploading = self.files_with_status(UploadStatus::Uploading);
        for file_id in &uploading {
            self.pause(*file_id)?;
        }
        Ok(uploading.len())
    }

    fn resume_all(&mut self) -> Result<usize> {
        self.ensure_pausable()?;

        let paused = self.files_with_status(UploadStatus::Paused);
        for file_id in &paused {
            self.resume(*file_id)?;
        }
        Ok(paused.len())
    }

    // ------------------------------------------------------------------
    // Inputs
    // ------------------------------------------------------------------

    fn register_input(&mut self, input: Arc<dyn UploadInput>) -> bool {
        if input.has_listener() {
            return false;
        }

        input.mark_listener();
        let events = self.events.clone();
        input.add_change_listener(Box::new(move |files| {
            events.emit(UploadEvent::FilesSelected { files });
        }));
        self.inputs.push(input);
        tracing::debug!(inputs = self.inputs.len(), "Upload input registered");

        true
    }

    fn unregister_input(&mut self, input: &Arc<dyn UploadInput>) -> bool {
        let before = self.inputs.len();
        self.inputs.retain(|registered| !same_input(registered, input));
        before != self.inputs.len()
    }

    fn clear_inputs(&self) {
        for input in &self.inputs {
            input.clear_value();
        }
    }

    fn emit(&self, event: UploadEvent) {
        self.events.emit(event);
    }
}

async fn run_transfer(
    transport: Arc<dyn Transport>,
    file: &UploadFile,
    reporter: &TransferReporter,
    limiter: Option<Arc<Semaphore>>,
) -> Result<UploadResponse> {
    let _permit = match limiter {
        Some(semaphore) => Some(
            semaphore
                .acquire_owned()
                .await
                .map_err(|_| UploadError::ManagerShutdown)?,
        ),
        None => None,
    };

    transport.upload(file, reporter).await
}
