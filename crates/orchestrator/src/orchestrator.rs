//! Transfer orchestrator.
//!
//! Drives one payload through `Acquiring → Planning → Transferring →
//! Finalizing` and always ends in `Completed` or `Failed`. Every state
//! change is published on the orchestrator's event channel, and the
//! transfer's temporary storage is released on every exit path.

use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;

use apkrelay_protocol::{ChunkTag, RetrievalHandle, TransferState, TransferStrategy};
use apkrelay_relay::RelayClient;
use apkrelay_transfer::{
    ChunkReader, Checksum, StrategySelector, TransferError, TransferPlan, package_stem,
    sanitize_name, validate_extension,
};
use chrono::{DateTime, Utc};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::destination::Destination;
use crate::error::OrchestratorError;
use crate::source::{InboundPayload, InboundSource};
use crate::staging::TempStorage;
use crate::types::{MAX_RETRIES, TransferConfig, TransferEvent, TransferReport};

/// Read buffer while copying the inbound stream to disk.
const ACQUIRE_BUFFER_SIZE: usize = 256 * 1024;

/// Acquisition progress is reported every this many bytes.
const PROGRESS_STEP: u64 = 8 * 1024 * 1024;

const EVENT_CHANNEL_SIZE: usize = 256;

/// Collaborators shared by every transfer.
///
/// Cheap to clone; hand one to each concurrent orchestrator.
#[derive(Clone)]
pub struct TransferContext {
    pub config: Arc<TransferConfig>,
    pub destination: Arc<dyn Destination>,
    /// Relay used for the relay strategy; `None` disables it.
    pub relay: Option<Arc<RelayClient>>,
}

impl TransferContext {
    pub fn new(config: TransferConfig, destination: Arc<dyn Destination>) -> Self {
        Self {
            config: Arc::new(config),
            destination,
            relay: None,
        }
    }

    pub fn with_relay(mut self, relay: Arc<RelayClient>) -> Self {
        self.relay = Some(relay);
        self
    }

    fn selector(&self) -> StrategySelector {
        StrategySelector::new(self.config.oversize_policy)
            .with_chunk_capable(self.destination.supports_chunks())
            .with_relay_available(self.relay.is_some())
    }
}

/// What a running transfer has learned so far.
struct Record {
    state: TransferState,
    declared_name: Option<String>,
    name: Option<String>,
    plan: Option<TransferPlan>,
    handle: Option<RetrievalHandle>,
    summary: Option<String>,
    sha256: Option<String>,
    attempts: u32,
}

impl Record {
    fn new() -> Self {
        Self {
            state: TransferState::Acquiring,
            declared_name: None,
            name: None,
            plan: None,
            handle: None,
            summary: None,
            sha256: None,
            attempts: 0,
        }
    }
}

/// Runs a single transfer. Consumed by [`run`](Self::run).
pub struct TransferOrchestrator {
    id: String,
    ctx: TransferContext,
    cancel: CancellationToken,
    events_tx: mpsc::Sender<TransferEvent>,
    events_rx: Option<mpsc::Receiver<TransferEvent>>,
}

impl TransferOrchestrator {
    /// Creates an orchestrator with a fresh transfer id.
    pub fn new(ctx: TransferContext, cancel: CancellationToken) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            ctx,
            cancel,
            events_tx,
            events_rx: Some(events_rx),
        }
    }

    pub fn transfer_id(&self) -> &str {
        &self.id
    }

    /// Takes the event receiver. Can only be called once, before `run`.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<TransferEvent>> {
        self.events_rx.take()
    }

    /// Returns the token that cancels this transfer.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs the transfer to a terminal state and reports the outcome.
    ///
    /// Never returns an error: failures are carried in the report.
    pub async fn run(mut self, source: &dyn InboundSource) -> TransferReport {
        // Without a listener, sends fail fast instead of filling the channel.
        self.events_rx = None;

        let started_at = Utc::now();
        let mut record = Record::new();
        info!(transfer_id = %self.id, "transfer started");
        self.emit_state(TransferState::Acquiring).await;

        let result = match TempStorage::create(&self.ctx.config.temp_dir, &self.id).await {
            Ok(storage) => {
                let result = self.supervise(source, &storage, &mut record).await;
                if let Err(e) = storage.release().await {
                    warn!(transfer_id = %self.id, error = %e, "failed to release temporary storage");
                }
                result
            }
            Err(e) => Err(OrchestratorError::Storage(format!(
                "cannot create temporary storage: {e}"
            ))),
        };

        self.finish(record, result, started_at).await
    }

    /// Bounds the transfer by the deadline and the cancellation token.
    async fn supervise(
        &self,
        source: &dyn InboundSource,
        storage: &TempStorage,
        record: &mut Record,
    ) -> Result<(), OrchestratorError> {
        let work = self.execute(source, storage.path(), record);
        let bounded = async {
            match self.ctx.config.deadline {
                Some(limit) => match tokio::time::timeout(limit, work).await {
                    Ok(result) => result,
                    Err(_) => Err(OrchestratorError::DeadlineExceeded),
                },
                None => work.await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(OrchestratorError::Cancelled),
            result = bounded => result,
        }
    }

    async fn execute(
        &self,
        source: &dyn InboundSource,
        scratch: &Path,
        record: &mut Record,
    ) -> Result<(), OrchestratorError> {
        let config = &self.ctx.config;

        // Acquiring
        let inbound = source.open().await?;
        record.declared_name = Some(inbound.name.clone());
        let name = sanitize_name(&inbound.name)?;
        validate_extension(&name, &config.allowed_extensions)?;
        record.name = Some(name.clone());

        let payload_path = scratch.join(&name);
        let (size, sha256) = self.acquire(inbound, &payload_path).await?;
        info!(transfer_id = %self.id, name = %name, bytes = size, sha256 = %sha256, "payload acquired");
        record.sha256 = Some(sha256);

        // Planning
        self.enter(record, TransferState::Planning).await;
        let plan = self.ctx.selector().decide(size, config.ceiling);
        record.plan = Some(plan);
        info!(
            transfer_id = %self.id,
            name = %name,
            strategy = %plan.strategy,
            bytes = size,
            ceiling = config.ceiling,
            "transfer planned"
        );

        // Transferring
        self.enter(record, TransferState::Transferring).await;
        let handle = self
            .transfer_with_retry(&name, &payload_path, &plan, record)
            .await?;
        record.handle = handle;

        // Finalizing
        self.enter(record, TransferState::Finalizing).await;
        let summary = summarize(
            &name,
            &plan,
            record.handle.as_ref(),
            record.sha256.as_deref(),
        );
        self.ctx.destination.deliver_summary(&name, &summary).await?;
        record.summary = Some(summary);

        Ok(())
    }

    /// Streams the inbound payload into `path`, hashing as it goes.
    async fn acquire(
        &self,
        inbound: InboundPayload,
        path: &Path,
    ) -> Result<(u64, String), OrchestratorError> {
        let InboundPayload {
            size_hint,
            mut reader,
            ..
        } = inbound;

        let mut file = tokio::fs::File::create(path).await?;
        let mut checksum = Checksum::new();
        let mut buf = vec![0u8; ACQUIRE_BUFFER_SIZE];
        let mut total: u64 = 0;
        let mut next_report = PROGRESS_STEP;

        loop {
            let n = reader
                .read(&mut buf)
                .await
                .map_err(|e| OrchestratorError::Source(format!("read failed: {e}")))?;
            if n == 0 {
                break;
            }
            checksum.update(&buf[..n]);
            file.write_all(&buf[..n]).await?;
            total += n as u64;

            if total >= next_report {
                self.emit_progress(TransferState::Acquiring, total, size_hint)
                    .await;
                next_report = total + PROGRESS_STEP;
            }
        }
        file.flush().await?;

        if let Some(expected) = size_hint
            && expected != total
        {
            return Err(OrchestratorError::Source(format!(
                "expected {expected} bytes, received {total}"
            )));
        }

        self.emit_progress(TransferState::Acquiring, total, Some(total))
            .await;
        Ok((total, checksum.finalize()))
    }

    /// Runs the transferring step, retrying transient failures.
    async fn transfer_with_retry(
        &self,
        name: &str,
        path: &Path,
        plan: &TransferPlan,
        record: &mut Record,
    ) -> Result<Option<RetrievalHandle>, OrchestratorError> {
        let retries = self.ctx.config.max_retries.min(MAX_RETRIES);

        loop {
            record.attempts += 1;
            match self.transfer(name, path, plan).await {
                Ok(handle) => return Ok(handle),
                Err(e) if e.is_retryable() && record.attempts <= retries => {
                    warn!(
                        transfer_id = %self.id,
                        attempt = record.attempts,
                        error = %e,
                        "transfer attempt failed, retrying"
                    );
                    tokio::time::sleep(self.ctx.config.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn transfer(
        &self,
        name: &str,
        path: &Path,
        plan: &TransferPlan,
    ) -> Result<Option<RetrievalHandle>, OrchestratorError> {
        match plan.strategy {
            TransferStrategy::Direct => {
                self.ctx.destination.deliver_file(name, path).await?;
                self.emit_progress(TransferState::Transferring, 1, Some(1))
                    .await;
                Ok(None)
            }
            TransferStrategy::Chunked => self.deliver_chunks(name, path, plan).await.map(Some),
            TransferStrategy::Relay => {
                let relay = self
                    .ctx
                    .relay
                    .as_ref()
                    .ok_or(OrchestratorError::StrategyUnavailable(TransferStrategy::Relay))?;
                let handle = relay.stage_file(name, path).await?;
                self.emit_progress(TransferState::Transferring, 1, Some(1))
                    .await;
                Ok(Some(handle))
            }
        }
    }

    /// Streams the staged payload to the destination one part at a time.
    async fn deliver_chunks(
        &self,
        name: &str,
        path: &Path,
        plan: &TransferPlan,
    ) -> Result<RetrievalHandle, OrchestratorError> {
        if !self.ctx.destination.supports_chunks() {
            return Err(OrchestratorError::StrategyUnavailable(
                TransferStrategy::Chunked,
            ));
        }

        let chunk_size = self.ctx.config.chunk_size;
        let mut reader = ChunkReader::open(path, chunk_size).await?;
        let total = reader.total_chunks();
        if reader.file_size() != plan.payload_size
            || u64::from(total) != plan.chunk_count(chunk_size)
        {
            return Err(TransferError::IncompleteTransfer(format!(
                "staged payload is {} bytes, planned {}",
                reader.file_size(),
                plan.payload_size
            ))
            .into());
        }

        while let Some(chunk) = reader.next_chunk().await? {
            let tag = ChunkTag {
                original_name: name.to_string(),
                index: chunk.index,
                total,
                size: chunk.len() as u64,
                checksum: chunk.checksum.clone(),
            };
            self.ctx.destination.deliver_chunk(&tag, &chunk.data).await?;
            debug!(
                transfer_id = %self.id,
                part = %tag.part_name(),
                bytes = tag.size,
                "part delivered"
            );
            self.emit_progress(
                TransferState::Transferring,
                u64::from(chunk.index) + 1,
                Some(u64::from(total)),
            )
            .await;
        }

        Ok(RetrievalHandle::parts(name, total))
    }

    async fn finish(
        &self,
        record: Record,
        result: Result<(), OrchestratorError>,
        started_at: DateTime<Utc>,
    ) -> TransferReport {
        let name = record
            .name
            .or(record.declared_name)
            .unwrap_or_default();
        let mut report = TransferReport {
            transfer_id: self.id.clone(),
            package: package_stem(&name).to_string(),
            name,
            state: TransferState::Completed,
            plan: record.plan,
            handle: record.handle,
            summary: record.summary,
            sha256: record.sha256,
            attempts: record.attempts,
            failure: None,
            failed_during: None,
            error: None,
            started_at,
            finished_at: Utc::now(),
        };

        match result {
            Ok(()) => {
                info!(
                    transfer_id = %self.id,
                    name = %report.name,
                    strategy = ?report.plan.map(|p| p.strategy),
                    "transfer completed"
                );
                self.emit_state(TransferState::Completed).await;
            }
            Err(e) => {
                let kind = e.kind();
                error!(
                    transfer_id = %self.id,
                    name = %report.name,
                    kind = %kind,
                    state = %record.state,
                    error = %e,
                    "transfer failed"
                );
                report.state = TransferState::Failed;
                report.failure = Some(kind);
                report.failed_during = Some(record.state);
                report.error = Some(e.to_string());

                let _ = self
                    .events_tx
                    .send(TransferEvent::Failed {
                        transfer_id: self.id.clone(),
                        kind,
                        error: e.to_string(),
                    })
                    .await;
                self.emit_state(TransferState::Failed).await;
            }
        }

        report
    }

    async fn enter(&self, record: &mut Record, state: TransferState) {
        record.state = state;
        self.emit_state(state).await;
    }

    async fn emit_state(&self, state: TransferState) {
        debug!(transfer_id = %self.id, state = %state, "state changed");
        let _ = self
            .events_tx
            .send(TransferEvent::State {
                transfer_id: self.id.clone(),
                state,
            })
            .await;
    }

    async fn emit_progress(&self, state: TransferState, done: u64, total: Option<u64>) {
        let _ = self
            .events_tx
            .send(TransferEvent::Progress {
                transfer_id: self.id.clone(),
                state,
                done,
                total,
            })
            .await;
    }
}

/// Human-readable result sent to the destination when a transfer finishes.
fn summarize(
    name: &str,
    plan: &TransferPlan,
    handle: Option<&RetrievalHandle>,
    sha256: Option<&str>,
) -> String {
    let size = plan.payload_size;
    let mut summary = match handle {
        Some(RetrievalHandle::Parts { parts, .. }) => {
            let order: Vec<String> = parts.iter().map(|p| shell_quote(p)).collect();
            format!(
                "{name} ({size} bytes) was split into {total} parts.\n\
                 Reassemble them in this exact order:\n  cat {} > {quoted}\n\
                 or check the part count while rebuilding:\n  \
                 apkrelay reassemble . {quoted} --parts {total}\n",
                order.join(" "),
                total = parts.len(),
                quoted = shell_quote(name),
            )
        }
        Some(RetrievalHandle::Url { url }) => {
            format!("{name} ({size} bytes) is available at:\n  {url}\n")
        }
        None => format!("Delivered {name} ({size} bytes).\n"),
    };
    if let Some(sha256) = sha256 {
        let _ = writeln!(summary, "SHA-256: {sha256}");
    }
    summary
}

/// Quotes `s` for a POSIX shell when it contains anything unusual.
fn shell_quote(s: &str) -> String {
    if s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '+'))
    {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::{Delivery, DirectoryDestination};
    use crate::source::FileSource;
    use apkrelay_protocol::{FailureKind, OversizePolicy};
    use apkrelay_relay::{RelayServer, ServerConfig};
    use apkrelay_transfer::{Chunk, checksum_bytes, reassemble};
    use std::future::Future;
    use std::path::PathBuf;
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::net::TcpListener;

    const KB: u64 = 1024;

    /// Destination that keeps everything in memory.
    #[derive(Default)]
    struct MemoryDestination {
        chunk_capable: bool,
        fail_deliveries: AtomicU32,
        files: Mutex<Vec<(String, Vec<u8>)>>,
        chunks: Mutex<Vec<(ChunkTag, Vec<u8>)>>,
        summaries: Mutex<Vec<(String, String)>>,
    }

    impl MemoryDestination {
        fn new(chunk_capable: bool) -> Arc<Self> {
            Arc::new(Self {
                chunk_capable,
                ..Self::default()
            })
        }

        fn failing(times: u32) -> Arc<Self> {
            let dest = Self {
                chunk_capable: true,
                ..Self::default()
            };
            dest.fail_deliveries.store(times, Ordering::SeqCst);
            Arc::new(dest)
        }
    }

    impl Destination for MemoryDestination {
        fn supports_chunks(&self) -> bool {
            self.chunk_capable
        }

        fn deliver_file<'a>(&'a self, name: &'a str, path: &'a Path) -> Delivery<'a> {
            Box::pin(async move {
                let left = self.fail_deliveries.load(Ordering::SeqCst);
                if left > 0 {
                    self.fail_deliveries.store(left - 1, Ordering::SeqCst);
                    return Err(OrchestratorError::Destination("upload timed out".into()));
                }
                let data = tokio::fs::read(path).await?;
                self.files.lock().unwrap().push((name.to_string(), data));
                Ok(())
            })
        }

        fn deliver_chunk<'a>(&'a self, tag: &'a ChunkTag, data: &'a [u8]) -> Delivery<'a> {
            Box::pin(async move {
                self.chunks.lock().unwrap().push((tag.clone(), data.to_vec()));
                Ok(())
            })
        }

        fn deliver_summary<'a>(&'a self, name: &'a str, summary: &'a str) -> Delivery<'a> {
            Box::pin(async move {
                self.summaries
                    .lock()
                    .unwrap()
                    .push((name.to_string(), summary.to_string()));
                Ok(())
            })
        }
    }

    /// Source whose payload never arrives.
    struct PendingSource;

    impl InboundSource for PendingSource {
        fn open(
            &self,
        ) -> Pin<Box<dyn Future<Output = Result<InboundPayload, OrchestratorError>> + Send + '_>>
        {
            Box::pin(std::future::pending::<Result<InboundPayload, OrchestratorError>>())
        }
    }

    fn config(temp_dir: PathBuf) -> TransferConfig {
        TransferConfig {
            ceiling: 50 * KB,
            chunk_size: 50 * KB,
            oversize_policy: OversizePolicy::Chunked,
            max_retries: 0,
            retry_delay: Duration::from_millis(10),
            deadline: Some(Duration::from_secs(10)),
            temp_dir,
            allowed_extensions: vec!["apk".into()],
        }
    }

    fn payload(len: u64) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    fn write_source(dir: &Path, name: &str, data: &[u8]) -> FileSource {
        let path = dir.join(format!("src-{}", uuid::Uuid::new_v4()));
        std::fs::write(&path, data).unwrap();
        FileSource::new(path).with_name(name)
    }

    fn assert_scratch_empty(temp_dir: &Path) {
        let leftovers = std::fs::read_dir(temp_dir).map(|d| d.count()).unwrap_or(0);
        assert_eq!(leftovers, 0, "temporary storage left behind");
    }

    async fn run(ctx: TransferContext, source: &dyn InboundSource) -> TransferReport {
        TransferOrchestrator::new(ctx, CancellationToken::new())
            .run(source)
            .await
    }

    /// Relay that answers every request with HTTP 500.
    async fn failing_relay() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = vec![0u8; 64 * 1024];
                let _ = stream.read(&mut buf).await;
                let body = r#"{"error":"internal error"}"#;
                let resp = format!(
                    "HTTP/1.1 500 Internal Server Error\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(resp.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });
        url
    }

    async fn start_relay(storage_dir: PathBuf) -> (String, CancellationToken) {
        let config = ServerConfig {
            bind: "127.0.0.1:0".into(),
            public_url: None,
            storage_dir,
            allowed_extensions: vec!["apk".into()],
            max_upload_size: 0,
        };
        let server = RelayServer::bind(&config).await.unwrap();
        let url = server.public_url().to_string();
        let cancel = CancellationToken::new();
        tokio::spawn(server.run(cancel.clone()));
        (url, cancel)
    }

    #[tokio::test]
    async fn oversize_payload_is_chunked() {
        let dir = tempfile::tempdir().unwrap();
        let temp_dir = dir.path().join("scratch");
        let data = payload(120 * KB);
        let dest = MemoryDestination::new(true);
        let ctx = TransferContext::new(config(temp_dir.clone()), dest.clone());

        let report = run(ctx, &write_source(dir.path(), "app.apk", &data)).await;

        assert!(report.is_success(), "{:?}", report.error);
        assert_eq!(report.plan.unwrap().strategy, TransferStrategy::Chunked);
        assert_eq!(report.package, "app");
        assert_eq!(report.attempts, 1);
        assert_eq!(report.sha256.as_deref(), Some(checksum_bytes(&data).as_str()));
        assert_eq!(report.handle, Some(RetrievalHandle::parts("app.apk", 3)));

        let chunks = dest.chunks.lock().unwrap().clone();
        let sizes: Vec<u64> = chunks.iter().map(|(tag, _)| tag.size).collect();
        assert_eq!(sizes, vec![50 * KB, 50 * KB, 20 * KB]);
        assert!(chunks.iter().all(|(tag, _)| tag.total == 3 && tag.original_name == "app.apk"));

        // Deliver out of order to the codec; it must still rebuild the payload.
        let mut rebuilt: Vec<Chunk> = chunks
            .into_iter()
            .map(|(tag, data)| Chunk {
                index: tag.index,
                offset: u64::from(tag.index) * 50 * KB,
                data,
                checksum: tag.checksum,
            })
            .collect();
        rebuilt.reverse();
        assert_eq!(reassemble(rebuilt).unwrap(), data);

        let summaries = dest.summaries.lock().unwrap();
        assert!(summaries[0]
            .1
            .contains("cat app.apk.part0 app.apk.part1 app.apk.part2 > app.apk"));
        assert!(dest.files.lock().unwrap().is_empty());
        assert_scratch_empty(&temp_dir);
    }

    #[tokio::test]
    async fn small_payload_is_direct() {
        let dir = tempfile::tempdir().unwrap();
        let temp_dir = dir.path().join("scratch");
        let data = payload(10 * KB);
        let dest = MemoryDestination::new(true);
        let ctx = TransferContext::new(config(temp_dir.clone()), dest.clone());

        let report = run(ctx, &write_source(dir.path(), "app.apk", &data)).await;

        assert!(report.is_success());
        assert_eq!(report.plan.unwrap().strategy, TransferStrategy::Direct);
        assert!(report.handle.is_none());
        assert!(dest.chunks.lock().unwrap().is_empty());

        let files = dest.files.lock().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].0, "app.apk");
        assert_eq!(files[0].1, data);
        assert_scratch_empty(&temp_dir);
    }

    #[tokio::test]
    async fn oversize_payload_is_relayed() {
        let dir = tempfile::tempdir().unwrap();
        let temp_dir = dir.path().join("scratch");
        let (relay_url, relay_cancel) = start_relay(dir.path().join("relay")).await;
        let relay = Arc::new(RelayClient::new(reqwest::Client::new(), &relay_url));

        let mut cfg = config(temp_dir.clone());
        cfg.oversize_policy = OversizePolicy::Relay;
        let dest = MemoryDestination::new(true);
        let ctx = TransferContext::new(cfg, dest.clone()).with_relay(relay.clone());

        let data = payload(120 * KB);
        let report = run(ctx, &write_source(dir.path(), "app.apk", &data)).await;

        assert!(report.is_success(), "{:?}", report.error);
        assert_eq!(report.plan.unwrap().strategy, TransferStrategy::Relay);
        let handle = report.handle.clone().unwrap();
        let url = handle.url().unwrap();
        assert!(url.ends_with("/files/app.apk"));
        assert_eq!(relay.fetch(&handle).await.unwrap(), data);

        let summaries = dest.summaries.lock().unwrap();
        assert!(summaries[0].1.contains(url));
        assert_scratch_empty(&temp_dir);
        relay_cancel.cancel();
    }

    #[tokio::test]
    async fn falls_back_to_relay_without_chunk_support() {
        let dir = tempfile::tempdir().unwrap();
        let (relay_url, relay_cancel) = start_relay(dir.path().join("relay")).await;
        let relay = Arc::new(RelayClient::new(reqwest::Client::new(), &relay_url));

        let dest = MemoryDestination::new(false);
        let ctx = TransferContext::new(config(dir.path().join("scratch")), dest).with_relay(relay);

        let report = run(ctx, &write_source(dir.path(), "app.apk", &payload(60 * KB))).await;
        assert!(report.is_success(), "{:?}", report.error);
        assert_eq!(report.plan.unwrap().strategy, TransferStrategy::Relay);
        relay_cancel.cancel();
    }

    #[tokio::test]
    async fn relay_server_error_fails_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let temp_dir = dir.path().join("scratch");
        let relay_url = failing_relay().await;
        let relay = Arc::new(RelayClient::new(reqwest::Client::new(), &relay_url));

        let mut cfg = config(temp_dir.clone());
        cfg.oversize_policy = OversizePolicy::Relay;
        cfg.ceiling = KB;
        let ctx = TransferContext::new(cfg, MemoryDestination::new(true)).with_relay(relay);

        let report = run(ctx, &write_source(dir.path(), "app.apk", &payload(4 * KB))).await;

        assert_eq!(report.state, TransferState::Failed);
        assert_eq!(report.failure, Some(FailureKind::RelayUnavailable));
        assert_eq!(report.failed_during, Some(TransferState::Transferring));
        assert!(!temp_dir.join(&report.transfer_id).exists());
        assert_scratch_empty(&temp_dir);
    }

    #[tokio::test]
    async fn transient_destination_failures_are_retried() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path().join("scratch"));
        cfg.max_retries = 2;
        let dest = MemoryDestination::failing(2);
        let ctx = TransferContext::new(cfg, dest.clone());

        let report = run(ctx, &write_source(dir.path(), "app.apk", &payload(KB))).await;

        assert!(report.is_success(), "{:?}", report.error);
        assert_eq!(report.attempts, 3);
        assert_eq!(dest.files.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let temp_dir = dir.path().join("scratch");
        let mut cfg = config(temp_dir.clone());
        cfg.max_retries = 1;
        let ctx = TransferContext::new(cfg, MemoryDestination::failing(5));

        let report = run(ctx, &write_source(dir.path(), "app.apk", &payload(KB))).await;

        assert_eq!(report.failure, Some(FailureKind::Destination));
        assert_eq!(report.attempts, 2);
        assert_scratch_empty(&temp_dir);
    }

    #[tokio::test]
    async fn retry_count_is_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path().join("scratch"));
        cfg.max_retries = 10;
        let ctx = TransferContext::new(cfg, MemoryDestination::failing(10));

        let report = run(ctx, &write_source(dir.path(), "app.apk", &payload(KB))).await;
        assert_eq!(report.attempts, MAX_RETRIES + 1);
    }

    #[tokio::test]
    async fn missing_strategy_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path().join("scratch"));
        cfg.oversize_policy = OversizePolicy::Relay;
        cfg.max_retries = 3;
        let ctx = TransferContext::new(cfg, MemoryDestination::new(false));

        let report = run(ctx, &write_source(dir.path(), "app.apk", &payload(60 * KB))).await;

        assert_eq!(report.failure, Some(FailureKind::RelayUnavailable));
        assert_eq!(report.attempts, 1);
    }

    #[tokio::test]
    async fn traversal_name_is_rejected_before_storage() {
        let dir = tempfile::tempdir().unwrap();
        let temp_dir = dir.path().join("scratch");
        let dest = MemoryDestination::new(true);
        let ctx = TransferContext::new(config(temp_dir.clone()), dest.clone());

        let report = run(ctx, &write_source(dir.path(), "../evil.apk", b"x")).await;

        assert_eq!(report.failure, Some(FailureKind::InvalidName));
        assert_eq!(report.failed_during, Some(TransferState::Acquiring));
        assert_eq!(report.name, "../evil.apk");
        assert!(dest.summaries.lock().unwrap().is_empty());
        assert_scratch_empty(&temp_dir);
    }

    #[tokio::test]
    async fn disallowed_extension_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = TransferContext::new(config(dir.path().join("scratch")), MemoryDestination::new(true));

        let report = run(ctx, &write_source(dir.path(), "run.sh", b"#!/bin/sh")).await;
        assert_eq!(report.failure, Some(FailureKind::InvalidName));
    }

    #[tokio::test]
    async fn missing_source_is_source_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = TransferContext::new(config(dir.path().join("scratch")), MemoryDestination::new(true));

        let report = run(ctx, &FileSource::new(dir.path().join("absent.apk"))).await;

        assert_eq!(report.failure, Some(FailureKind::SourceUnavailable));
        assert_eq!(report.attempts, 0);
        assert!(report.plan.is_none());
    }

    #[tokio::test]
    async fn cancellation_fails_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let temp_dir = dir.path().join("scratch");
        let ctx = TransferContext::new(config(temp_dir.clone()), MemoryDestination::new(true));

        let orchestrator = TransferOrchestrator::new(ctx, CancellationToken::new());
        let cancel = orchestrator.cancel_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });

        let report = orchestrator.run(&PendingSource).await;
        assert_eq!(report.failure, Some(FailureKind::Cancelled));
        assert_scratch_empty(&temp_dir);
    }

    #[tokio::test]
    async fn deadline_fails_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let temp_dir = dir.path().join("scratch");
        let mut cfg = config(temp_dir.clone());
        cfg.deadline = Some(Duration::from_millis(50));
        let ctx = TransferContext::new(cfg, MemoryDestination::new(true));

        let report = run(ctx, &PendingSource).await;
        assert_eq!(report.failure, Some(FailureKind::DeadlineExceeded));
        assert_eq!(report.failed_during, Some(TransferState::Acquiring));
        assert_scratch_empty(&temp_dir);
    }

    #[tokio::test]
    async fn concurrent_transfers_of_same_name_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let temp_dir = dir.path().join("scratch");
        let a_data = payload(70 * KB);
        let b_data = vec![7u8; 30 * KB as usize];

        let src_a = dir.path().join("a");
        let src_b = dir.path().join("b");
        std::fs::create_dir_all(&src_a).unwrap();
        std::fs::create_dir_all(&src_b).unwrap();
        let source_a = write_source(&src_a, "app.apk", &a_data);
        let source_b = write_source(&src_b, "app.apk", &b_data);

        let dest_a = MemoryDestination::new(true);
        let dest_b = MemoryDestination::new(true);
        let ctx_a = TransferContext::new(config(temp_dir.clone()), dest_a.clone());
        let ctx_b = TransferContext::new(config(temp_dir.clone()), dest_b.clone());

        let (a, b) = tokio::join!(run(ctx_a, &source_a), run(ctx_b, &source_b));

        assert!(a.is_success() && b.is_success());
        assert_ne!(a.transfer_id, b.transfer_id);
        assert_eq!(a.sha256.as_deref(), Some(checksum_bytes(&a_data).as_str()));
        assert_eq!(b.sha256.as_deref(), Some(checksum_bytes(&b_data).as_str()));
        assert_eq!(dest_b.files.lock().unwrap()[0].1, b_data);
        assert_eq!(dest_a.chunks.lock().unwrap().len(), 2);
        assert_scratch_empty(&temp_dir);
    }

    #[tokio::test]
    async fn every_state_is_published() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = TransferContext::new(config(dir.path().join("scratch")), MemoryDestination::new(true));

        let mut orchestrator = TransferOrchestrator::new(ctx, CancellationToken::new());
        let mut events = orchestrator.take_events().unwrap();
        let report = orchestrator
            .run(&write_source(dir.path(), "app.apk", &payload(KB)))
            .await;
        assert!(report.is_success());

        let mut states = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let TransferEvent::State { state, .. } = event {
                states.push(state);
            }
        }
        assert_eq!(
            states,
            vec![
                TransferState::Acquiring,
                TransferState::Planning,
                TransferState::Transferring,
                TransferState::Finalizing,
                TransferState::Completed,
            ]
        );
    }

    #[tokio::test]
    async fn failure_is_published() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = TransferContext::new(config(dir.path().join("scratch")), MemoryDestination::new(true));

        let mut orchestrator = TransferOrchestrator::new(ctx, CancellationToken::new());
        let mut events = orchestrator.take_events().unwrap();
        orchestrator
            .run(&FileSource::new(dir.path().join("absent.apk")))
            .await;

        let mut failed = None;
        let mut last_state = None;
        while let Ok(event) = events.try_recv() {
            match event {
                TransferEvent::Failed { kind, .. } => failed = Some(kind),
                TransferEvent::State { state, .. } => last_state = Some(state),
                TransferEvent::Progress { .. } => {}
            }
        }
        assert_eq!(failed, Some(FailureKind::SourceUnavailable));
        assert_eq!(last_state, Some(TransferState::Failed));
    }

    #[tokio::test]
    async fn report_serializes_camel_case() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = TransferContext::new(config(dir.path().join("scratch")), MemoryDestination::new(true));

        let report = run(ctx, &write_source(dir.path(), "My Game.apk", &payload(KB))).await;
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["state"], "completed");
        assert_eq!(json["package"], "My Game");
        assert_eq!(json["plan"]["strategy"], "direct");
        assert!(json.get("transferId").is_some());
        assert!(json.get("failure").is_none());
    }

    #[tokio::test]
    async fn shorter_resend_leaves_no_stale_parts() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let dest = Arc::new(DirectoryDestination::open(&out, true).await.unwrap());
        let mut cfg = config(dir.path().join("scratch"));
        cfg.ceiling = KB;
        cfg.chunk_size = KB;
        let cfg = Arc::new(cfg);

        let first = vec![1u8; 3000];
        let ctx = TransferContext {
            config: cfg.clone(),
            destination: dest.clone(),
            relay: None,
        };
        let report = run(ctx, &write_source(dir.path(), "app.apk", &first)).await;
        assert_eq!(report.handle, Some(RetrievalHandle::parts("app.apk", 3)));

        let second = vec![2u8; 1500];
        let ctx = TransferContext {
            config: cfg,
            destination: dest.clone(),
            relay: None,
        };
        let report = run(ctx, &write_source(dir.path(), "app.apk", &second)).await;
        assert!(report.is_success(), "{:?}", report.error);
        assert_eq!(report.handle, Some(RetrievalHandle::parts("app.apk", 2)));
        assert!(!out.join("app.apk.part2").exists());

        let parts = apkrelay_transfer::discover_parts(&out, "app.apk", Some(2))
            .await
            .unwrap();
        let rebuilt = dir.path().join("rebuilt.apk");
        let written =
            apkrelay_transfer::reassemble_files(&parts, &rebuilt, report.sha256.as_deref())
                .await
                .unwrap();
        assert_eq!(written, 1500);
        assert_eq!(std::fs::read(&rebuilt).unwrap(), second);
    }

    #[test]
    fn chunked_summary_names_exact_order() {
        let plan = TransferPlan {
            strategy: TransferStrategy::Chunked,
            payload_size: 100,
            ceiling: 50,
        };
        let handle = RetrievalHandle::parts("My App.apk", 2);
        let summary = summarize("My App.apk", &plan, Some(&handle), Some("abc"));
        assert!(summary.contains("cat 'My App.apk.part0' 'My App.apk.part1' > 'My App.apk'"));
        assert!(summary.contains("apkrelay reassemble . 'My App.apk' --parts 2"));
        assert!(summary.ends_with("SHA-256: abc\n"));
    }

    #[test]
    fn shell_quote_escapes_quotes() {
        assert_eq!(shell_quote("app.apk"), "app.apk");
        assert_eq!(shell_quote("it's.apk"), r"'it'\''s.apk'");
    }
}
