//! services/bot/tests/conversation.rs
//!
//! Runs whole conversations through the engine with an in-memory chat transport
//! and a scripted conversion backend.

use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use pdfbot_core::domain::{
    ChatId, Ending, FileSource, IncomingFile, JobId, ParamValue, Params, Reply, SessionState,
    TransformKind,
};
use pdfbot_core::ports::{
    ChatTransport, ConversionService, GatewayError, GatewayResult, PortError, PortResult,
};
use pdfbot_core::validation::Limits;
use pdfbot_lib::adapters::staging::Staging;
use pdfbot_lib::chat::{AppState, BotEngine, Inbound};

const CHAT: ChatId = 1001;

//=========================================================================================
// Fakes
//=========================================================================================

#[derive(Default)]
struct FakeTransport {
    sent: Mutex<Vec<(ChatId, Reply)>>,
    fail_fetch: bool,
    /// Document uploads to this chat wait for a notification.
    slow_uploads: Option<(ChatId, Arc<Notify>)>,
}

impl FakeTransport {
    fn texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(_, r)| match r {
                Reply::Text { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    fn documents(&self) -> Vec<(String, String)> {
        self.documents_of(CHAT)
    }

    fn documents_of(&self, chat_id: ChatId) -> Vec<(String, String)> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(chat, _)| *chat == chat_id)
            .filter_map(|(_, r)| match r {
                Reply::Document { path, caption } => Some((
                    path.file_name().unwrap().to_string_lossy().into_owned(),
                    caption.clone(),
                )),
                _ => None,
            })
            .collect()
    }

    fn said(&self, fragment: &str) -> bool {
        self.texts().iter().any(|t| t.contains(fragment))
    }
}

#[async_trait]
impl ChatTransport for FakeTransport {
    async fn send(&self, chat_id: ChatId, reply: Reply) -> PortResult<()> {
        if let Some((slow_chat, release)) = &self.slow_uploads {
            if *slow_chat == chat_id && matches!(reply, Reply::Document { .. }) {
                release.notified().await;
            }
        }
        self.sent.lock().unwrap().push((chat_id, reply));
        Ok(())
    }

    async fn fetch_file(&self, file_id: &str, dest: &Path) -> PortResult<()> {
        if self.fail_fetch {
            return Err(PortError::Unexpected("download refused".into()));
        }
        tokio::fs::write(dest, file_id.as_bytes())
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Run {
        kind: TransformKind,
        inputs: Vec<PathBuf>,
        params: Params,
    },
    Merge {
        inputs: Vec<PathBuf>,
    },
}

#[derive(Default)]
struct FakeGateway {
    calls: Mutex<Vec<Call>>,
    /// When set, results are a zip holding these entries.
    archive: Option<Vec<&'static str>>,
    fail: bool,
    /// When set, every call waits for a notification first.
    gate: Option<Arc<Notify>>,
}

impl FakeGateway {
    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    async fn produce(&self, output_dir: &Path, name: &str) -> GatewayResult<PathBuf> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.fail {
            return Err(GatewayError::Remote("TaskError".into()));
        }
        tokio::fs::create_dir_all(output_dir).await?;
        match &self.archive {
            Some(entries) => {
                let path = output_dir.join("result.zip");
                let mut zip = zip::ZipWriter::new(std::fs::File::create(&path)?);
                for entry in entries {
                    zip.start_file(*entry, zip::write::SimpleFileOptions::default())
                        .unwrap();
                    zip.write_all(entry.as_bytes())?;
                }
                zip.finish().unwrap();
                Ok(path)
            }
            None => {
                let path = output_dir.join(name);
                tokio::fs::write(&path, b"%PDF-result").await?;
                Ok(path)
            }
        }
    }
}

#[async_trait]
impl ConversionService for FakeGateway {
    async fn run(
        &self,
        kind: TransformKind,
        inputs: &[PathBuf],
        params: &Params,
        output_dir: &Path,
    ) -> GatewayResult<PathBuf> {
        for input in inputs {
            assert!(input.is_file(), "{} was not staged", input.display());
        }
        self.calls.lock().unwrap().push(Call::Run {
            kind,
            inputs: inputs.to_vec(),
            params: params.clone(),
        });
        self.produce(output_dir, &format!("{}.pdf", kind)).await
    }

    async fn merge(&self, inputs: &[PathBuf], output_dir: &Path) -> GatewayResult<PathBuf> {
        self.calls.lock().unwrap().push(Call::Merge {
            inputs: inputs.to_vec(),
        });
        self.produce(output_dir, "merged.pdf").await
    }
}

//=========================================================================================
// Harness
//=========================================================================================

struct Harness {
    engine: Arc<BotEngine>,
    transport: Arc<FakeTransport>,
    gateway: Arc<FakeGateway>,
    staging: Staging,
    shutdown: CancellationToken,
    _root: tempfile::TempDir,
}

impl Harness {
    fn new(transport: FakeTransport, gateway: FakeGateway) -> Self {
        let root = tempfile::tempdir().unwrap();
        let staging = Staging::new(root.path().join("tmp"));
        let transport = Arc::new(transport);
        let gateway = Arc::new(gateway);
        let app_state = Arc::new(AppState::new(
            transport.clone(),
            gateway.clone(),
            staging.clone(),
            Limits::default(),
        ));
        let shutdown = CancellationToken::new();
        let (engine, _tasks) = BotEngine::start(app_state, 2, shutdown.clone());
        Self {
            engine,
            transport,
            gateway,
            staging,
            shutdown,
            _root: root,
        }
    }

    async fn send(&self, inbound: Inbound) {
        self.send_to(CHAT, inbound).await;
    }

    async fn send_to(&self, chat_id: ChatId, inbound: Inbound) {
        self.engine.handle(chat_id, inbound).await;
    }

    async fn state(&self) -> Option<SessionState> {
        self.state_of(CHAT).await
    }

    async fn state_of(&self, chat_id: ChatId) -> Option<SessionState> {
        self.engine
            .app_state()
            .sessions
            .get(chat_id)
            .await
            .map(|s| s.state)
    }

    async fn job_id_of(&self, chat_id: ChatId) -> Option<JobId> {
        self.engine
            .app_state()
            .sessions
            .get(chat_id)
            .await
            .and_then(|s| s.job_id)
    }

    async fn job_id(&self) -> Option<JobId> {
        self.job_id_of(CHAT).await
    }

    /// Waits until the chat's session has been closed.
    async fn settle(&self) {
        self.settle_chat(CHAT).await;
    }

    async fn settle_chat(&self, chat_id: ChatId) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.state_of(chat_id).await.is_some() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("the session never closed");
    }

    fn staged_jobs(&self) -> usize {
        std::fs::read_dir(self.staging.root())
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn pdf(unique: &str) -> Inbound {
    Inbound::File(IncomingFile {
        file_id: format!("file-{unique}"),
        unique_id: unique.to_string(),
        source: FileSource::Document,
        file_name: Some("document.pdf".into()),
        mime_type: Some("application/pdf".into()),
        size: 50_000,
    })
}

fn photo(unique: &str) -> Inbound {
    Inbound::File(IncomingFile {
        file_id: format!("photo-{unique}"),
        unique_id: unique.to_string(),
        source: FileSource::Photo,
        file_name: None,
        mime_type: None,
        size: 80_000,
    })
}

fn text(s: &str) -> Inbound {
    Inbound::Text(s.to_string())
}

fn file_names(paths: &[PathBuf]) -> Vec<String> {
    paths
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect()
}

//=========================================================================================
// Conversations
//=========================================================================================

#[tokio::test]
async fn rotate_refuses_270_then_delivers_90() {
    let h = Harness::new(FakeTransport::default(), FakeGateway::default());

    h.send(Inbound::Begin(TransformKind::Rotate)).await;
    h.send(pdf("rot")).await;
    let job_id = h.job_id().await.unwrap();
    assert!(h.staging.input_path(&job_id, "input-001.pdf").is_file());

    h.send(text("270")).await;
    assert!(h.transport.said("This angle is not allowed"));
    assert!(matches!(
        h.state().await,
        Some(SessionState::AwaitingParameter(_))
    ));
    assert!(h.gateway.calls().is_empty());

    h.send(text("90")).await;
    h.settle().await;

    let calls = h.gateway.calls();
    assert_eq!(calls.len(), 1);
    match &calls[0] {
        Call::Run { kind, inputs, params } => {
            assert_eq!(*kind, TransformKind::Rotate);
            assert_eq!(file_names(inputs), vec!["input-001.pdf"]);
            assert_eq!(params.get("rotate"), Some(&ParamValue::Int(90)));
        }
        other => panic!("unexpected call {other:?}"),
    }
    assert_eq!(
        h.transport.documents(),
        vec![(
            "rotatepdf.pdf".to_string(),
            "✨ Here is your 90 rotated PDF file".to_string()
        )]
    );
    assert!(h.transport.said("Thank you, see you soon!"));
    assert!(!h.staging.job_dir(&job_id).exists());
}

#[tokio::test]
async fn a_single_image_is_converted_without_merging() {
    let h = Harness::new(FakeTransport::default(), FakeGateway::default());

    h.send(Inbound::Begin(TransformKind::ImageToPdf)).await;
    h.send(photo("img1")).await;
    assert_eq!(h.state().await, Some(SessionState::AwaitingMoreOrDone));
    h.send(text("done")).await;
    h.settle().await;

    let calls = h.gateway.calls();
    assert_eq!(calls.len(), 1);
    assert!(matches!(
        calls[0],
        Call::Run {
            kind: TransformKind::ImageToPdf,
            ..
        }
    ));
    assert_eq!(h.transport.documents().len(), 1);
    assert_eq!(h.transport.documents()[0].1, "✨ Here is your PDF file");
}

#[tokio::test]
async fn several_images_are_merged_in_the_order_sent() {
    let h = Harness::new(FakeTransport::default(), FakeGateway::default());

    h.send(Inbound::Begin(TransformKind::ImageToPdf)).await;
    for id in ["a", "b", "c"] {
        h.send(photo(id)).await;
    }
    h.send(text("what")).await;
    assert!(h.transport.said("I can't understand you"));
    h.send(text(" DONE ")).await;
    h.settle().await;

    let calls = h.gateway.calls();
    let runs = calls
        .iter()
        .filter(|c| matches!(c, Call::Run { .. }))
        .count();
    assert_eq!(runs, 3);
    match calls.last() {
        Some(Call::Merge { inputs }) => {
            assert_eq!(inputs.len(), 3);
            let dirs: Vec<String> = inputs
                .iter()
                .map(|p| {
                    p.parent()
                        .unwrap()
                        .file_name()
                        .unwrap()
                        .to_string_lossy()
                        .into_owned()
                })
                .collect();
            assert_eq!(dirs, vec!["converted-001", "converted-002", "converted-003"]);
        }
        other => panic!("expected a merge last, got {other:?}"),
    }
    assert_eq!(h.transport.documents()[0].0, "merged.pdf");
    assert!(h.transport.said("I received 3 images"));
}

#[tokio::test]
async fn split_delivers_every_chunk_in_order() {
    let gateway = FakeGateway {
        archive: Some(vec!["doc_10.pdf", "doc_2.pdf", "doc_1.pdf"]),
        ..Default::default()
    };
    let h = Harness::new(FakeTransport::default(), gateway);

    h.send(Inbound::Begin(TransformKind::Split)).await;
    h.send(pdf("split")).await;
    h.send(text("0")).await;
    assert!(h.transport.said("This range is not valid"));
    h.send(text("2")).await;
    h.settle().await;

    let documents = h.transport.documents();
    assert_eq!(
        documents,
        vec![
            ("doc_1.pdf".to_string(), "📄 1 range of your PDF file".to_string()),
            ("doc_2.pdf".to_string(), "📄 2 range of your PDF file".to_string()),
            ("doc_10.pdf".to_string(), "📄 3 range of your PDF file".to_string()),
        ]
    );
    assert!(h.transport.said("✨ Here are your PDF files"));
    assert_eq!(h.staged_jobs(), 0);
}

#[tokio::test]
async fn split_into_one_file_says_so() {
    let gateway = FakeGateway {
        archive: Some(vec!["only.pdf"]),
        ..Default::default()
    };
    let h = Harness::new(FakeTransport::default(), gateway);

    h.send(Inbound::Begin(TransformKind::Split)).await;
    h.send(pdf("one")).await;
    h.send(text("50")).await;
    h.settle().await;

    assert_eq!(
        h.transport.documents(),
        vec![(
            "only.pdf".to_string(),
            "The range you sent me generated just one PDF file.".to_string()
        )]
    );
}

#[tokio::test]
async fn cancel_never_reaches_the_gateway() {
    let h = Harness::new(FakeTransport::default(), FakeGateway::default());

    h.send(Inbound::Begin(TransformKind::Protect)).await;
    h.send(pdf("secret")).await;
    let job_id = h.job_id().await.unwrap();
    h.send(text("Cancel")).await;

    assert_eq!(h.state().await, None);
    assert!(h.gateway.calls().is_empty());
    assert!(h.transport.said("🚫 Action cancelled"));
    assert!(!h.staging.job_dir(&job_id).exists());

    h.send(Inbound::Cancel).await;
    assert!(h.transport.said("There is nothing to cancel"));
}

#[tokio::test]
async fn invalid_files_are_reported_once_and_keep_waiting() {
    let h = Harness::new(FakeTransport::default(), FakeGateway::default());

    h.send(Inbound::Begin(TransformKind::Compress)).await;
    let before = h.transport.texts().len();
    h.send(photo("not-a-pdf")).await;

    let texts = h.transport.texts();
    assert_eq!(texts.len(), before + 1);
    assert!(texts[before].contains("What you sent is not a valid PDF file"));
    assert_eq!(h.state().await, Some(SessionState::AwaitingFile));
    assert_eq!(h.staged_jobs(), 0);
}

#[tokio::test]
async fn gateway_failures_end_with_an_apology_and_cleanup() {
    let gateway = FakeGateway {
        fail: true,
        ..Default::default()
    };
    let h = Harness::new(FakeTransport::default(), gateway);

    h.send(Inbound::Begin(TransformKind::Unlock)).await;
    h.send(pdf("locked")).await;
    h.settle().await;

    assert!(h.transport.said("An error occured 😔, sorry."));
    assert!(h.transport.said("Thank you, see you soon!"));
    assert!(h.transport.documents().is_empty());
    assert_eq!(h.staged_jobs(), 0);
}

#[tokio::test]
async fn a_failed_download_fails_the_session() {
    let transport = FakeTransport {
        fail_fetch: true,
        ..Default::default()
    };
    let h = Harness::new(transport, FakeGateway::default());

    h.send(Inbound::Begin(TransformKind::Compress)).await;
    h.send(pdf("gone")).await;

    assert_eq!(h.state().await, None);
    assert!(h.gateway.calls().is_empty());
    assert!(h.transport.said("An error occured"));
    assert!(!h.transport.said("I received your PDF file correctly"));
}

#[tokio::test]
async fn busy_sessions_refuse_new_commands_until_delivered() {
    let gate = Arc::new(Notify::new());
    let gateway = FakeGateway {
        gate: Some(gate.clone()),
        ..Default::default()
    };
    let h = Harness::new(FakeTransport::default(), gateway);

    h.send(Inbound::Begin(TransformKind::Compress)).await;
    h.send(pdf("slow")).await;
    assert_eq!(h.state().await, Some(SessionState::Processing));

    h.send(Inbound::Begin(TransformKind::Rotate)).await;
    h.send(Inbound::Cancel).await;
    let busy = h
        .transport
        .texts()
        .iter()
        .filter(|t| t.contains("still working"))
        .count();
    assert_eq!(busy, 2);
    assert_eq!(h.state().await, Some(SessionState::Processing));

    gate.notify_one();
    h.settle().await;
    assert_eq!(
        h.transport.documents(),
        vec![(
            "compress.pdf".to_string(),
            "✨ Here is your compressed file".to_string()
        )]
    );
}

#[tokio::test]
async fn a_new_command_replaces_a_waiting_session() {
    let h = Harness::new(FakeTransport::default(), FakeGateway::default());

    h.send(Inbound::Begin(TransformKind::Watermark)).await;
    h.send(pdf("first")).await;
    let old_job = h.job_id().await.unwrap();
    assert!(h.staging.job_dir(&old_job).exists());

    h.send(Inbound::Begin(TransformKind::PdfToJpg)).await;
    assert_eq!(h.state().await, Some(SessionState::AwaitingFile));
    assert!(!h.staging.job_dir(&old_job).exists());
    assert!(h.transport.said("convert into jpg images"));
}

#[tokio::test]
async fn input_without_a_session_gets_a_hint() {
    let h = Harness::new(FakeTransport::default(), FakeGateway::default());

    h.send(text("hello")).await;
    h.send(pdf("stray")).await;
    let hints = h
        .transport
        .texts()
        .iter()
        .filter(|t| t.contains("/help"))
        .count();
    assert_eq!(hints, 2);
    assert_eq!(h.staged_jobs(), 0);
}

#[tokio::test]
async fn a_slow_upload_in_one_chat_does_not_hold_back_another() {
    const SLOW: ChatId = 2001;
    const FAST: ChatId = 2002;
    let release = Arc::new(Notify::new());
    let transport = FakeTransport {
        slow_uploads: Some((SLOW, release.clone())),
        ..Default::default()
    };
    let h = Harness::new(transport, FakeGateway::default());

    h.send_to(SLOW, Inbound::Begin(TransformKind::Compress)).await;
    h.send_to(SLOW, pdf("slow-upload")).await;
    let slow_job = h.job_id_of(SLOW).await.unwrap();

    // Wait until the slow chat's result is being uploaded.
    tokio::time::timeout(Duration::from_secs(5), async {
        while h.state_of(SLOW).await != Some(SessionState::Terminal(Ending::Completed)) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("the slow chat never finished its job");

    h.send_to(FAST, Inbound::Begin(TransformKind::Rotate)).await;
    h.send_to(FAST, pdf("fast-upload")).await;
    let fast_job = h.job_id_of(FAST).await.unwrap();
    assert_ne!(slow_job, fast_job);
    h.send_to(FAST, text("180")).await;
    h.settle_chat(FAST).await;

    assert_eq!(
        h.transport.documents_of(FAST),
        vec![(
            "rotatepdf.pdf".to_string(),
            "✨ Here is your 180 rotated PDF file".to_string()
        )]
    );
    assert!(!h.staging.job_dir(&fast_job).exists());
    assert!(h.staging.job_dir(&slow_job).exists());
    assert!(h.transport.documents_of(SLOW).is_empty());

    release.notify_one();
    h.settle_chat(SLOW).await;
    assert_eq!(h.transport.documents_of(SLOW).len(), 1);
    assert!(!h.staging.job_dir(&slow_job).exists());
}

#[tokio::test]
async fn input_during_delivery_gets_the_busy_notice() {
    let release = Arc::new(Notify::new());
    let transport = FakeTransport {
        slow_uploads: Some((CHAT, release.clone())),
        ..Default::default()
    };
    let h = Harness::new(transport, FakeGateway::default());

    h.send(Inbound::Begin(TransformKind::Compress)).await;
    h.send(pdf("delivering")).await;
    tokio::time::timeout(Duration::from_secs(5), async {
        while h.state().await != Some(SessionState::Terminal(Ending::Completed)) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("the job never finished");

    h.send(text("hello?")).await;
    assert!(h.transport.said("still working"));

    release.notify_one();
    h.settle().await;
}
