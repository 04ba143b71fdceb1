//! services/bot/src/chat/handler.rs
//!
//! The conversation engine. It feeds inbound chat events to the chat's session,
//! carries out the effects of each transition and routes job results back.

use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::chat::job_task::{run_worker, JobCompletion, JobTicket};
use crate::chat::reply::{InfoPage, Presenter};
use crate::chat::state::AppState;
use crate::error::BotError;
use pdfbot_core::domain::{ChatId, IncomingFile, JobId, Notice, Reply, Session, TransformKind};
use pdfbot_core::machine::{Effect, Event, Transition};
use pdfbot_core::validation::is_token;

/// Pending tickets the job queue buffers before submitters wait.
const JOB_QUEUE_CAPACITY: usize = 64;

/// A chat update, already stripped of platform details.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// An entry command such as `/compress`.
    Begin(TransformKind),
    Cancel,
    Text(String),
    File(IncomingFile),
    Info(InfoPage),
}

/// The session a batch of effects belongs to.
#[derive(Debug, Clone)]
struct SessionRef {
    chat_id: ChatId,
    session_id: Uuid,
    job_id: Option<JobId>,
}

impl SessionRef {
    fn of(session: &Session) -> Self {
        Self {
            chat_id: session.chat_id,
            session_id: session.id,
            job_id: session.job_id.clone(),
        }
    }
}

pub struct BotEngine {
    app_state: Arc<AppState>,
    jobs: mpsc::Sender<JobTicket>,
}

impl BotEngine {
    /// Builds the engine and spawns the job worker and the completion loop.
    /// Both tasks stop when `shutdown` is cancelled.
    pub fn start(
        app_state: Arc<AppState>,
        max_concurrent_jobs: usize,
        shutdown: CancellationToken,
    ) -> (Arc<Self>, Vec<JoinHandle<()>>) {
        let (job_tx, job_rx) = mpsc::channel(JOB_QUEUE_CAPACITY);
        let (done_tx, done_rx) = mpsc::channel(JOB_QUEUE_CAPACITY);

        let engine = Arc::new(Self {
            app_state: app_state.clone(),
            jobs: job_tx,
        });

        let worker = tokio::spawn(run_worker(
            app_state,
            job_rx,
            done_tx,
            max_concurrent_jobs,
            shutdown.clone(),
        ));
        let completions = tokio::spawn(engine.clone().run_completions(done_rx, shutdown));

        (engine, vec![worker, completions])
    }

    pub fn app_state(&self) -> &Arc<AppState> {
        &self.app_state
    }

    //=====================================================================================
    // Inbound events
    //=====================================================================================

    /// Handles one update of a chat. Updates of the same chat must not be handled
    /// concurrently; the dispatcher guarantees that.
    pub async fn handle(&self, chat_id: ChatId, inbound: Inbound) {
        let event = match inbound {
            Inbound::Info(page) => return self.send_all(chat_id, Presenter::info(page)).await,
            Inbound::Begin(kind) => return self.begin(chat_id, kind).await,
            Inbound::Cancel => Event::CancelRequested,
            Inbound::Text(text) => Event::TextReceived(text),
            Inbound::File(file) => Event::FileReceived(file),
        };

        let step = {
            let mut sessions = self.app_state.sessions.lock().await;
            sessions.get_mut(&chat_id).map(|session| {
                let transition = session.step(event.clone(), &self.app_state.limits);
                log_transition(session, &transition);
                (SessionRef::of(session), transition.into_effects())
            })
        };

        match step {
            Some((target, effects)) => self.execute(target, effects).await,
            None => {
                let notice = match event {
                    Event::CancelRequested => Notice::NothingToCancel,
                    Event::TextReceived(ref text) if is_token(text, "cancel") => {
                        Notice::NothingToCancel
                    }
                    _ => Notice::Idle,
                };
                debug!("Chat {} has no active session.", chat_id);
                self.send_all(chat_id, Presenter::notice(&notice)).await;
            }
        }
    }

    /// Opens a session for `kind`, replacing a session that is still waiting for input.
    async fn begin(&self, chat_id: ChatId, kind: TransformKind) {
        let started = {
            let mut sessions = self.app_state.sessions.lock().await;
            match sessions.get(&chat_id) {
                Some(current) if current.is_busy() => None,
                _ => {
                    let (session, effects) = Session::start(chat_id, kind);
                    let target = SessionRef::of(&session);
                    let replaced = sessions.insert(chat_id, session);
                    Some((target, effects, replaced))
                }
            }
        };

        let Some((target, effects, replaced)) = started else {
            return self.send_all(chat_id, Presenter::notice(&Notice::Busy)).await;
        };
        if let Some(old) = replaced {
            info!("Chat {} restarted with /{}; dropping session {}.", chat_id, kind, old.id);
            self.purge(old.job_id.as_ref()).await;
        }
        info!("Chat {} started /{}.", chat_id, kind);
        self.execute(target, effects).await;
    }

    //=====================================================================================
    // Job results
    //=====================================================================================

    async fn run_completions(
        self: Arc<Self>,
        mut completions: mpsc::Receiver<JobCompletion>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                done = completions.recv() => match done {
                    // Deliveries of different chats must not wait on each other.
                    Some(done) => {
                        let engine = self.clone();
                        tokio::spawn(async move { engine.complete(done).await });
                    }
                    None => break,
                },
            }
        }
        debug!("Completion loop stopped.");
    }

    /// Feeds a job result to its session and carries out the delivery and cleanup.
    pub async fn complete(&self, done: JobCompletion) {
        let JobCompletion {
            chat_id,
            session_id,
            job_id,
            result,
        } = done;

        let step = {
            let mut sessions = self.app_state.sessions.lock().await;
            match sessions.get_mut(&chat_id) {
                Some(session) if session.id == session_id => {
                    let transition = session.complete(result);
                    log_transition(session, &transition);
                    Some((SessionRef::of(session), transition.into_effects()))
                }
                _ => None,
            }
        };

        match step {
            Some((target, effects)) => self.execute(target, effects).await,
            None => {
                warn!("Job {} finished after its session ended; discarding it.", job_id);
                self.purge(Some(&job_id)).await;
            }
        }
    }

    //=====================================================================================
    // Effects
    //=====================================================================================

    async fn execute(&self, target: SessionRef, effects: Vec<Effect>) {
        let mut queue: VecDeque<Effect> = effects.into();
        while let Some(effect) = queue.pop_front() {
            match effect {
                Effect::Notify(notice) => {
                    self.send_all(target.chat_id, Presenter::notice(&notice)).await
                }
                Effect::Stage { file, name } => {
                    if let Err(e) = self.stage(&target, &file, &name).await {
                        error!("Staging {} for chat {} failed: {}", name, target.chat_id, e);
                        // Whatever the transition planned after this file no longer applies.
                        queue = self.abort(&target).await.into();
                    }
                }
                Effect::Submit(request) => {
                    let ticket = JobTicket {
                        chat_id: target.chat_id,
                        session_id: target.session_id,
                        request,
                    };
                    if self.jobs.send(ticket).await.is_err() {
                        error!("Job queue closed; chat {} cannot be served.", target.chat_id);
                        queue = self.abort(&target).await.into();
                    }
                }
                Effect::Deliver {
                    kind,
                    parameter,
                    output,
                } => {
                    let replies = Presenter::delivery(kind, parameter.as_ref(), &output);
                    self.send_all(target.chat_id, replies).await
                }
                Effect::Close => self.close(&target).await,
            }
        }
    }

    async fn stage(
        &self,
        target: &SessionRef,
        file: &IncomingFile,
        name: &str,
    ) -> Result<(), BotError> {
        let job_id = target
            .job_id
            .as_ref()
            .ok_or_else(|| BotError::Internal("accepted a file without a job id".to_string()))?;
        let staging = &self.app_state.staging;
        staging.stage(job_id).await?;
        self.app_state
            .transport
            .fetch_file(&file.file_id, &staging.input_path(job_id, name))
            .await?;
        debug!("Staged {} for job {}.", name, job_id);
        Ok(())
    }

    /// Fails the session after an effect could not be carried out.
    async fn abort(&self, target: &SessionRef) -> Vec<Effect> {
        let mut sessions = self.app_state.sessions.lock().await;
        match sessions.get_mut(&target.chat_id) {
            Some(session) if session.id == target.session_id => session.abort().into_effects(),
            _ => Vec::new(),
        }
    }

    /// Purges the session's staging area, then forgets the session.
    async fn close(&self, target: &SessionRef) {
        self.purge(target.job_id.as_ref()).await;
        self.app_state
            .sessions
            .remove_if(target.chat_id, target.session_id)
            .await;
        debug!("Session {} of chat {} closed.", target.session_id, target.chat_id);
    }

    async fn purge(&self, job_id: Option<&JobId>) {
        if let Some(job_id) = job_id {
            if let Err(e) = self.app_state.staging.purge(job_id).await {
                warn!("Could not purge staging of job {}: {}", job_id, e);
            }
        }
    }

    async fn send_all(&self, chat_id: ChatId, replies: Vec<Reply>) {
        for reply in replies {
            if let Err(e) = self.app_state.transport.send(chat_id, reply).await {
                warn!("Failed to reply to chat {}: {}", chat_id, e);
            }
        }
    }
}

fn log_transition(session: &Session, transition: &Transition) {
    match transition {
        Transition::Invalid(effects) if !effects.is_empty() => {
            warn!("Chat {} sent input the session cannot use.", session.chat_id)
        }
        Transition::Terminal(_) => info!(
            "Chat {} ended /{} as {:?} after {}s.",
            session.chat_id,
            session.kind,
            session.state,
            session.lifetime().num_seconds()
        ),
        _ => {}
    }
}
