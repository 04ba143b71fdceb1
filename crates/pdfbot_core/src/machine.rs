//! crates/pdfbot_core/src/machine.rs
//!
//! The per-chat conversation state machine.
//!
//! `Session::step` is a total function over (state, event): every pair yields an
//! advance, an invalid-input re-prompt that leaves the state untouched, or a
//! terminal transition. It performs no I/O; the engine executes the returned
//! effects in order.

use chrono::Utc;
use uuid::Uuid;

use crate::domain::{
    ChatId, Ending, IncomingFile, JobId, JobOutput, JobRequest, Notice, Parameter,
    ParameterKind, Session, SessionState, TransformKind,
};
use crate::ports::GatewayError;
use crate::validation::{is_token, validate_file, Limits};

/// An inbound event for an active session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    FileReceived(IncomingFile),
    TextReceived(String),
    CancelRequested,
}

/// Work the engine has to carry out after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Notify(Notice),
    /// Download `file` into the session's staging area under `name`.
    Stage { file: IncomingFile, name: String },
    /// Hand the job to the conversion worker.
    Submit(JobRequest),
    /// Send the result of the job back to the user.
    Deliver {
        kind: TransformKind,
        parameter: Option<Parameter>,
        output: JobOutput,
    },
    /// The session is over: purge its staging area and forget it.
    Close,
}

/// Result of feeding an event to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// The state moved on (or the image loop accumulated another file).
    Advance(Vec<Effect>),
    /// The input was rejected; the state is unchanged.
    Invalid(Vec<Effect>),
    /// The session reached its terminal state.
    Terminal(Vec<Effect>),
}

impl Transition {
    pub fn effects(&self) -> &[Effect] {
        match self {
            Transition::Advance(e) | Transition::Invalid(e) | Transition::Terminal(e) => e,
        }
    }

    pub fn into_effects(self) -> Vec<Effect> {
        match self {
            Transition::Advance(e) | Transition::Invalid(e) | Transition::Terminal(e) => e,
        }
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, Transition::Invalid(_))
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Transition::Terminal(_))
    }
}

impl Session {
    /// Opens a conversation for `kind` and returns the entry prompt.
    pub fn start(chat_id: ChatId, kind: TransformKind) -> (Self, Vec<Effect>) {
        let now = Utc::now();
        let session = Self {
            id: Uuid::new_v4(),
            chat_id,
            kind,
            state: SessionState::AwaitingFile,
            inputs: Vec::new(),
            parameter: None,
            job_id: None,
            created_at: now,
            updated_at: now,
        };
        (session, vec![Effect::Notify(Notice::Prompt(kind))])
    }

    /// Processing, or terminal but not yet closed by the engine.
    pub fn is_busy(&self) -> bool {
        matches!(
            self.state,
            SessionState::Processing | SessionState::Terminal(_)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, SessionState::Terminal(_))
    }

    /// Time from the entry command to the latest event.
    pub fn lifetime(&self) -> chrono::Duration {
        self.updated_at - self.created_at
    }

    /// Feeds one inbound event to the session.
    pub fn step(&mut self, event: Event, limits: &Limits) -> Transition {
        let transition = match (self.state.clone(), event) {
            // No mid-job abort: a submitted job runs to completion and its
            // result is delivered before the session closes.
            (SessionState::Processing, _) | (SessionState::Terminal(_), _) => {
                Transition::Invalid(vec![Effect::Notify(Notice::Busy)])
            }
            (_, Event::CancelRequested) => self.cancel(),
            (_, Event::TextReceived(text)) if is_token(&text, "cancel") => self.cancel(),

            (SessionState::AwaitingFile, Event::FileReceived(file))
            | (SessionState::AwaitingMoreOrDone, Event::FileReceived(file)) => {
                self.accept_file(file, limits)
            }
            (SessionState::AwaitingFile, Event::TextReceived(text)) => {
                if self.kind.accumulates() && is_token(&text, "done") {
                    Transition::Invalid(vec![Effect::Notify(Notice::NeedImageFirst)])
                } else {
                    Transition::Invalid(vec![Effect::Notify(Notice::ExpectedFile(self.kind))])
                }
            }

            (SessionState::AwaitingMoreOrDone, Event::TextReceived(text)) => {
                if is_token(&text, "done") {
                    self.submit(Vec::new())
                } else {
                    Transition::Invalid(vec![Effect::Notify(Notice::NotUnderstood)])
                }
            }

            (SessionState::AwaitingParameter(kind), Event::FileReceived(_)) => {
                Transition::Invalid(vec![Effect::Notify(Notice::ExpectedParameter(kind))])
            }
            (SessionState::AwaitingParameter(kind), Event::TextReceived(text)) => {
                self.accept_parameter(kind, &text)
            }
        };
        self.updated_at = Utc::now();
        transition
    }

    /// Feeds the outcome of the submitted job back into the session.
    pub fn complete(&mut self, result: Result<JobOutput, GatewayError>) -> Transition {
        if self.state != SessionState::Processing {
            return Transition::Invalid(Vec::new());
        }
        self.updated_at = Utc::now();
        match result {
            Ok(output) => {
                self.state = SessionState::Terminal(Ending::Completed);
                Transition::Terminal(vec![
                    Effect::Deliver {
                        kind: self.kind,
                        parameter: self.parameter.clone(),
                        output,
                    },
                    Effect::Notify(Notice::Farewell),
                    Effect::Close,
                ])
            }
            Err(_) => self.fail(Vec::new()),
        }
    }

    /// Ends the session after an effect could not be carried out (e.g. staging failed).
    pub fn abort(&mut self) -> Transition {
        if self.is_terminal() {
            return Transition::Invalid(Vec::new());
        }
        self.updated_at = Utc::now();
        self.fail(Vec::new())
    }

    fn accept_file(&mut self, file: IncomingFile, limits: &Limits) -> Transition {
        let class = self.kind.input_class();
        let extension = match validate_file(&file, class, limits) {
            Ok(extension) => extension,
            Err(reason) => {
                return Transition::Invalid(vec![Effect::Notify(Notice::InvalidFile {
                    kind: self.kind,
                    reason,
                })]);
            }
        };

        if self.job_id.is_none() {
            self.job_id = Some(JobId::derive(self.chat_id, &file.unique_id));
        }
        let name = format!("input-{:03}.{}", self.inputs.len() + 1, extension);
        self.inputs.push(name.clone());

        let mut effects = vec![
            Effect::Stage { file, name },
            Effect::Notify(Notice::FileAccepted(class)),
        ];

        if self.kind.accumulates() {
            self.state = SessionState::AwaitingMoreOrDone;
            effects.push(Effect::Notify(Notice::MoreImagesOrDone {
                collected: self.inputs.len(),
            }));
            return Transition::Advance(effects);
        }

        match self.kind.parameter() {
            Some(kind) => {
                self.state = SessionState::AwaitingParameter(kind);
                effects.push(Effect::Notify(Notice::AskParameter(kind)));
                Transition::Advance(effects)
            }
            None => self.submit(effects),
        }
    }

    fn accept_parameter(&mut self, kind: ParameterKind, text: &str) -> Transition {
        match kind.parse(text) {
            Ok(parameter) => {
                self.parameter = Some(parameter);
                self.submit(Vec::new())
            }
            Err(_) => Transition::Invalid(vec![Effect::Notify(Notice::InvalidParameter(kind))]),
        }
    }

    fn submit(&mut self, mut effects: Vec<Effect>) -> Transition {
        let job_id = match self.job_id.clone() {
            Some(job_id) if !self.inputs.is_empty() => job_id,
            // Reaching processing without a staged input is reported as a failed job.
            _ => return self.fail(effects),
        };

        self.state = SessionState::Processing;
        let request = JobRequest {
            kind: self.kind,
            job_id,
            inputs: self.inputs.clone(),
            params: self
                .parameter
                .as_ref()
                .map(Parameter::to_params)
                .unwrap_or_default(),
        };
        effects.push(Effect::Notify(Notice::Working {
            kind: self.kind,
            parameter: self.parameter.clone(),
            inputs: self.inputs.len(),
        }));
        effects.push(Effect::Submit(request));
        Transition::Advance(effects)
    }

    fn cancel(&mut self) -> Transition {
        self.state = SessionState::Terminal(Ending::Cancelled);
        Transition::Terminal(vec![Effect::Notify(Notice::Cancelled), Effect::Close])
    }

    fn fail(&mut self, mut effects: Vec<Effect>) -> Transition {
        self.state = SessionState::Terminal(Ending::Failed);
        effects.push(Effect::Notify(Notice::Failed));
        effects.push(Effect::Notify(Notice::Farewell));
        effects.push(Effect::Close);
        Transition::Terminal(effects)
    }
}
