//! crates/pdfbot_core/src/domain.rs
//!
//! Defines the pure, core data structures for the bot.
//! These types are independent of the chat platform and of the document-processing backend.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Identifier of a chat on the messaging platform.
pub type ChatId = i64;

//=========================================================================================
// Transforms
//=========================================================================================

/// One supported PDF operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransformKind {
    Compress,
    /// Converts one or more images and merges them into a single PDF.
    ImageToPdf,
    OfficeToPdf,
    AddPageNumbers,
    PdfToPdfA,
    PdfToJpg,
    Protect,
    Rotate,
    Split,
    Unlock,
    Watermark,
}

/// The class of file a transform accepts as input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputClass {
    Pdf,
    Image,
    Office,
}

impl InputClass {
    /// How the input is named in replies to the user.
    pub fn label(self) -> &'static str {
        match self {
            InputClass::Pdf => "PDF file",
            InputClass::Image => "image",
            InputClass::Office => "Office file",
        }
    }
}

/// The second, textual input some transforms need after the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterKind {
    Password,
    Angle,
    Range,
    WatermarkText,
}

/// Static description of a transform: one row of the transform table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformSpec {
    pub command: &'static str,
    pub input: InputClass,
    pub parameter: Option<ParameterKind>,
}

impl TransformKind {
    pub const ALL: [TransformKind; 11] = [
        TransformKind::Compress,
        TransformKind::ImageToPdf,
        TransformKind::OfficeToPdf,
        TransformKind::AddPageNumbers,
        TransformKind::PdfToPdfA,
        TransformKind::PdfToJpg,
        TransformKind::Protect,
        TransformKind::Rotate,
        TransformKind::Split,
        TransformKind::Unlock,
        TransformKind::Watermark,
    ];

    pub const fn spec(self) -> TransformSpec {
        use InputClass::*;
        let (command, input, parameter) = match self {
            TransformKind::Compress => ("compress", Pdf, None),
            TransformKind::ImageToPdf => ("imgtopdf", Image, None),
            TransformKind::OfficeToPdf => ("officetopdf", Office, None),
            TransformKind::AddPageNumbers => ("addpagenumbers", Pdf, None),
            TransformKind::PdfToPdfA => ("pdfa", Pdf, None),
            TransformKind::PdfToJpg => ("pdftojpg", Pdf, None),
            TransformKind::Protect => ("protectpdf", Pdf, Some(ParameterKind::Password)),
            TransformKind::Rotate => ("rotatepdf", Pdf, Some(ParameterKind::Angle)),
            TransformKind::Split => ("splitpdf", Pdf, Some(ParameterKind::Range)),
            TransformKind::Unlock => ("unlockpdf", Pdf, None),
            TransformKind::Watermark => ("watermark", Pdf, Some(ParameterKind::WatermarkText)),
        };
        TransformSpec {
            command,
            input,
            parameter,
        }
    }

    /// The chat command (without the leading slash) that starts this transform.
    pub fn command(self) -> &'static str {
        self.spec().command
    }

    pub fn input_class(self) -> InputClass {
        self.spec().input
    }

    pub fn parameter(self) -> Option<ParameterKind> {
        self.spec().parameter
    }

    /// Whether the transform keeps collecting files until the user says "done".
    pub fn accumulates(self) -> bool {
        matches!(self, TransformKind::ImageToPdf)
    }
}

impl fmt::Display for TransformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.command())
    }
}

//=========================================================================================
// Parameters
//=========================================================================================

/// Rotation angles the backend accepts from the bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Angle {
    Quarter,
    Half,
}

impl Angle {
    pub const ALLOWED: [Angle; 2] = [Angle::Quarter, Angle::Half];

    pub fn degrees(self) -> u16 {
        match self {
            Angle::Quarter => 90,
            Angle::Half => 180,
        }
    }

    pub fn from_degrees(degrees: u16) -> Option<Self> {
        Self::ALLOWED.into_iter().find(|a| a.degrees() == degrees)
    }
}

/// A validated second input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parameter {
    Password(String),
    Angle(Angle),
    /// Pages per output file when splitting.
    Range(u32),
    WatermarkText(String),
}

impl Parameter {
    pub fn kind(&self) -> ParameterKind {
        match self {
            Parameter::Password(_) => ParameterKind::Password,
            Parameter::Angle(_) => ParameterKind::Angle,
            Parameter::Range(_) => ParameterKind::Range,
            Parameter::WatermarkText(_) => ParameterKind::WatermarkText,
        }
    }

    /// The named transform option this parameter becomes in a job request.
    pub fn to_params(&self) -> Params {
        let (name, value) = match self {
            Parameter::Password(p) => ("password", ParamValue::Text(p.clone())),
            Parameter::Angle(a) => ("rotate", ParamValue::Int(i64::from(a.degrees()))),
            Parameter::Range(r) => ("fixed_range", ParamValue::Int(i64::from(*r))),
            Parameter::WatermarkText(t) => ("text", ParamValue::Text(t.clone())),
        };
        Params::from([(name.to_string(), value)])
    }
}

/// A single value in a job's option map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    Int(i64),
    Text(String),
}

/// Named transform options, ordered by name.
pub type Params = BTreeMap<String, ParamValue>;

//=========================================================================================
// Files and jobs
//=========================================================================================

/// How the platform delivered a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileSource {
    Document,
    /// A compressed photo; always an image.
    Photo,
}

/// Metadata of a file a user sent. The content stays on the platform until staged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingFile {
    /// Identifier used to download the file.
    pub file_id: String,
    /// Identifier that is stable across chats and bots for the same file.
    pub unique_id: String,
    pub source: FileSource,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
    pub size: u64,
}

/// Names the staging area of one job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobId(String);

impl JobId {
    /// Builds the id from the chat and the unique id of the first file of the job.
    /// A chat runs at most one job at a time, so two live jobs never share an id.
    pub fn derive(chat_id: ChatId, file_unique_id: &str) -> Self {
        let raw = format!("{}-{}", chat_id, file_unique_id);
        Self(
            raw.chars()
                .map(|c| {
                    if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                        c
                    } else {
                        '_'
                    }
                })
                .collect(),
        )
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything the conversion worker needs to run one transform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    pub kind: TransformKind,
    pub job_id: JobId,
    /// Staged input names, in the order the user sent them.
    pub inputs: Vec<String>,
    pub params: Params,
}

/// What a finished job produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutput {
    Single(PathBuf),
    /// Files expanded from a result archive, in page/chunk order.
    Batch(Vec<PathBuf>),
}

//=========================================================================================
// Sessions
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ending {
    Completed,
    Failed,
    Cancelled,
}

/// The step a conversation is at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    AwaitingFile,
    AwaitingParameter(ParameterKind),
    /// Image collection loop: more images, "done" or "cancel".
    AwaitingMoreOrDone,
    Processing,
    Terminal(Ending),
}

/// The conversation of one chat about one transform.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub chat_id: ChatId,
    pub kind: TransformKind,
    pub state: SessionState,
    pub inputs: Vec<String>,
    pub parameter: Option<Parameter>,
    pub job_id: Option<JobId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

//=========================================================================================
// Outbound messages
//=========================================================================================

/// Why a file was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    TooLarge,
    InvalidType,
}

/// Something the bot has to tell the user. Rendering into text is the presenter's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Prompt(TransformKind),
    FileAccepted(InputClass),
    InvalidFile { kind: TransformKind, reason: Rejection },
    /// Text arrived while a file was expected.
    ExpectedFile(TransformKind),
    AskParameter(ParameterKind),
    InvalidParameter(ParameterKind),
    /// A file arrived while a parameter was expected.
    ExpectedParameter(ParameterKind),
    MoreImagesOrDone { collected: usize },
    NeedImageFirst,
    NotUnderstood,
    Working {
        kind: TransformKind,
        parameter: Option<Parameter>,
        inputs: usize,
    },
    Busy,
    Cancelled,
    NothingToCancel,
    /// Input arrived outside of any conversation.
    Idle,
    Failed,
    Farewell,
}

/// Reply keyboard attached to a text message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Keyboard {
    /// Leave whatever keyboard the user currently has.
    Keep,
    /// Rows of fixed button labels.
    Choices(Vec<Vec<String>>),
    Remove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatAction {
    Typing,
    UploadDocument,
    UploadPhoto,
}

/// One message sent through the chat transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text {
        text: String,
        keyboard: Keyboard,
        /// Whether `text` carries rich-text markup.
        rich: bool,
    },
    Action(ChatAction),
    Document {
        path: PathBuf,
        caption: String,
    },
}
