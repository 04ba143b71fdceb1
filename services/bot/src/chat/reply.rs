//! services/bot/src/chat/reply.rs
//!
//! Turns notices and job results into the messages the user sees.
//! Rich text is HTML; anything the user typed is escaped before it is echoed back.

use std::path::Path;
use teloxide::utils::html;

use pdfbot_core::domain::{
    Angle, ChatAction, InputClass, JobOutput, Keyboard, Notice, Parameter, ParameterKind,
    Rejection, Reply, TransformKind,
};
use pdfbot_core::validation::OFFICE_EXTENSIONS;

pub const CANCEL: &str = "Cancel";
pub const DONE: &str = "Done";

pub const DONATE_URL: &str = "https://www.paypal.com/donate?hosted_button_id=N374LBS72AAMA";

/// Pages answered without a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoPage {
    Start,
    Help,
    Donate,
}

fn text(body: impl Into<String>, keyboard: Keyboard) -> Reply {
    Reply::Text {
        text: body.into(),
        keyboard,
        rich: false,
    }
}

fn rich(body: impl Into<String>, keyboard: Keyboard) -> Reply {
    Reply::Text {
        text: body.into(),
        keyboard,
        rich: true,
    }
}

fn cancel_keyboard() -> Keyboard {
    Keyboard::Choices(vec![vec![CANCEL.to_string()]])
}

fn done_keyboard() -> Keyboard {
    Keyboard::Choices(vec![vec![DONE.to_string(), CANCEL.to_string()]])
}

fn with_article(class: InputClass) -> String {
    match class {
        InputClass::Image | InputClass::Office => format!("an {}", class.label()),
        InputClass::Pdf => format!("a {}", class.label()),
    }
}

fn allowed_angles() -> String {
    Angle::ALLOWED
        .iter()
        .map(|a| a.degrees().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

const MORE_IMAGES: &str =
    "Send me the word <b>'done'</b> if you want the PDF file, or send me more images 🖼";

pub struct Presenter;

impl Presenter {
    /// Renders one notice. Every notice becomes at least one reply.
    pub fn notice(notice: &Notice) -> Vec<Reply> {
        match notice {
            Notice::Prompt(kind) => vec![rich(Self::prompt(*kind), cancel_keyboard())],
            Notice::FileAccepted(class) => vec![text(
                format!("I received your {} correctly 😄", class.label()),
                Keyboard::Keep,
            )],
            Notice::InvalidFile { kind, reason } => {
                let label = kind.input_class().label();
                let body = match reason {
                    Rejection::TooLarge => {
                        format!("The {} you sent is too large 😔, try again", label)
                    }
                    Rejection::InvalidType => {
                        format!("What you sent is not a valid {} 😔, try again", label)
                    }
                };
                let keyboard = if kind.accumulates() {
                    done_keyboard()
                } else {
                    cancel_keyboard()
                };
                vec![text(body, keyboard)]
            }
            Notice::ExpectedFile(kind) => vec![text(
                format!(
                    "That is not {} 😔, try again.",
                    with_article(kind.input_class())
                ),
                cancel_keyboard(),
            )],
            Notice::AskParameter(kind) => vec![rich(Self::ask(*kind), cancel_keyboard())],
            Notice::InvalidParameter(kind) => {
                vec![rich(Self::invalid_parameter(*kind), cancel_keyboard())]
            }
            Notice::ExpectedParameter(kind) => vec![text(
                format!(
                    "I already have your file, now I need the {} as a text message 😔, try again.",
                    Self::parameter_name(*kind)
                ),
                cancel_keyboard(),
            )],
            Notice::MoreImagesOrDone { collected } => vec![rich(
                format!(
                    "You have sent me {} image{} so far. {}",
                    collected,
                    if *collected == 1 { "" } else { "s" },
                    MORE_IMAGES
                ),
                done_keyboard(),
            )],
            Notice::NeedImageFirst => vec![text(
                "I still need at least one image 🖼, send me one, please",
                cancel_keyboard(),
            )],
            Notice::NotUnderstood => vec![rich(
                format!("I can't understand you 😔, sorry, try again. {}", MORE_IMAGES),
                done_keyboard(),
            )],
            Notice::Working {
                kind,
                parameter,
                inputs,
            } => vec![
                Reply::Action(ChatAction::Typing),
                rich(
                    Self::working(*kind, parameter.as_ref(), *inputs),
                    Keyboard::Remove,
                ),
            ],
            Notice::Busy => vec![text(
                "I'm still working on your previous request ⏳, please wait a moment",
                Keyboard::Keep,
            )],
            Notice::Cancelled => vec![text("🚫 Action cancelled", Keyboard::Remove)],
            Notice::NothingToCancel => vec![text(
                "There is nothing to cancel. Please, use /help to know what can I do for you",
                Keyboard::Remove,
            )],
            Notice::Idle => vec![text(
                "Please, use /help to know what can I do for you",
                Keyboard::Keep,
            )],
            Notice::Failed => vec![text("An error occured 😔, sorry.", Keyboard::Remove)],
            Notice::Farewell => vec![text("Thank you, see you soon! 👋", Keyboard::Remove)],
        }
    }

    fn prompt(kind: TransformKind) -> String {
        match kind {
            TransformKind::Compress => {
                "📄 Send me the PDF file you want to compress, please".to_string()
            }
            TransformKind::ImageToPdf => "🖼 Send me an image file you want to convert, please. \
                 <b>(I strongly recommend you DO NOT compress it.)</b>"
                .to_string(),
            TransformKind::OfficeToPdf => format!(
                "📄 Send me an office file you want to convert, please. Extensions allowed are: {}",
                OFFICE_EXTENSIONS.join(", ")
            ),
            TransformKind::AddPageNumbers => {
                "📄 Send me the PDF file you want to add page numbers, please".to_string()
            }
            TransformKind::PdfToPdfA => {
                "📄 Send me the PDF file you want to convert to PDF/A, please".to_string()
            }
            TransformKind::PdfToJpg => {
                "📄 Send me the PDF file you want to convert into jpg images, please".to_string()
            }
            TransformKind::Protect => {
                "📄 Send me the PDF file you want to protect, please".to_string()
            }
            TransformKind::Rotate => {
                "📄 Send me the PDF file you want to rotate, please".to_string()
            }
            TransformKind::Split => "📄 Send me the PDF file you want to split, please".to_string(),
            TransformKind::Unlock => {
                "📄 Send me the PDF file you want to unlock, please".to_string()
            }
            TransformKind::Watermark => {
                "📄 Send me the PDF file you want to apply a watermark, please".to_string()
            }
        }
    }

    fn ask(kind: ParameterKind) -> String {
        match kind {
            ParameterKind::Password => {
                "Send me the password to protect the PDF file, please 🔑".to_string()
            }
            ParameterKind::Angle => format!(
                "Send me the rotation angle you want, please ↩️. <b>Allowed angles are: {}.</b>",
                allowed_angles()
            ),
            ParameterKind::Range => "Send me the range you want to split the file, please ✂️. \
                 (e.g. 2 for split 2 pages per file)"
                .to_string(),
            ParameterKind::WatermarkText => {
                "Send me the text you want to apply in the file, please 💧".to_string()
            }
        }
    }

    fn invalid_parameter(kind: ParameterKind) -> String {
        match kind {
            ParameterKind::Angle => format!(
                "This angle is not allowed 😔, <b>allowed angles are: {}</b>, try again.",
                allowed_angles()
            ),
            ParameterKind::Range => "This range is not valid 😔, it must be a positive integer \
                 number, try again."
                .to_string(),
            ParameterKind::Password => "You didn't send me a password 😔, try again.".to_string(),
            ParameterKind::WatermarkText => "You didn't send me a text 😔, try again.".to_string(),
        }
    }

    fn parameter_name(kind: ParameterKind) -> &'static str {
        match kind {
            ParameterKind::Password => "password",
            ParameterKind::Angle => "rotation angle",
            ParameterKind::Range => "range",
            ParameterKind::WatermarkText => "watermark text",
        }
    }

    fn working(kind: TransformKind, parameter: Option<&Parameter>, inputs: usize) -> String {
        const WAIT: &str = "please wait a moment while";
        match (kind, parameter) {
            (TransformKind::Compress, _) => format!("{} I compress it for you...", WAIT),
            (TransformKind::ImageToPdf, _) => format!(
                "I received {} image{}, {} I convert them for you...",
                inputs,
                if inputs == 1 { "" } else { "s" },
                WAIT
            ),
            (TransformKind::OfficeToPdf, _) => format!("{} I convert it for you...", WAIT),
            (TransformKind::AddPageNumbers, _) => {
                format!("{} I add page numbers to it for you...", WAIT)
            }
            (TransformKind::PdfToPdfA, _) => {
                format!("{} I convert it to PDF/A ISO standard for you...", WAIT)
            }
            (TransformKind::PdfToJpg, _) => format!("{} I convert it to jpg for you...", WAIT),
            (TransformKind::Protect, _) => {
                format!("I received the password, {} I protect the file for you...", WAIT)
            }
            (TransformKind::Rotate, Some(Parameter::Angle(angle))) => format!(
                "I received the angle, {} I rotate the file {} degrees for you...",
                WAIT,
                angle.degrees()
            ),
            (TransformKind::Split, Some(Parameter::Range(range))) => format!(
                "I received the range, {} I split the file {} pages per file for you...",
                WAIT, range
            ),
            (TransformKind::Watermark, Some(Parameter::WatermarkText(mark))) => format!(
                "I received the text, {} I apply '{}' as a watermark for you...",
                WAIT,
                html::escape(mark)
            ),
            (TransformKind::Unlock, _) => format!("{} I unlock it for you...", WAIT),
            (_, _) => format!("{} I work on it for you...", WAIT),
        }
    }

    /// Renders a finished job: the file (or files) and, for batches, a closing summary.
    pub fn delivery(
        kind: TransformKind,
        parameter: Option<&Parameter>,
        output: &JobOutput,
    ) -> Vec<Reply> {
        match output {
            JobOutput::Single(path) => vec![
                Reply::Action(upload_action(path)),
                Reply::Document {
                    path: path.clone(),
                    caption: Self::caption(kind, parameter),
                },
            ],
            JobOutput::Batch(paths) => {
                let mut replies = Vec::with_capacity(paths.len() * 2 + 1);
                for (index, path) in paths.iter().enumerate() {
                    let caption = if kind == TransformKind::PdfToJpg {
                        format!("🖼 page {} of your PDF file", index + 1)
                    } else {
                        format!("📄 {} range of your PDF file", index + 1)
                    };
                    replies.push(Reply::Action(upload_action(path)));
                    replies.push(Reply::Document {
                        path: path.clone(),
                        caption,
                    });
                }
                let summary = if kind == TransformKind::PdfToJpg {
                    "✨ Here are your jpg images"
                } else {
                    "✨ Here are your PDF files"
                };
                replies.push(text(summary, Keyboard::Keep));
                replies
            }
        }
    }

    fn caption(kind: TransformKind, parameter: Option<&Parameter>) -> String {
        match (kind, parameter) {
            (TransformKind::Compress, _) => "✨ Here is your compressed file".to_string(),
            (TransformKind::ImageToPdf, _) | (TransformKind::OfficeToPdf, _) => {
                "✨ Here is your PDF file".to_string()
            }
            (TransformKind::AddPageNumbers, _) => {
                "✨ Here is your PDF file with page numbers".to_string()
            }
            (TransformKind::PdfToPdfA, _) => "✨ Here is your PDF/A file".to_string(),
            (TransformKind::PdfToJpg, _) => "🖼 page 1 of your PDF file".to_string(),
            (TransformKind::Protect, _) => "✨ Here is your protected PDF file".to_string(),
            (TransformKind::Rotate, Some(Parameter::Angle(angle))) => {
                format!("✨ Here is your {} rotated PDF file", angle.degrees())
            }
            (TransformKind::Rotate, _) => "✨ Here is your rotated PDF file".to_string(),
            (TransformKind::Split, _) => {
                "The range you sent me generated just one PDF file.".to_string()
            }
            (TransformKind::Unlock, _) => "✨ Here is your unlocked file".to_string(),
            (TransformKind::Watermark, _) => "✨ Here is your marked file".to_string(),
        }
    }

    pub fn info(page: InfoPage) -> Vec<Reply> {
        match page {
            InfoPage::Start => vec![
                text("I ♥ pdf, and you?", Keyboard::Keep),
                text("Please, use /help to know what can I do for you", Keyboard::Keep),
            ],
            InfoPage::Help => {
                let mut lines: Vec<String> = TransformKind::ALL
                    .into_iter()
                    .map(|kind| {
                        format!("{} /{} to {}", help_icon(kind), kind.command(), help_text(kind))
                    })
                    .collect();
                lines.push("🚫 /cancel to stop the current action".to_string());
                lines.push("❤️ /donate".to_string());
                vec![
                    text("Please feel free to use my commands:", Keyboard::Keep),
                    text(lines.join("\n"), Keyboard::Keep),
                ]
            }
            InfoPage::Donate => vec![
                text("Is ilovepdfbot useful you?", Keyboard::Keep),
                text("Would you like to donate my mother a coffee? ♥", Keyboard::Keep),
                text(format!("Please go to: {}", DONATE_URL), Keyboard::Keep),
            ],
        }
    }
}

fn upload_action(path: &Path) -> ChatAction {
    let is_image = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| matches!(e.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png"))
        .unwrap_or(false);
    if is_image {
        ChatAction::UploadPhoto
    } else {
        ChatAction::UploadDocument
    }
}

fn help_icon(kind: TransformKind) -> &'static str {
    match kind {
        TransformKind::Compress => "🗄",
        TransformKind::ImageToPdf => "🖼 -> 📄",
        TransformKind::OfficeToPdf => "📝 -> 📄",
        TransformKind::AddPageNumbers => "1️⃣2️⃣3️⃣",
        TransformKind::PdfToPdfA => "📐",
        TransformKind::PdfToJpg => "📄 -> 🖼",
        TransformKind::Protect | TransformKind::Unlock => "🔑",
        TransformKind::Rotate => "↩️",
        TransformKind::Split => "✂️",
        TransformKind::Watermark => "💧",
    }
}

/// Short description of a transform. The descriptions on `Command` repeat these.
pub fn help_text(kind: TransformKind) -> &'static str {
    match kind {
        TransformKind::Compress => "compress a PDF file",
        TransformKind::ImageToPdf => "convert one or more images to a PDF file",
        TransformKind::OfficeToPdf => "convert an office file to a PDF file",
        TransformKind::AddPageNumbers => "add numbers to the pages of a PDF file",
        TransformKind::PdfToPdfA => "convert a PDF file to PDF/A standard",
        TransformKind::PdfToJpg => "convert each page of a PDF file to jpg images",
        TransformKind::Protect => "protect a PDF file using a password",
        TransformKind::Rotate => "rotate (90, 180 degrees) a PDF file",
        TransformKind::Split => "split a PDF file according to a range",
        TransformKind::Unlock => "unlock a protected PDF file",
        TransformKind::Watermark => "apply a watermark to a PDF file",
    }
}
