//! services/bot/src/chat/commands.rs
//!
//! The Telegram side of the engine: the bot's command set, the mapping from
//! `teloxide` messages to `Inbound` events and the dispatcher endpoint.

use std::sync::Arc;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use teloxide::types::{Document, PhotoSize};
use teloxide::utils::command::BotCommands;
use tracing::debug;

use crate::chat::handler::{BotEngine, Inbound};
use crate::chat::reply::InfoPage;
use pdfbot_core::domain::{FileSource, IncomingFile, TransformKind};

/// The commands the bot answers to.
#[derive(BotCommands, Clone, Copy, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "These commands are supported:")]
pub enum Command {
    #[command(description = "compress a PDF file")]
    Compress,
    #[command(description = "convert one or more images to a PDF file")]
    ImgToPdf,
    #[command(description = "convert an office file to a PDF file")]
    OfficeToPdf,
    #[command(description = "add numbers to the pages of a PDF file")]
    AddPageNumbers,
    #[command(description = "convert a PDF file to PDF/A standard")]
    PdfA,
    #[command(description = "convert each page of a PDF file to jpg images")]
    PdfToJpg,
    #[command(description = "protect a PDF file using a password")]
    ProtectPdf,
    #[command(description = "rotate (90, 180 degrees) a PDF file")]
    RotatePdf,
    #[command(description = "split a PDF file according to a range")]
    SplitPdf,
    #[command(description = "unlock a protected PDF file")]
    UnlockPdf,
    #[command(description = "apply a watermark to a PDF file")]
    Watermark,
    #[command(description = "stop the current action")]
    Cancel,
    #[command(description = "start the bot")]
    Start,
    #[command(description = "show what I can do")]
    Help,
    #[command(description = "support the bot")]
    Donate,
}

impl Command {
    pub fn transform(self) -> Option<TransformKind> {
        match self {
            Command::Compress => Some(TransformKind::Compress),
            Command::ImgToPdf => Some(TransformKind::ImageToPdf),
            Command::OfficeToPdf => Some(TransformKind::OfficeToPdf),
            Command::AddPageNumbers => Some(TransformKind::AddPageNumbers),
            Command::PdfA => Some(TransformKind::PdfToPdfA),
            Command::PdfToJpg => Some(TransformKind::PdfToJpg),
            Command::ProtectPdf => Some(TransformKind::Protect),
            Command::RotatePdf => Some(TransformKind::Rotate),
            Command::SplitPdf => Some(TransformKind::Split),
            Command::UnlockPdf => Some(TransformKind::Unlock),
            Command::Watermark => Some(TransformKind::Watermark),
            Command::Cancel | Command::Start | Command::Help | Command::Donate => None,
        }
    }

    pub fn into_inbound(self) -> Inbound {
        match self {
            Command::Cancel => Inbound::Cancel,
            Command::Start => Inbound::Info(InfoPage::Start),
            Command::Help => Inbound::Info(InfoPage::Help),
            Command::Donate => Inbound::Info(InfoPage::Donate),
            other => match other.transform() {
                Some(kind) => Inbound::Begin(kind),
                None => Inbound::Info(InfoPage::Help),
            },
        }
    }
}

/// The bot's own username, needed to recognise `/command@botname`.
#[derive(Debug, Clone, Default)]
pub struct BotName(pub String);

//=========================================================================================
// Message Mapping
//=========================================================================================

/// Maps a message to an engine event. Unknown commands and unsupported
/// content yield `None`.
pub fn inbound(msg: &Message, bot_name: &str) -> Option<Inbound> {
    if let Some(text) = msg.text() {
        return text_inbound(text, bot_name);
    }
    if let Some(document) = msg.document() {
        return Some(Inbound::File(document_file(document)));
    }
    if let Some(sizes) = msg.photo() {
        return photo_file(sizes).map(Inbound::File);
    }
    None
}

fn text_inbound(text: &str, bot_name: &str) -> Option<Inbound> {
    if !text.starts_with('/') {
        return Some(Inbound::Text(text.to_string()));
    }
    // Arguments after a command are ignored.
    let head = text.split_whitespace().next().unwrap_or(text);
    match Command::parse(head, bot_name) {
        Ok(command) => Some(command.into_inbound()),
        Err(e) => {
            debug!("Ignoring unknown command {}: {}", head, e);
            None
        }
    }
}

fn document_file(document: &Document) -> IncomingFile {
    IncomingFile {
        file_id: document.file.id.clone(),
        unique_id: document.file.unique_id.clone(),
        source: FileSource::Document,
        file_name: document.file_name.clone(),
        mime_type: document.mime_type.as_ref().map(|m| m.to_string()),
        size: u64::from(document.file.size),
    }
}

/// Telegram sends every photo in several resolutions; the largest one is used.
fn photo_file(sizes: &[PhotoSize]) -> Option<IncomingFile> {
    let largest = sizes
        .iter()
        .max_by_key(|p| (u64::from(p.width) * u64::from(p.height), p.file.size))?;
    Some(IncomingFile {
        file_id: largest.file.id.clone(),
        unique_id: largest.file.unique_id.clone(),
        source: FileSource::Photo,
        file_name: None,
        mime_type: None,
        size: u64::from(largest.file.size),
    })
}

//=========================================================================================
// Dispatcher Endpoint
//=========================================================================================

async fn on_message(
    msg: Message,
    bot_name: BotName,
    engine: Arc<BotEngine>,
) -> ResponseResult<()> {
    match inbound(&msg, &bot_name.0) {
        Some(event) => engine.handle(msg.chat.id.0, event).await,
        None => debug!("Ignoring message {} in chat {}", msg.id, msg.chat.id),
    }
    Ok(())
}

/// The update handler tree: every message goes to the engine.
pub fn schema() -> UpdateHandler<teloxide::RequestError> {
    Update::filter_message().endpoint(on_message)
}
