//! crates/pdfbot_core/src/validation.rs
//!
//! Checks applied to user input before a conversation moves on: file class and size,
//! and the textual parameters of rotate, split, protect and watermark.

use crate::domain::{
    Angle, FileSource, IncomingFile, InputClass, Parameter, ParameterKind, Rejection,
};

/// Largest file the bot may download from the platform (the Bot API limit).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 20 * 1024 * 1024;

/// Office extensions the backend converts to PDF.
pub const OFFICE_EXTENSIONS: [&str; 9] = [
    "odt", "doc", "docx", "ods", "xls", "xlsx", "odp", "ppt", "pptx",
];

const OFFICE_MIME_TYPES: [(&str, &str); 9] = [
    ("application/vnd.oasis.opendocument.text", "odt"),
    ("application/msword", "doc"),
    (
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "docx",
    ),
    ("application/vnd.oasis.opendocument.spreadsheet", "ods"),
    ("application/vnd.ms-excel", "xls"),
    (
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "xlsx",
    ),
    ("application/vnd.oasis.opendocument.presentation", "odp"),
    ("application/vnd.ms-powerpoint", "ppt"),
    (
        "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "pptx",
    ),
];

/// Limits applied to incoming files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Files of this size or larger are rejected.
    pub max_file_size: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

/// A textual parameter that failed to parse.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParameterError {
    #[error("angle '{0}' is not allowed")]
    AngleNotAllowed(String),
    #[error("'{0}' is not a positive integer")]
    InvalidRange(String),
    #[error("empty text")]
    Empty,
}

/// Whether `text` is the given keyword, ignoring case and surrounding whitespace.
pub fn is_token(text: &str, token: &str) -> bool {
    text.trim().eq_ignore_ascii_case(token)
}

/// Validates a file against the class a transform expects.
///
/// On success returns the extension the staged copy should carry.
pub fn validate_file(
    file: &IncomingFile,
    class: InputClass,
    limits: &Limits,
) -> Result<String, Rejection> {
    if file.size >= limits.max_file_size {
        return Err(Rejection::TooLarge);
    }

    let mime = file.mime_type.as_deref().unwrap_or("").to_ascii_lowercase();
    let name_ext = file.file_name.as_deref().and_then(extension_of);

    match (class, file.source) {
        (InputClass::Image, FileSource::Photo) => Ok("jpg".to_string()),
        (_, FileSource::Photo) => Err(Rejection::InvalidType),
        (InputClass::Pdf, FileSource::Document) => {
            if mime.ends_with("pdf") || name_ext.as_deref() == Some("pdf") {
                Ok("pdf".to_string())
            } else {
                Err(Rejection::InvalidType)
            }
        }
        (InputClass::Image, FileSource::Document) => {
            let subtype = mime.strip_prefix("image/").ok_or(Rejection::InvalidType)?;
            let ext = match name_ext {
                Some(ext) => ext,
                None => match subtype {
                    "jpeg" => "jpg".to_string(),
                    other => sanitize(other),
                },
            };
            if ext.is_empty() {
                return Err(Rejection::InvalidType);
            }
            Ok(ext)
        }
        (InputClass::Office, FileSource::Document) => name_ext
            .filter(|ext| OFFICE_EXTENSIONS.contains(&ext.as_str()))
            .or_else(|| {
                OFFICE_MIME_TYPES
                    .iter()
                    .find(|(m, _)| *m == mime)
                    .map(|(_, ext)| ext.to_string())
            })
            .ok_or(Rejection::InvalidType),
    }
}

fn extension_of(name: &str) -> Option<String> {
    let (_, ext) = name.rsplit_once('.')?;
    let ext = sanitize(ext);
    (!ext.is_empty()).then_some(ext)
}

fn sanitize(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase()
}

impl ParameterKind {
    /// Parses the raw text a user sent into a validated parameter.
    pub fn parse(self, raw: &str) -> Result<Parameter, ParameterError> {
        let trimmed = raw.trim();
        match self {
            ParameterKind::Angle => trimmed
                .parse::<u16>()
                .ok()
                .and_then(Angle::from_degrees)
                .map(Parameter::Angle)
                .ok_or_else(|| ParameterError::AngleNotAllowed(trimmed.to_string())),
            ParameterKind::Range => match trimmed.parse::<u32>() {
                Ok(n) if n > 0 => Ok(Parameter::Range(n)),
                _ => Err(ParameterError::InvalidRange(trimmed.to_string())),
            },
            // The password is kept verbatim; only an all-blank one is refused.
            ParameterKind::Password if trimmed.is_empty() => Err(ParameterError::Empty),
            ParameterKind::Password => Ok(Parameter::Password(raw.to_string())),
            ParameterKind::WatermarkText if trimmed.is_empty() => Err(ParameterError::Empty),
            ParameterKind::WatermarkText => Ok(Parameter::WatermarkText(trimmed.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document(name: &str, mime: &str, size: u64) -> IncomingFile {
        IncomingFile {
            file_id: "file".into(),
            unique_id: "unique".into(),
            source: FileSource::Document,
            file_name: Some(name.into()),
            mime_type: Some(mime.into()),
            size,
        }
    }

    #[test]
    fn pdf_documents_are_accepted() {
        let file = document("report.PDF", "application/pdf", 1024);
        assert_eq!(
            validate_file(&file, InputClass::Pdf, &Limits::default()),
            Ok("pdf".to_string())
        );
    }

    #[test]
    fn size_limit_is_exclusive() {
        let limits = Limits { max_file_size: 100 };
        let file = document("a.pdf", "application/pdf", 100);
        assert_eq!(
            validate_file(&file, InputClass::Pdf, &limits),
            Err(Rejection::TooLarge)
        );
        let file = document("a.pdf", "application/pdf", 99);
        assert!(validate_file(&file, InputClass::Pdf, &limits).is_ok());
    }

    #[test]
    fn wrong_class_is_invalid_type() {
        let file = document("photo.png", "image/png", 10);
        assert_eq!(
            validate_file(&file, InputClass::Pdf, &Limits::default()),
            Err(Rejection::InvalidType)
        );
        let photo = IncomingFile {
            source: FileSource::Photo,
            file_name: None,
            mime_type: None,
            ..file
        };
        assert_eq!(
            validate_file(&photo, InputClass::Pdf, &Limits::default()),
            Err(Rejection::InvalidType)
        );
        assert_eq!(
            validate_file(&photo, InputClass::Image, &Limits::default()),
            Ok("jpg".to_string())
        );
    }

    #[test]
    fn image_documents_keep_their_extension() {
        let file = document("scan.png", "image/png", 10);
        assert_eq!(
            validate_file(&file, InputClass::Image, &Limits::default()),
            Ok("png".to_string())
        );
        let nameless = IncomingFile {
            file_name: None,
            ..document("", "image/jpeg", 10)
        };
        assert_eq!(
            validate_file(&nameless, InputClass::Image, &Limits::default()),
            Ok("jpg".to_string())
        );
    }

    #[test]
    fn office_files_by_extension_or_mime() {
        let file = document("sheet.xlsx", "application/octet-stream", 10);
        assert_eq!(
            validate_file(&file, InputClass::Office, &Limits::default()),
            Ok("xlsx".to_string())
        );
        let file = IncomingFile {
            file_name: None,
            ..document("", "application/vnd.oasis.opendocument.text", 10)
        };
        assert_eq!(
            validate_file(&file, InputClass::Office, &Limits::default()),
            Ok("odt".to_string())
        );
        let file = document("notes.txt", "text/plain", 10);
        assert_eq!(
            validate_file(&file, InputClass::Office, &Limits::default()),
            Err(Rejection::InvalidType)
        );
    }

    #[test]
    fn angles_outside_the_allowed_set_are_refused() {
        assert_eq!(
            ParameterKind::Angle.parse("90"),
            Ok(Parameter::Angle(Angle::Quarter))
        );
        assert_eq!(
            ParameterKind::Angle.parse(" 180 "),
            Ok(Parameter::Angle(Angle::Half))
        );
        for bad in ["270", "45", "-90", "ninety", ""] {
            assert!(ParameterKind::Angle.parse(bad).is_err(), "{bad} accepted");
        }
    }

    #[test]
    fn ranges_must_be_positive_integers() {
        assert_eq!(ParameterKind::Range.parse("2"), Ok(Parameter::Range(2)));
        for bad in ["0", "-1", "1.5", "two", ""] {
            assert_eq!(
                ParameterKind::Range.parse(bad),
                Err(ParameterError::InvalidRange(bad.to_string()))
            );
        }
    }

    #[test]
    fn text_parameters_must_not_be_blank() {
        assert_eq!(ParameterKind::Password.parse("   "), Err(ParameterError::Empty));
        assert_eq!(
            ParameterKind::Password.parse(" s3cret "),
            Ok(Parameter::Password(" s3cret ".to_string()))
        );
        assert_eq!(
            ParameterKind::WatermarkText.parse("  DRAFT "),
            Ok(Parameter::WatermarkText("DRAFT".to_string()))
        );
        assert_eq!(ParameterKind::WatermarkText.parse(""), Err(ParameterError::Empty));
    }

    #[test]
    fn tokens_ignore_case_and_padding() {
        assert!(is_token(" Cancel ", "cancel"));
        assert!(is_token("DONE", "done"));
        assert!(!is_token("cancel please", "cancel"));
    }
}
