//! Upload validation: size, extension, declared MIME type and magic numbers.
//!
//! Every check runs before anything is persisted and short-circuits on the
//! first failure, in this order:
//!
//! 1. presence
//! 2. size ceiling
//! 3. extension allow-list
//! 4. MIME presence
//! 5. MIME allow-list
//! 6. extension ↔ MIME consistency
//! 7. binary signature of the first bytes
//!
//! The client-declared MIME type is never trusted on its own; the signature
//! table is the last word on what the content actually is.

use crate::models::upload::UploadedFile;
use std::io::{Cursor, Read};
use thiserror::Error;
use tracing::warn;

/// Default size ceiling (10 MiB).
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Number of leading bytes inspected by the signature check.
const SIGNATURE_PREFIX_LEN: u64 = 8;

const ALLOWED_EXTENSIONS: [&str; 6] = ["pdf", "jpg", "jpeg", "png", "doc", "docx"];

const MIME_PDF: &str = "application/pdf";
const MIME_DOC: &str = "application/msword";
const MIME_DOCX: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

const ALLOWED_MIME_TYPES: [&str; 6] = [
    MIME_PDF,
    "image/jpeg",
    "image/jpg",
    "image/png",
    MIME_DOC,
    MIME_DOCX,
];

/// MIME types legitimately associated with an allowed extension.
fn mime_types_for(extension: &str) -> &'static [&'static str] {
    match extension {
        "pdf" => &[MIME_PDF],
        "jpg" | "jpeg" => &["image/jpeg", "image/jpg"],
        "png" => &["image/png"],
        "doc" => &[MIME_DOC],
        "docx" => &[MIME_DOCX],
        _ => &[],
    }
}

/// Magic-number prefixes per extension. An empty slice means the extension
/// has no configured signature and passes the check trivially.
fn signatures_for(extension: &str) -> &'static [&'static [u8]] {
    match extension {
        "pdf" => &[b"%PDF"],
        "jpg" | "jpeg" => &[&[0xFF, 0xD8, 0xFF]],
        "png" => &[&[0x89, 0x50, 0x4E, 0x47]],
        "doc" => &[&[0xD0, 0xCF, 0x11, 0xE0]],
        // DOCX is a ZIP container
        "docx" => &[&[0x50, 0x4B, 0x03, 0x04]],
        _ => &[],
    }
}

/// Reasons an upload is rejected before it reaches storage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("no file was provided")]
    EmptyInput,
    #[error("file is too large ({size} bytes, maximum is {max} bytes)")]
    TooLarge { size: usize, max: usize },
    #[error("file extension `{extension}` is not allowed")]
    DisallowedExtension { extension: String },
    #[error("file type was not declared")]
    MissingMimeType,
    #[error("file type `{mime}` is not allowed")]
    DisallowedMimeType { mime: String },
    #[error("file type `{mime}` does not match extension `{extension}`")]
    MimeExtensionMismatch { extension: String, mime: String },
    #[error("file content does not match the signature of a `{extension}` file")]
    SignatureMismatch { extension: String },
    #[error("file signature could not be read: {0}")]
    SignatureUnreadable(String),
    #[error("image could not be decoded: {0}")]
    UndecodableImage(String),
    #[error("invalid entity id `{0}`")]
    InvalidEntityId(String),
}

/// Result of validating one file. Terminal: never mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationOutcome {
    error: Option<ValidationError>,
}

impl ValidationOutcome {
    pub fn valid() -> Self {
        Self { error: None }
    }

    pub fn invalid(error: ValidationError) -> Self {
        Self { error: Some(error) }
    }

    pub fn is_valid(&self) -> bool {
        self.error.is_none()
    }

    pub fn error(&self) -> Option<&ValidationError> {
        self.error.as_ref()
    }

    pub fn failure_reason(&self) -> Option<String> {
        self.error.as_ref().map(ToString::to_string)
    }

    pub fn into_result(self) -> Result<(), ValidationError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Tunables for [`Validator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationPolicy {
    pub max_bytes: usize,
    /// When reading the signature prefix fails, accept the file instead of
    /// rejecting it.
    pub signature_io_fail_open: bool,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            max_bytes: MAX_UPLOAD_BYTES,
            signature_io_fail_open: true,
        }
    }
}

/// Stateless upload validator. Pure function of file content and metadata.
#[derive(Debug, Clone, Default)]
pub struct Validator {
    policy: ValidationPolicy,
}

impl Validator {
    pub fn new(policy: ValidationPolicy) -> Self {
        Self { policy }
    }

    /// Run every check against `file`, stopping at the first failure.
    pub fn validate(&self, file: Option<&UploadedFile>) -> ValidationOutcome {
        match self.check(file) {
            Ok(()) => ValidationOutcome::valid(),
            Err(err) => ValidationOutcome::invalid(err),
        }
    }

    fn check(&self, file: Option<&UploadedFile>) -> Result<(), ValidationError> {
        let file = match file {
            Some(file) if !file.data.is_empty() => file,
            _ => return Err(ValidationError::EmptyInput),
        };

        if file.data.len() > self.policy.max_bytes {
            return Err(ValidationError::TooLarge {
                size: file.data.len(),
                max: self.policy.max_bytes,
            });
        }

        let extension = file.extension().unwrap_or_default();
        if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
            return Err(ValidationError::DisallowedExtension { extension });
        }

        let mime = file.essence_mime().ok_or(ValidationError::MissingMimeType)?;
        if !ALLOWED_MIME_TYPES.contains(&mime.as_str()) {
            return Err(ValidationError::DisallowedMimeType { mime });
        }

        if !mime_types_for(&extension).contains(&mime.as_str()) {
            return Err(ValidationError::MimeExtensionMismatch { extension, mime });
        }

        self.check_signature(&extension, Cursor::new(&file.data))
    }

    /// Compare the first bytes produced by `reader` against the signatures
    /// configured for `extension`.
    ///
    /// A read error is treated according to
    /// [`ValidationPolicy::signature_io_fail_open`].
    pub fn check_signature<R: Read>(
        &self,
        extension: &str,
        reader: R,
    ) -> Result<(), ValidationError> {
        let signatures = signatures_for(extension);
        if signatures.is_empty() {
            return Ok(());
        }

        let mut prefix = Vec::with_capacity(SIGNATURE_PREFIX_LEN as usize);
        if let Err(err) = reader.take(SIGNATURE_PREFIX_LEN).read_to_end(&mut prefix) {
            if self.policy.signature_io_fail_open {
                warn!(extension, error = %err, "signature unreadable, accepting file (fail-open)");
                return Ok(());
            }
            return Err(ValidationError::SignatureUnreadable(err.to_string()));
        }

        if signatures.iter().any(|sig| prefix.starts_with(sig)) {
            Ok(())
        } else {
            Err(ValidationError::SignatureMismatch {
                extension: extension.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::io;

    fn pdf(data: &[u8]) -> UploadedFile {
        UploadedFile::new("report.pdf", "application/pdf", data.to_vec())
    }

    fn reject(file: &UploadedFile) -> ValidationError {
        Validator::default()
            .validate(Some(file))
            .into_result()
            .unwrap_err()
    }

    struct BrokenReader;

    impl Read for BrokenReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::other("device unplugged"))
        }
    }

    #[test]
    fn accepts_pdf_with_signature() {
        let outcome = Validator::default().validate(Some(&pdf(b"%PDF-1.7 body")));
        assert!(outcome.is_valid());
        assert_eq!(outcome.failure_reason(), None);
    }

    #[test]
    fn rejects_missing_or_empty_file() {
        let validator = Validator::default();
        assert_eq!(
            validator.validate(None).error(),
            Some(&ValidationError::EmptyInput)
        );
        assert_eq!(reject(&pdf(b"")), ValidationError::EmptyInput);
    }

    #[test]
    fn rejects_oversized_file_regardless_of_content() {
        let validator = Validator::new(ValidationPolicy {
            max_bytes: 16,
            ..ValidationPolicy::default()
        });
        for body in [vec![b'%'; 17], b"%PDF-1.4 and a lot more".to_vec()] {
            let outcome = validator.validate(Some(&pdf(&body)));
            assert!(matches!(
                outcome.error(),
                Some(ValidationError::TooLarge { max: 16, .. })
            ));
            assert!(outcome.failure_reason().unwrap().contains("too large"));
        }
    }

    #[test]
    fn default_limit_is_inclusive() {
        let mut body = b"%PDF-1.4\n".to_vec();
        body.resize(MAX_UPLOAD_BYTES, b' ');
        let at_limit = pdf(&body);
        assert!(Validator::default().validate(Some(&at_limit)).is_valid());

        body.push(b' ');
        assert_eq!(
            reject(&pdf(&body)),
            ValidationError::TooLarge {
                size: MAX_UPLOAD_BYTES + 1,
                max: MAX_UPLOAD_BYTES,
            }
        );
    }

    #[test]
    fn rejects_disallowed_extension_before_signature() {
        // an .exe carrying a valid PDF signature still fails on the extension
        let file = UploadedFile::new("setup.exe", "application/pdf", b"%PDF-1.4".to_vec());
        assert_eq!(
            reject(&file),
            ValidationError::DisallowedExtension {
                extension: "exe".into()
            }
        );

        let no_ext = UploadedFile::new("README", "application/pdf", b"%PDF".to_vec());
        assert!(matches!(
            reject(&no_ext),
            ValidationError::DisallowedExtension { .. }
        ));
    }

    #[test]
    fn rejects_missing_and_disallowed_mime() {
        let missing = UploadedFile {
            file_name: "a.pdf".into(),
            mime_type: None,
            data: Bytes::from_static(b"%PDF"),
        };
        assert_eq!(reject(&missing), ValidationError::MissingMimeType);

        let html = UploadedFile::new("a.pdf", "text/html", b"%PDF".to_vec());
        assert_eq!(
            reject(&html),
            ValidationError::DisallowedMimeType {
                mime: "text/html".into()
            }
        );
    }

    #[test]
    fn rejects_mime_extension_mismatch() {
        let file = UploadedFile::new("photo.jpg", "image/png", vec![0x89, 0x50, 0x4E, 0x47]);
        assert_eq!(
            reject(&file),
            ValidationError::MimeExtensionMismatch {
                extension: "jpg".into(),
                mime: "image/png".into()
            }
        );

        let legacy_alias = UploadedFile::new("photo.JPG", "image/jpg", vec![0xFF, 0xD8, 0xFF, 0xE0]);
        assert!(Validator::default().validate(Some(&legacy_alias)).is_valid());
    }

    #[test]
    fn rejects_signature_mismatch() {
        let outcome = Validator::default().validate(Some(&pdf(&[0, 0, 0, 0])));
        assert_eq!(
            outcome.error(),
            Some(&ValidationError::SignatureMismatch {
                extension: "pdf".into()
            })
        );
        assert!(outcome.failure_reason().unwrap().contains("signature"));
    }

    #[test]
    fn accepts_each_configured_signature() {
        let cases: [(&str, &str, &[u8]); 4] = [
            ("scan.png", "image/png", &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A]),
            ("scan.jpeg", "image/jpeg", &[0xFF, 0xD8, 0xFF, 0xDB]),
            ("old.doc", MIME_DOC, &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1]),
            ("new.docx", MIME_DOCX, &[0x50, 0x4B, 0x03, 0x04, 0x14, 0x00]),
        ];
        for (name, mime, data) in cases {
            let file = UploadedFile::new(name, mime, data.to_vec());
            let outcome = Validator::default().validate(Some(&file));
            assert!(outcome.is_valid(), "{name}: {:?}", outcome.failure_reason());
        }
    }

    #[test]
    fn signature_read_error_fails_open_by_default() {
        assert!(Validator::default().check_signature("pdf", BrokenReader).is_ok());
    }

    #[test]
    fn signature_read_error_fails_closed_when_configured() {
        let strict = Validator::new(ValidationPolicy {
            signature_io_fail_open: false,
            ..ValidationPolicy::default()
        });
        assert!(matches!(
            strict.check_signature("pdf", BrokenReader),
            Err(ValidationError::SignatureUnreadable(_))
        ));
    }

    #[test]
    fn extension_without_signature_passes_trivially() {
        assert!(Validator::default().check_signature("txt", BrokenReader).is_ok());
    }
}
