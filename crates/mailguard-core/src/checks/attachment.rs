//! Attachment scanning providers

use crate::checks::{CheckCategory, CheckError, CheckInput, CheckOutput, CheckProvider};
use async_trait::async_trait;
use mailguard_common::report::{AttachmentScanEntry, AttachmentStatus};
use mailguard_common::types::Attachment;

/// The EICAR anti-virus test string (first 44 bytes are enough to match)
const EICAR_MARKER: &[u8] = b"X5O!P%@AP[4\\PZX54(P^)7CC)7}$EICAR-STANDARD-ANTIVIRUS-TEST-FILE!$H+H*";

/// Extensions that execute directly on common desktop platforms
const EXECUTABLE_EXTENSIONS: &[&str] = &[
    "exe", "scr", "com", "bat", "cmd", "pif", "msi", "js", "jse", "vbs", "vbe", "wsf", "ps1",
    "jar", "hta",
];

/// Document extensions commonly spoofed in double-extension attacks
const DOCUMENT_EXTENSIONS: &[&str] = &[
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "txt", "jpg", "jpeg", "png", "gif",
];

/// Office formats that can carry macros
const MACRO_EXTENSIONS: &[&str] = &["docm", "xlsm", "pptm", "dotm", "xltm"];

/// Signature- and structure-based attachment heuristics: the EICAR test
/// marker, executable extensions, double-extension masquerading, macro
/// documents, and executable magic bytes. A stand-in for a real engine
/// (ClamAV, YARA), with the same result contract.
pub struct SignatureAttachmentProvider;

impl SignatureAttachmentProvider {
    fn scan_file(&self, file: &Attachment) -> AttachmentScanEntry {
        let name = file.filename.to_lowercase();
        let mut threats = Vec::new();
        let mut status = AttachmentStatus::Clean;

        if file
            .content
            .windows(EICAR_MARKER.len())
            .any(|w| w == EICAR_MARKER)
        {
            threats.push("eicar-test-signature".to_string());
            status = status.worst(AttachmentStatus::Malicious);
        }

        let extensions: Vec<&str> = name.split('.').skip(1).collect();
        let last_ext = extensions.last().copied().unwrap_or("");

        if EXECUTABLE_EXTENSIONS.contains(&last_ext) {
            // A document extension directly before an executable one is a
            // masquerading attempt, not just an unwanted binary
            let masquerading = extensions.len() >= 2
                && DOCUMENT_EXTENSIONS.contains(&extensions[extensions.len() - 2]);
            if masquerading {
                threats.push("masquerading-executable".to_string());
                status = status.worst(AttachmentStatus::Malicious);
            } else {
                threats.push("executable-extension".to_string());
                status = status.worst(AttachmentStatus::Suspicious);
            }
        }

        if MACRO_EXTENSIONS.contains(&last_ext) {
            threats.push("macro-document".to_string());
            status = status.worst(AttachmentStatus::Suspicious);
        }

        let is_pe = file.content.starts_with(b"MZ");
        let is_elf = file.content.starts_with(b"\x7fELF");
        if (is_pe || is_elf) && !EXECUTABLE_EXTENSIONS.contains(&last_ext) {
            threats.push("executable-content-mismatch".to_string());
            status = status.worst(AttachmentStatus::Malicious);
        } else if is_pe || is_elf {
            threats.push("executable-content".to_string());
            status = status.worst(AttachmentStatus::Suspicious);
        }

        AttachmentScanEntry {
            filename: file.filename.clone(),
            status,
            threats,
            detail: None,
        }
    }
}

#[async_trait]
impl CheckProvider for SignatureAttachmentProvider {
    fn name(&self) -> &str {
        "signature-attachment"
    }

    fn category(&self) -> CheckCategory {
        CheckCategory::AttachmentScan
    }

    async fn evaluate(&self, input: &CheckInput) -> Result<CheckOutput, CheckError> {
        let files = match input {
            CheckInput::Attachments { files } => files,
            _ => {
                return Err(CheckError::MalformedInput(
                    "attachment provider requires attachment input".to_string(),
                ))
            }
        };

        let entries = files.iter().map(|f| self.scan_file(f)).collect();
        Ok(CheckOutput::Attachments(entries))
    }
}

/// Fixed-result provider used in tests
pub struct StaticAttachmentProvider {
    status: AttachmentStatus,
    threats: Vec<String>,
}

impl StaticAttachmentProvider {
    pub fn new(status: AttachmentStatus, threats: Vec<String>) -> Self {
        Self { status, threats }
    }

    pub fn clean() -> Self {
        Self::new(AttachmentStatus::Clean, Vec::new())
    }
}

#[async_trait]
impl CheckProvider for StaticAttachmentProvider {
    fn name(&self) -> &str {
        "static-attachment"
    }

    fn category(&self) -> CheckCategory {
        CheckCategory::AttachmentScan
    }

    async fn evaluate(&self, input: &CheckInput) -> Result<CheckOutput, CheckError> {
        let files = match input {
            CheckInput::Attachments { files } => files,
            _ => {
                return Err(CheckError::MalformedInput(
                    "attachment provider requires attachment input".to_string(),
                ))
            }
        };

        Ok(CheckOutput::Attachments(
            files
                .iter()
                .map(|f| AttachmentScanEntry {
                    filename: f.filename.clone(),
                    status: self.status,
                    threats: self.threats.clone(),
                    detail: None,
                })
                .collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn file(name: &str, content: &[u8]) -> Attachment {
        Attachment {
            filename: name.to_string(),
            content_type: "application/octet-stream".to_string(),
            content: content.to_vec(),
        }
    }

    #[test]
    fn test_clean_document() {
        let provider = SignatureAttachmentProvider;
        let entry = provider.scan_file(&file("report.pdf", b"%PDF-1.7 ..."));
        assert_eq!(entry.status, AttachmentStatus::Clean);
        assert!(entry.threats.is_empty());
    }

    #[test]
    fn test_eicar_is_malicious() {
        let provider = SignatureAttachmentProvider;
        let mut content = b"some padding ".to_vec();
        content.extend_from_slice(EICAR_MARKER);
        let entry = provider.scan_file(&file("sample.txt", &content));
        assert_eq!(entry.status, AttachmentStatus::Malicious);
        assert!(entry.threats.contains(&"eicar-test-signature".to_string()));
    }

    #[test]
    fn test_double_extension_is_malicious() {
        let provider = SignatureAttachmentProvider;
        let entry = provider.scan_file(&file("invoice.pdf.exe", b"MZ\x90\x00"));
        assert_eq!(entry.status, AttachmentStatus::Malicious);
        assert!(entry
            .threats
            .contains(&"masquerading-executable".to_string()));
    }

    #[test]
    fn test_plain_executable_is_suspicious() {
        let provider = SignatureAttachmentProvider;
        let entry = provider.scan_file(&file("setup.exe", b"MZ\x90\x00"));
        assert_eq!(entry.status, AttachmentStatus::Suspicious);
    }

    #[test]
    fn test_pe_magic_with_document_name_is_malicious() {
        let provider = SignatureAttachmentProvider;
        let entry = provider.scan_file(&file("photo.png", b"MZ\x90\x00"));
        assert_eq!(entry.status, AttachmentStatus::Malicious);
        assert!(entry
            .threats
            .contains(&"executable-content-mismatch".to_string()));
    }

    #[test]
    fn test_macro_document_is_suspicious() {
        let provider = SignatureAttachmentProvider;
        let entry = provider.scan_file(&file("budget.xlsm", b"PK\x03\x04"));
        assert_eq!(entry.status, AttachmentStatus::Suspicious);
        assert!(entry.threats.contains(&"macro-document".to_string()));
    }
}
