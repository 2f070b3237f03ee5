//! Document text extraction for uploaded files.
//!
//! Uploaded files live in object storage (or behind a plain URL). Text is always extracted
//! locally before the completion service sees it.

use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use bytes::Bytes;
use reqwest::Client;
use tracing::debug;

use crate::background::sources::SourceError;

const TEXT_EXTENSIONS: &[&str] = &["txt", "text", "md", "markdown", "csv", "json", "rst", "tex"];

#[async_trait]
pub trait DocumentTextExtractor: Send + Sync {
    /// Resolves a file reference to its plain text.
    async fn extract_text(&self, reference: &str) -> Result<String, SourceError>;
}

/// Where a document reference points.
#[derive(Debug, PartialEq, Eq)]
enum DocumentLocation<'a> {
    Object { bucket: &'a str, key: &'a str },
    Url(&'a str),
}

fn locate<'a>(reference: &'a str, default_bucket: &'a str) -> DocumentLocation<'a> {
    let reference = reference.trim();
    if let Some(rest) = reference.strip_prefix("s3://") {
        if let Some((bucket, key)) = rest.split_once('/') {
            return DocumentLocation::Object { bucket, key };
        }
    }
    if reference.starts_with("http://") || reference.starts_with("https://") {
        return DocumentLocation::Url(reference);
    }
    DocumentLocation::Object {
        bucket: default_bucket,
        key: reference.trim_start_matches('/'),
    }
}

/// Display name of a document reference: its file name without query string.
pub fn document_label(reference: &str) -> String {
    let path = reference
        .trim()
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .trim_end_matches('/');
    match path.rsplit('/').next() {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => reference.trim().to_string(),
    }
}

fn extension_of(reference: &str) -> Option<String> {
    let name = document_label(reference);
    name.rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
}

/// Object-storage / HTTP backed extractor. PDFs go through `pdf-extract`, text formats are decoded as UTF-8.
pub struct StorageDocumentExtractor {
    s3: aws_sdk_s3::Client,
    bucket: String,
    http: Client,
}

impl StorageDocumentExtractor {
    pub fn new(s3: aws_sdk_s3::Client, bucket: String) -> Self {
        Self {
            s3,
            bucket,
            http: Client::builder()
                .timeout(std::time::Duration::from_secs(60))
                .build()
                .expect("Failed to build HTTP client"),
        }
    }

    async fn fetch_bytes(&self, location: DocumentLocation<'_>) -> Result<Bytes, SourceError> {
        match location {
            DocumentLocation::Object { bucket, key } => {
                let output = self
                    .s3
                    .get_object()
                    .bucket(bucket)
                    .key(key)
                    .send()
                    .await
                    .map_err(|e| {
                        let missing = e
                            .as_service_error()
                            .map(|se| se.is_no_such_key())
                            .unwrap_or(false);
                        if missing {
                            SourceError::NotFound(format!("s3://{bucket}/{key}"))
                        } else {
                            SourceError::Storage(DisplayErrorContext(&e).to_string())
                        }
                    })?;
                let data = output
                    .body
                    .collect()
                    .await
                    .map_err(|e| SourceError::Storage(e.to_string()))?;
                Ok(data.into_bytes())
            }
            DocumentLocation::Url(url) => {
                let response = self
                    .http
                    .get(url)
                    .send()
                    .await
                    .map_err(|e| SourceError::Fetch(e.to_string()))?;
                let status = response.status();
                match status.as_u16() {
                    404 => return Err(SourceError::NotFound(url.to_string())),
                    429 => return Err(SourceError::RateLimited("document host".to_string())),
                    _ if !status.is_success() => {
                        return Err(SourceError::Fetch(format!("HTTP {status}")));
                    }
                    _ => {}
                }
                response
                    .bytes()
                    .await
                    .map_err(|e| SourceError::Fetch(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl DocumentTextExtractor for StorageDocumentExtractor {
    async fn extract_text(&self, reference: &str) -> Result<String, SourceError> {
        let extension = extension_of(reference);
        let bytes = self.fetch_bytes(locate(reference, &self.bucket)).await?;
        debug!("Fetched {} bytes for document {reference}", bytes.len());
        let text = match detect_format(extension.as_deref(), &bytes)? {
            DocumentFormat::Pdf => {
                tokio::task::spawn_blocking(move || extract_pdf_text(&bytes))
                    .await
                    .map_err(|_| {
                        SourceError::UnsupportedFormat("PDF could not be parsed".to_string())
                    })??
            }
            DocumentFormat::Text => String::from_utf8_lossy(&bytes).into_owned(),
        };

        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(SourceError::Empty);
        }
        Ok(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DocumentFormat {
    Pdf,
    Text,
}

fn detect_format(extension: Option<&str>, bytes: &[u8]) -> Result<DocumentFormat, SourceError> {
    match extension {
        Some("pdf") => Ok(DocumentFormat::Pdf),
        Some(ext) if TEXT_EXTENSIONS.contains(&ext) => Ok(DocumentFormat::Text),
        _ if bytes.starts_with(b"%PDF") => Ok(DocumentFormat::Pdf),
        Some(ext) if std::str::from_utf8(bytes).is_err() => {
            Err(SourceError::UnsupportedFormat(format!(".{ext} files")))
        }
        None if std::str::from_utf8(bytes).is_err() => Err(SourceError::UnsupportedFormat(
            "binary file without extension".to_string(),
        )),
        _ => Ok(DocumentFormat::Text),
    }
}

fn extract_pdf_text(bytes: &[u8]) -> Result<String, SourceError> {
    pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| SourceError::UnsupportedFormat(format!("PDF could not be parsed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locate_s3_url() {
        assert_eq!(
            locate("s3://resumes/user/cv.pdf", "default"),
            DocumentLocation::Object {
                bucket: "resumes",
                key: "user/cv.pdf"
            }
        );
    }

    #[test]
    fn test_locate_bare_key_uses_default_bucket() {
        assert_eq!(
            locate("/uploads/cv.pdf", "default"),
            DocumentLocation::Object {
                bucket: "default",
                key: "uploads/cv.pdf"
            }
        );
    }

    #[test]
    fn test_locate_http_url() {
        assert_eq!(
            locate("https://cdn.example.com/cv.pdf?sig=1", "default"),
            DocumentLocation::Url("https://cdn.example.com/cv.pdf?sig=1")
        );
    }

    #[test]
    fn test_document_label_strips_path_and_query() {
        assert_eq!(document_label("https://cdn.example.com/a/cv.pdf?sig=1"), "cv.pdf");
        assert_eq!(document_label("s3://bucket/user/transcript.txt"), "transcript.txt");
        assert_eq!(document_label("cover-letter.md"), "cover-letter.md");
    }

    #[test]
    fn test_detect_format() {
        assert_eq!(detect_format(Some("pdf"), b"junk").unwrap(), DocumentFormat::Pdf);
        assert_eq!(detect_format(Some("md"), b"# hi").unwrap(), DocumentFormat::Text);
        assert_eq!(detect_format(None, b"%PDF-1.7").unwrap(), DocumentFormat::Pdf);
        assert_eq!(detect_format(None, b"plain words").unwrap(), DocumentFormat::Text);
        assert!(matches!(
            detect_format(Some("docx"), &[0x50, 0x4b, 0x03, 0x04, 0xff, 0xfe]),
            Err(SourceError::UnsupportedFormat(_))
        ));
    }
}
