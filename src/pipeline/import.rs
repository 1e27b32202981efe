//! Import: turn a path, URL or scanned QR payload into a [`Document`].
//!
//! Downloads are held in memory, up to the configured file size limit; the
//! payload becomes the document's reference-counted buffer. The kind of document is decided by content,
//! not by file extension.

use crate::config::SessionConfig;
use crate::document::{Document, DocumentSource, DocumentType};
use crate::error::{AdmissionError, PageError, SessionError};
use futures::StreamExt;
use std::path::Path;
use tracing::{debug, info};

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Decide the document type from the payload's magic bytes.
pub fn detect_type(bytes: &[u8]) -> Option<DocumentType> {
    if bytes.starts_with(b"%PDF") {
        return Some(DocumentType::Pdf);
    }
    match image::guess_format(bytes) {
        Ok(
            image::ImageFormat::Png
            | image::ImageFormat::Jpeg
            | image::ImageFormat::Gif
            | image::ImageFormat::Tiff,
        ) => Some(DocumentType::Image),
        _ => None,
    }
}

/// Import a local file or a URL as a document.
///
/// The configured [`crate::config::FileImportSupport`] decides which kinds
/// are accepted.
pub async fn import(input: &str, config: &SessionConfig) -> Result<Document, SessionError> {
    let (bytes, file_name) = if is_url(input) {
        download(input, config.download_timeout_secs, config.max_file_size_bytes).await?
    } else {
        read_local(input).await?
    };

    let document_type = detect_type(&bytes).ok_or_else(|| SessionError::UnsupportedDocument {
        input: input.to_string(),
    })?;
    if !config.file_import.allows(document_type) {
        return Err(SessionError::ImportNotAllowed { document_type });
    }

    debug!(%document_type, bytes = bytes.len(), "Imported {}", input);
    let mut document = Document::new(document_type, bytes).with_source(DocumentSource::FileImport);
    if let Some(name) = file_name {
        document = document.with_file_name(name);
    }
    Ok(document)
}

/// Wrap a scanned QR payload as a document.
pub fn qr_document(payload: &str, config: &SessionConfig) -> Result<Document, SessionError> {
    if !config.qr_code_scanning_enabled {
        return Err(SessionError::ImportNotAllowed {
            document_type: DocumentType::QrCode,
        });
    }
    Ok(Document::qr_code(payload))
}

async fn read_local(path_str: &str) -> Result<(Vec<u8>, Option<String>), SessionError> {
    let path = Path::new(path_str);
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned());
            Ok((bytes, name))
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            Err(AdmissionError::PermissionDenied {
                source_name: path_str.to_string(),
            }
            .into())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(SessionError::FileNotFound {
            path: path_str.to_string(),
        }),
        Err(e) => Err(SessionError::InvalidInput {
            input: path_str.to_string(),
            reason: e.to_string(),
        }),
    }
}

async fn download(
    url: &str,
    timeout_secs: u64,
    max_bytes: u64,
) -> Result<(Vec<u8>, Option<String>), SessionError> {
    info!("Downloading document from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| SessionError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let map_err = |e: reqwest::Error| {
        if e.is_timeout() {
            SessionError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            SessionError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    };

    let response = client.get(url).send().await.map_err(map_err)?;
    let status = response.status();
    if status == reqwest::StatusCode::FORBIDDEN || status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(AdmissionError::PermissionDenied {
            source_name: url.to_string(),
        }
        .into());
    }
    if !status.is_success() {
        return Err(SessionError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {status}"),
        });
    }

    let too_large = |size: u64| -> SessionError {
        AdmissionError::InvalidDocument(PageError::FileTooLarge {
            size,
            max: max_bytes,
        })
        .into()
    };
    if let Some(declared) = response.content_length().filter(|&n| n > max_bytes) {
        return Err(too_large(declared));
    }

    let mut bytes = Vec::new();
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(map_err)?;
        let size = (bytes.len() + chunk.len()) as u64;
        if size > max_bytes {
            return Err(too_large(size));
        }
        bytes.extend_from_slice(&chunk);
    }
    info!("Downloaded {} bytes", bytes.len());
    Ok((bytes, file_name_from_url(url)))
}

/// Last path segment of the URL, if it looks like a file name.
fn file_name_from_url(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?;
    (!last.is_empty() && last.contains('.')).then(|| last.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FileImportSupport;
    use std::io::Write;

    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/doc.pdf"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn detects_by_content() {
        assert_eq!(detect_type(b"%PDF-1.7\n"), Some(DocumentType::Pdf));
        assert_eq!(detect_type(PNG_MAGIC), Some(DocumentType::Image));
        assert_eq!(detect_type(&[0xFF, 0xD8, 0xFF, 0xE0]), Some(DocumentType::Image));
        assert_eq!(detect_type(b"hello"), None);
    }

    #[test]
    fn url_file_names() {
        assert_eq!(
            file_name_from_url("https://example.com/a/invoice.pdf").as_deref(),
            Some("invoice.pdf")
        );
        assert_eq!(file_name_from_url("https://example.com/a/"), None);
    }

    #[tokio::test]
    async fn imports_local_pdf() {
        let mut file = tempfile::Builder::new().suffix(".pdf").tempfile().unwrap();
        file.write_all(b"%PDF-1.4\n").unwrap();
        let doc = import(file.path().to_str().unwrap(), &SessionConfig::default())
            .await
            .unwrap();
        assert_eq!(doc.document_type(), DocumentType::Pdf);
        assert!(!doc.is_reviewable());
        assert_eq!(doc.source(), DocumentSource::FileImport);
    }

    #[tokio::test]
    async fn import_policy_is_enforced() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(PNG_MAGIC).unwrap();
        let config = SessionConfig::builder()
            .file_import(FileImportSupport::Pdf)
            .build()
            .unwrap();
        let err = import(file.path().to_str().unwrap(), &config)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::ImportNotAllowed {
                document_type: DocumentType::Image
            }
        ));
    }

    #[tokio::test]
    async fn missing_file() {
        let err = import("/nonexistent/file.pdf", &SessionConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::FileNotFound { .. }));
    }

    /// Serve one canned HTTP response on a local port.
    async fn serve_once(response: Vec<u8>) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).await;
            let _ = socket.write_all(&response).await;
            let _ = socket.shutdown().await;
        });
        format!("http://{addr}/scan.pdf")
    }

    fn small_limit() -> SessionConfig {
        SessionConfig::builder().max_file_size_bytes(16).build().unwrap()
    }

    #[tokio::test]
    async fn declared_oversized_download_is_refused() {
        let url = serve_once(
            b"HTTP/1.1 200 OK\r\nContent-Length: 1000000\r\nConnection: close\r\n\r\n%PDF".to_vec(),
        )
        .await;
        let err = import(&url, &small_limit()).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Admission(AdmissionError::InvalidDocument(PageError::FileTooLarge {
                size: 1000000,
                max: 16
            }))
        ));
    }

    #[tokio::test]
    async fn undeclared_oversized_download_stops_at_the_limit() {
        let mut response = b"HTTP/1.1 200 OK\r\nConnection: close\r\n\r\n%PDF-1.4\n".to_vec();
        response.extend_from_slice(&[b'x'; 64]);
        let url = serve_once(response).await;
        let err = import(&url, &small_limit()).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Admission(AdmissionError::InvalidDocument(PageError::FileTooLarge {
                max: 16,
                ..
            }))
        ));
    }

    #[tokio::test]
    async fn small_download_is_imported() {
        let url = serve_once(
            b"HTTP/1.1 200 OK\r\nContent-Length: 9\r\nConnection: close\r\n\r\n%PDF-1.4\n".to_vec(),
        )
        .await;
        let doc = import(&url, &small_limit()).await.unwrap();
        assert_eq!(doc.document_type(), DocumentType::Pdf);
        assert_eq!(doc.file_name(), Some("scan.pdf"));
    }

    #[test]
    fn qr_requires_scanning_enabled() {
        let config = SessionConfig::builder()
            .qr_code_scanning_enabled(false)
            .build()
            .unwrap();
        assert!(qr_document("BCD\n001", &config).is_err());
        let doc = qr_document("BCD\n001", &SessionConfig::default()).unwrap();
        assert_eq!(doc.document_type(), DocumentType::QrCode);
    }
}
