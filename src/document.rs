//! Captured and imported documents.
//!
//! A [`Document`] is the immutable capture unit. Everything that tracks a
//! document across the session (pages, in-flight uploads, retry actions)
//! refers to it by [`DocumentId`], never by its position, so reordering or
//! deleting pages cannot make a late completion land on the wrong page.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Stable identity of a document within a session.
///
/// An edited document (rotated, re-cropped) keeps the id of the document it
/// replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId(Uuid);

impl DocumentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of content a document carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Image,
    Pdf,
    #[serde(rename = "qrcode")]
    QrCode,
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DocumentType::Image => "image",
            DocumentType::Pdf => "pdf",
            DocumentType::QrCode => "qrcode",
        };
        f.write_str(s)
    }
}

/// Where a document entered the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DocumentSource {
    #[default]
    Camera,
    Gallery,
    FileImport,
    OpenWith,
    QrScan,
}

/// An immutable capture unit.
///
/// The payload is reference counted: cloning a document to hand it to an
/// upload task does not copy the bytes.
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    id: DocumentId,
    #[serde(rename = "type")]
    document_type: DocumentType,
    is_reviewable: bool,
    source: DocumentSource,
    file_name: Option<String>,
    #[serde(skip)]
    data: Arc<[u8]>,
    #[serde(skip)]
    preview: Option<Arc<[u8]>>,
}

impl Document {
    /// Create a document with a fresh id.
    ///
    /// Images are reviewable by default; PDFs and QR codes are not.
    pub fn new(document_type: DocumentType, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            id: DocumentId::new(),
            document_type,
            is_reviewable: document_type == DocumentType::Image,
            source: DocumentSource::default(),
            file_name: None,
            data: data.into(),
            preview: None,
        }
    }

    pub fn image(data: impl Into<Arc<[u8]>>) -> Self {
        Self::new(DocumentType::Image, data)
    }

    pub fn pdf(data: impl Into<Arc<[u8]>>) -> Self {
        Self::new(DocumentType::Pdf, data)
    }

    pub fn qr_code(payload: impl Into<String>) -> Self {
        let payload: String = payload.into();
        Self::new(DocumentType::QrCode, payload.into_bytes()).with_source(DocumentSource::QrScan)
    }

    pub fn with_source(mut self, source: DocumentSource) -> Self {
        self.source = source;
        self
    }

    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }

    pub fn with_reviewable(mut self, reviewable: bool) -> Self {
        self.is_reviewable = reviewable;
        self
    }

    pub fn with_preview(mut self, preview: impl Into<Arc<[u8]>>) -> Self {
        self.preview = Some(preview.into());
        self
    }

    /// A new version of this document with different content but the same
    /// identity, e.g. after the user rotated or cropped it.
    pub fn edited(&self, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            data: data.into(),
            preview: None,
            ..self.clone()
        }
    }

    pub fn id(&self) -> DocumentId {
        self.id
    }

    pub fn document_type(&self) -> DocumentType {
        self.document_type
    }

    pub fn is_reviewable(&self) -> bool {
        self.is_reviewable
    }

    pub fn source(&self) -> DocumentSource {
        self.source
    }

    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn preview(&self) -> Option<&[u8]> {
        self.preview.as_deref()
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("id", &self.id)
            .field("type", &self.document_type)
            .field("is_reviewable", &self.is_reviewable)
            .field("source", &self.source)
            .field("file_name", &self.file_name)
            .field("bytes", &self.data.len())
            .field("preview", &self.preview.as_ref().map(|p| p.len()))
            .finish()
    }
}

/// True when the documents span more than one [`DocumentType`].
pub fn contains_different_types<'a>(documents: impl IntoIterator<Item = &'a Document>) -> bool {
    let mut iter = documents.into_iter().map(Document::document_type);
    match iter.next() {
        Some(first) => iter.any(|t| t != first),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reviewability_defaults_follow_type() {
        assert!(Document::image(vec![1u8]).is_reviewable());
        assert!(!Document::pdf(vec![1u8]).is_reviewable());
        assert!(!Document::qr_code("BCD").is_reviewable());
    }

    #[test]
    fn edited_document_keeps_identity() {
        let original = Document::image(vec![1u8, 2, 3]).with_file_name("a.jpg");
        let edited = original.edited(vec![9u8]);
        assert_eq!(original.id(), edited.id());
        assert_eq!(edited.data(), &[9u8]);
        assert_eq!(edited.file_name(), Some("a.jpg"));
    }

    #[test]
    fn mixed_type_detection() {
        let a = Document::image(vec![1u8]);
        let b = Document::image(vec![2u8]);
        let c = Document::pdf(vec![3u8]);
        assert!(!contains_different_types([&a, &b]));
        assert!(contains_different_types([&a, &c]));
        assert!(!contains_different_types(std::iter::empty()));
    }

    #[test]
    fn qr_code_type_serialises_lowercase() {
        let json = serde_json::to_string(&DocumentType::QrCode).unwrap();
        assert_eq!(json, "\"qrcode\"");
    }
}
