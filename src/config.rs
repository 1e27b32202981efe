//! Configuration for a capture session.
//!
//! Every knob lives in one [`SessionConfig`] value that is built once at
//! session start and handed to the session actor. Nothing here is global;
//! two sessions in one process can run with different settings.

use crate::document::DocumentType;
use crate::error::SessionError;
use serde::{Deserialize, Serialize};

/// Hard upper bound for [`SessionConfig::max_pages`].
pub const MAX_PAGES_LIMIT: usize = 100;

/// Configuration for a capture session.
///
/// Built via [`SessionConfig::builder()`] or using
/// [`SessionConfig::default()`].
///
/// # Example
/// ```rust
/// use capture_flow::SessionConfig;
///
/// let config = SessionConfig::builder()
///     .multipage_enabled(true)
///     .max_pages(5)
///     .default_currency("CHF")
///     .build()
///     .unwrap();
/// assert_eq!(config.max_pages, 5);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Review several image pages together before one combined analysis.
    /// Default: false.
    ///
    /// Also switches admission to tolerant mode for images: a page that
    /// fails structural validation is kept with its error instead of
    /// rejecting the whole batch.
    pub multipage_enabled: bool,

    /// Page ceiling for one session. Range: 1–100. Default: 10.
    pub max_pages: usize,

    /// Build a digital invoice when the analysis returns line items.
    /// Default: true. When off, line items are shown as plain extractions.
    pub return_assistant_enabled: bool,

    /// Which file kinds may be imported. Default: PDFs and images.
    pub file_import: FileImportSupport,

    /// Accept scanned payment QR codes. Default: true.
    pub qr_code_scanning_enabled: bool,

    /// Largest accepted payload in bytes. Default: 10 MiB.
    pub max_file_size_bytes: u64,

    /// Largest accepted PDF page count. Default: 10.
    pub max_pdf_pages: usize,

    /// Currency assumed for prices that carry none. Default: "EUR".
    pub default_currency: String,

    /// Number of uploads allowed in flight at once. Default: 4.
    pub upload_concurrency: usize,

    /// Longest edge of generated image previews, in pixels. Default: 256.
    /// `None` disables preview generation.
    pub preview_max_edge: Option<u32>,

    /// Download timeout for URL imports in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Capacity of the event broadcast channel. Default: 256.
    ///
    /// Subscribers that fall further behind than this skip events.
    pub event_capacity: usize,

    /// Message shown for analysis failures other than cancellation.
    pub analysis_error_message: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            multipage_enabled: false,
            max_pages: 10,
            return_assistant_enabled: true,
            file_import: FileImportSupport::default(),
            qr_code_scanning_enabled: true,
            max_file_size_bytes: 10 * 1024 * 1024,
            max_pdf_pages: 10,
            default_currency: "EUR".to_string(),
            upload_concurrency: 4,
            preview_max_edge: Some(256),
            download_timeout_secs: 120,
            event_capacity: 256,
            analysis_error_message: "The document could not be analysed. Please try again."
                .to_string(),
        }
    }
}

impl SessionConfig {
    /// Create a new builder for `SessionConfig`.
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder {
            config: Self::default(),
        }
    }

    /// Check every constraint the builder enforces.
    ///
    /// Sessions call this on open, so a config assembled by hand or
    /// deserialised with defaults gets the same checks as a built one.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.max_pages == 0 || self.max_pages > MAX_PAGES_LIMIT {
            return Err(SessionError::InvalidConfig(format!(
                "max_pages must be 1-{MAX_PAGES_LIMIT}, got {}",
                self.max_pages
            )));
        }
        if self.max_pdf_pages == 0 {
            return Err(SessionError::InvalidConfig(
                "max_pdf_pages must be at least 1".into(),
            ));
        }
        if self.max_file_size_bytes == 0 {
            return Err(SessionError::InvalidConfig(
                "max_file_size_bytes must be at least 1".into(),
            ));
        }
        if self.default_currency.len() != 3
            || !self.default_currency.chars().all(|ch| ch.is_ascii_uppercase())
        {
            return Err(SessionError::InvalidConfig(format!(
                "default_currency must be a 3-letter ISO code, got '{}'",
                self.default_currency
            )));
        }
        if self.preview_max_edge == Some(0) {
            return Err(SessionError::InvalidConfig(
                "preview_max_edge must be positive".into(),
            ));
        }
        if self.upload_concurrency == 0 {
            return Err(SessionError::InvalidConfig(
                "upload_concurrency must be at least 1".into(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(SessionError::InvalidConfig(
                "event_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// True when a per-page structural error may be kept on the page
    /// instead of rejecting the batch.
    pub fn tolerates_page_errors(&self, document_type: DocumentType) -> bool {
        self.multipage_enabled && document_type == DocumentType::Image
    }
}

/// Builder for [`SessionConfig`].
#[derive(Debug)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    pub fn multipage_enabled(mut self, v: bool) -> Self {
        self.config.multipage_enabled = v;
        self
    }

    pub fn max_pages(mut self, n: usize) -> Self {
        self.config.max_pages = n;
        self
    }

    pub fn return_assistant_enabled(mut self, v: bool) -> Self {
        self.config.return_assistant_enabled = v;
        self
    }

    pub fn file_import(mut self, support: FileImportSupport) -> Self {
        self.config.file_import = support;
        self
    }

    pub fn qr_code_scanning_enabled(mut self, v: bool) -> Self {
        self.config.qr_code_scanning_enabled = v;
        self
    }

    pub fn max_file_size_bytes(mut self, bytes: u64) -> Self {
        self.config.max_file_size_bytes = bytes;
        self
    }

    pub fn max_pdf_pages(mut self, n: usize) -> Self {
        self.config.max_pdf_pages = n;
        self
    }

    pub fn default_currency(mut self, code: impl Into<String>) -> Self {
        self.config.default_currency = code.into();
        self
    }

    pub fn upload_concurrency(mut self, n: usize) -> Self {
        self.config.upload_concurrency = n.max(1);
        self
    }

    pub fn preview_max_edge(mut self, edge: Option<u32>) -> Self {
        self.config.preview_max_edge = edge;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn event_capacity(mut self, n: usize) -> Self {
        self.config.event_capacity = n.max(1);
        self
    }

    pub fn analysis_error_message(mut self, message: impl Into<String>) -> Self {
        self.config.analysis_error_message = message.into();
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<SessionConfig, SessionError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Which documents the file-import entry point accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileImportSupport {
    /// File import is disabled.
    None,
    /// Only PDFs.
    Pdf,
    /// PDFs and images. (default)
    #[default]
    PdfAndImages,
}

impl FileImportSupport {
    pub fn allows(self, document_type: DocumentType) -> bool {
        match (self, document_type) {
            (FileImportSupport::None, _) => false,
            (_, DocumentType::Pdf) => true,
            (FileImportSupport::PdfAndImages, DocumentType::Image) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = SessionConfig::builder().build().unwrap();
        assert_eq!(config, SessionConfig::default());
        assert_eq!(config.max_pages, 10);
        assert!(!config.multipage_enabled);
    }

    #[test]
    fn rejects_page_ceiling_out_of_range() {
        assert!(SessionConfig::builder().max_pages(0).build().is_err());
        assert!(SessionConfig::builder().max_pages(101).build().is_err());
        assert!(SessionConfig::builder().max_pages(100).build().is_ok());
    }

    #[test]
    fn rejects_bad_currency() {
        let err = SessionConfig::builder()
            .default_currency("euro")
            .build()
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidConfig(_)));
    }

    #[test]
    fn hand_built_configs_are_validated() {
        let zero_events = SessionConfig {
            event_capacity: 0,
            ..Default::default()
        };
        assert!(matches!(
            zero_events.validate(),
            Err(SessionError::InvalidConfig(_))
        ));
        let zero_uploads: SessionConfig =
            serde_json::from_str(r#"{"upload_concurrency": 0}"#).unwrap();
        assert!(zero_uploads.validate().is_err());
        assert!(SessionConfig::default().validate().is_ok());
    }

    #[test]
    fn tolerance_only_for_multipage_images() {
        let multi = SessionConfig::builder()
            .multipage_enabled(true)
            .build()
            .unwrap();
        assert!(multi.tolerates_page_errors(DocumentType::Image));
        assert!(!multi.tolerates_page_errors(DocumentType::Pdf));
        assert!(!multi.tolerates_page_errors(DocumentType::QrCode));
        assert!(!SessionConfig::default().tolerates_page_errors(DocumentType::Image));
    }

    #[test]
    fn import_policy() {
        assert!(!FileImportSupport::None.allows(DocumentType::Pdf));
        assert!(FileImportSupport::Pdf.allows(DocumentType::Pdf));
        assert!(!FileImportSupport::Pdf.allows(DocumentType::Image));
        assert!(FileImportSupport::PdfAndImages.allows(DocumentType::Image));
        assert!(!FileImportSupport::PdfAndImages.allows(DocumentType::QrCode));
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config: SessionConfig =
            serde_json::from_str(r#"{"multipage_enabled": true}"#).unwrap();
        assert!(config.multipage_enabled);
        assert_eq!(config.default_currency, "EUR");
    }
}
