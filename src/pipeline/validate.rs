//! Admission: decide whether a batch of candidate documents joins the
//! session.
//!
//! Admission runs in two phases:
//!
//! 1. [`check_batch`]: cheap, synchronous, against the current store. Mixed
//!    types, too many pages, or a second image outside multipage mode
//!    reject the whole batch.
//! 2. [`validate_all`]: per-document structural checks, run on the blocking
//!    pool and joined; each candidate becomes a [`Page`] carrying its first
//!    failure, if any. [`settle`] then decides whether a failure is fatal.
//!
//! A per-page failure is tolerated only for images in multipage mode; for
//! every other combination the first failing page rejects the batch.

use crate::config::SessionConfig;
use crate::document::{contains_different_types, Document, DocumentType};
use crate::error::{AdmissionError, PageError};
use crate::page::{Page, PageStore};
use crate::pipeline::preview::render_preview;
use futures::future::join_all;
use image::{ImageFormat, ImageReader};
use once_cell::sync::Lazy;
use regex::bytes::Regex;
use std::io::Cursor;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Page objects in a PDF body; `/Type /Pages` tree nodes do not match.
static RE_PDF_PAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"/Type\s*/Page(?-u:\b)").unwrap());

static RE_PDF_ENCRYPT: Lazy<Regex> = Lazy::new(|| Regex::new(r"/Encrypt(?-u:\b)").unwrap());

/// Payment QR payload prefixes: EPC069-12 (also used by Stuzza), BezahlCode, eps.
const QR_PREFIXES: [&str; 4] = ["BCD\n", "BCD\r\n", "bank://", "epspayment://"];

// ── Phase 1 ──────────────────────────────────────────────────────────────

/// Type homogeneity and page ceilings, checked against the existing pages.
pub fn check_batch(
    candidates: &[Document],
    store: &PageStore,
    config: &SessionConfig,
) -> Result<(), AdmissionError> {
    let all = candidates
        .iter()
        .chain(store.iter().map(Page::document));
    if contains_different_types(all) {
        return Err(AdmissionError::MixedTypes);
    }
    let requested = candidates.len() + store.len();
    // Single-page review and upload handle exactly one image.
    let images = candidates
        .iter()
        .chain(store.iter().map(Page::document))
        .filter(|d| d.document_type() == DocumentType::Image)
        .count();
    if !config.multipage_enabled && images > 1 {
        return Err(AdmissionError::SinglePageOnly { requested: images });
    }
    if requested > store.max_pages() {
        return Err(AdmissionError::PageLimitExceeded {
            max: store.max_pages(),
            requested,
        });
    }
    Ok(())
}

// ── Phase 2 ──────────────────────────────────────────────────────────────

/// Structurally validate every candidate concurrently on the blocking pool.
///
/// Valid images get a preview when the config asks for one. Output order
/// matches input order.
pub async fn validate_all(candidates: Vec<Document>, config: Arc<SessionConfig>) -> Vec<Page> {
    let tasks = candidates.into_iter().map(|document| {
        let config = config.clone();
        let fallback = document.clone();
        async move {
            let result =
                tokio::task::spawn_blocking(move || validate_one(document, &config)).await;
            result.unwrap_or_else(|e| {
                warn!(id = %fallback.id(), "Validation task failed: {e}");
                let error = invalid_for(fallback.document_type(), format!("validation failed: {e}"));
                Page::with_error(fallback, error)
            })
        }
    });
    join_all(tasks).await
}

fn validate_one(document: Document, config: &SessionConfig) -> Page {
    if let Err(error) = validate_document(&document, config) {
        debug!(id = %document.id(), %error, "Document failed validation");
        return Page::with_error(document, error);
    }
    let document = match (document.document_type(), config.preview_max_edge) {
        (DocumentType::Image, Some(edge)) if document.preview().is_none() => {
            match render_preview(document.data(), edge) {
                Ok(preview) => document.with_preview(preview),
                Err(e) => {
                    warn!(id = %document.id(), "Preview generation failed: {e}");
                    document
                }
            }
        }
        _ => document,
    };
    Page::new(document)
}

/// Decide the batch from its validated pages.
pub fn settle(pages: Vec<Page>, config: &SessionConfig) -> Result<Vec<Page>, AdmissionError> {
    let fatal = pages
        .iter()
        .filter(|p| !config.tolerates_page_errors(p.document().document_type()))
        .find_map(|p| p.error().cloned());
    if let Some(error) = fatal {
        info!(%error, "Batch rejected");
        return Err(AdmissionError::InvalidDocument(error));
    }
    let soft = pages.iter().filter(|p| p.error().is_some()).count();
    info!(pages = pages.len(), soft_errors = soft, "Batch admitted");
    Ok(pages)
}

/// Run the whole admission against `store`.
///
/// Returns the pages to append; the store itself is not touched.
pub async fn admit(
    candidates: Vec<Document>,
    store: &PageStore,
    config: Arc<SessionConfig>,
) -> Result<Vec<Page>, AdmissionError> {
    check_batch(&candidates, store, &config)?;
    let pages = validate_all(candidates, config.clone()).await;
    settle(pages, &config)
}

// ── Structural rules ─────────────────────────────────────────────────────

/// Check one document; the first failing rule wins.
pub fn validate_document(document: &Document, config: &SessionConfig) -> Result<(), PageError> {
    let data = document.data();
    if data.is_empty() {
        return Err(PageError::EmptyDocument);
    }
    let size = data.len() as u64;
    if size > config.max_file_size_bytes {
        return Err(PageError::FileTooLarge {
            size,
            max: config.max_file_size_bytes,
        });
    }
    match document.document_type() {
        DocumentType::Image => validate_image(data),
        DocumentType::Pdf => validate_pdf(data, config.max_pdf_pages),
        DocumentType::QrCode => validate_qr(data),
    }
}

fn validate_image(data: &[u8]) -> Result<(), PageError> {
    let invalid = |detail: String| PageError::ImageFormatNotValid { detail };
    let reader = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| invalid(e.to_string()))?;
    match reader.format() {
        Some(ImageFormat::Png | ImageFormat::Jpeg | ImageFormat::Gif | ImageFormat::Tiff) => {}
        Some(other) => return Err(invalid(format!("unsupported format {other:?}"))),
        None => return Err(invalid("unrecognised format".into())),
    }
    let (width, height) = reader
        .into_dimensions()
        .map_err(|e| invalid(e.to_string()))?;
    if width == 0 || height == 0 {
        return Err(invalid(format!("empty image {width}x{height}")));
    }
    Ok(())
}

fn validate_pdf(data: &[u8], max_pages: usize) -> Result<(), PageError> {
    if !data.starts_with(b"%PDF") {
        return Err(PageError::PdfNotValid {
            detail: "missing %PDF header".into(),
        });
    }
    if RE_PDF_ENCRYPT.is_match(data) {
        return Err(PageError::PdfPasswordProtected);
    }
    let pages = RE_PDF_PAGE.find_iter(data).count();
    if pages == 0 || pages > max_pages {
        return Err(PageError::PdfPageLimitExceeded {
            pages,
            max: max_pages,
        });
    }
    Ok(())
}

fn validate_qr(data: &[u8]) -> Result<(), PageError> {
    let payload = std::str::from_utf8(data).map_err(|_| PageError::QrCodeFormatNotValid)?;
    if QR_PREFIXES.iter().any(|prefix| payload.starts_with(prefix)) {
        Ok(())
    } else {
        Err(PageError::QrCodeFormatNotValid)
    }
}

fn invalid_for(document_type: DocumentType, detail: String) -> PageError {
    match document_type {
        DocumentType::Image => PageError::ImageFormatNotValid { detail },
        DocumentType::Pdf => PageError::PdfNotValid { detail },
        DocumentType::QrCode => PageError::QrCodeFormatNotValid,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgba, RgbaImage};

    fn png() -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(8, 8, Rgba([0, 0, 0, 255])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png).unwrap();
        buf
    }

    fn pdf(pages: usize) -> Vec<u8> {
        let mut body = b"%PDF-1.4\n1 0 obj << /Type /Pages /Count 1 >> endobj\n".to_vec();
        for i in 0..pages {
            body.extend_from_slice(format!("{} 0 obj << /Type /Page >> endobj\n", i + 2).as_bytes());
        }
        body
    }

    fn config(multipage: bool) -> Arc<SessionConfig> {
        Arc::new(
            SessionConfig::builder()
                .multipage_enabled(multipage)
                .max_pages(3)
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn pdf_rules() {
        let c = SessionConfig::default();
        assert!(validate_document(&Document::pdf(pdf(2)), &c).is_ok());
        assert_eq!(
            validate_document(&Document::pdf(pdf(0)), &c),
            Err(PageError::PdfPageLimitExceeded { pages: 0, max: 10 })
        );
        assert_eq!(
            validate_document(&Document::pdf(pdf(11)), &c),
            Err(PageError::PdfPageLimitExceeded { pages: 11, max: 10 })
        );
        let mut encrypted = pdf(1);
        encrypted.extend_from_slice(b"trailer << /Encrypt 5 0 R >>");
        assert_eq!(
            validate_document(&Document::pdf(encrypted), &c),
            Err(PageError::PdfPasswordProtected)
        );
        assert!(matches!(
            validate_document(&Document::pdf(b"hello".to_vec()), &c),
            Err(PageError::PdfNotValid { .. })
        ));
    }

    #[test]
    fn size_and_emptiness() {
        let c = SessionConfig::builder().max_file_size_bytes(4).build().unwrap();
        assert_eq!(
            validate_document(&Document::image(Vec::new()), &c),
            Err(PageError::EmptyDocument)
        );
        assert!(matches!(
            validate_document(&Document::image(png()), &c),
            Err(PageError::FileTooLarge { max: 4, .. })
        ));
    }

    #[test]
    fn image_and_qr_rules() {
        let c = SessionConfig::default();
        assert!(validate_document(&Document::image(png()), &c).is_ok());
        assert!(matches!(
            validate_document(&Document::image(b"garbage".to_vec()), &c),
            Err(PageError::ImageFormatNotValid { .. })
        ));
        assert!(validate_document(&Document::qr_code("BCD\n002\n1\nSCT"), &c).is_ok());
        assert!(validate_document(&Document::qr_code("bank://singlepayment?name=x"), &c).is_ok());
        assert!(validate_document(&Document::qr_code("epspayment://x"), &c).is_ok());
        assert_eq!(
            validate_document(&Document::qr_code("https://example.com"), &c),
            Err(PageError::QrCodeFormatNotValid)
        );
    }

    #[tokio::test]
    async fn mixed_types_reject_the_batch() {
        let mut store = PageStore::new(3);
        store.append(vec![Page::new(Document::image(png()))]).unwrap();
        let err = admit(vec![Document::pdf(pdf(1))], &store, config(false))
            .await
            .unwrap_err();
        assert_eq!(err, AdmissionError::MixedTypes);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn ceiling_rejects_the_batch() {
        let store = PageStore::new(3);
        let candidates = (0..4).map(|_| Document::image(png())).collect();
        let err = admit(candidates, &store, config(true)).await.unwrap_err();
        assert_eq!(
            err,
            AdmissionError::PageLimitExceeded {
                max: 3,
                requested: 4
            }
        );
    }

    #[tokio::test]
    async fn single_mode_takes_one_image() {
        let store = PageStore::new(3);
        let candidates = vec![Document::image(png()), Document::image(png())];
        let err = admit(candidates, &store, config(false)).await.unwrap_err();
        assert_eq!(err, AdmissionError::SinglePageOnly { requested: 2 });

        let mut store = PageStore::new(3);
        store.append(vec![Page::new(Document::image(png()))]).unwrap();
        assert_eq!(
            check_batch(&[Document::image(png())], &store, &config(false)),
            Err(AdmissionError::SinglePageOnly { requested: 2 })
        );
        assert!(check_batch(&[Document::image(png())], &store, &config(true)).is_ok());
    }

    #[tokio::test]
    async fn multipage_images_keep_soft_errors() {
        let store = PageStore::new(3);
        let candidates = vec![Document::image(png()), Document::image(b"junk".to_vec())];
        let pages = admit(candidates, &store, config(true)).await.unwrap();
        assert_eq!(pages.len(), 2);
        assert!(pages[0].error().is_none());
        assert!(pages[0].document().preview().is_some());
        assert!(matches!(
            pages[1].error(),
            Some(PageError::ImageFormatNotValid { .. })
        ));
    }

    #[tokio::test]
    async fn single_mode_images_fail_hard() {
        let store = PageStore::new(3);
        let err = admit(vec![Document::image(b"junk".to_vec())], &store, config(false))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AdmissionError::InvalidDocument(PageError::ImageFormatNotValid { .. })
        ));
    }

    #[tokio::test]
    async fn multipage_pdfs_still_fail_hard() {
        let store = PageStore::new(3);
        let err = admit(vec![Document::pdf(pdf(0))], &store, config(true))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AdmissionError::InvalidDocument(PageError::PdfPageLimitExceeded { .. })
        ));
    }
}
