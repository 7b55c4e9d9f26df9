//! Format classification: extension first, magic bytes as a fallback.
//!
//! The extension decides whenever it is known. Only a missing or unknown
//! extension triggers content sniffing, and sniffing reads no more than the
//! first 8 KiB plus, for ZIP files, the central directory, which is enough to
//! tell an OOXML/ODF document from a plain archive.
//!
//! Classification never fails: anything unreadable or unrecognised is
//! [`FormatCategory::Unsupported`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::debug;

const SNIFF_BYTES: usize = 8 * 1024;

pub(crate) const CFB_MAGIC: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
pub(crate) const ZIP_MAGIC: [u8; 4] = [b'P', b'K', 0x03, 0x04];
/// An empty archive is only an end-of-central-directory record.
const ZIP_EMPTY_MAGIC: [u8; 4] = [b'P', b'K', 0x05, 0x06];

/// Closed set of formats the pipeline knows how to route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FormatCategory {
    Image,
    /// Binary office formats (doc, ppt, wps, …), converted through PDF.
    OfficeDocLegacy,
    /// XML-based office formats (docx, pptx, odt, …), converted through PDF.
    OfficeDocModern,
    /// Spreadsheets, rendered for the web unless PDF is requested.
    Spreadsheet,
    PlainText,
    /// Already a PDF; served as is.
    Pdf,
    /// Never previewed.
    Archive,
    Unsupported,
}

impl FormatCategory {
    /// Categories that go through the protection detector.
    pub fn needs_protection_check(self) -> bool {
        matches!(
            self,
            FormatCategory::OfficeDocLegacy
                | FormatCategory::OfficeDocModern
                | FormatCategory::Spreadsheet
        )
    }

    pub fn is_previewable(self) -> bool {
        !matches!(self, FormatCategory::Archive | FormatCategory::Unsupported)
    }

    /// Category implied by a (lowercase) file extension alone.
    pub fn from_extension(ext: &str) -> Option<Self> {
        let category = match ext {
            "jpg" | "jpeg" | "png" | "gif" | "bmp" | "ico" | "jfif" | "webp" | "tif" | "tiff"
            | "svg" => FormatCategory::Image,
            "doc" | "dot" | "wps" | "wpt" | "ppt" | "pps" | "pot" | "dps" | "dpt" | "rtf" => {
                FormatCategory::OfficeDocLegacy
            }
            "docx" | "docm" | "dotx" | "dotm" | "pptx" | "pptm" | "ppsx" | "potx" | "odt"
            | "ott" | "odp" | "otp" => FormatCategory::OfficeDocModern,
            "xls" | "xlsx" | "xlsm" | "xlt" | "xltx" | "xltm" | "et" | "ett" | "ods" | "ots"
            | "csv" => FormatCategory::Spreadsheet,
            "txt" | "text" | "md" | "markdown" | "log" | "json" | "xml" | "yaml" | "yml"
            | "toml" | "ini" | "properties" | "conf" | "cfg" | "sql" | "sh" | "bat" | "java"
            | "rs" | "py" | "js" | "ts" | "c" | "h" | "cpp" | "go" | "css" | "html" | "htm" => {
                FormatCategory::PlainText
            }
            "pdf" => FormatCategory::Pdf,
            "zip" | "rar" | "7z" | "tar" | "gz" | "tgz" | "bz2" | "xz" | "jar" => {
                FormatCategory::Archive
            }
            _ => return None,
        };
        Some(category)
    }
}

impl fmt::Display for FormatCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Lowercase extension of a path, if any.
pub(crate) fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
}

/// Classify the file at `path`.
pub fn classify(path: &Path) -> FormatCategory {
    if let Some(category) = extension_of(path).as_deref().and_then(FormatCategory::from_extension)
    {
        debug!("Classified {} as {} by extension", path.display(), category);
        return category;
    }

    let category = sniff(path);
    debug!("Classified {} as {} by content", path.display(), category);
    category
}

fn sniff(path: &Path) -> FormatCategory {
    let mut head = Vec::with_capacity(SNIFF_BYTES);
    let read = File::open(path).and_then(|f| f.take(SNIFF_BYTES as u64).read_to_end(&mut head));
    if read.is_err() {
        return FormatCategory::Unsupported;
    }
    sniff_bytes(&head).unwrap_or_else(|| {
        if head.starts_with(&ZIP_MAGIC) {
            sniff_zip(path)
        } else {
            FormatCategory::Unsupported
        }
    })
}

/// Classify by leading bytes. `None` means "looks like ZIP, inspect entries".
fn sniff_bytes(head: &[u8]) -> Option<FormatCategory> {
    if head.starts_with(&ZIP_MAGIC) {
        return None;
    }
    let category = if head.starts_with(b"%PDF") {
        FormatCategory::Pdf
    } else if head.starts_with(&[0x89, b'P', b'N', b'G'])
        || head.starts_with(&[0xFF, 0xD8, 0xFF])
        || head.starts_with(b"GIF87a")
        || head.starts_with(b"GIF89a")
        || head.starts_with(b"BM")
        || head.starts_with(b"II*\0")
        || head.starts_with(b"MM\0*")
        || (head.starts_with(b"RIFF") && head.get(8..12) == Some(b"WEBP".as_slice()))
    {
        FormatCategory::Image
    } else if head.starts_with(&CFB_MAGIC) {
        FormatCategory::OfficeDocLegacy
    } else if head.starts_with(b"{\\rtf") {
        FormatCategory::OfficeDocLegacy
    } else if head.starts_with(&ZIP_EMPTY_MAGIC)
        || head.starts_with(b"Rar!\x1a\x07")
        || head.starts_with(&[b'7', b'z', 0xBC, 0xAF, 0x27, 0x1C])
        || head.starts_with(&[0x1F, 0x8B])
        || head.starts_with(b"BZh")
        || head.starts_with(&[0xFD, b'7', b'z', b'X', b'Z', 0x00])
    {
        FormatCategory::Archive
    } else if looks_like_text(head) {
        FormatCategory::PlainText
    } else {
        FormatCategory::Unsupported
    };
    Some(category)
}

fn looks_like_text(head: &[u8]) -> bool {
    if head.is_empty() || head.contains(&0) {
        return false;
    }
    match std::str::from_utf8(head) {
        Ok(_) => true,
        // A multi-byte character cut off by the sniff window is still text.
        Err(e) => e.error_len().is_none() && head.len() == SNIFF_BYTES,
    }
}

/// Tell OOXML / ODF documents apart from plain ZIP archives.
fn sniff_zip(path: &Path) -> FormatCategory {
    let Ok(file) = File::open(path) else {
        return FormatCategory::Unsupported;
    };
    let Ok(mut archive) = zip::ZipArchive::new(file) else {
        // Starts like a ZIP but is not one: nothing we can preview.
        return FormatCategory::Unsupported;
    };

    if let Ok(mut entry) = archive.by_name("mimetype") {
        let mut mime = String::new();
        if entry.by_ref().take(256).read_to_string(&mut mime).is_ok() {
            let mime = mime.trim();
            if mime.starts_with("application/vnd.oasis.opendocument.spreadsheet") {
                return FormatCategory::Spreadsheet;
            }
            if mime.starts_with("application/vnd.oasis.opendocument.") {
                return FormatCategory::OfficeDocModern;
            }
        }
    }

    let mut has_content_types = false;
    let mut top_dirs = (false, false, false);
    for name in archive.file_names() {
        has_content_types |= name == "[Content_Types].xml";
        top_dirs.0 |= name.starts_with("xl/");
        top_dirs.1 |= name.starts_with("word/");
        top_dirs.2 |= name.starts_with("ppt/");
    }

    match (has_content_types, top_dirs) {
        (true, (true, _, _)) => FormatCategory::Spreadsheet,
        (true, (_, true, _)) | (true, (_, _, true)) => FormatCategory::OfficeDocModern,
        _ => FormatCategory::Archive,
    }
}
