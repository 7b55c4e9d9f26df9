//! Protection detection for office documents.
//!
//! Opens the container just far enough to find an encryption marker:
//!
//! - **OLE compound files** (CFB): the directory is parsed and only stream
//!   names count, never document text.
//!   - Encrypted OOXML is wrapped in a CFB holding `EncryptionInfo` and
//!     `EncryptedPackage` streams.
//!   - Encrypted PowerPoint 97-2003 files carry an `EncryptedSummary` stream.
//!   - Word 97-2003 sets `fEncrypted` in the FIB at the head of the
//!     `WordDocument` stream.
//!   - Excel 97-2003 puts a `FILEPASS` record right after the globals `BOF`
//!     in the `Workbook` (or BIFF5 `Book`) stream.
//! - **ZIP containers**: any encrypted entry, or an ODF manifest declaring
//!   `encryption-data`, means a password is required.
//!
//! A container that cannot be opened at all is reported as
//! [`PreviewError::CorruptedDocument`], never as "protected".

use crate::error::PreviewError;
use crate::pipeline::classify::{extension_of, FormatCategory, CFB_MAGIC, ZIP_MAGIC};
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::path::Path;
use tracing::debug;

/// Streams whose mere presence means the payload is encrypted.
const ENCRYPTION_STREAMS: [&str; 3] = ["/EncryptionInfo", "/EncryptedPackage", "/EncryptedSummary"];
const WORD_STREAM: &str = "/WordDocument";
const WORKBOOK_STREAMS: [&str; 2] = ["/Workbook", "/Book"];

/// `fEncrypted` in the FIB flag word at offset 0x0A.
const FIB_FLAGS_OFFSET: usize = 0x0A;
const FIB_ENCRYPTED: u16 = 0x0100;

const BIFF_EOF: u16 = 0x000A;
const BIFF_FILEPASS: u16 = 0x002F;
/// Upper bound on globals records walked before giving up on `FILEPASS`.
const MAX_GLOBALS_RECORDS: usize = 4096;

const MAX_MANIFEST_BYTES: u64 = 1024 * 1024;

/// Whether opening the document at `path` needs a password.
///
/// Returns `Ok(false)` for categories that never carry protection.
pub fn is_protected(path: &Path, category: FormatCategory) -> Result<bool, PreviewError> {
    if !category.needs_protection_check() {
        return Ok(false);
    }
    let ext = extension_of(path);
    if ext.as_deref() == Some("csv") {
        return Ok(false);
    }

    let bytes = std::fs::read(path).map_err(|source| PreviewError::StoreReadError {
        path: path.to_path_buf(),
        source,
    })?;

    let protected = if bytes.starts_with(&CFB_MAGIC) {
        inspect_cfb(path, &bytes, ext.as_deref())?
    } else if bytes.starts_with(&ZIP_MAGIC) {
        inspect_zip(path, &bytes)?
    } else if bytes.starts_with(b"{\\rtf") {
        false
    } else {
        return Err(corrupted(path, "not an office document container"));
    };

    debug!("Protection check for {}: {}", path.display(), protected);
    Ok(protected)
}

fn corrupted(path: &Path, detail: impl Into<String>) -> PreviewError {
    PreviewError::CorruptedDocument {
        path: path.to_path_buf(),
        detail: detail.into(),
    }
}

/// Extensions whose unencrypted form is a ZIP package.
fn is_package_extension(ext: &str) -> bool {
    matches!(
        ext,
        "docx" | "docm" | "dotx" | "dotm" | "pptx" | "pptm" | "ppsx" | "potx" | "xlsx" | "xlsm"
            | "xltx" | "xltm" | "odt" | "ott" | "odp" | "otp" | "ods" | "ots"
    )
}

fn inspect_cfb(path: &Path, bytes: &[u8], ext: Option<&str>) -> Result<bool, PreviewError> {
    let mut compound = cfb::CompoundFile::open(Cursor::new(bytes))
        .map_err(|e| corrupted(path, format!("unreadable compound file: {e}")))?;

    if let Some(name) = ENCRYPTION_STREAMS.iter().find(|name| compound.is_stream(name)) {
        debug!("{} holds {name}", path.display());
        return Ok(true);
    }

    // A package format only ends up in CFB when it is encrypted.
    if ext.is_some_and(is_package_extension) {
        return Err(corrupted(
            path,
            "compound file without encryption streams for a package format",
        ));
    }

    if compound.is_stream(WORD_STREAM) {
        let mut stream = compound
            .open_stream(WORD_STREAM)
            .map_err(|e| corrupted(path, format!("unreadable WordDocument stream: {e}")))?;
        return fib_declares_encryption(&mut stream)
            .map_err(|e| corrupted(path, format!("unreadable Word file header: {e}")));
    }

    if let Some(name) = WORKBOOK_STREAMS.iter().find(|name| compound.is_stream(name)) {
        let mut stream = compound
            .open_stream(name)
            .map_err(|e| corrupted(path, format!("unreadable workbook stream: {e}")))?;
        return globals_declare_filepass(&mut stream)
            .map_err(|e| corrupted(path, format!("unreadable workbook records: {e}")));
    }

    Ok(false)
}

fn fib_declares_encryption<R: Read>(stream: &mut R) -> io::Result<bool> {
    let mut fib = [0u8; FIB_FLAGS_OFFSET + 2];
    stream.read_exact(&mut fib)?;
    let flags = u16::from_le_bytes([fib[FIB_FLAGS_OFFSET], fib[FIB_FLAGS_OFFSET + 1]]);
    Ok(flags & FIB_ENCRYPTED != 0)
}

fn is_biff_bof(record: u16) -> bool {
    matches!(record, 0x0009 | 0x0209 | 0x0409 | 0x0809)
}

/// Walk BIFF records from the start of the workbook stream up to the end of
/// the globals substream, looking for `FILEPASS`.
fn globals_declare_filepass<R: Read + Seek>(stream: &mut R) -> io::Result<bool> {
    let mut header = [0u8; 4];
    for index in 0..MAX_GLOBALS_RECORDS {
        match stream.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof && index > 0 => return Ok(false),
            Err(e) => return Err(e),
        }
        let record = u16::from_le_bytes([header[0], header[1]]);
        let len = u16::from_le_bytes([header[2], header[3]]);

        if index == 0 {
            if !is_biff_bof(record) {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("stream starts with record {record:#06x}, not BOF"),
                ));
            }
        } else if record == BIFF_FILEPASS {
            return Ok(true);
        } else if record == BIFF_EOF {
            return Ok(false);
        }
        stream.seek(SeekFrom::Current(i64::from(len)))?;
    }
    Ok(false)
}

fn inspect_zip(path: &Path, bytes: &[u8]) -> Result<bool, PreviewError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| corrupted(path, format!("unreadable package: {e}")))?;

    let mut is_odf = false;
    let mut has_content_types = false;
    for i in 0..archive.len() {
        let entry = archive
            .by_index_raw(i)
            .map_err(|e| corrupted(path, format!("unreadable package entry: {e}")))?;
        if entry.encrypted() {
            return Ok(true);
        }
        match entry.name() {
            "mimetype" => is_odf = true,
            "[Content_Types].xml" => has_content_types = true,
            _ => {}
        }
    }

    if is_odf {
        return odf_manifest_declares_encryption(path, &mut archive);
    }
    if !has_content_types {
        return Err(corrupted(path, "package has no [Content_Types].xml"));
    }
    Ok(false)
}

fn odf_manifest_declares_encryption(
    path: &Path,
    archive: &mut zip::ZipArchive<Cursor<&[u8]>>,
) -> Result<bool, PreviewError> {
    let entry = match archive.by_name("META-INF/manifest.xml") {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => return Ok(false),
        Err(e) => return Err(corrupted(path, format!("unreadable manifest: {e}"))),
    };
    let mut manifest = String::new();
    entry
        .take(MAX_MANIFEST_BYTES)
        .read_to_string(&mut manifest)
        .map_err(|e| corrupted(path, format!("unreadable manifest: {e}")))?;
    Ok(manifest.contains("encryption-data"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let p = dir.path().join(name);
        std::fs::write(&p, bytes).unwrap();
        p
    }

    fn zip_with(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut w = zip::ZipWriter::new(&mut buf);
            let opts = zip::write::SimpleFileOptions::default();
            for (name, data) in entries {
                w.start_file(*name, opts).unwrap();
                w.write_all(data).unwrap();
            }
            w.finish().unwrap();
        }
        buf.into_inner()
    }

    /// A real compound file holding `streams` under the root storage.
    fn cfb_with(streams: &[(&str, &[u8])]) -> Vec<u8> {
        let mut compound = cfb::CompoundFile::create(Cursor::new(Vec::new())).unwrap();
        for (name, data) in streams {
            let mut stream = compound.create_stream(name).unwrap();
            stream.write_all(data).unwrap();
            stream.flush().unwrap();
        }
        compound.flush().unwrap();
        compound.into_inner().into_inner()
    }

    fn utf16le(text: &str) -> Vec<u8> {
        text.encode_utf16().flat_map(u16::to_le_bytes).collect()
    }

    /// Word 97 FIB (`wIdent` 0xA5EC, nFib 0xC1) followed by body text.
    fn word_document(encrypted: bool, body: &str) -> Vec<u8> {
        let mut fib = vec![0u8; 0x200];
        fib[0..2].copy_from_slice(&0xA5ECu16.to_le_bytes());
        fib[2..4].copy_from_slice(&0x00C1u16.to_le_bytes());
        if encrypted {
            fib[0x0A..0x0C].copy_from_slice(&FIB_ENCRYPTED.to_le_bytes());
        }
        fib.extend(utf16le(body));
        fib
    }

    fn biff(records: &[(u16, &[u8])]) -> Vec<u8> {
        let mut out = Vec::new();
        for (record, data) in records {
            out.extend_from_slice(&record.to_le_bytes());
            out.extend_from_slice(&(data.len() as u16).to_le_bytes());
            out.extend_from_slice(data);
        }
        out
    }

    const BOF8: (u16, &[u8]) = (0x0809, &[0x00, 0x06, 0x05, 0x00, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
    const CODEPAGE: (u16, &[u8]) = (0x0042, &[0xB0, 0x04]);
    const FILEPASS: (u16, &[u8]) = (BIFF_FILEPASS, &[0x01, 0x00, 0x01, 0x00]);
    const EOF: (u16, &[u8]) = (BIFF_EOF, &[]);

    #[test]
    fn non_office_categories_are_never_protected() {
        let dir = TempDir::new().unwrap();
        let p = write(&dir, "a.png", b"whatever");
        assert!(!is_protected(&p, FormatCategory::Image).unwrap());
        let p = write(&dir, "a.csv", b"a,b\n1,2\n");
        assert!(!is_protected(&p, FormatCategory::Spreadsheet).unwrap());
    }

    #[test]
    fn plain_docx_is_not_protected() {
        let dir = TempDir::new().unwrap();
        let docx = zip_with(&[("[Content_Types].xml", b"<Types/>"), ("word/document.xml", b"<w/>")]);
        let p = write(&dir, "Sample1.docx", &docx);
        assert!(!is_protected(&p, FormatCategory::OfficeDocModern).unwrap());
    }

    #[test]
    fn encrypted_ooxml_in_cfb_is_protected() {
        let dir = TempDir::new().unwrap();
        let p = write(
            &dir,
            "Protected.docx",
            &cfb_with(&[
                ("/EncryptionInfo", &[0x04, 0x00, 0x04, 0x00, 0x40, 0, 0, 0]),
                ("/EncryptedPackage", &[0u8; 64]),
            ]),
        );
        assert!(is_protected(&p, FormatCategory::OfficeDocModern).unwrap());
    }

    #[test]
    fn plain_doc_mentioning_encryption_stream_names_is_not_protected() {
        let dir = TempDir::new().unwrap();
        let doc = cfb_with(&[
            ("/WordDocument", &word_document(false, "See EncryptedPackage in the manual")),
            ("/1Table", &[0u8; 32]),
        ]);
        // The marker text is in the file, just not as a stream name.
        assert!(doc
            .windows(utf16le("EncryptedPackage").len())
            .any(|w| w == utf16le("EncryptedPackage").as_slice()));

        let p = write(&dir, "Sample.doc", &doc);
        assert!(!is_protected(&p, FormatCategory::OfficeDocLegacy).unwrap());
    }

    #[test]
    fn encrypted_word_fib_is_protected() {
        let dir = TempDir::new().unwrap();
        let doc = cfb_with(&[
            ("/WordDocument", &word_document(true, "secret")),
            ("/1Table", &[0u8; 32]),
        ]);
        let p = write(&dir, "Protected.doc", &doc);
        assert!(is_protected(&p, FormatCategory::OfficeDocLegacy).unwrap());
    }

    #[test]
    fn truncated_word_fib_is_corrupted() {
        let dir = TempDir::new().unwrap();
        let p = write(&dir, "short.doc", &cfb_with(&[("/WordDocument", &[0xEC, 0xA5, 0xC1])]));
        let err = is_protected(&p, FormatCategory::OfficeDocLegacy).unwrap_err();
        assert!(matches!(err, PreviewError::CorruptedDocument { .. }), "{err}");
    }

    #[test]
    fn workbook_filepass_marks_xls_protected() {
        let dir = TempDir::new().unwrap();
        let locked = cfb_with(&[("/Workbook", &biff(&[BOF8, FILEPASS, CODEPAGE, EOF]))]);
        let p = write(&dir, "Protected.xls", &locked);
        assert!(is_protected(&p, FormatCategory::Spreadsheet).unwrap());

        let open = cfb_with(&[("/Workbook", &biff(&[BOF8, CODEPAGE, EOF, BOF8, FILEPASS]))]);
        let p = write(&dir, "Sample.xls", &open);
        assert!(!is_protected(&p, FormatCategory::Spreadsheet).unwrap());

        let biff5 = cfb_with(&[("/Book", &biff(&[BOF8, FILEPASS, EOF]))]);
        let p = write(&dir, "old.xls", &biff5);
        assert!(is_protected(&p, FormatCategory::Spreadsheet).unwrap());
    }

    #[test]
    fn workbook_without_leading_bof_is_corrupted() {
        let dir = TempDir::new().unwrap();
        let p = write(&dir, "odd.xls", &cfb_with(&[("/Workbook", &biff(&[FILEPASS, EOF]))]));
        let err = is_protected(&p, FormatCategory::Spreadsheet).unwrap_err();
        assert!(matches!(err, PreviewError::CorruptedDocument { .. }), "{err}");
    }

    #[test]
    fn encrypted_summary_marks_ppt_protected() {
        let dir = TempDir::new().unwrap();
        let locked = cfb_with(&[
            ("/PowerPoint Document", &[0u8; 64]),
            ("/Current User", &[0u8; 32]),
            ("/EncryptedSummary", &[0u8; 32]),
        ]);
        let p = write(&dir, "Protected.ppt", &locked);
        assert!(is_protected(&p, FormatCategory::OfficeDocLegacy).unwrap());

        let open = cfb_with(&[("/PowerPoint Document", &[0u8; 64]), ("/Current User", &[0u8; 32])]);
        let p = write(&dir, "Sample.ppt", &open);
        assert!(!is_protected(&p, FormatCategory::OfficeDocLegacy).unwrap());
    }

    #[test]
    fn package_extension_in_plain_cfb_is_corrupted() {
        let dir = TempDir::new().unwrap();
        let p = write(&dir, "odd.xlsx", &cfb_with(&[("/Workbook", &biff(&[BOF8, EOF]))]));
        let err = is_protected(&p, FormatCategory::Spreadsheet).unwrap_err();
        assert!(matches!(err, PreviewError::CorruptedDocument { .. }));
    }

    #[test]
    fn garbage_is_corrupted_not_protected() {
        let dir = TempDir::new().unwrap();
        let p = write(&dir, "corruptedSample.xlsx", b"this is not a spreadsheet");
        let err = is_protected(&p, FormatCategory::Spreadsheet).unwrap_err();
        assert!(matches!(err, PreviewError::CorruptedDocument { .. }));

        let mut truncated = ZIP_MAGIC.to_vec();
        truncated.extend_from_slice(b"broken");
        let p = write(&dir, "broken.docx", &truncated);
        let err = is_protected(&p, FormatCategory::OfficeDocModern).unwrap_err();
        assert!(matches!(err, PreviewError::CorruptedDocument { .. }));

        let mut bad_cfb = CFB_MAGIC.to_vec();
        bad_cfb.extend_from_slice(&[0u8; 100]);
        let p = write(&dir, "bad.doc", &bad_cfb);
        let err = is_protected(&p, FormatCategory::OfficeDocLegacy).unwrap_err();
        assert!(matches!(err, PreviewError::CorruptedDocument { .. }));
    }

    #[test]
    fn zip_without_content_types_is_corrupted() {
        let dir = TempDir::new().unwrap();
        let p = write(&dir, "fake.docx", &zip_with(&[("readme.txt", b"hi")]));
        assert!(is_protected(&p, FormatCategory::OfficeDocModern).is_err());
    }

    #[test]
    fn odf_manifest_encryption() {
        let dir = TempDir::new().unwrap();
        let manifest = br#"<manifest:manifest><manifest:file-entry><manifest:encryption-data/></manifest:file-entry></manifest:manifest>"#;
        let odt = zip_with(&[
            ("mimetype", b"application/vnd.oasis.opendocument.text"),
            ("META-INF/manifest.xml", manifest),
        ]);
        let p = write(&dir, "secret.odt", &odt);
        assert!(is_protected(&p, FormatCategory::OfficeDocModern).unwrap());

        let open = zip_with(&[("mimetype", b"application/vnd.oasis.opendocument.text")]);
        let p = write(&dir, "open.odt", &open);
        assert!(!is_protected(&p, FormatCategory::OfficeDocModern).unwrap());
    }

    #[test]
    fn rtf_is_not_protected() {
        let dir = TempDir::new().unwrap();
        let p = write(&dir, "a.rtf", b"{\\rtf1\\ansi hello}");
        assert!(!is_protected(&p, FormatCategory::OfficeDocLegacy).unwrap());
    }
}
