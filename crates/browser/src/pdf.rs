use base64::Engine;
use dashprint_core::{Error, Result};
use serde::Serialize;
use std::io::Write;
use std::path::Path;

const PDF_SIGNATURE: &[u8] = b"%PDF-";

/// Parameters for `Page.printToPDF`. Paper sizes are in inches.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PdfOptions {
    pub landscape: bool,
    pub paper_width: f64,
    pub paper_height: f64,
    pub page_ranges: String,
    pub print_background: bool,
}

impl Default for PdfOptions {
    fn default() -> Self {
        Self {
            landscape: true,
            paper_width: 16.5,
            paper_height: 23.4,
            page_ranges: "1-2".to_string(),
            print_background: true,
        }
    }
}

/// Decode the base64 payload of `Page.printToPDF` and check it is a PDF.
pub fn decode_pdf(data: &str) -> Result<Vec<u8>> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|e| Error::Export(format!("base64 decode: {}", e)))?;
    if !bytes.starts_with(PDF_SIGNATURE) {
        return Err(Error::Export("browser output is not a PDF document".into()));
    }
    Ok(bytes)
}

/// Create or truncate `path` with mode 0644 and write `bytes` to it.
pub fn write_pdf(path: &Path, bytes: &[u8]) -> Result<usize> {
    if !bytes.starts_with(PDF_SIGNATURE) {
        return Err(Error::Persistence(format!(
            "refusing to write non-PDF content to {}",
            path.display()
        )));
    }

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o644);
    }

    let persist_err = |e: std::io::Error| Error::Persistence(format!("{}: {}", path.display(), e));
    let mut file = options.open(path).map_err(persist_err)?;
    file.write_all(bytes).map_err(persist_err)?;
    file.flush().map_err(persist_err)?;
    Ok(bytes.len())
}
