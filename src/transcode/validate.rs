//! Raw file checks performed before probing

use std::path::Path;

use super::types::{TranscodeError, TranscodeResult};

/// First four bytes of every WebM/Matroska file
pub const EBML_MAGIC: [u8; 4] = [0x1A, 0x45, 0xDF, 0xA3];

/// Anything smaller cannot hold a usable recording
pub const MIN_RAW_FILE_BYTES: u64 = 1000;

/// Check existence, size and header of a raw recording. Returns the file size.
/// A header mismatch is only logged; the structural probe has the final say.
pub async fn check_raw_file(path: &Path) -> TranscodeResult<u64> {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(TranscodeError::FileNotFound(path.to_path_buf()))
        }
        Err(e) => return Err(e.into()),
    };

    let size = metadata.len();
    if size == 0 {
        return Err(TranscodeError::EmptyFile);
    }
    if size < MIN_RAW_FILE_BYTES {
        return Err(TranscodeError::FileTooSmall(size));
    }

    let header = read_header(path).await?;
    if header != EBML_MAGIC {
        tracing::warn!(
            "{:?} does not start with the EBML header (found {:02X?}), continuing",
            path,
            header
        );
    }

    Ok(size)
}

async fn read_header(path: &Path) -> TranscodeResult<[u8; 4]> {
    use tokio::io::AsyncReadExt;

    let mut file = tokio::fs::File::open(path).await?;
    let mut header = [0u8; 4];
    file.read_exact(&mut header).await?;
    Ok(header)
}
