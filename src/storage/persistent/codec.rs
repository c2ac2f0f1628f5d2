//! On-disk framing for blob files.
//!
//! Each blob file is:
//! ```text
//! [magic: 4 bytes "GEOF"][version: 1 byte][length: 4 bytes LE][payload: N bytes][crc32: 4 bytes LE]
//! ```
//! The payload is opaque here (the snapshot layer stores JSON).

use std::io::{Error as IoError, ErrorKind, Read, Result as IoResult, Write};

use crc32fast::Hasher;

/// Current frame version.
const FRAME_VERSION: u8 = 1;

/// Magic bytes identifying a blob file.
pub const MAGIC: [u8; 4] = *b"GEOF";

/// Upper bound on a single payload (16 MiB); registries are small.
const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

fn checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

fn invalid(message: String) -> IoError {
    IoError::new(ErrorKind::InvalidData, message)
}

/// Writes one framed payload.
pub fn write_frame(writer: &mut impl Write, payload: &[u8]) -> IoResult<()> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(invalid(format!(
            "payload size {} exceeds maximum {}",
            payload.len(),
            MAX_PAYLOAD_SIZE
        )));
    }
    // Bounded by MAX_PAYLOAD_SIZE above.
    #[allow(clippy::cast_possible_truncation)]
    let len = payload.len() as u32;

    writer.write_all(&MAGIC)?;
    writer.write_all(&[FRAME_VERSION])?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(payload)?;
    writer.write_all(&checksum(payload).to_le_bytes())?;
    Ok(())
}

/// Reads and verifies one framed payload.
///
/// # Errors
/// - wrong magic or unsupported version
/// - length over the maximum
/// - truncated file (`UnexpectedEof`)
/// - checksum mismatch
pub fn read_frame(reader: &mut impl Read) -> IoResult<Vec<u8>> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(invalid(format!("invalid magic bytes: expected {MAGIC:?}, got {magic:?}")));
    }

    let mut version = [0u8; 1];
    reader.read_exact(&mut version)?;
    if version[0] != FRAME_VERSION {
        return Err(invalid(format!(
            "unsupported frame version: {} (expected {FRAME_VERSION})",
            version[0]
        )));
    }

    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_PAYLOAD_SIZE {
        return Err(invalid(format!("payload size {len} exceeds maximum {MAX_PAYLOAD_SIZE}")));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;

    let mut crc_bytes = [0u8; 4];
    reader.read_exact(&mut crc_bytes)?;
    let stored = u32::from_le_bytes(crc_bytes);
    let computed = checksum(&payload);
    if stored != computed {
        return Err(invalid(format!(
            "CRC mismatch: stored={stored:08x}, computed={computed:08x} (data corrupted)"
        )));
    }

    Ok(payload)
}
