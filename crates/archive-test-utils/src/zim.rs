//! Minimal ZIM artifacts.
//!
//! Only the fields the archiver inspects are meaningful: the magic number
//! and the major version. Everything after the fixed header is payload.

/// Magic number at offset 0, little endian.
pub const ZIM_MAGIC: u32 = 0x044D_495A;

/// Size of the fixed ZIM header.
pub const HEADER_LEN: usize = 80;

/// Build a well-formed artifact carrying `payload` after the header.
pub fn zim_bytes(payload: &[u8]) -> Vec<u8> {
    zim_bytes_with_version(6, payload)
}

/// Build an artifact with an explicit major version.
pub fn zim_bytes_with_version(major: u16, payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
    bytes.extend_from_slice(&ZIM_MAGIC.to_le_bytes());
    bytes.extend_from_slice(&major.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes());
    bytes.resize(HEADER_LEN, 0);
    bytes.extend_from_slice(payload);
    bytes
}

/// A distinct, valid artifact for a version label, `size` payload bytes long.
pub fn artifact(label: &str, size: usize) -> Vec<u8> {
    let payload: Vec<u8> = label.bytes().cycle().take(size).collect();
    zim_bytes(&payload)
}

/// Bytes that look like an HTML error page served under a `.zim` name.
pub fn html_placeholder() -> Vec<u8> {
    b"<!DOCTYPE html><html><body>503 Service Unavailable</body></html>".to_vec()
}
