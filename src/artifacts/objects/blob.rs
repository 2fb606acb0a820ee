//! Blob object
//!
//! Blobs store file content. They contain only the raw file data, without any
//! metadata like filename or permissions (those are stored in trees).
//!
//! ## Format
//!
//! On disk: `blob <size>\0<content>`

use crate::artifacts::objects::object::Unpackable;
use crate::artifacts::objects::object::{Object, Packable};
use crate::artifacts::objects::object_type::ObjectType;
use bytes::Bytes;
use derive_new::new;
use std::io::{BufRead, Write};

/// Number of leading bytes inspected when deciding whether content is binary
const BINARY_PROBE_SIZE: usize = 8000;

/// Blob object representing file content
///
/// Each unique file content is stored as a blob, identified by its SHA-1 hash.
/// Content is kept as raw bytes so binary files survive a round-trip.
#[derive(Debug, Clone, new)]
pub struct Blob {
    content: Bytes,
}

impl Blob {
    pub fn from_bytes(content: impl Into<Bytes>) -> Self {
        Blob {
            content: content.into(),
        }
    }

    /// Get the raw file content
    pub fn content(&self) -> &Bytes {
        &self.content
    }

    /// Whether the content looks binary (NUL byte within the probe window)
    pub fn is_binary(&self) -> bool {
        let probe = &self.content[..self.content.len().min(BINARY_PROBE_SIZE)];
        probe.contains(&0)
    }

    /// Get the content as UTF-8 text, if it is valid UTF-8
    pub fn as_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.content).ok()
    }
}

impl Packable for Blob {
    fn serialize(&self) -> anyhow::Result<Bytes> {
        let mut blob_bytes = Vec::new();
        let header = format!("{} {}\0", self.object_type().as_str(), self.content.len());
        blob_bytes.write_all(header.as_bytes())?;
        blob_bytes.write_all(&self.content)?;

        Ok(Bytes::from(blob_bytes))
    }
}

impl Unpackable for Blob {
    fn deserialize(reader: impl BufRead) -> anyhow::Result<Self> {
        // the header has already been read
        let content = reader
            .bytes()
            .collect::<Result<Vec<u8>, std::io::Error>>()?;

        Ok(Self::from_bytes(content))
    }
}

impl Object for Blob {
    fn object_type(&self) -> ObjectType {
        ObjectType::Blob
    }

    fn display(&self) -> String {
        String::from_utf8_lossy(&self.content).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_blob_is_not_binary() {
        let blob = Blob::from_bytes("hello\nworld\n".as_bytes().to_vec());
        assert!(!blob.is_binary());
        assert_eq!(blob.as_text(), Some("hello\nworld\n"));
    }

    #[test]
    fn test_blob_with_nul_byte_is_binary() {
        let blob = Blob::from_bytes(vec![0x89, b'P', b'N', b'G', 0x00, 0x1a]);
        assert!(blob.is_binary());
    }

    #[test]
    fn test_blob_serializes_with_header() {
        let blob = Blob::from_bytes("abc".as_bytes().to_vec());
        let bytes = blob.serialize().unwrap();
        assert!(bytes.starts_with(b"blob 3\0"));
    }
}
