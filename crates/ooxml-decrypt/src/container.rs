//! OLE compound-file access for encrypted OOXML documents.
//!
//! An encrypted `.docx`/`.xlsx`/`.pptx` is not a ZIP: it is a CFB container holding an
//! `EncryptionInfo` stream (the descriptor) and an `EncryptedPackage` stream (the ciphertext of
//! the original ZIP package).

use std::io::{self, Cursor, Read, Write as _};

use log::debug;

use crate::error::{DecryptError, Result};

/// CFB header signature.
pub const OLE_MAGIC: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

pub const ENCRYPTION_INFO_STREAM: &str = "EncryptionInfo";
pub const ENCRYPTED_PACKAGE_STREAM: &str = "EncryptedPackage";

/// Read-only view of a compound file held in memory.
pub struct Container<'a> {
    ole: cfb::CompoundFile<Cursor<&'a [u8]>>,
}

impl std::fmt::Debug for Container<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container").finish_non_exhaustive()
    }
}

/// Open a compound file.
pub fn open_container(bytes: &[u8]) -> Result<Container<'_>> {
    if !bytes.starts_with(&OLE_MAGIC) {
        return Err(DecryptError::Format(
            "missing OLE compound file signature".to_string(),
        ));
    }
    let ole = cfb::CompoundFile::open(Cursor::new(bytes))
        .map_err(|err| DecryptError::Format(format!("invalid OLE compound file: {err}")))?;
    Ok(Container { ole })
}

/// Returns true if `bytes` is a compound file holding both encryption streams.
pub fn is_encrypted_package(bytes: &[u8]) -> bool {
    let Ok(container) = open_container(bytes) else {
        return false;
    };
    container.has_stream(ENCRYPTION_INFO_STREAM) && container.has_stream(ENCRYPTED_PACKAGE_STREAM)
}

fn stream_path(name: &str) -> String {
    format!("/{}", name.trim_start_matches('/'))
}

fn map_stream_error(name: &str, err: io::Error) -> DecryptError {
    match err.kind() {
        io::ErrorKind::NotFound => DecryptError::Format(format!("missing stream {name}")),
        io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput | io::ErrorKind::UnexpectedEof => {
            DecryptError::Format(format!("corrupt stream {name}: {err}"))
        }
        _ => DecryptError::Io(err),
    }
}

impl<'a> Container<'a> {
    pub fn has_stream(&self, name: &str) -> bool {
        self.ole.is_stream(stream_path(name))
    }

    /// Read a whole stream into memory.
    pub fn get_stream(&mut self, name: &str) -> Result<Vec<u8>> {
        let mut stream = self.open_stream(name)?;
        let declared = stream.len();
        let mut out = Vec::new();
        stream
            .read_to_end(&mut out)
            .map_err(|err| map_stream_error(name, err))?;
        if out.len() as u64 != declared {
            return Err(DecryptError::Format(format!(
                "stream {name} declares {declared} bytes but only {} are stored",
                out.len()
            )));
        }
        debug!("read stream {name} ({} bytes)", out.len());
        Ok(out)
    }

    /// Open a stream for incremental reading.
    ///
    /// The handle reads through the container; it stops working once the container is dropped.
    pub fn open_stream(&mut self, name: &str) -> Result<cfb::Stream<Cursor<&'a [u8]>>> {
        if !self.has_stream(name) {
            return Err(DecryptError::Format(format!("missing stream {name}")));
        }
        self.ole
            .open_stream(stream_path(name))
            .map_err(|err| map_stream_error(name, err))
    }
}

/// Build an in-memory compound file holding `streams` at the root.
pub(crate) fn build_container(streams: &[(&str, &[u8])]) -> Result<Vec<u8>> {
    let mut ole = cfb::CompoundFile::create(Cursor::new(Vec::new()))?;
    for (name, bytes) in streams {
        ole.create_stream(stream_path(name))?.write_all(bytes)?;
    }
    ole.flush()?;
    Ok(ole.into_inner().into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        build_container(&[
            (ENCRYPTION_INFO_STREAM, b"info-bytes".as_slice()),
            (ENCRYPTED_PACKAGE_STREAM, &[7u8; 5000][..]),
        ])
        .unwrap()
    }

    #[test]
    fn reads_streams_by_either_spelling() {
        let bytes = sample();
        let mut container = open_container(&bytes).unwrap();
        assert_eq!(container.get_stream("EncryptionInfo").unwrap(), b"info-bytes");
        assert_eq!(
            container.get_stream("/EncryptedPackage").unwrap(),
            vec![7u8; 5000]
        );
        assert!(is_encrypted_package(&bytes));
    }

    #[test]
    fn missing_signature_is_format_error() {
        let err = open_container(b"PK\x03\x04 not an OLE file").unwrap_err();
        assert!(matches!(err, DecryptError::Format(_)));
        assert!(!is_encrypted_package(b"PK\x03\x04"));
    }

    #[test]
    fn signature_with_garbage_body_is_format_error() {
        let mut bytes = OLE_MAGIC.to_vec();
        bytes.extend_from_slice(&[0u8; 100]);
        assert!(matches!(open_container(&bytes), Err(DecryptError::Format(_))));
    }

    #[test]
    fn missing_stream_is_format_error() {
        let bytes = build_container(&[(ENCRYPTION_INFO_STREAM, b"x".as_slice())]).unwrap();
        let mut container = open_container(&bytes).unwrap();
        assert!(!container.has_stream(ENCRYPTED_PACKAGE_STREAM));
        assert!(matches!(
            container.get_stream(ENCRYPTED_PACKAGE_STREAM),
            Err(DecryptError::Format(_))
        ));
        assert!(!is_encrypted_package(&bytes));
    }

    #[test]
    fn streams_are_read_incrementally() {
        let bytes = sample();
        let mut container = open_container(&bytes).unwrap();
        let mut stream = container.open_stream(ENCRYPTED_PACKAGE_STREAM).unwrap();
        let mut head = [0u8; 10];
        stream.read_exact(&mut head).unwrap();
        assert_eq!(head, [7u8; 10]);
    }
}
