//! Password verification and decryption of encrypted OOXML documents (MS-OFFCRYPTO).
//!
//! A password-protected `.docx`/`.xlsx`/`.pptx` is an OLE compound file holding two streams:
//! `EncryptionInfo` (how the package was encrypted) and `EncryptedPackage` (the encrypted ZIP).
//! This crate supports:
//! - *Standard* encryption (binary `EncryptionInfo`, versions 2.2/3.2/4.2, AES + SHA-1)
//! - *Agile* encryption (XML `EncryptionInfo`, version 4.4, AES + SHA-1/256/384/512), password
//!   key encryptor only
//!
//! The output is the original ZIP package bytes; reading the package is left to the caller.
//!
//! ```no_run
//! use ooxml_decrypt::{open_container, parse, Decryptor};
//!
//! # fn main() -> ooxml_decrypt::Result<()> {
//! let bytes = std::fs::read("protected.docx")?;
//! let mut container = open_container(&bytes)?;
//! let descriptor = parse(&container.get_stream("EncryptionInfo")?)?;
//!
//! let mut decryptor = Decryptor::new(descriptor);
//! if decryptor.verify_password("secret")? {
//!     let zip_bytes = decryptor.decrypt_container(&mut container)?;
//!     assert!(zip_bytes.starts_with(b"PK"));
//! }
//! # Ok(())
//! # }
//! ```

pub mod algorithm;
mod cipher;
pub mod container;
mod decryptor;
mod error;
pub mod info;
pub mod kdf;
mod reader;
mod util;
mod writer;

pub use crate::algorithm::{ChainingMode, CipherAlgorithm, HashAlgorithm, HashOutput};
pub use crate::container::{is_encrypted_package, open_container, Container};
pub use crate::decryptor::{DecryptOptions, Decryptor};
pub use crate::error::{DecryptError, ErrorKind, Result};
pub use crate::info::{
    parse, parse_encrypted_package_header, EncryptionDescriptor, EncryptionScheme,
    EncryptionVersion,
};
pub use crate::reader::{DecryptedPackageReader, SEGMENT_SIZE};
pub use crate::writer::{
    encrypt_package, encrypt_package_with_rng, encrypt_to_container, EncryptOptions,
};

use crate::container::{ENCRYPTED_PACKAGE_STREAM, ENCRYPTION_INFO_STREAM};

/// Decrypt an encrypted OOXML compound file in one call.
///
/// Unlike [`Decryptor::verify_password`], a wrong password here is an error
/// ([`DecryptError::InvalidPassword`]), since the caller asked for plaintext.
pub fn decrypt_from_bytes(ole_bytes: &[u8], password: &str) -> Result<Vec<u8>> {
    let mut container = open_container(ole_bytes)?;
    let descriptor = parse(&container.get_stream(ENCRYPTION_INFO_STREAM)?)?;
    let mut decryptor = Decryptor::new(descriptor);
    if !decryptor.verify_password(password)? {
        return Err(DecryptError::InvalidPassword);
    }
    let encrypted_package = container.get_stream(ENCRYPTED_PACKAGE_STREAM)?;
    decryptor.decrypt_package(&encrypted_package)
}
