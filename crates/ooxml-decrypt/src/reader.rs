//! On-demand plaintext view over an `EncryptedPackage` stream.

use std::fmt;
use std::io::{self, Read, Seek, SeekFrom};

use log::trace;
use zeroize::{Zeroize, Zeroizing};

use crate::algorithm::{HashAlgorithm, AES_BLOCK_SIZE};
use crate::cipher::{aes_cbc_decrypt_in_place, aes_ecb_decrypt_in_place};
use crate::error::{DecryptError, Result};
use crate::info::ENCRYPTED_PACKAGE_HEADER_LEN;
use crate::kdf::segment_iv;

/// Plaintext bytes covered by one `EncryptedPackage` segment.
pub const SEGMENT_SIZE: usize = 0x1000;

/// How the package payload is enciphered.
pub(crate) enum SegmentCipher {
    /// Standard encryption: AES-ECB with the verified key. ECB has no chaining, so segments
    /// decrypt independently with the same key.
    StandardEcb { key: Zeroizing<Vec<u8>> },
    /// Standard encryption as some CryptoAPI producers write it: AES-CBC per segment,
    /// IV = `SHA1(verifier.salt || LE32(i))[..16]`.
    StandardCbc {
        key: Zeroizing<Vec<u8>>,
        salt: [u8; 16],
    },
    /// Agile encryption: AES-CBC per segment, IV = `Hash(keyData.salt || LE32(i))`.
    AgileCbc {
        key: Zeroizing<Vec<u8>>,
        salt: Vec<u8>,
        hash_alg: HashAlgorithm,
        block_size: usize,
    },
}

impl fmt::Debug for SegmentCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SegmentCipher::StandardEcb { key } => f
                .debug_struct("StandardEcb")
                .field("key_len", &key.len())
                .finish(),
            SegmentCipher::StandardCbc { key, salt } => f
                .debug_struct("StandardCbc")
                .field("key_len", &key.len())
                .field("salt_len", &salt.len())
                .finish(),
            SegmentCipher::AgileCbc {
                key,
                salt,
                hash_alg,
                block_size,
            } => f
                .debug_struct("AgileCbc")
                .field("key_len", &key.len())
                .field("salt_len", &salt.len())
                .field("hash_alg", hash_alg)
                .field("block_size", block_size)
                .finish(),
        }
    }
}

impl SegmentCipher {
    /// Decrypt segment `index` in place. `buf` must be block-aligned and at most
    /// [`SEGMENT_SIZE`] bytes; a shorter buffer is a prefix of the segment.
    pub(crate) fn decrypt_segment(&self, index: u64, buf: &mut [u8]) -> Result<()> {
        match self {
            SegmentCipher::StandardEcb { key } => aes_ecb_decrypt_in_place(key, buf),
            SegmentCipher::StandardCbc { key, salt } => {
                let index = segment_index_u32(index)?;
                let iv = segment_iv(salt, index, HashAlgorithm::Sha1, AES_BLOCK_SIZE);
                aes_cbc_decrypt_in_place(key, &iv, buf)
            }
            SegmentCipher::AgileCbc {
                key,
                salt,
                hash_alg,
                block_size,
            } => {
                let iv = segment_iv(salt, segment_index_u32(index)?, *hash_alg, *block_size);
                aes_cbc_decrypt_in_place(key, &iv, buf)
            }
        }
    }
}

fn segment_index_u32(index: u64) -> Result<u32> {
    u32::try_from(index)
        .map_err(|_| DecryptError::Format(format!("segment index {index} exceeds u32")))
}

/// Ciphertext bytes needed for `plaintext_len` bytes of payload.
pub(crate) fn ciphertext_len(plaintext_len: u64) -> u64 {
    plaintext_len.div_ceil(AES_BLOCK_SIZE as u64) * AES_BLOCK_SIZE as u64
}

/// A `Read + Seek` view of the decrypted package.
///
/// Decrypts one segment at a time, so memory stays bounded by [`SEGMENT_SIZE`] regardless of
/// the package size. Created by [`crate::Decryptor::get_data_stream`].
pub struct DecryptedPackageReader<R> {
    inner: R,
    cipher: SegmentCipher,
    plaintext_len: u64,
    pos: u64,
    scratch: Vec<u8>,
    cached_index: Option<u64>,
    cached: Vec<u8>,
}

impl<R> fmt::Debug for DecryptedPackageReader<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecryptedPackageReader")
            .field("cipher", &self.cipher)
            .field("plaintext_len", &self.plaintext_len)
            .field("pos", &self.pos)
            .finish_non_exhaustive()
    }
}

impl<R> DecryptedPackageReader<R> {
    /// `inner` must be the whole `EncryptedPackage` stream, size prefix included.
    pub(crate) fn new(inner: R, cipher: SegmentCipher, plaintext_len: u64) -> Self {
        Self {
            inner,
            cipher,
            plaintext_len,
            pos: 0,
            scratch: Vec::new(),
            cached_index: None,
            cached: Vec::new(),
        }
    }

    /// Size of the decrypted package in bytes.
    pub fn len(&self) -> u64 {
        self.plaintext_len
    }

    pub fn is_empty(&self) -> bool {
        self.plaintext_len == 0
    }
}

impl<R> Drop for DecryptedPackageReader<R> {
    fn drop(&mut self) {
        wipe(&mut self.cached);
        wipe(&mut self.scratch);
    }
}

fn wipe(buf: &mut Vec<u8>) {
    buf.zeroize();
    for slot in buf.spare_capacity_mut() {
        slot.write(0);
    }
}

impl<R: Read + Seek> DecryptedPackageReader<R> {
    fn load_segment(&mut self, index: u64) -> io::Result<()> {
        if self.cached_index == Some(index) {
            return Ok(());
        }

        let plain_start = index
            .checked_mul(SEGMENT_SIZE as u64)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "segment index overflow"))?;
        let plain_len = (self.plaintext_len - plain_start).min(SEGMENT_SIZE as u64);
        let cipher_len = ciphertext_len(plain_len) as usize;

        // Reuse the previous plaintext allocation; wipe it first so no plaintext survives in
        // spare capacity.
        std::mem::swap(&mut self.scratch, &mut self.cached);
        self.cached_index = None;
        wipe(&mut self.scratch);
        self.scratch.clear();
        self.scratch.resize(cipher_len, 0);

        self.inner.seek(SeekFrom::Start(
            ENCRYPTED_PACKAGE_HEADER_LEN as u64 + plain_start,
        ))?;
        self.inner.read_exact(&mut self.scratch).map_err(|err| {
            if err.kind() == io::ErrorKind::UnexpectedEof {
                io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("EncryptedPackage ciphertext ends inside segment {index}"),
                )
            } else {
                err
            }
        })?;

        trace!("decrypting segment {index} ({cipher_len} bytes)");
        self.cipher.decrypt_segment(index, &mut self.scratch)?;
        self.scratch.truncate(plain_len as usize);

        std::mem::swap(&mut self.scratch, &mut self.cached);
        self.cached_index = Some(index);
        Ok(())
    }
}

impl<R: Read + Seek> Read for DecryptedPackageReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut written = 0usize;
        while written < buf.len() && self.pos < self.plaintext_len {
            let index = self.pos / SEGMENT_SIZE as u64;
            let offset = (self.pos % SEGMENT_SIZE as u64) as usize;
            self.load_segment(index)?;

            let available = &self.cached[offset..];
            let take = available.len().min(buf.len() - written);
            buf[written..written + take].copy_from_slice(&available[..take]);
            written += take;
            self.pos += take as u64;
        }
        Ok(written)
    }
}

impl<R: Read + Seek> Seek for DecryptedPackageReader<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(off) => self.plaintext_len.checked_add_signed(off),
            SeekFrom::Current(off) => self.pos.checked_add_signed(off),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid seek to a negative or overflowing position",
            )
        })?;
        self.pos = target;
        Ok(self.pos)
    }
}
