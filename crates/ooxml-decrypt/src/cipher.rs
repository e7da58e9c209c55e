//! AES primitives without padding.
//!
//! Every MS-OFFCRYPTO AES buffer is pre-padded to a whole number of blocks, and the caller
//! truncates the plaintext to a length stored elsewhere in the format, so none of these helpers
//! add or strip padding.

use aes::cipher::{
    block_padding::NoPadding, generic_array::GenericArray, BlockCipher, BlockDecrypt,
    BlockDecryptMut, BlockEncrypt, BlockEncryptMut, KeyInit, KeyIvInit,
};
use aes::{Aes128, Aes192, Aes256};

use crate::algorithm::AES_BLOCK_SIZE;
use crate::error::{DecryptError, Result};

fn invalid_key(len: usize) -> DecryptError {
    DecryptError::UnsupportedScheme(format!(
        "invalid AES key length {len} bytes (expected 16, 24, or 32)"
    ))
}

fn check_aligned(buf: &[u8]) -> Result<()> {
    if buf.len() % AES_BLOCK_SIZE != 0 {
        return Err(DecryptError::Format(format!(
            "ciphertext length {} is not a multiple of the AES block size",
            buf.len()
        )));
    }
    Ok(())
}

fn check_iv(iv: &[u8]) -> Result<()> {
    if iv.len() != AES_BLOCK_SIZE {
        return Err(DecryptError::Format(format!(
            "invalid AES-CBC IV length {} (expected {AES_BLOCK_SIZE})",
            iv.len()
        )));
    }
    Ok(())
}

macro_rules! dispatch_aes {
    ($key:expr, $f:ident ( $($arg:expr),* )) => {
        match $key.len() {
            16 => $f::<Aes128>($($arg),*),
            24 => $f::<Aes192>($($arg),*),
            32 => $f::<Aes256>($($arg),*),
            other => Err(invalid_key(other)),
        }
    };
}

/// Decrypt `buf` in place with AES-ECB.
pub fn aes_ecb_decrypt_in_place(key: &[u8], buf: &mut [u8]) -> Result<()> {
    fn run<C: BlockDecrypt + KeyInit>(key: &[u8], buf: &mut [u8]) -> Result<()> {
        let cipher = C::new_from_slice(key).map_err(|_| invalid_key(key.len()))?;
        for block in buf.chunks_exact_mut(AES_BLOCK_SIZE) {
            cipher.decrypt_block(GenericArray::from_mut_slice(block));
        }
        Ok(())
    }

    check_aligned(buf)?;
    dispatch_aes!(key, run(key, buf))
}

/// Encrypt `buf` in place with AES-ECB.
pub fn aes_ecb_encrypt_in_place(key: &[u8], buf: &mut [u8]) -> Result<()> {
    fn run<C: BlockEncrypt + KeyInit>(key: &[u8], buf: &mut [u8]) -> Result<()> {
        let cipher = C::new_from_slice(key).map_err(|_| invalid_key(key.len()))?;
        for block in buf.chunks_exact_mut(AES_BLOCK_SIZE) {
            cipher.encrypt_block(GenericArray::from_mut_slice(block));
        }
        Ok(())
    }

    check_aligned(buf)?;
    dispatch_aes!(key, run(key, buf))
}

/// Decrypt `buf` in place with AES-CBC.
pub fn aes_cbc_decrypt_in_place(key: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<()> {
    fn run<C: BlockCipher + BlockDecryptMut + KeyInit>(
        key: &[u8],
        iv: &[u8],
        buf: &mut [u8],
    ) -> Result<()> {
        let dec = cbc::Decryptor::<C>::new_from_slices(key, iv)
            .map_err(|_| invalid_key(key.len()))?;
        let len = buf.len();
        dec.decrypt_padded_mut::<NoPadding>(buf).map_err(|_| {
            DecryptError::Format(format!("AES-CBC decryption failed for {len} bytes"))
        })?;
        Ok(())
    }

    check_iv(iv)?;
    check_aligned(buf)?;
    if buf.is_empty() {
        return Ok(());
    }
    dispatch_aes!(key, run(key, iv, buf))
}

/// Encrypt `buf` in place with AES-CBC.
pub fn aes_cbc_encrypt_in_place(key: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<()> {
    fn run<C: BlockCipher + BlockEncryptMut + KeyInit>(
        key: &[u8],
        iv: &[u8],
        buf: &mut [u8],
    ) -> Result<()> {
        let enc = cbc::Encryptor::<C>::new_from_slices(key, iv)
            .map_err(|_| invalid_key(key.len()))?;
        let len = buf.len();
        enc.encrypt_padded_mut::<NoPadding>(buf, len).map_err(|_| {
            DecryptError::Format(format!("AES-CBC encryption failed for {len} bytes"))
        })?;
        Ok(())
    }

    check_iv(iv)?;
    check_aligned(buf)?;
    if buf.is_empty() {
        return Ok(());
    }
    dispatch_aes!(key, run(key, iv, buf))
}

/// Copying variant of [`aes_cbc_decrypt_in_place`].
pub fn aes_cbc_decrypt(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    let mut out = ciphertext.to_vec();
    aes_cbc_decrypt_in_place(key, iv, &mut out)?;
    Ok(out)
}
