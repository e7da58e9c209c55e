use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine as _;

use crate::error::{DecryptError, Result};

/// Bounds-checked little-endian cursor over a borrowed buffer.
pub(crate) struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub(crate) fn remaining(&self) -> &'a [u8] {
        &self.bytes[self.pos..]
    }

    pub(crate) fn take(&mut self, n: usize, context: &str) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| DecryptError::truncated(context))?;
        let out = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    pub(crate) fn take_array<const N: usize>(&mut self, context: &str) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, context)?);
        Ok(out)
    }

    pub(crate) fn read_u16_le(&mut self, context: &str) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take_array(context)?))
    }

    pub(crate) fn read_u32_le(&mut self, context: &str) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take_array(context)?))
    }

    pub(crate) fn read_u64_le(&mut self, context: &str) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take_array(context)?))
    }
}

/// Decode a UTF-16LE string that ends at the first NUL code unit (or at the end of `bytes`).
///
/// Returns the decoded string and whether an explicit terminator was present.
pub(crate) fn decode_utf16le_nul_terminated(bytes: &[u8]) -> Result<(String, bool)> {
    if bytes.len() % 2 != 0 {
        return Err(DecryptError::Format(
            "CSP name is not a whole number of UTF-16 code units".to_string(),
        ));
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    let (end, terminated) = match units.iter().position(|u| *u == 0) {
        Some(nul) => (nul, true),
        None => (units.len(), false),
    };
    let s = String::from_utf16(&units[..end])
        .map_err(|_| DecryptError::Format("CSP name is not valid UTF-16LE".to_string()))?;
    Ok((s, terminated))
}

/// Decode a base64 attribute value.
///
/// Pretty-printed descriptors may wrap long values across lines, and some producers drop the `=`
/// padding, so whitespace is stripped and both padded and unpadded forms are accepted.
pub(crate) fn decode_base64(value: &str, attr: &str) -> Result<Vec<u8>> {
    let cleaned: Vec<u8> = value
        .bytes()
        .filter(|b| !matches!(b, b' ' | b'\t' | b'\r' | b'\n'))
        .collect();
    STANDARD
        .decode(&cleaned)
        .or_else(|_| STANDARD_NO_PAD.decode(&cleaned))
        .map_err(|_| DecryptError::Format(format!("invalid base64 in attribute {attr}")))
}

/// UTF-16LE encoding of `password`, no BOM and no terminator.
pub(crate) fn password_to_utf16le(password: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(password.len().saturating_mul(2));
    for unit in password.encode_utf16() {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out
}

/// Checked conversion of a declared stream size into an in-memory length.
pub(crate) fn checked_len(size: u64, what: &str) -> Result<usize> {
    usize::try_from(size)
        .map_err(|_| DecryptError::Format(format!("{what} {size} does not fit in memory")))
}
