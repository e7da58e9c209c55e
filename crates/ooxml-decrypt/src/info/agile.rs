//! Agile `EncryptionInfo`: MS-OFFCRYPTO §2.3.4.10.
//!
//! The body is an XML `<encryption>` document:
//!
//! ```xml
//! <encryption xmlns="http://schemas.microsoft.com/office/2006/encryption"
//!     xmlns:p="http://schemas.microsoft.com/office/2006/keyEncryptor/password">
//!   <keyData saltSize="16" blockSize="16" keyBits="256" hashSize="64"
//!       cipherAlgorithm="AES" cipherChaining="ChainingModeCBC" hashAlgorithm="SHA512"
//!       saltValue="..."/>
//!   <dataIntegrity encryptedHmacKey="..." encryptedHmacValue="..."/>
//!   <keyEncryptors>
//!     <keyEncryptor uri="http://schemas.microsoft.com/office/2006/keyEncryptor/password">
//!       <p:encryptedKey spinCount="100000" ... encryptedKeyValue="..."/>
//!     </keyEncryptor>
//!   </keyEncryptors>
//! </encryption>
//! ```
//!
//! Only the password key encryptor is used; certificate encryptors are skipped.

use log::warn;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::algorithm::{ChainingMode, CipherAlgorithm, HashAlgorithm};
use crate::error::{DecryptError, Result};
use crate::util::decode_base64;

use super::EncryptionVersion;

/// Namespace of the password key encryptor.
pub const PASSWORD_KEY_ENCRYPTOR_NS: &str =
    "http://schemas.microsoft.com/office/2006/keyEncryptor/password";

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// `<keyData>`: parameters of the package payload cipher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgileKeyData {
    pub salt: Vec<u8>,
    pub block_size: usize,
    pub key_bits: u32,
    pub hash_size: usize,
    pub cipher_algorithm: CipherAlgorithm,
    pub chaining_mode: ChainingMode,
    pub hash_algorithm: HashAlgorithm,
}

/// `<dataIntegrity>`: encrypted HMAC key and value over the `EncryptedPackage` stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgileDataIntegrity {
    pub encrypted_hmac_key: Vec<u8>,
    pub encrypted_hmac_value: Vec<u8>,
}

/// Password `<encryptedKey>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgileEncryptedKey {
    pub spin_count: u32,
    pub salt: Vec<u8>,
    pub block_size: usize,
    pub key_bits: u32,
    pub hash_size: usize,
    pub cipher_algorithm: CipherAlgorithm,
    pub chaining_mode: ChainingMode,
    pub hash_algorithm: HashAlgorithm,
    pub encrypted_verifier_hash_input: Vec<u8>,
    pub encrypted_verifier_hash_value: Vec<u8>,
    pub encrypted_key_value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgileEncryptionInfo {
    pub version: EncryptionVersion,
    pub key_data: AgileKeyData,
    pub data_integrity: Option<AgileDataIntegrity>,
    pub encrypted_key: AgileEncryptedKey,
}

/// Attributes of one element, captured by local name and validated once the document is known
/// to be complete.
struct ElementAttrs {
    element: &'static str,
    attrs: Vec<(String, String)>,
}

impl ElementAttrs {
    fn capture(element: &'static str, e: &BytesStart<'_>) -> Result<Self> {
        let mut attrs = Vec::new();
        for attr in e.attributes().with_checks(false) {
            let attr = attr.map_err(|err| {
                DecryptError::Format(format!("invalid XML attribute on <{element}>: {err}"))
            })?;
            let key = std::str::from_utf8(local_name(attr.key.as_ref()))
                .map_err(|_| DecryptError::Format("attribute name is not UTF-8".to_string()))?
                .to_string();
            let value = std::str::from_utf8(attr.value.as_ref())
                .map_err(|_| {
                    DecryptError::Format(format!("attribute {element}.{key} is not UTF-8"))
                })?
                .to_string();
            attrs.push((key, value));
        }
        Ok(Self { element, attrs })
    }

    fn get(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    fn required(&self, name: &str) -> Result<&str> {
        self.get(name).ok_or_else(|| {
            DecryptError::Format(format!("missing attribute {}.{name}", self.element))
        })
    }

    fn u32(&self, name: &str) -> Result<u32> {
        let value = self.required(name)?;
        value.trim().parse::<u32>().map_err(|_| {
            DecryptError::Format(format!(
                "attribute {}.{name} is not a valid integer: {value:?}",
                self.element
            ))
        })
    }

    fn base64(&self, name: &str) -> Result<Vec<u8>> {
        let value = self.required(name)?;
        decode_base64(value, &format!("{}.{name}", self.element))
    }
}

/// The cipher/hash attribute group shared by `<keyData>` and `<encryptedKey>`.
struct CipherParams {
    salt: Vec<u8>,
    block_size: usize,
    key_bits: u32,
    hash_size: usize,
    cipher_algorithm: CipherAlgorithm,
    chaining_mode: ChainingMode,
    hash_algorithm: HashAlgorithm,
}

impl CipherParams {
    fn from_attrs(attrs: &ElementAttrs) -> Result<Self> {
        let element = attrs.element;
        let salt_size = attrs.u32("saltSize")? as usize;
        let block_size = attrs.u32("blockSize")? as usize;
        let key_bits = attrs.u32("keyBits")?;
        let hash_size = attrs.u32("hashSize")? as usize;
        let cipher_name = attrs.required("cipherAlgorithm")?;
        let chaining_name = attrs.required("cipherChaining")?;
        let hash_name = attrs.required("hashAlgorithm")?;
        let salt = attrs.base64("saltValue")?;

        let cipher_algorithm = CipherAlgorithm::from_xml_name(cipher_name, key_bits)?;
        let chaining_mode = ChainingMode::from_xml_name(chaining_name)?;
        let hash_algorithm = HashAlgorithm::from_xml_name(hash_name)?;

        if block_size != cipher_algorithm.block_size() {
            return Err(DecryptError::Format(format!(
                "{element}.blockSize is {block_size}, expected {} for {cipher_algorithm}",
                cipher_algorithm.block_size()
            )));
        }
        if hash_size != hash_algorithm.digest_len() {
            return Err(DecryptError::Format(format!(
                "{element}.hashSize is {hash_size}, expected {} for {hash_algorithm}",
                hash_algorithm.digest_len()
            )));
        }
        if salt.len() != salt_size {
            return Err(DecryptError::Format(format!(
                "{element}.saltValue is {} bytes but saltSize is {salt_size}",
                salt.len()
            )));
        }
        if salt.is_empty() {
            return Err(DecryptError::Format(format!("{element}.saltValue is empty")));
        }

        Ok(Self {
            salt,
            block_size,
            key_bits,
            hash_size,
            cipher_algorithm,
            chaining_mode,
            hash_algorithm,
        })
    }
}

/// Decode a base64 ciphertext attribute that must be a non-empty run of whole cipher blocks.
fn block_aligned(attrs: &ElementAttrs, name: &str, block_size: usize) -> Result<Vec<u8>> {
    let bytes = attrs.base64(name)?;
    if bytes.is_empty() || bytes.len() % block_size != 0 {
        return Err(DecryptError::Format(format!(
            "{}.{name} is {} bytes, not a whole number of {block_size}-byte blocks",
            attrs.element,
            bytes.len()
        )));
    }
    Ok(bytes)
}

#[derive(Debug)]
struct NamespaceFrame {
    decls: Vec<(Vec<u8>, Vec<u8>)>,
}

fn push_namespace_frame(stack: &mut Vec<NamespaceFrame>, e: &BytesStart<'_>) -> Result<()> {
    let mut frame = NamespaceFrame { decls: Vec::new() };
    for attr in e.attributes().with_checks(false) {
        let attr =
            attr.map_err(|err| DecryptError::Format(format!("invalid XML attribute: {err}")))?;
        let key = attr.key.as_ref();
        if key == b"xmlns" {
            frame.decls.push((Vec::new(), attr.value.to_vec()));
        } else if let Some(prefix) = key.strip_prefix(b"xmlns:") {
            frame.decls.push((prefix.to_vec(), attr.value.to_vec()));
        }
    }
    stack.push(frame);
    Ok(())
}

fn resolve_namespace<'a>(stack: &'a [NamespaceFrame], prefix: &[u8]) -> Option<&'a [u8]> {
    stack
        .iter()
        .rev()
        .flat_map(|frame| frame.decls.iter())
        .find(|(p, _)| p.as_slice() == prefix)
        .map(|(_, uri)| uri.as_slice())
}

fn element_prefix(name: &[u8]) -> &[u8] {
    name.iter()
        .rposition(|b| *b == b':')
        .map(|idx| &name[..idx])
        .unwrap_or(&[])
}

fn local_name(name: &[u8]) -> &[u8] {
    name.iter()
        .rposition(|b| *b == b':')
        .map(|idx| &name[idx + 1..])
        .unwrap_or(name)
}

#[derive(Default)]
struct Collected {
    key_data: Option<ElementAttrs>,
    data_integrity: Option<ElementAttrs>,
    password_keys: Vec<ElementAttrs>,
}

impl Collected {
    fn visit(&mut self, ns_stack: &[NamespaceFrame], e: &BytesStart<'_>) -> Result<()> {
        match e.local_name().as_ref() {
            b"keyData" if self.key_data.is_none() => {
                self.key_data = Some(ElementAttrs::capture("keyData", e)?);
            }
            b"dataIntegrity" if self.data_integrity.is_none() => {
                self.data_integrity = Some(ElementAttrs::capture("dataIntegrity", e)?);
            }
            b"encryptedKey" => {
                let name = e.name();
                let ns = resolve_namespace(ns_stack, element_prefix(name.as_ref()));
                if ns == Some(PASSWORD_KEY_ENCRYPTOR_NS.as_bytes()) {
                    self.password_keys
                        .push(ElementAttrs::capture("encryptedKey", e)?);
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// Walk the XML once, collecting the elements of interest.
///
/// Fails with a format error unless the document is well-formed and complete; a document cut
/// short inside `<keyEncryptors>` must not be mistaken for one without a password encryptor.
fn collect(xml: &str) -> Result<Collected> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut ns_stack: Vec<NamespaceFrame> = Vec::new();
    let mut collected = Collected::default();
    let mut depth = 0usize;
    let mut saw_root = false;

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|err| DecryptError::Format(format!("EncryptionInfo XML: {err}")))?;
        match event {
            Event::Start(e) => {
                push_namespace_frame(&mut ns_stack, &e)?;
                collected.visit(&ns_stack, &e)?;
                depth += 1;
                saw_root = true;
            }
            Event::Empty(e) => {
                push_namespace_frame(&mut ns_stack, &e)?;
                collected.visit(&ns_stack, &e)?;
                ns_stack.pop();
                saw_root = true;
            }
            Event::End(_) => {
                ns_stack.pop();
                depth = depth.checked_sub(1).ok_or_else(|| {
                    DecryptError::Format("unbalanced EncryptionInfo XML".to_string())
                })?;
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !saw_root || depth != 0 {
        return Err(DecryptError::Format(
            "EncryptionInfo XML document is incomplete".to_string(),
        ));
    }
    Ok(collected)
}

/// Parse the Agile encryption body (everything after the 8-byte version header).
pub(crate) fn parse(version: EncryptionVersion, bytes: &[u8]) -> Result<AgileEncryptionInfo> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let xml = std::str::from_utf8(bytes)
        .map_err(|_| DecryptError::Format("EncryptionInfo XML is not valid UTF-8".to_string()))?;
    let collected = collect(xml)?;

    let key_data_attrs = collected
        .key_data
        .ok_or_else(|| DecryptError::Format("missing <keyData> element".to_string()))?;
    let mut password_keys = collected.password_keys.into_iter();
    let encrypted_key_attrs = password_keys.next().ok_or_else(|| {
        DecryptError::UnsupportedScheme(
            "no password key encryptor (certificate-only encryption)".to_string(),
        )
    })?;
    if password_keys.next().is_some() {
        warn!("EncryptionInfo lists several password key encryptors; using the first");
    }

    let kd = CipherParams::from_attrs(&key_data_attrs)?;
    let key_data = AgileKeyData {
        salt: kd.salt,
        block_size: kd.block_size,
        key_bits: kd.key_bits,
        hash_size: kd.hash_size,
        cipher_algorithm: kd.cipher_algorithm,
        chaining_mode: kd.chaining_mode,
        hash_algorithm: kd.hash_algorithm,
    };

    let data_integrity = collected
        .data_integrity
        .map(|attrs| -> Result<AgileDataIntegrity> {
            Ok(AgileDataIntegrity {
                encrypted_hmac_key: block_aligned(&attrs, "encryptedHmacKey", key_data.block_size)?,
                encrypted_hmac_value: block_aligned(
                    &attrs,
                    "encryptedHmacValue",
                    key_data.block_size,
                )?,
            })
        })
        .transpose()?;

    let ek = CipherParams::from_attrs(&encrypted_key_attrs)?;
    let encrypted_key = AgileEncryptedKey {
        spin_count: encrypted_key_attrs.u32("spinCount")?,
        encrypted_verifier_hash_input: block_aligned(
            &encrypted_key_attrs,
            "encryptedVerifierHashInput",
            ek.block_size,
        )?,
        encrypted_verifier_hash_value: block_aligned(
            &encrypted_key_attrs,
            "encryptedVerifierHashValue",
            ek.block_size,
        )?,
        encrypted_key_value: block_aligned(
            &encrypted_key_attrs,
            "encryptedKeyValue",
            ek.block_size,
        )?,
        salt: ek.salt,
        block_size: ek.block_size,
        key_bits: ek.key_bits,
        hash_size: ek.hash_size,
        cipher_algorithm: ek.cipher_algorithm,
        chaining_mode: ek.chaining_mode,
        hash_algorithm: ek.hash_algorithm,
    };

    // The password salt doubles as the CBC IV for every verifier and key blob.
    if encrypted_key.salt.len() != encrypted_key.block_size {
        return Err(DecryptError::Format(format!(
            "encryptedKey.saltValue must be {} bytes, got {}",
            encrypted_key.block_size,
            encrypted_key.salt.len()
        )));
    }
    if encrypted_key.encrypted_key_value.len() < key_data.key_bits as usize / 8 {
        return Err(DecryptError::Format(format!(
            "encryptedKeyValue is {} bytes, shorter than the {}-bit package key",
            encrypted_key.encrypted_key_value.len(),
            key_data.key_bits
        )));
    }

    Ok(AgileEncryptionInfo {
        version,
        key_data,
        data_integrity,
        encrypted_key,
    })
}
