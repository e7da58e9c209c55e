#![no_main]

use libfuzzer_sys::fuzz_target;

/// Real `EncryptionInfo` streams are a few KiB; larger inputs only slow the XML walk down.
const MAX_INPUT_BYTES: usize = 64 * 1024;

fuzz_target!(|data: &[u8]| {
    let data = if data.len() > MAX_INPUT_BYTES {
        &data[..MAX_INPUT_BYTES]
    } else {
        data
    };

    let _ = ooxml_decrypt::parse_encrypted_package_header(data);

    // Steer half the inputs into each scheme's parser by forcing the version header.
    let mut forced = Vec::with_capacity(data.len() + 8);
    match data.first().copied().unwrap_or(0) & 0b11 {
        0 => forced.extend_from_slice(&[4, 0, 4, 0, 0x40, 0, 0, 0]),
        1 => forced.extend_from_slice(&[4, 0, 2, 0, 0x24, 0, 0, 0]),
        _ => {}
    }
    forced.extend_from_slice(data);

    if let Ok(descriptor) = ooxml_decrypt::parse(&forced) {
        // Accessors must be total over anything the parser accepts.
        let _ = descriptor.scheme();
        let _ = descriptor.cipher_algorithm();
        let _ = descriptor.hash_algorithm();
        let _ = descriptor.key_size_bits();
        let _ = descriptor.block_size();
        let _ = descriptor.csp_name();
    }
});
