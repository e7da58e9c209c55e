#![no_main]

use std::io::Read;

use libfuzzer_sys::fuzz_target;
use ooxml_decrypt::{DecryptOptions, Decryptor, EncryptionScheme};

const MAX_INPUT_BYTES: usize = 1024 * 1024;
/// Keep password hashing cheap; fuzzed descriptors routinely claim huge spin counts.
const MAX_FUZZ_SPIN_COUNT: u32 = 1_000;

fuzz_target!(|data: &[u8]| {
    if data.len() > MAX_INPUT_BYTES {
        return;
    }
    let Ok(mut container) = ooxml_decrypt::open_container(data) else {
        return;
    };
    let Ok(info) = container.get_stream("EncryptionInfo") else {
        return;
    };
    let Ok(descriptor) = ooxml_decrypt::parse(&info) else {
        return;
    };
    // Standard always hashes 50,000 rounds; too slow per fuzz iteration.
    if descriptor.scheme() != EncryptionScheme::Agile {
        return;
    }

    let options = DecryptOptions {
        max_spin_count: MAX_FUZZ_SPIN_COUNT,
        verify_integrity: data.first().is_some_and(|b| b & 1 == 1),
    };
    let mut decryptor = Decryptor::with_options(descriptor, options);
    if !matches!(decryptor.verify_password(""), Ok(true)) {
        return;
    }

    let _ = decryptor.decrypt_container(&mut container);
    if let Ok(stream) = container.open_stream("EncryptedPackage") {
        if let Ok(mut reader) = decryptor.get_data_stream(stream) {
            let mut buf = [0u8; 4096];
            let _ = reader.read(&mut buf);
        }
    }
});
