#![cfg(not(target_arch = "wasm32"))]

use proptest::prelude::*;
use rand::{rngs::StdRng, SeedableRng as _};

use ooxml_decrypt::{
    encrypt_package_with_rng, is_encrypted_package, open_container, parse,
    parse_encrypted_package_header, CipherAlgorithm, DecryptError, EncryptOptions,
    EncryptionScheme, HashAlgorithm,
};

fn next_u64(state: &mut u64) -> u64 {
    // Deterministic LCG (PCG32 multiplier/increment, no output permutation).
    *state = state
        .wrapping_mul(6364136223846793005)
        .wrapping_add(1442695040888963407);
    *state
}

fn writer_info(scheme: EncryptionScheme) -> Vec<u8> {
    let opts = EncryptOptions {
        scheme,
        cipher: CipherAlgorithm::Aes256,
        hash_algorithm: HashAlgorithm::Sha512,
        spin_count: 1,
    };
    let mut rng = StdRng::from_seed([4u8; 32]);
    encrypt_package_with_rng(b"PK", "pw", &opts, &mut rng)
        .unwrap()
        .0
}

#[test]
fn every_truncation_of_standard_info_is_format_error() {
    let info = writer_info(EncryptionScheme::Standard);
    assert!(parse(&info).is_ok());
    for len in 0..info.len() {
        let err = parse(&info[..len]).unwrap_err();
        assert!(matches!(err, DecryptError::Format(_)), "len={len}: {err}");
    }
}

#[test]
fn every_truncation_of_agile_info_is_format_error() {
    let info = writer_info(EncryptionScheme::Agile);
    assert!(parse(&info).is_ok());
    for len in 0..info.len() {
        let err = parse(&info[..len]).unwrap_err();
        assert!(matches!(err, DecryptError::Format(_)), "len={len}: {err}");
    }
}

#[test]
fn parsers_are_panic_free_on_pseudorandom_inputs() {
    let mut state = 0x0123_4567_89ab_cdef;
    let headers: [&[u8]; 3] = [&[], &[4, 0, 2, 0, 0x24, 0, 0, 0], &[4, 0, 4, 0, 0x40, 0, 0, 0]];

    for round in 0..1024 {
        let len = (next_u64(&mut state) as usize) % 4096;
        let mut buf = headers[round % headers.len()].to_vec();
        buf.extend((0..len).map(|_| (next_u64(&mut state) >> 56) as u8));

        assert!(
            std::panic::catch_unwind(|| {
                let _ = parse(&buf);
                let _ = parse_encrypted_package_header(&buf);
                let _ = is_encrypted_package(&buf);
            })
            .is_ok(),
            "parser panicked on len={}",
            buf.len()
        );
    }
}

#[test]
fn plain_zip_is_not_an_encrypted_package() {
    let err = open_container(b"PK\x03\x04\x14\x00\x00\x00").unwrap_err();
    assert!(matches!(err, DecryptError::Format(_)));
    assert!(!is_encrypted_package(b"PK\x03\x04"));
    assert!(!is_encrypted_package(b""));
}

#[test]
fn agile_xml_with_garbage_after_header_is_format_error() {
    let mut info = vec![4, 0, 4, 0, 0x40, 0, 0, 0];
    info.extend_from_slice(b"<encryption><keyData");
    assert!(matches!(parse(&info), Err(DecryptError::Format(_))));

    let mut info = vec![4, 0, 4, 0, 0x40, 0, 0, 0];
    info.extend_from_slice(&[0xff, 0xfe, 0x00, 0x3c]);
    assert!(matches!(parse(&info), Err(DecryptError::Format(_))));
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        max_shrink_iters: 0,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_flipped_bytes_never_panic(
        scheme in prop_oneof![Just(EncryptionScheme::Standard), Just(EncryptionScheme::Agile)],
        flips in proptest::collection::vec((any::<prop::sample::Index>(), any::<u8>()), 1..8),
    ) {
        let mut info = writer_info(scheme);
        for (index, value) in flips {
            let i = index.index(info.len());
            info[i] ^= value;
        }
        // Any outcome is fine as long as it is a value, not a panic.
        let _ = parse(&info);
    }

    #[test]
    fn prop_package_header_reads_first_eight_bytes(bytes in proptest::collection::vec(any::<u8>(), 0..32)) {
        let parsed = parse_encrypted_package_header(&bytes);
        if bytes.len() >= 8 {
            let expected = u64::from_le_bytes(bytes[..8].try_into().unwrap());
            prop_assert_eq!(parsed.unwrap(), expected);
        } else {
            prop_assert!(matches!(parsed, Err(DecryptError::Format(_))));
        }
    }
}
