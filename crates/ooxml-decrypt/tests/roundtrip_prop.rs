#![cfg(not(target_arch = "wasm32"))]

use std::io::{Cursor, Read, Seek, SeekFrom};

use proptest::prelude::*;
use rand::{rngs::StdRng, SeedableRng as _};

use ooxml_decrypt::{
    encrypt_package_with_rng, parse, CipherAlgorithm, Decryptor, EncryptOptions, EncryptionScheme,
    HashAlgorithm,
};

fn arb_options() -> impl Strategy<Value = EncryptOptions> {
    (
        prop_oneof![
            Just(CipherAlgorithm::Aes128),
            Just(CipherAlgorithm::Aes192),
            Just(CipherAlgorithm::Aes256),
        ],
        prop_oneof![
            Just(HashAlgorithm::Sha1),
            Just(HashAlgorithm::Sha256),
            Just(HashAlgorithm::Sha384),
            Just(HashAlgorithm::Sha512),
        ],
        1u32..20,
    )
        .prop_map(|(cipher, hash_algorithm, spin_count)| EncryptOptions {
            scheme: EncryptionScheme::Agile,
            cipher,
            hash_algorithm,
            spin_count,
        })
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 32,
        max_shrink_iters: 0,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_agile_roundtrip(
        opts in arb_options(),
        plaintext in proptest::collection::vec(any::<u8>(), 0..=12_000),
        password in "[ -~]{0,16}",
        seed in any::<[u8; 32]>(),
    ) {
        let mut rng = StdRng::from_seed(seed);
        let (info, package) = encrypt_package_with_rng(&plaintext, &password, &opts, &mut rng).unwrap();

        let mut decryptor = Decryptor::new(parse(&info).unwrap());
        prop_assert!(decryptor.verify_password(&password).unwrap());
        prop_assert!(decryptor.verify_integrity(&package).unwrap());
        prop_assert_eq!(decryptor.decrypt_package(&package).unwrap(), plaintext);
    }

    #[test]
    fn prop_stream_random_access_matches_plaintext(
        plaintext in proptest::collection::vec(any::<u8>(), 1..=10_000),
        offsets in proptest::collection::vec((any::<prop::sample::Index>(), 1usize..600), 1..6),
    ) {
        let opts = EncryptOptions { spin_count: 1, ..EncryptOptions::default() };
        let mut rng = StdRng::from_seed([5u8; 32]);
        let (info, package) = encrypt_package_with_rng(&plaintext, "pw", &opts, &mut rng).unwrap();

        let mut decryptor = Decryptor::new(parse(&info).unwrap());
        prop_assert!(decryptor.verify_password("pw").unwrap());
        let mut reader = decryptor.get_data_stream(Cursor::new(package.as_slice())).unwrap();

        for (index, len) in offsets {
            let start = index.index(plaintext.len());
            let end = (start + len).min(plaintext.len());
            reader.seek(SeekFrom::Start(start as u64)).unwrap();
            let mut buf = vec![0u8; end - start];
            reader.read_exact(&mut buf).unwrap();
            prop_assert_eq!(&buf[..], &plaintext[start..end]);
        }
    }
}

proptest! {
    // Standard always hashes 50,000 rounds, so keep the case count low.
    #![proptest_config(ProptestConfig {
        cases: 6,
        max_shrink_iters: 0,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_standard_roundtrip(
        cipher in prop_oneof![
            Just(CipherAlgorithm::Aes128),
            Just(CipherAlgorithm::Aes192),
            Just(CipherAlgorithm::Aes256),
        ],
        body in proptest::collection::vec(any::<u8>(), 0..=9_000),
        seed in any::<[u8; 32]>(),
    ) {
        // Standard payloads are ZIP packages; the reader keys its cipher-mode choice off `PK`.
        let mut plaintext = b"PK".to_vec();
        plaintext.extend_from_slice(&body);
        let opts = EncryptOptions {
            scheme: EncryptionScheme::Standard,
            cipher,
            ..EncryptOptions::default()
        };
        let mut rng = StdRng::from_seed(seed);
        let (info, package) = encrypt_package_with_rng(&plaintext, "pw", &opts, &mut rng).unwrap();

        let mut decryptor = Decryptor::new(parse(&info).unwrap());
        prop_assert!(decryptor.verify_password("pw").unwrap());
        prop_assert_eq!(decryptor.decrypt_package(&package).unwrap(), plaintext);
    }
}
