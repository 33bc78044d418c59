use criterion::{black_box, criterion_group, criterion_main, Criterion};
use keyguard_crypto::{Cipher, KdfParams};
use keyguard_types::KeyType;

fn ed25519_sign_bench(c: &mut Criterion) {
    let (_, secret) = keyguard_crypto::generate_keypair(KeyType::Ed25519).unwrap();
    let msg = [42u8; 128];

    c.bench_function("ed25519_sign_128B", |b| {
        b.iter(|| keyguard_crypto::sign(KeyType::Ed25519, secret.as_bytes(), black_box(&msg)))
    });
}

fn secp256k1_verify_bench(c: &mut Criterion) {
    let (public, secret) = keyguard_crypto::generate_keypair(KeyType::Secp256k1).unwrap();
    let msg = [42u8; 128];
    let sig = keyguard_crypto::sign(KeyType::Secp256k1, secret.as_bytes(), &msg).unwrap();

    c.bench_function("secp256k1_verify_128B", |b| {
        b.iter(|| {
            keyguard_crypto::verify(
                KeyType::Secp256k1,
                public.as_bytes(),
                black_box(&msg),
                sig.as_bytes(),
            )
        })
    });
}

fn seal_bench(c: &mut Criterion) {
    let key = [7u8; 32];
    let secret = [0xABu8; 32];

    c.bench_function("aes256gcm_seal_32B", |b| {
        b.iter(|| keyguard_crypto::seal(Cipher::Aes256Gcm, &key, black_box(&secret)))
    });
    c.bench_function("chacha20poly1305_seal_32B", |b| {
        b.iter(|| keyguard_crypto::seal(Cipher::ChaCha20Poly1305, &key, black_box(&secret)))
    });
}

fn argon2_light_bench(c: &mut Criterion) {
    let salt = [1u8; 32];
    let params = KdfParams::light();

    c.bench_function("argon2id_light", |b| {
        b.iter(|| keyguard_crypto::derive_key(black_box(b"passphrase"), &salt, &params))
    });
}

fn bls_aggregate_bench(c: &mut Criterion) {
    let sigs: Vec<_> = (0..5)
        .map(|_| {
            let (_, sk) = keyguard_crypto::bls_generate_keypair().unwrap();
            keyguard_crypto::bls_sign(sk.as_bytes(), b"tx").unwrap()
        })
        .collect();
    let refs: Vec<&[u8]> = sigs.iter().map(|s| s.as_bytes()).collect();

    c.bench_function("bls_aggregate_5", |b| {
        b.iter(|| keyguard_crypto::bls_aggregate(black_box(&refs)))
    });
}

criterion_group!(
    benches,
    ed25519_sign_bench,
    secp256k1_verify_bench,
    seal_bench,
    argon2_light_bench,
    bls_aggregate_bench,
);
criterion_main!(benches);
