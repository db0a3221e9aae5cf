// Signing & verification benchmarks for purchase transactions.
//
// Covers keypair generation, hash signing and recovery, full transaction
// signing (canonical encode + hash + sign) and verification.

use criterion::{criterion_group, criterion_main, Criterion};

use purchase_protocol::crypto::hash::{blake3_hash, phone_hash, Hash};
use purchase_protocol::crypto::keys::Keypair;
use purchase_protocol::crypto::signatures::sign_hash;
use purchase_protocol::transaction::{
    sign_transaction, verify_transaction, Amount, NewTransactionBuilder, PurchaseDetails,
    Transaction,
};

fn sample_purchase(sequence: u64) -> Transaction {
    NewTransactionBuilder::new(sequence, format!("P{sequence:08}"))
        .timestamp(1_700_000_000)
        .amounts(Amount::from(120_000u64), Amount::from(100_000u64))
        .currency("krw")
        .shop_id(Hash::new(blake3_hash(b"shop-0001")))
        .phone_hash(phone_hash("08201012341234"))
        .detail(PurchaseDetails::new("PD001", Amount::from(100_000u64), 10))
        .detail(PurchaseDetails::new("PD002", Amount::from(20_000u64), 5))
        .build()
}

fn bench_keypair_generation(c: &mut Criterion) {
    c.bench_function("ed25519/keypair_generate", |b| {
        b.iter(Keypair::generate);
    });
}

fn bench_sign_hash(c: &mut Criterion) {
    let keypair = Keypair::generate();
    let hash = Hash::new(blake3_hash(b"purchase P00000042"));

    c.bench_function("ed25519/sign_hash", |b| {
        b.iter(|| sign_hash(&keypair, &hash));
    });
}

fn bench_recover(c: &mut Criterion) {
    let keypair = Keypair::generate();
    let hash = Hash::new(blake3_hash(b"purchase P00000042"));
    let signature = sign_hash(&keypair, &hash);

    c.bench_function("ed25519/recover", |b| {
        b.iter(|| signature.recover(&hash));
    });
}

fn bench_sign_transaction(c: &mut Criterion) {
    let keypair = Keypair::generate();
    let tx = sample_purchase(42);

    c.bench_function("transaction/sign", |b| {
        b.iter(|| sign_transaction(&tx, &keypair));
    });
}

fn bench_verify_transaction(c: &mut Criterion) {
    let keypair = Keypair::generate();
    let signed = sign_transaction(&sample_purchase(42), &keypair);
    let address = keypair.address();

    c.bench_function("transaction/verify", |b| {
        b.iter(|| verify_transaction(&signed, Some(&address)));
    });
}

criterion_group!(
    benches,
    bench_keypair_generation,
    bench_sign_hash,
    bench_recover,
    bench_sign_transaction,
    bench_verify_transaction,
);
criterion_main!(benches);
