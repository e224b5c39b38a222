//! Synthetic dataset generator
//!
//! Development helper: synthesizes a noisy leakage dataset and writes it in
//! the binary dataset format, so the full analysis pipeline can be
//! exercised without hardware captures.
//!
//! - `sbox`: one designated sample leaks `HW(S(p ⊕ k))` plus uniform noise,
//!   the remaining samples are pure noise. CPA with the `hamming_weight`
//!   model recovers the key from a few hundred traces.
//! - `aes-128`: sample `b` leaks `HW(c[b])` plus noise — a register-output
//!   leak useful for exercising the AES code paths.
//!
//! Usage:
//!   generate_dataset --out traces.bin [--algorithm sbox|aes-128]
//!     [--traces N] [--samples S] [--key HEX] [--noise A] [--seed N]

use std::path::PathBuf;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use mysca::crypto;
use mysca::dataset::{EncryptionAlgorithm, PlaintextMode, TraceDatasetBuilder};

fn parse_flag(args: &[String], key: &str) -> Option<String> {
    let mut it = args.iter();
    while let Some(a) = it.next() {
        if a == key {
            return it.next().cloned();
        }
    }
    None
}

fn parse_key_bytes(text: &str, expected: usize) -> anyhow::Result<Vec<u8>> {
    let bytes = hex::decode(text.trim_start_matches("0x"))
        .map_err(|e| anyhow::anyhow!("key must be hex: {e}"))?;
    if bytes.len() != expected {
        anyhow::bail!("key must be {expected} byte(s), got {}", bytes.len());
    }
    Ok(bytes)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let out = PathBuf::from(
        parse_flag(&args, "--out").ok_or_else(|| anyhow::anyhow!("--out <file> is required"))?,
    );
    let algorithm = parse_flag(&args, "--algorithm").unwrap_or_else(|| "sbox".into());
    let trace_count: u32 = parse_flag(&args, "--traces").unwrap_or_else(|| "4096".into()).parse()?;
    let sample_count: u32 = parse_flag(&args, "--samples").unwrap_or_else(|| "32".into()).parse()?;
    let noise: i32 = parse_flag(&args, "--noise").unwrap_or_else(|| "2".into()).parse()?;
    let seed: u64 = parse_flag(&args, "--seed").unwrap_or_else(|| "1".into()).parse()?;

    let mut rng = StdRng::seed_from_u64(seed);
    let dataset = match algorithm.as_str() {
        "sbox" => {
            let key = parse_key_bytes(&parse_flag(&args, "--key").unwrap_or_else(|| "2a".into()), 1)?;
            let leak_sample = (sample_count / 2) as usize;
            let mut builder =
                TraceDatasetBuilder::new(EncryptionAlgorithm::SBox, PlaintextMode::Random);
            builder.num_traces = trace_count;
            builder.num_samples = sample_count;
            for _ in 0..trace_count {
                let p: u8 = rng.gen();
                let mut trace: Vec<i32> =
                    (0..sample_count).map(|_| rng.gen_range(-noise..=noise)).collect();
                trace[leak_sample] += crypto::hamming_weight(crypto::sbox(p ^ key[0])) * 4;
                builder.add_trace(&trace);
                builder.add_plaintext(&[p]);
            }
            builder.add_key(&key);
            builder.build()?
        }
        "aes-128" => {
            let key = parse_key_bytes(
                &parse_flag(&args, "--key")
                    .unwrap_or_else(|| "000102030405060708090a0b0c0d0e0f".into()),
                crypto::AES128_BLOCK_SIZE,
            )?;
            if (sample_count as usize) < crypto::AES128_BLOCK_SIZE {
                anyhow::bail!("aes-128 needs at least 16 samples");
            }
            let schedule = crypto::Aes128Key::new(
                key.as_slice().try_into().expect("validated length"),
            );
            let mut builder =
                TraceDatasetBuilder::new(EncryptionAlgorithm::Aes128, PlaintextMode::Random);
            builder.num_traces = trace_count;
            builder.num_samples = sample_count;
            for _ in 0..trace_count {
                let mut plaintext = [0u8; crypto::AES128_BLOCK_SIZE];
                rng.fill(&mut plaintext);
                let ciphertext = schedule.encrypt_block(plaintext);
                let mut trace: Vec<i32> =
                    (0..sample_count).map(|_| rng.gen_range(-noise..=noise)).collect();
                for (b, &c) in ciphertext.iter().enumerate() {
                    trace[b] += crypto::hamming_weight(c) * 4;
                }
                builder.add_trace(&trace);
                builder.add_plaintext(&plaintext);
            }
            builder.add_key(&key);
            builder.build()?
        }
        other => anyhow::bail!("unknown algorithm `{other}` (expected sbox or aes-128)"),
    };

    dataset.save(&out)?;
    let header = dataset.header();
    println!(
        "wrote {} ({} traces x {} samples, {})",
        out.display(),
        header.num_traces,
        header.num_samples,
        header.algorithm
    );
    Ok(())
}
