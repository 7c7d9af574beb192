use modem_v42bis::{Compressor, Decompressor, V42bisParams};
use proptest::prelude::*;

/// Encode `data` in `chunk`-sized pieces with a flush after each, feed every
/// encoded octet straight to the decoder, and return what comes out.
fn roundtrip_chunked(data: &[u8], chunk: usize, params: V42bisParams) -> Vec<u8> {
    let mut enc = Compressor::new(params);
    let mut dec = Decompressor::new(params);
    let mut out = Vec::with_capacity(data.len());
    for piece in data.chunks(chunk.max(1)) {
        for &b in piece {
            enc.write(b);
        }
        enc.flush();
        while let Some(octet) = enc.read() {
            dec.write(octet).unwrap();
        }
        while let Some(b) = dec.read() {
            out.push(b);
        }
    }
    out
}

fn roundtrip(data: &[u8], params: V42bisParams) -> Vec<u8> {
    roundtrip_chunked(data, data.len().max(1), params)
}

#[test]
fn long_run_compresses_and_roundtrips() {
    let params = V42bisParams::default();
    let data = vec![b'z'; 4096];
    let mut enc = Compressor::new(params);
    let mut dec = Decompressor::new(params);
    for &b in &data {
        enc.write(b);
    }
    enc.flush();
    let mut encoded = Vec::new();
    while let Some(octet) = enc.read() {
        encoded.push(octet);
    }
    assert!(
        encoded.len() < data.len() / 4,
        "encoded {} bytes from {}",
        encoded.len(),
        data.len()
    );
    for &octet in &encoded {
        dec.write(octet).unwrap();
    }
    let mut out = Vec::new();
    while let Some(b) = dec.read() {
        out.push(b);
    }
    assert_eq!(out, data);
}

#[test]
fn forced_mode_changes_roundtrip() {
    let params = V42bisParams::default();
    let mut enc = Compressor::new(params);
    let mut dec = Decompressor::new(params);
    let data = b"the quick brown fox jumps over the lazy dog";
    let mut out = Vec::new();
    // Push the encoder through compressed mode and back mid-stream.
    for (i, &b) in data.iter().enumerate() {
        if i == 10 || i == 30 {
            enc.change_mode();
        }
        enc.write(b);
    }
    enc.flush();
    while let Some(octet) = enc.read() {
        dec.write(octet).unwrap();
    }
    while let Some(b) = dec.read() {
        out.push(b);
    }
    assert_eq!(out, data);
}

#[test]
fn escape_code_cycle_stays_in_sync() {
    // Every value the rolling escape code takes on, written as plain data,
    // so both sides advance it in lockstep the whole way.
    let data: Vec<u8> = (0..=255u32).map(|i| (i * 51 % 256) as u8).collect();
    let out = roundtrip(&data, V42bisParams::default());
    assert_eq!(out, data);
}

#[test]
fn dictionary_growth_steps_up_codeword_width() {
    // Enough distinct repetitive material to allocate past 512 and 1024
    // entries while staying compressible, forcing STEPUP twice.
    let params = V42bisParams {
        max_codewords: 2048,
        max_string_length: 6,
    };
    let data: Vec<u8> = (0..=255u16)
        .flat_map(|v| std::iter::repeat(v as u8).take(16))
        .collect();
    let out = roundtrip(&data, params);
    assert_eq!(out, data);
}

proptest! {
    #[test]
    fn random_data_roundtrips(
        data in proptest::collection::vec(any::<u8>(), 0..2048),
        chunk in 1usize..64,
    ) {
        let out = roundtrip_chunked(&data, chunk, V42bisParams::default());
        prop_assert_eq!(out, data);
    }

    #[test]
    fn repetitive_data_roundtrips(
        seed in proptest::collection::vec(any::<u8>(), 1..8),
        reps in 1usize..512,
    ) {
        let data: Vec<u8> = seed.iter().copied().cycle().take(seed.len() * reps).collect();
        let out = roundtrip(&data, V42bisParams::default());
        prop_assert_eq!(out, data);
    }
}
