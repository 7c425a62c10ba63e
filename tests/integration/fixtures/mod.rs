// Test fixtures with known measurement files and expected outputs

#![allow(dead_code)]

/// Three records over two stations
pub const SIMPLE_INPUT: &str = "X;10.0\nY;20.5\nX;30.0\n";

/// Expected output for SIMPLE_INPUT
pub const SIMPLE_EXPECTED: &str = "{X=10.0/20.0/30.0, Y=20.5/20.5/20.5}";

/// A line without a delimiter between two valid records
pub const MALFORMED_INPUT: &str = "A;1.0\nBADLINE\nA;3.0\n";

/// Expected output for MALFORMED_INPUT
pub const MALFORMED_EXPECTED: &str = "{A=1.0/2.0/3.0}";

/// Every kind of bad line the parser rejects, mixed with good ones
pub const MIXED_MALFORMED_INPUT: &str = "Oslo;-3.5\nno delimiter here\n;4.0\nOslo;\nOslo;cold\nLima;19.0\nOslo;1.5\n";

/// Expected output for MIXED_MALFORMED_INPUT
pub const MIXED_MALFORMED_EXPECTED: &str = "{Lima=19.0/19.0/19.0, Oslo=-3.5/-1.0/1.5}";

/// Records whose names contain multi-byte UTF-8, so chunk edges can land mid-character
pub const UNICODE_INPUT: &str = "Zürich;9.1\nSão Paulo;25.5\nReykjavík;-2.3\nZürich;-0.9\nBogotá;14.0\n";

/// Expected output for UNICODE_INPUT
pub const UNICODE_EXPECTED: &str =
    "{Bogotá=14.0/14.0/14.0, Reykjavík=-2.3/-2.3/-2.3, São Paulo=25.5/25.5/25.5, Zürich=-0.9/4.1/9.1}";

/// Deterministic pseudo-random measurements for invariance tests
pub fn generate_measurements(records: usize, stations: usize, seed: u64) -> String {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    let mut rng = StdRng::seed_from_u64(seed);
    let mut result = String::with_capacity(records * 16);

    for _ in 0..records {
        let station = rng.random_range(0..stations);
        let value: i64 = rng.random_range(-999..=999);
        let sign = if value < 0 { "-" } else { "" };
        result.push_str(&format!(
            "station-{};{}{}.{}\n",
            station,
            sign,
            value.abs() / 10,
            value.abs() % 10
        ));
    }

    result
}
