use anyhow::{Context, Result};
use std::path::Path;

/// Create `path` and its parents if missing
pub fn ensure_dir<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();
    std::fs::create_dir_all(path)
        .with_context(|| format!("Failed to create directory: {:?}", path))
}

/// Wall time as `42.0s`, `3m 05s` or `1h 02m`
pub fn format_duration(secs: f64) -> String {
    let whole = secs.max(0.0) as u64;
    match whole {
        0..=59 => format!("{:.1}s", secs.max(0.0)),
        60..=3599 => format!("{}m {:02}s", whole / 60, whole % 60),
        _ => format!("{}h {:02}m", whole / 3600, (whole % 3600) / 60),
    }
}

/// Seeded randomness for splits and batch order
pub mod random {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    /// ChaCha8 stream fixed by `seed`
    pub fn seeded_rng(seed: u64) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(seed)
    }
}
