//! C2: distribution generators — `KeySize`, `ValueSize`, `KeyGen(records)`,
//! `InterArrival(lambda)`. Each produces a value on demand from a
//! per-connection seeded RNG, injected at construction so runs are
//! reproducible.

use rand::rngs::StdRng;
use rand::Rng;

use crate::error::PacerError;

/// Parsed shape of a named distribution string, shared by size and
/// inter-arrival generators. `name` or `name:params` — e.g. `fixed:100`,
/// `uniform:10,20`, `exponential`.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Shape {
    Fixed(f64),
    Uniform { low: f64, high: f64 },
    Exponential,
}

fn parse_shape(spec: &str) -> Result<Shape, PacerError> {
    let mut parts = spec.splitn(2, ':');
    let name = parts.next().unwrap_or("").trim();
    let params = parts.next();

    match name {
        "fixed" => {
            let value: f64 = params
                .ok_or_else(|| PacerError::ConfigInvalid(format!("fixed distribution requires a value: {spec}")))?
                .parse()
                .map_err(|_| PacerError::ConfigInvalid(format!("invalid fixed value: {spec}")))?;
            Ok(Shape::Fixed(value))
        }
        "uniform" => {
            let params = params.ok_or_else(|| {
                PacerError::ConfigInvalid(format!("uniform distribution requires min,max: {spec}"))
            })?;
            let (low, high) = params
                .split_once(',')
                .ok_or_else(|| PacerError::ConfigInvalid(format!("invalid uniform range: {spec}")))?;
            let low: f64 = low
                .trim()
                .parse()
                .map_err(|_| PacerError::ConfigInvalid(format!("invalid uniform min: {spec}")))?;
            let high: f64 = high
                .trim()
                .parse()
                .map_err(|_| PacerError::ConfigInvalid(format!("invalid uniform max: {spec}")))?;
            if low > high {
                return Err(PacerError::ConfigInvalid(format!(
                    "uniform min > max: {spec}"
                )));
            }
            Ok(Shape::Uniform { low, high })
        }
        "exponential" => Ok(Shape::Exponential),
        other => Err(PacerError::ConfigInvalid(format!(
            "unknown distribution: {other}"
        ))),
    }
}

fn sample(shape: Shape, mean: f64, rng: &mut StdRng) -> f64 {
    match shape {
        Shape::Fixed(v) => v,
        Shape::Uniform { low, high } => {
            if low == high {
                low
            } else {
                rng.gen_range(low..=high)
            }
        }
        Shape::Exponential => {
            // Inverse-CDF sampling: -mean * ln(1 - u), u drawn from (0, 1].
            let u: f64 = rng.gen_range(f64::EPSILON..=1.0);
            -mean * u.ln()
        }
    }
}

/// A byte-size distribution (`keysize`/`valuesize` options). Generates a
/// size in bytes on demand.
pub struct SizeDistribution {
    shape: Shape,
}

impl SizeDistribution {
    pub fn parse(spec: &str) -> Result<Self, PacerError> {
        Ok(Self {
            shape: parse_shape(spec)?,
        })
    }

    pub fn generate(&self, rng: &mut StdRng) -> usize {
        // Mean is irrelevant for size distributions: Fixed/Uniform carry
        // their own scale, Exponential falls back to a byte-reasonable mean.
        sample(self.shape, 16.0, rng).round().max(0.0) as usize
    }
}

/// Inter-arrival time generator (`ia` + `lambda` options). `lambda <= 0`
/// means "as fast as possible": every draw returns zero.
pub struct InterArrival {
    shape: Shape,
    mean: f64,
    as_fast_as_possible: bool,
}

impl InterArrival {
    pub fn new(name: &str, lambda: f64) -> Result<Self, PacerError> {
        if lambda <= 0.0 {
            return Ok(Self {
                shape: Shape::Fixed(0.0),
                mean: 0.0,
                as_fast_as_possible: true,
            });
        }
        let shape = parse_shape(name)?;
        Ok(Self {
            shape,
            mean: 1.0 / lambda,
            as_fast_as_possible: false,
        })
    }

    pub fn next(&self, rng: &mut StdRng) -> f64 {
        if self.as_fast_as_possible {
            return 0.0;
        }
        sample(self.shape, self.mean, rng).max(0.0)
    }
}

/// Keyspace generator: maps an index in `[0, records)` to a key byte
/// string, padded/truncated to a length drawn from the `keysize`
/// distribution (clamped to the 255-byte `Operation::key` limit).
pub struct KeyGenerator {
    records: u64,
    keysize: SizeDistribution,
}

const MAX_KEY_LEN: usize = 255;

impl KeyGenerator {
    pub fn new(records: u64, keysize: SizeDistribution) -> Self {
        Self { records, keysize }
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn generate(&self, index: u64, rng: &mut StdRng) -> Vec<u8> {
        let base = format!("key{index:010}");
        let target_len = self.keysize.generate(rng).clamp(1, MAX_KEY_LEN);

        let mut key = base.into_bytes();
        key.truncate(target_len);
        while key.len() < target_len {
            key.push(b'0');
        }
        key
    }
}
