//! Recognized option set. Validation lives here rather than at every call
//! site, centralizing validity checks before they reach a dispatcher.

use crate::error::PacerError;

#[derive(Debug, Clone)]
pub struct Options {
    /// Keyspace size (distinct keys).
    pub records: u64,
    /// Max outstanding ops per connection (>= 1).
    pub depth: usize,
    /// Mean arrivals/sec; `<= 0` means as-fast-as-possible.
    pub lambda: f64,
    /// Name of the inter-arrival distribution (e.g. `exponential`, `fixed:0.001`).
    pub ia: String,
    /// Name of the key-size distribution.
    pub keysize: String,
    /// Name of the value-size distribution.
    pub valuesize: String,
    /// Probability of POST vs GET, in `[0, 1]`.
    pub update: f64,
    /// Total run duration in seconds.
    pub time: f64,
    /// Enforce >= 250us between last response and next issue.
    pub moderate: bool,
    /// Allow catching up by dropping scheduled arrivals when backlog > 5ms.
    pub skip: bool,
    /// If true, leave Nagle enabled (don't set `TCP_NODELAY`).
    pub no_nodelay: bool,
    /// Exit when the queue drains, regardless of `time`.
    pub loadonly: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            records: 10_000,
            depth: 1,
            lambda: 0.0,
            ia: "exponential".to_string(),
            keysize: "fixed:16".to_string(),
            valuesize: "fixed:64".to_string(),
            update: 0.0,
            time: 10.0,
            moderate: false,
            skip: false,
            no_nodelay: false,
            loadonly: false,
        }
    }
}

impl Options {
    pub fn validate(&self) -> Result<(), PacerError> {
        if self.depth < 1 {
            return Err(PacerError::ConfigInvalid(format!(
                "depth must be >= 1, got {}",
                self.depth
            )));
        }
        if !(0.0..=1.0).contains(&self.update) {
            return Err(PacerError::ConfigInvalid(format!(
                "update must be within [0, 1], got {}",
                self.update
            )));
        }
        if self.time < 0.0 {
            return Err(PacerError::ConfigInvalid(format!(
                "time must be >= 0, got {}",
                self.time
            )));
        }
        if self.records == 0 {
            return Err(PacerError::ConfigInvalid("records must be >= 1".to_string()));
        }
        // Distribution names are validated lazily by the generators
        // themselves (distributions::parse_shape), since that's the single
        // place that knows the grammar.
        Ok(())
    }
}
