use thiserror::Error;

/// Problems found while assembling a loop from gains, bounds and initial vectors.
/// All of these are fatal: a loop is never handed out with inconsistent dimensions.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{what}: expected {expected_rows}x{expected_cols}, found {rows}x{cols}")]
    DimensionMismatch {
        what: &'static str,
        expected_rows: usize,
        expected_cols: usize,
        rows: usize,
        cols: usize,
    },

    #[error("{what}: row {row} has {len} entries, expected {expected}")]
    RaggedMatrix {
        what: &'static str,
        row: usize,
        len: usize,
        expected: usize,
    },

    #[error("gain schedule must contain at least one gain set")]
    EmptySchedule,

    #[error("gain set `{name}`: {source}")]
    InGainSet {
        name: String,
        #[source]
        source: Box<ConfigError>,
    },

    #[error("envelope element {index}: min {min} is greater than max {max}")]
    InvertedEnvelope { index: usize, min: f64, max: f64 },

    #[error("envelope element {index} is NaN")]
    NanBound { index: usize },

    #[error("initial gain index {index} out of range for {len} gain sets")]
    InitialIndexOutOfRange { index: usize, len: usize },

    #[error("sample period must be finite and positive, got {0}")]
    InvalidPeriod(f64),

    #[error("{what} covariance is neither zero nor positive definite")]
    NotPositiveDefinite { what: &'static str },

    #[error("failed to parse loop configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("failed to read loop configuration: {0}")]
    Io(#[from] std::io::Error),
}

/// Runtime rejections. The loop state is left untouched when one is returned.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopError {
    #[error("gain index {index} out of range for {len} gain sets")]
    GainIndexOutOfRange { index: usize, len: usize },
}
