use thiserror::Error;

/// Rejections raised while turning form input into run parameters.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParameterError {
    #[error("{field}: '{raw}' is not a number")]
    NotANumber { field: &'static str, raw: String },
    #[error("{field}: {value} is outside {min}..={max}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("unknown settings field '{0}'")]
    UnknownField(String),
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid page url '{url}': {reason}")]
    InvalidPageUrl { url: String, reason: String },
    #[error("page url '{0}' has no host")]
    MissingHost(String),
    #[error("malformed frame: {0}")]
    MalformedFrame(#[from] serde_json::Error),
    #[error("frame is not a JSON object")]
    NotAnObject,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SampleError {
    #[error("sample trigger has no period")]
    NoPeriod,
    #[error("sample period must be positive, got {0}")]
    InvalidGain(f64),
    #[error("integration window [{start}, {end}) falls outside {len} samples")]
    WindowOutOfRange { start: i64, end: i64, len: usize },
    #[error("spectra differ in length: null {null}, ssvep {ssvep}")]
    SpectrumMismatch { null: usize, ssvep: usize },
}
