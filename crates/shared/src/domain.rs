use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ParameterError, ProtocolError};

pub const DEFAULT_STROBE_FREQ: f64 = 12.0;
pub const DEFAULT_TRIALS: i64 = 10;
pub const DEFAULT_TRIAL_DUR_MS: i64 = 4000;
pub const DEFAULT_ISI_JITTER_MS: i64 = 500;

/// Port the stim server listens on for relay connections.
pub const RELAY_PORT: u16 = 5545;

const STROBE_FREQ_BOUNDS: (f64, f64) = (1.0, 100.0);
const TRIALS_BOUNDS: (i64, i64) = (1, 100);
const TRIAL_DUR_MS_BOUNDS: (i64, i64) = (0, 100_000);
const ISI_JITTER_MS_BOUNDS: (i64, i64) = (0, 100_000);

/// Parameters read from the page query string when a run is prepared.
///
/// A missing, non-numeric or zero value falls back to its default.
/// `trial_dur_ms` is still in milliseconds here; the settings form converts it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QueryParameters {
    pub strobe_freq: f64,
    pub trials: i64,
    pub trial_dur_ms: i64,
    pub isi_jitter_ms: i64,
}

impl Default for QueryParameters {
    fn default() -> Self {
        Self {
            strobe_freq: DEFAULT_STROBE_FREQ,
            trials: DEFAULT_TRIALS,
            trial_dur_ms: DEFAULT_TRIAL_DUR_MS,
            isi_jitter_ms: DEFAULT_ISI_JITTER_MS,
        }
    }
}

impl QueryParameters {
    pub fn from_query(query: &str) -> Self {
        let query = query.trim_start_matches('?');
        Self {
            strobe_freq: first_value(query, "strobe_freq")
                .and_then(|raw| parse_float_prefix(&raw))
                .filter(|value| *value != 0.0)
                .unwrap_or(DEFAULT_STROBE_FREQ),
            trials: int_or_default(query, "trials", DEFAULT_TRIALS),
            trial_dur_ms: int_or_default(query, "trial_dur", DEFAULT_TRIAL_DUR_MS),
            isi_jitter_ms: int_or_default(query, "isi_jitter", DEFAULT_ISI_JITTER_MS),
        }
    }
}

fn int_or_default(query: &str, key: &str, default: i64) -> i64 {
    first_value(query, key)
        .and_then(|raw| parse_int_prefix(&raw))
        .filter(|value| *value != 0)
        .unwrap_or(default)
}

fn first_value<'a>(query: &'a str, key: &str) -> Option<Cow<'a, str>> {
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(name, _)| name == key)
        .map(|(_, value)| value)
}

/// Parses the longest leading decimal literal, ignoring leading whitespace.
///
/// `"12.5Hz"` yields `12.5`; `"Hz"` yields `None`.
pub fn parse_float_prefix(raw: &str) -> Option<f64> {
    let text = raw.trim_start();
    let unsigned = text.trim_start_matches(['+', '-']);
    if text.len() - unsigned.len() > 1 {
        return None;
    }
    if unsigned.starts_with("Infinity") {
        let negative = text.starts_with('-');
        return Some(if negative {
            f64::NEG_INFINITY
        } else {
            f64::INFINITY
        });
    }

    let bytes = text.as_bytes();
    let mut end = text.len() - unsigned.len();
    let digits_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    let mut mantissa_digits = end - digits_start;
    if end < bytes.len() && bytes[end] == b'.' {
        let fraction_start = end + 1;
        let mut cursor = fraction_start;
        while cursor < bytes.len() && bytes[cursor].is_ascii_digit() {
            cursor += 1;
        }
        mantissa_digits += cursor - fraction_start;
        end = cursor;
    }
    if mantissa_digits == 0 {
        return None;
    }
    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut cursor = end + 1;
        if cursor < bytes.len() && (bytes[cursor] == b'+' || bytes[cursor] == b'-') {
            cursor += 1;
        }
        let exponent_start = cursor;
        while cursor < bytes.len() && bytes[cursor].is_ascii_digit() {
            cursor += 1;
        }
        if cursor > exponent_start {
            end = cursor;
        }
    }

    text[..end].parse::<f64>().ok()
}

/// Parses the longest leading base-10 integer, ignoring leading whitespace.
///
/// Values beyond `i64` saturate, so they stay out of range rather than
/// disappearing.
pub fn parse_int_prefix(raw: &str) -> Option<i64> {
    let text = raw.trim_start();
    let sign_len = usize::from(text.starts_with(['+', '-']));
    let digits = text[sign_len..]
        .bytes()
        .take_while(u8::is_ascii_digit)
        .count();
    if digits == 0 {
        return None;
    }
    let literal = &text[..sign_len + digits];
    match literal.parse::<i64>() {
        Ok(value) => Some(value),
        Err(_) if literal.starts_with('-') => Some(i64::MIN),
        Err(_) => Some(i64::MAX),
    }
}

/// Renders a number the way the page runtime prints it: `12` rather than `12.0`.
pub fn format_number(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value.is_sign_negative() {
            "-Infinity".to_string()
        } else {
            "Infinity".to_string()
        }
    } else {
        format!("{value}")
    }
}

/// Values of the task settings form, as entered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsForm {
    pub strobe_freq: String,
    pub trials: String,
    /// Milliseconds.
    pub trial_dur: String,
    /// Milliseconds.
    pub isi_jitter: String,
}

impl From<&QueryParameters> for SettingsForm {
    fn from(query: &QueryParameters) -> Self {
        Self {
            strobe_freq: format_number(query.strobe_freq),
            trials: query.trials.to_string(),
            trial_dur: query.trial_dur_ms.to_string(),
            isi_jitter: query.isi_jitter_ms.to_string(),
        }
    }
}

impl SettingsForm {
    pub fn set(&mut self, field: &str, value: impl Into<String>) -> Result<(), ParameterError> {
        let slot = match field {
            "strobe_freq" => &mut self.strobe_freq,
            "trials" => &mut self.trials,
            "trial_dur" => &mut self.trial_dur,
            "isi_jitter" => &mut self.isi_jitter,
            other => return Err(ParameterError::UnknownField(other.to_string())),
        };
        *slot = value.into();
        Ok(())
    }

    /// Validates the form and freezes the run parameters.
    pub fn submit(&self) -> Result<RunParameters, ParameterError> {
        let strobe_freq = parse_float_prefix(&self.strobe_freq)
            .filter(|value| !value.is_nan())
            .ok_or_else(|| ParameterError::NotANumber {
                field: "strobe_freq",
                raw: self.strobe_freq.clone(),
            })?;
        let (min, max) = STROBE_FREQ_BOUNDS;
        if !(min..=max).contains(&strobe_freq) {
            return Err(ParameterError::OutOfRange {
                field: "strobe_freq",
                value: strobe_freq,
                min,
                max,
            });
        }

        let trials = bounded_int("trials", &self.trials, TRIALS_BOUNDS)?;
        let trial_dur_ms = bounded_int("trial_dur", &self.trial_dur, TRIAL_DUR_MS_BOUNDS)?;
        let isi_jitter = bounded_int("isi_jitter", &self.isi_jitter, ISI_JITTER_MS_BOUNDS)?;

        Ok(RunParameters {
            strobe_freq,
            trials,
            trial_dur: trial_dur_ms as f64 / 1000.0,
            isi_jitter,
        })
    }
}

fn bounded_int(
    field: &'static str,
    raw: &str,
    (min, max): (i64, i64),
) -> Result<u32, ParameterError> {
    let value = parse_int_prefix(raw).ok_or_else(|| ParameterError::NotANumber {
        field,
        raw: raw.to_string(),
    })?;
    if !(min..=max).contains(&value) {
        return Err(ParameterError::OutOfRange {
            field,
            value: value as f64,
            min: min as f64,
            max: max as f64,
        });
    }
    // Bounds fit in u32.
    Ok(value as u32)
}

/// Frozen parameters for one run. Only [`SettingsForm::submit`] builds them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RunParameters {
    strobe_freq: f64,
    trials: u32,
    trial_dur: f64,
    isi_jitter: u32,
}

impl RunParameters {
    /// Strobe frequency in Hz.
    pub fn strobe_freq(&self) -> f64 {
        self.strobe_freq
    }

    pub fn trials(&self) -> u32 {
        self.trials
    }

    /// Trial duration in seconds.
    pub fn trial_dur(&self) -> f64 {
        self.trial_dur
    }

    /// Upper bound of the inter-trial interval in milliseconds.
    pub fn isi_jitter(&self) -> u32 {
        self.isi_jitter
    }

    /// Trigger label for this frequency, e.g. `12Hz`.
    pub fn label(&self) -> String {
        format!("{}Hz", format_number(self.strobe_freq))
    }
}

/// The address the stimulus page was loaded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageLocation {
    url: Url,
}

impl PageLocation {
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let url = Url::parse(raw).map_err(|err| ProtocolError::InvalidPageUrl {
            url: raw.to_string(),
            reason: err.to_string(),
        })?;
        if url.host_str().is_none() {
            return Err(ProtocolError::MissingHost(raw.to_string()));
        }
        Ok(Self { url })
    }

    pub fn is_secure(&self) -> bool {
        self.url.scheme() == "https"
    }

    pub fn hostname(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    pub fn query(&self) -> &str {
        self.url.query().unwrap_or_default()
    }

    /// `wss://host:port` for secure pages, `ws://host:port` otherwise.
    pub fn relay_endpoint(&self, port: u16) -> Result<Url, ProtocolError> {
        let scheme = if self.is_secure() { "wss" } else { "ws" };
        let raw = format!("{scheme}://{}:{port}", self.hostname());
        Url::parse(&raw).map_err(|err| ProtocolError::InvalidPageUrl {
            url: raw,
            reason: err.to_string(),
        })
    }
}
