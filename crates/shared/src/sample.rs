//! Splitting recorded samples around strobe onset, and the running
//! null-versus-SSVEP spectral comparison built from the two halves.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::{error::SampleError, protocol::SampleTrigger};

/// Multichannel signal; every channel is a time series on the same axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalWindow {
    /// Seconds between consecutive samples.
    pub gain: f64,
    pub channels: Vec<Vec<f64>>,
}

impl SignalWindow {
    pub fn len(&self) -> usize {
        self.channels.iter().map(Vec::len).min().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slice(&self, start: usize, end: usize) -> Self {
        Self {
            gain: self.gain,
            channels: self
                .channels
                .iter()
                .map(|channel| channel[start..end].to_vec())
                .collect(),
        }
    }
}

/// The pre-onset (no stimulus) and post-onset (strobing) halves of a sample.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitSample {
    pub null: SignalWindow,
    pub ssvep: SignalWindow,
}

/// Splits `sample` at strobe onset.
///
/// The first sample sits at `trigger.period.0` seconds from onset. Onset is the
/// sample closest to zero (the earliest one on a tie). Both halves span
/// `integration_time` seconds, truncated to whole samples.
pub fn split_sample(
    trigger: &SampleTrigger,
    sample: &SignalWindow,
    integration_time: f64,
) -> Result<SplitSample, SampleError> {
    let (offset, _) = trigger.period.ok_or(SampleError::NoPeriod)?;
    if !(sample.gain.is_finite() && sample.gain > 0.0) {
        return Err(SampleError::InvalidGain(sample.gain));
    }

    let len = sample.len();
    let onset = (0..len)
        .map(|index| (index, (index as f64 * sample.gain + offset).abs()))
        .fold(None, |best: Option<(usize, f64)>, (index, distance)| match best {
            Some((_, closest)) if closest <= distance => best,
            _ => Some((index, distance)),
        })
        .map(|(index, _)| index as i64);

    let span = (integration_time / sample.gain).trunc() as i64;
    let onset = onset.unwrap_or(0);
    let (start, end) = (onset - span, onset + span);
    if len == 0 || span < 0 || start < 0 || end > len as i64 {
        return Err(SampleError::WindowOutOfRange { start, end, len });
    }

    let (start, onset, end) = (start as usize, onset as usize, end as usize);
    Ok(SplitSample {
        null: sample.slice(start, onset),
        ssvep: sample.slice(onset, end),
    })
}

/// Pairs null and SSVEP spectra in arrival order and reports how the latest
/// SSVEP spectrum differs from its null partner.
#[derive(Debug, Default, Clone)]
pub struct SpectralStats {
    pending_null: VecDeque<Vec<f64>>,
    pending_ssvep: VecDeque<Vec<f64>>,
    pairs: Vec<(Vec<f64>, Vec<f64>)>,
}

impl SpectralStats {
    /// Returns whether a new pair was completed.
    pub fn push_null(&mut self, spectrum: Vec<f64>) -> Result<bool, SampleError> {
        self.pending_null.push_back(spectrum);
        self.synchronize()
    }

    pub fn push_ssvep(&mut self, spectrum: Vec<f64>) -> Result<bool, SampleError> {
        self.pending_ssvep.push_back(spectrum);
        self.synchronize()
    }

    fn synchronize(&mut self) -> Result<bool, SampleError> {
        if self.pending_null.is_empty() || self.pending_ssvep.is_empty() {
            return Ok(false);
        }
        let (Some(null), Some(ssvep)) =
            (self.pending_null.pop_front(), self.pending_ssvep.pop_front())
        else {
            return Ok(false);
        };
        if null.len() != ssvep.len() {
            return Err(SampleError::SpectrumMismatch {
                null: null.len(),
                ssvep: ssvep.len(),
            });
        }
        self.pairs.push((null, ssvep));
        Ok(true)
    }

    pub fn pair_count(&self) -> usize {
        self.pairs.len()
    }

    /// `ssvep - null` for the most recent pair.
    pub fn latest_difference(&self) -> Option<Vec<f64>> {
        let (null, ssvep) = self.pairs.last()?;
        Some(ssvep.iter().zip(null).map(|(s, n)| s - n).collect())
    }

    /// Forgets every pair; spectra still waiting for a partner are kept.
    pub fn reset(&mut self) {
        self.pairs.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn trigger(period: Option<(f64, f64)>) -> SampleTrigger {
        SampleTrigger {
            timestamp: Utc::now(),
            value: None,
            period,
        }
    }

    fn ramp(len: usize) -> SignalWindow {
        let channel: Vec<f64> = (0..len).map(|index| index as f64).collect();
        SignalWindow {
            gain: 0.25,
            channels: vec![channel.clone(), channel.iter().map(|v| -v).collect()],
        }
    }

    #[test]
    fn sample_splits_at_onset() {
        let split = split_sample(&trigger(Some((-2.0, 2.0))), &ramp(16), 1.0).expect("fits");
        assert_eq!(split.null.channels[0], vec![4.0, 5.0, 6.0, 7.0]);
        assert_eq!(split.ssvep.channels[0], vec![8.0, 9.0, 10.0, 11.0]);
        assert_eq!(split.ssvep.channels[1], vec![-8.0, -9.0, -10.0, -11.0]);
        assert_eq!(split.null.gain, 0.25);
    }

    #[test]
    fn onset_ties_resolve_to_the_earlier_sample() {
        let split = split_sample(&trigger(Some((-1.125, 1.0))), &ramp(16), 0.5).expect("fits");
        assert_eq!(split.ssvep.channels[0], vec![4.0, 5.0]);
    }

    #[test]
    fn samples_without_period_are_discarded() {
        assert_eq!(
            split_sample(&trigger(None), &ramp(16), 1.0),
            Err(SampleError::NoPeriod)
        );
    }

    #[test]
    fn windows_must_fit_inside_the_sample() {
        assert_eq!(
            split_sample(&trigger(Some((-2.0, 2.0))), &ramp(16), 3.0),
            Err(SampleError::WindowOutOfRange {
                start: -4,
                end: 20,
                len: 16
            })
        );
        let mut flat = ramp(16);
        flat.gain = 0.0;
        assert_eq!(
            split_sample(&trigger(Some((-2.0, 2.0))), &flat, 1.0),
            Err(SampleError::InvalidGain(0.0))
        );
    }

    #[test]
    fn spectra_pair_in_arrival_order() {
        let mut stats = SpectralStats::default();
        assert_eq!(stats.push_null(vec![1.0, 2.0]), Ok(false));
        assert_eq!(stats.push_null(vec![0.0, 0.0]), Ok(false));
        assert_eq!(stats.latest_difference(), None);

        assert_eq!(stats.push_ssvep(vec![3.0, 5.0]), Ok(true));
        assert_eq!(stats.latest_difference(), Some(vec![2.0, 3.0]));
        assert_eq!(stats.push_ssvep(vec![1.0, 1.0]), Ok(true));
        assert_eq!(stats.latest_difference(), Some(vec![1.0, 1.0]));
        assert_eq!(stats.pair_count(), 2);

        stats.reset();
        assert_eq!(stats.pair_count(), 0);
        assert_eq!(stats.latest_difference(), None);
    }

    #[test]
    fn mismatched_spectra_are_rejected() {
        let mut stats = SpectralStats::default();
        stats.push_null(vec![1.0]).expect("queued");
        assert_eq!(
            stats.push_ssvep(vec![1.0, 2.0]),
            Err(SampleError::SpectrumMismatch { null: 1, ssvep: 2 })
        );
        assert_eq!(stats.pair_count(), 0);
    }
}
