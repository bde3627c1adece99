//! Stimulus images: the radial checkerboard shown while strobing and the
//! fixation dot shown between trials.

use std::f64::consts::PI;

use shared::error::ParameterError;

use crate::sequencer::CheckerFrame;

pub const DEFAULT_IMAGE_SIZE: usize = 600;

pub const BLACK: u8 = 0;
pub const GRAY: u8 = 128;
pub const WHITE: u8 = 255;

/// Square 8-bit grayscale image, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StimulusImage {
    size: usize,
    pixels: Vec<u8>,
}

impl StimulusImage {
    fn render(size: usize, mut shade: impl FnMut(f64, f64) -> u8) -> Self {
        let half = size as f64 / 2.0;
        let coord = |index: usize| (index as f64 - half) / half;
        let mut pixels = Vec::with_capacity(size * size);
        for row in 0..size {
            let y = coord(row);
            for col in 0..size {
                pixels.push(shade(coord(col), y));
            }
        }
        Self { size, pixels }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn pixel(&self, row: usize, col: usize) -> Option<u8> {
        if row >= self.size || col >= self.size {
            return None;
        }
        self.pixels.get(row * self.size + col).copied()
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }
}

/// Design of the polar checkerboard.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RadialCheckerboard {
    /// Checkers around the circle.
    angular_freq: f64,
    /// Checkers from the rim to the centre.
    radial_freq: f64,
    /// Warp applied to the radius; below 1 stretches the inner rings.
    radial_exp: f64,
    size: usize,
}

impl Default for RadialCheckerboard {
    fn default() -> Self {
        Self {
            angular_freq: 40.0,
            radial_freq: 10.0,
            radial_exp: 0.5,
            size: DEFAULT_IMAGE_SIZE,
        }
    }
}

impl RadialCheckerboard {
    pub const ANGULAR_FREQ_RANGE: (f64, f64) = (2.0, 80.0);
    pub const RADIAL_FREQ_RANGE: (f64, f64) = (2.0, 40.0);
    pub const RADIAL_EXP_RANGE: (f64, f64) = (0.0, 2.0);

    pub fn new(
        angular_freq: f64,
        radial_freq: f64,
        radial_exp: f64,
        size: usize,
    ) -> Result<Self, ParameterError> {
        check_range("angular_freq", angular_freq, Self::ANGULAR_FREQ_RANGE)?;
        check_range("radial_freq", radial_freq, Self::RADIAL_FREQ_RANGE)?;
        check_range("radial_exp", radial_exp, Self::RADIAL_EXP_RANGE)?;
        if size == 0 {
            return Err(ParameterError::OutOfRange {
                field: "size",
                value: 0.0,
                min: 1.0,
                max: f64::from(u32::MAX),
            });
        }
        Ok(Self {
            angular_freq,
            radial_freq,
            radial_exp,
            size,
        })
    }

    pub fn angular_freq(&self) -> f64 {
        self.angular_freq
    }

    pub fn radial_freq(&self) -> f64 {
        self.radial_freq
    }

    pub fn radial_exp(&self) -> f64 {
        self.radial_exp
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Sign of the checker pattern at `(x, y)` in `[-1, 1]` image coordinates,
    /// with the board turned by `rotation_deg`. Zero outside the unit disc and
    /// on checker edges.
    pub fn polarity(&self, x: f64, y: f64, rotation_deg: f64) -> f64 {
        let dist = (x * x + y * y).sqrt().powf(self.radial_exp);
        if dist > 1.0 {
            return 0.0;
        }
        let angle = y.atan2(x) - rotation_deg.to_radians();
        let value = (2.0 * PI * (self.radial_freq / 2.0) * dist).sin()
            * (angle * self.angular_freq / 2.0).cos();
        if value == 0.0 {
            0.0
        } else {
            value.signum()
        }
    }

    /// The board and its contrast-reversed twin.
    pub fn images(&self) -> [StimulusImage; 2] {
        let base = self.render(0.0, false);
        let inverted = self.render(0.0, true);
        [base, inverted]
    }

    /// The board as the strobe screen shows it on `frame`.
    pub fn image_for(&self, frame: &CheckerFrame) -> StimulusImage {
        self.render(frame.rotation_deg, false)
    }

    fn render(&self, rotation_deg: f64, inverted: bool) -> StimulusImage {
        StimulusImage::render(self.size, |x, y| {
            let sign = self.polarity(x, y, rotation_deg);
            let sign = if inverted { -sign } else { sign };
            if sign > 0.0 {
                WHITE
            } else if sign < 0.0 {
                BLACK
            } else {
                GRAY
            }
        })
    }
}

/// Gray field with a dark dot in the middle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fixation {
    /// Fraction of the image half-width.
    pub radius: f64,
    pub size: usize,
}

impl Default for Fixation {
    fn default() -> Self {
        Self {
            radius: 0.01,
            size: DEFAULT_IMAGE_SIZE,
        }
    }
}

impl Fixation {
    pub fn image(&self) -> StimulusImage {
        StimulusImage::render(self.size, |x, y| {
            if (x * x + y * y).sqrt() < self.radius {
                BLACK
            } else {
                GRAY
            }
        })
    }
}

fn check_range(
    field: &'static str,
    value: f64,
    (min, max): (f64, f64),
) -> Result<(), ParameterError> {
    if value.is_finite() && (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ParameterError::OutOfRange {
            field,
            value,
            min,
            max,
        })
    }
}
