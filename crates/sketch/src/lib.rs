//! Mergeable approximate quantile summaries.
//!
//! Aggregates carry a serialized sketch of every sample folded into them, and
//! queries merge the sketches of all rows in a bucket before reading a
//! quantile. Callers only depend on [`QuantileSketch`]; [`HdrSketch`] is the
//! implementation used throughout the service.
//!
//! # Implementation notes
//! [`HdrSketch`] stores values in fixed point (`value * 1000`, so three
//! decimal places survive) inside two auto-resizing HDR histograms with three
//! significant figures: one for non-negative values and one for the magnitude
//! of negative values. The exact minimum and maximum are tracked alongside so
//! that quantiles never leave the observed range.
use std::io::Cursor;

use byteorder::{
    BigEndian,
    ReadBytesExt,
    WriteBytesExt,
};
use hdrhistogram::{
    serialization::{
        Deserializer,
        Serializer,
        V2Serializer,
    },
    Histogram,
};

const SIGNIFICANT_FIGURES: u8 = 3;
const SCALE: f64 = 1000.0;
// Well inside the largest value an auto-resizing histogram can track.
const MAX_SCALED: u64 = 1 << 60;
const FORMAT_VERSION: u8 = 1;

/// Capability interface for a mergeable quantile estimator.
pub trait QuantileSketch: Sized + Clone + Send + Sync {
    fn empty() -> Self;

    /// Non-finite values are ignored.
    fn add(&mut self, value: f64);

    fn merge(&mut self, other: &Self) -> Result<(), SketchError>;

    /// Estimated value at quantile `q` in `[0, 1]`. NaN for an empty sketch.
    fn quantile(&self, q: f64) -> f64;

    fn count(&self) -> u64;

    fn to_bytes(&self) -> Result<Vec<u8>, SketchError>;

    /// An empty slice decodes to an empty sketch.
    fn from_bytes(bytes: &[u8]) -> Result<Self, SketchError>;

    fn of_value(value: f64) -> Self {
        let mut sketch = Self::empty();
        sketch.add(value);
        sketch
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SketchError {
    #[error("Invalid histogram parameters: {0}")]
    InvalidHistogram(#[from] hdrhistogram::CreationError),

    #[error("Failed to merge histograms: {0}")]
    Merge(#[from] hdrhistogram::AdditionError),

    #[error("Failed to serialize histogram: {0}")]
    Serialize(#[from] hdrhistogram::serialization::V2SerializeError),

    #[error("Failed to deserialize histogram: {0}")]
    Deserialize(#[from] hdrhistogram::serialization::DeserializeError),

    #[error("Unsupported sketch format version {0}")]
    UnsupportedVersion(u8),

    #[error("Malformed sketch bytes: {0}")]
    Io(#[from] std::io::Error),

    #[error("Histogram claims {claimed} bytes but only {remaining} remain")]
    Truncated { claimed: usize, remaining: usize },

    #[error("{0} trailing bytes after sketch")]
    TrailingBytes(usize),

    #[error("Invalid sketch bounds [{min}, {max}]")]
    InvalidBounds { min: f64, max: f64 },
}

#[derive(Clone, Debug)]
pub struct HdrSketch {
    positive: Histogram<u64>,
    negative: Histogram<u64>,
    min: f64,
    max: f64,
}

impl HdrSketch {
    fn new_histogram() -> Histogram<u64> {
        // `new` only fails for significant figures outside [0, 5].
        Histogram::new(SIGNIFICANT_FIGURES).expect("SIGNIFICANT_FIGURES is valid")
    }

    fn scaled(magnitude: f64) -> u64 {
        let scaled = (magnitude * SCALE).round();
        if scaled >= MAX_SCALED as f64 {
            MAX_SCALED
        } else {
            scaled as u64
        }
    }

    fn write_histogram(
        out: &mut Vec<u8>,
        histogram: &Histogram<u64>,
    ) -> Result<(), SketchError> {
        let mut buf = Vec::new();
        V2Serializer::new().serialize(histogram, &mut buf)?;
        out.write_u32::<BigEndian>(buf.len() as u32)?;
        out.extend_from_slice(&buf);
        Ok(())
    }

    fn read_histogram(cursor: &mut Cursor<&[u8]>) -> Result<Histogram<u64>, SketchError> {
        let len = cursor.read_u32::<BigEndian>()? as usize;
        let start = cursor.position() as usize;
        let bytes: &[u8] = *cursor.get_ref();
        let remaining = bytes.len().saturating_sub(start);
        if len > remaining {
            return Err(SketchError::Truncated {
                claimed: len,
                remaining,
            });
        }
        let mut histogram: Histogram<u64> =
            Deserializer::new().deserialize(&mut &bytes[start..start + len])?;
        cursor.set_position((start + len) as u64);
        histogram.auto(true);
        Ok(histogram)
    }
}

impl QuantileSketch for HdrSketch {
    fn empty() -> Self {
        Self {
            positive: Self::new_histogram(),
            negative: Self::new_histogram(),
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    fn add(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }
        if value >= 0.0 {
            self.positive.saturating_record(Self::scaled(value));
        } else {
            self.negative.saturating_record(Self::scaled(-value));
        }
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    fn merge(&mut self, other: &Self) -> Result<(), SketchError> {
        self.positive.add(&other.positive)?;
        self.negative.add(&other.negative)?;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        Ok(())
    }

    fn quantile(&self, q: f64) -> f64 {
        let negatives = self.negative.len();
        let positives = self.positive.len();
        let total = negatives + positives;
        if total == 0 || q.is_nan() {
            return f64::NAN;
        }
        let rank = q.clamp(0.0, 1.0) * total as f64;
        let scaled = if negatives > 0 && (rank < negatives as f64 || positives == 0) {
            // Negative magnitudes are stored in reverse order.
            let within = (rank / negatives as f64).clamp(0.0, 1.0);
            -(self.negative.value_at_quantile(1.0 - within) as f64)
        } else {
            let within = ((rank - negatives as f64) / positives as f64).clamp(0.0, 1.0);
            self.positive.value_at_quantile(within) as f64
        };
        (scaled / SCALE).clamp(self.min, self.max)
    }

    fn count(&self) -> u64 {
        self.positive.len() + self.negative.len()
    }

    fn to_bytes(&self) -> Result<Vec<u8>, SketchError> {
        let mut out = Vec::new();
        out.write_u8(FORMAT_VERSION)?;
        out.write_f64::<BigEndian>(self.min)?;
        out.write_f64::<BigEndian>(self.max)?;
        Self::write_histogram(&mut out, &self.positive)?;
        Self::write_histogram(&mut out, &self.negative)?;
        Ok(out)
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, SketchError> {
        if bytes.is_empty() {
            return Ok(Self::empty());
        }
        let mut cursor = Cursor::new(bytes);
        let version = cursor.read_u8()?;
        if version != FORMAT_VERSION {
            return Err(SketchError::UnsupportedVersion(version));
        }
        let min = cursor.read_f64::<BigEndian>()?;
        let max = cursor.read_f64::<BigEndian>()?;
        let positive = Self::read_histogram(&mut cursor)?;
        let negative = Self::read_histogram(&mut cursor)?;
        let remaining = bytes.len() - cursor.position() as usize;
        if remaining > 0 {
            return Err(SketchError::TrailingBytes(remaining));
        }
        if positive.len() + negative.len() > 0 && (min.is_nan() || max.is_nan() || min > max) {
            return Err(SketchError::InvalidBounds { min, max });
        }
        Ok(Self {
            positive,
            negative,
            min,
            max,
        })
    }
}
