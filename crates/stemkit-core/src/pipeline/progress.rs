//! Progress weighting across pipeline stages

/// A sub-range of overall task progress owned by one stage
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageRange {
    pub start: f64,
    pub end: f64,
}

impl StageRange {
    pub const fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    /// Map stage-local progress in 0.0..=1.0 into this range
    pub fn at(&self, local: f64) -> f64 {
        let local = if local.is_finite() { local.clamp(0.0, 1.0) } else { 0.0 };
        self.start + (self.end - self.start) * local
    }

    /// The `index`-th of `count` equal slices of this range
    pub fn slice(&self, index: usize, count: usize) -> StageRange {
        let count = count.max(1) as f64;
        let width = (self.end - self.start) / count;
        StageRange {
            start: self.start + width * index as f64,
            end: self.start + width * (index as f64 + 1.0),
        }
    }

    /// Sub-range covering `from..to` of this range's local progress
    pub fn sub(&self, from: f64, to: f64) -> StageRange {
        StageRange {
            start: self.at(from),
            end: self.at(to),
        }
    }
}

// Separation job: Decode -> Infer -> Encode (split evenly per stem)
pub const SEPARATE_DECODE: StageRange = StageRange::new(0.0, 0.15);
pub const SEPARATE_INFER: StageRange = StageRange::new(0.15, 0.90);
pub const SEPARATE_ENCODE: StageRange = StageRange::new(0.90, 1.0);

// Prepare task: Decode -> Resample marker -> WriteCanonical
pub const PREPARE_DECODE: StageRange = StageRange::new(0.0, 0.75);
pub const PREPARE_RESAMPLE: f64 = 0.75;
pub const PREPARE_WRITE: StageRange = StageRange::new(0.76, 1.0);

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_at_clamps() {
        assert_eq!(SEPARATE_INFER.at(-1.0), 0.15);
        assert_eq!(SEPARATE_INFER.at(2.0), 0.90);
        assert_eq!(SEPARATE_INFER.at(f64::NAN), 0.15);
        assert!(close(SEPARATE_INFER.at(0.5), 0.525));
    }

    #[test]
    fn test_stem_slices() {
        let second = SEPARATE_ENCODE.slice(1, 4);
        assert!(close(second.start, 0.925));
        assert!(close(second.end, 0.95));

        let last = SEPARATE_ENCODE.slice(3, 4);
        assert!(close(last.end, 1.0));
    }

    #[test]
    fn test_ranges_are_disjoint_and_ordered() {
        assert!(SEPARATE_DECODE.end <= SEPARATE_INFER.start);
        assert!(SEPARATE_INFER.end <= SEPARATE_ENCODE.start);
        assert!(PREPARE_DECODE.end <= PREPARE_RESAMPLE);
        assert!(PREPARE_RESAMPLE < PREPARE_WRITE.start);
    }

    #[test]
    fn test_sub_range() {
        let decode = SEPARATE_DECODE.sub(0.0, 0.8);
        assert!(close(decode.end, 0.12));
        assert!(close(SEPARATE_DECODE.sub(0.8, 1.0).at(1.0), 0.15));
    }
}
