//! Options appended to every invocation of the reconstruction tool.

use serde::Serialize;

/// Field strength that turns on the high-field processing flag.
pub const HIGH_FIELD_TESLA: f64 = 3.0;
/// Maximum distance from the target for a reading to count as a match.
pub const FIELD_TOLERANCE_TESLA: f64 = 0.2;
/// Readings above this are taken to be milli-Tesla.
const MILLI_TESLA_THRESHOLD: f64 = 100.0;

const THREADS_FLAG: &str = "-openmp";
const HIGH_FIELD_FLAG: &str = "-3T";

/// Convert a scanner reading to Tesla.
pub fn normalize_tesla(reading: f64) -> f64 {
    if reading > MILLI_TESLA_THRESHOLD {
        reading / 1000.0
    } else {
        reading
    }
}

/// Whether a raw reading is within tolerance of `target` Tesla.
pub fn close_enough(reading: f64, target: f64) -> bool {
    (normalize_tesla(reading) - target).abs() <= FIELD_TOLERANCE_TESLA
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PipelineOptions {
    pub thread_count: u32,
    pub high_field: bool,
}

impl PipelineOptions {
    pub fn new(thread_count: u32, high_field: bool) -> Self {
        Self {
            thread_count: thread_count.max(1),
            high_field,
        }
    }

    /// Options after seeing one scan. The high-field flag can only be turned
    /// on, never off.
    pub fn escalate(self, field_strength: Option<f64>) -> Self {
        let high_field = self.high_field
            || field_strength.is_some_and(|reading| close_enough(reading, HIGH_FIELD_TESLA));
        Self { high_field, ..self }
    }

    /// Options for a run over the given field strengths, starting from the
    /// statically configured options. Independent of scan order.
    pub fn resolve<I>(base: Self, field_strengths: I) -> Self
    where
        I: IntoIterator<Item = Option<f64>>,
    {
        field_strengths
            .into_iter()
            .fold(base, |options, reading| options.escalate(reading))
    }

    /// Trailing arguments: thread count first, then the high-field flag.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![THREADS_FLAG.to_string(), self.thread_count.to_string()];
        if self.high_field {
            args.push(HIGH_FIELD_FLAG.to_string());
        }
        args
    }
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::new(1, false)
    }
}
