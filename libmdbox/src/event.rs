/// A single weighted point in the ND output space.
///
/// Events are plain values. They are never mutated once created; all aggregation
/// happens on the boxes which hold them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MDEvent<const ND: usize> {
    coordinates: [f64; ND],
    signal: f64,
    error_squared: f64,
}

impl<const ND: usize> MDEvent<ND> {
    pub fn new(coordinates: [f64; ND], signal: f64, error_squared: f64) -> Self {
        Self {
            coordinates,
            signal,
            error_squared,
        }
    }

    /// An event with unit weight, as produced for raw (uncorrected) detector events
    pub fn unweighted(coordinates: [f64; ND]) -> Self {
        Self::new(coordinates, 1.0, 1.0)
    }

    pub fn coordinates(&self) -> &[f64; ND] {
        &self.coordinates
    }

    pub fn coordinate(&self, dim: usize) -> f64 {
        self.coordinates[dim]
    }

    pub fn signal(&self) -> f64 {
        self.signal
    }

    pub fn error_squared(&self) -> f64 {
        self.error_squared
    }

    /// Size of one event in memory; used for buffer size reporting
    pub const fn size_bytes() -> usize {
        std::mem::size_of::<Self>()
    }
}
