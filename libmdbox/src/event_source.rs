use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::error::EventSourceError;
use super::event::MDEvent;
use super::extent::Extent;

/// The boundary to the event converter.
///
/// A source yields events already projected into the output frame and already known to
/// lie within the configured extents. Events come out in arrival order.
pub trait EventSource<const ND: usize> {
    /// Total number of events available locally
    fn n_events(&self) -> usize;

    /// The first `fraction` of the events by arrival order. A fraction of 1.0 gives all.
    fn events(&self, fraction: f64) -> Vec<MDEvent<ND>>;
}

/// Number of events selected by `fraction` out of `n_events`
pub fn n_selected(n_events: usize, fraction: f64) -> usize {
    if fraction >= 1.0 {
        n_events
    } else if fraction <= 0.0 || fraction.is_nan() {
        0
    } else {
        ((n_events as f64) * fraction).floor() as usize
    }
}

/// An in-memory, arrival ordered list of events
#[derive(Debug, Clone, Default)]
pub struct EventList<const ND: usize> {
    events: Vec<MDEvent<ND>>,
}

impl<const ND: usize> EventList<ND> {
    pub fn new(events: Vec<MDEvent<ND>>) -> Self {
        Self { events }
    }

    /// Build a list from columnar converter output: one row of `coords` per event
    pub fn from_arrays(
        coords: ArrayView2<f64>,
        signal: ArrayView1<f64>,
        error_squared: ArrayView1<f64>,
    ) -> Result<Self, EventSourceError> {
        let (n_rows, n_cols) = coords.dim();
        if n_cols != ND {
            return Err(EventSourceError::BadDimensions(n_cols, ND));
        }
        if signal.len() != n_rows || error_squared.len() != n_rows {
            return Err(EventSourceError::LengthMismatch(
                n_rows,
                signal.len(),
                error_squared.len(),
            ));
        }
        let events = coords
            .rows()
            .into_iter()
            .zip(signal.iter().zip(error_squared.iter()))
            .map(|(row, (s, e))| {
                let mut point = [0.0; ND];
                for (dim, value) in row.iter().enumerate() {
                    point[dim] = *value;
                }
                MDEvent::new(point, *s, *e)
            })
            .collect();
        Ok(Self { events })
    }

    /// Uniformly distributed unit weight events inside `extents`
    pub fn generate_uniform(n_events: usize, extents: &[Extent; ND], seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let events = (0..n_events)
            .map(|_| {
                let mut point = [0.0; ND];
                for (dim, value) in point.iter_mut().enumerate() {
                    *value = rng.gen_range(extents[dim].min..=extents[dim].max);
                }
                MDEvent::unweighted(point)
            })
            .collect();
        Self { events }
    }

    /// Events clustered around `n_peaks` random centres, like Bragg peaks in Q space.
    ///
    /// Positions are drawn from a box of half width `peak_width` around a centre and
    /// clipped into `extents`. Signal and error are drawn around one. The events are
    /// produced as columns and passed through `from_arrays`, the same way converter
    /// output is.
    pub fn generate_peaks(
        n_events: usize,
        extents: &[Extent; ND],
        n_peaks: usize,
        peak_width: f64,
        seed: u64,
    ) -> Result<Self, EventSourceError> {
        let mut rng = StdRng::seed_from_u64(seed);
        let n_peaks = n_peaks.max(1);
        let centres: Vec<[f64; ND]> = (0..n_peaks)
            .map(|_| {
                let mut centre = [0.0; ND];
                for (dim, value) in centre.iter_mut().enumerate() {
                    *value = rng.gen_range(extents[dim].min..=extents[dim].max);
                }
                centre
            })
            .collect();
        let half_width = if peak_width.is_finite() {
            peak_width.abs()
        } else {
            0.0
        };

        let mut coords = Array2::<f64>::zeros((n_events, ND));
        let mut signal = Array1::<f64>::zeros(n_events);
        for (idx, mut row) in coords.rows_mut().into_iter().enumerate() {
            let centre = &centres[idx % n_peaks];
            for (dim, value) in row.iter_mut().enumerate() {
                let offset = if half_width > 0.0 {
                    rng.gen_range(-half_width..=half_width)
                } else {
                    0.0
                };
                *value = (centre[dim] + offset).clamp(extents[dim].min, extents[dim].max);
            }
            signal[idx] = rng.gen_range(0.5..1.5);
        }
        Self::from_arrays(coords.view(), signal.view(), signal.view())
    }

    pub fn as_slice(&self) -> &[MDEvent<ND>] {
        &self.events
    }

    pub fn push(&mut self, event: MDEvent<ND>) {
        self.events.push(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn into_inner(self) -> Vec<MDEvent<ND>> {
        self.events
    }
}

impl<const ND: usize> EventSource<ND> for EventList<ND> {
    fn n_events(&self) -> usize {
        self.events.len()
    }

    fn events(&self, fraction: f64) -> Vec<MDEvent<ND>> {
        let n = n_selected(self.events.len(), fraction);
        self.events[..n].to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_fraction_takes_first_events() {
        let list = EventList::new((0..10).map(|i| MDEvent::unweighted([i as f64])).collect());
        let sample = list.events(0.35);
        assert_eq!(sample.len(), 3);
        assert_eq!(sample[2].coordinate(0), 2.0);
        assert_eq!(list.events(1.0).len(), 10);
        assert!(list.events(0.0).is_empty());
    }

    #[test]
    fn test_from_arrays() {
        let coords = array![[0.0, 1.0], [2.0, 3.0], [4.0, 5.0]];
        let signal = Array1::from(vec![1.0, 2.0, 3.0]);
        let error = Array1::from(vec![0.1, 0.2, 0.3]);
        let list = EventList::<2>::from_arrays(coords.view(), signal.view(), error.view()).unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list.as_slice()[1].coordinates(), &[2.0, 3.0]);
        assert_eq!(list.as_slice()[2].signal(), 3.0);

        let bad = EventList::<3>::from_arrays(coords.view(), signal.view(), error.view());
        assert!(matches!(bad, Err(EventSourceError::BadDimensions(2, 3))));
        let short = Array1::from(vec![1.0]);
        let bad = EventList::<2>::from_arrays(coords.view(), short.view(), error.view());
        assert!(matches!(bad, Err(EventSourceError::LengthMismatch(3, 1, 3))));
    }

    #[test]
    fn test_generated_events_are_inside_extents() {
        let extents = [Extent::new(-10.0, 10.0), Extent::new(0.0, 1.0), Extent::new(5.0, 6.0)];
        let uniform = EventList::generate_uniform(500, &extents, 7);
        let peaks = EventList::generate_peaks(500, &extents, 3, 2.0, 7).unwrap();
        for event in uniform.as_slice().iter().chain(peaks.as_slice()) {
            for (dim, extent) in extents.iter().enumerate() {
                assert!(extent.contains(event.coordinate(dim)));
            }
        }
        let again = EventList::generate_uniform(500, &extents, 7);
        assert_eq!(again.as_slice(), uniform.as_slice());
    }
}
