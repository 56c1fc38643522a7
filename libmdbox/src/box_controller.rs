use serde::{Deserialize, Serialize};

use super::constants::*;
use super::error::ConfigError;

/// The user facing box splitting parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitSettings {
    /// Either one value used for every dimension, or one value per dimension
    pub split_into: Vec<usize>,
    pub split_threshold: u64,
    pub max_depth: usize,
    pub min_depth: usize,
}

impl Default for SplitSettings {
    fn default() -> Self {
        Self {
            split_into: vec![DEFAULT_SPLIT_INTO],
            split_threshold: DEFAULT_SPLIT_THRESHOLD,
            max_depth: DEFAULT_MAX_RECURSION_DEPTH,
            min_depth: DEFAULT_MIN_RECURSION_DEPTH,
        }
    }
}

/// BoxController holds the splitting policy of a box tree and its bookkeeping.
///
/// Every box of a tree is split according to the same controller. The controller also
/// hands out box ids and keeps count of how many leaf (MD) and grid boxes exist at each
/// depth, which is what the bulk loader uses to decide when a split sweep is due.
#[derive(Debug, Clone)]
pub struct BoxController {
    n_dims: usize,
    split_into: Vec<usize>,
    split_threshold: u64,
    max_depth: usize,
    min_depth: usize,
    splitting_enabled: bool,
    next_id: u64,
    num_leaf_boxes: Vec<usize>,
    num_grid_boxes: Vec<usize>,
}

impl BoxController {
    /// Create an unconfigured controller; uses the default splitting policy
    pub fn new(n_dims: usize) -> Self {
        Self {
            n_dims,
            split_into: vec![DEFAULT_SPLIT_INTO; n_dims],
            split_threshold: DEFAULT_SPLIT_THRESHOLD,
            max_depth: DEFAULT_MAX_RECURSION_DEPTH,
            min_depth: DEFAULT_MIN_RECURSION_DEPTH,
            splitting_enabled: true,
            next_id: 0,
            num_leaf_boxes: vec![0; DEFAULT_MAX_RECURSION_DEPTH + 1],
            num_grid_boxes: vec![0; DEFAULT_MAX_RECURSION_DEPTH + 1],
        }
    }

    /// Create a controller and apply the given settings
    pub fn with_settings(n_dims: usize, settings: &SplitSettings) -> Result<Self, ConfigError> {
        let mut controller = Self::new(n_dims);
        controller.configure(
            &settings.split_into,
            settings.split_threshold,
            settings.max_depth,
            settings.min_depth,
        )?;
        Ok(controller)
    }

    /// Set the splitting policy. Must be done before any boxes exist.
    pub fn configure(
        &mut self,
        split_into: &[usize],
        split_threshold: u64,
        max_depth: usize,
        min_depth: usize,
    ) -> Result<(), ConfigError> {
        if min_depth > max_depth {
            return Err(ConfigError::InvalidConfiguration(format!(
                "MinRecursionDepth ({min_depth}) must be <= MaxRecursionDepth ({max_depth})"
            )));
        }
        if max_depth < 1 {
            return Err(ConfigError::InvalidConfiguration(String::from(
                "MaxRecursionDepth must be at least 1",
            )));
        }
        if split_threshold < 1 {
            return Err(ConfigError::InvalidConfiguration(String::from(
                "SplitThreshold must be positive",
            )));
        }
        let split_into = if split_into.len() == 1 {
            vec![split_into[0]; self.n_dims]
        } else if split_into.len() == self.n_dims {
            split_into.to_vec()
        } else {
            return Err(ConfigError::InvalidConfiguration(format!(
                "SplitInto parameter has {} arguments. It should have either 1, or the same as the number of dimensions ({}).",
                split_into.len(),
                self.n_dims
            )));
        };
        if split_into.contains(&0) {
            return Err(ConfigError::InvalidConfiguration(String::from(
                "SplitInto values must be at least 1",
            )));
        }

        self.split_into = split_into;
        self.split_threshold = split_threshold;
        self.max_depth = max_depth;
        self.min_depth = min_depth;
        self.reset_box_counts();
        Ok(())
    }

    pub fn n_dims(&self) -> usize {
        self.n_dims
    }

    pub fn split_into(&self, dim: usize) -> usize {
        self.split_into[dim]
    }

    pub fn split_into_all(&self) -> &[usize] {
        &self.split_into
    }

    /// Number of children created by one split
    pub fn num_split(&self) -> usize {
        self.split_into.iter().product()
    }

    pub fn split_threshold(&self) -> u64 {
        self.split_threshold
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn min_depth(&self) -> usize {
        self.min_depth
    }

    pub fn is_splitting_enabled(&self) -> bool {
        self.splitting_enabled
    }

    /// Freeze (false) or unfreeze (true) the shape of the tree
    pub fn set_splitting_enabled(&mut self, enabled: bool) {
        self.splitting_enabled = enabled;
    }

    /// Would a leaf holding `n_events` at `depth` be split?
    pub fn will_split(&self, n_events: u64, depth: usize) -> bool {
        self.splitting_enabled && n_events > self.split_threshold && depth < self.max_depth
    }

    /// Decide whether a bulk loader should pause and run a split sweep.
    ///
    /// Sweep once more than 1/16th of the current output has been added, and never
    /// before ten million events, or once the added events alone would put the average
    /// leaf over the split threshold.
    pub fn should_split_boxes(
        &self,
        events_added_total: u64,
        events_added_since_last_split: u64,
        last_num_leaf_boxes: usize,
    ) -> bool {
        if last_num_leaf_boxes == 0 {
            return false;
        }
        let comparison_point = std::cmp::max(
            events_added_total / SPLIT_SWEEP_OUTPUT_DIVISOR,
            SPLIT_SWEEP_MIN_EVENTS,
        );
        if events_added_since_last_split > comparison_point {
            return true;
        }
        (events_added_since_last_split / last_num_leaf_boxes as u64) > self.split_threshold
    }

    /// Get a new unique box id
    pub fn issue_box_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Largest id issued so far, if any
    pub fn max_box_id(&self) -> Option<u64> {
        self.next_id.checked_sub(1)
    }

    /// Make sure ids up to and including `id` are never issued again
    pub fn reserve_ids_through(&mut self, id: u64) {
        self.next_id = self.next_id.max(id + 1);
    }

    pub fn reset_box_counts(&mut self) {
        self.num_leaf_boxes = vec![0; self.max_depth + 1];
        self.num_grid_boxes = vec![0; self.max_depth + 1];
    }

    /// Record a new leaf at the given depth
    pub fn track_leaf(&mut self, depth: usize) {
        self.ensure_depth(depth);
        self.num_leaf_boxes[depth] += 1;
    }

    /// Record a new grid box at the given depth
    pub fn track_grid(&mut self, depth: usize) {
        self.ensure_depth(depth);
        self.num_grid_boxes[depth] += 1;
    }

    /// Record that a leaf at `depth` became a grid box with `n_children` leaves
    pub fn track_split(&mut self, depth: usize, n_children: usize) {
        self.ensure_depth(depth + 1);
        self.num_leaf_boxes[depth] = self.num_leaf_boxes[depth].saturating_sub(1);
        self.num_grid_boxes[depth] += 1;
        self.num_leaf_boxes[depth + 1] += n_children;
    }

    fn ensure_depth(&mut self, depth: usize) {
        if depth >= self.num_leaf_boxes.len() {
            self.num_leaf_boxes.resize(depth + 1, 0);
            self.num_grid_boxes.resize(depth + 1, 0);
        }
    }

    pub fn num_leaf_boxes(&self) -> &[usize] {
        &self.num_leaf_boxes
    }

    pub fn num_grid_boxes(&self) -> &[usize] {
        &self.num_grid_boxes
    }

    pub fn total_leaf_boxes(&self) -> usize {
        self.num_leaf_boxes.iter().sum()
    }

    pub fn total_grid_boxes(&self) -> usize {
        self.num_grid_boxes.iter().sum()
    }

    pub fn total_boxes(&self) -> usize {
        self.total_leaf_boxes() + self.total_grid_boxes()
    }

    /// How many boxes could exist at `depth` if every box down to it were split
    pub fn max_boxes_at_depth(&self, depth: usize) -> f64 {
        (self.num_split() as f64).powi(depth as i32)
    }

    /// Leaf count weighted average depth
    pub fn average_depth(&self) -> f64 {
        let total = self.total_leaf_boxes();
        if total == 0 {
            return 0.0;
        }
        let weighted: usize = self
            .num_leaf_boxes
            .iter()
            .enumerate()
            .map(|(depth, count)| depth * count)
            .sum();
        weighted as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configure_uniform_split() {
        let mut bc = BoxController::new(3);
        bc.configure(&[4], 100, 5, 1).unwrap();
        assert_eq!(bc.split_into_all(), &[4, 4, 4]);
        assert_eq!(bc.num_split(), 64);
        assert_eq!(bc.min_depth(), 1);
    }

    #[test]
    fn test_configure_rejects_bad_settings() {
        let mut bc = BoxController::new(3);
        assert!(matches!(
            bc.configure(&[2], 100, 2, 3),
            Err(ConfigError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            bc.configure(&[2, 2], 100, 5, 0),
            Err(ConfigError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            bc.configure(&[2], 0, 5, 0),
            Err(ConfigError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            bc.configure(&[2, 0, 2], 10, 5, 0),
            Err(ConfigError::InvalidConfiguration(_))
        ));
        assert!(bc.configure(&[2, 3, 4], 10, 5, 0).is_ok());
    }

    #[test]
    fn test_will_split() {
        let mut bc = BoxController::new(2);
        bc.configure(&[2], 10, 3, 0).unwrap();
        assert!(!bc.will_split(10, 0));
        assert!(bc.will_split(11, 2));
        assert!(!bc.will_split(11, 3));
        bc.set_splitting_enabled(false);
        assert!(!bc.will_split(1000, 0));
    }

    #[test]
    fn test_should_split_boxes() {
        let mut bc = BoxController::new(3);
        bc.configure(&[2], 100, 5, 0).unwrap();
        assert!(!bc.should_split_boxes(0, 1000, 0));
        assert!(!bc.should_split_boxes(100, 100, 1));
        assert!(bc.should_split_boxes(101, 101, 1));
        assert!(!bc.should_split_boxes(1000, 500, 8));
        assert!(bc.should_split_boxes(20_000_000, 10_000_001, 1_000_000));
        // a sixteenth of a small output is not enough on its own
        assert!(!bc.should_split_boxes(1_000_000, 10_000_000, 1_000_000));
        assert!(!bc.should_split_boxes(320_000_000, 20_000_000, 1_000_000));
        assert!(bc.should_split_boxes(320_000_000, 20_000_001, 1_000_000));
    }

    #[test]
    fn test_box_ids_are_unique() {
        let mut bc = BoxController::new(1);
        assert_eq!(bc.max_box_id(), None);
        let ids: Vec<u64> = (0..5).map(|_| bc.issue_box_id()).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
        bc.reserve_ids_through(10);
        assert_eq!(bc.issue_box_id(), 11);
        bc.reserve_ids_through(3);
        assert_eq!(bc.issue_box_id(), 12);
    }

    #[test]
    fn test_box_counting() {
        let mut bc = BoxController::new(2);
        bc.configure(&[2], 10, 3, 0).unwrap();
        bc.track_leaf(0);
        bc.track_split(0, 4);
        bc.track_split(1, 4);
        assert_eq!(bc.total_leaf_boxes(), 7);
        assert_eq!(bc.total_grid_boxes(), 2);
        assert_eq!(bc.total_boxes(), 9);
        assert_eq!(bc.max_boxes_at_depth(2), 16.0);
        assert!((bc.average_depth() - (3.0 + 8.0) / 7.0).abs() < 1e-12);
    }
}
