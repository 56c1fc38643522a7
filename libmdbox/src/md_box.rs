use super::box_controller::BoxController;
use super::error::BoxError;
use super::event::MDEvent;
use super::extent::Extent;

/// What a box holds: either events directly, or a regular grid of child boxes.
#[derive(Debug, Clone)]
pub enum BoxContent<const ND: usize> {
    Leaf(Vec<MDEvent<ND>>),
    Grid {
        split_into: [usize; ND],
        children: Vec<MDBox<ND>>,
    },
}

/// A node of the adaptive box tree.
///
/// A box covers `extents` and is either a leaf holding a buffer of events or a grid box
/// whose children tile its extents. Children are stored with dimension 0 varying
/// fastest. The cached statistics of a leaf are kept up to date on every insert; those
/// of a grid box are only valid after `refresh_statistics`.
#[derive(Debug, Clone)]
pub struct MDBox<const ND: usize> {
    id: u64,
    depth: usize,
    extents: [Extent; ND],
    n_events: u64,
    signal: f64,
    error_squared: f64,
    content: BoxContent<ND>,
}

impl<const ND: usize> MDBox<ND> {
    /// Create an empty leaf
    pub fn new_leaf(id: u64, depth: usize, extents: [Extent; ND]) -> Self {
        Self {
            id,
            depth,
            extents,
            n_events: 0,
            signal: 0.0,
            error_squared: 0.0,
            content: BoxContent::Leaf(Vec::new()),
        }
    }

    /// Create a grid box from existing children. The children must tile `extents`.
    pub fn new_grid(
        id: u64,
        depth: usize,
        extents: [Extent; ND],
        split_into: [usize; ND],
        children: Vec<MDBox<ND>>,
    ) -> Self {
        Self {
            id,
            depth,
            extents,
            n_events: 0,
            signal: 0.0,
            error_squared: 0.0,
            content: BoxContent::Grid {
                split_into,
                children,
            },
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn extents(&self) -> &[Extent; ND] {
        &self.extents
    }

    pub fn content(&self) -> &BoxContent<ND> {
        &self.content
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.content, BoxContent::Leaf(_))
    }

    pub fn event_count(&self) -> u64 {
        self.n_events
    }

    pub fn signal(&self) -> f64 {
        self.signal
    }

    pub fn error_squared(&self) -> f64 {
        self.error_squared
    }

    /// Events held directly by this box; empty for grid boxes
    pub fn events(&self) -> &[MDEvent<ND>] {
        match &self.content {
            BoxContent::Leaf(events) => events,
            BoxContent::Grid { .. } => &[],
        }
    }

    pub fn children(&self) -> &[MDBox<ND>] {
        match &self.content {
            BoxContent::Leaf(_) => &[],
            BoxContent::Grid { children, .. } => children,
        }
    }

    pub fn contains(&self, coordinates: &[f64; ND]) -> bool {
        self.extents
            .iter()
            .zip(coordinates.iter())
            .all(|(extent, value)| extent.contains(*value))
    }

    pub fn volume(&self) -> f64 {
        self.extents.iter().map(|e| e.width()).product()
    }

    pub fn signal_normalized(&self) -> f64 {
        self.signal / self.volume()
    }

    /// Add an event to this box, routing it down to the leaf which covers it.
    pub fn insert(&mut self, event: MDEvent<ND>) -> Result<(), BoxError> {
        if !self.contains(event.coordinates()) {
            return Err(BoxError::OutOfRange {
                box_id: self.id,
                coordinates: event.coordinates().to_vec(),
            });
        }
        self.insert_unchecked(event);
        Ok(())
    }

    /// Route an event known to be inside the extents. Coordinates on the outer edge of a
    /// child grid are clamped into the edge cells.
    fn insert_unchecked(&mut self, event: MDEvent<ND>) {
        match &mut self.content {
            BoxContent::Leaf(events) => {
                events.push(event);
                self.n_events += 1;
                self.signal += event.signal();
                self.error_squared += event.error_squared();
            }
            BoxContent::Grid {
                split_into,
                children,
            } => {
                let index = child_index(&self.extents, split_into, event.coordinates());
                children[index].insert_unchecked(event);
            }
        }
    }

    /// Split this leaf if the controller's policy says it holds too many events.
    ///
    /// Returns true if a split happened. Grid boxes and leaves under the threshold are
    /// left alone.
    pub fn split_if_needed(&mut self, controller: &mut BoxController) -> bool {
        let n_events = match &self.content {
            BoxContent::Leaf(events) => events.len() as u64,
            BoxContent::Grid { .. } => return false,
        };
        if !controller.will_split(n_events, self.depth) {
            return false;
        }
        self.split(controller);
        true
    }

    /// Turn this leaf into a grid box, moving its events into new leaf children.
    /// Does nothing to a grid box.
    pub fn split(&mut self, controller: &mut BoxController) {
        let events = match &mut self.content {
            BoxContent::Leaf(events) => std::mem::take(events),
            BoxContent::Grid { .. } => return,
        };

        let mut split_into = [1usize; ND];
        for (dim, n) in split_into.iter_mut().enumerate() {
            *n = controller.split_into(dim);
        }
        let n_children: usize = split_into.iter().product();
        let child_depth = self.depth + 1;

        let mut children = Vec::with_capacity(n_children);
        for linear in 0..n_children {
            let cell = unravel_index(linear, &split_into);
            let mut extents = self.extents;
            for dim in 0..ND {
                extents[dim] = self.extents[dim].cell(cell[dim], split_into[dim]);
            }
            children.push(MDBox::new_leaf(
                controller.issue_box_id(),
                child_depth,
                extents,
            ));
        }
        controller.track_split(self.depth, n_children);

        for event in events {
            let index = child_index(&self.extents, &split_into, event.coordinates());
            children[index].insert_unchecked(event);
        }

        self.content = BoxContent::Grid {
            split_into,
            children,
        };
    }

    /// Split every leaf below (and including) this box that needs it. Newly made children
    /// are checked as well, so a dense cluster is split all the way down.
    pub fn split_all_if_needed(&mut self, controller: &mut BoxController) {
        if self.is_leaf() && !self.split_if_needed(controller) {
            return;
        }
        if let BoxContent::Grid { children, .. } = &mut self.content {
            for child in children.iter_mut() {
                child.split_all_if_needed(controller);
            }
        }
    }

    /// Split every leaf shallower than `target_depth`, regardless of population
    pub fn force_split_min_depth(&mut self, controller: &mut BoxController, target_depth: usize) {
        if self.depth >= target_depth {
            return;
        }
        if self.is_leaf() {
            self.split(controller);
        }
        if let BoxContent::Grid { children, .. } = &mut self.content {
            for child in children.iter_mut() {
                child.force_split_min_depth(controller, target_depth);
            }
        }
    }

    /// Recompute the cached event count, signal and error of the whole subtree
    pub fn refresh_statistics(&mut self) {
        match &mut self.content {
            BoxContent::Leaf(events) => {
                self.n_events = events.len() as u64;
                self.signal = events.iter().map(|e| e.signal()).sum();
                self.error_squared = events.iter().map(|e| e.error_squared()).sum();
            }
            BoxContent::Grid { children, .. } => {
                let mut n_events = 0;
                let mut signal = 0.0;
                let mut error_squared = 0.0;
                for child in children.iter_mut() {
                    child.refresh_statistics();
                    n_events += child.n_events;
                    signal += child.signal;
                    error_squared += child.error_squared;
                }
                self.n_events = n_events;
                self.signal = signal;
                self.error_squared = error_squared;
            }
        }
    }

    /// Remove all events from this leaf, resetting its statistics
    pub fn take_events(&mut self) -> Vec<MDEvent<ND>> {
        match &mut self.content {
            BoxContent::Leaf(events) => {
                self.n_events = 0;
                self.signal = 0.0;
                self.error_squared = 0.0;
                std::mem::take(events)
            }
            BoxContent::Grid { .. } => Vec::new(),
        }
    }

    /// Signal weighted mean position of the events below this box.
    ///
    /// Returns None if the subtree holds no signal.
    pub fn centroid(&self) -> Option<[f64; ND]> {
        let mut sum = [0.0; ND];
        let mut total_signal = 0.0;
        self.accumulate_centroid(&mut sum, &mut total_signal);
        if total_signal == 0.0 {
            return None;
        }
        for value in sum.iter_mut() {
            *value /= total_signal;
        }
        Some(sum)
    }

    fn accumulate_centroid(&self, sum: &mut [f64; ND], total_signal: &mut f64) {
        match &self.content {
            BoxContent::Leaf(events) => {
                for event in events {
                    for (dim, value) in sum.iter_mut().enumerate() {
                        *value += event.coordinate(dim) * event.signal();
                    }
                    *total_signal += event.signal();
                }
            }
            BoxContent::Grid { children, .. } => {
                for child in children {
                    child.accumulate_centroid(sum, total_signal);
                }
            }
        }
    }

    /// Visit every box of the subtree in pre-order
    pub fn visit<'a, F: FnMut(&'a MDBox<ND>)>(&'a self, f: &mut F) {
        f(self);
        for child in self.children() {
            child.visit(f);
        }
    }

    /// All leaves of the subtree, in pre-order
    pub fn leaves(&self) -> Vec<&MDBox<ND>> {
        let mut leaves = Vec::new();
        self.visit(&mut |b| {
            if b.is_leaf() {
                leaves.push(b)
            }
        });
        leaves
    }

    /// Mutable access to all leaves of the subtree, in pre-order
    pub fn leaves_mut(&mut self) -> Vec<&mut MDBox<ND>> {
        let mut leaves = Vec::new();
        self.collect_leaves_mut(&mut leaves);
        leaves
    }

    fn collect_leaves_mut<'a>(&'a mut self, leaves: &mut Vec<&'a mut MDBox<ND>>) {
        if self.is_leaf() {
            leaves.push(self);
            return;
        }
        if let BoxContent::Grid { children, .. } = &mut self.content {
            for child in children.iter_mut() {
                child.collect_leaves_mut(leaves);
            }
        }
    }

    pub fn find_box(&self, id: u64) -> Option<&MDBox<ND>> {
        if self.id == id {
            return Some(self);
        }
        self.children().iter().find_map(|child| child.find_box(id))
    }

    pub fn count_boxes(&self) -> usize {
        1 + self.children().iter().map(|c| c.count_boxes()).sum::<usize>()
    }

    pub fn max_depth_reached(&self) -> usize {
        self.children()
            .iter()
            .map(|c| c.max_depth_reached())
            .max()
            .unwrap_or(self.depth)
    }
}

/// Index of the child of a grid over `extents` which covers `coordinates`
fn child_index<const ND: usize>(
    extents: &[Extent; ND],
    split_into: &[usize; ND],
    coordinates: &[f64; ND],
) -> usize {
    let mut index = 0;
    let mut stride = 1;
    for dim in 0..ND {
        index += extents[dim].cell_index(coordinates[dim], split_into[dim]) * stride;
        stride *= split_into[dim];
    }
    index
}

/// Per dimension cell of a linear child index
fn unravel_index<const ND: usize>(mut linear: usize, split_into: &[usize; ND]) -> [usize; ND] {
    let mut cell = [0; ND];
    for dim in 0..ND {
        cell[dim] = linear % split_into[dim];
        linear /= split_into[dim];
    }
    cell
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::box_controller::SplitSettings;

    fn controller<const ND: usize>(split_into: usize, threshold: u64, max_depth: usize) -> BoxController {
        let settings = SplitSettings {
            split_into: vec![split_into],
            split_threshold: threshold,
            max_depth,
            min_depth: 0,
        };
        BoxController::with_settings(ND, &settings).unwrap()
    }

    fn root<const ND: usize>(bc: &mut BoxController, min: f64, max: f64) -> MDBox<ND> {
        bc.track_leaf(0);
        MDBox::new_leaf(bc.issue_box_id(), 0, [Extent::new(min, max); ND])
    }

    fn assert_tiles<const ND: usize>(parent: &MDBox<ND>) {
        if parent.is_leaf() {
            return;
        }
        let children = parent.children();
        let parent_volume = parent.volume();
        let child_volume: f64 = children.iter().map(|c| c.volume()).sum();
        assert!((parent_volume - child_volume).abs() < 1e-9 * parent_volume);
        for (i, a) in children.iter().enumerate() {
            for dim in 0..ND {
                assert!(a.extents()[dim].min >= parent.extents()[dim].min);
                assert!(a.extents()[dim].max <= parent.extents()[dim].max);
            }
            for b in children.iter().skip(i + 1) {
                let overlapping = (0..ND).all(|dim| {
                    a.extents()[dim].min < b.extents()[dim].max
                        && b.extents()[dim].min < a.extents()[dim].max
                });
                assert!(!overlapping, "children {} and {} overlap", a.id(), b.id());
            }
        }
        for child in children {
            assert_eq!(child.depth(), parent.depth() + 1);
            assert_tiles(child);
        }
    }

    fn check_tiling<const ND: usize>() {
        for split_into in 1..=5 {
            let mut bc = controller::<ND>(split_into, 1, 3);
            let mut b = root::<ND>(&mut bc, -1.0, 3.0);
            b.split(&mut bc);
            assert_eq!(b.children().len(), split_into.pow(ND as u32));
            if let Some(last) = b.leaves_mut().pop() {
                last.split(&mut bc);
            }
            assert!(!b.children()[b.children().len() - 1].is_leaf());
            assert_tiles(&b);
        }
    }

    #[test]
    fn test_tiling_all_dimensions() {
        check_tiling::<1>();
        check_tiling::<2>();
        check_tiling::<3>();
        check_tiling::<4>();
    }

    #[test]
    fn test_wide_extent_tiles() {
        let mut bc = controller::<1>(3, 1, 2);
        let mut b = root::<1>(&mut bc, -8e307, 8e307);
        b.split(&mut bc);
        assert_tiles(&b);
        assert_eq!(b.children()[2].extents()[0].max, 8e307);
    }

    #[test]
    fn test_leaf_rejects_out_of_range() {
        let mut bc = controller::<3>(2, 10, 3);
        let mut b = root::<3>(&mut bc, -10.0, 10.0);
        let result = b.insert(MDEvent::unweighted([0.0, 10.5, 0.0]));
        assert!(matches!(result, Err(BoxError::OutOfRange { box_id: 0, .. })));
        assert!(b.insert(MDEvent::unweighted([0.0, f64::NAN, 0.0])).is_err());
        assert_eq!(b.event_count(), 0);
    }

    #[test]
    fn test_split_redistributes_events() {
        let mut bc = controller::<2>(2, 3, 3);
        let mut b = root::<2>(&mut bc, -10.0, 10.0);
        let points = [[-5.0, -5.0], [5.0, -5.0], [-5.0, 5.0], [5.0, 5.0]];
        for p in points {
            b.insert(MDEvent::new(p, 2.0, 1.0)).unwrap();
        }
        assert!(b.split_if_needed(&mut bc));
        assert!(!b.is_leaf());
        assert!(b.events().is_empty());
        for child in b.children() {
            assert_eq!(child.event_count(), 1);
            assert!(child.contains(child.events()[0].coordinates()));
        }
        b.refresh_statistics();
        assert_eq!(b.event_count(), 4);
        assert_eq!(b.signal(), 8.0);
        assert_eq!(b.error_squared(), 4.0);
    }

    #[test]
    fn test_split_is_idempotent() {
        let mut bc = controller::<2>(2, 1, 1);
        let mut b = root::<2>(&mut bc, 0.0, 1.0);
        b.insert(MDEvent::unweighted([0.2, 0.2])).unwrap();
        b.insert(MDEvent::unweighted([0.7, 0.7])).unwrap();
        assert!(b.split_if_needed(&mut bc));
        let boxes = b.count_boxes();
        let next_id = bc.max_box_id();
        assert!(!b.split_if_needed(&mut bc));
        assert_eq!(b.count_boxes(), boxes);
        assert_eq!(bc.max_box_id(), next_id);
    }

    #[test]
    fn test_under_threshold_is_not_split() {
        let mut bc = controller::<1>(2, 5, 3);
        let mut b = root::<1>(&mut bc, 0.0, 1.0);
        for i in 0..5 {
            b.insert(MDEvent::unweighted([i as f64 / 5.0])).unwrap();
        }
        assert!(!b.split_if_needed(&mut bc));
        assert!(b.is_leaf());
    }

    #[test]
    fn test_upper_extent_goes_to_last_child() {
        let mut bc = controller::<1>(2, 100, 3);
        let mut b = root::<1>(&mut bc, -10.0, 10.0);
        b.split(&mut bc);
        b.insert(MDEvent::unweighted([10.0])).unwrap();
        b.insert(MDEvent::unweighted([-10.0])).unwrap();
        assert_eq!(b.children()[1].event_count(), 1);
        assert_eq!(b.children()[0].event_count(), 1);
    }

    #[test]
    fn test_boundary_assignment_ignores_order() {
        let boundary = [MDEvent::unweighted([0.0, 0.0]), MDEvent::unweighted([0.0, 5.0])];
        let mut first = None;
        for order in [[0, 1], [1, 0]] {
            let mut bc = controller::<2>(2, 100, 3);
            let mut b = root::<2>(&mut bc, -10.0, 10.0);
            b.split(&mut bc);
            for idx in order {
                b.insert(boundary[idx]).unwrap();
            }
            let counts: Vec<u64> = b.children().iter().map(|c| c.event_count()).collect();
            if let Some(expected) = &first {
                assert_eq!(expected, &counts);
            } else {
                first = Some(counts);
            }
        }
        assert_eq!(first.unwrap(), vec![0, 0, 0, 2]);
    }

    #[test]
    fn test_split_all_respects_max_depth() {
        let mut bc = controller::<2>(2, 1, 3);
        let mut b = root::<2>(&mut bc, 0.0, 1.0);
        for _ in 0..10 {
            b.insert(MDEvent::unweighted([0.1, 0.1])).unwrap();
        }
        b.split_all_if_needed(&mut bc);
        assert_eq!(b.max_depth_reached(), 3);
        let deepest = b.leaves().into_iter().find(|l| l.event_count() > 0).unwrap();
        assert_eq!(deepest.depth(), 3);
        assert_eq!(deepest.event_count(), 10);
        assert_eq!(bc.total_boxes(), b.count_boxes());
    }

    #[test]
    fn test_force_split_empty_box() {
        let mut bc = controller::<3>(2, 100, 5);
        let mut b = root::<3>(&mut bc, -1.0, 1.0);
        b.force_split_min_depth(&mut bc, 2);
        assert_eq!(b.children().len(), 8);
        for child in b.children() {
            assert_eq!(child.children().len(), 8);
            assert!(child.children().iter().all(|c| c.is_leaf() && c.event_count() == 0));
        }
        assert_eq!(bc.total_leaf_boxes(), 64);
        assert_eq!(bc.num_leaf_boxes()[2], 64);
    }

    #[test]
    fn test_centroid_and_take_events() {
        let mut bc = controller::<2>(2, 100, 3);
        let mut b = root::<2>(&mut bc, 0.0, 4.0);
        b.insert(MDEvent::new([1.0, 1.0], 1.0, 1.0)).unwrap();
        b.insert(MDEvent::new([3.0, 1.0], 3.0, 1.0)).unwrap();
        assert_eq!(b.centroid(), Some([2.5, 1.0]));
        assert_eq!(b.signal_normalized(), 4.0 / 16.0);
        let events = b.take_events();
        assert_eq!(events.len(), 2);
        assert_eq!(b.event_count(), 0);
        assert_eq!(b.centroid(), None);
    }

    #[test]
    fn test_find_box() {
        let mut bc = controller::<2>(2, 100, 3);
        let mut b = root::<2>(&mut bc, 0.0, 4.0);
        b.force_split_min_depth(&mut bc, 2);
        let found = b.find_box(7).unwrap();
        assert_eq!(found.id(), 7);
        assert!(b.find_box(1000).is_none());
        assert_eq!(b.leaves_mut().len(), 16);
    }
}
