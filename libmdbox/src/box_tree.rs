use super::box_controller::{BoxController, SplitSettings};
use super::error::{BoxError, ConfigError};
use super::event::MDEvent;
use super::extent::{validate_extents, Extent};
use super::frame::{FrameInformation, SpecialCoordinateSystem};
use super::md_box::MDBox;

/// Summary of the shape and content of a box tree
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TreeStatistics {
    pub total_boxes: usize,
    pub leaf_boxes: usize,
    pub grid_boxes: usize,
    pub max_depth_reached: usize,
    pub n_events: u64,
    pub signal: f64,
    pub error_squared: f64,
    pub event_bytes: usize,
}

/// BoxTree owns the root box of an adaptive box structure and its BoxController.
///
/// This is the core of an MD event workspace: events are added through the tree, which
/// decides when to run split sweeps and keeps the cached statistics refreshed.
#[derive(Debug)]
pub struct BoxTree<const ND: usize> {
    root: MDBox<ND>,
    controller: BoxController,
    frame: FrameInformation,
    min_recursion_depth_applied: bool,
}

impl<const ND: usize> BoxTree<ND> {
    /// Create a tree with a single root leaf spanning `extents`.
    ///
    /// The splitting policy is validated before anything is created. If the settings ask
    /// for a minimum recursion depth the root is split down to it immediately.
    pub fn initialize(
        extents: [Extent; ND],
        frame: FrameInformation,
        settings: &SplitSettings,
    ) -> Result<Self, ConfigError> {
        validate_extents(&extents)?;
        let mut controller = BoxController::with_settings(ND, settings)?;
        controller.track_leaf(0);
        let root = MDBox::new_leaf(controller.issue_box_id(), 0, extents);
        let mut tree = Self {
            root,
            controller,
            frame,
            min_recursion_depth_applied: false,
        };
        if settings.min_depth > 0 {
            tree.set_min_recursion_depth(settings.min_depth);
        }
        Ok(tree)
    }

    /// Reassemble a tree from parts taken out with `extract_ownership`
    pub fn from_parts(root: MDBox<ND>, controller: BoxController, frame: FrameInformation) -> Self {
        let min_recursion_depth_applied = controller.min_depth() > 0;
        Self {
            root,
            controller,
            frame,
            min_recursion_depth_applied,
        }
    }

    /// Split every box down to `depth`, regardless of how many events it holds
    pub fn set_min_recursion_depth(&mut self, depth: usize) {
        self.root.force_split_min_depth(&mut self.controller, depth);
        self.min_recursion_depth_applied = true;
    }

    pub fn add_event(&mut self, event: MDEvent<ND>) -> Result<(), BoxError> {
        self.root.insert(event)
    }

    pub fn split_all_if_needed(&mut self) {
        self.root.split_all_if_needed(&mut self.controller);
    }

    /// Run `split_all_if_needed` only on the leaves whose id passes `filter`
    pub fn split_leaves_if_needed<F: Fn(u64) -> bool>(&mut self, filter: F) {
        let controller = &mut self.controller;
        for leaf in self.root.leaves_mut() {
            if filter(leaf.id()) {
                leaf.split_all_if_needed(controller);
            }
        }
    }

    /// Add a batch of events, sweeping for boxes to split whenever the controller says
    /// enough new events have piled up, then split and refresh a final time.
    pub fn bulk_load<I: IntoIterator<Item = MDEvent<ND>>>(
        &mut self,
        events: I,
    ) -> Result<(), BoxError> {
        let mut events_added_since_last_split: u64 = 0;
        let mut events_added_total: u64 = 0;
        let mut last_num_boxes = self.controller.total_leaf_boxes();
        for event in events {
            if self.controller.should_split_boxes(
                events_added_total,
                events_added_since_last_split,
                last_num_boxes,
            ) {
                self.split_all_if_needed();
                spdlog::trace!(
                    "Split sweep after {} events; {} boxes",
                    events_added_total,
                    self.controller.total_boxes()
                );
                events_added_since_last_split = 0;
                last_num_boxes = self.controller.total_leaf_boxes();
            }
            events_added_since_last_split += 1;
            events_added_total += 1;
            self.add_event(event)?;
        }
        self.split_all_if_needed();
        self.refresh_statistics();
        Ok(())
    }

    pub fn refresh_statistics(&mut self) {
        self.root.refresh_statistics();
    }

    /// Move the box structure and controller out of the tree without copying
    pub fn extract_ownership(self) -> (MDBox<ND>, BoxController) {
        (self.root, self.controller)
    }

    pub fn root(&self) -> &MDBox<ND> {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut MDBox<ND> {
        &mut self.root
    }

    pub fn controller(&self) -> &BoxController {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut BoxController {
        &mut self.controller
    }

    pub fn dimension_names(&self) -> &[String] {
        &self.frame.dimension_names
    }

    pub fn coordinate_system(&self) -> SpecialCoordinateSystem {
        self.frame.coordinate_system
    }

    pub fn frame(&self) -> &FrameInformation {
        &self.frame
    }

    pub fn is_min_recursion_depth_applied(&self) -> bool {
        self.min_recursion_depth_applied
    }

    /// Total events as of the last refresh
    pub fn n_events(&self) -> u64 {
        self.root.event_count()
    }

    /// Walk the tree and summarize it. Event totals are as of the last refresh.
    pub fn statistics(&self) -> TreeStatistics {
        let mut stats = TreeStatistics {
            n_events: self.root.event_count(),
            signal: self.root.signal(),
            error_squared: self.root.error_squared(),
            ..Default::default()
        };
        self.root.visit(&mut |b| {
            stats.total_boxes += 1;
            stats.max_depth_reached = stats.max_depth_reached.max(b.depth());
            if b.is_leaf() {
                stats.leaf_boxes += 1;
                stats.event_bytes += b.events().len() * MDEvent::<ND>::size_bytes();
            } else {
                stats.grid_boxes += 1;
            }
        });
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_source::EventList;
    use crate::frame::OutputFrame;

    fn extents3() -> [Extent; 3] {
        [Extent::new(-10.0, 10.0); 3]
    }

    fn settings(split_into: usize, threshold: u64, max_depth: usize, min_depth: usize) -> SplitSettings {
        SplitSettings {
            split_into: vec![split_into],
            split_threshold: threshold,
            max_depth,
            min_depth,
        }
    }

    #[test]
    fn test_uniform_scenario() {
        let frame = OutputFrame::QLab.create_frame(3);
        let mut tree = BoxTree::initialize(extents3(), frame, &settings(2, 100, 3, 0)).unwrap();
        let events = EventList::generate_uniform(1000, &extents3(), 42);
        tree.bulk_load(events.into_inner()).unwrap();

        assert!(!tree.root().is_leaf());
        assert_eq!(tree.n_events(), 1000);
        for leaf in tree.root().leaves() {
            assert!(leaf.event_count() <= 100 || leaf.depth() == 3);
            assert!(leaf.depth() <= 3);
        }
        let stats = tree.statistics();
        assert_eq!(stats.total_boxes, tree.controller().total_boxes());
        assert_eq!(stats.leaf_boxes, tree.controller().total_leaf_boxes());
        assert_eq!(stats.signal, 1000.0);
        assert_eq!(tree.dimension_names()[0], "Q_lab_x");
    }

    #[test]
    fn test_min_depth_without_events() {
        let frame = OutputFrame::HKL.create_frame(3);
        let tree = BoxTree::initialize(extents3(), frame, &settings(2, 100, 5, 2)).unwrap();
        assert!(tree.is_min_recursion_depth_applied());
        let root = tree.root();
        assert_eq!(root.children().len(), 8);
        for child in root.children() {
            assert_eq!(child.depth(), 1);
            assert_eq!(child.children().len(), 8);
            for grandchild in child.children() {
                assert_eq!(grandchild.depth(), 2);
                assert!(grandchild.is_leaf());
                assert_eq!(grandchild.event_count(), 0);
            }
        }
        assert_eq!(tree.coordinate_system(), SpecialCoordinateSystem::HKL);
    }

    #[test]
    fn test_conservation_eager_and_lazy() {
        let events = EventList::generate_peaks(3000, &extents3(), 3, 1.5, 11)
            .unwrap()
            .into_inner();
        let expected_signal: f64 = events.iter().map(|e| e.signal()).sum();

        let mut lazy = BoxTree::initialize(extents3(), FrameInformation::default(), &settings(2, 20, 6, 0)).unwrap();
        lazy.bulk_load(events.clone()).unwrap();

        let mut eager = BoxTree::initialize(extents3(), FrameInformation::default(), &settings(2, 20, 6, 0)).unwrap();
        for event in events {
            eager.add_event(event).unwrap();
            eager.split_all_if_needed();
        }
        eager.refresh_statistics();

        for tree in [&lazy, &eager] {
            assert_eq!(tree.n_events(), 3000);
            assert!((tree.root().signal() - expected_signal).abs() < 1e-6);
            assert!(tree.root().max_depth_reached() <= 6);
        }
    }

    #[test]
    fn test_out_of_range_event_is_rejected() {
        let mut tree = BoxTree::initialize(extents3(), FrameInformation::default(), &settings(2, 10, 3, 1)).unwrap();
        let result = tree.add_event(MDEvent::unweighted([0.0, 0.0, 10.01]));
        assert!(matches!(result, Err(BoxError::OutOfRange { .. })));
        assert!(tree.bulk_load(vec![MDEvent::unweighted([-11.0, 0.0, 0.0])]).is_err());
    }

    #[test]
    fn test_upper_extent_event_is_kept() {
        let mut tree = BoxTree::initialize(
            [Extent::new(-10.0, 10.0)],
            FrameInformation::default(),
            &settings(2, 100, 3, 1),
        )
        .unwrap();
        tree.add_event(MDEvent::unweighted([10.0])).unwrap();
        tree.refresh_statistics();
        assert_eq!(tree.root().children()[1].event_count(), 1);
        assert_eq!(tree.n_events(), 1);
    }

    #[test]
    fn test_invalid_settings_are_rejected() {
        let bad_depth = BoxTree::initialize(extents3(), FrameInformation::default(), &settings(2, 10, 2, 3));
        assert!(matches!(bad_depth, Err(ConfigError::InvalidConfiguration(_))));
        let bad_split = SplitSettings {
            split_into: vec![2, 2],
            ..Default::default()
        };
        let result = BoxTree::initialize(extents3(), FrameInformation::default(), &bad_split);
        assert!(matches!(result, Err(ConfigError::InvalidConfiguration(_))));
        let flat = [Extent::new(1.0, -1.0); 3];
        let result = BoxTree::initialize(flat, FrameInformation::default(), &SplitSettings::default());
        assert!(matches!(result, Err(ConfigError::InvalidConfiguration(_))));
        let too_wide = [Extent::new(-1e308, 1e308); 3];
        let result = BoxTree::initialize(too_wide, FrameInformation::default(), &SplitSettings::default());
        assert!(matches!(result, Err(ConfigError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_extract_ownership() {
        let frame = OutputFrame::QLab.create_frame(3);
        let mut tree = BoxTree::initialize(extents3(), frame.clone(), &settings(2, 5, 4, 0)).unwrap();
        tree.bulk_load(EventList::generate_uniform(200, &extents3(), 3).into_inner())
            .unwrap();
        let boxes = tree.root().count_boxes();
        let (root, controller) = tree.extract_ownership();
        assert_eq!(root.count_boxes(), boxes);
        assert_eq!(controller.total_boxes(), boxes);
        let rebuilt = BoxTree::from_parts(root, controller, frame);
        assert_eq!(rebuilt.n_events(), 200);
    }
}
