use bit_set::BitSet;
use fxhash::FxHashMap;
use std::sync::mpsc::Sender;

use super::box_controller::{BoxController, SplitSettings};
use super::box_tree::{BoxTree, TreeStatistics};
use super::codec::{
    decode_bundles, decode_count, decode_events, decode_layout, encode_bundles, encode_count,
    encode_events, encode_layout, encoded_events_len, EventBundle,
};
use super::communicator::Communicator;
use super::constants::{COORDINATOR_RANK, DEFAULT_FRACTION, TAG_EXCHANGE, TAG_SAMPLE_EVENTS};
use super::error::{BuilderError, CommunicationError, ConfigError, PartitionError};
use super::event::MDEvent;
use super::event_source::EventSource;
use super::extent::{validate_extents, Extent};
use super::frame::{FrameInformation, OutputFrame};
use super::layout::BoxLayout;
use super::md_box::MDBox;
use super::worker_status::{BuildPhase, WorkerStatus};

/// Everything a worker needs to know to take part in a distributed build
#[derive(Debug, Clone)]
pub struct BuildSettings<const ND: usize> {
    pub extents: [Extent; ND],
    pub split: SplitSettings,
    /// Fraction of each worker's events (by arrival) sent to the coordinator
    pub fraction: f64,
    pub frame: OutputFrame,
}

impl<const ND: usize> BuildSettings<ND> {
    pub fn new(extents: [Extent; ND], split: SplitSettings) -> Self {
        Self {
            extents,
            split,
            fraction: DEFAULT_FRACTION,
            frame: OutputFrame::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_extents(&self.extents)?;
        BoxController::with_settings(ND, &self.split)?;
        if !(0.0..=1.0).contains(&self.fraction) {
            return Err(ConfigError::InvalidConfiguration(format!(
                "Fraction must be within [0, 1], found {}",
                self.fraction
            )));
        }
        Ok(())
    }
}

/// One worker's share of the finished box structure.
///
/// The tree keeps the full shape of the shared layout, but only the subtrees under the
/// owned layout leaves hold events. Summing the statistics of every worker gives the
/// totals of the whole distributed structure.
#[derive(Debug)]
pub struct DistributedBoxes<const ND: usize> {
    rank: usize,
    owned: BitSet,
    tree: BoxTree<ND>,
}

impl<const ND: usize> DistributedBoxes<ND> {
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Ids of the layout leaves owned by this worker
    pub fn owned_box_ids(&self) -> &BitSet {
        &self.owned
    }

    /// The subtrees rooted at the owned layout leaves
    pub fn owned_boxes(&self) -> Vec<&MDBox<ND>> {
        let mut boxes = Vec::new();
        self.tree.root().visit(&mut |b| {
            if self.owned.contains(b.id() as usize) {
                boxes.push(b);
            }
        });
        boxes
    }

    pub fn tree(&self) -> &BoxTree<ND> {
        &self.tree
    }

    pub fn statistics(&self) -> TreeStatistics {
        self.tree.statistics()
    }

    pub fn into_parts(self) -> (MDBox<ND>, BoxController) {
        self.tree.extract_ownership()
    }
}

/// Builds the box structure for one worker of a group.
///
/// Every worker of the communicator runs its own builder on its own events. The
/// coordinator (rank 0) builds a preliminary structure from a sample of everyone's events
/// and shares its layout; each worker then fills that layout with all its events, hands
/// the events of boxes it does not own to their owners, and finally splits the boxes it
/// owns without further communication.
pub struct DistributedBoxBuilder<C: Communicator, const ND: usize> {
    comm: C,
    settings: BuildSettings<ND>,
    status: Option<Sender<WorkerStatus>>,
    phase: BuildPhase,
}

impl<C: Communicator, const ND: usize> DistributedBoxBuilder<C, ND> {
    pub fn new(comm: C, settings: BuildSettings<ND>) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Self {
            comm,
            settings,
            status: None,
            phase: BuildPhase::default(),
        })
    }

    /// Report each phase change over `tx`
    pub fn with_status(mut self, tx: Sender<WorkerStatus>) -> Self {
        self.status = Some(tx);
        self
    }

    pub fn phase(&self) -> BuildPhase {
        self.phase
    }

    fn enter(&mut self, phase: BuildPhase) -> Result<(), BuilderError> {
        self.phase = phase;
        spdlog::debug!("Worker {}: {}", self.comm.rank(), phase);
        if let Some(tx) = &self.status {
            tx.send(WorkerStatus::from_phase(phase, self.comm.rank()))?;
        }
        Ok(())
    }

    /// Run the whole build and return this worker's portion of the box structure
    pub fn build<S: EventSource<ND>>(
        mut self,
        source: &S,
    ) -> Result<DistributedBoxes<ND>, BuilderError> {
        let rank = self.comm.rank();
        let n_ranks = self.comm.size();
        let frame = self.settings.frame.create_frame(ND);

        if n_ranks == 1 {
            return self.build_single(source, frame);
        }

        self.enter(BuildPhase::Sampling)?;
        let sample = source.events(self.settings.fraction);
        spdlog::info!(
            "Worker {rank} sampled {} of {} events",
            sample.len(),
            source.n_events()
        );

        let plan = if rank == COORDINATOR_RANK {
            self.enter(BuildPhase::CoordinatorBuild)?;
            let all_samples = self.gather_samples(sample)?;
            let layout = self.build_layout(all_samples, frame.clone())?;
            self.comm.broadcast(COORDINATOR_RANK, encode_layout(&layout)?)?
        } else {
            self.enter(BuildPhase::WorkerWait)?;
            self.send_samples(&sample)?;
            self.comm.broadcast(COORDINATOR_RANK, Vec::new())?
        };

        self.enter(BuildPhase::PlanShared)?;
        let layout = decode_layout::<ND>(&plan)?;
        let mut controller = BoxController::with_settings(ND, &self.settings.split)?;
        let root = layout.rebuild(&mut controller)?;
        layout.verify(&root)?;
        let owners = layout.owners();
        let owned = layout.owned_by(rank);
        spdlog::info!(
            "Worker {rank} owns {} of {} layout leaves",
            owned.len(),
            layout.n_leaves()
        );
        let mut tree = BoxTree::from_parts(root, controller, frame);

        self.enter(BuildPhase::LocalPopulate)?;
        tree.controller_mut().set_splitting_enabled(false);
        tree.bulk_load(source.events(1.0))?;

        self.enter(BuildPhase::EventExchange)?;
        self.exchange_events(&mut tree, &owners)?;

        self.enter(BuildPhase::FinalSplit)?;
        tree.controller_mut().set_splitting_enabled(true);
        tree.split_leaves_if_needed(|id| owned.contains(id as usize));
        tree.refresh_statistics();

        self.enter(BuildPhase::Done)?;
        spdlog::info!(
            "Worker {rank} finished with {} events in {} boxes",
            tree.n_events(),
            tree.controller().total_boxes()
        );
        Ok(DistributedBoxes { rank, owned, tree })
    }

    /// Without peers the build is a plain bulk load, and the worker owns the whole tree
    fn build_single<S: EventSource<ND>>(
        mut self,
        source: &S,
        frame: FrameInformation,
    ) -> Result<DistributedBoxes<ND>, BuilderError> {
        self.enter(BuildPhase::LocalPopulate)?;
        let mut tree = BoxTree::initialize(self.settings.extents, frame, &self.settings.split)?;
        tree.bulk_load(source.events(1.0))?;
        self.enter(BuildPhase::Done)?;
        let mut owned = BitSet::new();
        owned.insert(tree.root().id() as usize);
        Ok(DistributedBoxes {
            rank: self.comm.rank(),
            owned,
            tree,
        })
    }

    /// Worker side of the sample collection: announce the count, then send the events
    fn send_samples(&mut self, sample: &[MDEvent<ND>]) -> Result<(), BuilderError> {
        self.comm
            .gather(COORDINATOR_RANK, encode_count(sample.len() as u64)?)?;
        self.comm
            .send(COORDINATOR_RANK, TAG_SAMPLE_EVENTS, encode_events(sample)?)?;
        Ok(())
    }

    /// Coordinator side of the sample collection. Counts are gathered first so every
    /// worker's events land in their own slice of one contiguous buffer.
    fn gather_samples(&mut self, sample: Vec<MDEvent<ND>>) -> Result<Vec<MDEvent<ND>>, BuilderError> {
        let gathered = self
            .comm
            .gather(COORDINATOR_RANK, encode_count(sample.len() as u64)?)?
            .unwrap_or_default();
        let counts = gathered
            .iter()
            .map(|bytes| decode_count(bytes).map(|count| count as usize))
            .collect::<Result<Vec<usize>, _>>()?;
        let mut offsets = Vec::with_capacity(counts.len());
        let mut total = 0;
        for count in counts.iter() {
            offsets.push(total);
            total += count;
        }
        spdlog::info!(
            "Coordinator receiving {} sampled events ({})",
            total,
            human_bytes::human_bytes((total * MDEvent::<ND>::size_bytes()) as f64)
        );

        let mut own = Some(sample);
        let mut buffer = vec![MDEvent::new([0.0; ND], 0.0, 0.0); total];
        for (source, (offset, count)) in offsets.iter().zip(counts.iter()).enumerate() {
            let events = if source == COORDINATOR_RANK {
                own.take().unwrap_or_default()
            } else {
                let bytes = self.comm.receive_exact(
                    source,
                    TAG_SAMPLE_EVENTS,
                    encoded_events_len::<ND>(*count),
                )?;
                decode_events::<ND>(&bytes)?
            };
            if events.len() != *count {
                return Err(CommunicationError::SizeMismatch {
                    source_rank: source,
                    expected: *count,
                    received: events.len(),
                }
                .into());
            }
            buffer[*offset..(*offset + *count)].copy_from_slice(&events);
        }
        Ok(buffer)
    }

    /// Build the preliminary structure from the samples and partition its leaves
    fn build_layout(
        &self,
        samples: Vec<MDEvent<ND>>,
        frame: FrameInformation,
    ) -> Result<BoxLayout<ND>, BuilderError> {
        let mut preliminary = BoxTree::initialize(self.settings.extents, frame, &self.settings.split)?;
        preliminary.bulk_load(samples)?;
        let layout = BoxLayout::capture(preliminary.root(), self.comm.size());
        spdlog::info!(
            "Preliminary box structure has {} boxes ({} leaves); leaves per worker: {:?}",
            layout.summary().n_boxes,
            layout.n_leaves(),
            layout.leaves_per_rank()
        );
        Ok(layout)
    }

    /// Hand the events of every non-owned leaf to its owner and take in the events of the
    /// owned leaves. Every worker sends exactly one message to and receives exactly one
    /// message from each peer.
    fn exchange_events(
        &mut self,
        tree: &mut BoxTree<ND>,
        owners: &FxHashMap<u64, usize>,
    ) -> Result<(), BuilderError> {
        let rank = self.comm.rank();
        let n_ranks = self.comm.size();

        let mut outgoing: Vec<Vec<EventBundle<ND>>> = vec![Vec::new(); n_ranks];
        for leaf in tree.root_mut().leaves_mut() {
            let owner = *owners
                .get(&leaf.id())
                .ok_or(PartitionError::UnknownBox(leaf.id()))?;
            if owner != rank && !leaf.events().is_empty() {
                if let Some(bundles) = outgoing.get_mut(owner) {
                    bundles.push((leaf.id(), leaf.take_events()));
                }
            }
        }

        for (dest, bundles) in outgoing.iter().enumerate() {
            if dest == rank {
                continue;
            }
            let n_events: usize = bundles.iter().map(|(_, events)| events.len()).sum();
            spdlog::debug!(
                "Worker {rank} sending {n_events} events ({}) to worker {dest}",
                human_bytes::human_bytes((n_events * MDEvent::<ND>::size_bytes()) as f64)
            );
            self.comm.send(dest, TAG_EXCHANGE, encode_bundles(bundles)?)?;
        }

        let mut received = Vec::new();
        for source in (0..n_ranks).filter(|source| *source != rank) {
            let bytes = self.comm.receive(source, TAG_EXCHANGE)?;
            for (box_id, events) in decode_bundles::<ND>(&bytes)? {
                match owners.get(&box_id) {
                    None => return Err(PartitionError::UnknownBox(box_id).into()),
                    Some(owner) if *owner != rank => {
                        return Err(PartitionError::NotOwned { rank, box_id }.into())
                    }
                    Some(_) => received.push((box_id, events)),
                }
            }
        }

        let mut leaves: FxHashMap<u64, &mut MDBox<ND>> = tree
            .root_mut()
            .leaves_mut()
            .into_iter()
            .map(|leaf| (leaf.id(), leaf))
            .collect();
        let mut n_received = 0;
        for (box_id, events) in received {
            let leaf = leaves
                .get_mut(&box_id)
                .ok_or(PartitionError::UnknownBox(box_id))?;
            n_received += events.len();
            for event in events {
                leaf.insert(event)?;
            }
        }
        spdlog::info!(
            "Worker {rank} received {n_received} events ({}) for its boxes",
            human_bytes::human_bytes((n_received * MDEvent::<ND>::size_bytes()) as f64)
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communicator::LocalCommunicator;
    use crate::event_source::EventList;
    use std::collections::HashSet;
    use std::sync::mpsc::channel;
    use std::thread;
    use std::time::Duration;

    fn settings(min_depth: usize, fraction: f64) -> BuildSettings<3> {
        let split = SplitSettings {
            split_into: vec![2],
            split_threshold: 50,
            max_depth: 5,
            min_depth,
        };
        BuildSettings {
            fraction,
            ..BuildSettings::new([Extent::new(-10.0, 10.0); 3], split)
        }
    }

    fn run_group(
        settings: &BuildSettings<3>,
        events: &[MDEvent<3>],
        n_workers: usize,
    ) -> Vec<DistributedBoxes<3>> {
        let group = LocalCommunicator::create_group(n_workers, Duration::from_secs(30));
        let handles: Vec<_> = group
            .into_iter()
            .map(|comm| {
                let local: Vec<MDEvent<3>> = events
                    .iter()
                    .skip(comm.rank())
                    .step_by(n_workers)
                    .copied()
                    .collect();
                let settings = settings.clone();
                thread::spawn(move || {
                    DistributedBoxBuilder::new(comm, settings)
                        .unwrap()
                        .build(&EventList::new(local))
                        .unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    }

    fn totals(results: &[DistributedBoxes<3>]) -> (u64, f64) {
        results.iter().fold((0, 0.0), |(n, s), boxes| {
            let stats = boxes.statistics();
            (n + stats.n_events, s + stats.signal)
        })
    }

    #[test]
    fn test_one_and_four_workers_agree() {
        let settings = settings(1, 1.0);
        let events = EventList::generate_peaks(4000, &settings.extents, 5, 2.0, 17)
            .unwrap()
            .into_inner();
        let expected_signal: f64 = events.iter().map(|e| e.signal()).sum();

        let single = run_group(&settings, &events, 1);
        let (n, signal) = totals(&single);
        assert_eq!(n, 4000);
        assert!((signal - expected_signal).abs() < 1e-6);

        let four = run_group(&settings, &events, 4);
        let (n, signal) = totals(&four);
        assert_eq!(n, 4000);
        assert!((signal - expected_signal).abs() < 1e-6);

        let mut seen = HashSet::new();
        for (rank, boxes) in four.iter().enumerate() {
            assert_eq!(boxes.rank(), rank);
            for id in boxes.owned_box_ids().iter() {
                assert!(seen.insert(id), "box {id} owned twice");
            }
            // all local events sit under owned boxes
            let owned_events: u64 = boxes.owned_boxes().iter().map(|b| b.event_count()).sum();
            assert_eq!(owned_events, boxes.tree().n_events());
            assert!(boxes.tree().root().max_depth_reached() <= 5);
            for leaf in boxes.tree().root().leaves() {
                assert!(leaf.event_count() <= 50 || leaf.depth() == 5);
            }
        }
    }

    #[test]
    fn test_zero_sample_uses_min_depth_layout() {
        let settings = settings(2, 0.0);
        let events = EventList::generate_uniform(2000, &settings.extents, 3).into_inner();
        let results = run_group(&settings, &events, 3);
        let (n, _) = totals(&results);
        assert_eq!(n, 2000);
        let n_owned: usize = results.iter().map(|b| b.owned_box_ids().len()).sum();
        assert_eq!(n_owned, 64);
    }

    #[test]
    fn test_status_reports_phases() {
        let (tx, rx) = channel();
        let comm = LocalCommunicator::create_group(1, Duration::from_secs(1)).remove(0);
        let events = EventList::generate_uniform(100, &settings(0, 1.0).extents, 1);
        let boxes = DistributedBoxBuilder::new(comm, settings(0, 1.0))
            .unwrap()
            .with_status(tx)
            .build(&events)
            .unwrap();
        let phases: Vec<BuildPhase> = rx.try_iter().map(|status| status.phase).collect();
        assert_eq!(phases.last(), Some(&BuildPhase::Done));
        assert_eq!(boxes.owned_boxes().len(), 1);
        let (root, controller) = boxes.into_parts();
        assert_eq!(root.event_count(), 100);
        assert_eq!(controller.total_boxes(), root.count_boxes());
    }

    #[test]
    fn test_invalid_fraction() {
        let comm = LocalCommunicator::create_group(1, Duration::from_secs(1)).remove(0);
        let result = DistributedBoxBuilder::new(comm, settings(0, 1.5));
        assert!(matches!(result, Err(ConfigError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_events_for_foreign_box_are_rejected() {
        let mut group = LocalCommunicator::create_group(2, Duration::from_secs(10));
        let worker = group.pop().unwrap();
        let mut coordinator = group.pop().unwrap();
        let settings = settings(1, 1.0);
        let worker_settings = settings.clone();
        let handle = thread::spawn(move || {
            DistributedBoxBuilder::new(worker, worker_settings)
                .unwrap()
                .build(&EventList::new(Vec::new()))
        });

        // Play the coordinator by hand
        coordinator.gather(0, encode_count(0).unwrap()).unwrap();
        coordinator.receive(1, TAG_SAMPLE_EVENTS).unwrap();
        let preliminary = BoxTree::initialize(
            settings.extents,
            FrameInformation::default(),
            &settings.split,
        )
        .unwrap();
        let layout = BoxLayout::capture(preliminary.root(), 2);
        coordinator
            .broadcast(0, encode_layout(&layout).unwrap())
            .unwrap();
        let foreign = layout.owned_by(0).iter().next().unwrap() as u64;
        let bundle = vec![(foreign, vec![MDEvent::unweighted([-9.0, -9.0, -9.0])])];
        coordinator
            .send(1, TAG_EXCHANGE, encode_bundles(&bundle).unwrap())
            .unwrap();

        let result = handle.join().unwrap();
        assert!(matches!(
            result,
            Err(BuilderError::PartitionError(PartitionError::NotOwned { rank: 1, .. }))
        ));
        // the worker's own (empty) exchange message still reached the coordinator
        let bytes = coordinator.receive(1, TAG_EXCHANGE).unwrap();
        assert!(decode_bundles::<3>(&bytes).unwrap().is_empty());
    }

    #[test]
    fn test_failed_coordinator_is_noticed() {
        let mut group = LocalCommunicator::create_group(2, Duration::from_secs(30));
        let worker = group.pop().unwrap();
        let mut coordinator = group.pop().unwrap();
        let handle = thread::spawn(move || {
            DistributedBoxBuilder::new(worker, settings(0, 1.0))
                .unwrap()
                .build(&EventList::new(Vec::new()))
        });
        coordinator.gather(0, encode_count(0).unwrap()).unwrap();
        coordinator.receive(1, TAG_SAMPLE_EVENTS).unwrap();
        let start = std::time::Instant::now();
        drop(coordinator);

        let result = handle.join().unwrap();
        assert!(matches!(
            result,
            Err(BuilderError::CommunicationError(
                CommunicationError::PeerUnreachable(0)
            ))
        ));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_missing_coordinator() {
        let mut group = LocalCommunicator::create_group(2, Duration::from_millis(50));
        let worker = group.pop().unwrap();
        drop(group);
        let result = DistributedBoxBuilder::new(worker, settings(0, 1.0))
            .unwrap()
            .build(&EventList::new(Vec::new()));
        assert!(matches!(
            result,
            Err(BuilderError::CommunicationError(
                CommunicationError::PeerUnreachable(0)
            ))
        ));
    }
}
