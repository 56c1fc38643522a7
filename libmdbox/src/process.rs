use std::sync::mpsc::Sender;

use super::communicator::LocalCommunicator;
use super::config::Config;
use super::distributed::{DistributedBoxBuilder, DistributedBoxes};
use super::error::{ConfigError, ProcessorError};
use super::event::MDEvent;
use super::event_source::EventList;
use super::worker_status::WorkerStatus;

/// Generate the synthetic event set described by the config's source section
pub fn generate_events<const ND: usize>(config: &Config) -> Result<EventList<ND>, ProcessorError> {
    let settings = config.build_settings::<ND>()?;
    let source = &config.source;
    Ok(EventList::generate_peaks(
        source.n_events,
        &settings.extents,
        source.n_peaks,
        source.peak_width,
        source.seed,
    )?)
}

/// Deal the events out to the workers round-robin, keeping arrival order per worker
pub fn create_subsets<const ND: usize>(
    events: Vec<MDEvent<ND>>,
    n_workers: usize,
) -> Vec<EventList<ND>> {
    let mut subsets: Vec<EventList<ND>> = vec![EventList::default(); n_workers.max(1)];
    let n_subsets = subsets.len();

    for (idx, event) in events.into_iter().enumerate() {
        subsets[idx % n_subsets].push(event)
    }

    subsets
}

/// Run a distributed build with one thread per worker.
///
/// The events are divided among `config.n_workers` workers connected by a local
/// communicator. Returns every worker's portion of the box structure in rank order.
pub fn process<const ND: usize>(
    config: &Config,
    events: Vec<MDEvent<ND>>,
    tx: Sender<WorkerStatus>,
) -> Result<Vec<DistributedBoxes<ND>>, ProcessorError> {
    if !config.is_n_workers_valid() {
        return Err(ConfigError::InvalidConfiguration(String::from(
            "Number of workers must be at least 1",
        ))
        .into());
    }
    let settings = config.build_settings::<ND>()?;
    let subsets = create_subsets(events, config.n_workers);
    let group = LocalCommunicator::create_group(config.n_workers, config.comm_timeout());

    spdlog::info!(
        "Starting distributed build with {} workers",
        config.n_workers
    );
    let mut handles = Vec::with_capacity(config.n_workers);
    for (comm, subset) in group.into_iter().zip(subsets) {
        let worker_id = handles.len();
        let builder = DistributedBoxBuilder::new(comm, settings.clone())?.with_status(tx.clone());
        handles.push(std::thread::spawn(move || {
            spdlog::info!("Worker {} starting with {} events", worker_id, subset.len());
            builder.build(&subset)
        }));
    }

    let mut results = Vec::with_capacity(handles.len());
    let mut first_error = None;
    for (worker_id, handle) in handles.into_iter().enumerate() {
        match handle.join() {
            Ok(Ok(boxes)) => results.push(boxes),
            Ok(Err(e)) => {
                spdlog::error!("Worker {worker_id} failed: {e}");
                first_error.get_or_insert(ProcessorError::BuilderError(worker_id, e));
            }
            Err(_) => {
                spdlog::error!("Worker {worker_id} panicked");
                first_error.get_or_insert(ProcessorError::WorkerPanic(worker_id));
            }
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(results),
    }
}
