//! # mdbox
//!
//! mdbox builds the adaptive box structure behind an MD event workspace, written in Rust.
//! Events (points in a 1 to 4 dimensional output space such as Q or HKL, each carrying a
//! signal and squared error) are filed into a tree of boxes. A box holding too many
//! events is split into a regular grid of children, down to a maximum depth, so dense
//! regions end up finely divided and empty space stays coarse.
//!
//! The box structure can be built by several workers at once. The coordinator builds a
//! preliminary structure from a sample of every worker's events and shares its layout,
//! each worker fills the layout with its own events, events are exchanged so every leaf
//! lives on exactly one worker, and each worker finally splits its own boxes.
//!
//! ## Installation
//!
//! The only method of install is from source. If you have not used Rust before, you will
//! need to install the Rust tool chain. See the
//! [Rust docs](https://www.rust-lang.org/tools/install) for installation instructions.
//!
//! To build and install the CLI use `cargo install --path ./mdbox_cli` from the top level
//! mdbox repository.
//!
//! ## Configuration
//!
//! A configuration file can be generated using `mdbox_cli new -p config.yml`. The YAML
//! format of a configuration file is as follows:
//!
//! ```yml
//! output_dimensions: Q (lab frame)
//! extents: [-50.0, 50.0, -50.0, 50.0, -50.0, 50.0]
//! split_into: [2]
//! split_threshold: 1500
//! max_recursion_depth: 20
//! min_recursion_depth: 0
//! fraction: 0.01
//! n_workers: 1
//! comm_timeout_secs: 60
//! source:
//!   n_events: 100000
//!   seed: 0
//!   n_peaks: 4
//!   peak_width: 1.0
//! ```
//!
//! - output_dimensions: One of `Q (lab frame)`, `Q (sample frame)` or `HKL`. Only used to
//! name the dimensions.
//! - extents: A min and max for each output dimension. The number of pairs sets the
//! number of dimensions (1 to 4).
//! - split_into: How many children a box is split into along each dimension. Either one
//! value for all dimensions or one value per dimension.
//! - split_threshold: A box holding more events than this is split.
//! - max_recursion_depth: Boxes at this depth are never split. Must be at least 1.
//! - min_recursion_depth: Boxes are split down to this depth before any events are added.
//! - fraction: The fraction of each worker's events used to build the preliminary box
//! structure. Must be within [0, 1].
//! - n_workers: The number of parallel workers. Must be at least 1.
//! - comm_timeout_secs: How long a worker waits for a message before giving up.
//! - source: Parameters of the synthetic peaked event set used by the CLI.
//!
//! ## Output
//!
//! The CLI prints a summary of each worker's boxes and writes a log file, `mdbox.log`.
//! If an error occurs the log file will contain the detailed status of each worker.
pub mod box_controller;
pub mod box_tree;
pub mod codec;
pub mod communicator;
pub mod config;
pub mod constants;
pub mod distributed;
pub mod error;
pub mod event;
pub mod event_source;
pub mod extent;
pub mod frame;
pub mod layout;
pub mod md_box;
pub mod process;
pub mod worker_status;
