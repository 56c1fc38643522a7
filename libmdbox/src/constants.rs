// Box splitting defaults. These match the defaults of the diffraction MD conversion.
pub const DEFAULT_SPLIT_INTO: usize = 2;
pub const DEFAULT_SPLIT_THRESHOLD: u64 = 1500;
pub const DEFAULT_MAX_RECURSION_DEPTH: usize = 20;
pub const DEFAULT_MIN_RECURSION_DEPTH: usize = 0;
pub const DEFAULT_EXTENT: f64 = 50.0;
pub const DEFAULT_N_DIMS: usize = 3;

/// Fraction of the events (by arrival) used to build the preliminary box structure
pub const DEFAULT_FRACTION: f64 = 0.01;
pub const DEFAULT_COMM_TIMEOUT_SECS: u64 = 60;

// Split sweep heuristic. Sweep once more than 1/16th of the current output was added,
// and at least this many events, or when the added events would overfill the average leaf.
pub const SPLIT_SWEEP_OUTPUT_DIVISOR: u64 = 16;
pub const SPLIT_SWEEP_MIN_EVENTS: u64 = 10_000_000;

// Point-to-point message tags
pub const TAG_SAMPLE_EVENTS: u32 = 2;
pub const TAG_EXCHANGE: u32 = 4;
// Reserved for the collectives; the box layout travels by broadcast
pub const TAG_GATHER: u32 = 0x4000_0001;
pub const TAG_BROADCAST: u32 = 0x4000_0002;

// Wire format
pub const LAYOUT_MAGIC: u32 = 0x4D44_424C; // "MDBL"
pub const NODE_KIND_LEAF: u8 = 0;
pub const NODE_KIND_GRID: u8 = 1;

/// Rank of the coordinator worker
pub const COORDINATOR_RANK: usize = 0;
