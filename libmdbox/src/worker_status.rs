use std::fmt::Display;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BarColor {
    #[default]
    CYAN,
    MAGENTA,
    RED,
    GREEN,
}

/// The phases a worker passes through during a distributed build
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BuildPhase {
    #[default]
    Sampling,
    CoordinatorBuild,
    WorkerWait,
    PlanShared,
    LocalPopulate,
    EventExchange,
    FinalSplit,
    Done,
}

impl BuildPhase {
    /// Rough fraction of the build completed on entering this phase
    pub fn progress(&self) -> f32 {
        match self {
            Self::Sampling => 0.0,
            Self::CoordinatorBuild | Self::WorkerWait => 0.1,
            Self::PlanShared => 0.25,
            Self::LocalPopulate => 0.3,
            Self::EventExchange => 0.6,
            Self::FinalSplit => 0.75,
            Self::Done => 1.0,
        }
    }

    pub fn color(&self) -> BarColor {
        match self {
            Self::Sampling | Self::CoordinatorBuild | Self::WorkerWait => BarColor::MAGENTA,
            Self::PlanShared | Self::LocalPopulate => BarColor::CYAN,
            Self::EventExchange => BarColor::RED,
            Self::FinalSplit | Self::Done => BarColor::GREEN,
        }
    }
}

impl Display for BuildPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sampling => write!(f, "Sampling"),
            Self::CoordinatorBuild => write!(f, "Building preliminary boxes"),
            Self::WorkerWait => write!(f, "Waiting for box layout"),
            Self::PlanShared => write!(f, "Rebuilding shared layout"),
            Self::LocalPopulate => write!(f, "Loading local events"),
            Self::EventExchange => write!(f, "Exchanging events"),
            Self::FinalSplit => write!(f, "Splitting owned boxes"),
            Self::Done => write!(f, "Done"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct WorkerStatus {
    pub progress: f32,
    pub phase: BuildPhase,
    pub worker_id: usize,
    pub color: BarColor,
}

impl WorkerStatus {
    pub fn new(progress: f32, phase: BuildPhase, worker_id: usize, color: BarColor) -> Self {
        Self {
            progress,
            phase,
            worker_id,
            color,
        }
    }

    /// Status at the start of `phase`
    pub fn from_phase(phase: BuildPhase, worker_id: usize) -> Self {
        Self::new(phase.progress(), phase, worker_id, phase.color())
    }
}
