/// Progress information for a pipeline run
#[derive(Debug, Clone)]
pub struct RunProgress {
    pub phase: RunPhase,
    pub current: usize,
    pub total: usize,
    pub message: String,
}

impl RunProgress {
    pub fn new(phase: RunPhase, current: usize, total: usize, message: impl Into<String>) -> Self {
        Self { phase, current, total, message: message.into() }
    }
}

/// Current phase of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Planning,
    ProcessingScenes,
    Compositing,
    Publishing,
    ZonalStatistics,
}

impl RunPhase {
    pub fn label(&self) -> &'static str {
        match self {
            RunPhase::Planning => "Planning",
            RunPhase::ProcessingScenes => "Processing scenes",
            RunPhase::Compositing => "Compositing",
            RunPhase::Publishing => "Publishing",
            RunPhase::ZonalStatistics => "Zonal statistics",
        }
    }
}
