//! Per-step progress updates handed from the denoising loop to the transport.

/// A JPEG-encoded image produced at a decode point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// One client-visible update. Encoding to a wire format happens only at the
/// transport boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepUpdate {
    /// Progress only, no image data.
    SilentTick { step: usize },
    /// Decoded images for this step. `terminal` marks the last update of a
    /// session; terminal images are full resolution.
    Full {
        step: usize,
        artifacts: Vec<Artifact>,
        terminal: bool,
    },
}

impl StepUpdate {
    pub fn step(&self) -> usize {
        match self {
            StepUpdate::SilentTick { step } | StepUpdate::Full { step, .. } => *step,
        }
    }

    pub fn artifacts(&self) -> Option<&[Artifact]> {
        match self {
            StepUpdate::SilentTick { .. } => None,
            StepUpdate::Full { artifacts, .. } => Some(artifacts),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StepUpdate::Full { terminal: true, .. })
    }
}
