use std::fmt;

/// Frame-fatal render failures. Per-layer trouble never surfaces here;
/// a malformed layer is disabled for the frame instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// The priority buffer or output frame could not be allocated.
    BufferAllocation { bytes: usize },
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BufferAllocation { bytes } => {
                write!(f, "failed to allocate {bytes} bytes for frame buffers")
            }
        }
    }
}

impl std::error::Error for RenderError {}
