use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// No camera answered at startup. Fatal.
    #[error("camera {index} is unavailable")]
    DeviceUnavailable {
        index: u32,
        #[source]
        source: anyhow::Error,
    },

    /// A single frame could not be read. The controller skips the tick.
    #[error("failed to capture frame")]
    Capture(#[source] anyhow::Error),

    #[error("inference failed")]
    Inference(#[source] anyhow::Error),

    #[error("display sink failed")]
    Display(#[source] anyhow::Error),

    #[error("invalid pipeline config: {0}")]
    InvalidConfig(String),

    #[error("pipeline already stopped, construct a new controller to run again")]
    AlreadyStopped,
}

impl PipelineError {
    /// Whether the controller may keep running after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, PipelineError::Capture(_))
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_capture_errors_are_recoverable() {
        assert!(PipelineError::Capture(anyhow::anyhow!("usb hiccup")).is_recoverable());
        assert!(!PipelineError::Inference(anyhow::anyhow!("bad tensor")).is_recoverable());
        assert!(!PipelineError::DeviceUnavailable {
            index: 0,
            source: anyhow::anyhow!("no device"),
        }
        .is_recoverable());
    }

    #[test]
    fn source_chain_is_preserved() {
        let err = PipelineError::Inference(anyhow::anyhow!("shape mismatch"));
        let source = std::error::Error::source(&err).expect("inference error has a source");
        assert_eq!(source.to_string(), "shape mismatch");
    }
}
