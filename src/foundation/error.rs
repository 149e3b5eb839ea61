pub type RideviewResult<T> = Result<T, RideviewError>;

#[derive(thiserror::Error, Debug)]
pub enum RideviewError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("telemetry error: {0}")]
    Telemetry(String),

    #[error("track error: {0}")]
    Track(String),

    #[error("render error: {0}")]
    Render(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("engine error: {0}")]
    Engine(String),

    #[error("serialization error: {0}")]
    Serde(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RideviewError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn telemetry(msg: impl Into<String>) -> Self {
        Self::Telemetry(msg.into())
    }

    pub fn track(msg: impl Into<String>) -> Self {
        Self::Track(msg.into())
    }

    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render(msg.into())
    }

    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    pub fn engine(msg: impl Into<String>) -> Self {
        Self::Engine(msg.into())
    }

    pub fn serde(msg: impl Into<String>) -> Self {
        Self::Serde(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_are_stable() {
        assert!(
            RideviewError::validation("x")
                .to_string()
                .contains("validation error:")
        );
        assert!(
            RideviewError::telemetry("x")
                .to_string()
                .contains("telemetry error:")
        );
        assert!(RideviewError::track("x").to_string().contains("track error:"));
        assert!(
            RideviewError::network("x")
                .to_string()
                .contains("network error:")
        );
        assert!(
            RideviewError::engine("x")
                .to_string()
                .contains("engine error:")
        );
        assert!(
            RideviewError::serde("x")
                .to_string()
                .contains("serialization error:")
        );
    }

    #[test]
    fn other_preserves_source() {
        let base = std::io::Error::other("boom");
        let err = RideviewError::Other(anyhow::Error::new(base));
        assert!(err.to_string().contains("boom"));
    }
}
