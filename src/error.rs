pub type StudioResult<T> = Result<T, StudioError>;

#[derive(thiserror::Error, Debug)]
pub enum StudioError {
    #[error("invalid input: {0}")]
    InputValidation(String),

    #[error("generation failed: {0}")]
    ExternalCall(String),

    #[error("panel {} has no image yet", index + 1)]
    MissingPanel { index: usize },

    #[error("render error: {0}")]
    Render(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StudioError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::InputValidation(msg.into())
    }

    pub fn external(msg: impl Into<String>) -> Self {
        Self::ExternalCall(msg.into())
    }

    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render(msg.into())
    }

    pub fn missing_panel(index: usize) -> Self {
        Self::MissingPanel { index }
    }

    /// Wraps a collaborator failure, keeping the full context chain in the message.
    pub fn from_external(err: anyhow::Error) -> Self {
        match err.downcast::<StudioError>() {
            Ok(inner) => inner,
            Err(err) => Self::ExternalCall(format!("{:#}", err)),
        }
    }

    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            StudioError::InputValidation(_) | StudioError::MissingPanel { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_are_stable() {
        assert!(
            StudioError::validation("x")
                .to_string()
                .contains("invalid input:")
        );
        assert!(
            StudioError::external("x")
                .to_string()
                .contains("generation failed:")
        );
        assert_eq!(
            StudioError::missing_panel(2).to_string(),
            "panel 3 has no image yet"
        );
    }

    #[test]
    fn from_external_keeps_typed_errors() {
        let err = anyhow::Error::new(StudioError::validation("topic is empty"));
        assert!(matches!(
            StudioError::from_external(err),
            StudioError::InputValidation(_)
        ));

        let err = anyhow::anyhow!("boom").context("Gemini API error");
        let wrapped = StudioError::from_external(err);
        assert!(matches!(wrapped, StudioError::ExternalCall(_)));
        assert!(wrapped.to_string().contains("boom"));
    }
}
