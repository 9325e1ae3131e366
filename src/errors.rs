use thiserror::Error;

/// One failure per pipeline stage, each carrying the exit code the CLI
/// front-end must return for it. Usage errors (exit 1) and missing-file
/// errors (exit 2) are handled directly in `main` via `clap` and an
/// upfront existence check, so they aren't represented here.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("format stage failed: {0}")]
    Format(#[source] anyhow::Error),

    #[error("diagnose stage failed: {0}")]
    Diagnose(#[source] anyhow::Error),

    #[error("planning stage failed: {0}")]
    Plan(#[source] anyhow::Error),

    #[error("first fix pass failed: {0}")]
    FixPass1(#[source] anyhow::Error),

    #[error("post-pass-1 validation failed: {0}")]
    ValidateAfterPass1(#[source] anyhow::Error),

    #[error("second planning pass failed: {0}")]
    Plan2(#[source] anyhow::Error),

    #[error("second fix pass failed: {0}")]
    FixPass2(#[source] anyhow::Error),

    #[error("post-pass-2 validation failed: {0}")]
    ValidateAfterPass2(#[source] anyhow::Error),

    #[error("finalize stage failed: {0}")]
    Finalize(#[source] anyhow::Error),
}

impl StageError {
    /// Maps each stage to its reserved exit code (11-19), per the CLI
    /// contract.
    pub fn exit_code(&self) -> i32 {
        match self {
            StageError::Format(_) => 11,
            StageError::Diagnose(_) => 12,
            StageError::Plan(_) => 13,
            StageError::FixPass1(_) => 14,
            StageError::ValidateAfterPass1(_) => 15,
            StageError::Plan2(_) => 16,
            StageError::FixPass2(_) => 17,
            StageError::ValidateAfterPass2(_) => 18,
            StageError::Finalize(_) => 19,
        }
    }
}

/// Usage error: bad flag combination or value, exit code 1.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct UsageError(pub String);

/// Referenced file does not exist, exit code 2.
#[derive(Debug, Error)]
#[error("file not found: {0}")]
pub struct MissingFileError(pub std::path::PathBuf);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_cover_11_through_19_without_gaps() {
        let codes = [
            StageError::Format(anyhow::anyhow!("x")).exit_code(),
            StageError::Diagnose(anyhow::anyhow!("x")).exit_code(),
            StageError::Plan(anyhow::anyhow!("x")).exit_code(),
            StageError::FixPass1(anyhow::anyhow!("x")).exit_code(),
            StageError::ValidateAfterPass1(anyhow::anyhow!("x")).exit_code(),
            StageError::Plan2(anyhow::anyhow!("x")).exit_code(),
            StageError::FixPass2(anyhow::anyhow!("x")).exit_code(),
            StageError::ValidateAfterPass2(anyhow::anyhow!("x")).exit_code(),
            StageError::Finalize(anyhow::anyhow!("x")).exit_code(),
        ];
        for (i, code) in codes.iter().enumerate() {
            assert_eq!(*code, 11 + i as i32);
        }
    }
}
