use thiserror::Error;

/// Exit status used when the reviewer answers a prompt with something other
/// than one of the recognized decisions.
pub const UNRECOGNIZED_INPUT_EXIT_CODE: u8 = 129;

/// Fatal conditions that abort a migration run.
///
/// These travel inside `anyhow::Error`; callers that need to tell them apart
/// (the binary's exit status, tests) recover them with `downcast_ref`.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("archive parse error: {0}")]
    Parse(String),

    #[error("authorization failed: {0}")]
    Auth(String),

    #[error("post {post_id} replies to {parent_id}, which has no posted ledger entry")]
    Consistency { post_id: String, parent_id: String },

    #[error("unrecognized input: {0}")]
    UnrecognizedInput(String),
}

impl MigrationError {
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::UnrecognizedInput(_) => UNRECOGNIZED_INPUT_EXIT_CODE,
            Self::Parse(_) | Self::Auth(_) | Self::Consistency { .. } => 1,
        }
    }
}

/// Map any run failure to a process exit status.
pub fn exit_code_for(error: &anyhow::Error) -> u8 {
    error
        .downcast_ref::<MigrationError>()
        .map(MigrationError::exit_code)
        .unwrap_or(1)
}
