use thiserror::Error;

pub type Result<T> = std::result::Result<T, GobgpError>;

#[derive(Error, Debug)]
pub enum GobgpError {
    #[error("Failed to spawn {bin}: {source}")]
    Spawn {
        bin: String,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "Command exited with non-zero status. Command: {command}, status: {status}, \
         stdout: {stdout}, stderr: {stderr}"
    )]
    CommandFailed {
        command: String,
        status: std::process::ExitStatus,
        stdout: String,
        stderr: String,
    },

    #[error("Failed to parse gobgp output: {0}")]
    Parse(String),

    #[error("Invalid BGP configuration: {0}")]
    InvalidConfig(String),
}

impl From<GobgpError> for speaker_core::SpeakerError {
    fn from(err: GobgpError) -> Self {
        speaker_core::SpeakerError::backend(err)
    }
}
