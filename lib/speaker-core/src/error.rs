use ipnetwork::IpNetwork;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SpeakerError>;

#[derive(Error, Debug)]
pub enum SpeakerError {
    #[error("{kind} {name} not found")]
    NotFound { kind: String, name: String },

    #[error("Invalid prefix {input}: {reason}")]
    InvalidPrefix { input: String, reason: String },

    #[error("Failed to announce {prefix}: {source}")]
    Announce {
        prefix: IpNetwork,
        #[source]
        source: Box<SpeakerError>,
    },

    #[error("Failed to withdraw {prefix}: {source}")]
    Withdraw {
        prefix: IpNetwork,
        #[source]
        source: Box<SpeakerError>,
    },

    #[error("BGP speaker error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Failed to list {kind}: {reason}")]
    List { kind: String, reason: String },

    #[error("Cache for {0} did not sync")]
    CacheSync(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Kubernetes error: {0}")]
    KubernetesError(#[from] kube::error::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("{}", join_messages(.0))]
    Batch(Vec<SpeakerError>),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SpeakerError {
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        SpeakerError::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        SpeakerError::Backend(Box::new(err))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SpeakerError::NotFound { .. })
    }

    /// Collapse collected errors into one result: no errors is success, a
    /// single error is returned as is, more become a [`SpeakerError::Batch`].
    pub fn join(mut errors: Vec<SpeakerError>) -> Result<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(SpeakerError::Batch(errors)),
        }
    }
}

fn join_messages(errors: &[SpeakerError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
