use crate::endpoints::DecodeError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Kube(#[from] kube::Error),

    #[error("watch failed: {0}")]
    Watch(String),

    #[error("invalid value {value:?} for label {key}")]
    InvalidLabelValue { key: &'static str, value: String },

    #[error("unrecognized server version {0:?}")]
    InvalidVersion(String),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}
