use crate::config::ServiceRef;
use crate::image_reference::ParseError;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure reported by a cluster or registry collaborator.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{0} not found")]
    NotFound(String),
    /// Timeouts, dropped connections and server-side errors that may succeed on retry.
    #[error("transient failure")]
    Transient(#[source] BoxError),
    #[error(transparent)]
    Permanent(BoxError),
}

impl ClientError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::Transient(_))
    }
}

/// Failure while processing one configured service.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid service {spec:?}, expected namespace/name")]
    InvalidServiceSpec { spec: String },

    #[error("deployment {service} not found")]
    DeploymentNotFound { service: ServiceRef },

    #[error("failed to read deployment {service}")]
    DeploymentLookupFailed {
        service: ServiceRef,
        #[source]
        source: ClientError,
    },

    #[error("no container named {} in deployment {service}, found {containers:?}", .service.name)]
    ContainerNotFound {
        service: ServiceRef,
        containers: Vec<String>,
    },

    #[error("image {image} of deployment {service} is unparsable")]
    ImageReferenceUnparsable {
        service: ServiceRef,
        image: String,
        #[source]
        source: ParseError,
    },

    #[error("failed to list images of repository {repository} for {service}")]
    RegistryLookupFailed {
        service: ServiceRef,
        repository: String,
        #[source]
        source: ClientError,
    },

    #[error("no image in repository {repository} is tagged {marker} for {service}")]
    MarkerImageNotFound {
        service: ServiceRef,
        repository: String,
        marker: String,
    },

    #[error("no promotable tag for {service} among {tags:?}")]
    NoValidTag {
        service: ServiceRef,
        tags: Vec<String>,
    },

    #[error("failed to update deployment {service} to image {image}")]
    DeploymentUpdateFailed {
        service: ServiceRef,
        image: String,
        #[source]
        source: ClientError,
    },

    #[error("processing of {service} was cancelled")]
    Cancelled { service: ServiceRef },
}
