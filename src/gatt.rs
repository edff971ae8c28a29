//! GATT server registry and request dispatcher ([Vol 3] Part G).

pub use {consts::*, io::*, schema::*, server::*};

use crate::gap::Uuid;

mod consts;
mod io;
mod schema;
mod server;

/// Error type returned by the registry.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A referenced service, characteristic, or descriptor is not declared.
    #[error("{0} is not declared")]
    NotFound(Uuid),
    /// The service topology is frozen because it was handed to the platform
    /// stack.
    #[error("service {0} was already published")]
    AlreadyPublished(Uuid),
    /// The platform stack rejected the service registration, or the service
    /// cannot be submitted.
    #[error("failed to publish service {service}: {status}")]
    Publish { service: Uuid, status: Status },
    /// The attribute table is full.
    #[error("attribute table is full ({0} attributes)")]
    Capacity(usize),
    /// A write to a descriptor this server does not accept writes for.
    #[error("unsupported write to descriptor {0}")]
    UnsupportedWrite(Uuid),
    /// The adapter cannot act as an LE peripheral.
    #[error("LE peripheral mode is not supported by this adapter")]
    HardwareUnsupported,
    /// The user declined the enable-Bluetooth dialog.
    #[error("user declined to enable Bluetooth")]
    UserDeclined,
    /// The platform advertiser reported a failure.
    #[error(transparent)]
    Advertise(#[from] AdvFailure),
    /// The registry was dropped while a request was pending.
    #[error("request dropped before completion")]
    Closed,
}

/// Common registry result type.
pub type Result<T> = std::result::Result<T, Error>;
