use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

use super::*;

/// Platform identifier of one attribute request. Responses echo it back via
/// [`crate::host::Stack::send_response`].
pub type RequestId = u32;

/// Correlation token for asynchronous operations (publish, advertise, radio
/// enable). Generated by the registry and echoed back by the platform
/// callback that completes the operation.
pub type Token = u32;

/// Identity of a remote central, as reported by the platform stack
/// (typically the peer address string).
#[derive(Clone, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(transparent)]
pub struct DeviceId(Arc<str>);

impl DeviceId {
    /// Creates a device identity from the platform's identifier string.
    #[inline]
    #[must_use]
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// Returns the identifier string.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<T: AsRef<str>> From<T> for DeviceId {
    #[inline]
    fn from(id: T) -> Self {
        Self::new(id)
    }
}

impl Debug for DeviceId {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(&self.0, f)
    }
}

impl Display for DeviceId {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One inbound platform callback. The platform layer converts each native
/// callback into a variant and hands it to
/// [`Server::handle_callback`](super::Server::handle_callback), which owns all
/// dispatch logic.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum Callback {
    /// Link state change for a remote device.
    ConnectionChanged {
        device: DeviceId,
        status: Status,
        state: ConnectionState,
    },
    /// Result of a service submitted via `Stack::add_service`.
    ServiceAdded { status: Status, service: Uuid },
    /// Remote read of a characteristic value.
    CharacteristicRead {
        device: DeviceId,
        request: RequestId,
        offset: u16,
        service: Uuid,
        characteristic: Uuid,
    },
    /// Remote write of a characteristic value.
    CharacteristicWrite {
        device: DeviceId,
        request: RequestId,
        service: Uuid,
        characteristic: Uuid,
        value: Vec<u8>,
        response_needed: bool,
    },
    /// Remote read of a descriptor value.
    DescriptorRead {
        device: DeviceId,
        request: RequestId,
        offset: u16,
        service: Uuid,
        characteristic: Uuid,
        descriptor: Uuid,
    },
    /// Remote write of a descriptor value. CCC writes drive the
    /// subscription registry.
    DescriptorWrite {
        device: DeviceId,
        request: RequestId,
        service: Uuid,
        characteristic: Uuid,
        descriptor: Uuid,
        value: Vec<u8>,
        response_needed: bool,
    },
    /// Completion of one notification/indication delivery.
    NotificationSent { device: DeviceId, status: Status },
    /// Result of an advertising-start request.
    AdvertisingResult {
        token: Token,
        error: Option<AdvFailure>,
    },
    /// Result of a user-facing activity launched with a request code
    /// (the enable-radio dialog).
    ActivityResult { token: Token, ok: bool },
    /// Adapter radio state broadcast.
    RadioStateChanged { state: RadioState },
}

/// Application-facing event: remote writes and link state changes, delivered
/// on the stream returned by [`Server::events`](super::Server::events).
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum Event {
    /// A remote central wrote a characteristic value.
    Write {
        service: Uuid,
        characteristic: Uuid,
        value: Vec<u8>,
    },
    /// A remote central connected or disconnected.
    ConnectionChanged {
        device: DeviceId,
        state: ConnectionState,
    },
}
