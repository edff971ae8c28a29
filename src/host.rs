//! Access to the platform Bluetooth stack.

use crate::gap::{AdvParams, Uuid};
use crate::gatt::{AdvFailure, DeviceId, RadioState, RequestId, Service, Status, Token};

#[cfg(any(test, feature = "mock"))]
pub mod mock;

/// Platform Bluetooth stack operations the registry depends on: the GATT
/// server object, the LE advertiser, and the radio enable/settings intents.
///
/// Submission methods return synchronously; operation results arrive later as
/// [`Callback`](crate::gatt::Callback) values that the platform layer feeds to
/// [`Server::handle_callback`](crate::gatt::Server::handle_callback).
pub trait Stack: Send + Sync {
    /// Returns whether the adapter supports LE peripheral mode. Probed once
    /// at registry construction.
    fn le_peripheral_supported(&self) -> bool;

    /// Returns the current adapter radio state.
    fn radio_state(&self) -> RadioState;

    /// Submits a service to the platform GATT server. The outcome arrives as
    /// a `ServiceAdded` callback; an immediate error means the submission
    /// itself failed.
    fn add_service(&self, service: &Service) -> Result<(), Status>;

    /// Answers a remote read or write request. Returns whether the platform
    /// accepted the response.
    fn send_response(
        &self,
        device: &DeviceId,
        request: RequestId,
        status: Status,
        offset: u16,
        value: &[u8],
    ) -> bool;

    /// Pushes a characteristic value to one device, with acknowledgement
    /// when `confirm` is set.
    fn notify(
        &self,
        device: &DeviceId,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
        confirm: bool,
    ) -> Result<(), Status>;

    /// Starts an advertising set. The outcome arrives as an
    /// `AdvertisingResult` callback carrying the same token.
    fn start_advertising(&self, token: Token, params: &AdvParams) -> Result<(), AdvFailure>;

    /// Tears down an advertising set.
    fn stop_advertising(&self, token: Token);

    /// Shows the enable-Bluetooth dialog. The user's choice arrives as an
    /// `ActivityResult` callback carrying the same token.
    fn request_enable(&self, token: Token);

    /// Opens the Bluetooth settings screen.
    fn open_settings(&self);
}
