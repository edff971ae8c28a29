//! In-memory stack for exercising the registry without platform BLE
//! hardware.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::gap::{AdvParams, Uuid};
use crate::gatt::{AdvFailure, DeviceId, RadioState, RequestId, Service, Status, Token};

use super::Stack;

/// Recorded stack invocation.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum Call {
    AddService(Service),
    SendResponse {
        device: DeviceId,
        request: RequestId,
        status: Status,
        offset: u16,
        value: Vec<u8>,
    },
    Notify {
        device: DeviceId,
        service: Uuid,
        characteristic: Uuid,
        value: Vec<u8>,
        confirm: bool,
    },
    StartAdvertising {
        token: Token,
        params: AdvParams,
    },
    StopAdvertising {
        token: Token,
    },
    RequestEnable {
        token: Token,
    },
    OpenSettings,
}

/// A [`Stack`] implementation that records every call and returns
/// configurable results. Cloning shares the recording.
#[derive(Clone, Debug)]
pub struct MockStack(Arc<Inner>);

#[derive(Debug)]
struct Inner {
    supported: AtomicBool,
    radio: Mutex<RadioState>,
    calls: Mutex<Vec<Call>>,
    add_service_error: Mutex<Option<Status>>,
    advertising_error: Mutex<Option<AdvFailure>>,
    notify_error: Mutex<Option<Status>>,
}

impl MockStack {
    /// Creates a supported, powered-on stack.
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(Inner {
            supported: AtomicBool::new(true),
            radio: Mutex::new(RadioState::On),
            calls: Mutex::new(Vec::new()),
            add_service_error: Mutex::new(None),
            advertising_error: Mutex::new(None),
            notify_error: Mutex::new(None),
        }))
    }

    /// Sets the LE peripheral capability flag.
    pub fn set_supported(&self, supported: bool) {
        self.0.supported.store(supported, Ordering::Relaxed);
    }

    /// Sets the reported radio state.
    pub fn set_radio(&self, state: RadioState) {
        *self.0.radio.lock() = state;
    }

    /// Makes the next `add_service` submission fail with `status`.
    pub fn fail_add_service(&self, status: Status) {
        *self.0.add_service_error.lock() = Some(status);
    }

    /// Makes the next `start_advertising` submission fail.
    pub fn fail_advertising(&self, failure: AdvFailure) {
        *self.0.advertising_error.lock() = Some(failure);
    }

    /// Makes the next `notify` call fail with `status`.
    pub fn fail_notify(&self, status: Status) {
        *self.0.notify_error.lock() = Some(status);
    }

    /// Returns a copy of the recorded calls.
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.0.calls.lock().clone()
    }

    /// Removes and returns the recorded calls.
    #[must_use]
    pub fn take_calls(&self) -> Vec<Call> {
        std::mem::take(&mut *self.0.calls.lock())
    }

    fn record(&self, call: Call) {
        self.0.calls.lock().push(call);
    }
}

impl Default for MockStack {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl Stack for MockStack {
    fn le_peripheral_supported(&self) -> bool {
        self.0.supported.load(Ordering::Relaxed)
    }

    fn radio_state(&self) -> RadioState {
        *self.0.radio.lock()
    }

    fn add_service(&self, service: &Service) -> Result<(), Status> {
        self.record(Call::AddService(service.clone()));
        self.0.add_service_error.lock().take().map_or(Ok(()), Err)
    }

    fn send_response(
        &self,
        device: &DeviceId,
        request: RequestId,
        status: Status,
        offset: u16,
        value: &[u8],
    ) -> bool {
        self.record(Call::SendResponse {
            device: device.clone(),
            request,
            status,
            offset,
            value: value.to_vec(),
        });
        true
    }

    fn notify(
        &self,
        device: &DeviceId,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
        confirm: bool,
    ) -> Result<(), Status> {
        self.record(Call::Notify {
            device: device.clone(),
            service,
            characteristic,
            value: value.to_vec(),
            confirm,
        });
        self.0.notify_error.lock().take().map_or(Ok(()), Err)
    }

    fn start_advertising(&self, token: Token, params: &AdvParams) -> Result<(), AdvFailure> {
        self.record(Call::StartAdvertising {
            token,
            params: params.clone(),
        });
        self.0.advertising_error.lock().take().map_or(Ok(()), Err)
    }

    fn stop_advertising(&self, token: Token) {
        self.record(Call::StopAdvertising { token });
    }

    fn request_enable(&self, token: Token) {
        self.record(Call::RequestEnable { token });
    }

    fn open_settings(&self) {
        self.record(Call::OpenSettings);
    }
}
