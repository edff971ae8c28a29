use std::fmt::{Display, Formatter};

use bitflags::bitflags;

use crate::gap::Uuid16;

/// Client Characteristic Configuration descriptor UUID
/// ([Vol 3] Part G, Section 3.3.3.3).
pub const CLIENT_CHARACTERISTIC_CONFIGURATION: Uuid16 = match Uuid16::new(0x2902) {
    Some(u) => u,
    None => panic!("zero UUID"),
};

/// CCC value written by a central to enable unacknowledged notifications.
pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];

/// CCC value written by a central to enable acknowledged indications.
pub const ENABLE_INDICATION_VALUE: [u8; 2] = [0x02, 0x00];

/// CCC value written by a central to disable notifications and indications.
pub const DISABLE_NOTIFICATION_VALUE: [u8; 2] = [0x00, 0x00];

bitflags! {
    /// Characteristic properties ([Vol 3] Part G, Section 3.3.1.1).
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[repr(transparent)]
    pub struct Prop: u8 {
        /// Permits broadcasts of the Characteristic Value.
        const BROADCAST = 0x01;
        /// Permits reads of the Characteristic Value.
        const READ = 0x02;
        /// Permits writes of the Characteristic Value without response.
        const WRITE_WITHOUT_RESPONSE = 0x04;
        /// Permits writes of the Characteristic Value with response.
        const WRITE = 0x08;
        /// Permits notifications of a Characteristic Value without
        /// acknowledgment. If set, the Client Characteristic Configuration
        /// descriptor shall exist.
        const NOTIFY = 0x10;
        /// Permits indications of a Characteristic Value with acknowledgment.
        /// If set, the Client Characteristic Configuration descriptor shall
        /// exist.
        const INDICATE = 0x20;
        /// Permits signed writes to the Characteristic Value.
        const AUTHENTICATED_SIGNED_WRITES = 0x40;
        /// Additional properties are defined in the Characteristic Extended
        /// Properties descriptor.
        const EXTENDED_PROPERTIES = 0x80;
    }
}

impl Prop {
    /// Returns whether the properties require a Client Characteristic
    /// Configuration descriptor.
    #[inline]
    #[must_use]
    pub const fn needs_ccc(self) -> bool {
        self.intersects(Self::NOTIFY.union(Self::INDICATE))
    }
}

bitflags! {
    /// Attribute permissions using the platform stack's numeric encoding.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[repr(transparent)]
    pub struct Perm: u16 {
        const READ = 0x0001;
        const READ_ENCRYPTED = 0x0002;
        const READ_ENCRYPTED_MITM = 0x0004;
        const WRITE = 0x0010;
        const WRITE_ENCRYPTED = 0x0020;
        const WRITE_ENCRYPTED_MITM = 0x0040;
        const WRITE_SIGNED = 0x0080;
        const WRITE_SIGNED_MITM = 0x0100;
    }
}

/// GATT response status using the platform stack's numeric encoding. `0x0001`
/// through `0x000F` match the ATT error codes ([Vol 3] Part F, Section 3.4.1.1).
#[derive(
    Clone, Copy, Debug, Eq, PartialEq, num_enum::IntoPrimitive, num_enum::FromPrimitive,
)]
#[non_exhaustive]
#[repr(u16)]
pub enum Status {
    Success = 0x0000,
    InvalidHandle = 0x0001,
    ReadNotPermitted = 0x0002,
    WriteNotPermitted = 0x0003,
    InvalidPdu = 0x0004,
    InsufficientAuthentication = 0x0005,
    RequestNotSupported = 0x0006,
    InvalidOffset = 0x0007,
    InsufficientAuthorization = 0x0008,
    InvalidAttributeLength = 0x000D,
    InsufficientEncryption = 0x000F,
    ConnectionCongested = 0x008F,
    #[num_enum(default)]
    Failure = 0x0101,
}

impl Status {
    /// Returns whether the status reports success.
    #[inline]
    #[must_use]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Success)
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match *self {
            Self::Success => "success",
            Self::InvalidHandle => "invalid handle",
            Self::ReadNotPermitted => "read not permitted",
            Self::WriteNotPermitted => "write not permitted",
            Self::InvalidPdu => "invalid PDU",
            Self::InsufficientAuthentication => "insufficient authentication",
            Self::RequestNotSupported => "request not supported",
            Self::InvalidOffset => "invalid offset",
            Self::InsufficientAuthorization => "insufficient authorization",
            Self::InvalidAttributeLength => "invalid attribute length",
            Self::InsufficientEncryption => "insufficient encryption",
            Self::ConnectionCongested => "connection congested",
            Self::Failure => "failure",
        };
        f.write_str(s)
    }
}

/// Failure codes reported by the platform advertiser.
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    PartialEq,
    num_enum::IntoPrimitive,
    num_enum::FromPrimitive,
    thiserror::Error,
)]
#[non_exhaustive]
#[repr(u8)]
pub enum AdvFailure {
    #[error("advertising data too large")]
    DataTooLarge = 1,
    #[error("too many active advertisers")]
    TooManyAdvertisers = 2,
    #[error("advertising set already started")]
    AlreadyStarted = 3,
    #[num_enum(default)]
    #[error("internal advertiser error")]
    InternalError = 4,
    #[error("advertising not supported on this adapter")]
    FeatureUnsupported = 5,
}

/// Link state of a remote device as reported by the platform stack.
#[derive(
    Clone, Copy, Debug, Eq, PartialEq, num_enum::IntoPrimitive, num_enum::FromPrimitive,
)]
#[repr(u8)]
pub enum ConnectionState {
    #[num_enum(default)]
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Disconnecting = 3,
}

/// Adapter radio state as delivered by the platform's state-changed
/// broadcast. The string forms are the ones crossing the plugin bridge.
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    PartialEq,
    num_enum::IntoPrimitive,
    num_enum::FromPrimitive,
    serde::Deserialize,
    serde::Serialize,
)]
#[repr(u8)]
#[serde(rename_all = "camelCase")]
pub enum RadioState {
    #[num_enum(default)]
    Unknown = 0,
    Off = 10,
    TurningOn = 11,
    On = 12,
    TurningOff = 13,
}

impl RadioState {
    /// Returns whether the radio is usable for advertising and serving.
    #[inline]
    #[must_use]
    pub const fn is_on(self) -> bool {
        matches!(self, Self::On)
    }
}

impl Display for RadioState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match *self {
            Self::Unknown => "unknown",
            Self::Off => "off",
            Self::TurningOn => "turningOn",
            Self::On => "on",
            Self::TurningOff => "turningOff",
        };
        f.write_str(s)
    }
}
