use super::Uuid;

/// Advertising interval preference, matching the platform advertiser's
/// low-power / balanced / low-latency modes.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Eq,
    PartialEq,
    num_enum::IntoPrimitive,
    num_enum::TryFromPrimitive,
    serde::Deserialize,
    serde::Serialize,
)]
#[repr(u8)]
#[serde(rename_all = "camelCase")]
pub enum AdvMode {
    LowPower = 0,
    #[default]
    Balanced = 1,
    LowLatency = 2,
}

/// Radiated power preference for the advertiser.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Eq,
    PartialEq,
    num_enum::IntoPrimitive,
    num_enum::TryFromPrimitive,
    serde::Deserialize,
    serde::Serialize,
)]
#[repr(u8)]
#[serde(rename_all = "camelCase")]
pub enum TxPowerLevel {
    UltraLow = 0,
    Low = 1,
    Medium = 2,
    #[default]
    High = 3,
}

/// Parameters for one advertising set: the advertised service UUID, an
/// optional local device name, and the transmit settings.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AdvParams {
    pub service: Uuid,
    pub local_name: Option<String>,
    pub mode: AdvMode,
    pub tx_power: TxPowerLevel,
    /// Whether the payload carries the device name in addition to the
    /// service UUID.
    pub include_name: bool,
}

impl AdvParams {
    /// Creates advertising parameters with the default transmit settings.
    #[inline]
    #[must_use]
    pub fn new(service: Uuid, local_name: Option<String>) -> Self {
        Self {
            service,
            local_name,
            mode: AdvMode::default(),
            tx_power: TxPowerLevel::default(),
            include_name: true,
        }
    }
}
