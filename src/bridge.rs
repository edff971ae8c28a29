//! JSON marshalling across the plugin bridge.
//!
//! UUIDs cross the bridge in canonical hyphenated string form. Byte buffers
//! are tagged Base64 objects (`{"type": "ArrayBuffer", "data": "..."}`) so
//! the application layer can reconstitute binary values from JSON.

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::gap::Uuid;
use crate::gatt::Event;

/// An opaque byte buffer in its bridge representation.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[repr(transparent)]
pub struct Buffer(pub Vec<u8>);

impl Buffer {
    const TAG: &'static str = "ArrayBuffer";

    /// Returns the buffer contents.
    #[inline]
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for Buffer {
    #[inline]
    fn from(v: Vec<u8>) -> Self {
        Self(v)
    }
}

impl AsRef<[u8]> for Buffer {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[derive(Deserialize, Serialize)]
struct Tagged<'a> {
    #[serde(rename = "type")]
    typ: std::borrow::Cow<'a, str>,
    data: std::borrow::Cow<'a, str>,
}

impl Serialize for Buffer {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        Tagged {
            typ: Self::TAG.into(),
            data: base64::engine::general_purpose::STANDARD.encode(&self.0).into(),
        }
        .serialize(s)
    }
}

impl<'de> Deserialize<'de> for Buffer {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        use serde::de::Error;
        let t = Tagged::deserialize(d)?;
        if t.typ != Self::TAG {
            return Err(D::Error::custom(format!("unknown buffer tag {:?}", t.typ)));
        }
        (base64::engine::general_purpose::STANDARD.decode(t.data.as_ref()))
            .map(Self)
            .map_err(D::Error::custom)
    }
}

/// Descriptor value in a service declaration: either a tagged buffer or a
/// plain text value.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(untagged)]
pub enum ValueDesc {
    Buffer(Buffer),
    Text(String),
}

impl ValueDesc {
    /// Returns the declared bytes.
    #[inline]
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::Buffer(b) => b.into_bytes(),
            Self::Text(s) => s.into_bytes(),
        }
    }
}

/// A complete service declaration document, as produced by the application
/// layer's declare-service-from-JSON call.
#[derive(Clone, Debug, Deserialize)]
pub struct ServiceDesc {
    pub uuid: Uuid,
    #[serde(default)]
    pub characteristics: Vec<CharacteristicDesc>,
}

/// One characteristic in a [`ServiceDesc`], with the numeric property and
/// permission masks used by the bridge API.
#[derive(Clone, Debug, Deserialize)]
pub struct CharacteristicDesc {
    pub uuid: Uuid,
    pub properties: u8,
    #[serde(default)]
    pub permissions: u16,
    #[serde(default)]
    pub value: Option<ValueDesc>,
    #[serde(default)]
    pub descriptors: Vec<DescriptorDesc>,
}

/// One descriptor in a [`CharacteristicDesc`]. Permissions default to
/// read-only when the document omits them.
#[derive(Clone, Debug, Deserialize)]
pub struct DescriptorDesc {
    pub uuid: Uuid,
    #[serde(default = "read_only")]
    pub permissions: u16,
    #[serde(default)]
    pub value: Option<ValueDesc>,
}

fn read_only() -> u16 {
    crate::gatt::Perm::READ.bits()
}

/// Bridge form of a remote write event: `{service, characteristic, value}`
/// with the tagged buffer encoding.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct WriteEvent {
    pub service: Uuid,
    pub characteristic: Uuid,
    pub value: Buffer,
}

impl WriteEvent {
    /// Converts a registry event into its bridge form. Returns [`None`] for
    /// events that do not cross the bridge as write notifications.
    #[must_use]
    pub fn from_event(event: &Event) -> Option<Self> {
        match event {
            Event::Write {
                service,
                characteristic,
                value,
            } => Some(Self {
                service: *service,
                characteristic: *characteristic,
                value: Buffer(value.clone()),
            }),
            _ => None,
        }
    }
}
