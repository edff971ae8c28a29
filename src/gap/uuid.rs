use std::fmt::{Debug, Display, Formatter};
use std::num::{NonZeroU128, NonZeroU16};
use std::str::FromStr;

const SHIFT: u32 = u128::BITS - u32::BITS;
const BASE: u128 = 0x00000000_0000_1000_8000_00805F9B34FB;
const MASK_16: u128 = !((u16::MAX as u128) << SHIFT);
const MASK_32: u128 = !((u32::MAX as u128) << SHIFT);

/// 16-, 32-, or 128-bit UUID ([Vol 3] Part B, Section 2.5.1). The canonical
/// external representation is the 36-character hyphenated string form used
/// across the plugin bridge.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(transparent)]
pub struct Uuid(NonZeroU128);

impl Uuid {
    /// Creates a UUID from a `u128`.
    #[inline]
    #[must_use]
    pub const fn new(v: u128) -> Option<Self> {
        match NonZeroU128::new(v) {
            Some(nz) => Some(Self(nz)),
            None => None,
        }
    }

    /// Returns a [`Uuid16`] representation or [`None`] if the UUID is not an
    /// assigned 16-bit UUID.
    #[inline]
    #[must_use]
    pub fn as_uuid16(self) -> Option<Uuid16> {
        self.as_u16().and_then(Uuid16::new)
    }

    /// Converts an assigned 16-bit Bluetooth SIG UUID to `u16`.
    #[inline]
    #[must_use]
    pub fn as_u16(self) -> Option<u16> {
        #[allow(clippy::cast_possible_truncation)]
        let v = (self.0.get() >> SHIFT) as u16;
        (self.0.get() & MASK_16 == BASE && v > 0).then_some(v)
    }

    /// Returns whether the UUID lies within the Bluetooth base UUID range.
    #[inline]
    #[must_use]
    pub fn is_sig(self) -> bool {
        self.0.get() & MASK_32 == BASE
    }

    /// Returns the UUID as a little-endian byte array.
    #[inline]
    #[must_use]
    pub const fn to_bytes(self) -> [u8; 16] {
        self.0.get().to_le_bytes()
    }
}

impl From<Uuid16> for Uuid {
    #[inline]
    fn from(u: Uuid16) -> Self {
        u.as_uuid()
    }
}

impl From<Uuid> for u128 {
    #[inline]
    fn from(u: Uuid) -> Self {
        u.0.get()
    }
}

impl Debug for Uuid {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if let Some(v) = self.as_u16() {
            write!(f, "{v:#06X}")
        } else {
            Display::fmt(self, f)
        }
    }
}

impl Display for Uuid {
    #[allow(clippy::cast_possible_truncation)]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let v = self.0.get();
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:04x}-{:012x}",
            (v >> 96) as u32,
            (v >> 80) as u16,
            (v >> 64) as u16,
            (v >> 48) as u16,
            (v & ((1 << 48) - 1)) as u64
        )
    }
}

/// Error returned when a UUID string cannot be parsed.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
#[error("invalid UUID string")]
pub struct UuidError;

impl FromStr for Uuid {
    type Err = UuidError;

    /// Parses the canonical 36-character hyphenated form. Bare 4- or 8-digit
    /// hex strings are accepted as SIG short forms and expanded over the
    /// Bluetooth base UUID.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        fn hex(s: &str) -> Result<u128, UuidError> {
            if !s.is_empty() && s.bytes().all(|b| b.is_ascii_hexdigit()) {
                u128::from_str_radix(s, 16).map_err(|_| UuidError)
            } else {
                Err(UuidError)
            }
        }
        let v = match s.len() {
            4 | 8 => hex(s)? << SHIFT | BASE,
            36 => {
                let b = s.as_bytes();
                if ![8, 13, 18, 23].iter().all(|&i| b[i] == b'-') {
                    return Err(UuidError);
                }
                hex(&s[..8])? << 96
                    | hex(&s[9..13])? << 80
                    | hex(&s[14..18])? << 64
                    | hex(&s[19..23])? << 48
                    | hex(&s[24..])?
            }
            _ => return Err(UuidError),
        };
        Self::new(v).ok_or(UuidError)
    }
}

impl serde::Serialize for Uuid {
    #[inline]
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for Uuid {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        struct Visitor;
        impl serde::de::Visitor<'_> for Visitor {
            type Value = Uuid;

            fn expecting(&self, f: &mut Formatter) -> std::fmt::Result {
                f.write_str("a hyphenated or SIG short-form UUID string")
            }

            fn visit_str<E: serde::de::Error>(self, s: &str) -> Result<Self::Value, E> {
                s.parse().map_err(E::custom)
            }
        }
        d.deserialize_str(Visitor)
    }
}

/// 16-bit Bluetooth SIG UUID.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(transparent)]
pub struct Uuid16(NonZeroU16);

impl Uuid16 {
    /// Creates a 16-bit SIG UUID from a `u16`.
    #[inline]
    #[must_use]
    pub const fn new(v: u16) -> Option<Self> {
        match NonZeroU16::new(v) {
            Some(nz) => Some(Self(nz)),
            None => None,
        }
    }

    /// Returns the 128-bit UUID representation.
    #[inline]
    #[must_use]
    pub const fn as_uuid(self) -> Uuid {
        // SAFETY: Always non-zero
        Uuid(unsafe { NonZeroU128::new_unchecked((self.0.get() as u128) << SHIFT | BASE) })
    }
}

impl Debug for Uuid16 {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#06X}", self.0.get())
    }
}

impl Display for Uuid16 {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(self, f)
    }
}

impl From<Uuid16> for u16 {
    #[inline]
    fn from(u: Uuid16) -> Self {
        u.0.get()
    }
}

impl PartialEq<Uuid16> for Uuid {
    #[inline]
    fn eq(&self, rhs: &Uuid16) -> bool {
        *self == rhs.as_uuid()
    }
}

impl PartialEq<Uuid> for Uuid16 {
    #[inline]
    fn eq(&self, rhs: &Uuid) -> bool {
        self.as_uuid() == *rhs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse() {
        let u: Uuid = "0000180d-0000-1000-8000-00805f9b34fb".parse().unwrap();
        assert_eq!(u.as_u16(), Some(0x180D));
        assert_eq!(u, Uuid16::new(0x180D).unwrap().as_uuid());

        let short: Uuid = "180D".parse().unwrap();
        assert_eq!(short, u);
        let long: Uuid = "0000180d".parse().unwrap();
        assert_eq!(long, u);

        let custom: Uuid = "6e400001-b5a3-f393-e0a9-e50e24dcca9e".parse().unwrap();
        assert_eq!(custom.as_u16(), None);
        assert!(!custom.is_sig());
    }

    #[test]
    fn parse_errors() {
        assert_eq!(Uuid::from_str(""), Err(UuidError));
        assert_eq!(Uuid::from_str("180"), Err(UuidError));
        assert_eq!(
            Uuid::from_str("0000180d-0000-1000-8000-00805f9b34f"),
            Err(UuidError)
        );
        assert_eq!(
            Uuid::from_str("0000180dx0000-1000-8000-00805f9b34fb"),
            Err(UuidError)
        );
        assert_eq!(
            Uuid::from_str("00000000-0000-0000-0000-000000000000"),
            Err(UuidError)
        );
        assert_eq!(
            Uuid::from_str("g000180d-0000-1000-8000-00805f9b34fb"),
            Err(UuidError)
        );
    }

    #[test]
    fn display() {
        let s = "6e400001-b5a3-f393-e0a9-e50e24dcca9e";
        assert_eq!(Uuid::from_str(s).unwrap().to_string(), s);
        let u = Uuid16::new(0x2902).unwrap().as_uuid();
        assert_eq!(u.to_string(), "00002902-0000-1000-8000-00805f9b34fb");
        assert_eq!(format!("{u:?}"), "0x2902");
    }

    #[test]
    fn serde_round_trip() {
        let u: Uuid = "0000180d-0000-1000-8000-00805f9b34fb".parse().unwrap();
        let json = serde_json::to_string(&u).unwrap();
        assert_eq!(json, "\"0000180d-0000-1000-8000-00805f9b34fb\"");
        assert_eq!(serde_json::from_str::<Uuid>(&json).unwrap(), u);
        assert!(serde_json::from_str::<Uuid>("\"nope\"").is_err());
    }
}
