use std::fmt;

/// A trace or span identifier.
///
/// Ids are unsigned 128-bit values. The canonical wire form is lowercase hex,
/// 16 digits when the value fits in 64 bits and 32 digits otherwise. The agent
/// payload carries the low 64 bits as a raw integer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id(u128);

impl Id {
    /// The absent id. A span whose parent id is zero is a root span.
    pub const ZERO: Id = Id(0);

    pub const fn from_u128(value: u128) -> Self {
        Id(value)
    }

    pub const fn from_u64(value: u64) -> Self {
        Id(value as u128)
    }

    pub const fn to_u128(self) -> u128 {
        self.0
    }

    /// Low 64 bits, the width used by the agent payload.
    pub const fn to_u64(self) -> u64 {
        self.0 as u64
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Natural-width hex form: 16 digits unless the value exceeds `u64::MAX`,
    /// in which case all 32 digits are used.
    pub fn to_hex(self) -> String {
        if self.0 > u64::MAX as u128 {
            format!("{:032x}", self.0)
        } else {
            format!("{:016x}", self.0)
        }
    }

    /// Parses a hex id. Values longer than 32 digits or outside
    /// `[0, 2^128 - 1]` are rejected.
    pub fn from_hex(value: &str) -> Option<Id> {
        if value.is_empty() || value.len() > 32 {
            return None;
        }
        u128::from_str_radix(value, 16).ok().map(Id)
    }

    /// Parses a decimal id in `[0, 2^128 - 1]`.
    pub fn from_dec(value: &str) -> Option<Id> {
        if value.is_empty() {
            return None;
        }
        value.parse::<u128>().ok().map(Id)
    }
}

impl fmt::Display for Id {
    /// Decimal form, matching how the original tracer prints ids in logs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Id {
    fn from(value: u64) -> Self {
        Id(value as u128)
    }
}

impl From<u128> for Id {
    fn from(value: u128) -> Self {
        Id(value)
    }
}
