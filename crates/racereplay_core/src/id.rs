//! Thread identifiers and code addresses.
//!
//! A trace names threads by the number the debugger assigned them at capture
//! time and code locations by their offset inside the target module. Offsets
//! only become absolute [`Address`]es once the module's load base is known,
//! since the base moves between runs under ASLR.

use serde::{Deserialize, Serialize};

/// Thread identifier as recorded in a trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ThreadId(u32);

impl ThreadId {
    /// Create from raw value
    #[must_use]
    pub const fn from_raw(value: u32) -> Self {
        Self(value)
    }

    /// Get raw value
    #[must_use]
    pub const fn as_u32(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ThreadId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// Module-relative instruction offset
///
/// The zero offset is a sentinel: the checkpoint carries no program-counter
/// constraint and only selects which thread proceeds. This conflates "no
/// constraint" with a genuine offset of zero, which is never a valid
/// instruction in a loaded ELF module but would misfire if it ever were.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleOffset(u64);

impl ModuleOffset {
    /// The "no breakpoint needed" sentinel
    pub const UNCONSTRAINED: Self = Self(0);

    /// Create from raw value
    #[must_use]
    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Get raw value
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// Whether this is the zero sentinel
    #[must_use]
    pub const fn is_unconstrained(&self) -> bool {
        self.0 == 0
    }

    /// Relocate against a module base, `None` on overflow
    #[must_use]
    pub fn relocate(&self, base: Address) -> Option<Address> {
        base.as_u64().checked_add(self.0).map(Address::from_raw)
    }
}

impl std::fmt::Display for ModuleOffset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "+{:#x}", self.0)
    }
}

impl From<u64> for ModuleOffset {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Absolute address in the target's address space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(u64);

impl Address {
    /// Create from raw value
    #[must_use]
    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Get raw value
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl std::fmt::LowerHex for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::LowerHex::fmt(&self.0, f)
    }
}

impl From<u64> for Address {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_id_display() {
        assert_eq!(ThreadId::from_raw(3).to_string(), "3");
        assert_eq!(ThreadId::from(7).as_u32(), 7);
    }

    #[test]
    fn test_offset_sentinel() {
        assert!(ModuleOffset::UNCONSTRAINED.is_unconstrained());
        assert!(ModuleOffset::from_raw(0).is_unconstrained());
        assert!(!ModuleOffset::from_raw(0x1139).is_unconstrained());
    }

    #[test]
    fn test_offset_relocate() {
        let base = Address::from_raw(0x5555_5555_4000);
        let addr = ModuleOffset::from_raw(0x1139).relocate(base).unwrap();
        assert_eq!(addr, Address::from_raw(0x5555_5555_5139));
    }

    #[test]
    fn test_offset_relocate_overflow() {
        let base = Address::from_raw(u64::MAX);
        assert!(ModuleOffset::from_raw(1).relocate(base).is_none());
    }

    #[test]
    fn test_address_formatting() {
        let addr = Address::from_raw(0x401000);
        assert_eq!(addr.to_string(), "0x401000");
        assert_eq!(format!("{:x}", addr), "401000");
        assert_eq!(ModuleOffset::from_raw(0x20).to_string(), "+0x20");
    }
}
