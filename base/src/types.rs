use std::fmt::{self, Display, Formatter};

use serde::Serialize;

/// An address in the simulated machine's memory.
///
/// Addresses are plain 32-bit words; the conventional segment bases
/// (user text at 0x00400000 and so on) are properties of the program
/// image loaded by the engine, not of this type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Address(u32);

impl Address {
    #[must_use]
    pub const fn new(value: u32) -> Address {
        Address(value)
    }
}

impl From<u32> for Address {
    fn from(value: u32) -> Address {
        Address(value)
    }
}

impl From<Address> for u32 {
    fn from(addr: Address) -> u32 {
        addr.0
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "0x{:08x}", self.0)
    }
}

/// Identifies one independently loaded simulated program instance.
///
/// Context identifiers are small dense indices (0, 1, ...); the
/// coordinator treats the lowest enabled index as the preferred
/// active context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ContextId(u32);

impl ContextId {
    #[must_use]
    pub const fn new(value: u32) -> ContextId {
        ContextId(value)
    }

    /// The context's position in dense per-context storage.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for ContextId {
    fn from(value: u32) -> ContextId {
        ContextId(value)
    }
}

impl From<ContextId> for u32 {
    fn from(id: ContextId) -> u32 {
        id.0
    }
}

impl Display for ContextId {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "context {}", self.0)
    }
}

#[test]
fn test_address_display() {
    assert_eq!(Address::new(0x0040_0024).to_string(), "0x00400024");
    assert_eq!(Address::new(0).to_string(), "0x00000000");
}

#[test]
fn test_context_id_ordering() {
    // The coordinator relies on ContextId ordering to pick the
    // lowest-index enabled context.
    let mut ids = [ContextId::new(1), ContextId::new(0)];
    ids.sort();
    assert_eq!(ids[0], ContextId::new(0));
    assert_eq!(ids[0].index(), 0);
}
