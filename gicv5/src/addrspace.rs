//! Guest-physical address-space client.
//!
//! All IST walks and MAP_L2_ISTR updates go through this trait rather than
//! touching guest memory directly, so the emulation core can be exercised
//! with an in-memory double in tests and wired to the real guest address
//! space in production, the same seam drivers draw around hardware access
//! with a `Driver` trait.

use crate::domain::Domain;

/// Security/routing attributes attached to every guest-memory transaction,
/// mirroring QEMU's `MemTxAttrs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemTxAttrs {
    /// Which domain's address space this access is tagged with.
    pub space: Domain,
    /// Whether the transaction is secure.
    pub secure: bool,
}

impl MemTxAttrs {
    /// Build the attributes for an access performed on behalf of `domain`.
    ///
    /// `secure = domain ∈ {S, EL3}`, except that when the Realm domain is
    /// unimplemented, EL3 accesses are emitted as Secure rather than Root.
    pub fn for_domain(domain: Domain, realm_unimplemented: bool) -> MemTxAttrs {
        let secure = matches!(domain, Domain::Secure | Domain::El3);
        let space = if domain == Domain::El3 && realm_unimplemented {
            Domain::Secure
        } else {
            domain
        };
        MemTxAttrs { space, secure }
    }
}

/// Guest-physical address-space access, parameterized by [`MemTxAttrs`].
///
/// Every method returns `None` on a failed transaction (bus error, unmapped
/// region) rather than panicking: a failed guest-memory transaction during
/// an IST walk must abort just the in-flight operation, not the device.
pub trait AddressSpace {
    fn read32(&self, addr: u64, attrs: MemTxAttrs) -> Option<u32>;
    fn write32(&mut self, addr: u64, value: u32, attrs: MemTxAttrs) -> Option<()>;
    fn read64(&self, addr: u64, attrs: MemTxAttrs) -> Option<u64>;
    fn write64(&mut self, addr: u64, value: u64, attrs: MemTxAttrs) -> Option<()>;
}

#[cfg(any(test, feature = "test-util"))]
pub mod testutil {
    //! An in-memory [`AddressSpace`] double for unit and scenario tests.

    use std::collections::HashMap;

    use super::{AddressSpace, MemTxAttrs};

    /// A flat byte-addressable memory, with no actual security enforcement,
    /// for driving IST-walker and register-file tests without a real VMM.
    #[derive(Default)]
    pub struct TestAddressSpace {
        bytes: HashMap<u64, u8>,
        /// When set, every transaction to this address fails, simulating a
        /// guest memory bus error.
        pub fail_at: Option<u64>,
    }

    impl TestAddressSpace {
        pub fn new() -> Self {
            Self::default()
        }

        fn touches_failure(&self, addr: u64, len: u64) -> bool {
            matches!(self.fail_at, Some(f) if f >= addr && f < addr + len)
        }

        fn get(&self, addr: u64) -> u8 {
            *self.bytes.get(&addr).unwrap_or(&0)
        }

        fn set(&mut self, addr: u64, value: u8) {
            self.bytes.insert(addr, value);
        }
    }

    impl AddressSpace for TestAddressSpace {
        fn read32(&self, addr: u64, _attrs: MemTxAttrs) -> Option<u32> {
            if self.touches_failure(addr, 4) {
                return None;
            }
            let mut bytes = [0u8; 4];
            for (i, b) in bytes.iter_mut().enumerate() {
                *b = self.get(addr + i as u64);
            }
            Some(u32::from_le_bytes(bytes))
        }

        fn write32(&mut self, addr: u64, value: u32, _attrs: MemTxAttrs) -> Option<()> {
            if self.touches_failure(addr, 4) {
                return None;
            }
            for (i, b) in value.to_le_bytes().iter().enumerate() {
                self.set(addr + i as u64, *b);
            }
            Some(())
        }

        fn read64(&self, addr: u64, _attrs: MemTxAttrs) -> Option<u64> {
            if self.touches_failure(addr, 8) {
                return None;
            }
            let mut bytes = [0u8; 8];
            for (i, b) in bytes.iter_mut().enumerate() {
                *b = self.get(addr + i as u64);
            }
            Some(u64::from_le_bytes(bytes))
        }

        fn write64(&mut self, addr: u64, value: u64, _attrs: MemTxAttrs) -> Option<()> {
            if self.touches_failure(addr, 8) {
                return None;
            }
            for (i, b) in value.to_le_bytes().iter().enumerate() {
                self.set(addr + i as u64, *b);
            }
            Some(())
        }
    }
}
