//! Interrupt State Table walker and L2 ISTE representation.
//!
//! The walker is kept purely functional over `(cfg, id) -> Option<addr>`,
//! with the writable [`IsteHandle`] the only capability that authorizes a
//! writeback — it remembers whether it came from the [`LpiCache`] so `put`
//! can apply the cache-vs-memory discipline without the caller tracking
//! anything.

use crate::{
    addrspace::{AddressSpace, MemTxAttrs},
    domain::Domain,
    intid::IaffId,
    log::guest_error,
    lpi_cache::LpiCache,
    modes::{HandlingMode, RoutingMode},
    prio::Priority,
};

/// One- or two-level IST structure, as configured by `IRS_IST_CFGR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IstStructure {
    OneLevel,
    TwoLevel,
}

/// L2 ISTE entry size in bytes: 4, 8, or 16.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsteSize {
    Bytes4,
    Bytes8,
    Bytes16,
}

impl IsteSize {
    /// Decode a 2-bit ISTSZ field, treating a reserved encoding as the
    /// smallest size ("treat as the minimum valid size").
    pub const fn from_field(bits: u8) -> IsteSize {
        match bits & 0b11 {
            1 => IsteSize::Bytes8,
            2 => IsteSize::Bytes16,
            _ => IsteSize::Bytes4,
        }
    }

    pub const fn to_field(self) -> u8 {
        match self {
            IsteSize::Bytes4 => 0,
            IsteSize::Bytes8 => 1,
            IsteSize::Bytes16 => 2,
        }
    }

    pub const fn bytes(self) -> u64 {
        match self {
            IsteSize::Bytes4 => 4,
            IsteSize::Bytes8 => 8,
            IsteSize::Bytes16 => 16,
        }
    }
}

/// L2 page size: 4K, 16K, or 64K.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum L2PageSize {
    Size4K,
    Size16K,
    Size64K,
}

impl L2PageSize {
    /// Decode a 2-bit L2SZ field, treating a reserved encoding as the
    /// default (4K) size.
    pub const fn from_field(bits: u8) -> L2PageSize {
        match bits & 0b11 {
            1 => L2PageSize::Size16K,
            2 => L2PageSize::Size64K,
            _ => L2PageSize::Size4K,
        }
    }

    pub const fn to_field(self) -> u8 {
        match self {
            L2PageSize::Size4K => 0,
            L2PageSize::Size16K => 1,
            L2PageSize::Size64K => 2,
        }
    }

    pub const fn bytes(self) -> u64 {
        match self {
            L2PageSize::Size4K => 4 * 1024,
            L2PageSize::Size16K => 16 * 1024,
            L2PageSize::Size64K => 64 * 1024,
        }
    }
}

/// Minimum number of LPI ID bits an IST configuration may declare.
pub const MIN_LPI_ID_BITS: u8 = 14;

/// Maximum number of LPI ID bits an IST configuration may declare.
pub const MAX_LPI_ID_BITS: u8 = 24;

/// Frozen IST configuration for one `(IRS, domain)` pair, captured from
/// `IRS_IST_CFGR` when the guest sets `IRS_IST_BASER.VALID`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IstConfig {
    pub valid: bool,
    pub base: u64,
    pub structure: IstStructure,
    pub istsz: IsteSize,
    pub l2_page_size: L2PageSize,
    pub id_bits: u8,
}

impl IstConfig {
    pub const fn reset() -> IstConfig {
        IstConfig {
            valid: false,
            base: 0,
            structure: IstStructure::OneLevel,
            istsz: IsteSize::Bytes4,
            l2_page_size: L2PageSize::Size4K,
            id_bits: MIN_LPI_ID_BITS,
        }
    }

    /// Number of low bits of `id` used to index within an L2 page.
    pub(crate) fn l2_idx_bits(&self) -> u32 {
        (self.l2_page_size.bytes() / self.istsz.bytes()).trailing_zeros()
    }

    /// Decode a raw `IRS_IST_CFGR` word into a sanitized configuration,
    /// latching `base` from the paired `IRS_IST_BASER` write that marks it
    /// valid. Reserved `ISTSZ`/`L2SZ` encodings collapse to their default;
    /// `id_bits` clamps into `[MIN_LPI_ID_BITS, MAX_LPI_ID_BITS]`.
    pub fn from_cfgr_raw(raw: u32, base: u64) -> IstConfig {
        let id_bits = ((raw >> 8) & 0x3f) as u8;
        IstConfig {
            valid: true,
            base,
            structure: if raw & 1 != 0 {
                IstStructure::TwoLevel
            } else {
                IstStructure::OneLevel
            },
            istsz: IsteSize::from_field(((raw >> 1) & 0b11) as u8),
            l2_page_size: L2PageSize::from_field(((raw >> 3) & 0b11) as u8),
            id_bits: id_bits.clamp(MIN_LPI_ID_BITS, MAX_LPI_ID_BITS),
        }
    }

    /// Encode this configuration back into the raw `IRS_IST_CFGR` bit layout
    /// (`valid`/`base` live in `IRS_IST_BASER`, not here).
    pub const fn to_cfgr_raw(self) -> u32 {
        let structure_bit = matches!(self.structure, IstStructure::TwoLevel) as u32;
        structure_bit
            | ((self.istsz.to_field() as u32) << 1)
            | ((self.l2_page_size.to_field() as u32) << 3)
            | ((self.id_bits as u32) << 8)
    }
}

/// A handle to a live L2 ISTE word, obtained from [`get_l2_iste`] and
/// committed with [`put_l2_iste`]. Carries whether it originated from the
/// [`LpiCache`] so the writeback discipline stays automatic.
pub struct IsteHandle {
    domain: Domain,
    id: u32,
    word: u32,
    origin: Origin,
}

#[derive(Clone, Copy)]
enum Origin {
    Cached,
    Memory(u64),
}

impl IsteHandle {
    pub fn word(&self) -> L2Iste {
        L2Iste(self.word)
    }

    pub fn set_word(&mut self, word: L2Iste) {
        self.word = word.0;
    }
}

/// Reason a guest-memory transaction failed during an IST walk, for the
/// EC-class software error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IstWalkFailure {
    /// L1 ISTE read failed (EC class 0x01).
    L1Read,
    /// L2 ISTE read failed (EC class 0x02).
    L2Read,
}

impl IstWalkFailure {
    pub const fn ec_class(self) -> u8 {
        match self {
            IstWalkFailure::L1Read => 0x01,
            IstWalkFailure::L2Read => 0x02,
        }
    }
}

/// Look up the L2 ISTE for `id` under `domain`'s IST configuration. Returns
/// `None` if the configuration is not valid, the L1 entry is not valid
/// (2-level), or the walk hits a guest memory failure (logged and
/// absorbed).
pub fn get_l2_iste<A: AddressSpace>(
    cfg: &IstConfig,
    domain: Domain,
    id: u32,
    addrspace: &A,
    attrs: MemTxAttrs,
    cache: &mut LpiCache,
) -> Option<IsteHandle> {
    if !cfg.valid {
        return None;
    }

    if let Some(word) = cache.get(domain, id) {
        return Some(IsteHandle {
            domain,
            id,
            word,
            origin: Origin::Cached,
        });
    }

    let l2_base = match cfg.structure {
        IstStructure::OneLevel => cfg.base,
        IstStructure::TwoLevel => {
            let idx_bits = cfg.l2_idx_bits();
            let l1_index = (id as u64) >> idx_bits;
            let l1_addr = cfg.base + l1_index * 8;
            let Some(l1_word) = addrspace.read64(l1_addr, attrs) else {
                guest_error!("IST L1 read failed at 0x{l1_addr:x} for domain {domain}");
                return None;
            };
            if l1_word & 1 == 0 {
                return None;
            }
            l1_word & 0x00ff_ffff_ffff_f000
        }
    };

    let idx_bits = cfg.l2_idx_bits();
    let l2_index = match cfg.structure {
        IstStructure::OneLevel => id as u64,
        IstStructure::TwoLevel => (id as u64) & ((1u64 << idx_bits) - 1),
    };
    let l2_addr = l2_base + l2_index * cfg.istsz.bytes();
    let Some(word) = addrspace.read32(l2_addr, attrs) else {
        guest_error!("IST L2 read failed at 0x{l2_addr:x} for domain {domain}");
        return None;
    };

    Some(IsteHandle {
        domain,
        id,
        word,
        origin: Origin::Memory(l2_addr),
    })
}

/// Commit a modified [`IsteHandle`] back to the cache and/or guest memory.
pub fn put_l2_iste<A: AddressSpace>(
    handle: IsteHandle,
    addrspace: &mut A,
    attrs: MemTxAttrs,
    cache: &mut LpiCache,
) {
    let pending_now = L2Iste(handle.word).pending();
    match handle.origin {
        Origin::Cached if !pending_now => {
            // Transition to not-pending: evict and write back.
            if let Some((_, addr)) = cache.remove(handle.domain, handle.id) {
                addrspace.write32(addr, handle.word, attrs);
            }
        }
        Origin::Cached => {
            cache.update(handle.domain, handle.id, handle.word);
        }
        Origin::Memory(addr) if pending_now => {
            // Transition to pending: insert into the cache, deferring the
            // writeback until eviction.
            cache.insert(handle.domain, handle.id, handle.word, addr);
        }
        Origin::Memory(addr) => {
            addrspace.write32(addr, handle.word, attrs);
        }
    }
}

/// Flush every cached entry for `domain` back to guest memory and empty the
/// cache (used on `VALID -> 0`).
pub fn flush_cache<A: AddressSpace>(
    domain: Domain,
    addrspace: &mut A,
    attrs: MemTxAttrs,
    cache: &mut LpiCache,
) {
    let mut pending_writes = Vec::new();
    cache.flush(domain, |id, word, addr| pending_writes.push((id, word, addr)));
    for (_, word, addr) in pending_writes {
        addrspace.write32(addr, word, attrs);
    }
}

/// L2 ISTE fields, packed into 32 bits:
/// `PENDING[0], ACTIVE[1], HM[2], ENABLE[3], IRM[4], HWU[10:9],
/// PRIORITY[15:11], IAFFID[31:16]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct L2Iste(pub u32);

impl L2Iste {
    pub const fn new() -> L2Iste {
        L2Iste(0)
    }

    pub const fn pending(self) -> bool {
        self.0 & (1 << 0) != 0
    }
    pub fn set_pending(&mut self, v: bool) {
        set_bit(&mut self.0, 0, v);
    }

    pub const fn active(self) -> bool {
        self.0 & (1 << 1) != 0
    }
    pub fn set_active(&mut self, v: bool) {
        set_bit(&mut self.0, 1, v);
    }

    pub const fn hm(self) -> HandlingMode {
        HandlingMode::from_bit(self.0 & (1 << 2) != 0)
    }
    pub fn set_hm(&mut self, v: HandlingMode) {
        set_bit(&mut self.0, 2, v.to_bit());
    }

    pub const fn enable(self) -> bool {
        self.0 & (1 << 3) != 0
    }
    pub fn set_enable(&mut self, v: bool) {
        set_bit(&mut self.0, 3, v);
    }

    pub const fn irm(self) -> RoutingMode {
        RoutingMode::from_bit(self.0 & (1 << 4) != 0)
    }
    pub fn set_irm(&mut self, v: RoutingMode) {
        set_bit(&mut self.0, 4, v.to_bit());
    }

    pub const fn hwu(self) -> u8 {
        ((self.0 >> 9) & 0b11) as u8
    }
    pub fn set_hwu(&mut self, v: u8) {
        self.0 = (self.0 & !(0b11 << 9)) | (((v & 0b11) as u32) << 9);
    }

    pub const fn priority(self) -> Priority {
        Priority::mask(((self.0 >> 11) & 0x1f) as u8)
    }
    pub fn set_priority(&mut self, v: Priority) {
        self.0 = (self.0 & !(0x1f << 11)) | (((v.get() & 0x1f) as u32) << 11);
    }

    pub const fn iaffid(self) -> IaffId {
        IaffId((self.0 >> 16) as u16)
    }
    pub fn set_iaffid(&mut self, v: IaffId) {
        self.0 = (self.0 & 0x0000_ffff) | ((v.0 as u32) << 16);
    }
}

impl Default for L2Iste {
    fn default() -> Self {
        Self::new()
    }
}

fn set_bit(word: &mut u32, bit: u32, v: bool) {
    if v {
        *word |= 1 << bit;
    } else {
        *word &= !(1 << bit);
    }
}
