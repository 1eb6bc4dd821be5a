//! Interrupt Routing Service: owns global SPI/LPI state,
//! per-domain IST configuration, and the config-frame register state that is
//! not simply a view over those.

use crate::{
    addrspace::{AddressSpace, MemTxAttrs},
    domain::{Domain, DomainMask, DOMAIN_COUNT},
    error::{GicError, GicResult},
    intid::{IaffId, IntId, IntType},
    ist::{self, IstConfig, IstStructure, L2Iste},
    log::guest_error,
    lpi_cache::LpiCache,
    prio::Priority,
    spi::SpiTable,
};

/// Board-level construction parameters for one IRS instance.
#[derive(Debug, Clone)]
pub struct IrsConfig {
    pub irsid: u32,
    pub spi_base: u32,
    pub spi_irs_range: u32,
    pub spi_range: u32,
    pub domains: DomainMask,
    pub iaffids: Vec<IaffId>,
}

impl IrsConfig {
    pub fn validate(&self) -> GicResult<()> {
        const INTID_SPACE: u32 = 1 << 24;

        if self.irsid >= (1 << 16) {
            return Err(GicError::InvalidIrsId { irsid: self.irsid });
        }
        if self.spi_range > INTID_SPACE
            || self
                .spi_base
                .checked_add(self.spi_irs_range)
                .map_or(true, |end| end > self.spi_range)
        {
            return Err(GicError::InvalidSpiRange {
                spi_base: self.spi_base,
                spi_irs_range: self.spi_irs_range,
                spi_range: self.spi_range,
            });
        }
        if self.domains == DomainMask::NONE {
            return Err(GicError::NoDomainsImplemented);
        }

        let mut seen = std::collections::HashSet::new();
        for iaffid in &self.iaffids {
            if !seen.insert(iaffid.0) {
                return Err(GicError::DuplicateIaffid { iaffid: iaffid.0 });
            }
        }

        Ok(())
    }

    fn most_privileged_domain(&self) -> Domain {
        for candidate in [Domain::El3, Domain::Secure, Domain::Realm, Domain::NonSecure] {
            if self.domains.implements(candidate) {
                return candidate;
            }
        }
        unreachable!("validate rejects a config with no implemented domains")
    }
}

/// Per-domain config-frame register state that isn't already modeled by
/// [`IstConfig`] or [`SpiTable`].
#[derive(Debug, Clone, Copy, Default)]
struct FrameState {
    cr0_en: bool,
    cr1: u32,
    spi_selr: u32,
    pe_selr: u16,
}

pub struct Irs {
    config: IrsConfig,
    spi: SpiTable,
    lpi_cache: LpiCache,
    ist_cfg: [IstConfig; DOMAIN_COUNT],
    /// Raw `IRS_IST_CFGR` shadow per domain: round-trips whatever the guest
    /// last wrote verbatim, reserved bits included. Only decoded into
    /// `ist_cfg` on the following `IRS_IST_BASER` 0->1 transition.
    cfgr_raw: [u32; DOMAIN_COUNT],
    frame: [FrameState; DOMAIN_COUNT],
}

impl Irs {
    pub fn new(config: IrsConfig) -> GicResult<Irs> {
        config.validate()?;
        let default_domain = config.most_privileged_domain();
        let spi = SpiTable::new(config.spi_base, config.spi_irs_range, default_domain);
        Ok(Irs {
            config,
            spi,
            lpi_cache: LpiCache::new(),
            ist_cfg: [IstConfig::reset(); DOMAIN_COUNT],
            cfgr_raw: [0; DOMAIN_COUNT],
            frame: [FrameState::default(); DOMAIN_COUNT],
        })
    }

    /// Power-on reset: drops (does not write back) all LPI cache state and
    /// resets every SPI and config-frame register to its architectural
    /// default.
    pub fn reset(&mut self) {
        let default_domain = self.config.most_privileged_domain();
        self.spi.reset_all(default_domain);
        for domain in Domain::ALL {
            self.lpi_cache.clear_no_writeback(domain);
        }
        self.ist_cfg = [IstConfig::reset(); DOMAIN_COUNT];
        self.cfgr_raw = [0; DOMAIN_COUNT];
        self.frame = [FrameState::default(); DOMAIN_COUNT];
    }

    pub fn irsid(&self) -> u32 {
        self.config.irsid
    }

    pub fn domains(&self) -> DomainMask {
        self.config.domains
    }

    pub fn spi_base(&self) -> u32 {
        self.config.spi_base
    }

    pub fn spi_irs_range(&self) -> u32 {
        self.config.spi_irs_range
    }

    pub fn spi_range(&self) -> u32 {
        self.config.spi_range
    }

    pub fn iaffid_exists(&self, iaffid: u16) -> bool {
        self.config.iaffids.iter().any(|id| id.0 == iaffid)
    }

    pub fn spi_table(&self) -> &SpiTable {
        &self.spi
    }

    /// Wire-level `set_spi(id, level)`, the external SPI input line
    /// interface. Returns the target IAFFID if the pending state may have
    /// changed, so the caller knows whose wake lines to recompute.
    pub fn set_spi_level(&mut self, id: u32, level: bool) -> Option<IaffId> {
        if self.spi.set_spi(id, level) {
            self.spi.get(id).map(|s| s.iaffid)
        } else {
            None
        }
    }

    pub(crate) fn spi_table_mut(&mut self) -> &mut SpiTable {
        &mut self.spi
    }

    pub fn ist_config(&self, domain: Domain) -> IstConfig {
        self.ist_cfg[domain.index()]
    }

    pub fn attrs(&self, domain: Domain) -> MemTxAttrs {
        MemTxAttrs::for_domain(domain, self.config.domains.realm_unimplemented())
    }

    /// Mutate the L2 ISTE for `(domain, id)` in place, applying the
    /// cache/memory writeback discipline, returning the committed IAFFID on
    /// success: the writable handle is the only writeback capability;
    /// callers never see cache vs. memory directly.
    pub(crate) fn with_lpi<A: AddressSpace>(
        &mut self,
        addrspace: &mut A,
        domain: Domain,
        id: u32,
        f: impl FnOnce(&mut L2Iste),
    ) -> Option<IaffId> {
        let cfg = self.ist_cfg[domain.index()];
        let attrs = self.attrs(domain);
        let mut handle = ist::get_l2_iste(&cfg, domain, id, addrspace, attrs, &mut self.lpi_cache)?;
        let mut word = handle.word();
        f(&mut word);
        let iaffid = word.iaffid();
        handle.set_word(word);
        ist::put_l2_iste(handle, addrspace, attrs, &mut self.lpi_cache);
        Some(iaffid)
    }

    /// Read-only peek at an LPI's current L2 ISTE, without touching the
    /// cache-vs-memory writeback path (used by `request_config`).
    pub(crate) fn peek_lpi<A: AddressSpace>(
        &mut self,
        addrspace: &A,
        domain: Domain,
        id: u32,
    ) -> Option<L2Iste> {
        let cfg = self.ist_cfg[domain.index()];
        let attrs = self.attrs(domain);
        ist::get_l2_iste(&cfg, domain, id, addrspace, attrs, &mut self.lpi_cache).map(|h| h.word())
    }

    /// `IRS_IST_BASER` write: flushes the cache on a 1->0 transition; on a
    /// 0->1 transition, decodes the staged `IRS_IST_CFGR` shadow into the
    /// live, sanitized `IstConfig` (this is the only point where reserved
    /// `ISTSZ`/`L2SZ` encodings and out-of-range `id_bits` get sanitized).
    pub fn ist_baser_write<A: AddressSpace>(
        &mut self,
        domain: Domain,
        addrspace: &mut A,
        new_valid: bool,
        base: u64,
    ) {
        let attrs = self.attrs(domain);
        let was_valid = self.ist_cfg[domain.index()].valid;
        if was_valid && !new_valid {
            ist::flush_cache(domain, addrspace, attrs, &mut self.lpi_cache);
            self.ist_cfg[domain.index()].valid = false;
        } else if !was_valid && new_valid {
            let raw = self.cfgr_raw[domain.index()];
            self.ist_cfg[domain.index()] = IstConfig::from_cfgr_raw(raw, base);
        } else if !was_valid {
            self.ist_cfg[domain.index()].base = base;
        }
    }

    /// `IRS_IST_CFGR` write: stashes the raw word verbatim (reserved bits
    /// included) to be decoded on the next `IST_BASER` 0->1 transition; only
    /// accepted while `IST_BASER.VALID == 0`. `IRS_IST_CFGR` reads return
    /// this raw shadow unchanged, regardless of `VALID`.
    pub fn ist_cfgr_write(&mut self, domain: Domain, raw: u32) {
        if self.ist_cfg[domain.index()].valid {
            guest_error!("IRS_IST_CFGR write ignored: IST_BASER.VALID is set for domain {domain}");
            return;
        }
        self.cfgr_raw[domain.index()] = raw;
    }

    /// The raw `IRS_IST_CFGR` shadow for `domain`, as last written by the
    /// guest (reserved bits preserved verbatim).
    pub fn cfgr_raw(&self, domain: Domain) -> u32 {
        self.cfgr_raw[domain.index()]
    }

    /// `IRS_MAP_L2_ISTR` write: read-modify-write the L1 ISTE's VALID bit
    /// for `id`.
    pub fn map_l2_istr_write<A: AddressSpace>(&mut self, domain: Domain, addrspace: &mut A, id: u32) {
        let cfg = self.ist_cfg[domain.index()];
        if !cfg.valid || cfg.structure != IstStructure::TwoLevel {
            guest_error!("IRS_MAP_L2_ISTR: domain {domain} has no valid two-level IST");
            return;
        }
        let attrs = self.attrs(domain);
        let l1_index = (id as u64) >> cfg.l2_idx_bits();
        let l1_addr = cfg.base + l1_index * 8;
        match addrspace.read64(l1_addr, attrs) {
            Some(word) => {
                addrspace.write64(l1_addr, word | 1, attrs);
            }
            None => guest_error!("IRS_MAP_L2_ISTR: L1 read failed at 0x{l1_addr:x}"),
        }
    }

    pub fn spi_selr(&self, domain: Domain) -> u32 {
        self.frame[domain.index()].spi_selr
    }

    pub fn set_spi_selr(&mut self, domain: Domain, id: u32) {
        self.frame[domain.index()].spi_selr = id;
    }

    pub fn pe_selr(&self, domain: Domain) -> u16 {
        self.frame[domain.index()].pe_selr
    }

    pub fn set_pe_selr(&mut self, domain: Domain, iaffid: u16) {
        self.frame[domain.index()].pe_selr = iaffid;
    }

    pub fn pe_statusr_valid(&self, domain: Domain) -> bool {
        self.iaffid_exists(self.pe_selr(domain))
    }

    pub fn cr0_enable(&self, domain: Domain) -> bool {
        self.frame[domain.index()].cr0_en
    }

    pub fn set_cr0_enable(&mut self, domain: Domain, en: bool) {
        self.frame[domain.index()].cr0_en = en;
    }

    pub fn cr1(&self, domain: Domain) -> u32 {
        self.frame[domain.index()].cr1
    }

    pub fn set_cr1(&mut self, domain: Domain, value: u32) {
        self.frame[domain.index()].cr1 = value;
    }

    /// Eager scan for the best pending, enabled, non-active SPI/LPI targeted
    /// at `iaffid` within `domain`.
    pub fn hppi_for(&self, domain: Domain, iaffid: IaffId) -> (Option<IntId>, Priority) {
        let mut best: Option<(IntId, Priority)> = None;

        for (id, spi) in self.spi.iter() {
            if spi.domain == domain && spi.enabled && spi.pending && !spi.active && spi.iaffid == iaffid
            {
                keep_min(&mut best, IntId::new(IntType::Spi, id), spi.priority);
            }
        }

        for (id, word) in self.lpi_cache.iter(domain) {
            let iste = L2Iste(word);
            if iste.enable() && !iste.active() && iste.iaffid() == iaffid {
                keep_min(&mut best, IntId::new(IntType::Lpi, id), iste.priority());
            }
        }

        match best {
            Some((intid, prio)) => (Some(intid), prio),
            None => (None, Priority::IDLE),
        }
    }
}

fn keep_min(best: &mut Option<(IntId, Priority)>, candidate: IntId, prio: Priority) {
    match best {
        Some((_, best_prio)) if prio >= *best_prio => {}
        _ => *best = Some((candidate, prio)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addrspace::testutil::TestAddressSpace;

    fn config() -> IrsConfig {
        IrsConfig {
            irsid: 0,
            spi_base: 32,
            spi_irs_range: 32,
            spi_range: 64,
            domains: DomainMask::single(Domain::NonSecure),
            iaffids: vec![IaffId(0)],
        }
    }

    #[test]
    fn rejects_spi_range_overflow() {
        let mut cfg = config();
        cfg.spi_irs_range = 64;
        assert_eq!(
            cfg.validate(),
            Err(GicError::InvalidSpiRange {
                spi_base: 32,
                spi_irs_range: 64,
                spi_range: 64,
            })
        );
    }

    #[test]
    fn rejects_duplicate_iaffids() {
        let mut cfg = config();
        cfg.iaffids = vec![IaffId(0), IaffId(0)];
        assert_eq!(cfg.validate(), Err(GicError::DuplicateIaffid { iaffid: 0 }));
    }

    #[test]
    fn realize_and_reset_round_trip() {
        let irs = Irs::new(config()).expect("valid config");
        assert_eq!(irs.irsid(), 0);
        assert!(irs.iaffid_exists(0));
        assert!(!irs.iaffid_exists(1));
    }

    #[test]
    fn map_l2_istr_sets_l1_valid_bit() {
        let mut irs = Irs::new(config()).expect("valid config");
        let mut mem = TestAddressSpace::new();
        let base = 0x1000_0000u64;
        let cfg = IstConfig {
            valid: false,
            base,
            structure: IstStructure::TwoLevel,
            istsz: crate::ist::IsteSize::Bytes4,
            l2_page_size: crate::ist::L2PageSize::Size4K,
            id_bits: 14,
        };
        irs.ist_cfgr_write(Domain::NonSecure, cfg.to_cfgr_raw());
        irs.ist_baser_write(Domain::NonSecure, &mut mem, true, base);

        irs.map_l2_istr_write(Domain::NonSecure, &mut mem, 0x17);

        let attrs = irs.attrs(Domain::NonSecure);
        let l1_word = mem.read64(base, attrs).unwrap();
        assert_eq!(l1_word & 1, 1);
    }

    #[test]
    fn ist_baser_invalid_transition_flushes_cache() {
        let mut irs = Irs::new(config()).expect("valid config");
        let mut mem = TestAddressSpace::new();
        let base = 0x2000_0000u64;
        let cfg = IstConfig {
            valid: false,
            base,
            structure: IstStructure::OneLevel,
            istsz: crate::ist::IsteSize::Bytes4,
            l2_page_size: crate::ist::L2PageSize::Size4K,
            id_bits: 14,
        };
        irs.ist_cfgr_write(Domain::NonSecure, cfg.to_cfgr_raw());
        irs.ist_baser_write(Domain::NonSecure, &mut mem, true, base);

        irs.with_lpi(&mut mem, Domain::NonSecure, 5, |w| {
            w.set_pending(true);
            w.set_enable(true);
        });
        assert!(irs.lpi_cache.contains(Domain::NonSecure, 5));

        irs.ist_baser_write(Domain::NonSecure, &mut mem, false, base);
        assert!(!irs.lpi_cache.contains(Domain::NonSecure, 5));

        let attrs = irs.attrs(Domain::NonSecure);
        let word = mem.read32(base + 5 * 4, attrs).unwrap();
        assert!(L2Iste(word).pending());
    }

    #[test]
    fn cfgr_raw_preserves_reserved_bits_until_sanitized_at_valid_transition() {
        let mut irs = Irs::new(config()).expect("valid config");
        let mut mem = TestAddressSpace::new();
        // ISTSZ=3 and L2SZ=3 are reserved encodings; id_bits=5 is below
        // MIN_LPI_ID_BITS. Bit 31 is otherwise unused by the architected
        // fields: all of this must still round-trip verbatim.
        let raw = 0b11 << 3 | 0b11 << 1 | (5u32 << 8) | (1 << 31);

        irs.ist_cfgr_write(Domain::NonSecure, raw);
        assert_eq!(irs.cfgr_raw(Domain::NonSecure), raw);

        irs.ist_baser_write(Domain::NonSecure, &mut mem, true, 0x3000_0000);
        assert_eq!(
            irs.cfgr_raw(Domain::NonSecure),
            raw,
            "IRS_IST_CFGR must still read back exactly what was written, even after VALID transitions"
        );

        let cfg = irs.ist_config(Domain::NonSecure);
        assert_eq!(cfg.istsz, crate::ist::IsteSize::Bytes4, "reserved ISTSZ collapses to the default");
        assert_eq!(cfg.l2_page_size, crate::ist::L2PageSize::Size4K, "reserved L2SZ collapses to the default");
        assert_eq!(cfg.id_bits, crate::ist::MIN_LPI_ID_BITS, "id_bits clamps up to the architected minimum");
    }
}
