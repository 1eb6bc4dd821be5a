//! Config-frame register file.
//!
//! Four logical 64 KiB MMIO windows, one per domain, all exposing the same
//! register layout at architecturally-fixed offsets. Modeled as a direct
//! `match` over the offset rather than a generated table.

use crate::{
    addrspace::AddressSpace,
    domain::Domain,
    intid::IaffId,
    log::guest_error,
    modes::TriggerMode,
};

// Offsets.
const IRS_IDR0: u64 = 0x000;
const IRS_IDR7: u64 = 0x01c;
const IRS_IIDR: u64 = 0x040;
const IRS_AIDR: u64 = 0x044;
const IRS_CR0: u64 = 0x080;
const IRS_CR1: u64 = 0x084;
const IRS_SYNCR: u64 = 0x0c0;
const IRS_SYNC_STATUSR: u64 = 0x0c4;
const IRS_SPI_SELR: u64 = 0x108;
const IRS_SPI_DOMAINR: u64 = 0x10c;
const IRS_SPI_RESAMPLER: u64 = 0x110;
const IRS_SPI_CFGR: u64 = 0x114;
const IRS_SPI_STATUSR: u64 = 0x118;
const IRS_PE_SELR: u64 = 0x140;
const IRS_PE_STATUSR: u64 = 0x144;
const IRS_IST_BASER: u64 = 0x180;
const IRS_IST_CFGR: u64 = 0x190;
const IRS_IST_STATUSR: u64 = 0x194;
const IRS_MAP_L2_ISTR: u64 = 0x1c0;
const IRS_DEVARCH: u64 = 0xffbc;
const IRS_IDREGS_BASE: u64 = 0xffd0;
const IRS_IDREGS_END: u64 = 0xfffc;

/// Implementation-defined identification constants. Exact values are not
/// load-bearing for any testable property, only their stability and the
/// per-frame `INT_DOM` field.
const IMPLEMENTER: u32 = 0x0002;
const PRODUCT_ID: u32 = 0x0001;
const REVISION: u32 = 0x0;

const DEVARCH_VALUE: u32 = 0x4770_0000;

/// `IRS_IDREGS[n]`, the CoreSight-style component ID/peripheral ID block.
const IDREGS: [u32; 13] = [
    0x0d, 0xf0, 0x05, 0xb1, 0x00, 0x00, 0x00, 0x00, 0x0d, 0x10, 0x05, 0xb1, 0x00,
];

fn idregs_index(offset: u64) -> Option<usize> {
    if (IRS_IDREGS_BASE..=IRS_IDREGS_END).contains(&offset) && offset % 4 == 0 {
        Some(((offset - IRS_IDREGS_BASE) / 4) as usize)
    } else {
        None
    }
}

/// 32-bit MMIO read from the config frame accessed through `domain`.
pub fn read32<A: AddressSpace>(irs: &crate::irs::Irs, addrspace: &A, domain: Domain, offset: u64) -> u32 {
    let _ = addrspace;
    match offset {
        IRS_IDR0..=IRS_IDR7 => idr_read(irs, domain, offset),
        IRS_IIDR => (irs.irsid() << 16) | IMPLEMENTER,
        IRS_AIDR => 0x0001_0000,
        IRS_CR0 => {
            (irs.cr0_enable(domain) as u32) | (1 << 31) // IDLE always 1
        }
        IRS_CR1 => irs.cr1(domain),
        IRS_SYNCR => 0,
        IRS_SYNC_STATUSR => 1,
        IRS_SPI_SELR => irs.spi_selr(domain),
        IRS_SPI_DOMAINR => spi_selected(irs, domain)
            .map(|s| s.domain.index() as u32)
            .unwrap_or(0),
        IRS_SPI_RESAMPLER => 0,
        IRS_SPI_CFGR => spi_selected(irs, domain).map(spi_cfgr_bits).unwrap_or(0),
        IRS_SPI_STATUSR => {
            let reachable = spi_selected(irs, domain)
                .map(|s| s.domain == domain)
                .unwrap_or(false);
            reachable as u32
        }
        IRS_PE_SELR => irs.pe_selr(domain) as u32,
        IRS_PE_STATUSR => irs.pe_statusr_valid(domain) as u32,
        IRS_IST_CFGR => irs.cfgr_raw(domain),
        IRS_IST_STATUSR => 1,
        IRS_DEVARCH => DEVARCH_VALUE,
        _ => {
            if let Some(idx) = idregs_index(offset) {
                IDREGS.get(idx).copied().unwrap_or(0)
            } else {
                guest_error!("read32: reserved IRS config-frame offset 0x{offset:x}");
                0
            }
        }
    }
}

/// 64-bit MMIO read (only `IRS_IST_BASER` is naturally 64-bit).
pub fn read64<A: AddressSpace>(irs: &crate::irs::Irs, _addrspace: &A, domain: Domain, offset: u64) -> u64 {
    match offset {
        IRS_IST_BASER => {
            let cfg = irs.ist_config(domain);
            (cfg.base & !0xfff) | (cfg.valid as u64)
        }
        _ => {
            guest_error!("read64: unsupported 64-bit IRS config-frame offset 0x{offset:x}");
            0
        }
    }
}

/// 32-bit MMIO write to the config frame accessed through `domain`. Returns
/// the IAFFID of the CPU whose wake lines may now need recomputing, if the
/// write could have changed a pending/HPPI outcome (mirrors
/// [`crate::irs::Irs::set_spi_level`]'s contract for the wire-level input).
pub fn write32<A: AddressSpace>(
    irs: &mut crate::irs::Irs,
    addrspace: &mut A,
    domain: Domain,
    offset: u64,
    value: u32,
) -> Option<IaffId> {
    match offset {
        IRS_IDR0..=IRS_IDR7 | IRS_IIDR | IRS_AIDR | IRS_SYNC_STATUSR | IRS_SPI_STATUSR
        | IRS_PE_STATUSR | IRS_IST_STATUSR | IRS_DEVARCH => {
            guest_error!("write32: IRS config-frame offset 0x{offset:x} is read-only");
            None
        }
        IRS_CR0 => {
            irs.set_cr0_enable(domain, value & 1 != 0);
            None
        }
        IRS_CR1 => {
            irs.set_cr1(domain, value);
            None
        }
        IRS_SYNCR => None,
        IRS_SPI_SELR => {
            irs.set_spi_selr(domain, value);
            None
        }
        IRS_SPI_DOMAINR => {
            if domain != Domain::El3 {
                guest_error!("write32: IRS_SPI_DOMAINR is writable only through the EL3 frame");
                return None;
            }
            let Some(new_domain) = Domain::from_index((value & 0b11) as usize) else {
                return None;
            };
            let id = irs.spi_selr(domain);
            if let Some(spi) = irs.spi_table_mut().get_mut(id) {
                spi.domain = new_domain;
            }
            None
        }
        IRS_SPI_RESAMPLER => {
            if irs.spi_table_mut().spi_sample(value) {
                irs.spi_table().get(value).map(|s| s.iaffid)
            } else {
                None
            }
        }
        IRS_SPI_CFGR => {
            let id = irs.spi_selr(domain);
            let new_tm = TriggerMode::from_bit(value & 1 != 0);
            if irs.spi_table_mut().set_trigger_mode(id, new_tm) {
                irs.spi_table().get(id).map(|s| s.iaffid)
            } else {
                None
            }
        }
        IRS_PE_SELR => {
            irs.set_pe_selr(domain, value as u16);
            None
        }
        IRS_IST_CFGR => {
            irs.ist_cfgr_write(domain, value);
            None
        }
        IRS_MAP_L2_ISTR => {
            irs.map_l2_istr_write(domain, addrspace, value);
            None
        }
        _ => {
            if idregs_index(offset).is_some() {
                guest_error!("write32: IRS_IDREGS offset 0x{offset:x} is read-only");
            } else {
                guest_error!("write32: reserved IRS config-frame offset 0x{offset:x}");
            }
            None
        }
    }
}

/// 64-bit MMIO write (`IRS_IST_BASER`).
pub fn write64<A: AddressSpace>(
    irs: &mut crate::irs::Irs,
    addrspace: &mut A,
    domain: Domain,
    offset: u64,
    value: u64,
) {
    match offset {
        IRS_IST_BASER => {
            let new_valid = value & 1 != 0;
            let base = value & !0xfff;
            irs.ist_baser_write(domain, addrspace, new_valid, base);
        }
        _ => guest_error!("write64: unsupported 64-bit IRS config-frame offset 0x{offset:x}"),
    }
}

fn idr_read(irs: &crate::irs::Irs, domain: Domain, offset: u64) -> u32 {
    match offset - IRS_IDR0 {
        0 => irs.spi_range(),
        4 => irs.spi_base(),
        8 => irs.spi_irs_range(),
        12 => (REVISION << 16) | IMPLEMENTER,
        16 => PRODUCT_ID,
        20 => 0,
        24 => {
            let mec = if domain == Domain::El3 {
                0
            } else {
                (domain == Domain::Realm) as u32
            };
            (domain.index() as u32) | (mec << 3)
        }
        28 => irs.irsid(),
        _ => 0,
    }
}

fn spi_selected(irs: &crate::irs::Irs, domain: Domain) -> Option<&crate::spi::SpiState> {
    irs.spi_table().get(irs.spi_selr(domain))
}

fn spi_cfgr_bits(spi: &crate::spi::SpiState) -> u32 {
    spi.tm.to_bit() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        addrspace::testutil::TestAddressSpace,
        domain::DomainMask,
        intid::IaffId,
        irs::{Irs, IrsConfig},
    };

    fn irs() -> Irs {
        Irs::new(IrsConfig {
            irsid: 0x55,
            spi_base: 32,
            spi_irs_range: 32,
            spi_range: 64,
            domains: DomainMask::single(Domain::NonSecure).with(Domain::El3),
            iaffids: vec![IaffId(0)],
        })
        .unwrap()
    }

    #[test]
    fn idr6_reports_the_accessed_domain() {
        let irs = irs();
        let mem = TestAddressSpace::new();
        let via_ns = read32(&irs, &mem, Domain::NonSecure, IRS_IDR0 + 24);
        let via_el3 = read32(&irs, &mem, Domain::El3, IRS_IDR0 + 24);
        assert_eq!(via_ns & 0b11, Domain::NonSecure.index() as u32);
        assert_eq!(via_el3 & 0b11, Domain::El3.index() as u32);
    }

    #[test]
    fn reserved_register_reads_zero_and_logs() {
        let irs = irs();
        let mem = TestAddressSpace::new();
        assert_eq!(read32(&irs, &mem, Domain::NonSecure, 0x200), 0);
    }

    #[test]
    fn ist_baser_round_trips_through_regs() {
        let mut irs = irs();
        let mut mem = TestAddressSpace::new();
        write32(
            &mut irs,
            &mut mem,
            Domain::NonSecure,
            IRS_IST_CFGR,
            0, // one-level, 4-byte ISTE, 4K pages, reserved id_bits field
        );
        write64(&mut irs, &mut mem, Domain::NonSecure, IRS_IST_BASER, 0x4000_0000 | 1);
        let readback = read64(&irs, &mem, Domain::NonSecure, IRS_IST_BASER);
        assert_eq!(readback & 1, 1);
        assert_eq!(readback & !0xfff, 0x4000_0000);
    }

    #[test]
    fn spi_domainr_is_writable_only_through_el3() {
        let mut irs = irs();
        let mut mem = TestAddressSpace::new();
        write32(&mut irs, &mut mem, Domain::NonSecure, IRS_SPI_SELR, 40);
        write32(&mut irs, &mut mem, Domain::NonSecure, IRS_SPI_DOMAINR, Domain::Secure.index() as u32);
        assert_ne!(irs.spi_table().get(40).unwrap().domain, Domain::Secure);

        write32(&mut irs, &mut mem, Domain::El3, IRS_SPI_SELR, 40);
        write32(&mut irs, &mut mem, Domain::El3, IRS_SPI_DOMAINR, Domain::Secure.index() as u32);
        assert_eq!(irs.spi_table().get(40).unwrap().domain, Domain::Secure);
    }

    #[test]
    fn ist_cfgr_round_trips_reserved_bits_verbatim_across_a_valid_transition() {
        let mut irs = irs();
        let mut mem = TestAddressSpace::new();
        // ISTSZ/L2SZ reserved encodings (0b11) plus a bit outside any
        // architected field: none of this may be sanitized away on read.
        let raw = 0b11 << 3 | 0b11 << 1 | (5u32 << 8) | (1 << 30);

        write32(&mut irs, &mut mem, Domain::NonSecure, IRS_IST_CFGR, raw);
        assert_eq!(read32(&irs, &mem, Domain::NonSecure, IRS_IST_CFGR), raw);

        write64(&mut irs, &mut mem, Domain::NonSecure, IRS_IST_BASER, 0x5000_0000 | 1);
        assert_eq!(
            read32(&irs, &mem, Domain::NonSecure, IRS_IST_CFGR),
            raw,
            "IRS_IST_CFGR must read back verbatim even once IST_BASER.VALID is set"
        );
    }

    #[test]
    fn spi_resampler_and_cfgr_writes_report_the_target_iaffid_when_pending_changes() {
        let mut irs = irs();
        let mut mem = TestAddressSpace::new();

        let resampled = write32(&mut irs, &mut mem, Domain::NonSecure, IRS_SPI_RESAMPLER, 40);
        assert_eq!(resampled, Some(irs.spi_table().get(40).unwrap().iaffid));

        // Resampling an out-of-range SPI can't affect any CPU's pending
        // state, so it must report no target.
        let out_of_range = write32(&mut irs, &mut mem, Domain::NonSecure, IRS_SPI_RESAMPLER, 9999);
        assert_eq!(out_of_range, None);

        write32(&mut irs, &mut mem, Domain::NonSecure, IRS_SPI_SELR, 40);
        let cfgr_changed = write32(&mut irs, &mut mem, Domain::NonSecure, IRS_SPI_CFGR, 0); // tm=Edge
        assert!(cfgr_changed.is_some());
    }
}
