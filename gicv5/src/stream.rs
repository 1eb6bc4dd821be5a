//! Stream protocol: the command set the CPU interface issues to the IRS,
//! collapsed to synchronous function calls under the single big lock.
//!
//! Every command returns the IAFFID of the interrupt it touched, if any, so
//! the caller can recompute that CPU's wake lines (see [`crate::hppi`]).
//! Keeping that call-back out of the IRS itself is what lets the IRS stay
//! free of a CPU-interface back-edge.

use crate::{
    addrspace::AddressSpace,
    domain::Domain,
    intid::{IaffId, IntType},
    irs::Irs,
    log::guest_error,
    modes::{HandlingMode, RoutingMode},
    prio::Priority,
};

/// Bit reported by [`request_config`] when the interrupt could not be read
/// back (out of range, wrong domain, or a guest-memory failure).
pub const ICSR_F_BIT: u32 = 1 << 31;

fn virtual_unsupported(op: &str, virtual_: bool) -> bool {
    if virtual_ {
        guest_error!("{op}: virtual interrupts are not supported by this core");
    }
    virtual_
}

pub fn set_priority<A: AddressSpace>(
    irs: &mut Irs,
    addrspace: &mut A,
    virtual_: bool,
    domain: Domain,
    ty: IntType,
    id: u32,
    prio: Priority,
) -> Option<IaffId> {
    if virtual_unsupported("set_priority", virtual_) {
        return None;
    }
    let prio = Priority::mask(prio.get());
    match ty {
        IntType::Spi => match irs.spi_table_mut().get_mut(id) {
            Some(spi) if spi.domain == domain => {
                spi.priority = prio;
                Some(spi.iaffid)
            }
            _ => {
                guest_error!("set_priority: SPI {id} unreachable from domain {domain}");
                None
            }
        },
        IntType::Lpi => irs.with_lpi(addrspace, domain, id, |w| w.set_priority(prio)),
        IntType::Ppi => {
            guest_error!("set_priority: PPI state is owned by the CPU interface, not the IRS");
            None
        }
    }
}

pub fn set_enabled<A: AddressSpace>(
    irs: &mut Irs,
    addrspace: &mut A,
    virtual_: bool,
    domain: Domain,
    ty: IntType,
    id: u32,
    enabled: bool,
) -> Option<IaffId> {
    if virtual_unsupported("set_enabled", virtual_) {
        return None;
    }
    match ty {
        IntType::Spi => match irs.spi_table_mut().get_mut(id) {
            Some(spi) if spi.domain == domain => {
                spi.enabled = enabled;
                Some(spi.iaffid)
            }
            _ => {
                guest_error!("set_enabled: SPI {id} unreachable from domain {domain}");
                None
            }
        },
        IntType::Lpi => irs.with_lpi(addrspace, domain, id, |w| w.set_enable(enabled)),
        IntType::Ppi => {
            guest_error!("set_enabled: PPI state is owned by the CPU interface, not the IRS");
            None
        }
    }
}

pub fn set_pending<A: AddressSpace>(
    irs: &mut Irs,
    addrspace: &mut A,
    virtual_: bool,
    domain: Domain,
    ty: IntType,
    id: u32,
    pending: bool,
) -> Option<IaffId> {
    if virtual_unsupported("set_pending", virtual_) {
        return None;
    }
    match ty {
        IntType::Spi => match irs.spi_table_mut().get_mut(id) {
            Some(spi) if spi.domain == domain => {
                spi.pending = pending;
                Some(spi.iaffid)
            }
            _ => {
                guest_error!("set_pending: SPI {id} unreachable from domain {domain}");
                None
            }
        },
        IntType::Lpi => irs.with_lpi(addrspace, domain, id, |w| w.set_pending(pending)),
        IntType::Ppi => {
            guest_error!("set_pending: PPI state is owned by the CPU interface, not the IRS");
            None
        }
    }
}

pub fn set_handling<A: AddressSpace>(
    irs: &mut Irs,
    addrspace: &mut A,
    virtual_: bool,
    domain: Domain,
    ty: IntType,
    id: u32,
    hm: HandlingMode,
) -> Option<IaffId> {
    if virtual_unsupported("set_handling", virtual_) {
        return None;
    }
    match ty {
        IntType::Spi => match irs.spi_table_mut().get_mut(id) {
            Some(spi) if spi.domain == domain => {
                spi.hm = hm;
                Some(spi.iaffid)
            }
            _ => {
                guest_error!("set_handling: SPI {id} unreachable from domain {domain}");
                None
            }
        },
        IntType::Lpi => irs.with_lpi(addrspace, domain, id, |w| w.set_hm(hm)),
        IntType::Ppi => {
            guest_error!("set_handling: PPI state is owned by the CPU interface, not the IRS");
            None
        }
    }
}

pub fn set_target<A: AddressSpace>(
    irs: &mut Irs,
    addrspace: &mut A,
    virtual_: bool,
    domain: Domain,
    ty: IntType,
    id: u32,
    iaffid: IaffId,
    irm: RoutingMode,
) -> Option<IaffId> {
    if virtual_unsupported("set_target", virtual_) {
        return None;
    }
    let irm = if irm == RoutingMode::OneOfN {
        guest_error!("set_target: 1-of-N routing is not implemented, downgrading to Targeted");
        RoutingMode::Targeted
    } else {
        irm
    };
    match ty {
        IntType::Spi => match irs.spi_table_mut().get_mut(id) {
            Some(spi) if spi.domain == domain => {
                spi.iaffid = iaffid;
                spi.irm = irm;
                Some(iaffid)
            }
            _ => {
                guest_error!("set_target: SPI {id} unreachable from domain {domain}");
                None
            }
        },
        IntType::Lpi => irs.with_lpi(addrspace, domain, id, |w| {
            w.set_iaffid(iaffid);
            w.set_irm(irm);
        }),
        IntType::Ppi => {
            guest_error!("set_target: PPI routing is fixed to the owning CPU");
            None
        }
    }
}

pub fn activate<A: AddressSpace>(
    irs: &mut Irs,
    addrspace: &mut A,
    virtual_: bool,
    domain: Domain,
    ty: IntType,
    id: u32,
) -> Option<IaffId> {
    if virtual_unsupported("activate", virtual_) {
        return None;
    }
    match ty {
        IntType::Spi => match irs.spi_table_mut().get_mut(id) {
            Some(spi) if spi.domain == domain => {
                spi.active = true;
                if spi.hm == HandlingMode::Edge {
                    spi.pending = false;
                }
                Some(spi.iaffid)
            }
            _ => {
                guest_error!("activate: SPI {id} unreachable from domain {domain}");
                None
            }
        },
        IntType::Lpi => irs.with_lpi(addrspace, domain, id, |w| {
            w.set_active(true);
            if w.hm() == HandlingMode::Edge {
                w.set_pending(false);
            }
        }),
        IntType::Ppi => {
            guest_error!("activate: PPI activation is handled by the CPU interface");
            None
        }
    }
}

pub fn deactivate<A: AddressSpace>(
    irs: &mut Irs,
    addrspace: &mut A,
    virtual_: bool,
    domain: Domain,
    ty: IntType,
    id: u32,
) -> Option<IaffId> {
    if virtual_unsupported("deactivate", virtual_) {
        return None;
    }
    match ty {
        IntType::Spi => match irs.spi_table_mut().get_mut(id) {
            Some(spi) if spi.domain == domain => {
                spi.active = false;
                Some(spi.iaffid)
            }
            _ => {
                guest_error!("deactivate: SPI {id} unreachable from domain {domain}");
                None
            }
        },
        IntType::Lpi => irs.with_lpi(addrspace, domain, id, |w| w.set_active(false)),
        IntType::Ppi => {
            guest_error!("deactivate: PPI deactivation is handled by the CPU interface");
            None
        }
    }
}

/// `request_config`: reads back the ISTE/SPI record, repacked into an
/// `ICC_ICSR_EL1`-shaped word. A failure to reach the interrupt sets only
/// [`ICSR_F_BIT`]. The packed layout reuses the L2 ISTE bit positions;
/// IAFFID is truncated to its low 15 bits to leave room for `F` at bit 31.
pub fn request_config<A: AddressSpace>(
    irs: &mut Irs,
    addrspace: &A,
    virtual_: bool,
    domain: Domain,
    ty: IntType,
    id: u32,
) -> u32 {
    if virtual_unsupported("request_config", virtual_) {
        return ICSR_F_BIT;
    }
    match ty {
        IntType::Spi => match irs.spi_table().get(id) {
            Some(spi) if spi.domain == domain => {
                pack_icsr(spi.pending, spi.active, spi.hm, spi.enabled, spi.irm, spi.priority, spi.iaffid)
            }
            _ => {
                guest_error!("request_config: SPI {id} unreachable from domain {domain}");
                ICSR_F_BIT
            }
        },
        IntType::Lpi => match irs.peek_lpi(addrspace, domain, id) {
            Some(word) => pack_icsr(
                word.pending(),
                word.active(),
                word.hm(),
                word.enable(),
                word.irm(),
                word.priority(),
                word.iaffid(),
            ),
            None => ICSR_F_BIT,
        },
        IntType::Ppi => {
            guest_error!("request_config: PPI config is read directly from the CPU interface");
            ICSR_F_BIT
        }
    }
}

fn pack_icsr(
    pending: bool,
    active: bool,
    hm: HandlingMode,
    enable: bool,
    irm: RoutingMode,
    priority: Priority,
    iaffid: IaffId,
) -> u32 {
    let mut word = 0u32;
    word |= pending as u32;
    word |= (active as u32) << 1;
    word |= (hm.to_bit() as u32) << 2;
    word |= (enable as u32) << 3;
    word |= (irm.to_bit() as u32) << 4;
    word |= ((priority.get() & 0x1f) as u32) << 11;
    word |= ((iaffid.0 & 0x7fff) as u32) << 16;
    word
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        addrspace::testutil::TestAddressSpace,
        domain::DomainMask,
        ist::{IsteSize, IstConfig, IstStructure, L2PageSize},
    };

    fn irs_with_lpi_domain() -> (Irs, TestAddressSpace) {
        let irs = Irs::new(crate::irs::IrsConfig {
            irsid: 0,
            spi_base: 32,
            spi_irs_range: 32,
            spi_range: 64,
            domains: DomainMask::single(Domain::NonSecure),
            iaffids: vec![IaffId(0)],
        })
        .unwrap();
        let mem = TestAddressSpace::new();
        let mut irs = irs;
        let cfg = IstConfig {
            valid: false,
            base: 0x4000_0000,
            structure: IstStructure::OneLevel,
            istsz: IsteSize::Bytes4,
            l2_page_size: L2PageSize::Size4K,
            id_bits: 14,
        };
        irs.ist_cfgr_write(Domain::NonSecure, cfg.to_cfgr_raw());
        (irs, mem)
    }

    #[test]
    fn set_enabled_writes_through_for_spi() {
        let (mut irs, mut mem) = irs_with_lpi_domain();
        set_enabled(&mut irs, &mut mem, false, Domain::NonSecure, IntType::Spi, 40, false);
        assert!(!irs.spi_table().get(40).unwrap().enabled);
        set_enabled(&mut irs, &mut mem, false, Domain::NonSecure, IntType::Spi, 40, true);
        assert!(irs.spi_table().get(40).unwrap().enabled);
    }

    #[test]
    fn set_handling_returns_after_logging_unreachable_spi() {
        let (mut irs, mut mem) = irs_with_lpi_domain();
        let result = set_handling(
            &mut irs,
            &mut mem,
            false,
            Domain::NonSecure,
            IntType::Spi,
            9999,
            HandlingMode::Edge,
        );
        assert_eq!(result, None);
    }

    #[test]
    fn virtual_commands_are_rejected() {
        let (mut irs, mut mem) = irs_with_lpi_domain();
        let result = set_priority(
            &mut irs,
            &mut mem,
            true,
            Domain::NonSecure,
            IntType::Spi,
            40,
            Priority::mask(1),
        );
        assert_eq!(result, None);
    }

    #[test]
    fn one_of_n_routing_is_downgraded_to_targeted() {
        let (mut irs, mut mem) = irs_with_lpi_domain();
        set_target(
            &mut irs,
            &mut mem,
            false,
            Domain::NonSecure,
            IntType::Spi,
            40,
            IaffId(2),
            RoutingMode::OneOfN,
        );
        assert_eq!(irs.spi_table().get(40).unwrap().irm, RoutingMode::Targeted);
    }

    #[test]
    fn activate_on_edge_lpi_clears_pending() {
        let (mut irs, mut mem) = irs_with_lpi_domain();
        irs.ist_baser_write(Domain::NonSecure, &mut mem, true, 0x4000_0000);
        set_pending(&mut irs, &mut mem, false, Domain::NonSecure, IntType::Lpi, 7, true);
        set_handling(&mut irs, &mut mem, false, Domain::NonSecure, IntType::Lpi, 7, HandlingMode::Edge);
        activate(&mut irs, &mut mem, false, Domain::NonSecure, IntType::Lpi, 7);
        let word = irs.peek_lpi(&mem, Domain::NonSecure, 7).unwrap();
        assert!(word.active());
        assert!(!word.pending());
    }

    #[test]
    fn request_config_reports_failure_bit_only() {
        let (mut irs, mem) = irs_with_lpi_domain();
        let word = request_config(&mut irs, &mem, false, Domain::NonSecure, IntType::Spi, 9999);
        assert_eq!(word, ICSR_F_BIT);
    }

    #[test]
    fn request_config_round_trips_priority() {
        let (mut irs, mut mem) = irs_with_lpi_domain();
        set_priority(
            &mut irs,
            &mut mem,
            false,
            Domain::NonSecure,
            IntType::Spi,
            40,
            Priority::mask(9),
        );
        let word = request_config(&mut irs, &mem, false, Domain::NonSecure, IntType::Spi, 40);
        assert_eq!((word >> 11) & 0x1f, 9);
        assert_eq!(word & ICSR_F_BIT, 0);
    }
}
