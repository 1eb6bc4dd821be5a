//! `GIC_CD*` per-CPU system-register command dispatch.
//!
//! `ICC_CDPRI_EL1`/`ICC_CDDIS_EL1`/`ICC_CDEN_EL1`/`ICC_CDAFF_EL1`/
//! `ICC_CDPEND_EL1`/`ICC_CDHM_EL1`/`ICC_CDRCFG_EL1`/`ICC_CDEOI_EL1`/
//! `ICC_CDDI_EL1` are the system registers a CPU writes to reach the stream
//! protocol directly, rather than through the IRS config frame. Each is
//! modeled as a 64-bit value: the low 32 bits are the target INTID, packed
//! exactly like `ICC_ICSR_EL1` (see [`crate::intid::IntId::encode`]); the
//! high 32 bits carry the command's payload. A reserved INTID type bits
//! pattern makes the write a no-op, same as every other decode failure in
//! this crate.

use crate::{
    addrspace::AddressSpace,
    cpuif::{current_physical_domain, CpuEnvironment, CpuInterface},
    hppi::{self, WakeSink},
    intid::{IaffId, IntId},
    irs::Irs,
    modes::{HandlingMode, RoutingMode},
    prio::Priority,
    stream,
};

fn decode_target(value: u64) -> Option<IntId> {
    IntId::decode(value as u32)
}

fn payload(value: u64) -> u32 {
    (value >> 32) as u32
}

/// `GIC_CDEN`: enable the targeted interrupt.
pub fn cden<A: AddressSpace>(
    irs: &mut Irs,
    addrspace: &mut A,
    env: &impl CpuEnvironment,
    value: u64,
) -> Option<IaffId> {
    let intid = decode_target(value)?;
    let domain = current_physical_domain(env);
    stream::set_enabled(irs, addrspace, false, domain, intid.ty, intid.id, true)
}

/// `GIC_CDDIS`: disable the targeted interrupt.
pub fn cddis<A: AddressSpace>(
    irs: &mut Irs,
    addrspace: &mut A,
    env: &impl CpuEnvironment,
    value: u64,
) -> Option<IaffId> {
    let intid = decode_target(value)?;
    let domain = current_physical_domain(env);
    stream::set_enabled(irs, addrspace, false, domain, intid.ty, intid.id, false)
}

/// `GIC_CDPRI`: set the targeted interrupt's priority (bits 4:0 of the high
/// word).
pub fn cdpri<A: AddressSpace>(
    irs: &mut Irs,
    addrspace: &mut A,
    env: &impl CpuEnvironment,
    value: u64,
) -> Option<IaffId> {
    let intid = decode_target(value)?;
    let domain = current_physical_domain(env);
    let prio = Priority::mask((payload(value) & 0x1f) as u8);
    stream::set_priority(irs, addrspace, false, domain, intid.ty, intid.id, prio)
}

/// `GIC_CDPEND`: set the targeted interrupt's pending state (bit 0 of the
/// high word).
pub fn cdpend<A: AddressSpace>(
    irs: &mut Irs,
    addrspace: &mut A,
    env: &impl CpuEnvironment,
    value: u64,
) -> Option<IaffId> {
    let intid = decode_target(value)?;
    let domain = current_physical_domain(env);
    let pending = payload(value) & 1 != 0;
    stream::set_pending(irs, addrspace, false, domain, intid.ty, intid.id, pending)
}

/// `GIC_CDHM`: set the targeted interrupt's handling mode (bit 0 of the
/// high word).
pub fn cdhm<A: AddressSpace>(
    irs: &mut Irs,
    addrspace: &mut A,
    env: &impl CpuEnvironment,
    value: u64,
) -> Option<IaffId> {
    let intid = decode_target(value)?;
    let domain = current_physical_domain(env);
    let hm = HandlingMode::from_bit(payload(value) & 1 != 0);
    stream::set_handling(irs, addrspace, false, domain, intid.ty, intid.id, hm)
}

/// `GIC_CDAFF`: retarget the interrupt. High word carries the routing mode
/// in bit 0 and the IAFFID in bits 16:1.
pub fn cdaff<A: AddressSpace>(
    irs: &mut Irs,
    addrspace: &mut A,
    env: &impl CpuEnvironment,
    value: u64,
) -> Option<IaffId> {
    let intid = decode_target(value)?;
    let domain = current_physical_domain(env);
    let bits = payload(value);
    let irm = RoutingMode::from_bit(bits & 1 != 0);
    let iaffid = IaffId(((bits >> 1) & 0xffff) as u16);
    stream::set_target(irs, addrspace, false, domain, intid.ty, intid.id, iaffid, irm)
}

/// `GIC_CDRCFG`: read back the targeted interrupt's config, repacked as an
/// `ICC_ICSR_EL1`-shaped word (see [`stream::request_config`]).
pub fn cdrcfg<A: AddressSpace>(
    irs: &mut Irs,
    addrspace: &A,
    env: &impl CpuEnvironment,
    value: u64,
) -> u32 {
    let Some(intid) = decode_target(value) else {
        return stream::ICSR_F_BIT;
    };
    let domain = current_physical_domain(env);
    stream::request_config(irs, addrspace, false, domain, intid.ty, intid.id)
}

/// `GIC_CDDI`: deactivate the targeted interrupt.
pub fn cddi<A: AddressSpace>(
    irs: &mut Irs,
    addrspace: &mut A,
    env: &impl CpuEnvironment,
    value: u64,
) -> Option<IaffId> {
    let intid = decode_target(value)?;
    let domain = current_physical_domain(env);
    stream::deactivate(irs, addrspace, false, domain, intid.ty, intid.id)
}

/// `GIC_CDEOI`: priority-drop the running CPU's current physical domain and
/// recompute its own wake lines (the only `GIC_CD*` command that always
/// targets the issuing CPU itself, so it needs no target IAFFID lookup).
pub fn cdeoi(irs: &Irs, cpu: &mut CpuInterface, env: &impl CpuEnvironment, sink: &mut impl WakeSink) {
    let domain = current_physical_domain(env);
    cpu.priority_drop(domain);
    hppi::recompute_wake(irs, cpu, env, sink);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        addrspace::testutil::TestAddressSpace,
        domain::{Domain, DomainMask},
        intid::IntType,
        irs::IrsConfig,
    };

    fn irs_with_spis() -> Irs {
        Irs::new(IrsConfig {
            irsid: 0,
            spi_base: 32,
            spi_irs_range: 32,
            spi_range: 64,
            domains: DomainMask::single(Domain::NonSecure),
            iaffids: vec![IaffId(0)],
        })
        .unwrap()
    }

    fn spi_word(id: u32, payload_bits: u32) -> u64 {
        (IntId::new(IntType::Spi, id).encode() as u64) | ((payload_bits as u64) << 32)
    }

    #[test]
    fn cden_and_cddis_round_trip_through_the_enable_bit() {
        let mut irs = irs_with_spis();
        let mut mem = TestAddressSpace::new();
        let env = Domain::NonSecure;

        assert!(cden(&mut irs, &mut mem, &env, spi_word(40, 0)).is_some());
        assert!(irs.spi_table().get(40).unwrap().enabled);

        assert!(cddis(&mut irs, &mut mem, &env, spi_word(40, 0)).is_some());
        assert!(!irs.spi_table().get(40).unwrap().enabled);
    }

    #[test]
    fn cdpri_masks_the_priority_payload_to_five_bits() {
        let mut irs = irs_with_spis();
        let mut mem = TestAddressSpace::new();
        let env = Domain::NonSecure;

        cdpri(&mut irs, &mut mem, &env, spi_word(40, 0xff));
        assert_eq!(irs.spi_table().get(40).unwrap().priority.get(), 0x1f);
    }

    #[test]
    fn cdaff_decodes_iaffid_and_routing_mode_from_the_high_word() {
        let mut irs = irs_with_spis();
        let mut mem = TestAddressSpace::new();
        let env = Domain::NonSecure;

        // 1-of-N requested, but downgraded to Targeted (no 1-of-N support).
        cdaff(&mut irs, &mut mem, &env, spi_word(40, (7 << 1) | 1));
        let spi = irs.spi_table().get(40).unwrap();
        assert_eq!(spi.iaffid, IaffId(7));
        assert_eq!(spi.irm, RoutingMode::Targeted);
    }

    #[test]
    fn cdrcfg_reports_the_failure_bit_for_an_unreachable_intid() {
        let mut irs = irs_with_spis();
        let mem = TestAddressSpace::new();
        let env = Domain::NonSecure;

        let word = cdrcfg(&mut irs, &mem, &env, spi_word(9999, 0));
        assert_eq!(word, stream::ICSR_F_BIT);
    }

    #[test]
    fn a_reserved_intid_type_makes_every_command_a_no_op() {
        let mut irs = irs_with_spis();
        let mut mem = TestAddressSpace::new();
        let env = Domain::NonSecure;
        let garbage = 0u64; // type bits 0 is not a valid IntType

        assert_eq!(cden(&mut irs, &mut mem, &env, garbage), None);
        assert_eq!(cddis(&mut irs, &mut mem, &env, garbage), None);
        assert_eq!(cdpri(&mut irs, &mut mem, &env, garbage), None);
    }

    #[test]
    fn cdeoi_drops_the_running_priority_and_recomputes_wake_lines() {
        let mut irs = irs_with_spis();
        let mut cpu = CpuInterface::new(IaffId(0));
        cpu.cr0[Domain::NonSecure.index()].write(true);
        cpu.pcr[Domain::NonSecure.index()] = Priority::mask(0x1f);
        cpu.apr_set(Domain::NonSecure, Priority::mask(4));
        cpu.apr_set(Domain::NonSecure, Priority::mask(2));

        struct RecordingSink {
            irq: bool,
        }
        impl WakeSink for RecordingSink {
            fn set_nmi(&mut self, _asserted: bool) {}
            fn set_irq(&mut self, asserted: bool) {
                self.irq = asserted;
            }
            fn set_fiq(&mut self, _asserted: bool) {}
        }
        let mut sink = RecordingSink { irq: false };
        let env = Domain::NonSecure;

        cdeoi(&irs, &mut cpu, &env, &mut sink);
        assert_eq!(cpu.running_priority(Domain::NonSecure).get(), 4);

        cdeoi(&irs, &mut cpu, &env, &mut sink);
        assert!(cpu.running_priority(Domain::NonSecure).is_idle());
    }
}
