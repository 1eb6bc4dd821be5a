//! HPPI selection and CPU wake-line derivation, and the
//! `GICR_CDIA`/`GICR_CDNMIA` acknowledge path that depends on it.

use crate::{
    addrspace::AddressSpace,
    cpuif::{current_physical_domain, CpuEnvironment, CpuInterface, PpiHppi},
    domain::Domain,
    intid::IntType,
    irs::Irs,
    modes::HandlingMode,
    stream,
};

/// Compute the highest-priority pending interrupt visible to `cpu` in
/// `domain`.
pub fn gic_hppi(irs: &Irs, cpu: &CpuInterface, domain: Domain) -> PpiHppi {
    if !cpu.cr0[domain.index()].enable {
        return PpiHppi::IDLE;
    }

    let (irs_intid, irs_prio) = irs.hppi_for(domain, cpu.iaffid);
    let ppi = cpu.ppi_hppi[domain.index()];

    let best = if ppi.prio <= irs_prio {
        ppi
    } else {
        PpiHppi {
            intid: irs_intid,
            prio: irs_prio,
        }
    };

    if best.intid.is_none() {
        return PpiHppi::IDLE;
    }

    let running = cpu.running_priority(domain);
    let pcr = cpu.pcr[domain.index()];
    if best.prio < running && best.prio <= pcr {
        best
    } else {
        PpiHppi::IDLE
    }
}

/// The three CPU wake lines this core drives; FIQ is always deasserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WakeLines {
    pub nmi: bool,
    pub irq: bool,
    pub fiq: bool,
}

/// Derive the wake lines for `cpu`'s current physical domain.
pub fn wake_lines(irs: &Irs, cpu: &CpuInterface, physical_domain: Domain) -> WakeLines {
    let best = gic_hppi(irs, cpu, physical_domain);
    match best.intid {
        None => WakeLines::default(),
        Some(_) => {
            let superpriority = best.prio.is_superpriority();
            WakeLines {
                nmi: superpriority,
                irq: !superpriority,
                fiq: false,
            }
        }
    }
}

/// The level-triggered wake channel the CPU interface drives: implementors
/// must be callable with the device lock held.
pub trait WakeSink {
    fn set_nmi(&mut self, asserted: bool);
    fn set_irq(&mut self, asserted: bool);
    fn set_fiq(&mut self, asserted: bool);
}

/// Recompute and drive `sink` from `cpu`'s current wake state. Call this
/// after any mutation that can change HPPI selection: an SPI/LPI stream
/// command, a PPI register write, or a priority-mask/APR change.
pub fn recompute_wake(
    irs: &Irs,
    cpu: &CpuInterface,
    env: &impl CpuEnvironment,
    sink: &mut impl WakeSink,
) {
    let domain = current_physical_domain(env);
    let lines = wake_lines(irs, cpu, domain);
    sink.set_nmi(lines.nmi);
    sink.set_irq(lines.irq);
    sink.set_fiq(lines.fiq);
}

/// `GICR_CDIA` (`want_nmi = false`) / `GICR_CDNMIA` (`want_nmi = true`):
/// acknowledge the current HPPI for the CPU's current physical domain.
/// Returns 0 on no eligible HPPI, or on an NMI/non-NMI mismatch.
pub fn acknowledge<A: AddressSpace>(
    irs: &mut Irs,
    addrspace: &mut A,
    cpu: &mut CpuInterface,
    env: &impl CpuEnvironment,
    want_nmi: bool,
) -> u32 {
    let domain = current_physical_domain(env);
    let hppi = gic_hppi(irs, cpu, domain);
    let Some(intid) = hppi.intid else {
        return 0;
    };

    let is_nmi = hppi.prio.is_superpriority() && env.nmi_enabled();
    if is_nmi != want_nmi {
        return 0;
    }

    cpu.apr_set(domain, hppi.prio);

    match intid.ty {
        IntType::Ppi => {
            let index = intid.id as usize;
            let (bank, bit) = (index / 64, index % 64);
            cpu.ppi_active[bank] |= 1 << bit;
            if cpu.ppi_handling_mode(index) == HandlingMode::Edge {
                cpu.ppi_pend[bank] &= !(1 << bit);
            }
            cpu.recompute_ppi_hppi();
        }
        IntType::Lpi | IntType::Spi => {
            stream::activate(irs, addrspace, false, domain, intid.ty, intid.id);
        }
    }

    intid.encode_hppiv()
}
