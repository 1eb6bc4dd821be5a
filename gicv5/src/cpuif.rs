//! Per-CPU interface: PPI state, banked system registers, and
//! PPI-HPPI computation.

use crate::{
    domain::{Domain, DOMAIN_COUNT},
    intid::{IaffId, IntId, IntType},
    modes::HandlingMode,
    prio::Priority,
};

/// Total number of PPIs: two 64-bit banks.
pub const PPI_COUNT: usize = 128;

/// PPI index of the one architected edge-triggered PPI; every other PPI
/// resets to fixed handling mode Level.
pub const EDGE_PPI_INDEX: usize = 3;

/// External collaborator query the CPU interface needs from its owning CPU
/// model: which domain a register access or acknowledge currently targets,
/// and whether NMI delivery is enabled at the current exception level.
pub trait CpuEnvironment {
    /// True when the CPU is currently executing at EL3.
    fn at_el3(&self) -> bool;
    /// The domain matching the CPU's current security state, ignoring
    /// whether it is at EL3 (used to bank ICC_APR/CR0/PCR).
    fn security_state(&self) -> Domain;
    /// `SCTLR_ELx.NMI` for the current exception level.
    fn nmi_enabled(&self) -> bool;
}

impl CpuEnvironment for Domain {
    fn at_el3(&self) -> bool {
        *self == Domain::El3
    }
    fn security_state(&self) -> Domain {
        if *self == Domain::El3 {
            Domain::NonSecure
        } else {
            *self
        }
    }
    fn nmi_enabled(&self) -> bool {
        true
    }
}

/// The physical domain a stream command or acknowledge targets: EL3 if the
/// CPU is at EL3, else the domain matching its current security state.
pub fn current_physical_domain(env: &impl CpuEnvironment) -> Domain {
    if env.at_el3() {
        Domain::El3
    } else {
        env.security_state()
    }
}

/// The domain used to index banked ICC_APR/CR0/PCR instances:
/// always the security state below EL3, regardless of whether the CPU is
/// currently executing at EL3.
pub fn current_logical_domain(env: &impl CpuEnvironment) -> Domain {
    env.security_state()
}

/// `ICC_CR0_EL1`: per-domain enable plus architecturally-forced link bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IccCr0 {
    pub enable: bool,
    pub link: bool,
    pub link_idle: bool,
}

impl IccCr0 {
    /// Apply a guest write: only `EN` is writable; `LINK`/`LINK_IDLE` are
    /// always forced set, and `IPPT`/`PID` are ignored (no EL3 support).
    pub fn write(&mut self, enable: bool) {
        self.enable = enable;
        self.link = true;
        self.link_idle = true;
    }
}

/// Cached best-pending PPI for a domain, recomputed on every PPI state
/// mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PpiHppi {
    pub intid: Option<IntId>,
    pub prio: Priority,
}

impl PpiHppi {
    pub const IDLE: PpiHppi = PpiHppi {
        intid: None,
        prio: Priority::IDLE,
    };
}

impl Default for PpiHppi {
    fn default() -> Self {
        Self::IDLE
    }
}

/// Per-CPU register file and PPI state.
pub struct CpuInterface {
    pub iaffid: IaffId,

    pub cr0: [IccCr0; DOMAIN_COUNT],
    pub pcr: [Priority; DOMAIN_COUNT],
    pub apr: [u32; DOMAIN_COUNT],
    pub icsr_el1: u32,

    pub ppi_enable: [u64; 2],
    pub ppi_pend: [u64; 2],
    pub ppi_active: [u64; 2],
    /// Fixed per-PPI handling mode, set at construction/reset and never
    /// mutated by a register write: architected PPI HM values are fixed by
    /// the platform, not software-configurable in this core.
    ppi_hm_fixed: [HandlingMode; PPI_COUNT],
    pub ppi_priority: [u8; PPI_COUNT],

    pub ppi_hppi: [PpiHppi; DOMAIN_COUNT],
}

impl CpuInterface {
    pub fn new(iaffid: IaffId) -> CpuInterface {
        let mut iface = CpuInterface {
            iaffid,
            cr0: Default::default(),
            pcr: [Priority::mask(0); DOMAIN_COUNT],
            apr: [0; DOMAIN_COUNT],
            icsr_el1: 0,
            ppi_enable: [0; 2],
            ppi_pend: [0; 2],
            ppi_active: [0; 2],
            ppi_hm_fixed: [HandlingMode::Level; PPI_COUNT],
            ppi_priority: [0; PPI_COUNT],
            ppi_hppi: [PpiHppi::IDLE; DOMAIN_COUNT],
        };
        iface.ppi_hm_fixed[EDGE_PPI_INDEX] = HandlingMode::Edge;
        iface
    }

    /// Power-on / architectural reset.
    pub fn reset(&mut self) {
        let iaffid = self.iaffid;
        *self = CpuInterface::new(iaffid);
    }

    pub fn ppi_handling_mode(&self, ppi_index: usize) -> HandlingMode {
        self.ppi_hm_fixed[ppi_index]
    }

    /// Recompute the cached PPI-HPPI for every domain.
    ///
    /// Until EL3/domain-aware PPI routing is added, every PPI is treated as
    /// belonging to the NonSecure domain; other domains report idle.
    pub fn recompute_ppi_hppi(&mut self) {
        let mut best: Option<(usize, Priority)> = None;
        for bank in 0..2 {
            let en_pend_nact =
                self.ppi_enable[bank] & self.ppi_pend[bank] & !self.ppi_active[bank];
            for bit in 0..64u32 {
                if en_pend_nact & (1 << bit) == 0 {
                    continue;
                }
                let index = bank * 64 + bit as usize;
                let prio = Priority::mask(self.ppi_priority[index]);
                match best {
                    Some((_, best_prio)) if prio >= best_prio => {}
                    _ => best = Some((index, prio)),
                }
            }
        }

        for domain in 0..DOMAIN_COUNT {
            self.ppi_hppi[domain] = if domain == Domain::NonSecure.index() {
                match best {
                    Some((index, prio)) => PpiHppi {
                        intid: Some(IntId::new(IntType::Ppi, index as u32)),
                        prio,
                    },
                    None => PpiHppi::IDLE,
                }
            } else {
                PpiHppi::IDLE
            };
        }
    }

    /// `ICC_PPI_CACTIVER{0,1}_EL1` write: clear the given active bits.
    pub fn cactiver_write(&mut self, bank: usize, clear_mask: u64) {
        self.ppi_active[bank] &= !clear_mask;
        self.recompute_ppi_hppi();
    }

    /// `ICC_PPI_SACTIVER{0,1}_EL1` write: set the given active bits.
    pub fn sactiver_write(&mut self, bank: usize, set_mask: u64) {
        self.ppi_active[bank] |= set_mask;
        self.recompute_ppi_hppi();
    }

    /// `ICC_PPI_CPENDR{0,1}_EL1` write: clear pend bits, except for PPIs
    /// whose handling mode is fixed Level, which are read-only.
    pub fn cpendr_write(&mut self, bank: usize, clear_mask: u64) {
        let writable_mask = self.writable_pend_mask(bank);
        self.ppi_pend[bank] &= !(clear_mask & writable_mask);
        self.recompute_ppi_hppi();
    }

    /// `ICC_PPI_SPENDR{0,1}_EL1` write: set pend bits under the same mask.
    pub fn spendr_write(&mut self, bank: usize, set_mask: u64) {
        let writable_mask = self.writable_pend_mask(bank);
        self.ppi_pend[bank] |= set_mask & writable_mask;
        self.recompute_ppi_hppi();
    }

    fn writable_pend_mask(&self, bank: usize) -> u64 {
        let mut mask = 0u64;
        for bit in 0..64usize {
            let index = bank * 64 + bit;
            if self.ppi_hm_fixed[index] != HandlingMode::Level {
                mask |= 1 << bit;
            }
        }
        mask
    }

    /// `ICC_PPI_ENABLER{0,1}_EL1` write: writes straight through.
    pub fn enabler_write(&mut self, bank: usize, value: u64) {
        self.ppi_enable[bank] = value;
        self.recompute_ppi_hppi();
    }

    /// `ICC_PPI_PRIORITYR<n>_EL1` write: one register holds four priority
    /// bytes; each write triggers a PPI-HPPI recompute.
    pub fn priorityr_write(&mut self, n: usize, value: u32) {
        let base = n * 4;
        for (i, byte) in value.to_le_bytes().into_iter().enumerate() {
            if let Some(slot) = self.ppi_priority.get_mut(base + i) {
                *slot = byte;
            }
        }
        self.recompute_ppi_hppi();
    }

    /// `ICC_HAPR_EL1`: the current running priority for `domain` — the
    /// index of the lowest set bit in `apr[domain]`, or `PRIO_IDLE`.
    pub fn running_priority(&self, domain: Domain) -> Priority {
        running_priority_of(self.apr[domain.index()])
    }

    /// `GIC_CDEOI` ("priority drop"): clear the lowest set APR bit for
    /// `domain`.
    pub fn priority_drop(&mut self, domain: Domain) {
        let apr = &mut self.apr[domain.index()];
        if *apr != 0 {
            *apr &= *apr - 1; // clear lowest set bit
        }
    }

    /// Set the APR bit for the given priority, marking it active on the
    /// priority stack (used on acknowledge).
    pub fn apr_set(&mut self, domain: Domain, prio: Priority) {
        if !prio.is_idle() {
            self.apr[domain.index()] |= 1 << prio.get();
        }
    }
}

fn running_priority_of(apr: u32) -> Priority {
    if apr == 0 {
        Priority::IDLE
    } else {
        Priority::raw(apr.trailing_zeros() as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cpu() -> CpuInterface {
        CpuInterface::new(IaffId(0))
    }

    #[test]
    fn ppi_three_resets_to_fixed_edge_handling_mode() {
        let c = cpu();
        assert_eq!(c.ppi_handling_mode(EDGE_PPI_INDEX), HandlingMode::Edge);
        assert_eq!(c.ppi_handling_mode(0), HandlingMode::Level);
    }

    #[test]
    fn cpendr_is_read_only_for_fixed_level_ppis() {
        let mut c = cpu();
        c.ppi_pend[0] = 0b101; // PPI 0 and PPI 2 pending
        c.cpendr_write(0, 0b101);
        // PPI 0 and 2 are fixed-Level: the clear is ignored.
        assert_eq!(c.ppi_pend[0], 0b101);
    }

    #[test]
    fn cpendr_clears_edge_ppi() {
        let mut c = cpu();
        c.ppi_pend[0] = 1 << EDGE_PPI_INDEX;
        c.cpendr_write(0, 1 << EDGE_PPI_INDEX);
        assert_eq!(c.ppi_pend[0], 0);
    }

    #[test]
    fn ppi_hppi_picks_minimum_priority_among_eligible_bits() {
        let mut c = cpu();
        c.ppi_enable[0] = 0b11;
        c.ppi_pend[0] = 0b11;
        c.ppi_priority = [0xff; PPI_COUNT];
        c.ppi_priority[0] = 10;
        c.ppi_priority[1] = 5;
        c.recompute_ppi_hppi();
        let best = c.ppi_hppi[Domain::NonSecure.index()];
        assert_eq!(best.prio.get(), 5);
        assert_eq!(best.intid, Some(IntId::new(IntType::Ppi, 1)));
    }

    #[test]
    fn active_ppis_are_excluded_from_hppi() {
        let mut c = cpu();
        c.ppi_enable[0] = 1;
        c.ppi_pend[0] = 1;
        c.ppi_active[0] = 1;
        c.recompute_ppi_hppi();
        assert!(c.ppi_hppi[Domain::NonSecure.index()].intid.is_none());
    }

    #[test]
    fn running_priority_tracks_lowest_apr_bit() {
        let mut c = cpu();
        c.apr_set(Domain::NonSecure, Priority::mask(4));
        c.apr_set(Domain::NonSecure, Priority::mask(2));
        assert_eq!(c.running_priority(Domain::NonSecure).get(), 2);

        c.priority_drop(Domain::NonSecure);
        assert_eq!(c.running_priority(Domain::NonSecure).get(), 4);

        c.priority_drop(Domain::NonSecure);
        assert!(c.running_priority(Domain::NonSecure).is_idle());
    }

    #[test]
    fn cr0_write_always_forces_link_bits() {
        let mut cr0 = IccCr0::default();
        cr0.write(true);
        assert!(cr0.enable);
        assert!(cr0.link);
        assert!(cr0.link_idle);
    }
}
