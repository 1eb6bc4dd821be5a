//! SPI state table and SPI wire-level handler.

use crate::{
    domain::Domain,
    intid::IaffId,
    log::guest_error,
    modes::{HandlingMode, RoutingMode, TriggerMode},
    prio::Priority,
};

/// Per-SPI state record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpiState {
    pub domain: Domain,
    pub iaffid: IaffId,
    pub priority: Priority,
    pub level: bool,
    pub pending: bool,
    pub active: bool,
    pub enabled: bool,
    pub tm: TriggerMode,
    pub hm: HandlingMode,
    pub irm: RoutingMode,
}

impl SpiState {
    /// Reset value for an SPI record: assigned to the most-privileged
    /// implemented domain by [`SpiTable::new`], otherwise idle/disabled.
    fn reset(domain: Domain) -> SpiState {
        SpiState {
            domain,
            iaffid: IaffId(0),
            priority: Priority::mask(0),
            level: false,
            pending: false,
            active: false,
            enabled: false,
            tm: TriggerMode::Level,
            hm: HandlingMode::Level,
            irm: RoutingMode::Targeted,
        }
    }
}

/// Flat array of per-SPI state records covering `[spi_base, spi_base +
/// spi_irs_range)`.
pub struct SpiTable {
    spi_base: u32,
    states: Vec<SpiState>,
}

impl SpiTable {
    pub fn new(spi_base: u32, spi_irs_range: u32, default_domain: Domain) -> SpiTable {
        SpiTable {
            spi_base,
            states: vec![SpiState::reset(default_domain); spi_irs_range as usize],
        }
    }

    #[inline]
    fn slot(&self, id: u32) -> Option<usize> {
        id.checked_sub(self.spi_base)
            .filter(|&rel| (rel as usize) < self.states.len())
            .map(|rel| rel as usize)
    }

    pub fn get(&self, id: u32) -> Option<&SpiState> {
        self.slot(id).map(|i| &self.states[i])
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut SpiState> {
        self.slot(id).map(move |i| &mut self.states[i])
    }

    /// Iterate every SPI in the table as `(id, state)` pairs, for the
    /// IRS-side HPPI scan.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &SpiState)> {
        self.states
            .iter()
            .enumerate()
            .map(move |(i, s)| (self.spi_base + i as u32, s))
    }

    pub fn spi_base(&self) -> u32 {
        self.spi_base
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn reset_all(&mut self, default_domain: Domain) {
        for s in &mut self.states {
            *s = SpiState::reset(default_domain);
        }
    }

    /// Wire-level `set_spi(id, level)` handler. Returns `true`
    /// if the SPI's pending state may have changed and the caller should
    /// recompute the HPPI / wake lines for its target CPU.
    pub fn set_spi(&mut self, id: u32, level: bool) -> bool {
        let Some(spi) = self.get_mut(id) else {
            guest_error!("set_spi: SPI {id} out of range");
            return false;
        };
        if spi.level == level {
            return false;
        }
        spi.level = level;
        self.spi_sample(id)
    }

    /// Re-derive PENDING/HM from the current wire level and trigger mode.
    /// Returns `true` if an HPPI recompute is needed.
    pub fn spi_sample(&mut self, id: u32) -> bool {
        let Some(spi) = self.get_mut(id) else {
            guest_error!("spi_sample: SPI {id} out of range");
            return false;
        };
        if spi.level {
            spi.pending = true;
            spi.hm = if spi.tm == TriggerMode::Edge {
                HandlingMode::Edge
            } else {
                HandlingMode::Level
            };
        } else if spi.tm == TriggerMode::Level {
            spi.pending = false;
        }
        true
    }

    /// Apply a trigger-mode change via `IRS_SPI_CFGR`, per the edge<->level
    /// transition rules.
    pub fn set_trigger_mode(&mut self, id: u32, new_tm: TriggerMode) -> bool {
        let Some(spi) = self.get_mut(id) else {
            guest_error!("set_trigger_mode: SPI {id} out of range");
            return false;
        };
        if spi.tm == new_tm {
            return false;
        }
        spi.tm = new_tm;
        match new_tm {
            TriggerMode::Level => {
                if spi.level {
                    spi.pending = true;
                    spi.hm = HandlingMode::Level;
                } else {
                    spi.pending = false;
                }
            }
            TriggerMode::Edge => {
                if spi.level {
                    spi.pending = false;
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> SpiTable {
        SpiTable::new(32, 32, Domain::NonSecure)
    }

    #[test]
    fn level_semantics_follow_the_wire() {
        let mut t = table();
        let spi = t.get_mut(40).unwrap();
        spi.tm = TriggerMode::Level;
        assert!(t.set_spi(40, true));
        assert!(t.get(40).unwrap().pending);

        assert!(t.set_spi(40, false));
        assert!(!t.get(40).unwrap().pending);
    }

    #[test]
    fn unchanged_level_is_a_no_op() {
        let mut t = table();
        assert!(t.set_spi(40, true));
        assert!(!t.set_spi(40, true));
    }

    #[test]
    fn out_of_range_id_is_a_no_op() {
        let mut t = table();
        assert!(!t.set_spi(1000, true));
    }

    #[test]
    fn trigger_mode_toggle_to_edge_clears_pending_while_asserted() {
        let mut t = table();
        t.set_spi(40, true);
        assert!(t.set_trigger_mode(40, TriggerMode::Edge));
        assert!(!t.get(40).unwrap().pending);
    }

    #[test]
    fn trigger_mode_toggle_to_level_while_asserted_sets_pending() {
        let mut t = table();
        t.get_mut(40).unwrap().tm = TriggerMode::Edge;
        t.set_spi(40, true);
        // Edge trigger: pending is set on the rising edge regardless.
        assert!(t.get(40).unwrap().pending);
        t.get_mut(40).unwrap().pending = false; // simulate prior acknowledge
        assert!(t.set_trigger_mode(40, TriggerMode::Level));
        assert!(t.get(40).unwrap().pending);
        assert_eq!(t.get(40).unwrap().hm, HandlingMode::Level);
    }
}
