//! Shared per-interrupt mode enumerations.

/// Wire-level trigger mode, SPI-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerMode {
    Edge,
    Level,
}

impl TriggerMode {
    pub const fn from_bit(bit: bool) -> TriggerMode {
        if bit {
            TriggerMode::Level
        } else {
            TriggerMode::Edge
        }
    }

    pub const fn to_bit(self) -> bool {
        matches!(self, TriggerMode::Level)
    }
}

/// Latched handling mode: governs whether acknowledge clears PENDING.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlingMode {
    Edge,
    Level,
}

impl HandlingMode {
    pub const fn from_bit(bit: bool) -> HandlingMode {
        if bit {
            HandlingMode::Level
        } else {
            HandlingMode::Edge
        }
    }

    pub const fn to_bit(self) -> bool {
        matches!(self, HandlingMode::Level)
    }
}

/// Routing mode. `OneOfN` is architecturally legal but not implemented by
/// this core: writes requesting it are downgraded to `Targeted`
/// with a guest-error log at the call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingMode {
    Targeted,
    OneOfN,
}

impl RoutingMode {
    pub const fn from_bit(bit: bool) -> RoutingMode {
        if bit {
            RoutingMode::OneOfN
        } else {
            RoutingMode::Targeted
        }
    }

    pub const fn to_bit(self) -> bool {
        matches!(self, RoutingMode::OneOfN)
    }
}
