//! Error types for the GICv5 emulation core.
//!
//! The only fatal errors are construction-time configuration
//! errors: everything a guest can provoke at runtime is either silently
//! absorbed or surfaced as a guest-observable no-op plus a log line (see
//! [`crate::log::guest_error`]), never a propagated `Result::Err`.

use core::fmt;

/// Construction-time (realize) error: the IRS was configured with
/// inconsistent board-level parameters and must not come up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "GICv5 errors must be handled, not silently discarded"]
pub enum GicError {
    /// `spi_base + spi_irs_range` does not fit within `spi_range`, or
    /// exceeds the 24-bit INTID space.
    InvalidSpiRange {
        spi_base: u32,
        spi_irs_range: u32,
        spi_range: u32,
    },
    /// Two CPUs were configured with the same IAFFID.
    DuplicateIaffid { iaffid: u16 },
    /// `irsid` does not fit in 16 bits.
    InvalidIrsId { irsid: u32 },
    /// No domain was marked implemented.
    NoDomainsImplemented,
}

/// Result alias for fallible GICv5 construction operations.
pub type GicResult<T> = Result<T, GicError>;

impl fmt::Display for GicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GicError::InvalidSpiRange {
                spi_base,
                spi_irs_range,
                spi_range,
            } => write!(
                f,
                "invalid SPI range: spi_base=0x{spi_base:x} spi_irs_range=0x{spi_irs_range:x} \
                spi_range=0x{spi_range:x} (require spi_base + spi_irs_range <= spi_range <= 2^24)"
            ),
            GicError::DuplicateIaffid { iaffid } => {
                write!(f, "duplicate IAFFID {iaffid} in CPU table")
            }
            GicError::InvalidIrsId { irsid } => {
                write!(f, "IRS ID 0x{irsid:x} does not fit in 16 bits")
            }
            GicError::NoDomainsImplemented => {
                write!(f, "at least one interrupt domain must be implemented")
            }
        }
    }
}
