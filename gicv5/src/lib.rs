//! Emulation core for an ARM GICv5 Interrupt Routing Service (IRS) and the
//! per-CPU interfaces it drives.
//!
//! The crate is organized leaf-first: [`domain`], [`intid`], [`prio`], and
//! [`modes`] are small value types with no dependencies; [`addrspace`] is
//! the guest-memory seam; [`ist`], [`lpi_cache`], and [`spi`] hold the state
//! an IRS owns; [`stream`] is the command set the CPU interface issues to
//! it; [`cpuif`] and [`hppi`] are the per-CPU side; [`irs`] assembles the
//! whole service, and [`regs`] decodes it onto a 64 KiB MMIO frame per
//! domain. [`icc`] decodes the `GIC_CD*` per-CPU system-register commands
//! that reach the same stream protocol directly, bypassing the MMIO frame.

pub mod addrspace;
pub mod cpuif;
pub mod domain;
pub mod error;
pub mod hppi;
pub mod icc;
pub mod intid;
pub mod irs;
pub mod ist;
pub(crate) mod log;
pub mod lpi_cache;
pub mod modes;
pub mod prio;
pub mod regs;
pub mod spi;
pub mod stream;

pub use addrspace::{AddressSpace, MemTxAttrs};
pub use cpuif::CpuInterface;
pub use domain::{Domain, DomainMask};
pub use error::{GicError, GicResult};
pub use hppi::WakeSink;
pub use irs::{Irs, IrsConfig};
