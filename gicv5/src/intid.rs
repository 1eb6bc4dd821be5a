//! Interrupt identifiers.
//!
//! An INTID is a 32-bit value: the top three bits carry the interrupt type
//! (PPI/LPI/SPI), the low 24 bits carry the type-relative ID.

use core::fmt;

/// The HPPIV ("valid") bit ORed into an INTID returned from an acknowledge
/// register read.
pub const HPPIV: u32 = 1 << 31;

/// Interrupt type, encoded in the top three bits of an INTID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum IntType {
    Ppi = 1,
    Lpi = 2,
    Spi = 3,
}

impl IntType {
    pub const fn from_bits(bits: u8) -> Option<IntType> {
        match bits {
            1 => Some(IntType::Ppi),
            2 => Some(IntType::Lpi),
            3 => Some(IntType::Spi),
            _ => None,
        }
    }
}

impl fmt::Display for IntType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IntType::Ppi => "PPI",
            IntType::Lpi => "LPI",
            IntType::Spi => "SPI",
        };
        write!(f, "{s}")
    }
}

const ID_MASK: u32 = 0x00ff_ffff;
const TYPE_SHIFT: u32 = 29;

/// A decoded `(type, id)` INTID pair, with encode/decode helpers for the
/// packed 32-bit wire format used by `ICC_ICSR_EL1`, `GICR_CDIA`, and the
/// stream protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IntId {
    pub ty: IntType,
    pub id: u32,
}

impl IntId {
    pub const fn new(ty: IntType, id: u32) -> Self {
        IntId {
            ty,
            id: id & ID_MASK,
        }
    }

    /// Decode a packed 32-bit INTID (ignoring the HPPIV bit, if present).
    pub const fn decode(raw: u32) -> Option<IntId> {
        let ty_bits = ((raw & !HPPIV) >> TYPE_SHIFT) as u8;
        match IntType::from_bits(ty_bits) {
            Some(ty) => Some(IntId {
                    ty,
                    id: raw & ID_MASK,
            }),
            None => None,
        }
    }

    /// Encode as a packed 32-bit INTID (without the HPPIV bit).
    pub const fn encode(self) -> u32 {
        ((self.ty as u32) << TYPE_SHIFT) | (self.id & ID_MASK)
    }

    /// Encode with the HPPIV bit set, as returned by `GICR_CDIA`/`GICR_CDNMIA`.
    pub const fn encode_hppiv(self) -> u32 {
        self.encode() | HPPIV
    }
}

/// Interrupt Affinity ID: the CPU identifier the GIC uses for targeted
/// routing, independent of any host thread or vCPU index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IaffId(pub u16);

impl fmt::Display for IaffId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IAFFID#{}", self.0)
    }
}
