/// Value types describing bus addresses, access widths, interrupt
/// priority levels and interrupt vectors.
///
/// Addresses and vectors on these machines are conventionally
/// written in octal, so the `Display` implementations here do the
/// same.
use std::error::Error;
use std::fmt::{self, Debug, Display, Formatter, Octal};

use serde::{Deserialize, Serialize};

#[cfg(test)]
use test_strategy::Arbitrary;

/// A physical byte address on a bus.
///
/// The address is not implicitly limited to the width of any
/// particular bus; a bus normalises addresses according to its own
/// [`AddressingMode`] (see [`AddressingMode::normalise`]).
#[cfg_attr(test, derive(Arbitrary))]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BusAddress(u32);

impl BusAddress {
    pub const ZERO: BusAddress = BusAddress(0);

    #[must_use]
    pub const fn new(addr: u32) -> BusAddress {
        BusAddress(addr)
    }

    #[must_use]
    pub const fn bits(&self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn and(&self, mask: u32) -> BusAddress {
        BusAddress(self.0 & mask)
    }

    /// Compute an address `n` bytes above this one.
    #[must_use]
    pub fn checked_add(&self, n: u32) -> Option<BusAddress> {
        self.0.checked_add(n).map(BusAddress)
    }

    /// The number of bytes by which `self` lies above `base`, if it
    /// does.
    #[must_use]
    pub fn offset_from(&self, base: BusAddress) -> Option<u32> {
        self.0.checked_sub(base.0)
    }

    #[must_use]
    pub const fn is_odd(&self) -> bool {
        self.0 & 1 != 0
    }
}

impl From<u32> for BusAddress {
    fn from(addr: u32) -> BusAddress {
        BusAddress(addr)
    }
}

impl From<BusAddress> for u32 {
    fn from(addr: BusAddress) -> u32 {
        addr.0
    }
}

impl Display for BusAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:>06o}", self.0)
    }
}

impl Debug for BusAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "BusAddress(0o{:o})", self.0)
    }
}

impl Octal for BusAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Octal::fmt(&self.0, f)
    }
}

/// The addressing mode of a bus adapter.  A Unibus carries 18 address
/// bits; the earliest Qbus machines carried only 16.  The mode is a
/// property of the bus, not of the devices attached to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressingMode {
    Bits16,
    Bits18,
}

impl AddressingMode {
    #[must_use]
    pub const fn mask(&self) -> u32 {
        match self {
            AddressingMode::Bits16 => 0o177_777,
            AddressingMode::Bits18 => 0o777_777,
        }
    }

    #[must_use]
    pub const fn normalise(&self, addr: BusAddress) -> BusAddress {
        addr.and(self.mask())
    }
}

impl Display for AddressingMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AddressingMode::Bits16 => "16-bit",
            AddressingMode::Bits18 => "18-bit",
        })
    }
}

/// The width of a single bus transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Width {
    Byte,
    Word,
}

impl Width {
    #[must_use]
    pub const fn bytes(&self) -> u32 {
        match self {
            Width::Byte => 1,
            Width::Word => 2,
        }
    }

    /// The bits of a transferred value which are significant for
    /// this width.
    #[must_use]
    pub const fn value_mask(&self) -> u16 {
        match self {
            Width::Byte => 0o377,
            Width::Word => 0o177_777,
        }
    }
}

impl Display for Width {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Width::Byte => "byte",
            Width::Word => "word",
        })
    }
}

/// Bus request (interrupt priority) level.
///
/// Only the four levels available to peripherals are represented.
/// Higher levels take precedence over lower ones.
#[cfg_attr(test, derive(Arbitrary))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Ipl {
    Br4 = 4,
    Br5 = 5,
    Br6 = 6,
    Br7 = 7,
}

impl Ipl {
    /// All levels, highest priority first.  This is the order in
    /// which pending requests are arbitrated.
    pub const DESCENDING: [Ipl; 4] = [Ipl::Br7, Ipl::Br6, Ipl::Br5, Ipl::Br4];

    /// The numeric level (4 to 7).
    #[must_use]
    pub const fn level(&self) -> u8 {
        *self as u8
    }

    /// A dense index (0 to 3) for use in per-level tables.
    #[must_use]
    pub const fn index(&self) -> usize {
        (*self as usize) - 4
    }
}

impl Display for Ipl {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "BR{}", self.level())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidPriorityLevel(pub u8);

impl Display for InvalidPriorityLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} is not a device interrupt priority level (expected 4 to 7)",
            self.0
        )
    }
}

impl Error for InvalidPriorityLevel {}

impl TryFrom<u8> for Ipl {
    type Error = InvalidPriorityLevel;

    fn try_from(n: u8) -> Result<Ipl, InvalidPriorityLevel> {
        match n {
            4 => Ok(Ipl::Br4),
            5 => Ok(Ipl::Br5),
            6 => Ok(Ipl::Br6),
            7 => Ok(Ipl::Br7),
            _ => Err(InvalidPriorityLevel(n)),
        }
    }
}

/// The address of an interrupt vector.  Vectors are two words
/// (four bytes) long, so consecutive vectors of one device are four
/// bytes apart.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorAddress(u16);

/// Distance in bytes between consecutive interrupt vectors.
pub const VECTOR_STRIDE: u16 = 4;

impl VectorAddress {
    #[must_use]
    pub const fn new(v: u16) -> VectorAddress {
        VectorAddress(v)
    }

    /// The vector `n` places after this one.
    #[must_use]
    pub fn nth(&self, n: u16) -> Option<VectorAddress> {
        n.checked_mul(VECTOR_STRIDE)
            .and_then(|off| self.0.checked_add(off))
            .map(VectorAddress)
    }
}

impl From<VectorAddress> for u16 {
    fn from(v: VectorAddress) -> u16 {
        v.0
    }
}

impl From<u16> for VectorAddress {
    fn from(v: u16) -> VectorAddress {
        VectorAddress(v)
    }
}

impl Display for VectorAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:>03o}", self.0)
    }
}

impl Debug for VectorAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "VectorAddress(0o{:o})", self.0)
    }
}

impl Octal for VectorAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Octal::fmt(&self.0, f)
    }
}

#[test]
fn test_ipl_round_trip() {
    for ipl in Ipl::DESCENDING {
        assert_eq!(Ipl::try_from(ipl.level()), Ok(ipl));
    }
    assert_eq!(Ipl::try_from(3), Err(InvalidPriorityLevel(3)));
    assert_eq!(Ipl::try_from(8), Err(InvalidPriorityLevel(8)));
}

#[test]
fn test_ipl_ordering() {
    assert!(Ipl::Br7 > Ipl::Br4);
    let indexes: Vec<usize> = Ipl::DESCENDING.iter().map(Ipl::index).collect();
    assert_eq!(indexes, vec![3, 2, 1, 0]);
}

#[test]
fn test_addressing_mode_normalise() {
    let a = BusAddress::new(0o777_514);
    assert_eq!(AddressingMode::Bits18.normalise(a), a);
    assert_eq!(
        AddressingMode::Bits16.normalise(a),
        BusAddress::new(0o177_514)
    );
}

#[test]
fn test_display_is_octal() {
    assert_eq!(BusAddress::new(0o160_000).to_string(), "160000");
    assert_eq!(BusAddress::new(0o100).to_string(), "000100");
    assert_eq!(VectorAddress::new(0o64).to_string(), "064");
}

#[test]
fn test_vector_nth() {
    let v = VectorAddress::new(0o300);
    assert_eq!(v.nth(0), Some(v));
    assert_eq!(v.nth(1), Some(VectorAddress::new(0o304)));
    assert_eq!(VectorAddress::new(0o177_774).nth(1), None);
}
