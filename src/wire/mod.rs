/*! Low-level packet access and construction.

The `wire` module deals with the packet *representation*. It provides two
levels of functionality.

 - First, it provides functions to extract fields from sequences of octets,
   and to insert fields into sequences of octets. This happens through the
   `Packet`, `Header` and `Option` families of structures, which are
   wrappers over a `&[u8]` or `&mut [u8]` that check field offsets once and
   never copy.
 - Second, it provides functions to parse a sequence of octets into a
   high-level structure, and to emit a high-level structure back. This
   happens through the `Repr` family of structures, which own their fields.
*/

use core::fmt;

mod hbh;
mod icmpv6;
mod ipv6;

pub use self::hbh::{
    Header as HbhHeader, Repr as TrickleOptionRepr, TrickleOption, HBH_TOTAL_LEN,
    OPT_LEN_LONG_SEED, OPT_LEN_SHORT_SEED, OPT_TYPE_TRICKLE,
};
pub use self::icmpv6::{
    Message as Icmpv6Message, Packet as Icmpv6Packet, SeqList, SeqListIterator, SeqListRepr,
    HEADER_LEN as ICMPV6_HEADER_LEN,
};
pub use self::ipv6::{
    checksum, Address as Ipv6Address, Packet as Ipv6Packet, Repr as Ipv6Repr,
    IPV6_HEADER_LEN,
};

/// The error type for the wire layer.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// A field was out of bounds for the underlying buffer.
    Truncated,
    /// A structure was recognized but contained invalid data.
    Malformed,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Truncated => write!(f, "truncated packet"),
            Error::Malformed => write!(f, "malformed packet"),
        }
    }
}

/// The result type for the wire layer.
pub type Result<T> = core::result::Result<T, Error>;

mod field {
    pub type Field = ::core::ops::Range<usize>;
    pub type Rest = ::core::ops::RangeFrom<usize>;
}

enum_with_unknown! {
    /// IP protocol number, as carried in the IPv6 next-header field.
    pub enum IpProtocol(u8) {
        /// IPv6 Hop-by-Hop options extension header.
        HopByHop = 0x00,
        /// Transmission Control Protocol.
        Tcp      = 0x06,
        /// User Datagram Protocol.
        Udp      = 0x11,
        /// ICMP for IPv6.
        Icmpv6   = 0x3a,
    }
}

impl fmt::Display for IpProtocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            IpProtocol::HopByHop => write!(f, "Hop-by-Hop"),
            IpProtocol::Tcp => write!(f, "TCP"),
            IpProtocol::Udp => write!(f, "UDP"),
            IpProtocol::Icmpv6 => write!(f, "ICMPv6"),
            IpProtocol::Unknown(id) => write!(f, "0x{id:02x}"),
        }
    }
}

/// Identifier of the node that originated a multicast datagram.
///
/// The engine runs with one of the two representations, chosen by
/// [`SeedMode`]: a 16-bit identifier carried inside the Hop-by-Hop option,
/// or the 128-bit source address of the datagram with the identifier elided
/// from the option.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SeedId {
    /// 16-bit identifier, carried in the Hop-by-Hop option.
    Short(u16),
    /// The source IPv6 address of the datagram.
    Long(Ipv6Address),
}

impl SeedId {
    /// Return the seed-id representation in use.
    pub const fn mode(&self) -> SeedMode {
        match self {
            SeedId::Short(_) => SeedMode::Short,
            SeedId::Long(_) => SeedMode::Long,
        }
    }

    /// The all-zero short id and the unspecified address are null.
    pub fn is_null(&self) -> bool {
        match self {
            SeedId::Short(id) => *id == 0,
            SeedId::Long(addr) => addr.is_unspecified(),
        }
    }
}

impl fmt::Display for SeedId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SeedId::Short(id) => write!(f, "0x{id:04x}"),
            SeedId::Long(addr) => write!(f, "{addr}"),
        }
    }
}

/// Seed-id representation, fixed per build of the surrounding stack.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SeedMode {
    /// 16-bit seed ids inside the Hop-by-Hop option.
    Short,
    /// Seed ids elided from the option; the source address is the seed.
    #[default]
    Long,
}
