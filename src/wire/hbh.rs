use byteorder::{ByteOrder, NetworkEndian};
use core::fmt;

use super::{Error, IpProtocol as Protocol, Result};

/// Option type of the Trickle multicast Hop-by-Hop option.
pub const OPT_TYPE_TRICKLE: u8 = 0x0c;
/// Option data length when the seed id is carried in the option.
pub const OPT_LEN_SHORT_SEED: u8 = 4;
/// Option data length when the seed id is elided (the source address is
/// the seed).
pub const OPT_LEN_LONG_SEED: u8 = 2;
/// Size of the whole Hop-by-Hop extension block, option and padding
/// included. The block is aligned to 8 octets as RFC 8200 requires.
pub const HBH_TOTAL_LEN: usize = 8;

/// A read/write wrapper around the 8-octet Hop-by-Hop extension block that
/// carries the Trickle multicast option.
#[derive(Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Header<T: AsRef<[u8]>> {
    buffer: T,
}

// Block layout, starting right after the IPv6 header:
//
//   0        1        2        3        4..7
//   next-hdr hdr-len  opt-type opt-len  option data (+ PadN in long mode)
mod field {
    use crate::wire::field::*;

    pub const NXT_HDR: usize = 0;
    pub const HDR_LEN: usize = 1;
    pub const OPTION: Rest = 2..;
}

impl<T: AsRef<[u8]>> Header<T> {
    /// Create a raw octet buffer with a Hop-by-Hop extension block
    /// structure.
    pub const fn new_unchecked(buffer: T) -> Header<T> {
        Header { buffer }
    }

    /// Shorthand for a combination of [new_unchecked] and [check_len].
    ///
    /// [new_unchecked]: #method.new_unchecked
    /// [check_len]: #method.check_len
    pub fn new_checked(buffer: T) -> Result<Header<T>> {
        let header = Self::new_unchecked(buffer);
        header.check_len()?;
        Ok(header)
    }

    /// Ensure that no accessor method will panic if called.
    /// Returns `Err(Error::Truncated)` if the buffer is too short.
    pub fn check_len(&self) -> Result<()> {
        if self.buffer.as_ref().len() < HBH_TOTAL_LEN {
            Err(Error::Truncated)
        } else {
            Ok(())
        }
    }

    /// Consume the header, returning the underlying buffer.
    pub fn into_inner(self) -> T {
        self.buffer
    }

    /// Return the next header field.
    #[inline]
    pub fn next_header(&self) -> Protocol {
        let data = self.buffer.as_ref();
        Protocol::from(data[field::NXT_HDR])
    }

    /// Return the header extension length field, in units of 8 octets not
    /// counting the first.
    #[inline]
    pub fn header_len(&self) -> u8 {
        let data = self.buffer.as_ref();
        data[field::HDR_LEN]
    }
}

impl<'a, T: AsRef<[u8]> + ?Sized> Header<&'a T> {
    /// Return the first (and only) option of the block.
    pub fn option(&self) -> TrickleOption<&'a [u8]> {
        let data = self.buffer.as_ref();
        TrickleOption::new_unchecked(&data[field::OPTION])
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Header<T> {
    /// Set the next header field.
    #[inline]
    pub fn set_next_header(&mut self, value: Protocol) {
        let data = self.buffer.as_mut();
        data[field::NXT_HDR] = value.into();
    }

    /// Set the header extension length field.
    #[inline]
    pub fn set_header_len(&mut self, value: u8) {
        let data = self.buffer.as_mut();
        data[field::HDR_LEN] = value;
    }

    /// Return a mutable view of the first option of the block.
    pub fn option_mut(&mut self) -> TrickleOption<&mut [u8]> {
        let data = self.buffer.as_mut();
        TrickleOption::new_unchecked(&mut data[field::OPTION])
    }
}

/// A read/write wrapper around the Trickle multicast option octets.
#[derive(Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TrickleOption<T: AsRef<[u8]>> {
    buffer: T,
}

// Option layout. The sequence value is 15 bits wide: seven bits live in
// the flags octet, the low eight in their own octet.
//
//   short seeds: type len seed(2) flags lsb
//   long seeds:  type len flags   lsb   padn-type padn-len
mod opt_field {
    use crate::wire::field::*;

    pub const TYPE: usize = 0;
    pub const LENGTH: usize = 1;

    pub const SHORT_SEED_ID: Field = 2..4;
    pub const SHORT_FLAGS: usize = 4;
    pub const SHORT_SEQ_LSB: usize = 5;

    pub const LONG_FLAGS: usize = 2;
    pub const LONG_SEQ_LSB: usize = 3;
    pub const LONG_PADN: Field = 4..6;
}

const FLAG_M: u8 = 0x80;
const SEQ_MSB_MASK: u8 = 0x7f;

impl<T: AsRef<[u8]>> TrickleOption<T> {
    /// Create a raw octet buffer with a Trickle multicast option structure.
    pub const fn new_unchecked(buffer: T) -> TrickleOption<T> {
        TrickleOption { buffer }
    }

    /// Return the option type field.
    #[inline]
    pub fn option_type(&self) -> u8 {
        let data = self.buffer.as_ref();
        data[opt_field::TYPE]
    }

    /// Return the option data length field.
    #[inline]
    pub fn option_len(&self) -> u8 {
        let data = self.buffer.as_ref();
        data[opt_field::LENGTH]
    }

    fn flags(&self) -> u8 {
        let data = self.buffer.as_ref();
        match self.option_len() {
            OPT_LEN_SHORT_SEED => data[opt_field::SHORT_FLAGS],
            _ => data[opt_field::LONG_FLAGS],
        }
    }

    /// Return the Trickle parametrization this datagram is governed by.
    #[inline]
    pub fn m(&self) -> u8 {
        u8::from(self.flags() & FLAG_M == FLAG_M)
    }

    /// Return the 15-bit sequence value, in host order.
    #[inline]
    pub fn seq_val(&self) -> u16 {
        let data = self.buffer.as_ref();
        let lsb = match self.option_len() {
            OPT_LEN_SHORT_SEED => data[opt_field::SHORT_SEQ_LSB],
            _ => data[opt_field::LONG_SEQ_LSB],
        };
        ((self.flags() & SEQ_MSB_MASK) as u16) << 8 | lsb as u16
    }

    /// Return the seed id carried in the option, if the layout carries one.
    #[inline]
    pub fn seed_id(&self) -> Option<u16> {
        let data = self.buffer.as_ref();
        match self.option_len() {
            OPT_LEN_SHORT_SEED => Some(NetworkEndian::read_u16(&data[opt_field::SHORT_SEED_ID])),
            _ => None,
        }
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> TrickleOption<T> {
    /// Set the option type field.
    #[inline]
    pub fn set_option_type(&mut self, value: u8) {
        let data = self.buffer.as_mut();
        data[opt_field::TYPE] = value;
    }

    /// Set the option data length field.
    #[inline]
    pub fn set_option_len(&mut self, value: u8) {
        let data = self.buffer.as_mut();
        data[opt_field::LENGTH] = value;
    }
}

/// A high-level representation of a Trickle multicast Hop-by-Hop option.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Repr {
    /// Seed id carried in the option. `None` elides the id; the source
    /// address of the datagram is the seed.
    pub seed_id: Option<u16>,
    /// Trickle parametrization, 0 or 1.
    pub m: u8,
    /// The 15-bit sequence value, in host order.
    pub seq_val: u16,
}

impl Repr {
    /// Parse a Trickle multicast option and return a high-level
    /// representation.
    pub fn parse<T: AsRef<[u8]> + ?Sized>(opt: &TrickleOption<&T>) -> Result<Repr> {
        if opt.buffer.as_ref().len() < HBH_TOTAL_LEN - 2 {
            return Err(Error::Truncated);
        }
        if opt.option_type() != OPT_TYPE_TRICKLE {
            return Err(Error::Malformed);
        }
        match opt.option_len() {
            OPT_LEN_SHORT_SEED | OPT_LEN_LONG_SEED => {}
            _ => return Err(Error::Malformed),
        }

        Ok(Repr {
            seed_id: opt.seed_id(),
            m: opt.m(),
            seq_val: opt.seq_val(),
        })
    }

    /// Return the length of the option that will be emitted from this
    /// high-level representation, PadN tail included.
    pub const fn buffer_len(&self) -> usize {
        HBH_TOTAL_LEN - 2
    }

    /// Emit a high-level representation into a Trickle multicast option.
    pub fn emit<T: AsRef<[u8]> + AsMut<[u8]>>(&self, opt: &mut TrickleOption<T>) {
        let flags = (self.m << 7) | (self.seq_val >> 8) as u8 & SEQ_MSB_MASK;
        let lsb = (self.seq_val & 0xff) as u8;

        opt.set_option_type(OPT_TYPE_TRICKLE);
        let data = opt.buffer.as_mut();
        match self.seed_id {
            Some(seed_id) => {
                data[opt_field::LENGTH] = OPT_LEN_SHORT_SEED;
                NetworkEndian::write_u16(&mut data[opt_field::SHORT_SEED_ID], seed_id);
                data[opt_field::SHORT_FLAGS] = flags;
                data[opt_field::SHORT_SEQ_LSB] = lsb;
            }
            None => {
                data[opt_field::LENGTH] = OPT_LEN_LONG_SEED;
                data[opt_field::LONG_FLAGS] = flags;
                data[opt_field::LONG_SEQ_LSB] = lsb;
                // Pad the block to 8 octets with a PadN(0) option.
                data[opt_field::LONG_PADN.start] = 0x01;
                data[opt_field::LONG_PADN.start + 1] = 0x00;
            }
        }
    }
}

impl fmt::Display for Repr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Trickle HBHO m={} seq={}", self.m, self.seq_val)?;
        if let Some(seed_id) = self.seed_id {
            write!(f, " seed=0x{seed_id:04x}")?;
        }
        Ok(())
    }
}
