use byteorder::{ByteOrder, NetworkEndian};
use core::fmt;

use super::ipv6::{checksum, Address as Ipv6Address};
use super::{Error, IpProtocol, Result, SeedId};

enum_with_unknown! {
    /// Internet protocol control message type.
    pub enum Message(u8) {
        /// Trickle multicast sequence-list advertisement.
        TrickleMulticast = 0xc8,
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Message::TrickleMulticast => write!(f, "Trickle multicast"),
            Message::Unknown(id) => write!(f, "{id}"),
        }
    }
}

/// A read/write wrapper around an ICMPv6 packet buffer.
#[derive(Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Packet<T: AsRef<[u8]>> {
    buffer: T,
}

// See https://tools.ietf.org/html/rfc4443 for details.
mod field {
    use crate::wire::field::*;

    pub const TYPE: usize = 0;
    pub const CODE: usize = 1;
    pub const CHECKSUM: Field = 2..4;

    pub const HEADER_END: usize = 4;
}

/// Size of the ICMPv6 header, in octets.
pub const HEADER_LEN: usize = field::HEADER_END;

impl<T: AsRef<[u8]>> Packet<T> {
    /// Create a raw octet buffer with an ICMPv6 packet structure.
    pub const fn new_unchecked(buffer: T) -> Packet<T> {
        Packet { buffer }
    }

    /// Shorthand for a combination of [new_unchecked] and [check_len].
    ///
    /// [new_unchecked]: #method.new_unchecked
    /// [check_len]: #method.check_len
    pub fn new_checked(buffer: T) -> Result<Packet<T>> {
        let packet = Self::new_unchecked(buffer);
        packet.check_len()?;
        Ok(packet)
    }

    /// Ensure that no accessor method will panic if called.
    /// Returns `Err(Error::Truncated)` if the buffer is too short.
    pub fn check_len(&self) -> Result<()> {
        if self.buffer.as_ref().len() < field::HEADER_END {
            Err(Error::Truncated)
        } else {
            Ok(())
        }
    }

    /// Consume the packet, returning the underlying buffer.
    pub fn into_inner(self) -> T {
        self.buffer
    }

    /// Return the message type field.
    #[inline]
    pub fn msg_type(&self) -> Message {
        let data = self.buffer.as_ref();
        Message::from(data[field::TYPE])
    }

    /// Return the message code field.
    #[inline]
    pub fn msg_code(&self) -> u8 {
        let data = self.buffer.as_ref();
        data[field::CODE]
    }

    /// Return the checksum field.
    #[inline]
    pub fn checksum(&self) -> u16 {
        let data = self.buffer.as_ref();
        NetworkEndian::read_u16(&data[field::CHECKSUM])
    }

    /// Validate the checksum against the IPv6 pseudo header.
    pub fn verify_checksum(&self, src_addr: &Ipv6Address, dst_addr: &Ipv6Address) -> bool {
        let data = self.buffer.as_ref();
        checksum::combine(&[
            checksum::pseudo_header(src_addr, dst_addr, IpProtocol::Icmpv6, data.len() as u32),
            checksum::data(data),
        ]) == !0
    }
}

impl<'a, T: AsRef<[u8]> + ?Sized> Packet<&'a T> {
    /// Return a pointer to the message payload.
    #[inline]
    pub fn payload(&self) -> &'a [u8] {
        let data = self.buffer.as_ref();
        &data[field::HEADER_END..]
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Packet<T> {
    /// Set the message type field.
    #[inline]
    pub fn set_msg_type(&mut self, value: Message) {
        let data = self.buffer.as_mut();
        data[field::TYPE] = value.into();
    }

    /// Set the message code field.
    #[inline]
    pub fn set_msg_code(&mut self, value: u8) {
        let data = self.buffer.as_mut();
        data[field::CODE] = value;
    }

    /// Set the checksum field.
    #[inline]
    pub fn set_checksum(&mut self, value: u16) {
        let data = self.buffer.as_mut();
        NetworkEndian::write_u16(&mut data[field::CHECKSUM], value);
    }

    /// Return a mutable pointer to the message payload.
    #[inline]
    pub fn payload_mut(&mut self) -> &mut [u8] {
        let data = self.buffer.as_mut();
        &mut data[field::HEADER_END..]
    }

    /// Compute and fill in the checksum, using the IPv6 pseudo header.
    pub fn fill_checksum(&mut self, src_addr: &Ipv6Address, dst_addr: &Ipv6Address) {
        self.set_checksum(0);
        let checksum = {
            let data = self.buffer.as_ref();
            !checksum::combine(&[
                checksum::pseudo_header(src_addr, dst_addr, IpProtocol::Icmpv6, data.len() as u32),
                checksum::data(data),
            ])
        };
        self.set_checksum(checksum);
    }
}

// Sequence-list entry layout:
//
//   flags(1) seq-len(1) seed-id(2 or 16) seq-values(seq-len x 2, big endian)
//
// S (bit 7) selects the seed-id length, 0 short / 1 long. M (bit 6) selects
// the Trickle parametrization. Bits 5..0 are reserved and must be zero.
const FLAG_S: u8 = 0x80;
const FLAG_M: u8 = 0x40;
const FLAGS_RESERVED: u8 = 0x3f;

const ENTRY_HDR_LEN: usize = 2;
const SHORT_SEED_LEN: usize = 2;
const LONG_SEED_LEN: usize = 16;

/// A parsed view of one sequence-list entry of a Trickle multicast
/// advertisement.
#[derive(Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SeqList<'a> {
    m: u8,
    seed_id: SeedId,
    seqs: &'a [u8],
}

impl<'a> SeqList<'a> {
    /// Return the Trickle parametrization of this entry.
    pub const fn m(&self) -> u8 {
        self.m
    }

    /// Return the seed id of this entry.
    pub const fn seed_id(&self) -> SeedId {
        self.seed_id
    }

    /// Return the number of advertised sequence values.
    pub const fn len(&self) -> usize {
        self.seqs.len() / 2
    }

    /// Return `true` when the entry advertises no sequence values.
    pub const fn is_empty(&self) -> bool {
        self.seqs.is_empty()
    }

    /// Iterate over the advertised sequence values, in host order.
    pub fn seq_values(&self) -> impl Iterator<Item = u16> + 'a {
        self.seqs.chunks_exact(2).map(NetworkEndian::read_u16)
    }
}

/// An iterator over the sequence-list entries of an advertisement payload.
///
/// Parsing stops at the first malformed entry; the error is yielded once
/// and the iterator ends.
#[derive(Debug)]
pub struct SeqListIterator<'a> {
    pos: usize,
    data: &'a [u8],
    hit_error: bool,
}

impl<'a> SeqListIterator<'a> {
    /// Create a new `SeqListIterator` over an advertisement payload.
    pub const fn new(data: &'a [u8]) -> SeqListIterator<'a> {
        SeqListIterator {
            pos: 0,
            data,
            hit_error: false,
        }
    }

    fn parse_entry(&mut self) -> Result<SeqList<'a>> {
        let data = &self.data[self.pos..];
        if data.len() < ENTRY_HDR_LEN {
            return Err(Error::Truncated);
        }

        let flags = data[0];
        if flags & FLAGS_RESERVED != 0 {
            return Err(Error::Malformed);
        }

        let seq_len = data[1] as usize;
        let seed_len = if flags & FLAG_S == FLAG_S {
            LONG_SEED_LEN
        } else {
            SHORT_SEED_LEN
        };
        let total = ENTRY_HDR_LEN + seed_len + seq_len * 2;
        if data.len() < total {
            return Err(Error::Truncated);
        }

        let seed_bytes = &data[ENTRY_HDR_LEN..ENTRY_HDR_LEN + seed_len];
        let seed_id = if seed_len == LONG_SEED_LEN {
            SeedId::Long(Ipv6Address::from_bytes(seed_bytes))
        } else {
            SeedId::Short(NetworkEndian::read_u16(seed_bytes))
        };

        self.pos += total;
        Ok(SeqList {
            m: u8::from(flags & FLAG_M == FLAG_M),
            seed_id,
            seqs: &data[ENTRY_HDR_LEN + seed_len..total],
        })
    }
}

impl<'a> Iterator for SeqListIterator<'a> {
    type Item = Result<SeqList<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.data.len() || self.hit_error {
            return None;
        }
        match self.parse_entry() {
            Ok(entry) => Some(Ok(entry)),
            Err(e) => {
                self.hit_error = true;
                Some(Err(e))
            }
        }
    }
}

/// A high-level representation of one sequence-list entry.
#[derive(Debug, PartialEq, Eq, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SeqListRepr {
    /// Seed id; its variant selects the `S` bit and the seed length.
    pub seed_id: SeedId,
    /// Trickle parametrization, 0 or 1.
    pub m: u8,
    /// Advertised sequence values, in host order.
    pub seqs: heapless::Vec<u16, { crate::config::MAX_SEQS }>,
}

impl SeqListRepr {
    /// Parse a sequence-list entry view into a high-level representation.
    ///
    /// Fails with [`Error::Truncated`] when the entry advertises more
    /// values than the representation can hold.
    pub fn parse(entry: &SeqList) -> Result<SeqListRepr> {
        let mut seqs = heapless::Vec::new();
        for seq in entry.seq_values() {
            seqs.push(seq).map_err(|_| Error::Truncated)?;
        }
        Ok(SeqListRepr {
            seed_id: entry.seed_id(),
            m: entry.m(),
            seqs,
        })
    }

    /// Return the length of the entry that will be emitted from this
    /// high-level representation.
    pub fn buffer_len(&self) -> usize {
        let seed_len = match self.seed_id {
            SeedId::Short(_) => SHORT_SEED_LEN,
            SeedId::Long(_) => LONG_SEED_LEN,
        };
        ENTRY_HDR_LEN + seed_len + self.seqs.len() * 2
    }

    /// Emit a high-level representation into an advertisement payload.
    ///
    /// # Panics
    /// The function panics if `buffer` is shorter than [`Self::buffer_len`].
    pub fn emit(&self, buffer: &mut [u8]) {
        let mut flags = if self.m != 0 { FLAG_M } else { 0 };
        let seed_len = match self.seed_id {
            SeedId::Short(seed_id) => {
                NetworkEndian::write_u16(&mut buffer[ENTRY_HDR_LEN..ENTRY_HDR_LEN + 2], seed_id);
                SHORT_SEED_LEN
            }
            SeedId::Long(addr) => {
                flags |= FLAG_S;
                buffer[ENTRY_HDR_LEN..ENTRY_HDR_LEN + 16].copy_from_slice(addr.as_bytes());
                LONG_SEED_LEN
            }
        };
        buffer[0] = flags;
        buffer[1] = self.seqs.len() as u8;

        let mut pos = ENTRY_HDR_LEN + seed_len;
        for seq in &self.seqs {
            NetworkEndian::write_u16(&mut buffer[pos..pos + 2], *seq);
            pos += 2;
        }
    }
}
