use super::seq::SeqVal;
use crate::config;
use crate::time::Duration;
use crate::wire::Ipv6Packet;

/// A cached copy of a forwardable multicast datagram.
///
/// The stored bytes are the full IPv6 datagram, Hop-by-Hop option
/// included, so the seed id travels inside the copy and re-transmission is
/// a plain replay of the buffer.
pub(crate) struct PacketBuf {
    pub used: bool,
    /// Re-transmit on the next periodic pass.
    pub must_send: bool,
    /// Whether the ICMPv6 message being processed listed this packet.
    pub listed: bool,
    /// Time this packet may still be re-transmitted for.
    pub active: Duration,
    /// Time this packet has been cached for. Always at least `active`.
    pub dwell: Duration,
    pub len: u16,
    /// Sequence value, in host order.
    pub seq_val: SeqVal,
    /// Index of the sliding window this packet belongs to.
    pub window: u8,
    pub data: [u8; config::BUFF_SIZE],
}

impl PacketBuf {
    pub const EMPTY: PacketBuf = PacketBuf {
        used: false,
        must_send: false,
        listed: false,
        active: Duration::ZERO,
        dwell: Duration::ZERO,
        len: 0,
        seq_val: SeqVal::new(0),
        window: 0,
        data: [0; config::BUFF_SIZE],
    };

    /// Release the slot and forget the cached datagram.
    pub fn clear(&mut self) {
        self.used = false;
        self.must_send = false;
        self.listed = false;
        self.active = Duration::ZERO;
        self.dwell = Duration::ZERO;
        self.len = 0;
        self.seq_val = SeqVal::new(0);
        self.window = 0;
    }

    /// Return the cached datagram bytes.
    pub fn datagram(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    /// Return the hop limit of the cached datagram.
    pub fn hop_limit(&self) -> u8 {
        Ipv6Packet::new_unchecked(self.datagram()).hop_limit()
    }

    /// Decrement the hop limit of the cached datagram by one.
    pub fn decrement_hop_limit(&mut self) {
        let len = self.len as usize;
        let mut packet = Ipv6Packet::new_unchecked(&mut self.data[..len]);
        let hop_limit = packet.hop_limit().saturating_sub(1);
        packet.set_hop_limit(hop_limit);
    }
}

impl core::fmt::Debug for PacketBuf {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("PacketBuf")
            .field("used", &self.used)
            .field("must_send", &self.must_send)
            .field("listed", &self.listed)
            .field("active", &self.active)
            .field("dwell", &self.dwell)
            .field("len", &self.len)
            .field("seq_val", &self.seq_val)
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hop_limit_round_trip() {
        let mut p = PacketBuf::EMPTY;
        p.len = 40;
        p.data[7] = 5;
        assert_eq!(p.hop_limit(), 5);
        p.decrement_hop_limit();
        assert_eq!(p.hop_limit(), 4);
    }

    #[test]
    fn clear_releases_slot() {
        let mut p = PacketBuf::EMPTY;
        p.used = true;
        p.must_send = true;
        p.dwell = Duration::from_millis(100);
        p.len = 60;
        p.clear();
        assert!(!p.used);
        assert!(!p.must_send);
        assert_eq!(p.dwell, Duration::ZERO);
        assert_eq!(p.len, 0);
    }
}
