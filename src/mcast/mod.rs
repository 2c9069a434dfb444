/*! Multicast forwarding with Trickle.

This module implements the forwarding engine of "Multicast Forwarding
Using Trickle": datagrams that carry the Trickle Hop-by-Hop option are
cached in a fixed pool, grouped per originating seed into sliding windows
of sequence values, and re-transmitted under the suppression rules of two
independently parametrized Trickle timers. ICMPv6 sequence-list messages
exchanged with the neighbourhood drive consistency detection both ways.

The engine is event driven and owns no clock of its own: every entry
point takes the current time, and the host is expected to call
[`Forwarder::poll`] once [`Forwarder::poll_at`] is reached. Link access
goes through the [`Stack`] collaborator trait.
*/

mod buffer;
mod seq;
mod trickle;
mod window;

pub use self::seq::SeqVal;
pub use self::trickle::{TrickleParams, INFINITE_REDUNDANCY};

use core::cmp::Ordering;

use byteorder::{ByteOrder, NetworkEndian};

use self::buffer::PacketBuf;
use self::trickle::{TimerEvent, TrickleTimer};
use self::window::SlidingWindow;
use crate::config;
use crate::rand::Rand;
use crate::time::{Duration, Instant};
use crate::wire::{
    HbhHeader, Icmpv6Message, Icmpv6Packet, IpProtocol, Ipv6Address, Ipv6Packet, Ipv6Repr, SeedId,
    SeedMode, SeqListIterator, SeqListRepr, TrickleOptionRepr, HBH_TOTAL_LEN, ICMPV6_HEADER_LEN,
    IPV6_HEADER_LEN,
};

/// Largest advertisement payload the engine can produce: one entry header
/// and seed per window, two octets per buffered sequence value.
const ICMP_PAYLOAD_MAX: usize = config::WINS * 18 + config::BUFF_NUM * 2;

/// Whether a datagram handed to [`Forwarder::accept`] arrived from the
/// network or originates on this node.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    /// The datagram arrived from the network.
    Inbound,
    /// This node is the seed; the caller transmits the datagram itself.
    Outbound,
}

/// Collaborator interface provided by the surrounding IPv6 stack.
pub trait Stack {
    /// Return a preferred link-local address of this node, or `None` while
    /// the stack is not ready. The engine declines to transmit while no
    /// link-local address exists.
    fn link_local_address(&self) -> Option<Ipv6Address>;

    /// Select a source address for a datagram towards `dst`.
    fn select_source_address(&self, dst: &Ipv6Address) -> Ipv6Address;

    /// Return the link-layer address of this node, at least two octets
    /// long. In short-seed mode its low two octets seed locally
    /// originated datagrams.
    fn hardware_addr(&self) -> &[u8];

    /// Enqueue a finished IPv6 frame onto the link.
    fn transmit(&mut self, frame: &[u8]);

    /// Feed the hardware watchdog during long transmission sweeps. A
    /// hosted implementation can ignore this.
    fn kick_watchdog(&mut self) {}
}

/// Engine configuration. The defaults mirror the reference parametrization
/// of the draft: long seed ids, advertisements to all-routers, originated
/// datagrams on the conservative timer.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// Seed-id representation. Must match the whole mesh.
    pub seed_mode: SeedMode,
    /// Send advertisements to link-local all-nodes instead of all-routers.
    pub dest_all_nodes: bool,
    /// Originate datagrams with the M bit set, i.e. on timer 1.
    pub set_m_bit: bool,
    /// ICMPv6 code of Trickle multicast messages.
    pub icmp_code: u8,
    /// Fixed hop limit of advertisement messages, checked on receive.
    pub ip_hop_limit: u8,
    /// Seed for the engine's PRNG.
    pub rand_seed: u64,
    /// The two Trickle parametrizations, indexed by the M bit.
    pub params: [TrickleParams; 2],
}

impl Default for Config {
    fn default() -> Config {
        Config {
            seed_mode: SeedMode::Long,
            dest_all_nodes: false,
            set_m_bit: true,
            icmp_code: 0,
            ip_hop_limit: 0xff,
            rand_seed: 0,
            params: [TrickleParams::AGGRESSIVE, TrickleParams::CONSERVATIVE],
        }
    }
}

/// Write-only event counters. These are the only failure signal the
/// engine exposes.
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Stats {
    /// Inbound multicast datagrams seen at all.
    pub mcast_in_all: u32,
    /// Inbound multicast datagrams seen for the first time.
    pub mcast_in_unique: u32,
    /// Datagrams re-transmitted by us without being the seed.
    pub mcast_fwd: u32,
    /// Datagrams originated by us.
    pub mcast_out: u32,
    /// Malformed multicast input.
    pub mcast_bad: u32,
    /// Multicast input dropped as duplicate, stale, or for lack of room.
    pub mcast_dropped: u32,
    /// Advertisements received.
    pub icmp_in: u32,
    /// Advertisements sent.
    pub icmp_out: u32,
    /// Malformed advertisements.
    pub icmp_bad: u32,
}

/// The Trickle multicast forwarding engine.
pub struct Forwarder {
    config: Config,
    timers: [TrickleTimer; 2],
    windows: [SlidingWindow; config::WINS],
    buffers: [PacketBuf; config::BUFF_NUM],
    /// Sequence value of the last datagram this node originated.
    last_seq: SeqVal,
    rand: Rand,
    stats: Stats,
}

impl Forwarder {
    /// Create an engine with zeroed pools and both timers started on their
    /// minimum interval.
    pub fn new(config: Config, now: Instant) -> Forwarder {
        let mut rand = Rand::new(config.rand_seed);
        let timers = [
            TrickleTimer::new(config.params[0], now, &mut rand),
            TrickleTimer::new(config.params[1], now, &mut rand),
        ];

        Forwarder {
            config,
            timers,
            windows: [SlidingWindow::EMPTY; config::WINS],
            buffers: [PacketBuf::EMPTY; config::BUFF_NUM],
            last_seq: SeqVal::new(0),
            rand,
            stats: Stats::default(),
        }
    }

    /// Return the engine configuration.
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Return the event counters.
    pub const fn stats(&self) -> &Stats {
        &self.stats
    }

    /// When [`poll`] should be called next.
    ///
    /// [`poll`]: #method.poll
    pub fn poll_at(&self) -> Instant {
        self.timers[0].poll_at().min(self.timers[1].poll_at())
    }

    /// Dispatch every timer event whose time has come. Within one timer,
    /// events run in non-decreasing interval order; when the clock jumped
    /// far ahead, the timer catches up within this call.
    pub fn poll<S: Stack>(&mut self, stack: &mut S, now: Instant) {
        loop {
            let mut dispatched = false;
            for m in 0..2 {
                match self.timers[m].due(now) {
                    Some(TimerEvent::TransmitPoint) => {
                        self.transmit_point(stack, m, now);
                        dispatched = true;
                    }
                    Some(TimerEvent::IntervalEnd) => {
                        self.timers[m].double_interval(now, &mut self.rand);
                        dispatched = true;
                    }
                    None => {}
                }
            }
            if !dispatched {
                break;
            }
        }
    }

    /// Shorthand for [`accept`] with [`Direction::Inbound`]: decide
    /// whether an inbound multicast datagram is delivered and cached, or
    /// dropped.
    ///
    /// [`accept`]: #method.accept
    pub fn input(&mut self, frame: &[u8], now: Instant) -> bool {
        self.accept(frame, Direction::Inbound, now)
    }

    /// Process an incoming or outgoing multicast datagram and determine
    /// whether it should be dropped or accepted. Accepting caches the
    /// datagram and resets the governing timer.
    pub fn accept(&mut self, frame: &[u8], direction: Direction, now: Instant) -> bool {
        let ip = match Ipv6Packet::new_checked(frame) {
            Ok(ip) => ip,
            Err(_) => {
                self.stats.mcast_bad += 1;
                return false;
            }
        };
        let len = ip.total_len();

        if !ip.dst_addr().is_routable_multicast() {
            net_debug!("trickle: mcast I/O, bad destination");
            self.stats.mcast_bad += 1;
            return false;
        }
        // The seed may still be performing duplicate address detection or
        // waiting for a prefix.
        if ip.src_addr().is_unspecified() {
            net_debug!("trickle: mcast I/O, bad source");
            self.stats.mcast_bad += 1;
            return false;
        }
        if ip.next_header() != IpProtocol::HopByHop
            || (ip.payload_len() as usize) < HBH_TOTAL_LEN
            || len > config::BUFF_SIZE
        {
            net_debug!("trickle: mcast I/O, bad proto or length");
            self.stats.mcast_bad += 1;
            return false;
        }

        let hbh = HbhHeader::new_unchecked(&frame[IPV6_HEADER_LEN..IPV6_HEADER_LEN + HBH_TOTAL_LEN]);
        let opt = match TrickleOptionRepr::parse(&hbh.option()) {
            Ok(opt) => opt,
            Err(_) => {
                net_debug!("trickle: mcast I/O, bad HBHO");
                self.stats.mcast_bad += 1;
                return false;
            }
        };
        // The option length implies the seed layout; it must match ours.
        let mode_ok = match (self.config.seed_mode, opt.seed_id) {
            (SeedMode::Short, Some(_)) | (SeedMode::Long, None) => true,
            _ => false,
        };
        if !mode_ok {
            net_debug!("trickle: mcast I/O, bad HBHO length");
            self.stats.mcast_bad += 1;
            return false;
        }

        if direction == Direction::Inbound {
            self.stats.mcast_in_all += 1;
        }

        let seed_id = match opt.seed_id {
            Some(id) => SeedId::Short(id),
            None => SeedId::Long(ip.src_addr()),
        };
        let m = opt.m;
        let seq = SeqVal::new(opt.seq_val);

        net_trace!("trickle: mcast I/O seed {} m={} seq={}", seed_id, m, seq);

        let mut window = self.window_lookup(&seed_id, m);

        if let Some(w) = window {
            if let Some(lower) = self.windows[w].lower_bound {
                if seq < lower {
                    net_debug!("trickle: too old");
                    self.stats.mcast_dropped += 1;
                    return false;
                }
            }
            for i in (0..config::BUFF_NUM).rev() {
                let p = &self.buffers[i];
                if p.used && p.window as usize == w && p.seq_val == seq {
                    net_debug!("trickle: seen before");
                    self.stats.mcast_dropped += 1;
                    return false;
                }
            }
        }

        net_trace!("trickle: new message");

        if window.is_none() {
            window = self.window_allocate();
            net_debug!("trickle: new seed");
        }
        let Some(w) = window else {
            net_debug!("trickle: failed to allocate window");
            self.stats.mcast_dropped += 1;
            return false;
        };

        let packet = self.buffer_allocate().or_else(|| {
            net_debug!("trickle: buffer allocation failed, reclaiming");
            self.buffer_reclaim()
        });
        let Some(p) = packet else {
            net_debug!("trickle: buffer reclaim failed");
            // Roll back a window allocated just for this datagram.
            if self.windows[w].count == 0 {
                self.windows[w].used = false;
            }
            self.stats.mcast_dropped += 1;
            return false;
        };

        if direction == Direction::Inbound {
            self.stats.mcast_in_unique += 1;
        }

        // We have a window and we have a buffer. Accept this datagram.
        {
            let win = &mut self.windows[w];
            win.used = true;
            win.m = m;
            win.seed_id = seed_id;
            if win.count == 0 {
                win.lower_bound = Some(seq);
                win.upper_bound = Some(seq);
            } else if win.upper_bound.and_then(|upper| seq.partial_cmp(&upper))
                == Some(Ordering::Greater)
            {
                win.upper_bound = Some(seq);
            }
            win.count += 1;
        }

        {
            let p = &mut self.buffers[p];
            p.clear();
            p.data[..len].copy_from_slice(&frame[..len]);
            p.len = len as u16;
            p.seq_val = seq;
            p.window = w as u8;
            p.used = true;
            // An inbound datagram is forwarded by us, so its cached copy
            // loses a hop; we also owe the neighbourhood a transmission.
            // When we are the seed the caller transmits the original
            // right away, and the copy keeps its hop limit.
            if direction == Direction::Inbound {
                p.must_send = true;
                p.decrement_hop_limit();
            }
        }

        let mi = usize::from(m);
        self.timers[mi].inconsistency = true;
        net_debug!("trickle: inconsistency, reset timer {}", m);
        self.timers[mi].reset(now, &mut self.rand);

        true
    }

    /// Wrap the outgoing multicast datagram in `buf[..len]` with the
    /// Trickle Hop-by-Hop option, cache it, and transmit it. A datagram
    /// that cannot grow by the option block is dropped silently.
    pub fn out<S: Stack>(&mut self, stack: &mut S, buf: &mut [u8], len: usize, now: Instant) {
        let new_len = len + HBH_TOTAL_LEN;
        if len < IPV6_HEADER_LEN || new_len > buf.len() || new_len > config::BUFF_SIZE {
            net_debug!("trickle: mcast out, cannot add HBHO, packet too long");
            return;
        }

        // Slide the payload right to open a gap after the IPv6 header.
        buf.copy_within(IPV6_HEADER_LEN..len, IPV6_HEADER_LEN + HBH_TOTAL_LEN);
        buf[IPV6_HEADER_LEN..IPV6_HEADER_LEN + HBH_TOTAL_LEN].fill(0);

        let next_header = Ipv6Packet::new_unchecked(&buf[..]).next_header();

        self.last_seq = self.last_seq.add(1);
        let seed_id = match self.config.seed_mode {
            SeedMode::Short => {
                let hardware_addr = stack.hardware_addr();
                Some(NetworkEndian::read_u16(
                    &hardware_addr[hardware_addr.len() - 2..],
                ))
            }
            SeedMode::Long => None,
        };
        let opt = TrickleOptionRepr {
            seed_id,
            m: u8::from(self.config.set_m_bit),
            seq_val: self.last_seq.value(),
        };

        let mut hbh =
            HbhHeader::new_unchecked(&mut buf[IPV6_HEADER_LEN..IPV6_HEADER_LEN + HBH_TOTAL_LEN]);
        hbh.set_next_header(next_header);
        hbh.set_header_len(0);
        opt.emit(&mut hbh.option_mut());

        let mut ip = Ipv6Packet::new_unchecked(&mut buf[..]);
        ip.set_next_header(IpProtocol::HopByHop);
        ip.set_payload_len((new_len - IPV6_HEADER_LEN) as u16);

        net_trace!("trickle: mcast out, seq {}", self.last_seq);

        // Cache and advertise our own datagram, otherwise the neighbours
        // would consider us inconsistent and bounce it back. The timer
        // reset inside the accept path covers the immediate transmission,
        // so the cached copy keeps must-send clear.
        if self.accept(&buf[..new_len], Direction::Outbound, now) {
            stack.transmit(&buf[..new_len]);
            self.stats.mcast_out += 1;
        }
    }

    /// Consume one ICMPv6 Trickle multicast advertisement and cross-check
    /// it against the buffered datagrams, flagging inconsistencies on the
    /// affected timers.
    pub fn icmp_input(&mut self, frame: &[u8], now: Instant) {
        let ip = match Ipv6Packet::new_checked(frame) {
            Ok(ip) => ip,
            Err(_) => {
                self.stats.icmp_bad += 1;
                return;
            }
        };

        if !ip.src_addr().is_link_local() {
            net_debug!("trickle: ICMPv6 in, bad source");
            self.stats.icmp_bad += 1;
            return;
        }
        let dst = ip.dst_addr();
        if dst != Ipv6Address::LINK_LOCAL_ALL_NODES && dst != Ipv6Address::LINK_LOCAL_ALL_ROUTERS {
            net_debug!("trickle: ICMPv6 in, bad destination");
            self.stats.icmp_bad += 1;
            return;
        }
        if ip.next_header() != IpProtocol::Icmpv6 || ip.hop_limit() != self.config.ip_hop_limit {
            net_debug!("trickle: ICMPv6 in, bad protocol or hop limit");
            self.stats.icmp_bad += 1;
            return;
        }
        let icmp = match Icmpv6Packet::new_checked(ip.payload()) {
            Ok(icmp) => icmp,
            Err(_) => {
                self.stats.icmp_bad += 1;
                return;
            }
        };
        if icmp.msg_type() != Icmpv6Message::TrickleMulticast
            || icmp.msg_code() != self.config.icmp_code
        {
            net_debug!("trickle: ICMPv6 in, bad type or code");
            self.stats.icmp_bad += 1;
            return;
        }

        net_trace!("trickle: ICMPv6 in from {}", ip.src_addr());
        self.stats.icmp_in += 1;

        for w in self.windows.iter_mut() {
            w.listed = false;
        }
        for p in self.buffers.iter_mut() {
            p.listed = false;
        }

        // First pass over the advertised entries: "they have new" and
        // matching of listed values against our buffers.
        let mut violation = false;
        for entry in SeqListIterator::new(icmp.payload()) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(_) => {
                    net_debug!("trickle: ICMPv6 in, bad entry");
                    self.stats.icmp_bad += 1;
                    violation = true;
                    break;
                }
            };
            if entry.seed_id().mode() != self.config.seed_mode {
                net_debug!("trickle: ICMPv6 in, seed length mismatch");
                self.stats.icmp_bad += 1;
                violation = true;
                break;
            }

            let mi = usize::from(entry.m());
            match self.window_lookup(&entry.seed_id(), entry.m()) {
                Some(w) => {
                    self.windows[w].listed = true;
                    self.windows[w].min_listed = None;
                    let lower = self.windows[w].lower_bound;
                    let upper = self.windows[w].upper_bound;

                    for val in entry.seq_values() {
                        let val = SeqVal::new(val);

                        // An advertised value above our upper bound means
                        // the neighbourhood holds datagrams we missed.
                        if let Some(upper) = upper {
                            if val.partial_cmp(&upper) == Some(Ordering::Greater) {
                                net_debug!("trickle: inconsistency, {} above bounds", val);
                                self.timers[mi].inconsistency = true;
                            }
                        }

                        // A value within our bounds must be in our buffer.
                        let within = match (lower, upper) {
                            (Some(lower), Some(upper)) => {
                                matches!(
                                    val.partial_cmp(&upper),
                                    Some(Ordering::Less | Ordering::Equal)
                                ) && matches!(
                                    val.partial_cmp(&lower),
                                    Some(Ordering::Greater | Ordering::Equal)
                                )
                            }
                            _ => false,
                        };
                        if !within {
                            continue;
                        }

                        let mut held = false;
                        for i in (0..config::BUFF_NUM).rev() {
                            let p = &self.buffers[i];
                            if p.used && p.window as usize == w && p.seq_val == val {
                                held = true;
                                self.buffers[i].listed = true;
                                // Track the lowest listed value; the "we
                                // have new" pass needs it.
                                let new_min = match self.windows[w].min_listed {
                                    None => true,
                                    Some(min) => val.partial_cmp(&min) == Some(Ordering::Less),
                                };
                                if new_min {
                                    self.windows[w].min_listed = Some(val);
                                }
                                break;
                            }
                        }
                        if !held {
                            net_debug!("trickle: inconsistency, {} within bounds but not held", val);
                            self.timers[mi].inconsistency = true;
                        }
                    }
                }
                None => {
                    // The draft does not call an unknown advertised window
                    // an inconsistency; treating it as one is a deliberate
                    // extension.
                    net_debug!("trickle: inconsistency, advertised window unknown");
                    self.timers[mi].inconsistency = true;
                }
            }
        }

        // Second pass over our buffers: "we have new", anything the sender
        // did not list.
        if !violation {
            for i in (0..config::BUFF_NUM).rev() {
                if !self.buffers[i].used {
                    continue;
                }
                let w = self.buffers[i].window as usize;
                let mi = usize::from(self.windows[w].m);
                if !self.windows[w].listed {
                    net_debug!("trickle: inconsistency, seed {} not listed", self.windows[w].seed_id);
                    self.timers[mi].inconsistency = true;
                    self.buffers[i].must_send = true;
                } else if !self.buffers[i].listed {
                    if let Some(min) = self.windows[w].min_listed {
                        if self.buffers[i].seq_val.partial_cmp(&min) == Some(Ordering::Greater) {
                            net_debug!(
                                "trickle: inconsistency, {} not listed but {} was",
                                self.buffers[i].seq_val,
                                min
                            );
                            self.timers[mi].inconsistency = true;
                            self.buffers[i].must_send = true;
                        }
                    }
                }
            }
        }

        for m in 0..2 {
            if self.timers[m].inconsistency {
                self.timers[m].reset(now, &mut self.rand);
            } else {
                self.timers[m].c += 1;
            }
        }
    }

    /// The transmit-point pass of timer `m`: advance packet lifetimes,
    /// evict expired datagrams, re-transmit what is due, advertise, and
    /// arm the interval end.
    fn transmit_point<S: Stack>(&mut self, stack: &mut S, m: usize, now: Instant) {
        // Without a link-local address no I/O can happen; try again after
        // a fresh minimum interval.
        if stack.link_local_address().is_none() {
            net_debug!("trickle: periodic pass suppressed, stack not ready");
            self.timers[m].reset(now, &mut self.rand);
            return;
        }

        let diff_last = now - self.timers[m].t_last_trigger;
        let diff_start = now - self.timers[m].t_start;
        self.timers[m].t_last_trigger = now;

        net_trace!(
            "trickle: m={} periodic, diff from last {}, from start {}",
            m,
            diff_last,
            diff_start
        );

        let suppression = self.timers[m].suppression_enabled();
        let active_budget = self.timers[m].active_budget();
        let dwell_budget = self.timers[m].dwell_budget();

        for i in (0..config::BUFF_NUM).rev() {
            if !self.buffers[i].used {
                continue;
            }
            let w = self.buffers[i].window as usize;
            if usize::from(self.windows[w].m) != m {
                continue;
            }

            // A packet with a zero lifetime arrived during the last
            // interval, and its reception reset us; it arrived at about
            // t_start. Anything older ages by the time since the last
            // pass.
            {
                let p = &mut self.buffers[i];
                if p.active == Duration::ZERO {
                    p.active += diff_start;
                    p.dwell += diff_start;
                } else {
                    p.active += diff_last;
                    p.dwell += diff_last;
                }
            }

            if self.buffers[i].dwell > dwell_budget {
                net_debug!(
                    "trickle: m={} free packet {}, window count {}",
                    m,
                    self.buffers[i].seq_val,
                    self.windows[w].count - 1
                );
                self.windows[w].count -= 1;
                if self.windows[w].count == 0 {
                    self.windows[w].used = false;
                }
                self.buffers[i].clear();
            } else if self.buffers[i].hop_limit() > 0 {
                let due = {
                    let p = &self.buffers[i];
                    (suppression && p.must_send)
                        || (!suppression && p.active < active_budget)
                };
                if due {
                    net_debug!(
                        "trickle: m={} periodic, sending seq {}",
                        m,
                        self.buffers[i].seq_val
                    );
                    stack.transmit(self.buffers[i].datagram());
                    self.stats.mcast_fwd += 1;
                    self.buffers[i].must_send = false;
                    stack.kick_watchdog();
                }
            }
        }

        if suppression && self.timers[m].c < self.timers[m].params().k {
            self.icmp_output(stack);
        }

        // Done handling inconsistencies for this timer.
        self.timers[m].inconsistency = false;
        self.timers[m].c = 0;

        self.window_update_bounds();

        self.timers[m].schedule_interval_end(now);
    }

    /// Advertise every non-empty window in one ICMPv6 sequence-list
    /// message.
    fn icmp_output<S: Stack>(&mut self, stack: &mut S) {
        let mut frame = [0u8; IPV6_HEADER_LEN + ICMPV6_HEADER_LEN + ICMP_PAYLOAD_MAX];
        let mut payload_len = 0;

        net_trace!("trickle: ICMPv6 out");

        for wi in (0..config::WINS).rev() {
            if !self.windows[wi].used || self.windows[wi].count == 0 {
                continue;
            }

            let mut seqs = heapless::Vec::new();
            for i in (0..config::BUFF_NUM).rev() {
                let p = &self.buffers[i];
                if p.used && p.window as usize == wi && seqs.push(p.seq_val.value()).is_err() {
                    net_debug!("trickle: ICMPv6 out, entry truncated");
                    break;
                }
            }

            let entry = SeqListRepr {
                seed_id: self.windows[wi].seed_id,
                m: self.windows[wi].m,
                seqs,
            };
            let payload = &mut frame[IPV6_HEADER_LEN + ICMPV6_HEADER_LEN..];
            entry.emit(&mut payload[payload_len..payload_len + entry.buffer_len()]);
            payload_len += entry.buffer_len();
        }

        let dst = if self.config.dest_all_nodes {
            Ipv6Address::LINK_LOCAL_ALL_NODES
        } else {
            Ipv6Address::LINK_LOCAL_ALL_ROUTERS
        };
        let src = stack.select_source_address(&dst);

        let ip_repr = Ipv6Repr {
            src_addr: src,
            dst_addr: dst,
            next_header: IpProtocol::Icmpv6,
            payload_len: ICMPV6_HEADER_LEN + payload_len,
            hop_limit: self.config.ip_hop_limit,
        };
        ip_repr.emit(&mut Ipv6Packet::new_unchecked(&mut frame[..]));

        let end = IPV6_HEADER_LEN + ICMPV6_HEADER_LEN + payload_len;
        let mut icmp = Icmpv6Packet::new_unchecked(&mut frame[IPV6_HEADER_LEN..end]);
        icmp.set_msg_type(Icmpv6Message::TrickleMulticast);
        icmp.set_msg_code(self.config.icmp_code);
        icmp.fill_checksum(&src, &dst);

        stack.transmit(&frame[..end]);
        self.stats.icmp_out += 1;
    }

    /// Claim the first free window slot, scanning from the top.
    fn window_allocate(&mut self) -> Option<usize> {
        (0..config::WINS).rev().find(|&i| !self.windows[i].used).map(|i| {
            self.windows[i].reset();
            self.windows[i].used = true;
            i
        })
    }

    /// Find the live window for `(seed id, m)`.
    fn window_lookup(&self, seed_id: &SeedId, m: u8) -> Option<usize> {
        (0..config::WINS).rev().find(|&i| {
            let w = &self.windows[i];
            w.used && w.m == m && w.seed_id == *seed_id
        })
    }

    /// Recompute every live window's bounds from the buffered packets.
    fn window_update_bounds(&mut self) {
        for w in self.windows.iter_mut() {
            w.lower_bound = None;
            w.upper_bound = None;
        }

        for i in (0..config::BUFF_NUM).rev() {
            if !self.buffers[i].used {
                continue;
            }
            let w = self.buffers[i].window as usize;
            let seq = self.buffers[i].seq_val;
            self.windows[w].extend_bounds(seq);
        }
    }

    /// Claim the first free packet buffer, scanning from the top.
    fn buffer_allocate(&mut self) -> Option<usize> {
        (0..config::BUFF_NUM).rev().find(|&i| !self.buffers[i].used)
    }

    /// Evict the oldest packet of the most crowded window and hand its
    /// buffer out. Refuses when even the most crowded window is down to a
    /// single packet: no window may be starved below one.
    fn buffer_reclaim(&mut self) -> Option<usize> {
        let mut largest: Option<usize> = None;
        for i in (0..config::WINS).rev() {
            if !self.windows[i].used {
                continue;
            }
            match largest {
                Some(l) if self.windows[i].count <= self.windows[l].count => {}
                _ => largest = Some(i),
            }
        }
        let largest = largest?;
        if self.windows[largest].count <= 1 {
            return None;
        }

        let lower = self.windows[largest].lower_bound;
        for i in (0..config::BUFF_NUM).rev() {
            let p = &self.buffers[i];
            if p.used && p.window as usize == largest && Some(p.seq_val) == lower {
                net_debug!(
                    "trickle: reclaim seq {} from seed {}",
                    p.seq_val,
                    self.windows[largest].seed_id
                );
                self.buffers[i].clear();
                self.windows[largest].count -= 1;
                self.window_update_bounds();
                return Some(i);
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec::Vec;

    const T0: Instant = Instant::from_millis_const(0);

    fn scenario_params() -> [TrickleParams; 2] {
        [
            TrickleParams {
                i_min: Duration::from_millis(100),
                i_max: 4,
                k: 2,
                t_active: 3,
                t_dwell: 5,
            },
            TrickleParams::CONSERVATIVE,
        ]
    }

    fn short_seed_config() -> Config {
        Config {
            seed_mode: SeedMode::Short,
            set_m_bit: false,
            rand_seed: 0,
            params: scenario_params(),
            ..Config::default()
        }
    }

    struct TestStack {
        link_local: Option<Ipv6Address>,
        hardware_addr: [u8; 8],
        transmitted: Vec<Vec<u8>>,
    }

    impl Default for TestStack {
        fn default() -> TestStack {
            TestStack {
                link_local: Some(Ipv6Address::new(0xfe80, 0, 0, 0, 0, 0, 0, 1)),
                hardware_addr: [0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0xab, 0xcd],
                transmitted: Vec::new(),
            }
        }
    }

    impl Stack for TestStack {
        fn link_local_address(&self) -> Option<Ipv6Address> {
            self.link_local
        }

        fn select_source_address(&self, _dst: &Ipv6Address) -> Ipv6Address {
            self.link_local.unwrap_or(Ipv6Address::UNSPECIFIED)
        }

        fn hardware_addr(&self) -> &[u8] {
            &self.hardware_addr
        }

        fn transmit(&mut self, frame: &[u8]) {
            self.transmitted.push(frame.to_vec());
        }
    }

    fn zeroed(len: usize) -> Vec<u8> {
        let mut buffer = Vec::new();
        buffer.resize(len, 0);
        buffer
    }

    fn routable_group() -> Ipv6Address {
        Ipv6Address::new(0xff03, 0, 0, 0, 0, 0, 0, 0xfc)
    }

    /// An inbound multicast datagram carrying the Trickle option with a
    /// short seed.
    fn mcast_frame(seed_id: u16, m: u8, seq_val: u16, hop_limit: u8) -> Vec<u8> {
        let mut frame = zeroed(IPV6_HEADER_LEN + HBH_TOTAL_LEN);
        Ipv6Repr {
            src_addr: Ipv6Address::new(0xfe80, 0, 0, 0, 0, 0, 0, 0x99),
            dst_addr: routable_group(),
            next_header: IpProtocol::HopByHop,
            payload_len: HBH_TOTAL_LEN,
            hop_limit,
        }
        .emit(&mut Ipv6Packet::new_unchecked(&mut frame[..]));

        let mut hbh = HbhHeader::new_unchecked(&mut frame[IPV6_HEADER_LEN..]);
        hbh.set_next_header(IpProtocol::Udp);
        hbh.set_header_len(0);
        TrickleOptionRepr {
            seed_id: Some(seed_id),
            m,
            seq_val,
        }
        .emit(&mut hbh.option_mut());

        frame
    }

    /// A Trickle multicast advertisement from `src`, one payload entry per
    /// `(seed, m, sequence values)` triple.
    fn icmp_frame(src: Ipv6Address, entries: &[(SeedId, u8, &[u16])], hop_limit: u8) -> Vec<u8> {
        let mut payload = Vec::new();
        for (seed_id, m, seqs) in entries {
            let mut vals = heapless::Vec::new();
            for seq in *seqs {
                vals.push(*seq).unwrap();
            }
            let entry = SeqListRepr {
                seed_id: *seed_id,
                m: *m,
                seqs: vals,
            };
            let start = payload.len();
            payload.resize(start + entry.buffer_len(), 0);
            entry.emit(&mut payload[start..]);
        }

        let dst = Ipv6Address::LINK_LOCAL_ALL_ROUTERS;
        let mut frame = zeroed(IPV6_HEADER_LEN + ICMPV6_HEADER_LEN + payload.len());
        Ipv6Repr {
            src_addr: src,
            dst_addr: dst,
            next_header: IpProtocol::Icmpv6,
            payload_len: ICMPV6_HEADER_LEN + payload.len(),
            hop_limit,
        }
        .emit(&mut Ipv6Packet::new_unchecked(&mut frame[..]));
        frame[IPV6_HEADER_LEN + ICMPV6_HEADER_LEN..].copy_from_slice(&payload);

        let mut icmp = Icmpv6Packet::new_unchecked(&mut frame[IPV6_HEADER_LEN..]);
        icmp.set_msg_type(Icmpv6Message::TrickleMulticast);
        icmp.set_msg_code(0);
        icmp.fill_checksum(&src, &dst);

        frame
    }

    fn advert(entries: &[(SeedId, u8, &[u16])]) -> Vec<u8> {
        icmp_frame(Ipv6Address::new(0xfe80, 0, 0, 0, 0, 0, 0, 2), entries, 0xff)
    }

    /// The structural invariants every public entry point must preserve.
    fn check_invariants(f: &Forwarder) {
        for (wi, w) in f.windows.iter().enumerate() {
            if !w.used {
                continue;
            }
            let live = f
                .buffers
                .iter()
                .filter(|p| p.used && p.window as usize == wi)
                .count();
            assert_eq!(w.count as usize, live, "window count out of sync");
        }

        for p in f.buffers.iter().filter(|p| p.used) {
            let w = &f.windows[p.window as usize];
            assert!(w.used && w.count > 0, "packet points at a dead window");
            let lower = w.lower_bound.unwrap();
            let upper = w.upper_bound.unwrap();
            assert_ne!(
                p.seq_val.partial_cmp(&lower),
                Some(Ordering::Less),
                "packet below window bounds"
            );
            assert_ne!(
                p.seq_val.partial_cmp(&upper),
                Some(Ordering::Greater),
                "packet above window bounds"
            );
            assert!(p.dwell >= p.active, "dwell below active");
        }

        for i in 0..config::WINS {
            for j in 0..i {
                let (a, b) = (&f.windows[i], &f.windows[j]);
                if a.used && b.used {
                    assert!(
                        !(a.seed_id == b.seed_id && a.m == b.m),
                        "two windows for one (seed, m)"
                    );
                }
            }
        }

        for i in 0..config::BUFF_NUM {
            for j in 0..i {
                let (a, b) = (&f.buffers[i], &f.buffers[j]);
                if a.used && b.used {
                    assert!(
                        !(a.window == b.window && a.seq_val == b.seq_val),
                        "two packets for one (window, seq)"
                    );
                }
            }
        }

        assert!(f.last_seq.value() < 0x8000);
    }

    #[test]
    fn s1_fresh_seed_single_inbound() {
        let now = Instant::from_millis(1000);
        let mut f = Forwarder::new(short_seed_config(), T0);
        let frame = mcast_frame(0xbeef, 0, 0x0001, 5);

        assert!(f.accept(&frame, Direction::Inbound, now));

        let w = f.window_lookup(&SeedId::Short(0xbeef), 0).unwrap();
        assert_eq!(f.windows[w].count, 1);
        assert_eq!(f.windows[w].lower_bound, Some(SeqVal::new(1)));
        assert_eq!(f.windows[w].upper_bound, Some(SeqVal::new(1)));

        let p = f.buffers.iter().find(|p| p.used).unwrap();
        assert_eq!(p.hop_limit(), 4);
        assert!(p.must_send);

        assert!(f.timers[0].inconsistency);
        assert_eq!(f.timers[0].t_start, now);
        assert_eq!(f.timers[0].t_end, now + Duration::from_millis(100));
        assert_eq!(f.timers[0].i_current, 0);
        assert_eq!(f.timers[0].c, 0);

        assert_eq!(f.stats.mcast_in_all, 1);
        assert_eq!(f.stats.mcast_in_unique, 1);
        check_invariants(&f);
    }

    #[test]
    fn s2_duplicate_changes_nothing_but_stats() {
        let mut f = Forwarder::new(short_seed_config(), T0);
        let frame = mcast_frame(0xbeef, 0, 0x0001, 5);

        assert!(f.accept(&frame, Direction::Inbound, T0));
        let w = f.window_lookup(&SeedId::Short(0xbeef), 0).unwrap();

        for round in 1..=2u32 {
            assert!(!f.accept(&frame, Direction::Inbound, T0));
            assert_eq!(f.stats.mcast_dropped, round);
            assert_eq!(f.windows[w].count, 1);
            assert_eq!(f.stats.mcast_in_unique, 1);
            check_invariants(&f);
        }
    }

    #[test]
    fn accept_rejects_malformed_input() {
        let mut f = Forwarder::new(short_seed_config(), T0);

        // Non-routable (link-local scope) group.
        let mut frame = mcast_frame(0xbeef, 0, 1, 5);
        Ipv6Packet::new_unchecked(&mut frame[..]).set_dst_addr(Ipv6Address::LINK_LOCAL_ALL_NODES);
        assert!(!f.accept(&frame, Direction::Inbound, T0));

        // Unspecified source.
        let mut frame = mcast_frame(0xbeef, 0, 1, 5);
        Ipv6Packet::new_unchecked(&mut frame[..]).set_src_addr(Ipv6Address::UNSPECIFIED);
        assert!(!f.accept(&frame, Direction::Inbound, T0));

        // Next header is not Hop-by-Hop.
        let mut frame = mcast_frame(0xbeef, 0, 1, 5);
        Ipv6Packet::new_unchecked(&mut frame[..]).set_next_header(IpProtocol::Udp);
        assert!(!f.accept(&frame, Direction::Inbound, T0));

        // First option is not the Trickle option.
        let mut frame = mcast_frame(0xbeef, 0, 1, 5);
        frame[IPV6_HEADER_LEN + 2] = 0x63;
        assert!(!f.accept(&frame, Direction::Inbound, T0));

        // Long-seed layout while the engine runs short seeds.
        let mut frame = mcast_frame(0xbeef, 0, 1, 5);
        let mut hbh = HbhHeader::new_unchecked(&mut frame[IPV6_HEADER_LEN..]);
        TrickleOptionRepr {
            seed_id: None,
            m: 0,
            seq_val: 1,
        }
        .emit(&mut hbh.option_mut());
        assert!(!f.accept(&frame, Direction::Inbound, T0));

        assert_eq!(f.stats.mcast_bad, 5);
        assert_eq!(f.stats.mcast_in_all, 0);
        assert!(f.windows.iter().all(|w| !w.used));
        assert!(f.buffers.iter().all(|p| !p.used));
    }

    #[test]
    fn accept_rejects_stale_sequence() {
        let mut f = Forwarder::new(short_seed_config(), T0);
        assert!(f.accept(&mcast_frame(0xbeef, 0, 5, 5), Direction::Inbound, T0));

        assert!(!f.accept(&mcast_frame(0xbeef, 0, 3, 5), Direction::Inbound, T0));
        assert_eq!(f.stats.mcast_dropped, 1);
        check_invariants(&f);
    }

    #[test]
    fn same_seed_different_parametrization_gets_its_own_window() {
        let mut f = Forwarder::new(short_seed_config(), T0);
        assert!(f.accept(&mcast_frame(0xbeef, 0, 1, 5), Direction::Inbound, T0));
        assert!(f.accept(&mcast_frame(0xbeef, 1, 1, 5), Direction::Inbound, T0));

        let w0 = f.window_lookup(&SeedId::Short(0xbeef), 0).unwrap();
        let w1 = f.window_lookup(&SeedId::Short(0xbeef), 1).unwrap();
        assert_ne!(w0, w1);
        assert!(f.timers[0].inconsistency);
        assert!(f.timers[1].inconsistency);
        check_invariants(&f);
    }

    #[test]
    fn s3_serial_wrap_on_originate() {
        let mut f = Forwarder::new(short_seed_config(), T0);
        let mut stack = TestStack::default();
        f.last_seq = SeqVal::new(0x7ffe);

        // Low two octets of the link-layer address.
        let seed_id = SeedId::Short(0xabcd);
        let mut emitted = Vec::new();

        for _ in 0..3 {
            let len = IPV6_HEADER_LEN + 8;
            let mut buf = zeroed(len + HBH_TOTAL_LEN);
            Ipv6Repr {
                src_addr: Ipv6Address::new(0xfe80, 0, 0, 0, 0, 0, 0, 1),
                dst_addr: routable_group(),
                next_header: IpProtocol::Udp,
                payload_len: 8,
                hop_limit: 8,
            }
            .emit(&mut Ipv6Packet::new_unchecked(&mut buf[..]));

            f.out(&mut stack, &mut buf, len, T0);

            let sent = stack.transmitted.last().unwrap();
            assert_eq!(
                Ipv6Packet::new_unchecked(&sent[..]).next_header(),
                IpProtocol::HopByHop
            );
            let hbh = HbhHeader::new_unchecked(&sent[IPV6_HEADER_LEN..]);
            let opt = TrickleOptionRepr::parse(&hbh.option()).unwrap();
            assert_eq!(hbh.next_header(), IpProtocol::Udp);
            emitted.push(opt.seq_val);

            let w = f.window_lookup(&seed_id, 0).unwrap();
            assert_eq!(f.windows[w].upper_bound, Some(SeqVal::new(opt.seq_val)));
            assert_eq!(f.windows[w].lower_bound, Some(SeqVal::new(0x7fff)));
            check_invariants(&f);
        }

        assert_eq!(emitted, [0x7fff, 0x0000, 0x0001]);
        assert_eq!(f.stats.mcast_out, 3);
        assert_eq!(f.last_seq, SeqVal::new(0x0001));

        // We are the seed: the cached copies keep their hop limit and owe
        // the neighbourhood nothing until someone asks.
        for p in f.buffers.iter().filter(|p| p.used) {
            assert_eq!(p.hop_limit(), 8);
            assert!(!p.must_send);
        }
    }

    #[test]
    fn originate_drops_oversized_datagram() {
        let mut f = Forwarder::new(short_seed_config(), T0);
        let mut stack = TestStack::default();

        let len = IPV6_HEADER_LEN + 8;
        let mut buf = zeroed(len); // no room for the option block
        f.out(&mut stack, &mut buf, len, T0);

        assert!(stack.transmitted.is_empty());
        assert_eq!(f.stats.mcast_out, 0);
        assert!(f.buffers.iter().all(|p| !p.used));
    }

    #[test]
    fn forwarded_copy_lost_a_hop() {
        let mut f = Forwarder::new(short_seed_config(), T0);
        let mut stack = TestStack::default();
        assert!(f.accept(&mcast_frame(0xbeef, 0, 1, 5), Direction::Inbound, T0));

        let now = f.poll_at();
        f.poll(&mut stack, now);

        let data_frames: Vec<_> = stack
            .transmitted
            .iter()
            .filter(|frame| {
                Ipv6Packet::new_unchecked(&frame[..]).next_header() == IpProtocol::HopByHop
            })
            .collect();
        assert_eq!(data_frames.len(), 1);
        assert_eq!(Ipv6Packet::new_unchecked(&data_frames[0][..]).hop_limit(), 4);
        assert_eq!(f.stats.mcast_fwd, 1);

        // Sent once; the must-send flag is consumed.
        assert!(f.buffers.iter().filter(|p| p.used).all(|p| !p.must_send));
    }

    #[test]
    fn s4_dwell_expiry_frees_packet_and_window() {
        let mut f = Forwarder::new(short_seed_config(), T0);
        let mut stack = TestStack::default();
        assert!(f.accept(&mcast_frame(0xbeef, 0, 1, 5), Direction::Inbound, T0));

        // T_dwell = 5 x (100 << 4) = 8000 ms; drive well past it.
        let mut now = f.poll_at();
        while now < Instant::from_millis(20_000) {
            f.poll(&mut stack, now);
            check_invariants(&f);
            now = f.poll_at();
        }

        assert!(f.buffers.iter().all(|p| !p.used));
        assert!(f.windows.iter().all(|w| !w.used));

        // Beyond the dwell deadline only advertisements leave the node.
        stack.transmitted.clear();
        while now < Instant::from_millis(30_000) {
            f.poll(&mut stack, now);
            now = f.poll_at();
        }
        assert!(!stack.transmitted.is_empty());
        for frame in &stack.transmitted {
            assert_eq!(
                Ipv6Packet::new_unchecked(&frame[..]).next_header(),
                IpProtocol::Icmpv6
            );
        }
    }

    /// Set up a window for seed `0xbeef` holding sequence values 7 and 9,
    /// with the post-accept inconsistency already consumed by one
    /// transmit-point pass.
    fn two_buffered_packets() -> (Forwarder, TestStack, Instant) {
        let mut f = Forwarder::new(short_seed_config(), T0);
        let mut stack = TestStack::default();
        assert!(f.accept(&mcast_frame(0xbeef, 0, 7, 5), Direction::Inbound, T0));
        assert!(f.accept(&mcast_frame(0xbeef, 0, 9, 5), Direction::Inbound, T0));

        let now = f.poll_at();
        f.poll(&mut stack, now);
        assert!(!f.timers[0].inconsistency);
        assert_eq!(f.timers[0].c, 0);

        (f, stack, now)
    }

    #[test]
    fn s5_consistent_advertisement_counts_up() {
        let (mut f, _stack, now) = two_buffered_packets();
        let t_start = f.timers[0].t_start;

        f.icmp_input(&advert(&[(SeedId::Short(0xbeef), 0, &[7, 9])]), now);

        assert!(!f.timers[0].inconsistency);
        assert_eq!(f.timers[0].c, 1);
        assert_eq!(f.timers[0].t_start, t_start);
        assert!(f.buffers.iter().filter(|p| p.used).all(|p| !p.must_send));
        assert_eq!(f.stats.icmp_in, 1);
        assert_eq!(f.stats.icmp_bad, 0);
        check_invariants(&f);
    }

    #[test]
    fn s6_unlisted_newer_value_must_be_sent() {
        let (mut f, _stack, now) = two_buffered_packets();

        f.icmp_input(&advert(&[(SeedId::Short(0xbeef), 0, &[7])]), now);

        assert!(f.timers[0].inconsistency);
        assert_eq!(f.timers[0].c, 0);
        assert_eq!(f.timers[0].t_start, now); // reset

        let nine = f
            .buffers
            .iter()
            .find(|p| p.used && p.seq_val == SeqVal::new(9))
            .unwrap();
        assert!(nine.must_send);
        let seven = f
            .buffers
            .iter()
            .find(|p| p.used && p.seq_val == SeqVal::new(7))
            .unwrap();
        assert!(!seven.must_send);
        check_invariants(&f);
    }

    #[test]
    fn advertised_value_above_our_bounds_is_inconsistency() {
        let (mut f, _stack, now) = two_buffered_packets();

        f.icmp_input(&advert(&[(SeedId::Short(0xbeef), 0, &[7, 9, 12])]), now);

        assert!(f.timers[0].inconsistency);
        assert_eq!(f.timers[0].t_start, now);
        check_invariants(&f);
    }

    #[test]
    fn advertised_hole_within_our_bounds_is_inconsistency() {
        let (mut f, _stack, now) = two_buffered_packets();

        // 8 is within [7, 9] but we do not hold it.
        f.icmp_input(&advert(&[(SeedId::Short(0xbeef), 0, &[7, 8, 9])]), now);

        assert!(f.timers[0].inconsistency);
        check_invariants(&f);
    }

    #[test]
    fn advertised_unknown_window_is_inconsistency() {
        let mut f = Forwarder::new(short_seed_config(), T0);
        let now = Instant::from_millis(10);

        f.icmp_input(&advert(&[(SeedId::Short(0xcafe), 0, &[1])]), now);

        assert_eq!(f.stats.icmp_in, 1);
        assert!(f.timers[0].inconsistency);
        assert_eq!(f.timers[0].t_start, now);
        // The other timer heard nothing wrong.
        assert!(!f.timers[1].inconsistency);
        assert_eq!(f.timers[1].c, 1);
    }

    #[test]
    fn icmp_input_rejects_bad_headers() {
        let (mut f, _stack, now) = two_buffered_packets();
        let entries = [(SeedId::Short(0xbeef), 0, &[7u16, 9][..])];
        let good_src = Ipv6Address::new(0xfe80, 0, 0, 0, 0, 0, 0, 2);
        let t_start = f.timers[0].t_start;

        // Wrong hop limit.
        f.icmp_input(&icmp_frame(good_src, &entries, 0x40), now);
        // Source is not link-local.
        let bad_src = Ipv6Address::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 2);
        f.icmp_input(&icmp_frame(bad_src, &entries, 0xff), now);
        // Wrong ICMP code.
        let mut frame = icmp_frame(good_src, &entries, 0xff);
        frame[IPV6_HEADER_LEN + 1] = 7;
        f.icmp_input(&frame, now);

        assert_eq!(f.stats.icmp_bad, 3);
        assert_eq!(f.stats.icmp_in, 0);
        // Rejected messages never touch the timers.
        assert_eq!(f.timers[0].t_start, t_start);
        assert_eq!(f.timers[0].c, 0);
        check_invariants(&f);
    }

    #[test]
    fn icmp_input_reserved_bits_abort_parsing() {
        let (mut f, _stack, now) = two_buffered_packets();

        // First entry flags an unknown window; the second carries reserved
        // bits and kills the parse. The "we have new" pass must not run,
        // but the inconsistency already recorded still resets its timer.
        let mut frame = advert(&[
            (SeedId::Short(0xcafe), 1, &[1]),
            (SeedId::Short(0xbeef), 0, &[7, 9]),
        ]);
        let second_entry = IPV6_HEADER_LEN + ICMPV6_HEADER_LEN + 6;
        frame[second_entry] |= 0x01;
        f.icmp_input(&frame, now);

        assert_eq!(f.stats.icmp_in, 1);
        assert_eq!(f.stats.icmp_bad, 1);
        // Parsing aborted before 0xbeef was listed, yet must-send stayed
        // clear because the second pass was skipped.
        assert!(f.buffers.iter().filter(|p| p.used).all(|p| !p.must_send));
        // Timer 1 heard the unknown-window inconsistency, timer 0 counts
        // the message as consistent.
        assert!(f.timers[1].inconsistency);
        assert_eq!(f.timers[1].t_start, now);
        assert_eq!(f.timers[0].c, 1);
        check_invariants(&f);
    }

    #[test]
    fn s7_reclaim_evicts_lower_bound_of_largest_window() {
        let mut f = Forwarder::new(short_seed_config(), T0);

        for seq in 1..=6u16 {
            assert!(f.accept(&mcast_frame(0x00aa, 0, seq, 5), Direction::Inbound, T0));
        }
        for seq in 1..=2u16 {
            assert!(f.accept(&mcast_frame(0x00bb, 0, seq, 5), Direction::Inbound, T0));
        }
        assert_eq!(f.buffers.iter().filter(|p| p.used).count(), config::BUFF_NUM);

        // A third seed shows up with the pool full.
        assert!(f.accept(&mcast_frame(0x00cc, 0, 1, 5), Direction::Inbound, T0));

        let wa = f.window_lookup(&SeedId::Short(0x00aa), 0).unwrap();
        assert_eq!(f.windows[wa].count, 5);
        assert_eq!(f.windows[wa].lower_bound, Some(SeqVal::new(2)));
        let wc = f.window_lookup(&SeedId::Short(0x00cc), 0).unwrap();
        assert_eq!(f.windows[wc].count, 1);
        assert_eq!(f.stats.mcast_dropped, 0);
        assert_eq!(f.buffers.iter().filter(|p| p.used).count(), config::BUFF_NUM);
        check_invariants(&f);
    }

    #[test]
    fn reclaim_refuses_when_largest_window_holds_one() {
        let mut f = Forwarder::new(short_seed_config(), T0);
        assert!(f.accept(&mcast_frame(0x00aa, 0, 1, 5), Direction::Inbound, T0));
        assert!(f.accept(&mcast_frame(0x00bb, 0, 1, 5), Direction::Inbound, T0));

        assert_eq!(f.buffer_reclaim(), None);
        check_invariants(&f);
    }

    #[test]
    fn reclaim_refusal_rolls_back_fresh_window() {
        let mut f = Forwarder::new(short_seed_config(), T0);
        assert!(f.accept(&mcast_frame(0x00aa, 0, 1, 5), Direction::Inbound, T0));
        assert!(f.accept(&mcast_frame(0x00bb, 0, 1, 5), Direction::Inbound, T0));
        assert!(f.accept(&mcast_frame(0x00cc, 0, 1, 5), Direction::Inbound, T0));

        // Burn the remaining buffers so that allocation fails while every
        // live window still holds a single packet.
        for p in f.buffers.iter_mut().filter(|p| !p.used) {
            p.used = true;
        }

        assert!(!f.accept(&mcast_frame(0x00dd, 0, 1, 5), Direction::Inbound, T0));
        assert_eq!(f.stats.mcast_dropped, 1);
        assert!(f.window_lookup(&SeedId::Short(0x00dd), 0).is_none());
        assert_eq!(f.windows.iter().filter(|w| w.used).count(), 3);
    }

    #[test]
    fn periodic_pass_requires_link_local() {
        let mut f = Forwarder::new(short_seed_config(), T0);
        let mut stack = TestStack {
            link_local: None,
            ..TestStack::default()
        };
        assert!(f.accept(&mcast_frame(0xbeef, 0, 1, 5), Direction::Inbound, T0));

        let now = f.poll_at();
        f.poll(&mut stack, now);

        assert!(stack.transmitted.is_empty());
        // The timer restarted instead of processing.
        assert_eq!(f.timers[0].t_start, now);
        let p = f.buffers.iter().find(|p| p.used).unwrap();
        assert_eq!(p.active, Duration::ZERO);
        check_invariants(&f);
    }

    #[test]
    fn advertisement_lists_every_window() {
        let (mut f, mut stack, now) = two_buffered_packets();
        assert!(f.accept(&mcast_frame(0xcafe, 1, 3, 5), Direction::Inbound, now));

        stack.transmitted.clear();
        f.icmp_output(&mut stack);

        let frame = &stack.transmitted[0];
        let ip = Ipv6Packet::new_unchecked(&frame[..]);
        assert_eq!(ip.next_header(), IpProtocol::Icmpv6);
        assert_eq!(ip.dst_addr(), Ipv6Address::LINK_LOCAL_ALL_ROUTERS);
        assert_eq!(ip.hop_limit(), 0xff);

        let src = ip.src_addr();
        let dst = ip.dst_addr();
        let icmp = Icmpv6Packet::new_checked(Ipv6Packet::new_unchecked(&frame[..]).payload())
            .unwrap();
        assert_eq!(icmp.msg_type(), Icmpv6Message::TrickleMulticast);
        assert!(icmp.verify_checksum(&src, &dst));

        let mut entries = Vec::new();
        for entry in SeqListIterator::new(icmp.payload()) {
            let entry = entry.unwrap();
            let mut seqs: Vec<u16> = entry.seq_values().collect();
            seqs.sort_unstable();
            entries.push((entry.seed_id(), entry.m(), seqs));
        }
        entries.sort_by_key(|(_, m, _)| *m);

        assert_eq!(entries.len(), 2);
        assert_eq!(
            entries[0],
            (SeedId::Short(0xbeef), 0, [7u16, 9].to_vec())
        );
        assert_eq!(entries[1], (SeedId::Short(0xcafe), 1, [3u16].to_vec()));
        assert_eq!(f.stats.icmp_out, 1);
    }
}
