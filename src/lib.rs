/*! Trickle-based IPv6 multicast forwarding for low-power mesh networks.

This crate implements the datagram forwarding engine of "Multicast
Forwarding Using Trickle" (draft-ietf-roll-trickle-mcast): nodes cache
multicast datagrams that carry a dedicated Hop-by-Hop option, advertise the
cached sequence values to their neighbours in ICMPv6 summaries, and
re-transmit under the suppression rules of the Trickle algorithm ([RFC 6206])
with two independent parametrizations running side by side.

The crate is split into two layers:

  - [`wire`] holds bounds-checked views and high-level representations of
    the on-wire structures: the IPv6 header, the Trickle Hop-by-Hop option
    and the ICMPv6 sequence-list message.
  - [`mcast`] holds the engine: sliding windows and packet buffers in
    fixed pools, RFC 1982 serial-number arithmetic over 15-bit sequence
    values, the two Trickle timers and the forwarding state machine.

The engine is `no_std`, allocation-free and single-threaded. It is driven
cooperatively: the host feeds it datagrams and control messages as they
arrive, calls [`mcast::Forwarder::poll`] whenever
[`mcast::Forwarder::poll_at`] says a timer is due, and provides link access
through the [`mcast::Stack`] trait.

Pool sizes are fixed at build time and can be tuned with the
`TRICKLE_MCAST_*` environment variables; see `build.rs`.

[RFC 6206]: https://datatracker.ietf.org/doc/html/rfc6206
*/

#![no_std]
#![deny(unsafe_code)]

#[cfg(any(feature = "std", test))]
#[macro_use]
extern crate std;

#[macro_use]
mod macros;

mod config;
mod rand;

pub mod mcast;
pub mod time;
pub mod wire;
