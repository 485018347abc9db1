//! This crate contains the architecture-agnostic core of MIDIlink, a fixed-function bridge between a
//! USB MIDI device interface and a classic [serial MIDI](https://midi.org/midi-1-0) port (31250-baud
//! UART). Bytes are relayed opaquely in both directions; when one transport cannot keep up with the
//! other, the excess is dropped in bounded chunks and accounted for, never buffered without limit.
//!
//! Everything here is synchronous and non-blocking so that it can be driven by a cooperative loop on
//! the target and by plain unit tests on the host. The hardware-facing half of the project lives in
//! the `midilink` firmware crate.

#![deny(missing_docs)]
#![no_std]

pub mod heartbeat;
pub mod link;
pub mod packet;
pub mod relay;
