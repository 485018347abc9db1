//! Byte plumbing between the relay core and the two transports.
//!
//! Four bounded pipes carry bytes between the hardware edges and the relay task. The relay only
//! ever touches them through [`PipePort`]'s non-blocking `try_read`/`try_write`, so a full pipe
//! surfaces to the core as a short write (a counted drop) and an empty one as a zero-byte read.
//! The pump tasks at the edges are the only places that await hardware:
//!
//! - serial receive and transmit run against the buffered UART, whose interrupt-driven ring
//!   buffers are the "MIDI UART service" proper; the transmit pump drains queued bytes to the wire
//!   at the wire's own pace, independent of link state, so accepted data never stalls;
//! - USB receive and transmit run against the MIDI class endpoints and do the event-packet
//!   (de)framing, since the host speaks 32-bit USB-MIDI packets rather than a byte stream.

use defmt::warn;
use embassy_stm32::usart::{BufferedUartRx, BufferedUartTx};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::pipe::Pipe;
use embassy_usb::class::midi::{Receiver, Sender};
use embassy_usb::driver::EndpointError;
use embedded_io_async::{Read, Write};
use midilink_lib::packet::{self, PacketEncoder};
use midilink_lib::relay::{BytePort, CHUNK_CAPACITY};

use crate::UsbDriver;

/// Capacity of each direction's pipe. Sized to absorb a few USB bursts while the relay catches
/// up; beyond that the bounded-loss policy applies.
const QUEUE_CAPACITY: usize = 256;

type RelayPipe = Pipe<CriticalSectionRawMutex, QUEUE_CAPACITY>;

/// Serial MIDI wire → relay.
static UART_INBOUND: RelayPipe = Pipe::new();
/// Relay → serial MIDI wire.
static UART_OUTBOUND: RelayPipe = Pipe::new();
/// USB host → relay.
static USB_INBOUND: RelayPipe = Pipe::new();
/// Relay → USB host.
static USB_OUTBOUND: RelayPipe = Pipe::new();

/// A pair of pipes presented to the relay core as one non-blocking transport.
pub struct PipePort {
    rx: &'static RelayPipe,
    tx: &'static RelayPipe,
}

impl PipePort {
    /// The relay's view of the serial MIDI port.
    pub fn uart() -> Self {
        Self {
            rx: &UART_INBOUND,
            tx: &UART_OUTBOUND,
        }
    }

    /// The relay's view of the USB MIDI stream.
    pub fn usb() -> Self {
        Self {
            rx: &USB_INBOUND,
            tx: &USB_OUTBOUND,
        }
    }
}

impl BytePort for PipePort {
    fn read_some(&mut self, buf: &mut [u8]) -> usize {
        self.rx.try_read(buf).unwrap_or(0)
    }

    fn write_some(&mut self, bytes: &[u8]) -> usize {
        self.tx.try_write(bytes).unwrap_or(0)
    }
}

/// Moves received serial bytes into the inbound pipe.
///
/// Line errors (framing, noise, overrun) are logged and skipped; to the relay they are
/// indistinguishable from a quiet wire, which is all the recovery serial MIDI allows.
#[embassy_executor::task]
pub async fn uart_rx_task(mut rx: BufferedUartRx<'static>) -> ! {
    let mut buf = [0u8; CHUNK_CAPACITY];
    loop {
        match rx.read(&mut buf).await {
            Ok(n) => UART_INBOUND.write_all(&buf[..n]).await,
            Err(e) => warn!("MIDI UART receive error: {}", e),
        }
    }
}

/// Drains the outbound pipe onto the serial wire.
///
/// Runs unconditionally for the lifetime of the device: bytes the relay has already queued keep
/// flowing to the wire at 31250 baud even while the USB link is down.
#[embassy_executor::task]
pub async fn uart_tx_task(mut tx: BufferedUartTx<'static>) -> ! {
    let mut buf = [0u8; CHUNK_CAPACITY];
    loop {
        let n = UART_OUTBOUND.read(&mut buf).await;
        if let Err(e) = tx.write_all(&buf[..n]).await {
            warn!("MIDI UART transmit error: {}", e);
        }
    }
}

/// Unpacks event packets from the host into the inbound pipe.
///
/// Packets addressed to a cable other than [`packet::VIRTUAL_CABLE`] are ignored. When the pipe is
/// full this task waits, which leaves further host data sitting in the endpoint — the device NAKs
/// rather than losing bytes that were never handed to the relay.
#[embassy_executor::task]
pub async fn usb_rx_task(mut receiver: Receiver<'static, UsbDriver>) -> ! {
    let mut packets = [0u8; 64];
    loop {
        receiver.wait_connection().await;
        let n = match receiver.read_packet(&mut packets).await {
            Ok(n) => n,
            Err(EndpointError::Disabled) => continue,
            Err(EndpointError::BufferOverflow) => {
                warn!("Oversized USB MIDI transfer discarded");
                continue;
            }
        };
        for event in packets[..n].chunks_exact(4) {
            if packet::cable_number(event) != packet::VIRTUAL_CABLE {
                continue;
            }
            let payload = packet::payload(event);
            if !payload.is_empty() {
                USB_INBOUND.write_all(payload).await;
            }
        }
    }
}

/// Frames outbound bytes into event packets and writes them to the host.
///
/// The encoder state spans chunks, so a message split across relay iterations still frames
/// correctly. A write failure means the link dropped mid-flight; the chunk is discarded, and the
/// relay stops feeding this pipe as soon as the unmount event reaches it.
#[embassy_executor::task]
pub async fn usb_tx_task(mut sender: Sender<'static, UsbDriver>) -> ! {
    let mut encoder = PacketEncoder::new(packet::VIRTUAL_CABLE);
    let mut raw = [0u8; CHUNK_CAPACITY];
    // one full-speed bulk transfer's worth of event packets
    let mut events = [0u8; 64];
    loop {
        let n = USB_OUTBOUND.read(&mut raw).await;
        let mut filled = 0;
        for &byte in &raw[..n] {
            if let Some(event) = encoder.push(byte) {
                events[filled..filled + 4].copy_from_slice(&event);
                filled += 4;
                if filled == events.len() {
                    let _ = sender.write_packet(&events[..filled]).await;
                    filled = 0;
                }
            }
        }
        if filled > 0 {
            let _ = sender.write_packet(&events[..filled]).await;
        }
    }
}
