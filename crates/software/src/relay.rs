//! The bidirectional relay at the heart of the bridge.
//!
//! Each call to [`Relay::run_iteration`] performs two one-shot, bounded transfers: serial MIDI in
//! toward the USB host, then USB MIDI out toward the serial port. Every step either makes
//! bounded-size progress or is a no-op; nothing here blocks, retries, or fails hard. When a
//! transport accepts fewer bytes than were staged, the difference is dropped and counted — a
//! deliberate policy, since the serial MIDI sender cannot be paused and a 31250-baud wire cannot
//! absorb USB bursts indefinitely.

use crate::link::{LinkEvent, LinkState};

/// Bytes staged per direction per iteration.
///
/// Also the upper bound on how many bytes can be lost by a single overflow event.
pub const CHUNK_CAPACITY: usize = 48;

/// A non-blocking, byte-oriented view of a transport.
///
/// Both the buffered UART and the USB MIDI stream are reduced to this interface. Implementations
/// must return immediately with however many bytes were actually moved — possibly zero, and never
/// necessarily as many as were requested.
pub trait BytePort {
    /// Read up to `buf.len()` bytes into `buf`, returning the count actually read.
    fn read_some(&mut self, buf: &mut [u8]) -> usize;

    /// Write as many of `bytes` as the transport will accept, returning the count taken.
    fn write_some(&mut self, bytes: &[u8]) -> usize;
}

/// Outcome of a single one-directional transfer step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransferReport {
    /// Bytes pulled from the source transport. These are gone from the source either way.
    pub read: usize,
    /// Bytes the destination transport accepted.
    pub forwarded: usize,
}

impl TransferReport {
    /// Bytes irrecoverably lost by this step.
    pub fn dropped(&self) -> usize {
        self.read - self.forwarded
    }
}

/// Outcome of one full relay iteration, one report per direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct IterationReport {
    /// Serial MIDI in → USB host.
    pub uart_to_usb: TransferReport,
    /// USB host → serial MIDI out.
    pub usb_to_uart: TransferReport,
}

/// Running totals of dropped bytes, per direction.
///
/// Saturating: after years of sustained overflow the counters pin at `u32::MAX` rather than wrap,
/// so loss accounting stays monotonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RelayStats {
    /// Bytes read from the serial port that never reached the USB host.
    pub uart_to_usb_dropped: u32,
    /// Bytes read from the USB host that never reached the serial output queue.
    pub usb_to_uart_dropped: u32,
}

/// The relay context: link state plus loss accounting.
///
/// Constructed once at startup and handed the two transports on every iteration, which keeps the
/// core free of global state and lets tests substitute mock transports.
#[derive(Debug, Default)]
pub struct Relay {
    link: LinkState,
    stats: RelayStats,
}

impl Relay {
    /// Create a relay with the link down and no losses recorded.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current link state.
    pub fn link(&self) -> LinkState {
        self.link
    }

    /// Accumulated drop counters.
    pub fn stats(&self) -> RelayStats {
        self.stats
    }

    /// Apply a USB lifecycle event to the link state.
    pub fn handle_event(&mut self, event: LinkEvent) {
        self.link = self.link.apply(event);
    }

    /// Run one cooperative pass: serial→USB, then USB→serial.
    ///
    /// The order matches the per-direction latency priorities of the original adapter: inbound
    /// performance data is staged for the host before host data is queued for the slow wire.
    pub fn run_iteration(
        &mut self,
        uart: &mut impl BytePort,
        usb: &mut impl BytePort,
    ) -> IterationReport {
        IterationReport {
            uart_to_usb: self.pump_uart_to_usb(uart, usb),
            usb_to_uart: self.pump_usb_to_uart(usb, uart),
        }
    }

    /// Move up to one chunk from the serial input buffer to the USB stream.
    ///
    /// The serial side is drained even while unlinked: the sender already put those bytes on the
    /// wire and nothing can be done with them, so they are read out and dropped rather than left
    /// to overflow the receive buffer.
    fn pump_uart_to_usb(&mut self, uart: &mut impl BytePort, usb: &mut impl BytePort) -> TransferReport {
        let mut chunk = [0u8; CHUNK_CAPACITY];
        let read = uart.read_some(&mut chunk);

        let mut forwarded = 0;
        if read > 0 && self.link.is_connected() {
            forwarded = usb.write_some(&chunk[..read]);
        }

        let report = TransferReport { read, forwarded };
        self.stats.uart_to_usb_dropped = self
            .stats
            .uart_to_usb_dropped
            .saturating_add(report.dropped() as u32);
        report
    }

    /// Move up to one chunk from the USB stream to the serial output queue.
    ///
    /// Skipped entirely while unlinked; inbound USB data then stays in (or is refused at) the
    /// device stack's own endpoint buffer until the link returns. Bytes the output queue refuses
    /// are dropped with no retry — the next iteration starts from whatever is still unread on the
    /// USB side.
    fn pump_usb_to_uart(&mut self, usb: &mut impl BytePort, uart: &mut impl BytePort) -> TransferReport {
        if !self.link.is_connected() {
            return TransferReport::default();
        }

        let mut chunk = [0u8; CHUNK_CAPACITY];
        let read = usb.read_some(&mut chunk);

        let mut forwarded = 0;
        if read > 0 {
            forwarded = uart.write_some(&chunk[..read]);
        }

        let report = TransferReport { read, forwarded };
        self.stats.usb_to_uart_dropped = self
            .stats
            .usb_to_uart_dropped
            .saturating_add(report.dropped() as u32);
        report
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! Mock transport for exercising the relay without hardware.

    use super::BytePort;
    use heapless::{Deque, Vec};

    const MOCK_CAPACITY: usize = 256;

    /// A [`BytePort`] backed by in-memory queues, with a configurable acceptance limit so tests
    /// can provoke partial writes.
    pub struct MockPort {
        rx: Deque<u8, MOCK_CAPACITY>,
        tx: Vec<u8, MOCK_CAPACITY>,
        accept_limit: usize,
        read_calls: usize,
    }

    impl MockPort {
        pub fn new() -> Self {
            Self {
                rx: Deque::new(),
                tx: Vec::new(),
                accept_limit: usize::MAX,
                read_calls: 0,
            }
        }

        /// Queue bytes to be returned by `read_some`.
        pub fn queue_rx(&mut self, data: &[u8]) {
            for &byte in data {
                self.rx.push_back(byte).unwrap();
            }
        }

        /// Cap how many bytes a single `write_some` call will accept.
        pub fn limit_writes_to(&mut self, limit: usize) {
            self.accept_limit = limit;
        }

        /// Bytes queued for reading that have not been read yet.
        pub fn rx_remaining(&self) -> usize {
            self.rx.len()
        }

        /// Everything accepted by `write_some` so far.
        pub fn written(&self) -> &[u8] {
            &self.tx
        }

        /// Number of times `read_some` has been invoked.
        pub fn read_calls(&self) -> usize {
            self.read_calls
        }
    }

    impl BytePort for MockPort {
        fn read_some(&mut self, buf: &mut [u8]) -> usize {
            self.read_calls += 1;
            let mut count = 0;
            while count < buf.len() {
                match self.rx.pop_front() {
                    Some(byte) => {
                        buf[count] = byte;
                        count += 1;
                    }
                    None => break,
                }
            }
            count
        }

        fn write_some(&mut self, bytes: &[u8]) -> usize {
            let space = MOCK_CAPACITY - self.tx.len();
            let count = bytes.len().min(self.accept_limit).min(space);
            self.tx.extend_from_slice(&bytes[..count]).unwrap();
            count
        }
    }
}
