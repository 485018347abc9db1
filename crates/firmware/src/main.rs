//! MIDIlink is [Embassy](https://embassy.dev)-based firmware that presents a class-compliant USB
//! MIDI device to a host and bridges it, byte for byte, to a classic serial MIDI port: a hardware
//! UART running at the 31250 baud the MIDI 1.0 electrical specification mandates. It runs on the
//! [Nucleo-F767ZI development board](https://www.st.com/en/evaluation-tools/nucleo-f767zi.html).
//!
//! The interesting part — the non-blocking relay with its bounded-loss policy for the rate
//! mismatch between bursty USB and the slow serial wire — lives in the architecture-agnostic
//! [`midilink_lib`] crate, where it is unit-tested against mock transports. This crate supplies
//! the hardware: clocks, the buffered UART, the USB device stack, and the tasks that pump bytes
//! between them.
//!
//! For wiring details (MIDI DIN circuitry, optocoupler input), see the `README`.

#![no_std]
#![no_main]

mod io;
mod lifecycle;

use defmt::{info, unwrap, warn};
use embassy_executor::Spawner;
use embassy_stm32::{
    Config, bind_interrupts,
    gpio::{Level, Output, Speed},
    peripherals,
    time::Hertz,
    usart::{self, BufferedUart},
    usb,
};
use embassy_time::{Duration, Instant, Timer};
use embassy_usb::{Builder, UsbDevice, class::midi::MidiClass};
use midilink_lib::heartbeat::Heartbeat;
use midilink_lib::relay::Relay;
use static_cell::StaticCell;

use {defmt_rtt as _, panic_probe as _};

bind_interrupts!(
    #[doc(hidden)]
    struct Irqs {
        OTG_FS => usb::InterruptHandler<peripherals::USB_OTG_FS>;
        USART6 => usart::BufferedInterruptHandler<peripherals::USART6>;
    }
);

type UsbDriver = usb::Driver<'static, peripherals::USB_OTG_FS>;

/// Baud rate mandated by the MIDI 1.0 electrical specification.
const MIDI_BAUD: u32 = 31_250;

/// How long the relay task yields between iterations. At 48 bytes per direction per tick this
/// comfortably outruns both full-speed USB MIDI and the 31250-baud wire (~3.1 bytes/ms).
const RELAY_TICK: Duration = Duration::from_micros(250);

/// Poll granularity of the status indicator; coarse is fine for a 1 Hz blink.
const HEARTBEAT_TICK: Duration = Duration::from_millis(50);

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("Initializing MIDIlink USB MIDI to serial MIDI bridge");

    let mut config = Config::default();
    {
        use embassy_stm32::rcc::*;
        // hse: high-speed external clock
        config.rcc.hse = Some(Hse {
            freq: Hertz(8_000_000),
            mode: HseMode::Bypass,
        });

        // pll: phase-locked loop, crucial for dividing clock
        config.rcc.pll_src = PllSource::HSE;
        config.rcc.pll = Some(Pll {
            prediv: PllPreDiv::DIV4,
            mul: PllMul::MUL216,
            divp: Some(PllPDiv::DIV2), // 8mhz / 4 * 216 / 2 = 216Mhz
            // per section 5.2 of RM0410: most peripheral clocks are derived from their bus clock, but the 48MHz clock used for USB OTG FS
            // is derived from main PLL VCO (PLLQ clock) or PLLSAI VCO (PLLSAI clock)
            divq: Some(PllQDiv::DIV9), // 8mhz / 4 * 216 / 9 = 48Mhz
            divr: None,
        });
        config.rcc.ahb_pre = AHBPrescaler::DIV1;
        config.rcc.apb1_pre = APBPrescaler::DIV4;
        config.rcc.apb2_pre = APBPrescaler::DIV2;
        config.rcc.sys = Sysclk::PLL1_P;
        config.rcc.mux.clk48sel = mux::Clk48sel::PLL1_Q;
    }
    let p = embassy_stm32::init(config);

    // MIDI UART on USART6, PG14 TX / PG9 RX (Zio connector CN7). The buffered driver gives us
    // interrupt-driven ring buffers on both sides: receive keeps capturing between relay
    // iterations, transmit paces queued bytes onto the wire at the configured baud rate.
    static UART_TX_BUFFER: StaticCell<[u8; 256]> = StaticCell::new();
    static UART_RX_BUFFER: StaticCell<[u8; 256]> = StaticCell::new();
    let mut uart_config = usart::Config::default();
    uart_config.baudrate = MIDI_BAUD;
    let uart = unwrap!(BufferedUart::new(
        p.USART6,
        p.PG9,
        p.PG14,
        UART_TX_BUFFER.init([0; 256]),
        UART_RX_BUFFER.init([0; 256]),
        Irqs,
        uart_config,
    ));
    let (uart_tx, uart_rx) = uart.split();
    info!("Configured MIDI UART for {} baud", MIDI_BAUD);

    // Create the driver, from the HAL.
    static ENDPOINT_OUT_BUFFER: StaticCell<[u8; 256]> = StaticCell::new();
    let mut config = embassy_stm32::usb::Config::default();

    // USB devices which are self-powered (i.e., that can stay powered on if unplugged from the host)
    // need to enable vbus_detection to comply with the USB spec. Per section 6.10 of the Nucleo board
    // manual (UM1974), CN13 (the USB port) cannot power the board; external power is necessary.
    // See docs on `vbus_detection` for details.
    config.vbus_detection = true;

    let driver = usb::Driver::new_fs(
        p.USB_OTG_FS,
        Irqs,
        p.PA12,
        p.PA11,
        ENDPOINT_OUT_BUFFER.init([0; 256]),
        config,
    );

    // per https://pid.codes, FOSS projects can apply to be listed under the vendor ID owned by InterBiometrics;
    // 0x000A is from the test-PID range pending registration
    let vendor_id = 0x1209;
    let product_id = 0x000A;

    let mut config = embassy_usb::Config::new(vendor_id, product_id);
    config.manufacturer = Some("MIDIlink");
    config.product = Some("USB MIDI to Serial MIDI Bridge");
    config.self_powered = true;
    config.max_power = 0;

    // Create embassy-usb DeviceBuilder using the driver and config.
    // It needs some buffers for building the descriptors.
    static CONFIG_DESCRIPTOR: StaticCell<[u8; 256]> = StaticCell::new();
    static BOS_DESCRIPTOR: StaticCell<[u8; 256]> = StaticCell::new();
    static CONTROL_BUFFER: StaticCell<[u8; 64]> = StaticCell::new();

    let mut builder = Builder::new(
        driver,
        config,
        CONFIG_DESCRIPTOR.init([0; 256]),
        BOS_DESCRIPTOR.init([0; 256]),
        &mut [], // no msos descriptors
        CONTROL_BUFFER.init([0; 64]),
    );

    // lifecycle callbacks feed the relay's link-state machine
    static LIFECYCLE: StaticCell<lifecycle::UsbLifecycle> = StaticCell::new();
    builder.handler(LIFECYCLE.init(lifecycle::UsbLifecycle::new()));

    // one embedded MIDI IN jack and one MIDI OUT jack, 64-byte packets
    let class = MidiClass::new(&mut builder, 1, 1, 64);
    let (usb_sender, usb_receiver) = class.split();

    // Build the builder.
    let usb = builder.build();

    unwrap!(spawner.spawn(usb_task(usb)));
    unwrap!(spawner.spawn(io::uart_rx_task(uart_rx)));
    unwrap!(spawner.spawn(io::uart_tx_task(uart_tx)));
    unwrap!(spawner.spawn(io::usb_rx_task(usb_receiver)));
    unwrap!(spawner.spawn(io::usb_tx_task(usb_sender)));
    unwrap!(spawner.spawn(relay_task()));

    // LD1 on the Nucleo. A build for a board with no indicator sets this to None and the
    // heartbeat becomes a no-op.
    let status_led = Some(Output::new(p.PB0, Level::Low, Speed::Low));
    if let Some(led) = status_led {
        unwrap!(spawner.spawn(heartbeat_task(led)));
    }
}

/// Task responsible for servicing the USB device state machine.
///
/// This must never be starved: without regular servicing the host times the device out and drops
/// it from the bus. It runs as its own task so no amount of relay traffic can delay it.
#[embassy_executor::task]
async fn usb_task(mut usb: UsbDevice<'static, UsbDriver>) -> ! {
    usb.run().await
}

/// The cooperative relay loop.
///
/// Each pass applies any pending lifecycle events to the link state, runs one bounded transfer per
/// direction, reports losses, and yields. Every step is non-blocking; the hardware edges are
/// serviced concurrently by the pump tasks in [`io`].
#[embassy_executor::task]
async fn relay_task() -> ! {
    let mut relay = Relay::new();
    let mut uart_port = io::PipePort::uart();
    let mut usb_port = io::PipePort::usb();

    loop {
        while let Ok(event) = lifecycle::LINK_EVENTS.try_receive() {
            relay.handle_event(event);
        }

        let report = relay.run_iteration(&mut uart_port, &mut usb_port);
        if report.uart_to_usb.dropped() > 0 {
            warn!(
                "Dropped {} bytes relaying serial MIDI in to USB (total {})",
                report.uart_to_usb.dropped(),
                relay.stats().uart_to_usb_dropped
            );
        }
        if report.usb_to_uart.dropped() > 0 {
            warn!(
                "Dropped {} bytes relaying USB MIDI out to serial (total {})",
                report.usb_to_uart.dropped(),
                relay.stats().usb_to_uart_dropped
            );
        }

        Timer::after(RELAY_TICK).await;
    }
}

/// Visual heartbeat: toggles the status LED once per second to show the loop is alive.
///
/// Deliberately decoupled from the data path; a hung relay stops the blink, nothing the blink does
/// can stop the relay.
#[embassy_executor::task]
async fn heartbeat_task(mut led: Output<'static>) -> ! {
    let mut heartbeat = Heartbeat::new(Instant::now());
    loop {
        Timer::after(HEARTBEAT_TICK).await;
        if let Some(lit) = heartbeat.poll(Instant::now()) {
            led.set_level(Level::from(lit));
        }
    }
}
