//! USB device lifecycle callbacks.
//!
//! The device stack invokes [`embassy_usb::Handler`] methods from its own task as the bus state
//! changes. Each relevant change becomes a [`LinkEvent`] on [`LINK_EVENTS`], which the relay task
//! drains at the start of every iteration. The callbacks must not block, so delivery is
//! `try_send`: if the relay ever falls eight events behind, the newest event is dropped with a
//! diagnostic.

use defmt::{info, warn};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_usb::Handler;
use midilink_lib::link::LinkEvent;

/// Lifecycle events awaiting delivery to the relay task.
pub static LINK_EVENTS: Channel<CriticalSectionRawMutex, LinkEvent, 8> = Channel::new();

/// Translates USB device state changes into [`LinkEvent`]s.
pub struct UsbLifecycle {
    /// Latest remote-wakeup permission reported by the host, attached to suspend events.
    remote_wakeup: bool,
}

impl UsbLifecycle {
    pub fn new() -> Self {
        Self {
            remote_wakeup: false,
        }
    }

    fn publish(&self, event: LinkEvent) {
        if LINK_EVENTS.try_send(event).is_err() {
            warn!("Link event queue full, dropping {}", event);
        }
    }
}

impl Handler for UsbLifecycle {
    fn enabled(&mut self, enabled: bool) {
        if !enabled {
            self.publish(LinkEvent::Unmount);
        }
    }

    fn reset(&mut self) {
        // a bus reset drops the configuration until the host re-enumerates
        self.publish(LinkEvent::Unmount);
    }

    fn configured(&mut self, configured: bool) {
        if configured {
            info!("Mounted");
            self.publish(LinkEvent::Mount);
        } else {
            info!("Unmounted");
            self.publish(LinkEvent::Unmount);
        }
    }

    fn suspended(&mut self, suspended: bool) {
        if suspended {
            info!("Suspended (remote wakeup allowed: {})", self.remote_wakeup);
            self.publish(LinkEvent::Suspend {
                remote_wakeup: self.remote_wakeup,
            });
        } else {
            info!("Resumed");
            self.publish(LinkEvent::Resume);
        }
    }

    fn remote_wakeup_enabled(&mut self, enabled: bool) {
        self.remote_wakeup = enabled;
    }
}
