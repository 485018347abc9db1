//! Tracks whether a USB host is ready to exchange MIDI data.
//!
//! The USB device stack reports lifecycle changes through callbacks; those are translated into
//! [`LinkEvent`]s and applied to a [`LinkState`], which the relay then reads on every iteration
//! instead of re-querying the stack. Suspend and resume are reported for diagnostics but do not
//! change the state: the bridge has no power-management-driven behavior.

/// A lifecycle event reported by the USB device stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkEvent {
    /// The host has finished enumeration and selected a configuration.
    Mount,
    /// The device lost its configuration (detach, bus reset, or the host deconfigured it).
    Unmount,
    /// The bus was suspended. `remote_wakeup` reports whether the host permits remote wakeup.
    Suspend {
        /// True when the host has enabled the remote-wakeup feature.
        remote_wakeup: bool,
    },
    /// The bus was resumed.
    Resume,
}

/// Whether a USB host is currently ready to exchange MIDI stream data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkState {
    /// No host, or enumeration has not completed. All USB transfers are gated off.
    #[default]
    Disconnected,
    /// A host is enumerated and the MIDI interface is configured.
    Connected,
}

impl LinkState {
    /// Returns true when MIDI data may be exchanged with the host.
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }

    /// Returns the state that results from applying `event`.
    pub fn apply(self, event: LinkEvent) -> Self {
        match event {
            LinkEvent::Mount => Self::Connected,
            LinkEvent::Unmount => Self::Disconnected,
            // informational only; see the module docs
            LinkEvent::Suspend { .. } | LinkEvent::Resume => self,
        }
    }
}
