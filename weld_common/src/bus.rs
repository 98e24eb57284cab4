//! Fieldbus seams.
//!
//! The bus master itself is out of scope. An axis controller only sees the
//! slice of the cyclic process image that belongs to its own drive: it
//! receives [`InputFrame`]s through [`InputHandler`] and hands one
//! [`OutputFrame`] per tick to a [`FrameSink`].

use std::fmt;
use thiserror::Error;

use crate::drive::frame::{InputFrame, OutputFrame};

/// Addressing of one drive on the fieldbus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceAddress {
    pub vendor_id: u32,
    pub product_code: u32,
    /// Position of the device among devices with the same product code.
    pub instance: u16,
}

impl DeviceAddress {
    pub const fn new(vendor_id: u32, product_code: u32, instance: u16) -> Self {
        Self {
            vendor_id,
            product_code,
            instance,
        }
    }

    /// Ingest filter: product code and instance must both match.
    #[inline]
    pub const fn matches(&self, other: &DeviceAddress) -> bool {
        self.product_code == other.product_code && self.instance == other.instance
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:#010x}:{:#010x}/{}",
            self.vendor_id, self.product_code, self.instance
        )
    }
}

/// Errors raised by a frame sink.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("device {0} is not attached to the bus")]
    UnknownDevice(DeviceAddress),

    #[error("bus is shut down")]
    Closed,

    #[error("bus write failed: {0}")]
    Io(String),
}

/// Receives the per-tick output frame of one axis.
///
/// Called from the cyclic thread; implementations must not block.
pub trait FrameSink: Send + Sync {
    fn write_output(&self, address: DeviceAddress, frame: &OutputFrame) -> Result<(), BusError>;
}

/// Consumes periodic input frames delivered by the fieldbus I/O thread.
pub trait InputHandler: Send + Sync {
    fn on_periodic_input(&self, address: DeviceAddress, frame: &InputFrame);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_match_ignores_vendor() {
        let a = DeviceAddress::new(0xFB, 0x6350_0000, 1);
        let b = DeviceAddress::new(0x00, 0x6350_0000, 1);
        assert!(a.matches(&b));
        assert!(!a.matches(&DeviceAddress::new(0xFB, 0x6350_0000, 2)));
        assert!(!a.matches(&DeviceAddress::new(0xFB, 0x0380, 1)));
    }

    #[test]
    fn address_display() {
        let a = DeviceAddress::new(0xAB, 0x380, 0);
        assert_eq!(a.to_string(), "0x000000ab:0x00000380/0");
    }
}
