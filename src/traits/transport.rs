//! Byte-level bus transport.
//!
//! The Tortoise boards form a shift-register chain. A transport clocks the
//! whole transmit buffer out and, on a poll, the whole receive buffer in. It
//! never interprets the bytes; see [`crate::codec`] for the bit layout.
//!
//! | Implementation | Where |
//! |----------------|-------|
//! | [`FnTransport`](crate::hal::FnTransport) | Closures, full-duplex or half-duplex |
//! | [`MockTransport`](crate::hal::MockTransport) | In-memory bus for tests and demos |
//! | `SpiTransport` | `embedded-hal` SPI devices (requires `spi` feature) |

use core::fmt::{Debug, Display};

/// Raw transactions against the controller boards.
///
/// Only the bus loop thread calls these methods, so implementations need no
/// internal locking.
///
/// # Full duplex
///
/// A full-duplex bus shifts bytes out while it shifts bytes in, so a poll
/// would overwrite the board outputs with whatever it clocks out. `receive`
/// is therefore handed the current transmit buffer; full-duplex transports
/// send it during the read, half-duplex transports ignore it.
pub trait BusTransport: Send {
    /// Transport failure.
    type Error: Debug + Display;

    /// Clocks `tx` out to the boards.
    fn transmit(&mut self, tx: &[u8]) -> Result<(), Self::Error>;

    /// Clocks the board inputs into `rx`.
    ///
    /// `tx` is the transmit buffer as last written.
    fn receive(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), Self::Error>;

    /// Releases the underlying device. Called exactly once, on driver close.
    fn close(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl<T: BusTransport + ?Sized> BusTransport for Box<T> {
    type Error = T::Error;

    fn transmit(&mut self, tx: &[u8]) -> Result<(), Self::Error> {
        (**self).transmit(tx)
    }

    fn receive(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), Self::Error> {
        (**self).receive(tx, rx)
    }

    fn close(&mut self) -> Result<(), Self::Error> {
        (**self).close()
    }
}
