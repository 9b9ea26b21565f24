//! SPI transport over `embedded-hal` 1.0 devices.
//!
//! Controller boards are usually wired one of two ways:
//!
//! - One chip select for the whole chain: a single [`SpiDevice`] that shifts
//!   outputs and latches inputs in the same transfer.
//! - Separate chip selects for the output and input registers (for example
//!   `/dev/spidev0.0` and `/dev/spidev0.1`): one device per direction.
//!
//! Requires the `spi` feature.

use embedded_hal::spi::SpiDevice;
use thiserror::Error;

use crate::traits::BusTransport;

/// Failure on one side of an [`SpiTransport`].
#[derive(Error, Debug)]
pub enum SpiTransportError<W, R> {
    /// The output device failed.
    #[error("SPI write failed: {0:?}")]
    Write(W),
    /// The input device failed.
    #[error("SPI read failed: {0:?}")]
    Read(R),
}

/// [`BusTransport`] over one or two SPI devices.
#[derive(Debug)]
pub struct SpiTransport<W, R = W> {
    write: W,
    read: Option<R>,
}

impl<D: SpiDevice> SpiTransport<D, D> {
    /// One device for both directions. Polls clock the transmit buffer out.
    pub fn full_duplex(device: D) -> Self {
        Self {
            write: device,
            read: None,
        }
    }
}

impl<W: SpiDevice, R: SpiDevice> SpiTransport<W, R> {
    /// Separate output and input devices.
    pub fn split(write: W, read: R) -> Self {
        Self {
            write,
            read: Some(read),
        }
    }

    /// Releases the devices.
    pub fn into_inner(self) -> (W, Option<R>) {
        (self.write, self.read)
    }
}

impl<W, R> BusTransport for SpiTransport<W, R>
where
    W: SpiDevice + Send,
    R: SpiDevice + Send,
{
    type Error = SpiTransportError<W::Error, R::Error>;

    fn transmit(&mut self, tx: &[u8]) -> Result<(), Self::Error> {
        self.write.write(tx).map_err(SpiTransportError::Write)
    }

    fn receive(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), Self::Error> {
        match self.read.as_mut() {
            Some(read) => read.read(rx).map_err(SpiTransportError::Read),
            None => self.write.transfer(rx, tx).map_err(SpiTransportError::Write),
        }
    }
}
