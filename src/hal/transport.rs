//! Closure-backed bus transport.
//!
//! Wraps whatever actually moves the bytes (a spidev handle, a USB bridge, a
//! simulator) in one of two shapes:
//!
//! - **Full duplex**: one `transfer(write, read)` function. Transmits pass an
//!   empty read buffer; polls clock the current transmit buffer out while
//!   reading.
//! - **Half duplex**: separate `transmit(write)` and `receive(read)` functions.
//!
//! # Example
//!
//! ```rust
//! use std::convert::Infallible;
//! use rs_tortoise::hal::FnTransport;
//! use rs_tortoise::traits::BusTransport;
//!
//! let mut transport = FnTransport::half_duplex(
//!     |tx: &[u8]| {
//!         println!("out: {tx:02x?}");
//!         Ok::<_, Infallible>(())
//!     },
//!     |rx: &mut [u8]| {
//!         rx.fill(0x30);
//!         Ok(())
//!     },
//! );
//!
//! let mut rx = [0u8; 2];
//! transport.receive(&[0; 4], &mut rx).unwrap();
//! assert_eq!(rx, [0x30, 0x30]);
//! ```

use core::fmt::{Debug, Display};

use crate::traits::BusTransport;

type TransferFn<E> = Box<dyn FnMut(&[u8], &mut [u8]) -> Result<(), E> + Send>;
type TransmitFn<E> = Box<dyn FnMut(&[u8]) -> Result<(), E> + Send>;
type ReceiveFn<E> = Box<dyn FnMut(&mut [u8]) -> Result<(), E> + Send>;
type CloseFn<E> = Box<dyn FnMut() -> Result<(), E> + Send>;

enum Mode<E> {
    FullDuplex(TransferFn<E>),
    HalfDuplex {
        transmit: TransmitFn<E>,
        receive: ReceiveFn<E>,
    },
}

/// [`BusTransport`] built from closures.
pub struct FnTransport<E> {
    mode: Mode<E>,
    close: Option<CloseFn<E>>,
}

impl<E> FnTransport<E> {
    /// One function that writes and reads in the same transaction.
    pub fn full_duplex<F>(transfer: F) -> Self
    where
        F: FnMut(&[u8], &mut [u8]) -> Result<(), E> + Send + 'static,
    {
        Self {
            mode: Mode::FullDuplex(Box::new(transfer)),
            close: None,
        }
    }

    /// Separate write and read functions.
    pub fn half_duplex<W, R>(transmit: W, receive: R) -> Self
    where
        W: FnMut(&[u8]) -> Result<(), E> + Send + 'static,
        R: FnMut(&mut [u8]) -> Result<(), E> + Send + 'static,
    {
        Self {
            mode: Mode::HalfDuplex {
                transmit: Box::new(transmit),
                receive: Box::new(receive),
            },
            close: None,
        }
    }

    /// Runs `close` when the driver shuts down.
    pub fn with_close<C>(mut self, close: C) -> Self
    where
        C: FnMut() -> Result<(), E> + Send + 'static,
    {
        self.close = Some(Box::new(close));
        self
    }

    /// True for the single-function shape.
    pub fn is_full_duplex(&self) -> bool {
        matches!(self.mode, Mode::FullDuplex(_))
    }
}

impl<E: Debug + Display> BusTransport for FnTransport<E> {
    type Error = E;

    fn transmit(&mut self, tx: &[u8]) -> Result<(), E> {
        match &mut self.mode {
            Mode::FullDuplex(transfer) => transfer(tx, &mut []),
            Mode::HalfDuplex { transmit, .. } => transmit(tx),
        }
    }

    fn receive(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), E> {
        match &mut self.mode {
            Mode::FullDuplex(transfer) => transfer(tx, rx),
            Mode::HalfDuplex { receive, .. } => receive(rx),
        }
    }

    fn close(&mut self) -> Result<(), E> {
        match self.close.as_mut() {
            Some(close) => close(),
            None => Ok(()),
        }
    }
}

impl<E> Debug for FnTransport<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FnTransport")
            .field("full_duplex", &self.is_full_duplex())
            .field("has_close", &self.close.is_some())
            .finish()
    }
}
