use core::fmt::{self, Debug};

use crate::address::AddressError;

/// The error type used by this library.
///
/// This can encapsulate an SPI or chip-select error, and adds its own
/// protocol errors on top of that.
pub enum Error<S, P> {
    /// An SPI transfer failed.
    Spi(S),
    /// Driving the chip-select line failed.
    ChipSelect(P),
    /// The chip kept reporting write-in-progress past the allotted time.
    Timeout,
    /// The address or length reaches past the end of the array.
    OutOfBounds,
    /// A sector operation was given an address that is not sector aligned.
    NotAligned,
}

/// Coarse classification of [`Error`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ErrorKind {
    /// The transport collaborator reported a failure.
    BusFault,
    /// A bounded wait on the chip expired.
    Timeout,
    /// The caller passed an address or length the chip cannot honor.
    InvalidArgument,
}

impl<S, P> Error<S, P> {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Spi(_) | Error::ChipSelect(_) => ErrorKind::BusFault,
            Error::Timeout => ErrorKind::Timeout,
            Error::OutOfBounds | Error::NotAligned => ErrorKind::InvalidArgument,
        }
    }
}

impl<S, P> From<AddressError> for Error<S, P> {
    fn from(err: AddressError) -> Self {
        match err {
            AddressError::OutOfBounds => Error::OutOfBounds,
            AddressError::NotAligned => Error::NotAligned,
        }
    }
}

#[cfg(feature = "defmt")]
impl<S, P> defmt::Format for Error<S, P> {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            Error::Spi(_spi) => defmt::write!(fmt, "Error::Spi"),
            Error::ChipSelect(_pin) => defmt::write!(fmt, "Error::ChipSelect"),
            Error::Timeout => defmt::write!(fmt, "Error::Timeout"),
            Error::OutOfBounds => defmt::write!(fmt, "Error::OutOfBounds"),
            Error::NotAligned => defmt::write!(fmt, "Error::NotAligned"),
        }
    }
}

impl<S: Debug, P: Debug> Debug for Error<S, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Spi(spi) => write!(f, "Error::Spi({:?})", spi),
            Error::ChipSelect(pin) => write!(f, "Error::ChipSelect({:?})", pin),
            Error::Timeout => write!(f, "Error::Timeout"),
            Error::OutOfBounds => write!(f, "Error::OutOfBounds"),
            Error::NotAligned => write!(f, "Error::NotAligned"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds() {
        assert_eq!(Error::<u8, ()>::Spi(3).kind(), ErrorKind::BusFault);
        assert_eq!(Error::<(), u8>::ChipSelect(1).kind(), ErrorKind::BusFault);
        assert_eq!(Error::<(), ()>::Timeout.kind(), ErrorKind::Timeout);
        assert_eq!(Error::<(), ()>::OutOfBounds.kind(), ErrorKind::InvalidArgument);
        assert_eq!(Error::<(), ()>::NotAligned.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn debug_includes_bus_error() {
        let err: Error<&str, ()> = Error::Spi("overrun");
        assert_eq!(format!("{:?}", err), "Error::Spi(\"overrun\")");
    }
}
