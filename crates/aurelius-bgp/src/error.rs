use thiserror::Error;

/// Errors raised while decoding a BGP protocol data unit. The decoder is lenient where the protocol allows it (unassigned message kinds,
/// attribute types, capability codes and AFI/SAFI pairs are all retained as opaque values), so these errors indicate a malformed PDU
/// rather than an unsupported one.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Error)]
pub enum DecodeError {
    #[error("Message is truncated")]
    Truncated,

    #[error("Declared length {declared} does not match the message content")]
    LengthMismatch { declared: u16 },

    #[error("Message marker is not all-ones")]
    InvalidMarker,
}

impl<E> From<nom::Err<E>> for DecodeError {
    fn from(_: nom::Err<E>) -> Self {
        DecodeError::Truncated
    }
}
