use std::io;

/// Builds a value from the body of a received frame.
///
/// The value may borrow from `buf`: numeric payloads are reinterpreted in place instead of
/// being copied out.
pub trait Deserialize<'a>: Sized {
    /// Deserializes a frame body.
    ///
    /// # Arguments
    /// * `buf` - The received bytes, without the length prefix.
    ///
    /// # Returns
    /// The decoded value or an `io::Error` of kind `InvalidData`.
    fn deserialize(buf: &'a [u8]) -> io::Result<Self>;
}
