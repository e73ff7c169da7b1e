/// Turns a value into the body of a frame.
///
/// Implementors write any owned bytes into `buf` and may return a borrowed slice that
/// is written right after it, which lets large numeric payloads go out without a copy.
pub trait Serialize<'a> {
    /// Serializes `self`.
    ///
    /// # Arguments
    /// * `buf` - The scratch buffer for the owned part of the frame.
    ///
    /// # Returns
    /// The optional zero-copy tail of the frame.
    fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]>;
}
