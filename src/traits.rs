use crate::protocol;

/// A trait for types that can be deserialized from a
/// [`Reader`](https://doc.rust-lang.org/std/io/trait.Read.html) and serialized
/// to a [`Writer`](https://doc.rust-lang.org/std/io/trait.Write.html).
///
/// `WireFormat` acts as the base trait for all types that can be serialized and deserialized
/// as part of the SOME/IP ecosystem: headers, Service Discovery entries and options as
/// well as application payloads (see [`serialization`](crate::serialization)).
pub trait WireFormat: Send + Sized + Sync {
    /// Deserialize a value from a byte stream.
    /// # Errors
    /// - if the stream is not in the expected format
    /// - if the stream contains partial data
    fn from_reader<T: std::io::Read>(reader: &mut T) -> Result<Self, protocol::Error>;

    /// Returns the number of bytes required to serialize this value.
    fn required_size(&self) -> usize;

    /// Serialize a value to a byte stream.
    /// Returns the number of bytes written.
    /// # Errors
    /// - If the data cannot be written to the stream
    fn to_writer<T: std::io::Write>(&self, writer: &mut T) -> Result<usize, protocol::Error>;
}
