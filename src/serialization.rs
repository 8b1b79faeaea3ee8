//! SOME/IP payload serialization
//!
//! Primitives are encoded big-endian with their natural width, structures encode their
//! fields in declaration order without padding and fixed size arrays encode their
//! elements back to back without a length prefix, as the length is known from the
//! data type definition on both sides.
//!
//! ```
//! use simple_someip_sd::{serialization, wire_struct};
//!
//! wire_struct! {
//!     #[derive(Clone, Debug, Default, PartialEq)]
//!     pub struct Version {
//!         pub major: u8,
//!         pub minor: u8,
//!     }
//! }
//!
//! let version = Version { major: 1, minor: 0 };
//! let bytes = serialization::to_bytes(&version).unwrap();
//! assert_eq!(bytes, [0x01, 0x00]);
//! assert_eq!(serialization::from_bytes::<Version>(&bytes).unwrap(), version);
//! ```

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use crate::{protocol::Error, traits::WireFormat};

macro_rules! impl_primitive {
    ($type:ty, $read:ident, $write:ident) => {
        impl WireFormat for $type {
            fn from_reader<T: Read>(reader: &mut T) -> Result<Self, Error> {
                Ok(reader.$read::<BigEndian>()?)
            }

            fn required_size(&self) -> usize {
                std::mem::size_of::<$type>()
            }

            fn to_writer<T: Write>(&self, writer: &mut T) -> Result<usize, Error> {
                writer.$write::<BigEndian>(*self)?;
                Ok(std::mem::size_of::<$type>())
            }
        }
    };
}

impl_primitive!(u16, read_u16, write_u16);
impl_primitive!(u32, read_u32, write_u32);
impl_primitive!(u64, read_u64, write_u64);
impl_primitive!(i16, read_i16, write_i16);
impl_primitive!(i32, read_i32, write_i32);
impl_primitive!(i64, read_i64, write_i64);
impl_primitive!(f32, read_f32, write_f32);
impl_primitive!(f64, read_f64, write_f64);

impl WireFormat for u8 {
    fn from_reader<T: Read>(reader: &mut T) -> Result<Self, Error> {
        Ok(reader.read_u8()?)
    }

    fn required_size(&self) -> usize {
        1
    }

    fn to_writer<T: Write>(&self, writer: &mut T) -> Result<usize, Error> {
        writer.write_u8(*self)?;
        Ok(1)
    }
}

impl WireFormat for i8 {
    fn from_reader<T: Read>(reader: &mut T) -> Result<Self, Error> {
        Ok(reader.read_i8()?)
    }

    fn required_size(&self) -> usize {
        1
    }

    fn to_writer<T: Write>(&self, writer: &mut T) -> Result<usize, Error> {
        writer.write_i8(*self)?;
        Ok(1)
    }
}

/// Booleans occupy one byte, any non-zero value decodes as `true`.
impl WireFormat for bool {
    fn from_reader<T: Read>(reader: &mut T) -> Result<Self, Error> {
        Ok(reader.read_u8()? != 0)
    }

    fn required_size(&self) -> usize {
        1
    }

    fn to_writer<T: Write>(&self, writer: &mut T) -> Result<usize, Error> {
        writer.write_u8(u8::from(*self))?;
        Ok(1)
    }
}

impl<E: WireFormat, const N: usize> WireFormat for [E; N] {
    fn from_reader<T: Read>(reader: &mut T) -> Result<Self, Error> {
        let mut elements = Vec::with_capacity(N);
        for _ in 0..N {
            elements.push(E::from_reader(reader)?);
        }
        // exactly N elements were pushed above
        elements
            .try_into()
            .map_err(|_| Error::MalformedPacket("array length mismatch"))
    }

    fn required_size(&self) -> usize {
        self.iter().map(WireFormat::required_size).sum()
    }

    fn to_writer<T: Write>(&self, writer: &mut T) -> Result<usize, Error> {
        let mut written = 0;
        for element in self {
            written += element.to_writer(writer)?;
        }
        Ok(written)
    }
}

/// Serialize `value` into a freshly allocated buffer.
pub fn to_bytes<V: WireFormat>(value: &V) -> Result<Vec<u8>, Error> {
    let mut buffer = Vec::with_capacity(value.required_size());
    value.to_writer(&mut buffer)?;
    Ok(buffer)
}

/// Deserialize a `V` that occupies all of `bytes`.
///
/// Fails when `bytes` is too short or when bytes remain after decoding.
pub fn from_bytes<V: WireFormat>(bytes: &[u8]) -> Result<V, Error> {
    let mut reader = bytes;
    let value = V::from_reader(&mut reader)?;
    if !reader.is_empty() {
        return Err(Error::MalformedPacket("trailing bytes after payload"));
    }
    Ok(value)
}

/// Declares a struct whose SOME/IP encoding is its fields in declaration order.
///
/// Every field type has to implement [`WireFormat`], so structures nest.
#[macro_export]
macro_rules! wire_struct {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $($field_vis:vis $field:ident : $field_ty:ty),* $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis struct $name {
            $($field_vis $field: $field_ty),*
        }

        impl $crate::traits::WireFormat for $name {
            fn from_reader<T: ::std::io::Read>(
                reader: &mut T,
            ) -> ::std::result::Result<Self, $crate::protocol::Error> {
                Ok(Self {
                    $($field: <$field_ty as $crate::traits::WireFormat>::from_reader(reader)?),*
                })
            }

            fn required_size(&self) -> usize {
                0 $(+ $crate::traits::WireFormat::required_size(&self.$field))*
            }

            fn to_writer<T: ::std::io::Write>(
                &self,
                writer: &mut T,
            ) -> ::std::result::Result<usize, $crate::protocol::Error> {
                let mut written = 0;
                $(written += $crate::traits::WireFormat::to_writer(&self.$field, writer)?;)*
                Ok(written)
            }
        }
    };
}
