//! Canonical text for query arguments.
//!
//! Arguments are turned into a stable byte string exactly once, when a [`Query`](super::Query)
//! is built. Scalars are written as plain text, byte buffers verbatim and structs as
//! `{field=value&field=value}`. Anything that has no natural flat text form, like sequences,
//! maps or data-carrying enum variants, is written as JSON instead.

use std::fmt::{self, Display};
use std::io::Write as _;

use serde::ser::{self, Impossible, Serialize};

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Computes the global identity of a query.
///
/// This is FNV-1a (64 bit) over the bucket name, followed by a `?` separator and the canonical
/// arguments if there are any.
pub fn global_id(bucket: &str, args: &[u8]) -> u64 {
    let mut hasher = Fnv1a::default();
    hasher.write(bucket.as_bytes());
    if !args.is_empty() {
        hasher.write(b"?");
        hasher.write(args);
    }
    hasher.finish()
}

#[derive(Debug, Clone, Copy)]
struct Fnv1a(u64);

impl Default for Fnv1a {
    fn default() -> Self {
        Self(FNV_OFFSET_BASIS)
    }
}

impl Fnv1a {
    fn write(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.0 ^= u64::from(*byte);
            self.0 = self.0.wrapping_mul(FNV_PRIME);
        }
    }

    fn finish(self) -> u64 {
        self.0
    }
}

/// Turns query arguments into their canonical byte representation.
///
/// Serialization never fails from the point of view of the caller. Arguments that can be
/// written neither canonically nor as JSON are logged and treated as empty.
pub fn canonicalize<A>(args: &A) -> Vec<u8>
where
    A: Serialize + ?Sized,
{
    match try_canonicalize(args) {
        Ok(bytes) => bytes,
        Err(error) => {
            tracing::error!(%error, "failed to serialize query arguments");
            Vec::new()
        }
    }
}

fn try_canonicalize<A>(args: &A) -> Result<Vec<u8>, ArgsError>
where
    A: Serialize + ?Sized,
{
    let mut out = Vec::new();
    match args.serialize(ArgsSerializer { out: &mut out }) {
        Ok(()) => Ok(out),
        Err(ArgsError::NotFlat) => serde_json::to_vec(args).map_err(ArgsError::from),
        Err(err) => Err(err),
    }
}

#[derive(Debug)]
enum ArgsError {
    /// The value has no flat textual form and should be written as JSON.
    NotFlat,
    Custom(String),
}

impl Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFlat => f.write_str("value has no flat textual form"),
            Self::Custom(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for ArgsError {}

impl ser::Error for ArgsError {
    fn custom<T: Display>(msg: T) -> Self {
        Self::Custom(msg.to_string())
    }
}

impl From<serde_json::Error> for ArgsError {
    fn from(err: serde_json::Error) -> Self {
        Self::Custom(err.to_string())
    }
}

struct ArgsSerializer<'a> {
    out: &'a mut Vec<u8>,
}

impl ArgsSerializer<'_> {
    fn display<T: Display>(self, value: T) -> Result<(), ArgsError> {
        write!(self.out, "{value}").map_err(|err| ArgsError::Custom(err.to_string()))
    }
}

impl<'a> ser::Serializer for ArgsSerializer<'a> {
    type Ok = ();
    type Error = ArgsError;

    type SerializeSeq = Impossible<(), ArgsError>;
    type SerializeTuple = Impossible<(), ArgsError>;
    type SerializeTupleStruct = Impossible<(), ArgsError>;
    type SerializeTupleVariant = Impossible<(), ArgsError>;
    type SerializeMap = Impossible<(), ArgsError>;
    type SerializeStruct = StructArgs<'a>;
    type SerializeStructVariant = Impossible<(), ArgsError>;

    fn serialize_bool(self, v: bool) -> Result<(), ArgsError> {
        self.out
            .extend_from_slice(if v { b"true" } else { b"false" });
        Ok(())
    }

    fn serialize_i8(self, v: i8) -> Result<(), ArgsError> {
        self.display(v)
    }

    fn serialize_i16(self, v: i16) -> Result<(), ArgsError> {
        self.display(v)
    }

    fn serialize_i32(self, v: i32) -> Result<(), ArgsError> {
        self.display(v)
    }

    fn serialize_i64(self, v: i64) -> Result<(), ArgsError> {
        self.display(v)
    }

    fn serialize_i128(self, v: i128) -> Result<(), ArgsError> {
        self.display(v)
    }

    fn serialize_u8(self, v: u8) -> Result<(), ArgsError> {
        self.display(v)
    }

    fn serialize_u16(self, v: u16) -> Result<(), ArgsError> {
        self.display(v)
    }

    fn serialize_u32(self, v: u32) -> Result<(), ArgsError> {
        self.display(v)
    }

    fn serialize_u64(self, v: u64) -> Result<(), ArgsError> {
        self.display(v)
    }

    fn serialize_u128(self, v: u128) -> Result<(), ArgsError> {
        self.display(v)
    }

    fn serialize_f32(self, v: f32) -> Result<(), ArgsError> {
        self.display(v)
    }

    fn serialize_f64(self, v: f64) -> Result<(), ArgsError> {
        self.display(v)
    }

    fn serialize_char(self, v: char) -> Result<(), ArgsError> {
        self.display(v)
    }

    fn serialize_str(self, v: &str) -> Result<(), ArgsError> {
        self.out.extend_from_slice(v.as_bytes());
        Ok(())
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<(), ArgsError> {
        self.out.extend_from_slice(v);
        Ok(())
    }

    fn serialize_none(self) -> Result<(), ArgsError> {
        Ok(())
    }

    fn serialize_some<T>(self, value: &T) -> Result<(), ArgsError>
    where
        T: Serialize + ?Sized,
    {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<(), ArgsError> {
        Ok(())
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<(), ArgsError> {
        Ok(())
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
    ) -> Result<(), ArgsError> {
        self.serialize_str(variant)
    }

    fn serialize_newtype_struct<T>(self, _name: &'static str, value: &T) -> Result<(), ArgsError>
    where
        T: Serialize + ?Sized,
    {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T>(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _value: &T,
    ) -> Result<(), ArgsError>
    where
        T: Serialize + ?Sized,
    {
        Err(ArgsError::NotFlat)
    }

    fn serialize_seq(self, _len: Option<usize>) -> Result<Self::SerializeSeq, ArgsError> {
        Err(ArgsError::NotFlat)
    }

    fn serialize_tuple(self, _len: usize) -> Result<Self::SerializeTuple, ArgsError> {
        Err(ArgsError::NotFlat)
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleStruct, ArgsError> {
        Err(ArgsError::NotFlat)
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleVariant, ArgsError> {
        Err(ArgsError::NotFlat)
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<Self::SerializeMap, ArgsError> {
        Err(ArgsError::NotFlat)
    }

    fn serialize_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStruct, ArgsError> {
        Ok(StructArgs {
            out: self.out,
            fields: Vec::new(),
        })
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStructVariant, ArgsError> {
        Err(ArgsError::NotFlat)
    }
}

/// Collects `name=value` pairs of a struct.
///
/// A struct whose fields are all skipped still writes its braces, which keeps it apart from the
/// bare bucket. Unit structs have an empty text.
struct StructArgs<'a> {
    out: &'a mut Vec<u8>,
    fields: Vec<u8>,
}

impl ser::SerializeStruct for StructArgs<'_> {
    type Ok = ();
    type Error = ArgsError;

    fn serialize_field<T>(&mut self, key: &'static str, value: &T) -> Result<(), ArgsError>
    where
        T: Serialize + ?Sized,
    {
        if !self.fields.is_empty() {
            self.fields.push(b'&');
        }
        self.fields.extend_from_slice(key.as_bytes());
        self.fields.push(b'=');
        // Fields without a flat form fall back to JSON individually.
        self.fields.extend_from_slice(&try_canonicalize(value)?);
        Ok(())
    }

    fn end(self) -> Result<(), ArgsError> {
        self.out.push(b'{');
        self.out.extend_from_slice(&self.fields);
        self.out.push(b'}');
        Ok(())
    }
}
