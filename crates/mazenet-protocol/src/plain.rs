//! Plain-field records: types encoded from a statically declared field list.
//!
//! A plain-field type carries no serde derive of its own. Instead it
//! declares its fields once, with [`plain_fields!`](crate::plain_fields),
//! and is written as a list of `(name, value)` pairs in that fixed order.
//! Decoding looks every declared field up by name, so a renamed or removed
//! field surfaces as [`ProtocolError::MissingField`] instead of silently
//! shifting every later value.

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{BincodeCodec, Codec, ProtocolError};

/// One encoded field of a plain-field record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlainField {
    pub name: String,
    pub value: Vec<u8>,
}

/// A type serialized through its declared field list.
///
/// Implement it with [`plain_fields!`](crate::plain_fields) rather than by
/// hand; the macro keeps `FIELDS`, the writer and the reader in step.
pub trait PlainFields: Sized {
    /// Field names, in wire order.
    const FIELDS: &'static [&'static str];

    /// Writes every declared field, in declaration order.
    fn write_fields(&self, writer: &mut FieldWriter) -> Result<(), ProtocolError>;

    /// Rebuilds the value from decoded fields.
    fn read_fields(reader: &FieldReader) -> Result<Self, ProtocolError>;
}

/// Collects the `(name, value)` pairs of one record.
#[derive(Debug)]
pub struct FieldWriter {
    type_name: &'static str,
    fields: Vec<PlainField>,
}

impl FieldWriter {
    pub fn new(type_name: &'static str) -> Self {
        Self {
            type_name,
            fields: Vec::new(),
        }
    }

    /// Encodes `value` and appends it under `name`.
    pub fn field<V: Serialize>(
        &mut self,
        name: &'static str,
        value: &V,
    ) -> Result<(), ProtocolError> {
        let value = bincode::serialize(value).map_err(|source| {
            ProtocolError::Encode {
                type_name: self.type_name,
                source,
            }
        })?;
        self.fields.push(PlainField {
            name: name.to_owned(),
            value,
        });
        Ok(())
    }

    fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }
}

/// Looks decoded fields up by name.
#[derive(Debug)]
pub struct FieldReader {
    type_name: &'static str,
    fields: Vec<PlainField>,
}

impl FieldReader {
    pub fn new(type_name: &'static str, fields: Vec<PlainField>) -> Self {
        Self { type_name, fields }
    }

    /// Decodes the field called `name`.
    ///
    /// # Errors
    /// [`ProtocolError::MissingField`] if no field has that name,
    /// [`ProtocolError::Decode`] if its bytes don't decode as `V`.
    pub fn field<V: DeserializeOwned>(
        &self,
        name: &'static str,
    ) -> Result<V, ProtocolError> {
        let field = self
            .fields
            .iter()
            .find(|f| f.name == name)
            .ok_or(ProtocolError::MissingField {
                type_name: self.type_name,
                field: name,
            })?;
        bincode::deserialize(&field.value).map_err(|source| {
            ProtocolError::Decode {
                type_name: self.type_name,
                source,
            }
        })
    }
}

/// Encodes a plain-field record.
///
/// # Errors
/// [`ProtocolError::FieldOrder`] if the writer did not produce exactly the
/// declared fields in declared order.
pub fn encode_plain<T: PlainFields>(
    value: &T,
    type_name: &'static str,
) -> Result<Vec<u8>, ProtocolError> {
    let mut writer = FieldWriter::new(type_name);
    value.write_fields(&mut writer)?;
    if !writer.names().eq(T::FIELDS.iter().copied()) {
        return Err(ProtocolError::FieldOrder { type_name });
    }
    BincodeCodec.encode(&writer.fields)
}

/// Decodes a plain-field record. Fields the type doesn't declare are
/// ignored.
pub fn decode_plain<T: PlainFields>(
    bytes: &[u8],
    type_name: &'static str,
) -> Result<T, ProtocolError> {
    let fields: Vec<PlainField> =
        bincode::deserialize(bytes).map_err(|source| ProtocolError::Decode {
            type_name,
            source,
        })?;
    T::read_fields(&FieldReader::new(type_name, fields))
}

/// Implements [`PlainFields`] for a struct from its field list.
///
/// ```rust
/// use mazenet_protocol::{PlainFields, plain_fields};
///
/// #[derive(Debug, PartialEq)]
/// struct Velocity {
///     dx: i32,
///     dy: i32,
/// }
///
/// plain_fields!(Velocity { dx, dy });
///
/// assert_eq!(Velocity::FIELDS, &["dx", "dy"]);
/// ```
#[macro_export]
macro_rules! plain_fields {
    ($ty:ident { $($field:ident),+ $(,)? }) => {
        impl $crate::PlainFields for $ty {
            const FIELDS: &'static [&'static str] = &[$(stringify!($field)),+];

            fn write_fields(
                &self,
                writer: &mut $crate::FieldWriter,
            ) -> Result<(), $crate::ProtocolError> {
                $( writer.field(stringify!($field), &self.$field)?; )+
                Ok(())
            }

            fn read_fields(
                reader: &$crate::FieldReader,
            ) -> Result<Self, $crate::ProtocolError> {
                Ok(Self {
                    $( $field: reader.field(stringify!($field))?, )+
                })
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Sample {
        label: String,
        count: u32,
    }

    plain_fields!(Sample { label, count });

    /// Writes its fields backwards, which the encoder must refuse.
    #[derive(Debug)]
    struct Backwards {
        a: u8,
        b: u8,
    }

    impl PlainFields for Backwards {
        const FIELDS: &'static [&'static str] = &["a", "b"];

        fn write_fields(&self, w: &mut FieldWriter) -> Result<(), ProtocolError> {
            w.field("b", &self.b)?;
            w.field("a", &self.a)
        }

        fn read_fields(r: &FieldReader) -> Result<Self, ProtocolError> {
            Ok(Self {
                a: r.field("a")?,
                b: r.field("b")?,
            })
        }
    }

    fn raw(fields: &[(&str, Vec<u8>)]) -> Vec<u8> {
        let fields: Vec<PlainField> = fields
            .iter()
            .map(|(name, value)| PlainField {
                name: (*name).to_owned(),
                value: value.clone(),
            })
            .collect();
        bincode::serialize(&fields).unwrap()
    }

    #[test]
    fn test_plain_round_trip() {
        let value = Sample {
            label: "torch".into(),
            count: 3,
        };
        let bytes = encode_plain(&value, "Sample").unwrap();
        let back: Sample = decode_plain(&bytes, "Sample").unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_fields_are_written_in_declared_order() {
        let value = Sample {
            label: "x".into(),
            count: 1,
        };
        let bytes = encode_plain(&value, "Sample").unwrap();
        let fields: Vec<PlainField> = bincode::deserialize(&bytes).unwrap();
        let names: Vec<&str> = fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, Sample::FIELDS);
    }

    #[test]
    fn test_renamed_field_returns_missing_field() {
        let bytes = raw(&[
            ("name", bincode::serialize("x").unwrap()),
            ("count", bincode::serialize(&1u32).unwrap()),
        ]);

        let result: Result<Sample, _> = decode_plain(&bytes, "Sample");

        assert!(matches!(
            result,
            Err(ProtocolError::MissingField {
                type_name: "Sample",
                field: "label"
            })
        ));
    }

    #[test]
    fn test_unknown_extra_field_is_ignored() {
        let bytes = raw(&[
            ("label", bincode::serialize("x").unwrap()),
            ("count", bincode::serialize(&9u32).unwrap()),
            ("colour", bincode::serialize("red").unwrap()),
        ]);

        let value: Sample = decode_plain(&bytes, "Sample").unwrap();

        assert_eq!(value.count, 9);
    }

    #[test]
    fn test_out_of_order_writer_returns_field_order() {
        let result = encode_plain(&Backwards { a: 1, b: 2 }, "Backwards");
        assert!(matches!(result, Err(ProtocolError::FieldOrder { .. })));
    }

    #[test]
    fn test_wrong_value_type_returns_decode_error() {
        let bytes = raw(&[
            ("label", bincode::serialize("x").unwrap()),
            ("count", vec![1]),
        ]);

        let result: Result<Sample, _> = decode_plain(&bytes, "Sample");

        assert!(matches!(result, Err(ProtocolError::Decode { .. })));
    }
}
