//! Binding of form fields into typed values.
//!
//! Form values are always text. A field with one value deserializes as a
//! scalar, parsing numbers and booleans out of the text when the target
//! type asks for them; a field with several values deserializes as a
//! sequence. Asking for a scalar from a repeated field is an error.

use crate::body::FormFields;
use crate::error::{Error, Result};
use serde::de::value::{Error as ValueError, MapDeserializer, SeqDeserializer};
use serde::de::{self, DeserializeOwned, IntoDeserializer, Visitor};
use serde::forward_to_deserialize_any;

/// Deserialize `T` from form fields
///
/// # Errors
///
/// Returns `Error::MalformedRequest` when a field cannot be converted or a
/// required field is missing.
pub fn from_fields<T: DeserializeOwned>(fields: &FormFields) -> Result<T> {
    let entries = fields
        .iter()
        .map(|(name, values)| (name.as_str(), FieldValues(values)));
    T::deserialize(MapDeserializer::new(entries))
        .map_err(|e: ValueError| Error::malformed(format!("invalid form data: {e}")))
}

/// All values of one field
struct FieldValues<'a>(&'a [String]);

/// One textual value
struct FieldValue<'a>(&'a str);

impl<'a> FieldValues<'a> {
    fn single(&self) -> std::result::Result<FieldValue<'a>, ValueError> {
        match self.0 {
            [value] => Ok(FieldValue(value)),
            [] => Err(de::Error::custom("missing value")),
            _ => Err(de::Error::custom("expected a single value, found several")),
        }
    }

    fn seq(&self) -> SeqDeserializer<impl Iterator<Item = FieldValue<'a>>, ValueError> {
        SeqDeserializer::new(self.0.iter().map(|v| FieldValue(v)))
    }
}

impl<'de, 'a> IntoDeserializer<'de, ValueError> for FieldValues<'a> {
    type Deserializer = Self;

    fn into_deserializer(self) -> Self {
        self
    }
}

impl<'de, 'a> IntoDeserializer<'de, ValueError> for FieldValue<'a> {
    type Deserializer = Self;

    fn into_deserializer(self) -> Self {
        self
    }
}

macro_rules! single_value {
    ($($method:ident)*) => {
        $(
            fn $method<V: Visitor<'de>>(self, visitor: V) -> std::result::Result<V::Value, ValueError> {
                self.single()?.$method(visitor)
            }
        )*
    };
}

impl<'de, 'a> de::Deserializer<'de> for FieldValues<'a> {
    type Error = ValueError;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> std::result::Result<V::Value, ValueError> {
        if self.0.len() == 1 {
            self.single()?.deserialize_any(visitor)
        } else {
            visitor.visit_seq(self.seq())
        }
    }

    fn deserialize_seq<V: Visitor<'de>>(self, visitor: V) -> std::result::Result<V::Value, ValueError> {
        visitor.visit_seq(self.seq())
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> std::result::Result<V::Value, ValueError> {
        visitor.visit_some(self)
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> std::result::Result<V::Value, ValueError> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        name: &'static str,
        variants: &'static [&'static str],
        visitor: V,
    ) -> std::result::Result<V::Value, ValueError> {
        self.single()?.deserialize_enum(name, variants, visitor)
    }

    single_value! {
        deserialize_bool
        deserialize_i8 deserialize_i16 deserialize_i32 deserialize_i64
        deserialize_u8 deserialize_u16 deserialize_u32 deserialize_u64
        deserialize_f32 deserialize_f64
        deserialize_char deserialize_str deserialize_string
    }

    forward_to_deserialize_any! {
        i128 u128 bytes byte_buf unit unit_struct tuple
        tuple_struct map struct identifier ignored_any
    }
}

macro_rules! parse_value {
    ($($method:ident => $visit:ident),* $(,)?) => {
        $(
            fn $method<V: Visitor<'de>>(self, visitor: V) -> std::result::Result<V::Value, ValueError> {
                match self.0.trim().parse() {
                    Ok(parsed) => visitor.$visit(parsed),
                    Err(_) => Err(de::Error::custom(format!(
                        "invalid value '{}' for {}",
                        self.0,
                        stringify!($visit).trim_start_matches("visit_")
                    ))),
                }
            }
        )*
    };
}

impl<'de, 'a> de::Deserializer<'de> for FieldValue<'a> {
    type Error = ValueError;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> std::result::Result<V::Value, ValueError> {
        visitor.visit_str(self.0)
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> std::result::Result<V::Value, ValueError> {
        visitor.visit_some(self)
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> std::result::Result<V::Value, ValueError> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> std::result::Result<V::Value, ValueError> {
        visitor.visit_enum(IntoDeserializer::<'de, ValueError>::into_deserializer(self.0))
    }

    parse_value! {
        deserialize_bool => visit_bool,
        deserialize_i8 => visit_i8,
        deserialize_i16 => visit_i16,
        deserialize_i32 => visit_i32,
        deserialize_i64 => visit_i64,
        deserialize_u8 => visit_u8,
        deserialize_u16 => visit_u16,
        deserialize_u32 => visit_u32,
        deserialize_u64 => visit_u64,
        deserialize_f32 => visit_f32,
        deserialize_f64 => visit_f64,
    }

    forward_to_deserialize_any! {
        i128 u128 char str string bytes byte_buf unit unit_struct seq tuple
        tuple_struct map struct identifier ignored_any
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    fn fields(pairs: &[(&str, &[&str])]) -> FormFields {
        pairs
            .iter()
            .map(|(k, vs)| (k.to_string(), vs.iter().map(|v| v.to_string()).collect()))
            .collect()
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Order {
        item: String,
        quantity: i32,
        price: f64,
        gift: Option<bool>,
        #[serde(default)]
        codes: Vec<u32>,
    }

    #[test]
    fn test_scalars_parse_from_text() {
        let order: Order = from_fields(&fields(&[
            ("item", &["book"]),
            ("quantity", &["2"]),
            ("price", &["9.5"]),
            ("gift", &["true"]),
        ]))
        .unwrap();

        assert_eq!(
            order,
            Order {
                item: "book".into(),
                quantity: 2,
                price: 9.5,
                gift: Some(true),
                codes: vec![],
            }
        );
    }

    #[test]
    fn test_sequences_accept_one_or_many() {
        let one: Order = from_fields(&fields(&[
            ("item", &["x"]),
            ("quantity", &["1"]),
            ("price", &["1"]),
            ("codes", &["7"]),
        ]))
        .unwrap();
        assert_eq!(one.codes, [7]);

        let many: Order = from_fields(&fields(&[
            ("item", &["x"]),
            ("quantity", &["1"]),
            ("price", &["1"]),
            ("codes", &["7", "8"]),
        ]))
        .unwrap();
        assert_eq!(many.codes, [7, 8]);
    }

    #[test]
    fn test_invalid_number() {
        let err = from_fields::<Order>(&fields(&[
            ("item", &["x"]),
            ("quantity", &["two"]),
            ("price", &["1"]),
        ]))
        .unwrap_err();
        assert!(matches!(err, Error::MalformedRequest { .. }));
        assert!(err.to_string().contains("two"));
    }

    #[test]
    fn test_repeated_scalar_rejected() {
        let err = from_fields::<Order>(&fields(&[
            ("item", &["x", "y"]),
            ("quantity", &["1"]),
            ("price", &["1"]),
        ]))
        .unwrap_err();
        assert!(matches!(err, Error::MalformedRequest { .. }));
    }

    #[test]
    fn test_missing_field() {
        assert!(from_fields::<Order>(&fields(&[("item", &["x"])])).is_err());
    }

    #[test]
    fn test_unknown_fields_ignored() {
        #[derive(Deserialize)]
        struct Login {
            user: String,
        }
        let login: Login = from_fields(&fields(&[("user", &["ann"]), ("csrf", &["t"])])).unwrap();
        assert_eq!(login.user, "ann");
    }
}
