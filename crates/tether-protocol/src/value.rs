//! The closed set of shapes an RPC argument or result may take.
//!
//! The receiver of an RPC call has to know each argument's type before it
//! can pick the right method overload and decode it. Instead of shipping
//! runtime type names for everything, arguments travel as a [`Value`],
//! whose variant *is* the type. Only application-defined types fall back
//! to a name plus bytes ([`Value::Typed`]), and those names come from the
//! [`WireType`] trait rather than from runtime reflection.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{BincodeCodec, Codec, ProtocolError};

/// A self-describing RPC argument or result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// A boolean.
    Bool(bool),
    /// Any signed integer.
    Int(i64),
    /// Any unsigned integer.
    UInt(u64),
    /// Any float.
    Float(f64),
    /// A UTF-8 string.
    Text(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// An application type, identified by its [`WireType::TYPE_NAME`].
    Typed {
        /// The type's wire name.
        type_name: String,
        /// The value, serialized with [`BincodeCodec`].
        bytes: Vec<u8>,
    },
}

impl Value {
    /// Wraps an application type.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if the value can't be serialized.
    pub fn typed<T: WireType>(value: &T) -> Result<Self, ProtocolError> {
        Ok(Self::Typed {
            type_name: T::TYPE_NAME.to_string(),
            bytes: BincodeCodec.encode(value)?,
        })
    }

    /// Short name of the variant, used in mismatch errors and logs.
    pub fn kind_name(&self) -> &str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::UInt(_) => "uint",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
            Self::Typed { type_name, .. } => type_name,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::UInt(v.into())
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Self::UInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

// ---------------------------------------------------------------------------
// ValueKind: a declared parameter type
// ---------------------------------------------------------------------------

/// The declared type of an RPC parameter.
///
/// Method lookup compares each incoming [`Value`] against the method's
/// declared kinds; a method only matches if every argument is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// Accepts [`Value::Bool`].
    Bool,
    /// Accepts [`Value::Int`].
    Int,
    /// Accepts [`Value::UInt`].
    UInt,
    /// Accepts [`Value::Float`].
    Float,
    /// Accepts [`Value::Text`].
    Text,
    /// Accepts [`Value::Bytes`].
    Bytes,
    /// Accepts [`Value::Typed`] carrying this type name.
    Typed(&'static str),
}

impl ValueKind {
    /// Returns `true` if `value` has this kind.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (Self::Bool, Value::Bool(_))
            | (Self::Int, Value::Int(_))
            | (Self::UInt, Value::UInt(_))
            | (Self::Float, Value::Float(_))
            | (Self::Text, Value::Text(_))
            | (Self::Bytes, Value::Bytes(_)) => true,
            (Self::Typed(name), Value::Typed { type_name, .. }) => name == type_name,
            _ => false,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => write!(f, "bool"),
            Self::Int => write!(f, "int"),
            Self::UInt => write!(f, "uint"),
            Self::Float => write!(f, "float"),
            Self::Text => write!(f, "text"),
            Self::Bytes => write!(f, "bytes"),
            Self::Typed(name) => write!(f, "{name}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Conversion traits
// ---------------------------------------------------------------------------

/// A Rust type usable as an RPC parameter.
pub trait RpcArg: Sized {
    /// The kind this type is declared as.
    fn kind() -> ValueKind;

    /// Converts into a wire value.
    ///
    /// # Errors
    /// Returns an error if the value can't be encoded.
    fn into_value(self) -> Result<Value, ProtocolError>;

    /// Converts back from a wire value.
    ///
    /// # Errors
    /// Returns `ProtocolError::ArgumentMismatch` if `value` has the wrong
    /// kind or doesn't fit the target type.
    fn from_value(value: Value) -> Result<Self, ProtocolError>;
}

/// A Rust type usable as an RPC method's return type.
///
/// `()` means the method has no result and no response is sent.
pub trait RpcReturn {
    /// Converts into an optional response value.
    ///
    /// # Errors
    /// Returns an error if the value can't be encoded.
    fn into_response(self) -> Result<Option<Value>, ProtocolError>;
}

impl RpcReturn for () {
    fn into_response(self) -> Result<Option<Value>, ProtocolError> {
        Ok(None)
    }
}

/// An application type that can travel as [`Value::Typed`].
///
/// `TYPE_NAME` must be identical on both sides and unique among the
/// application's wire types.
pub trait WireType: Serialize + DeserializeOwned {
    /// The name this type is identified by on the wire.
    const TYPE_NAME: &'static str;
}

/// Marks a parameter or result as an application [`WireType`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Typed<T>(pub T);

impl<T: WireType> RpcArg for Typed<T> {
    fn kind() -> ValueKind {
        ValueKind::Typed(T::TYPE_NAME)
    }

    fn into_value(self) -> Result<Value, ProtocolError> {
        Value::typed(&self.0)
    }

    fn from_value(value: Value) -> Result<Self, ProtocolError> {
        match value {
            Value::Typed { type_name, bytes } if type_name == T::TYPE_NAME => {
                BincodeCodec.decode(&bytes).map(Typed)
            }
            other => Err(mismatch(Self::kind(), &other)),
        }
    }
}

impl<T: WireType> RpcReturn for Typed<T> {
    fn into_response(self) -> Result<Option<Value>, ProtocolError> {
        self.into_value().map(Some)
    }
}

fn mismatch(expected: ValueKind, found: &Value) -> ProtocolError {
    ProtocolError::ArgumentMismatch(format!(
        "expected {expected}, found {}",
        found.kind_name()
    ))
}

// Every primitive gets both traits; only the variant and the conversion
// differ.
macro_rules! rpc_primitive {
    ($ty:ty, $kind:ident, |$v:ident| $into:expr, |$w:ident| $from:expr) => {
        impl RpcArg for $ty {
            fn kind() -> ValueKind {
                ValueKind::$kind
            }

            fn into_value(self) -> Result<Value, ProtocolError> {
                let $v = self;
                Ok(Value::$kind($into))
            }

            fn from_value(value: Value) -> Result<Self, ProtocolError> {
                match value {
                    Value::$kind($w) => $from,
                    other => Err(mismatch(ValueKind::$kind, &other)),
                }
            }
        }

        impl RpcReturn for $ty {
            fn into_response(self) -> Result<Option<Value>, ProtocolError> {
                self.into_value().map(Some)
            }
        }
    };
}

macro_rules! rpc_integer {
    ($kind:ident, $wide:ty; $($ty:ty),*) => {
        $(
            rpc_primitive!($ty, $kind, |v| <$wide>::from(v), |w| {
                <$ty>::try_from(w).map_err(|_| {
                    ProtocolError::ArgumentMismatch(format!(
                        "{} does not fit in {}",
                        w,
                        stringify!($ty)
                    ))
                })
            });
        )*
    };
}

rpc_primitive!(bool, Bool, |v| v, |w| Ok(w));
rpc_primitive!(f64, Float, |v| v, |w| Ok(w));
rpc_primitive!(f32, Float, |v| f64::from(v), |w| Ok(w as f32));
rpc_primitive!(String, Text, |v| v, |w| Ok(w));
rpc_primitive!(Vec<u8>, Bytes, |v| v, |w| Ok(w));
rpc_integer!(Int, i64; i8, i16, i32, i64);
rpc_integer!(UInt, u64; u8, u16, u32, u64);
