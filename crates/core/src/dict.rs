// SPDX-FileCopyrightText: © 2025 Rivulet Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Typed attribute dictionary attached to records.
//!
//! A [`Udict`] maps `(namespace, name)` keys to typed values. Keys are
//! unique and iteration order is insertion order, which keeps duplicated
//! records byte-stable; semantically the order is irrelevant.
//!
//! Records wrap the dictionary in an `Rc` and only clone it on write, so
//! attaching the same headers to thousands of records costs one allocation.

use crate::error::{Error, Result};
use crate::rational::Rational;
use indexmap::IndexMap;

/// Attribute namespaces.
///
/// Each family of record accessors owns one namespace, so a clock attribute
/// can never collide with a flow attribute of the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Flow,
    Clock,
    Block,
    Pic,
    Sound,
}

/// A dictionary key. Attribute names are compile-time constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Key {
    pub namespace: Namespace,
    pub name: &'static str,
}

impl Key {
    pub const fn new(namespace: Namespace, name: &'static str) -> Self {
        Self { namespace, name }
    }
}

/// A typed attribute value.
///
/// `Void` is a pure presence marker, used for flags such as the
/// discontinuity bit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Void,
    Bool(bool),
    Signed(i64),
    Unsigned(u64),
    Rational(Rational),
    String(String),
    Opaque(Vec<u8>),
}

/// The attribute dictionary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Udict {
    entries: IndexMap<Key, Value>,
}

macro_rules! typed_getter {
    ($fn_name:ident, $variant:ident, $ty:ty) => {
        /// Returns the attribute, or `None` when absent.
        ///
        /// # Errors
        ///
        /// Returns [`Error::Invalid`] when the key exists with another type.
        pub fn $fn_name(&self, key: Key) -> Result<Option<$ty>> {
            match self.entries.get(&key) {
                None => Ok(None),
                Some(Value::$variant(v)) => Ok(Some(v.clone())),
                Some(other) => Err(Error::invalid(format!(
                    "attribute {}.{} holds {:?}, not a {}",
                    namespace_label(key.namespace),
                    key.name,
                    other,
                    stringify!($variant),
                ))),
            }
        }
    };
}

impl Udict {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets or replaces an attribute.
    pub fn set(&mut self, key: Key, value: Value) {
        self.entries.insert(key, value);
    }

    /// Removes an attribute. Returns true if it was present.
    pub fn delete(&mut self, key: Key) -> bool {
        self.entries.shift_remove(&key).is_some()
    }

    /// Raw lookup, for callers that want to branch on the value type.
    pub fn get(&self, key: Key) -> Option<&Value> {
        self.entries.get(&key)
    }

    /// Sets a presence-only flag.
    pub fn set_void(&mut self, key: Key) {
        self.entries.insert(key, Value::Void);
    }

    /// Tests a presence-only flag.
    pub fn has_void(&self, key: Key) -> bool {
        matches!(self.entries.get(&key), Some(Value::Void))
    }

    typed_getter!(bool_attr, Bool, bool);
    typed_getter!(signed, Signed, i64);
    typed_getter!(unsigned, Unsigned, u64);
    typed_getter!(rational, Rational, Rational);
    typed_getter!(string, String, String);
    typed_getter!(opaque, Opaque, Vec<u8>);

    pub fn iter(&self) -> impl Iterator<Item = (&Key, &Value)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

const fn namespace_label(namespace: Namespace) -> &'static str {
    match namespace {
        Namespace::Flow => "flow",
        Namespace::Clock => "clock",
        Namespace::Block => "block",
        Namespace::Pic => "pic",
        Namespace::Sound => "sound",
    }
}
