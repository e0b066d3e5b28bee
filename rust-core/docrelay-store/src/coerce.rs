// SPDX-License-Identifier: PMPL-1.0-or-later
//! Identifier coercion.
//!
//! Callers address documents with the 24-character hex form of an identifier
//! because JSON has no native identifier type. Before any filter, document or
//! pipeline reaches the driver, every such string is replaced with the native
//! [`ObjectId`], recursively through documents and arrays. Values that are
//! already identifiers or timestamps pass through untouched.

use crate::oid::ObjectId;
use crate::value::{Document, Value};

/// Coerce every canonical hex string inside `value` into an [`ObjectId`].
pub fn coerce_identifiers(value: Value) -> Value {
    match value {
        Value::String(s) if ObjectId::is_valid(&s) => match ObjectId::parse_str(&s) {
            Ok(oid) => Value::ObjectId(oid),
            Err(_) => Value::String(s),
        },
        Value::Array(items) => Value::Array(items.into_iter().map(coerce_identifiers).collect()),
        Value::Document(doc) => Value::Document(coerce_document(doc)),
        other => other,
    }
}

/// Document-level variant of [`coerce_identifiers`].
pub fn coerce_document(doc: Document) -> Document {
    doc.into_iter()
        .map(|(key, value)| (key, coerce_identifiers(value)))
        .collect()
}
