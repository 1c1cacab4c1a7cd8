//! Translation between nested key/value documents and addressed messages.
//!
//! Documents become addresses by following nested objects:
//!
//! ```text
//! {"hello": "world"}                -> /hello world
//! {"foo": {"bar": 123}}             -> /foo/bar 123
//! {"bar": {"baz": ["abc", 123]}}    -> /bar/baz abc 123
//! {"foo": {"bar": 123, "baz": 456}} -> /foo/telemetry bar 123 baz 456
//! ```
//!
//! and addresses become documents by nesting each component:
//!
//! ```text
//! /foo/bar 123                   -> {"foo": {"bar": 123}}
//! /bar/baz abc 123               -> {"bar": {"baz": ["abc", 123]}}
//! /foo/telemetry bar 123 baz 456 -> {"foo": {"bar": 123, "baz": 456}}
//! /baz 1 2 3 4                   -> {"baz": [1, 2, 3, 4]}
//! ```

use thiserror::Error;
use tracing::debug;

use crate::address::{AddressedMessage, TELEMETRY_COMPONENT, split_address};
use crate::telemetry::{Document, Value};

/// Codec failures. The triggering message is dropped by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("document is empty")]
    EmptyDocument,

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("{0}: arguments are required")]
    MissingArguments(String),

    #[error("{0}: a minimum of 2 arguments is required")]
    TooFewPairs(String),

    #[error("{0}: arguments must come in key/value pairs")]
    UnpairedArguments(String),

    #[error("{address}: pair key at argument {index} must be a string")]
    NonStringKey { address: String, index: usize },
}

/// Convert a document into an addressed message.
///
/// Descends into the first nested object (in insertion order) at each
/// level. At the leaf level a single pair becomes `/…/key value`, while
/// several pairs become `/…/telemetry key1 value1 key2 value2 …`.
/// Sequence values cannot be flattened into pairs and are skipped in
/// the multi-pair form.
pub fn to_addressed_message(doc: &Document) -> Result<AddressedMessage, CodecError> {
    if doc.is_empty() {
        return Err(CodecError::EmptyDocument);
    }

    let mut components: Vec<&str> = Vec::new();
    let mut current = doc;
    while let Some((key, nested)) = current.first_object() {
        components.push(key);
        current = nested;
    }

    let mut args = Vec::new();
    match current.len() {
        0 => return Err(CodecError::EmptyDocument),
        1 => {
            let Some((key, value)) = current.iter().next() else {
                return Err(CodecError::EmptyDocument);
            };
            components.push(key);
            match value {
                Value::Sequence(items) => {
                    args.extend(items.iter().cloned().map(Value::coerce_numeric));
                }
                scalar => args.push(scalar.clone().coerce_numeric()),
            }
        }
        _ => {
            components.push(TELEMETRY_COMPONENT);
            push_pairs(current, &mut args);
        }
    }

    let message = AddressedMessage::from_components(components, args);
    if message.args.is_empty() {
        return Err(CodecError::MissingArguments(message.address));
    }
    Ok(message)
}

/// Convert a flat document into a single `/telemetry` pair message,
/// regardless of how many keys it holds.
pub fn to_telemetry_message(doc: &Document) -> Result<AddressedMessage, CodecError> {
    if doc.is_empty() {
        return Err(CodecError::EmptyDocument);
    }

    let mut args = Vec::with_capacity(doc.len() * 2);
    push_pairs(doc, &mut args);

    let message = AddressedMessage::from_components([TELEMETRY_COMPONENT], args);
    if message.args.is_empty() {
        return Err(CodecError::MissingArguments(message.address));
    }
    Ok(message)
}

fn push_pairs(doc: &Document, args: &mut Vec<Value>) {
    for (key, value) in doc.iter() {
        if value.is_sequence() {
            debug!(key, value = %value, "Skipping sequence in key/value pair message");
            continue;
        }
        args.push(Value::from(key));
        args.push(value.clone().coerce_numeric());
    }
}

/// Validate an address and its arguments.
///
/// Returns the address components (without the leading slash).
pub fn validate<'a>(address: &'a str, args: &[Value]) -> Result<Vec<&'a str>, CodecError> {
    if !address.starts_with('/') {
        return Err(CodecError::InvalidAddress(address.to_string()));
    }

    let components = split_address(address);
    if components.iter().any(|c| c.is_empty()) {
        return Err(CodecError::InvalidAddress(address.to_string()));
    }

    if args.is_empty() {
        return Err(CodecError::MissingArguments(address.to_string()));
    }

    if components.last() == Some(&TELEMETRY_COMPONENT) {
        if args.len() < 2 {
            return Err(CodecError::TooFewPairs(address.to_string()));
        }
        if args.len() % 2 != 0 {
            return Err(CodecError::UnpairedArguments(address.to_string()));
        }
        if let Some(index) = args.iter().step_by(2).position(|key| key.as_str().is_none()) {
            return Err(CodecError::NonStringKey {
                address: address.to_string(),
                index: index * 2,
            });
        }
    }

    Ok(components)
}

/// Convert an addressed message into a nested document.
///
/// Duplicate pair keys in a `/telemetry` message overwrite earlier ones.
pub fn to_document(address: &str, args: &[Value]) -> Result<Document, CodecError> {
    let components = validate(address, args)?;
    let Some((last, parents)) = components.split_last() else {
        return Err(CodecError::InvalidAddress(address.to_string()));
    };

    let mut leaf = Document::new();
    if *last == TELEMETRY_COMPONENT {
        for pair in args.chunks_exact(2) {
            if let (Some(key), value) = (pair[0].as_str(), &pair[1]) {
                leaf.insert(key, value.clone());
            }
        }
    } else if let [single] = args {
        leaf.insert(*last, single.clone());
    } else {
        leaf.insert(*last, Value::Sequence(args.to_vec()));
    }

    let doc = parents
        .iter()
        .rev()
        .fold(leaf, |inner, key| Document::new().with(*key, inner));

    if doc.is_empty() {
        return Err(CodecError::EmptyDocument);
    }
    Ok(doc)
}

/// Convert an [`AddressedMessage`] into a nested document.
pub fn message_to_document(message: &AddressedMessage) -> Result<Document, CodecError> {
    to_document(&message.address, &message.args)
}
