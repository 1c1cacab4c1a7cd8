//! Slash-delimited message addresses.

use std::fmt;

use crate::telemetry::Value;

/// Address component used for key/value pair messages.
pub const TELEMETRY_COMPONENT: &str = "telemetry";

/// An addressed message: a slash-delimited address plus ordered arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct AddressedMessage {
    pub address: String,
    pub args: Vec<Value>,
}

impl AddressedMessage {
    pub fn new(address: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            address: address.into(),
            args,
        }
    }

    /// Build a message from address components.
    ///
    /// # Example
    /// ```
    /// use thoscy_common::address::AddressedMessage;
    ///
    /// let msg = AddressedMessage::from_components(["foo", "bar"], vec![1.into()]);
    /// assert_eq!(msg.address, "/foo/bar");
    /// ```
    pub fn from_components<I, S>(components: I, args: Vec<Value>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let address = components
            .into_iter()
            .fold(String::new(), |mut address, component| {
                address.push('/');
                address.push_str(component.as_ref());
                address
            });
        Self { address, args }
    }

    /// Address components after the leading slash.
    pub fn components(&self) -> Vec<&str> {
        split_address(&self.address)
    }

    /// Prepend a device key to the address.
    ///
    /// # Example
    /// ```
    /// use thoscy_common::address::AddressedMessage;
    ///
    /// let msg = AddressedMessage::new("/temperature", vec![]).with_prefix("sensor1");
    /// assert_eq!(msg.address, "/sensor1/temperature");
    /// ```
    pub fn with_prefix(mut self, key: &str) -> Self {
        if !key.is_empty() {
            self.address = format!("/{}{}", key, self.address);
        }
        self
    }
}

impl fmt::Display for AddressedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Split an address into its components, dropping the leading slash.
///
/// Empty components are kept so callers can reject them.
///
/// # Example
/// ```
/// use thoscy_common::address::split_address;
///
/// assert_eq!(split_address("/foo/bar"), vec!["foo", "bar"]);
/// assert_eq!(split_address("/foo/"), vec!["foo", ""]);
/// ```
pub fn split_address(address: &str) -> Vec<&str> {
    address
        .strip_prefix('/')
        .unwrap_or(address)
        .split('/')
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_components() {
        let msg = AddressedMessage::new("/a/b/c", vec![Value::Int(1)]);
        assert_eq!(msg.components(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_empty_prefix_is_noop() {
        let msg = AddressedMessage::new("/x", vec![]).with_prefix("");
        assert_eq!(msg.address, "/x");
    }

    #[test]
    fn test_display() {
        let msg = AddressedMessage::new("/t", vec![Value::from("a"), Value::Float(1.5)]);
        assert_eq!(msg.to_string(), "/t a 1.5");
    }
}
