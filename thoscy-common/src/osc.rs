//! OSC packet conversion for addressed messages.

use rosc::{OscArray, OscBundle, OscMessage, OscPacket, OscTime, OscType};

use crate::address::AddressedMessage;
use crate::error::{Error, Result};
use crate::telemetry::Value;

/// Bundle time tag meaning "dispatch immediately".
pub const IMMEDIATELY: OscTime = OscTime {
    seconds: 0,
    fractional: 1,
};

/// Convert a value into an OSC argument.
///
/// Nested documents have no OSC type and are sent as compact JSON text.
pub fn to_osc_arg(value: &Value) -> OscType {
    match value {
        Value::Null => OscType::Nil,
        Value::Bool(b) => OscType::Bool(*b),
        Value::Int(i) => match i32::try_from(*i) {
            Ok(i) => OscType::Int(i),
            Err(_) => OscType::Long(*i),
        },
        Value::Float(f) => OscType::Float(*f as f32),
        Value::Text(s) => OscType::String(s.clone()),
        Value::Sequence(items) => OscType::Array(OscArray {
            content: items.iter().map(to_osc_arg).collect(),
        }),
        Value::Object(doc) => OscType::String(Value::Object(doc.clone()).to_compact_json()),
    }
}

/// Convert an OSC argument into a value.
pub fn from_osc_arg(arg: OscType) -> Value {
    match arg {
        OscType::Int(i) => Value::Int(i as i64),
        OscType::Long(i) => Value::Int(i),
        OscType::Float(f) => Value::Float(f as f64),
        OscType::Double(f) => Value::Float(f),
        OscType::String(s) => Value::Text(s),
        OscType::Char(c) => Value::Text(c.to_string()),
        OscType::Bool(b) => Value::Bool(b),
        OscType::Nil => Value::Null,
        OscType::Inf => Value::Float(f64::INFINITY),
        OscType::Time(t) => {
            Value::Float(t.seconds as f64 + t.fractional as f64 / (u32::MAX as f64 + 1.0))
        }
        OscType::Blob(bytes) => {
            Value::Sequence(bytes.into_iter().map(|b| Value::Int(b as i64)).collect())
        }
        OscType::Color(c) => Value::Sequence(
            [c.red, c.green, c.blue, c.alpha]
                .into_iter()
                .map(|b| Value::Int(b as i64))
                .collect(),
        ),
        OscType::Midi(m) => Value::Sequence(
            [m.port, m.status, m.data1, m.data2]
                .into_iter()
                .map(|b| Value::Int(b as i64))
                .collect(),
        ),
        OscType::Array(array) => {
            Value::Sequence(array.content.into_iter().map(from_osc_arg).collect())
        }
    }
}

impl From<&AddressedMessage> for OscMessage {
    fn from(message: &AddressedMessage) -> Self {
        OscMessage {
            addr: message.address.clone(),
            args: message.args.iter().map(to_osc_arg).collect(),
        }
    }
}

impl From<OscMessage> for AddressedMessage {
    fn from(message: OscMessage) -> Self {
        AddressedMessage::new(
            message.addr,
            message.args.into_iter().map(from_osc_arg).collect(),
        )
    }
}

/// Flatten a packet into its messages, in bundle order.
pub fn flatten_packet(packet: OscPacket) -> Vec<AddressedMessage> {
    let mut messages = Vec::new();
    collect_messages(packet, &mut messages);
    messages
}

fn collect_messages(packet: OscPacket, out: &mut Vec<AddressedMessage>) {
    match packet {
        OscPacket::Message(message) => out.push(message.into()),
        OscPacket::Bundle(bundle) => {
            for inner in bundle.content {
                collect_messages(inner, out);
            }
        }
    }
}

/// Decode a UDP datagram into addressed messages.
pub fn decode_datagram(datagram: &[u8]) -> Result<Vec<AddressedMessage>> {
    let (_, packet) =
        rosc::decoder::decode_udp(datagram).map_err(|e| Error::Osc(format!("{:?}", e)))?;
    Ok(flatten_packet(packet))
}

/// Encode a single message.
pub fn encode_message(message: &AddressedMessage) -> Result<Vec<u8>> {
    rosc::encoder::encode(&OscPacket::Message(message.into()))
        .map_err(|e| Error::Osc(format!("{:?}", e)))
}

/// Encode several messages into one bundle dispatched immediately.
pub fn encode_bundle(messages: &[AddressedMessage]) -> Result<Vec<u8>> {
    let bundle = OscBundle {
        timetag: IMMEDIATELY,
        content: messages
            .iter()
            .map(|m| OscPacket::Message(m.into()))
            .collect(),
    };
    rosc::encoder::encode(&OscPacket::Bundle(bundle)).map_err(|e| Error::Osc(format!("{:?}", e)))
}
