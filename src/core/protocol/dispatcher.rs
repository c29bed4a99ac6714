use crate::core::protocol::grammar::ResultToken;
use crate::core::protocol::listener::GattToolListener;
use tracing::debug;
use uuid::Uuid;

/// Turns an accepted result line into exactly one listener callback.
pub trait ResultDispatcher: Send + Sync {
    /// Returns `true` when the argument was understood and a callback fired.
    fn dispatch(
        &self,
        listener: &dyn GattToolListener,
        token: ResultToken,
        address: &str,
        argument: &str,
    ) -> bool;
}

/// Default decoder for the argument formats printed by gatttool.
///
/// Handles are hex (with or without `0x`), statuses are decimal, values are
/// hex bytes either space separated or contiguous.
#[derive(Debug, Clone, Copy, Default)]
pub struct GattResponseDecoder;

/// Bluetooth base UUID, `0000xxxx-0000-1000-8000-00805f9b34fb`
const BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5f9b_34fb;

impl ResultDispatcher for GattResponseDecoder {
    fn dispatch(
        &self,
        listener: &dyn GattToolListener,
        token: ResultToken,
        address: &str,
        argument: &str,
    ) -> bool {
        let fields: Vec<&str> = argument.split_whitespace().collect();
        let handled = decode(listener, token, address, &fields).is_some();
        if !handled {
            debug!("Could not decode {} argument '{}'", token, argument);
        }
        handled
    }
}

fn decode(
    listener: &dyn GattToolListener,
    token: ResultToken,
    address: &str,
    fields: &[&str],
) -> Option<()> {
    match token {
        ResultToken::Notification => {
            let (handle, value) = handle_and_value(fields)?;
            listener.on_notification(address, handle, &value);
        }
        ResultToken::Indication => {
            let (handle, value) = handle_and_value(fields)?;
            listener.on_indication(address, handle, &value);
        }
        ResultToken::Connected => listener.connected(address, status(fields)?),
        ResultToken::Disconnected => listener.disconnected(address),
        ResultToken::PrimaryAll => {
            let [start, end, uuid] = exact::<3>(fields)?;
            listener.primary_all(address, parse_handle(start)?, parse_handle(end)?, parse_uuid(uuid)?);
        }
        ResultToken::PrimaryAllEnd => listener.primary_all_end(address, status(fields)?),
        ResultToken::PrimaryUuid => {
            let [start, end] = exact::<2>(fields)?;
            listener.primary_uuid(address, parse_handle(start)?, parse_handle(end)?);
        }
        ResultToken::PrimaryUuidEnd => listener.primary_uuid_end(address, status(fields)?),
        ResultToken::Char => {
            let [handle, properties, value_handle, uuid] = exact::<4>(fields)?;
            listener.characteristic(
                address,
                parse_handle(handle)?,
                parse_properties(properties)?,
                parse_handle(value_handle)?,
                parse_uuid(uuid)?,
            );
        }
        ResultToken::CharEnd => listener.characteristic_end(address, status(fields)?),
        ResultToken::CharDesc => {
            let [handle, uuid] = exact::<2>(fields)?;
            listener.characteristic_descriptor(address, parse_handle(handle)?, parse_uuid(uuid)?);
        }
        ResultToken::CharDescEnd => listener.characteristic_descriptor_end(address, status(fields)?),
        ResultToken::CharValDesc => {
            let (first, rest) = fields.split_first()?;
            listener.value_by_handle(address, &parse_value(rest)?, parse_status(first)?);
        }
        ResultToken::CharValDescEnd => listener.value_by_handle_end(address, status(fields)?),
        ResultToken::CharReadUuid => {
            let (handle, value) = handle_and_value(fields)?;
            listener.value_by_uuid(address, handle, &value);
        }
        ResultToken::CharReadUuidEnd => listener.value_by_uuid_end(address, status(fields)?),
        ResultToken::CharWrite => listener.write_result(address, status(fields)?),
        ResultToken::SecLevel => listener.security_level_result(address, status(fields)?),
        ResultToken::Mtu => listener.mtu_result(address, status(fields)?),
    }
    Some(())
}

fn exact<'a, const N: usize>(fields: &[&'a str]) -> Option<[&'a str; N]> {
    fields.try_into().ok()
}

fn status(fields: &[&str]) -> Option<i32> {
    let [value] = exact::<1>(fields)?;
    parse_status(value)
}

fn handle_and_value(fields: &[&str]) -> Option<(u16, Vec<u8>)> {
    let (handle, rest) = fields.split_first()?;
    Some((parse_handle(handle)?, parse_value(rest)?))
}

fn strip_hex_prefix(text: &str) -> &str {
    text.strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text)
}

pub(crate) fn parse_status(text: &str) -> Option<i32> {
    text.parse().ok()
}

pub(crate) fn parse_handle(text: &str) -> Option<u16> {
    u16::from_str_radix(strip_hex_prefix(text), 16).ok()
}

fn parse_properties(text: &str) -> Option<u8> {
    u8::from_str_radix(strip_hex_prefix(text), 16).ok()
}

/// Hex bytes, either `01 02 ff` (already split) or `0102ff`
pub(crate) fn parse_value(fields: &[&str]) -> Option<Vec<u8>> {
    let joined: String = fields.iter().map(|f| strip_hex_prefix(f)).collect();
    hex::decode(joined).ok()
}

/// 16 and 32 bit UUIDs are expanded over the Bluetooth base UUID.
pub(crate) fn parse_uuid(text: &str) -> Option<Uuid> {
    let short = strip_hex_prefix(text);
    if matches!(short.len(), 4 | 8) {
        let value = u32::from_str_radix(short, 16).ok()?;
        return Some(Uuid::from_u128(BASE_UUID | (u128::from(value) << 96)));
    }
    Uuid::parse_str(text).ok()
}
