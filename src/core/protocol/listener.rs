use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Protocol-level problems detected by the driver itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShellError {
    /// A result line named a different device than the last prompt
    AddressChanged,
}

/// Receiver of everything a session decodes from its tool.
///
/// Every method defaults to doing nothing so implementors only override
/// the notifications they care about. Callbacks run on the session's
/// event task and must not block.
#[allow(unused_variables)]
pub trait GattToolListener: Send + Sync {
    fn on_notification(&self, address: &str, handle: u16, value: &[u8]) {}
    fn on_indication(&self, address: &str, handle: u16, value: &[u8]) {}
    fn connected(&self, address: &str, status: i32) {}
    fn disconnected(&self, address: &str) {}
    fn primary_all(&self, address: &str, start: u16, end: u16, uuid: Uuid) {}
    fn primary_all_end(&self, address: &str, status: i32) {}
    fn primary_uuid(&self, address: &str, start: u16, end: u16) {}
    fn primary_uuid_end(&self, address: &str, status: i32) {}
    fn characteristic(&self, address: &str, handle: u16, properties: u8, value_handle: u16, uuid: Uuid) {}
    fn characteristic_end(&self, address: &str, status: i32) {}
    fn characteristic_descriptor(&self, address: &str, handle: u16, uuid: Uuid) {}
    fn characteristic_descriptor_end(&self, address: &str, status: i32) {}
    fn value_by_handle(&self, address: &str, value: &[u8], status: i32) {}
    fn value_by_handle_end(&self, address: &str, status: i32) {}
    fn value_by_uuid(&self, address: &str, handle: u16, value: &[u8]) {}
    fn value_by_uuid_end(&self, address: &str, status: i32) {}
    fn write_result(&self, address: &str, status: i32) {}
    fn security_level_result(&self, address: &str, status: i32) {}
    fn mtu_result(&self, address: &str, status: i32) {}

    /// The tool exited; `-1` when it was terminated by a signal
    fn process_exit(&self, code: i32) {}
    /// The tool's output closed while the process was still alive
    fn process_stream_closed(&self) {}
    fn shell_error(&self, error: ShellError) {}
    /// `ERROR(code,subcode):` line printed by the tool
    fn tool_error(&self, code: u32, subcode: u32) {}
}

/// Owned form of every listener callback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GattEvent {
    Notification { address: String, handle: u16, value: Vec<u8> },
    Indication { address: String, handle: u16, value: Vec<u8> },
    Connected { address: String, status: i32 },
    Disconnected { address: String },
    PrimaryAll { address: String, start: u16, end: u16, uuid: Uuid },
    PrimaryAllEnd { address: String, status: i32 },
    PrimaryUuid { address: String, start: u16, end: u16 },
    PrimaryUuidEnd { address: String, status: i32 },
    Characteristic { address: String, handle: u16, properties: u8, value_handle: u16, uuid: Uuid },
    CharacteristicEnd { address: String, status: i32 },
    CharacteristicDescriptor { address: String, handle: u16, uuid: Uuid },
    CharacteristicDescriptorEnd { address: String, status: i32 },
    ValueByHandle { address: String, value: Vec<u8>, status: i32 },
    ValueByHandleEnd { address: String, status: i32 },
    ValueByUuid { address: String, handle: u16, value: Vec<u8> },
    ValueByUuidEnd { address: String, status: i32 },
    WriteResult { address: String, status: i32 },
    SecurityLevelResult { address: String, status: i32 },
    MtuResult { address: String, status: i32 },
    ProcessExit { code: i32 },
    ProcessStreamClosed,
    ShellError { error: ShellError },
    ToolError { code: u32, subcode: u32 },
}

impl GattEvent {
    /// Events after which no further output is expected for the running
    /// command (or for the session at all).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GattEvent::Disconnected { .. }
                | GattEvent::PrimaryAllEnd { .. }
                | GattEvent::PrimaryUuidEnd { .. }
                | GattEvent::CharacteristicEnd { .. }
                | GattEvent::CharacteristicDescriptorEnd { .. }
                | GattEvent::ValueByHandleEnd { .. }
                | GattEvent::ValueByUuidEnd { .. }
                | GattEvent::WriteResult { .. }
                | GattEvent::SecurityLevelResult { .. }
                | GattEvent::MtuResult { .. }
                | GattEvent::ProcessExit { .. }
                | GattEvent::ProcessStreamClosed
                | GattEvent::ToolError { .. }
        )
    }
}

/// Listener that forwards every callback as a [`GattEvent`] on a channel
#[derive(Debug, Clone)]
pub struct ChannelListener {
    sender: mpsc::UnboundedSender<GattEvent>,
}

impl ChannelListener {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<GattEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    fn emit(&self, event: GattEvent) {
        // A dropped receiver only means nobody is watching any more.
        let _ = self.sender.send(event);
    }
}

impl GattToolListener for ChannelListener {
    fn on_notification(&self, address: &str, handle: u16, value: &[u8]) {
        self.emit(GattEvent::Notification { address: address.to_string(), handle, value: value.to_vec() });
    }

    fn on_indication(&self, address: &str, handle: u16, value: &[u8]) {
        self.emit(GattEvent::Indication { address: address.to_string(), handle, value: value.to_vec() });
    }

    fn connected(&self, address: &str, status: i32) {
        self.emit(GattEvent::Connected { address: address.to_string(), status });
    }

    fn disconnected(&self, address: &str) {
        self.emit(GattEvent::Disconnected { address: address.to_string() });
    }

    fn primary_all(&self, address: &str, start: u16, end: u16, uuid: Uuid) {
        self.emit(GattEvent::PrimaryAll { address: address.to_string(), start, end, uuid });
    }

    fn primary_all_end(&self, address: &str, status: i32) {
        self.emit(GattEvent::PrimaryAllEnd { address: address.to_string(), status });
    }

    fn primary_uuid(&self, address: &str, start: u16, end: u16) {
        self.emit(GattEvent::PrimaryUuid { address: address.to_string(), start, end });
    }

    fn primary_uuid_end(&self, address: &str, status: i32) {
        self.emit(GattEvent::PrimaryUuidEnd { address: address.to_string(), status });
    }

    fn characteristic(&self, address: &str, handle: u16, properties: u8, value_handle: u16, uuid: Uuid) {
        self.emit(GattEvent::Characteristic {
            address: address.to_string(),
            handle,
            properties,
            value_handle,
            uuid,
        });
    }

    fn characteristic_end(&self, address: &str, status: i32) {
        self.emit(GattEvent::CharacteristicEnd { address: address.to_string(), status });
    }

    fn characteristic_descriptor(&self, address: &str, handle: u16, uuid: Uuid) {
        self.emit(GattEvent::CharacteristicDescriptor { address: address.to_string(), handle, uuid });
    }

    fn characteristic_descriptor_end(&self, address: &str, status: i32) {
        self.emit(GattEvent::CharacteristicDescriptorEnd { address: address.to_string(), status });
    }

    fn value_by_handle(&self, address: &str, value: &[u8], status: i32) {
        self.emit(GattEvent::ValueByHandle { address: address.to_string(), value: value.to_vec(), status });
    }

    fn value_by_handle_end(&self, address: &str, status: i32) {
        self.emit(GattEvent::ValueByHandleEnd { address: address.to_string(), status });
    }

    fn value_by_uuid(&self, address: &str, handle: u16, value: &[u8]) {
        self.emit(GattEvent::ValueByUuid { address: address.to_string(), handle, value: value.to_vec() });
    }

    fn value_by_uuid_end(&self, address: &str, status: i32) {
        self.emit(GattEvent::ValueByUuidEnd { address: address.to_string(), status });
    }

    fn write_result(&self, address: &str, status: i32) {
        self.emit(GattEvent::WriteResult { address: address.to_string(), status });
    }

    fn security_level_result(&self, address: &str, status: i32) {
        self.emit(GattEvent::SecurityLevelResult { address: address.to_string(), status });
    }

    fn mtu_result(&self, address: &str, status: i32) {
        self.emit(GattEvent::MtuResult { address: address.to_string(), status });
    }

    fn process_exit(&self, code: i32) {
        self.emit(GattEvent::ProcessExit { code });
    }

    fn process_stream_closed(&self) {
        self.emit(GattEvent::ProcessStreamClosed);
    }

    fn shell_error(&self, error: ShellError) {
        self.emit(GattEvent::ShellError { error });
    }

    fn tool_error(&self, code: u32, subcode: u32) {
        self.emit(GattEvent::ToolError { code, subcode });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Silent;
    impl GattToolListener for Silent {}

    #[test]
    fn test_default_methods_are_noops() {
        let listener = Silent;
        listener.connected("AA:BB:CC:DD:EE:FF", 0);
        listener.process_exit(1);
        listener.shell_error(ShellError::AddressChanged);
    }

    #[test]
    fn test_channel_listener_forwards_events() {
        let (listener, mut events) = ChannelListener::new();

        listener.on_notification("AA:BB:CC:DD:EE:FF", 0x0012, &[1, 2]);
        listener.shell_error(ShellError::AddressChanged);
        listener.process_stream_closed();

        assert_eq!(
            events.try_recv().unwrap(),
            GattEvent::Notification {
                address: "AA:BB:CC:DD:EE:FF".to_string(),
                handle: 0x0012,
                value: vec![1, 2],
            }
        );
        assert_eq!(
            events.try_recv().unwrap(),
            GattEvent::ShellError { error: ShellError::AddressChanged }
        );
        assert_eq!(events.try_recv().unwrap(), GattEvent::ProcessStreamClosed);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_channel_listener_survives_dropped_receiver() {
        let (listener, events) = ChannelListener::new();
        drop(events);
        listener.mtu_result("AA:BB:CC:DD:EE:FF", 0);
    }

    #[test]
    fn test_terminal_events() {
        let address = "AA:BB:CC:DD:EE:FF".to_string();
        assert!(GattEvent::PrimaryAllEnd { address: address.clone(), status: 0 }.is_terminal());
        assert!(GattEvent::ProcessExit { code: 0 }.is_terminal());
        assert!(!GattEvent::PrimaryAll {
            address: address.clone(),
            start: 1,
            end: 5,
            uuid: Uuid::nil(),
        }
        .is_terminal());
        assert!(!GattEvent::Connected { address, status: 0 }.is_terminal());
    }

    #[test]
    fn test_event_json_shape() {
        let json = serde_json::to_value(GattEvent::MtuResult {
            address: "AA:BB:CC:DD:EE:FF".to_string(),
            status: 0,
        })
        .unwrap();
        assert_eq!(json["event"], "mtu_result");
        assert_eq!(json["status"], 0);
    }
}
