use std::io::Write;
use std::time::Duration;

use glove_protocol::{FingerCommand, Hand, COMMAND_LEN, HAND_COUNT};
use serialport::SerialPort;
use tracing::{info, warn};

use crate::error::DeviceError;

/// A per-hand link to a glove. Writes are fire-and-forget: success means the
/// bytes left the host, not that the glove acknowledged them.
pub trait DeviceChannel {
    fn is_open(&self) -> bool;
    fn write(&mut self, bytes: &[u8; COMMAND_LEN]) -> Result<(), DeviceError>;
    fn name(&self) -> &str;
}

pub struct SerialChannel {
    port_name: String,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialChannel {
    /// Opens the port once at startup. A failed open leaves a closed channel
    /// rather than an error: the panel keeps running and shows the hand as disconnected.
    pub fn open(port_name: &str, baud_rate: u32) -> Self {
        let port = match serialport::new(port_name, baud_rate)
            .timeout(Duration::from_millis(50))
            .open()
        {
            Ok(port) => {
                info!(port = port_name, baud_rate, "opened glove port");
                Some(port)
            }
            Err(e) => {
                warn!(port = port_name, error = %e, "could not open glove port");
                None
            }
        };
        Self {
            port_name: port_name.to_string(),
            port,
        }
    }
}

impl DeviceChannel for SerialChannel {
    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn write(&mut self, bytes: &[u8; COMMAND_LEN]) -> Result<(), DeviceError> {
        let port = self.port.as_mut().ok_or(DeviceError::NotOpen)?;
        port.write_all(bytes)?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.port_name
    }
}

/// The left/right channel pair shared by the manual dispatcher and the scheduler.
pub struct DevicePair {
    channels: [Box<dyn DeviceChannel>; HAND_COUNT],
}

impl DevicePair {
    pub fn new(left: Box<dyn DeviceChannel>, right: Box<dyn DeviceChannel>) -> Self {
        Self {
            channels: [left, right],
        }
    }

    pub fn open_serial(left_port: &str, right_port: &str, baud_rate: u32) -> Self {
        Self::new(
            Box::new(SerialChannel::open(left_port, baud_rate)),
            Box::new(SerialChannel::open(right_port, baud_rate)),
        )
    }

    pub fn is_open(&self, hand: Hand) -> bool {
        self.channels[hand.index()].is_open()
    }

    pub fn name(&self, hand: Hand) -> &str {
        self.channels[hand.index()].name()
    }

    pub fn send(&mut self, hand: Hand, command: &FingerCommand) -> Result<(), DeviceError> {
        let channel = &mut self.channels[hand.index()];
        if !channel.is_open() {
            return Err(DeviceError::NotOpen);
        }
        channel.write(&command.encode())
    }
}


#[cfg(test)]
mod tests {
    use super::fake::*;
    use super::*;
    use glove_protocol::FingerChannel;

    #[test]
    fn send_routes_by_hand() {
        let (mut devices, log) = pair(true, true);
        let command = FingerCommand::new(FingerChannel::Middle, 90, 0.2);
        devices.send(Hand::Right, &command).unwrap();
        assert_eq!(log.borrow().as_slice(), &[(Hand::Right, command)]);
    }

    #[test]
    fn closed_channel_refuses_writes() {
        let (mut devices, log) = pair(false, true);
        let command = FingerCommand::new(FingerChannel::Thumb, 10, 0.2);
        assert!(matches!(
            devices.send(Hand::Left, &command),
            Err(DeviceError::NotOpen)
        ));
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn missing_serial_port_yields_closed_channel() {
        let channel = SerialChannel::open("/dev/glove-port-that-does-not-exist", 9600);
        assert!(!channel.is_open());
        assert_eq!(channel.name(), "/dev/glove-port-that-does-not-exist");
    }
}
