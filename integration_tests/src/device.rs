//! Serial client for a node's CDC data port.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::time::{Duration, Instant};

use anyhow::Result;
use serialport::SerialPort;

use crate::protocol::{
    build_command, build_command_payload, cobs_decode, cobs_encode, parse_response, CommandId,
    Response, ResponseId, RECORD_LEN,
};

/// Probe every ttyACM port with GetVersion; the ones that answer are data
/// ports (the log port never replies).
pub fn find_data_ports() -> Result<Vec<String>> {
    let mut data_ports = Vec::new();

    for port_info in serialport::available_ports()? {
        if !port_info.port_name.contains("ttyACM") {
            continue;
        }
        if let Ok(mut client) = DeviceClient::new(&port_info.port_name, 115200) {
            client.set_timeout(Duration::from_millis(500));
            if let Ok(response) = client.send_command(CommandId::GetVersion, &[]) {
                if response.resp_id == ResponseId::Version {
                    data_ports.push(port_info.port_name.clone());
                }
            }
        }
    }

    Ok(data_ports)
}

pub fn resolve_port(port_arg: &str) -> Result<String> {
    if port_arg != "auto" {
        return Ok(port_arg.to_string());
    }
    match find_data_ports()?.into_iter().next() {
        Some(port) => Ok(port),
        None => anyhow::bail!("No data port found - ensure the node is connected"),
    }
}

pub fn resolve_two_ports(port_a: &str, port_b: &str) -> Result<(String, String)> {
    match (port_a, port_b) {
        ("auto", "auto") => {
            let ports = find_data_ports()?;
            if ports.len() < 2 {
                anyhow::bail!("Need 2 nodes connected, found {}: {:?}", ports.len(), ports);
            }
            Ok((ports[0].clone(), ports[1].clone()))
        }
        ("auto", b) => Ok((resolve_port("auto")?, b.to_string())),
        (a, "auto") => Ok((a.to_string(), resolve_port("auto")?)),
        (a, b) => Ok((a.to_string(), b.to_string())),
    }
}

pub struct DeviceClient {
    port: Box<dyn SerialPort>,
    timeout: Duration,
    /// Event lines read while waiting for a reply
    events: VecDeque<String>,
}

impl DeviceClient {
    pub fn new(port_name: &str, baud_rate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baud_rate)
            .timeout(Duration::from_millis(100))
            .open()?;

        Ok(Self {
            port,
            timeout: Duration::from_secs(2),
            events: VecDeque::new(),
        })
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Discard buffered bytes and queued events
    pub fn drain(&mut self) -> Result<()> {
        self.port.clear(serialport::ClearBuffer::All)?;
        let mut buf = [0u8; 256];
        loop {
            match self.port.read(&mut buf) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => break,
                Err(e) => return Err(e.into()),
            }
        }
        self.events.clear();
        Ok(())
    }

    /// Send a command and return the first non-event frame
    pub fn send_command(&mut self, cmd_id: CommandId, payload: &[u8]) -> Result<Response> {
        self.send_frame(&build_command(cmd_id, payload))
    }

    /// Send a command with an arbitrary id
    pub fn send_raw_command(&mut self, cmd_id: u8, payload: &[u8]) -> Result<Response> {
        self.send_frame(&cobs_encode(&build_command_payload(cmd_id, payload)))
    }

    /// Send an unencoded frame as-is, COBS applied
    pub fn send_raw_frame(&mut self, frame: &[u8]) -> Result<Response> {
        self.send_frame(&cobs_encode(frame))
    }

    pub fn get_config(&mut self) -> Result<Vec<u8>> {
        let response = self.send_command(CommandId::GetConfig, &[])?;
        if response.resp_id != ResponseId::Config || response.payload.len() != RECORD_LEN {
            anyhow::bail!("Expected 96-byte Config, got {:?}", response);
        }
        Ok(response.payload)
    }

    /// SetConfig is echoed as an unsolicited Config frame
    pub fn set_config(&mut self, image: &[u8]) -> Result<Response> {
        self.send_command(CommandId::SetConfig, image)
    }

    pub fn lora_tx(&mut self, data: &[u8]) -> Result<Response> {
        self.send_command(CommandId::LoraTx, data)
    }

    /// Wait for an event line starting with `prefix`, skipping other events
    pub fn wait_for_event(&mut self, prefix: &str, timeout: Duration) -> Result<String> {
        if let Some(index) = self.events.iter().position(|line| line.starts_with(prefix)) {
            return Ok(self.events.remove(index).unwrap_or_default());
        }

        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            let Some(response) = self.read_response(deadline - Instant::now())? else {
                break;
            };
            if let Some(line) = response.event_line() {
                if line.starts_with(prefix) {
                    return Ok(line.to_string());
                }
            }
        }
        anyhow::bail!("Timeout waiting for '{}'", prefix)
    }

    fn send_frame(&mut self, frame: &[u8]) -> Result<Response> {
        self.port.write_all(frame)?;
        self.port.flush()?;

        let deadline = Instant::now() + self.timeout;
        while Instant::now() < deadline {
            let Some(response) = self.read_response(deadline - Instant::now())? else {
                break;
            };
            match response.event_line() {
                Some(line) => self.events.push_back(line.to_string()),
                None => return Ok(response),
            }
        }
        anyhow::bail!("Timeout waiting for response")
    }

    /// Read one frame, `None` on timeout
    fn read_response(&mut self, timeout: Duration) -> Result<Option<Response>> {
        let mut data = Vec::new();
        let mut byte = [0u8; 1];
        let start = Instant::now();

        while start.elapsed() < timeout {
            match self.port.read(&mut byte) {
                Ok(1) if byte[0] == 0x00 => {
                    // Padding or leading delimiter
                    if data.is_empty() {
                        continue;
                    }
                    data.push(0x00);
                    let decoded = cobs_decode(&data)?;
                    return parse_response(&decoded).map(Some);
                }
                Ok(1) => data.push(byte[0]),
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }
}
