//! Host-side view of the node's framed protocol.

#![allow(dead_code)]

use crc::{Crc, CRC_16_XMODEM};

pub const PROTOCOL_VERSION: u8 = 1;

/// Size of the settings record image
pub const RECORD_LEN: usize = 96;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandId {
    GetVersion = 0x01,
    Reboot = 0x03,
    FactoryReset = 0x04,
    LoraTx = 0x10,
    GetConfig = 0x20,
    SetConfig = 0x21,
    SaveConfig = 0x22,
    SetRxMode = 0x23,
    GetStatus = 0x24,
    GetLastRx = 0x25,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResponseStatus {
    Success = 0x00,
    InvalidCommand = 0x01,
    InvalidLength = 0x02,
    CrcError = 0x03,
    InvalidVersion = 0x04,
    InvalidConfig = 0x05,
    LoraError = 0x10,
    StorageError = 0x20,
}

/// Receive modes accepted by `SetRxMode`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RxMode {
    None = 0,
    Continuous = 1,
    Timed = 2,
    WaitOnce = 3,
}

/// `SetRxMode` payload dropping the override
pub const RX_MODE_CLEAR: u8 = 0xFF;

/// Byte offsets inside the settings image used by the tests
pub mod record {
    pub const MARKERS: [u8; 2] = [0xAA, 0x55];
    pub const RX_MODE: usize = 3;
    pub const TX_POWER: usize = 8;
    pub const SPREADING_FACTOR: usize = 10;
}

const CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// Unencoded frame: `[version][cmd_id][length LE][payload][crc16 LE]`
pub fn build_command_payload(cmd_id: u8, payload: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(6 + payload.len());
    data.push(PROTOCOL_VERSION);
    data.push(cmd_id);
    data.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    data.extend_from_slice(payload);
    let checksum = CRC.checksum(&data);
    data.extend_from_slice(&checksum.to_le_bytes());
    data
}

/// COBS encode, trailing delimiter included
pub fn cobs_encode(data: &[u8]) -> Vec<u8> {
    let mut encoded = vec![0u8; corncobs::max_encoded_len(data.len())];
    let len = corncobs::encode_buf(data, &mut encoded);
    encoded.truncate(len);
    encoded
}

pub fn build_command(cmd_id: CommandId, payload: &[u8]) -> Vec<u8> {
    cobs_encode(&build_command_payload(cmd_id as u8, payload))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResponseId {
    Version = 0x01,
    Ack = 0x02,
    RxPacket = 0x11,
    Event = 0x12,
    Config = 0x20,
    Status = 0x24,
    Error = 0xFF,
}

impl TryFrom<u8> for ResponseId {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, <Self as TryFrom<u8>>::Error> {
        match value {
            0x01 => Ok(Self::Version),
            0x02 => Ok(Self::Ack),
            0x11 => Ok(Self::RxPacket),
            0x12 => Ok(Self::Event),
            0x20 => Ok(Self::Config),
            0x24 => Ok(Self::Status),
            0xFF => Ok(Self::Error),
            _ => Err(value),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Response {
    pub resp_id: ResponseId,
    pub payload: Vec<u8>,
}

impl Response {
    /// Text of an `Event` response
    pub fn event_line(&self) -> Option<&str> {
        match self.resp_id {
            ResponseId::Event => std::str::from_utf8(&self.payload).ok(),
            _ => None,
        }
    }

    /// `(status, original_command_id)` of an `Error` response
    pub fn error(&self) -> Option<(u8, u8)> {
        match (self.resp_id, self.payload.as_slice()) {
            (ResponseId::Error, [status, command, ..]) => Some((*status, *command)),
            _ => None,
        }
    }
}

/// Link status as reported by `GetStatus`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    pub state: u8,
    pub last_send: u8,
    pub rssi: i16,
    pub snr: i8,
    pub rx_len: u16,
    pub link_mode: u8,
    pub joined: bool,
}

impl Status {
    pub fn parse(payload: &[u8]) -> anyhow::Result<Self> {
        let [state, last_send, r0, r1, snr, l0, l1, link_mode, joined] = payload else {
            anyhow::bail!("Status payload must be 9 bytes, got {}", payload.len());
        };
        Ok(Self {
            state: *state,
            last_send: *last_send,
            rssi: i16::from_le_bytes([*r0, *r1]),
            snr: *snr as i8,
            rx_len: u16::from_le_bytes([*l0, *l1]),
            link_mode: *link_mode,
            joined: *joined != 0,
        })
    }
}

/// Parse a COBS-decoded response frame
pub fn parse_response(data: &[u8]) -> anyhow::Result<Response> {
    if data.len() < 6 {
        anyhow::bail!("Response too short: {} bytes", data.len());
    }

    let version = data[0];
    let length = u16::from_le_bytes([data[2], data[3]]) as usize;
    if data.len() < 4 + length + 2 {
        anyhow::bail!(
            "Response payload incomplete: expected {}, got {}",
            4 + length + 2,
            data.len()
        );
    }

    let received_crc = u16::from_le_bytes([data[4 + length], data[5 + length]]);
    let calculated_crc = CRC.checksum(&data[..4 + length]);
    if calculated_crc != received_crc {
        anyhow::bail!(
            "CRC mismatch: expected {:04x}, got {:04x}",
            calculated_crc,
            received_crc
        );
    }
    if version != PROTOCOL_VERSION {
        anyhow::bail!("Protocol version mismatch: got {}", version);
    }

    let resp_id = ResponseId::try_from(data[1])
        .map_err(|v| anyhow::anyhow!("Unknown response ID: {:#04x}", v))?;

    Ok(Response {
        resp_id,
        payload: data[4..4 + length].to_vec(),
    })
}

/// COBS decode a frame that still carries its delimiter
pub fn cobs_decode(data: &[u8]) -> anyhow::Result<Vec<u8>> {
    let mut decoded = vec![0u8; data.len()];
    let len = corncobs::decode_buf(data, &mut decoded)
        .map_err(|e| anyhow::anyhow!("COBS decode error: {:?}", e))?;
    decoded.truncate(len);
    Ok(decoded)
}
