//! The three frame shapes that travel between channel ends. A one-byte
//! label selects the shape; the rest is big-endian fields.

use crate::frame::{FrameError, FrameReader, FrameWriter};

pub const LABEL_INVOKE: u8 = 1;
pub const LABEL_RELEASE: u8 = 2;
pub const LABEL_ANNOUNCE: u8 = 3;

/// A decoded inbound frame.
pub enum Payload {
    Invoke(InvokeRequest),
    /// The peer released its proxy on this instance.
    Release { instance: u32 },
    Announce(Announcement),
}

impl Payload {
    pub fn decode(data: &[u8]) -> Result<Payload, FrameError> {
        let mut reader = FrameReader::new(data);
        match reader.read_u8()? {
            LABEL_RELEASE => Ok(Payload::Release {
                instance: reader.read_u32()?,
            }),
            LABEL_ANNOUNCE => {
                let count = reader.read_u16()?;
                let mut interfaces = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    interfaces.push(reader.read_u32()?);
                }
                Ok(Payload::Announce(Announcement { interfaces }))
            }
            LABEL_INVOKE => Ok(Payload::Invoke(InvokeRequest {
                instance: reader.read_u32()?,
                interface: reader.read_u32()?,
                method: reader.read_u8()?,
                parameters: reader.remainder().to_vec(),
            })),
            _ => Err(FrameError { offset: 0 }),
        }
    }
}

/// One invocation: which object, which interface, which method slot, and
/// the marshalled parameters.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InvokeRequest {
    pub instance: u32,
    pub interface: u32,
    pub method: u8,
    pub parameters: Vec<u8>,
}

impl InvokeRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = FrameWriter::new();
        writer
            .write_u8(LABEL_INVOKE)
            .write_u32(self.instance)
            .write_u32(self.interface)
            .write_u8(self.method);
        let mut frame = writer.finish();
        frame.extend_from_slice(&self.parameters);
        frame
    }
}

/// The interface ids one side exposes, exchanged at channel startup.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Announcement {
    pub interfaces: Vec<u32>,
}

impl Announcement {
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = FrameWriter::new();
        writer.write_u8(LABEL_ANNOUNCE).write_u16(self.interfaces.len() as u16);
        for interface in &self.interfaces {
            writer.write_u32(*interface);
        }
        writer.finish()
    }
}

/// Fire-and-forget release of a remote hold.
pub fn encode_release(instance: u32) -> Vec<u8> {
    let mut writer = FrameWriter::new();
    writer.write_u8(LABEL_RELEASE).write_u32(instance);
    writer.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invoke_roundtrip() {
        let request = InvokeRequest {
            instance: 0x10,
            interface: 0x0000_0113,
            method: 4,
            parameters: vec![1, 2, 3],
        };
        match Payload::decode(&request.encode()).unwrap() {
            Payload::Invoke(decoded) => assert_eq!(decoded, request),
            _ => panic!("wrong shape"),
        }
    }

    #[test]
    fn announce_roundtrip() {
        let announcement = Announcement {
            interfaces: vec![0x113, 0x114],
        };
        match Payload::decode(&announcement.encode()).unwrap() {
            Payload::Announce(decoded) => assert_eq!(decoded, announcement),
            _ => panic!("wrong shape"),
        }
    }

    #[test]
    fn release_roundtrip() {
        match Payload::decode(&encode_release(9)).unwrap() {
            Payload::Release { instance } => assert_eq!(instance, 9),
            _ => panic!("wrong shape"),
        }
    }
}
