//! Framed progress/result messages for out-of-process bakes.
//!
//! Frame: `u32` LE payload length, then the payload:
//! - `1` progress: `f32` LE
//! - `2` result: `u8` kind, `u32` LE message length, UTF-8 message
//!   (length 0 means no message)

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::util::{BakeResult, Error, Result, ResultKind};

const TAG_PROGRESS: u8 = 1;
const TAG_RESULT: u8 = 2;

/// Upper bound on a frame payload.
pub const MAX_FRAME_LEN: u32 = 1 << 20;

/// Message sent from a baking worker to its host.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Progress(f32),
    Result(BakeResult),
}

impl Message {
    fn encode_payload(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        // Writes into a Vec cannot fail
        match self {
            Message::Progress(p) => {
                buf.push(TAG_PROGRESS);
                let _ = buf.write_f32::<LittleEndian>(*p);
            }
            Message::Result(result) => {
                buf.push(TAG_RESULT);
                buf.push(result.kind() as u8);
                let msg = result.message().unwrap_or("").as_bytes();
                let _ = buf.write_u32::<LittleEndian>(msg.len() as u32);
                buf.extend_from_slice(msg);
            }
        }
        buf
    }

    fn decode_payload(mut payload: &[u8]) -> Result<Self> {
        let tag = payload.read_u8().map_err(truncated)?;
        let message = match tag {
            TAG_PROGRESS => Message::Progress(payload.read_f32::<LittleEndian>().map_err(truncated)?),
            TAG_RESULT => {
                let kind = ResultKind::from_u8(payload.read_u8().map_err(truncated)?);
                let len = payload.read_u32::<LittleEndian>().map_err(truncated)? as usize;
                if payload.len() < len {
                    return Err(Error::io_failed("result message truncated"));
                }
                let (text, rest) = payload.split_at(len);
                payload = rest;
                let text = std::str::from_utf8(text)
                    .map_err(|e| Error::io_failed(format!("result message is not UTF-8: {}", e)))?;
                let message = (!text.is_empty()).then(|| text.to_owned());
                Message::Result(BakeResult::new(kind, message))
            }
            other => return Err(Error::io_failed(format!("unknown message tag {}", other))),
        };
        if !payload.is_empty() {
            return Err(Error::io_failed(format!("{} trailing bytes in frame", payload.len())));
        }
        Ok(message)
    }
}

fn truncated(e: io::Error) -> Error {
    Error::io_failed(format!("frame truncated: {}", e))
}

/// Write one framed message and flush.
pub fn write_message<W: Write>(w: &mut W, message: &Message) -> Result<()> {
    let payload = message.encode_payload();
    w.write_u32::<LittleEndian>(payload.len() as u32)?;
    w.write_all(&payload)?;
    w.flush()?;
    Ok(())
}

/// Read one framed message; `Ok(None)` on end of stream between frames.
pub fn read_message<R: Read>(r: &mut R) -> Result<Option<Message>> {
    let len = match r.read_u32::<LittleEndian>() {
        Ok(len) => len,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if len > MAX_FRAME_LEN {
        return Err(Error::io_failed(format!("frame of {} bytes exceeds limit", len)));
    }
    let mut payload = vec![0u8; len as usize];
    r.read_exact(&mut payload).map_err(truncated)?;
    Message::decode_payload(&payload).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_stream_of_messages() {
        let messages = [
            Message::Progress(0.25),
            Message::Progress(1.0),
            Message::Result(BakeResult::new(ResultKind::JobFailed, Some("kernel exploded".into()))),
        ];
        let mut wire = Vec::new();
        for m in &messages {
            write_message(&mut wire, m).unwrap();
        }

        let mut r = Cursor::new(wire);
        for m in &messages {
            assert_eq!(read_message(&mut r).unwrap().as_ref(), Some(m));
        }
        assert!(read_message(&mut r).unwrap().is_none());
    }

    #[test]
    fn test_progress_frame_layout() {
        let mut wire = Vec::new();
        write_message(&mut wire, &Message::Progress(0.5)).unwrap();
        assert_eq!(wire[..4], 5u32.to_le_bytes());
        assert_eq!(wire[4], TAG_PROGRESS);
        assert_eq!(wire[5..], 0.5f32.to_le_bytes());
    }

    #[test]
    fn test_empty_message_decodes_as_none() {
        let mut wire = Vec::new();
        write_message(&mut wire, &Message::Result(BakeResult::success())).unwrap();
        let decoded = read_message(&mut Cursor::new(wire)).unwrap().unwrap();
        assert_eq!(decoded, Message::Result(BakeResult::new(ResultKind::Success, None)));
    }

    #[test]
    fn test_malformed_frames() {
        // Unknown tag
        let wire = [1u8, 0, 0, 0, 9];
        let err = read_message(&mut Cursor::new(wire)).unwrap_err();
        assert_eq!(err.kind(), ResultKind::IoFailed);

        // Length prefix larger than the stream
        let wire = [10u8, 0, 0, 0, TAG_PROGRESS];
        assert!(read_message(&mut Cursor::new(wire)).is_err());

        // Oversized frame
        let wire = (MAX_FRAME_LEN + 1).to_le_bytes();
        assert!(read_message(&mut Cursor::new(wire)).is_err());
    }
}
