use bson::Document;
use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{Command, TransportError};

pub const OP_MSG: i32 = 2013;
pub const HEADER_SIZE: usize = 16;
pub const MAX_MESSAGE_SIZE: usize = 48 * 1024 * 1024;

const CHECKSUM_PRESENT: u32 = 1;
const SECTION_BODY: u8 = 0;
const SECTION_DOCUMENT_SEQUENCE: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub length: i32,
    pub request_id: i32,
    pub response_to: i32,
    pub op_code: i32,
}

impl MessageHeader {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_i32_le(self.length);
        buf.put_i32_le(self.request_id);
        buf.put_i32_le(self.response_to);
        buf.put_i32_le(self.op_code);
    }

    pub fn decode(mut buf: &[u8]) -> Self {
        Self {
            length: buf.get_i32_le(),
            request_id: buf.get_i32_le(),
            response_to: buf.get_i32_le(),
            op_code: buf.get_i32_le(),
        }
    }
}

/// Encodes `command` as an OP_MSG with a single body section.
pub fn encode_command(command: &Command) -> Result<BytesMut, TransportError> {
    let body = bson::to_vec(&command.to_wire_document())
        .map_err(|e| TransportError::Protocol(format!("Unable to encode command. {}", e)))?;

    let length = HEADER_SIZE + 4 + 1 + body.len();
    if length > MAX_MESSAGE_SIZE {
        return Err(TransportError::Protocol(format!(
            "Command of {} bytes exceeds the maximum message size",
            length
        )));
    }

    let mut buf = BytesMut::with_capacity(length);
    MessageHeader {
        length: length as i32,
        request_id: command.request_id(),
        response_to: 0,
        op_code: OP_MSG,
    }
    .encode(&mut buf);
    buf.put_u32_le(0);
    buf.put_u8(SECTION_BODY);
    buf.put_slice(&body);
    Ok(buf)
}

/// Decodes the payload of an OP_MSG (everything after the header) into its body document.
pub fn decode_reply_payload(payload: &[u8]) -> Result<Document, TransportError> {
    let mut buf = payload;
    if buf.remaining() < 4 {
        return Err(TransportError::Protocol("Reply is missing flag bits".into()));
    }
    let flags = buf.get_u32_le();
    if flags & CHECKSUM_PRESENT != 0 {
        if buf.remaining() < 4 {
            return Err(TransportError::Protocol("Reply is missing its checksum".into()));
        }
        buf = &buf[..buf.len() - 4];
    }

    let mut body = None;
    while buf.has_remaining() {
        let kind = buf.get_u8();
        if buf.remaining() < 4 {
            return Err(TransportError::Protocol("Truncated reply section".into()));
        }
        let size = i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if size < 5 || size as usize > buf.remaining() {
            return Err(TransportError::Protocol(format!(
                "Invalid section size {}",
                size
            )));
        }
        let (section, rest) = buf.split_at(size as usize);
        match kind {
            SECTION_BODY => {
                let document = Document::from_reader(section).map_err(|e| {
                    TransportError::Protocol(format!("Unable to decode reply. {}", e))
                })?;
                body = Some(document);
            }
            SECTION_DOCUMENT_SEQUENCE => {
                tracing::trace!("Skipping document sequence section in reply");
            }
            other => {
                return Err(TransportError::Protocol(format!(
                    "Unknown section kind {}",
                    other
                )));
            }
        }
        buf = rest;
    }

    body.ok_or_else(|| TransportError::Protocol("Reply has no body section".into()))
}

pub async fn write_command<S>(stream: &mut S, command: &Command) -> Result<(), TransportError>
where
    S: AsyncWrite + Unpin + ?Sized,
{
    let message = encode_command(command)?;
    stream.write_all(&message).await?;
    stream.flush().await?;
    Ok(())
}

/// Reads one message and returns the body of the reply to `request_id`.
pub async fn read_reply<S>(stream: &mut S, request_id: i32) -> Result<Document, TransportError>
where
    S: AsyncRead + Unpin + ?Sized,
{
    let mut header_bytes = [0u8; HEADER_SIZE];
    stream.read_exact(&mut header_bytes).await?;
    let header = MessageHeader::decode(&header_bytes);

    if header.length < HEADER_SIZE as i32 || header.length as usize > MAX_MESSAGE_SIZE {
        return Err(TransportError::Protocol(format!(
            "Invalid message length {}",
            header.length
        )));
    }
    if header.op_code != OP_MSG {
        return Err(TransportError::Protocol(format!(
            "Unsupported op code {} in reply",
            header.op_code
        )));
    }
    if header.response_to != request_id {
        return Err(TransportError::Protocol(format!(
            "Reply is for request {} but {} was sent",
            header.response_to, request_id
        )));
    }

    let mut payload = vec![0u8; header.length as usize - HEADER_SIZE];
    stream.read_exact(&mut payload).await?;
    decode_reply_payload(&payload)
}

#[cfg(test)]
mod tests {
    use bson::doc;

    use super::*;

    fn reply_message(response_to: i32, flags: u32, body: &Document, checksum: bool) -> Vec<u8> {
        let body = bson::to_vec(body).unwrap();
        let length = HEADER_SIZE + 4 + 1 + body.len() + if checksum { 4 } else { 0 };
        let mut buf = BytesMut::new();
        MessageHeader {
            length: length as i32,
            request_id: 99,
            response_to,
            op_code: OP_MSG,
        }
        .encode(&mut buf);
        buf.put_u32_le(flags);
        buf.put_u8(SECTION_BODY);
        buf.put_slice(&body);
        if checksum {
            buf.put_u32_le(0xdead_beef);
        }
        buf.to_vec()
    }

    #[test]
    fn encode_command_writes_header_and_body_section() {
        // Arrange
        let command = Command::new("admin", doc! { "ping": 1 });

        // Act
        let message = encode_command(&command).unwrap();

        // Assert
        let header = MessageHeader::decode(&message[..HEADER_SIZE]);
        assert_eq!(header.length as usize, message.len());
        assert_eq!(header.request_id, command.request_id());
        assert_eq!(header.op_code, OP_MSG);
        assert_eq!(&message[HEADER_SIZE..HEADER_SIZE + 4], &[0, 0, 0, 0]);
        assert_eq!(message[HEADER_SIZE + 4], SECTION_BODY);
        let body = Document::from_reader(&message[HEADER_SIZE + 5..]).unwrap();
        assert_eq!(body, doc! { "ping": 1, "$db": "admin" });
    }

    #[tokio::test]
    async fn read_reply_decodes_body() {
        let message = reply_message(7, 0, &doc! { "ok": 1.0, "n": 3 }, false);

        let reply = read_reply(&mut message.as_slice(), 7).await.unwrap();

        assert_eq!(reply, doc! { "ok": 1.0, "n": 3 });
    }

    #[tokio::test]
    async fn read_reply_ignores_checksum() {
        let message = reply_message(7, CHECKSUM_PRESENT, &doc! { "ok": 1.0 }, true);

        let reply = read_reply(&mut message.as_slice(), 7).await.unwrap();

        assert_eq!(reply, doc! { "ok": 1.0 });
    }

    #[tokio::test]
    async fn read_reply_rejects_mismatched_response_to() {
        let message = reply_message(8, 0, &doc! { "ok": 1.0 }, false);

        let result = read_reply(&mut message.as_slice(), 7).await;

        assert!(matches!(result, Err(TransportError::Protocol(_))));
    }

    #[tokio::test]
    async fn read_reply_reports_truncated_stream_as_io_error() {
        let message = reply_message(7, 0, &doc! { "ok": 1.0 }, false);

        let result = read_reply(&mut &message[..message.len() - 3], 7).await;

        assert!(matches!(result, Err(TransportError::Io(_))));
    }

    #[test]
    fn decode_reply_payload_requires_body_section() {
        let result = decode_reply_payload(&[0, 0, 0, 0]);
        assert!(matches!(result, Err(TransportError::Protocol(_))));
    }
}
