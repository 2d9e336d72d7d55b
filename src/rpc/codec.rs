//! Wire framing.
//!
//! A request frame is `[u32 total_size][u32 header_size][header_bytes][args_bytes]`:
//! `total_size` covers everything after itself, `header_bytes` decodes to a
//! [`RequestHeader`], and `args_bytes` is an application-defined protobuf
//! message whose length is `header.args_size`. A response frame carries no
//! header at all — just `[u32 total_size][response_bytes]` — since the
//! connection handles one request at a time and the caller already knows
//! which call it's answering. All integers are native-endian as written by a
//! single process talking to itself over loopback or LAN — little-endian on
//! every platform this crate targets.

use super::proto::RequestHeader;
use crate::error::{Error, Result};
use crate::rpc::net::FiberStream;
use prost::Message;

/// Frames larger than this are rejected before their body is read, so a
/// corrupt or hostile `total_size` can't make the server allocate an
/// unbounded buffer.
const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// Reads one frame's raw body (everything after `total_size`) off `stream`.
/// `Ok(None)` means the peer closed the connection cleanly at a frame
/// boundary; any other failure to read is a connection error.
pub fn read_raw_frame(stream: &mut FiberStream) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    if !stream.read_exact_or_eof(&mut len_buf)? {
        return Ok(None);
    }
    let total_size = u32::from_le_bytes(len_buf);
    if total_size > MAX_FRAME_SIZE {
        return Err(Error::FrameTooLarge {
            size: total_size,
            limit: MAX_FRAME_SIZE,
        });
    }
    let mut body = vec![0u8; total_size as usize];
    stream.read_exact(&mut body)?;
    Ok(Some(body))
}

/// Splits a frame body into its header and argument bytes. Failures here are
/// the "parse or lookup failure" kind: the frame has already been fully
/// consumed off the wire, so the caller can log and move on to the next one.
pub fn decode_frame(body: &[u8]) -> Result<(RequestHeader, Vec<u8>)> {
    if body.len() < 4 {
        return Err(Error::Decode(prost::DecodeError::new(
            "frame body shorter than its own header_size field",
        )));
    }
    let header_size = u32::from_le_bytes(body[..4].try_into().unwrap()) as usize;
    let rest = &body[4..];
    if header_size > rest.len() {
        return Err(Error::Decode(prost::DecodeError::new(
            "header_size exceeds the remaining frame body",
        )));
    }
    let (header_bytes, args_bytes) = rest.split_at(header_size);
    let header = RequestHeader::decode(header_bytes)?;
    Ok((header, args_bytes.to_vec()))
}

/// Serializes `header` and `args` and writes the full request frame to
/// `stream`.
pub fn write_frame(stream: &mut FiberStream, header: &RequestHeader, args: &[u8]) -> Result<()> {
    let mut header_bytes = Vec::new();
    header.encode(&mut header_bytes)?;
    let total_size = 4 + header_bytes.len() + args.len();

    let mut out = Vec::with_capacity(4 + total_size);
    out.extend_from_slice(&(total_size as u32).to_le_bytes());
    out.extend_from_slice(&(header_bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(&header_bytes);
    out.extend_from_slice(args);
    stream.write_all(&out)
}

/// Writes a bare length-prefixed response frame: no header, just the
/// serialized reply bytes.
pub fn write_response_frame(stream: &mut FiberStream, response: &[u8]) -> Result<()> {
    let mut out = Vec::with_capacity(4 + response.len());
    out.extend_from_slice(&(response.len() as u32).to_le_bytes());
    out.extend_from_slice(response);
    stream.write_all(&out)
}

/// Reads one bare response frame, treating a clean close as a connection
/// error (a response was expected).
pub fn read_response_frame(stream: &mut FiberStream) -> Result<Vec<u8>> {
    match read_raw_frame(stream)? {
        Some(body) => Ok(body),
        None => Err(Error::ConnectionClosed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips_through_encode_decode() {
        let header = RequestHeader {
            service_name: "Echo".to_string(),
            method_name: "Ping".to_string(),
            args_size: 5,
        };
        let mut header_bytes = Vec::new();
        header.encode(&mut header_bytes).unwrap();

        let mut body = Vec::new();
        body.extend_from_slice(&(header_bytes.len() as u32).to_le_bytes());
        body.extend_from_slice(&header_bytes);
        body.extend_from_slice(b"hello");

        let (decoded, args) = decode_frame(&body).unwrap();
        assert_eq!(decoded.service_name, "Echo");
        assert_eq!(decoded.method_name, "Ping");
        assert_eq!(args, b"hello");
    }

    #[test]
    fn header_size_past_body_end_is_a_decode_error() {
        let mut body = Vec::new();
        body.extend_from_slice(&100u32.to_le_bytes());
        body.extend_from_slice(b"short");
        assert!(decode_frame(&body).is_err());
    }

    #[test]
    fn response_frame_carries_no_header() {
        // A response frame is just `[u32 len][bytes]` — the length prefix
        // covers exactly the reply bytes, with nothing decodable as a
        // `RequestHeader` in between.
        let response = b"pong";
        let mut wire = Vec::new();
        wire.extend_from_slice(&(response.len() as u32).to_le_bytes());
        wire.extend_from_slice(response);

        let (len_bytes, rest) = wire.split_at(4);
        assert_eq!(u32::from_le_bytes(len_bytes.try_into().unwrap()) as usize, rest.len());
        assert_eq!(rest, response);
    }
}
