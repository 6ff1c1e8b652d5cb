//! Framing for detection requests and responses over a byte stream.
//!
//! Frames are delimited by [`LengthDelimitedCodec`] (big-endian `u32`
//! length). Inside a frame sits a big-endian `u32` header length, a JSON
//! [`Header`], then the raw image payloads the header announces (colour
//! first, then depth). Responses carry no payload.

use std::io;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use super::{DetectionRequest, DetectionResponse};
use crate::detection::Image;
use crate::error::{ServiceError, WireError};

pub const MAX_HEADER_LEN: usize = 16 * 1024 * 1024;
pub const MAX_PAYLOAD_LEN: usize = 256 * 1024 * 1024;
/// Header plus a colour and a depth payload at their limits.
pub const MAX_FRAME_LEN: usize = 4 + MAX_HEADER_LEN + 2 * MAX_PAYLOAD_LEN;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageHeader {
    pub width: u32,
    pub height: u32,
    pub encoding: String,
    pub len: usize,
}

impl ImageHeader {
    fn of(image: &Image) -> Self {
        Self {
            width: image.width,
            height: image.height,
            encoding: image.encoding.clone(),
            len: image.data.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Header {
    Request {
        request_id: u64,
        frame_id: u64,
        stamp: f64,
        colour: ImageHeader,
        depth: Option<ImageHeader>,
    },
    Response {
        request_id: u64,
        outcome: Result<DetectionResponse, WireError>,
    },
}

/// A decoded message with its payload images attached.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request {
        request_id: u64,
        request: DetectionRequest,
    },
    Response {
        request_id: u64,
        outcome: Result<DetectionResponse, WireError>,
    },
}

/// Borrowed request, so a caller can send a frame without giving it up.
#[derive(Debug, Clone, Copy)]
pub struct RequestRef<'a> {
    pub request_id: u64,
    pub request: &'a DetectionRequest,
}

/// [`Message`] codec for `tokio_util::codec::Framed`.
#[derive(Debug)]
pub struct DetectionCodec {
    frames: LengthDelimitedCodec,
}

impl Default for DetectionCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectionCodec {
    pub fn new() -> Self {
        Self {
            frames: LengthDelimitedCodec::builder()
                .max_frame_length(MAX_FRAME_LEN)
                .new_codec(),
        }
    }

    fn encode_body(
        &mut self,
        header: &Header,
        payloads: &[&[u8]],
        dst: &mut BytesMut,
    ) -> Result<(), ServiceError> {
        let json = serde_json::to_vec(header).map_err(|e| ServiceError::Protocol(e.to_string()))?;
        if json.len() > MAX_HEADER_LEN {
            return Err(ServiceError::Protocol(format!(
                "header of {} bytes exceeds limit",
                json.len()
            )));
        }
        let payload_len: usize = payloads.iter().map(|p| p.len()).sum();
        let mut body = BytesMut::with_capacity(4 + json.len() + payload_len);
        body.put_u32(json.len() as u32);
        body.extend_from_slice(&json);
        for payload in payloads {
            if payload.len() > MAX_PAYLOAD_LEN {
                return Err(ServiceError::Protocol(format!(
                    "image payload of {} bytes exceeds limit",
                    payload.len()
                )));
            }
            body.extend_from_slice(payload);
        }
        self.frames.encode(body.freeze(), dst)?;
        Ok(())
    }
}

impl Encoder<RequestRef<'_>> for DetectionCodec {
    type Error = ServiceError;

    fn encode(&mut self, item: RequestRef<'_>, dst: &mut BytesMut) -> Result<(), ServiceError> {
        let request = item.request;
        let header = Header::Request {
            request_id: item.request_id,
            frame_id: request.frame_id,
            stamp: request.stamp,
            colour: ImageHeader::of(&request.colour),
            depth: request.depth.as_ref().map(ImageHeader::of),
        };
        let mut payloads = vec![request.colour.data.as_slice()];
        if let Some(depth) = &request.depth {
            payloads.push(depth.data.as_slice());
        }
        self.encode_body(&header, &payloads, dst)
    }
}

impl Encoder<Message> for DetectionCodec {
    type Error = ServiceError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), ServiceError> {
        match item {
            Message::Request {
                request_id,
                request,
            } => <Self as Encoder<RequestRef<'_>>>::encode(
                self,
                RequestRef {
                    request_id,
                    request: &request,
                },
                dst,
            ),
            Message::Response {
                request_id,
                outcome,
            } => self.encode_body(
                &Header::Response {
                    request_id,
                    outcome,
                },
                &[],
                dst,
            ),
        }
    }
}

impl Decoder for DetectionCodec {
    type Item = Message;
    type Error = ServiceError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, ServiceError> {
        let frame = match self.frames.decode(src) {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(None),
            // The length codec reports oversized frames as invalid data.
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                return Err(ServiceError::Protocol(e.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        decode_frame(frame.freeze()).map(Some)
    }
}

fn decode_frame(mut frame: Bytes) -> Result<Message, ServiceError> {
    if frame.len() < 4 {
        return Err(ServiceError::Protocol("frame shorter than its header length".into()));
    }
    let len = frame.get_u32() as usize;
    if len > MAX_HEADER_LEN {
        return Err(ServiceError::Protocol(format!("header length {len} exceeds limit")));
    }
    if len > frame.len() {
        return Err(ServiceError::Protocol(format!(
            "header length {len} runs past the end of the frame"
        )));
    }
    let json = frame.split_to(len);
    let header: Header =
        serde_json::from_slice(&json).map_err(|e| ServiceError::Protocol(e.to_string()))?;

    let message = match header {
        Header::Request {
            request_id,
            frame_id,
            stamp,
            colour,
            depth,
        } => {
            let colour = take_image(&mut frame, colour)?;
            let depth = depth.map(|h| take_image(&mut frame, h)).transpose()?;
            Message::Request {
                request_id,
                request: DetectionRequest {
                    colour,
                    depth,
                    frame_id,
                    stamp,
                },
            }
        }
        Header::Response {
            request_id,
            outcome,
        } => Message::Response {
            request_id,
            outcome,
        },
    };
    if !frame.is_empty() {
        return Err(ServiceError::Protocol(format!(
            "{} unexpected bytes after the payloads",
            frame.len()
        )));
    }
    Ok(message)
}

fn take_image(frame: &mut Bytes, header: ImageHeader) -> Result<Image, ServiceError> {
    if header.len > MAX_PAYLOAD_LEN {
        return Err(ServiceError::Protocol(format!(
            "image payload of {} bytes exceeds limit",
            header.len
        )));
    }
    if header.len > frame.len() {
        return Err(ServiceError::Protocol(format!(
            "image payload of {} bytes but only {} left in frame",
            header.len,
            frame.len()
        )));
    }
    Ok(Image {
        width: header.width,
        height: header.height,
        encoding: header.encoding,
        data: frame.split_to(header.len).to_vec(),
    })
}
