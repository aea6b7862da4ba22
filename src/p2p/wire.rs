// Copyright 2022-2026 Animica Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Framed, optionally-compressed wire transport.
//!
//! Frame layout:
//!
//! ```text
//! MAGIC "AMCF" | VER u8 | CODEC u8 | FLAGS u8 | CLEN varint | RLEN varint
//! | PAYLOAD (CLEN bytes) | [CRC32-IEEE of the raw payload, big-endian]
//! ```
//!
//! Frames verify independently; a stream is a plain concatenation of frames.

use thiserror::Error;

pub const MAGIC: [u8; 4] = *b"AMCF";
pub const VERSION: u8 = 0x01;
pub const FLAG_CHECKSUM: u8 = 0x01;

const FIXED_HEADER_LEN: usize = MAGIC.len() + 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    None,
    Zstd,
    Snappy,
}

impl Codec {
    pub fn id(self) -> u8 {
        match self {
            Codec::None => 0,
            Codec::Zstd => 1,
            Codec::Snappy => 2,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(Codec::None),
            1 => Some(Codec::Zstd),
            2 => Some(Codec::Snappy),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Codec::None => "none",
            Codec::Zstd => "zstd",
            Codec::Snappy => "snappy",
        }
    }
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("bad frame magic")]
    BadMagic,
    #[error("truncated frame: {0}")]
    Truncated(&'static str),
    #[error("unsupported frame version {0}")]
    UnsupportedVersion(u8),
    #[error("unknown codec id {0}")]
    UnknownCodec(u8),
    #[error("varint overflow in frame header")]
    VarintOverflow,
    #[error("crc32 mismatch: header {expected:#010x}, computed {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },
    #[error("{codec} codec failed: {reason}")]
    Compression {
        codec: &'static str,
        reason: String,
    },
    #[error("frame length {got} exceeds limit {limit}")]
    Oversize { got: u64, limit: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: u8,
    pub codec: Codec,
    pub flags: u8,
    pub compressed_len: u64,
    pub raw_len: u64,
}

impl FrameHeader {
    pub fn has_checksum(&self) -> bool {
        self.flags & FLAG_CHECKSUM != 0
    }
}

/// A parsed frame with its payload still compressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Vec<u8>,
    pub crc32: Option<u32>,
}

fn compress(raw: &[u8], codec: Codec, level: i32) -> Result<Vec<u8>, FrameError> {
    match codec {
        Codec::None => Ok(raw.to_vec()),
        Codec::Zstd => zstd::bulk::compress(raw, level).map_err(|e| FrameError::Compression {
            codec: "zstd",
            reason: e.to_string(),
        }),
        Codec::Snappy => snap::raw::Encoder::new()
            .compress_vec(raw)
            .map_err(|e| FrameError::Compression {
                codec: "snappy",
                reason: e.to_string(),
            }),
    }
}

fn decompress(payload: &[u8], header: &FrameHeader) -> Result<Vec<u8>, FrameError> {
    match header.codec {
        Codec::None => Ok(payload.to_vec()),
        Codec::Zstd => zstd::bulk::decompress(payload, header.raw_len as usize).map_err(|e| {
            FrameError::Compression {
                codec: "zstd",
                reason: e.to_string(),
            }
        }),
        Codec::Snappy => {
            snap::raw::Decoder::new()
                .decompress_vec(payload)
                .map_err(|e| FrameError::Compression {
                    codec: "snappy",
                    reason: e.to_string(),
                })
        }
    }
}

/// Encode one payload into a framed buffer.
pub fn encode_frame(
    raw: &[u8],
    codec: Codec,
    level: i32,
    checksum: bool,
) -> Result<Vec<u8>, FrameError> {
    let compressed = compress(raw, codec, level)?;
    let flags = if checksum { FLAG_CHECKSUM } else { 0 };

    let mut out = Vec::with_capacity(FIXED_HEADER_LEN + 10 + compressed.len() + 4);
    out.extend_from_slice(&MAGIC);
    out.push(VERSION);
    out.push(codec.id());
    out.push(flags);
    let mut buf = unsigned_varint::encode::u64_buffer();
    out.extend_from_slice(unsigned_varint::encode::u64(compressed.len() as u64, &mut buf));
    let mut buf = unsigned_varint::encode::u64_buffer();
    out.extend_from_slice(unsigned_varint::encode::u64(raw.len() as u64, &mut buf));
    out.extend_from_slice(&compressed);
    if checksum {
        out.extend_from_slice(&crc32fast::hash(raw).to_be_bytes());
    }
    Ok(out)
}

fn decode_varint(buf: &[u8], offset: usize) -> Result<Option<(u64, usize)>, FrameError> {
    match unsigned_varint::decode::u64(&buf[offset.min(buf.len())..]) {
        Ok((value, rest)) => Ok(Some((value, buf.len() - rest.len()))),
        Err(unsigned_varint::decode::Error::Insufficient) => Ok(None),
        Err(_) => Err(FrameError::VarintOverflow),
    }
}

/// Parse one frame starting at the beginning of `buf`.
///
/// Returns `Ok(None)` when the buffer holds a valid but incomplete prefix of
/// a frame (the streaming decoder feeds more bytes and retries).
pub fn parse_frame(buf: &[u8]) -> Result<Option<(Frame, usize)>, FrameError> {
    if buf.len() < MAGIC.len() {
        return Ok(None);
    }
    if buf[..MAGIC.len()] != MAGIC {
        return Err(FrameError::BadMagic);
    }
    if buf.len() < FIXED_HEADER_LEN {
        return Ok(None);
    }
    let version = buf[4];
    if version != VERSION {
        return Err(FrameError::UnsupportedVersion(version));
    }
    let codec = Codec::from_id(buf[5]).ok_or(FrameError::UnknownCodec(buf[5]))?;
    let flags = buf[6];

    let Some((compressed_len, off)) = decode_varint(buf, FIXED_HEADER_LEN)? else {
        return Ok(None);
    };
    let Some((raw_len, off)) = decode_varint(buf, off)? else {
        return Ok(None);
    };

    let header = FrameHeader {
        version,
        codec,
        flags,
        compressed_len,
        raw_len,
    };
    let payload_end = off + compressed_len as usize;
    let tail = if header.has_checksum() { 4 } else { 0 };
    if buf.len() < payload_end + tail {
        return Ok(None);
    }
    let payload = buf[off..payload_end].to_vec();
    let crc32 = if header.has_checksum() {
        let mut crc = [0u8; 4];
        crc.copy_from_slice(&buf[payload_end..payload_end + 4]);
        Some(u32::from_be_bytes(crc))
    } else {
        None
    };
    Ok(Some((
        Frame {
            header,
            payload,
            crc32,
        },
        payload_end + tail,
    )))
}

fn decode_parsed(frame: &Frame) -> Result<Vec<u8>, FrameError> {
    let raw = decompress(&frame.payload, &frame.header)?;
    if let Some(expected) = frame.crc32 {
        let actual = crc32fast::hash(&raw);
        if actual != expected {
            return Err(FrameError::ChecksumMismatch { expected, actual });
        }
    }
    Ok(raw)
}

/// Decode exactly one frame; returns the raw payload and bytes consumed.
pub fn decode_frame(buf: &[u8]) -> Result<(Vec<u8>, usize), FrameError> {
    match parse_frame(buf)? {
        Some((frame, consumed)) => Ok((decode_parsed(&frame)?, consumed)),
        None => Err(FrameError::Truncated("incomplete frame")),
    }
}

/// Decode a concatenated stream of frames.
pub fn decode_stream(buf: &[u8]) -> Result<Vec<Vec<u8>>, FrameError> {
    let mut out = Vec::new();
    let mut offset = 0;
    while offset < buf.len() {
        let (raw, consumed) = decode_frame(&buf[offset..])?;
        out.push(raw);
        offset += consumed;
    }
    Ok(out)
}

/// Incremental decoder: feed bytes as they arrive, drain complete frames.
#[derive(Debug, Default)]
pub struct Decoder {
    buf: Vec<u8>,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Next complete frame, or `Ok(None)` if more bytes are needed.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        match parse_frame(&self.buf)? {
            Some((frame, consumed)) => {
                let raw = decode_parsed(&frame)?;
                self.buf.drain(..consumed);
                Ok(Some(raw))
            }
            None => Ok(None),
        }
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

/// Pick the first locally-preferred codec the peer also offers.
pub fn negotiate(preferred_local: &[Codec], peer_offered: &[Codec]) -> Codec {
    preferred_local
        .iter()
        .copied()
        .find(|codec| peer_offered.contains(codec))
        .unwrap_or(Codec::None)
}
