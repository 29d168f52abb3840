//! memcached binary protocol framing.
//!
//! Requests are parsed incrementally from a caller-accumulated buffer: the
//! caller re-invokes [`try_parse_request`] as bytes arrive, keeps unconsumed
//! bytes on `Incomplete`, and treats `Error` as fatal to the connection.
//! All multi-byte integers are network byte order.

use crate::constants::{HEADER_SIZE, MAGIC_REQUEST, MAGIC_RESPONSE, MAX_BODY_LEN};

pub const OP_GET: u8 = 0x00;
pub const OP_SET: u8 = 0x01;
pub const OP_DELETE: u8 = 0x04;
pub const OP_FLUSH: u8 = 0x08;
pub const OP_GETQ: u8 = 0x09;
pub const OP_NOOP: u8 = 0x0a;
pub const OP_GETK: u8 = 0x0c;
pub const OP_GETKQ: u8 = 0x0d;

pub const RES_NO_ERROR: u16 = 0x0000;
pub const RES_KEY_NOT_FOUND: u16 = 0x0001;
pub const RES_INVALID_ARGUMENTS: u16 = 0x0004;
pub const RES_OUT_OF_MEMORY: u16 = 0x0082;

/// The fixed 24-byte request header, as framed off the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    pub opcode: u8,
    pub keylen: u16,
    pub extralen: u8,
    pub data_type: u8,
    pub bodylen: u32,
    pub opaque: u32,
    pub cas: u64,
}

/// One framed request, borrowing key/value from the receive buffer.
#[derive(Debug, PartialEq, Eq)]
pub enum Command<'a> {
    /// GET / GETQ / GETK / GETKQ; quiet and return-key flags are derived
    /// from the opcode by the dispatcher, not here.
    Get { key: &'a [u8] },
    Set {
        key: &'a [u8],
        val: &'a [u8],
        flags: u32,
        expiration: u32,
    },
    Delete { key: &'a [u8], expiration: u32 },
    Noop,
    Flush { expiration: u32 },
}

/// Result of attempting to frame one request from a byte buffer.
pub enum ParseResult<'a> {
    /// One full request framed. Contains the header, the typed command, and
    /// the total bytes consumed (header + body).
    Complete {
        header: RequestHeader,
        command: Command<'a>,
        consumed: usize,
    },
    /// Need more data. Contains minimum bytes still missing; nothing was
    /// consumed.
    Incomplete(usize),
    /// Malformed frame or unsupported opcode. Fatal to the connection.
    Error(&'static str),
}

fn be32(buf: &[u8]) -> u32 {
    u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]])
}

/// Try to frame one request from `buf`. Chunk-agnostic: any partition of the
/// byte stream framed through here yields the same request sequence.
pub fn try_parse_request(buf: &[u8]) -> ParseResult<'_> {
    if buf.len() < HEADER_SIZE {
        return ParseResult::Incomplete(HEADER_SIZE - buf.len());
    }

    if buf[0] != MAGIC_REQUEST {
        return ParseResult::Error("bad request magic");
    }

    let opcode = buf[1];
    let keylen = u16::from_be_bytes([buf[2], buf[3]]) as usize;
    let extralen = buf[4] as usize;
    let data_type = buf[5];
    // buf[6..8] is reserved; ignored.
    let bodylen = be32(&buf[8..12]) as usize;
    let opaque = be32(&buf[12..16]);
    let cas = u64::from_be_bytes([
        buf[16], buf[17], buf[18], buf[19], buf[20], buf[21], buf[22], buf[23],
    ]);

    if bodylen > MAX_BODY_LEN {
        return ParseResult::Error("body length over cap");
    }
    if keylen + extralen > bodylen {
        return ParseResult::Error("body shorter than key + extras");
    }

    let total = HEADER_SIZE + bodylen;
    if buf.len() < total {
        return ParseResult::Incomplete(total - buf.len());
    }

    let extras = &buf[HEADER_SIZE..HEADER_SIZE + extralen];
    let key = &buf[HEADER_SIZE + extralen..HEADER_SIZE + extralen + keylen];
    let val = &buf[HEADER_SIZE + extralen + keylen..total];

    let command = match opcode {
        OP_GET | OP_GETQ | OP_GETK | OP_GETKQ => {
            if keylen == 0 || extralen != 0 || !val.is_empty() {
                return ParseResult::Error("malformed get");
            }
            Command::Get { key }
        }
        OP_SET => {
            // Extras are flags + expiration, both u32.
            if keylen == 0 || extralen != 8 {
                return ParseResult::Error("malformed set");
            }
            Command::Set {
                key,
                val,
                flags: be32(&extras[0..4]),
                expiration: be32(&extras[4..8]),
            }
        }
        OP_DELETE => {
            if keylen == 0 || !val.is_empty() || (extralen != 0 && extralen != 4) {
                return ParseResult::Error("malformed delete");
            }
            let expiration = if extralen == 4 { be32(extras) } else { 0 };
            Command::Delete { key, expiration }
        }
        OP_NOOP => {
            if bodylen != 0 {
                return ParseResult::Error("malformed noop");
            }
            Command::Noop
        }
        OP_FLUSH => {
            if keylen != 0 || !val.is_empty() || (extralen != 0 && extralen != 4) {
                return ParseResult::Error("malformed flush");
            }
            let expiration = if extralen == 4 { be32(extras) } else { 0 };
            Command::Flush { expiration }
        }
        _ => return ParseResult::Error("unknown opcode"),
    };

    let header = RequestHeader {
        opcode,
        keylen: keylen as u16,
        extralen: extralen as u8,
        data_type,
        bodylen: bodylen as u32,
        opaque,
        cas,
    };

    ParseResult::Complete {
        header,
        command,
        consumed: total,
    }
}

/// Pack a 24-byte response header into `hbuf`. CAS is always zero at this
/// layer; total body length is extras + key + value.
pub fn pack_response_header(
    hbuf: &mut [u8],
    opcode: u8,
    status: u16,
    keylen: u16,
    extralen: u8,
    vallen: u32,
    opaque: u32,
) {
    debug_assert!(hbuf.len() >= HEADER_SIZE);
    hbuf[0] = MAGIC_RESPONSE;
    hbuf[1] = opcode;
    hbuf[2..4].copy_from_slice(&keylen.to_be_bytes());
    hbuf[4] = extralen;
    hbuf[5] = 0x00;
    hbuf[6..8].copy_from_slice(&status.to_be_bytes());
    let bodylen = vallen + keylen as u32 + extralen as u32;
    hbuf[8..12].copy_from_slice(&bodylen.to_be_bytes());
    hbuf[12..16].copy_from_slice(&opaque.to_be_bytes());
    hbuf[16..24].copy_from_slice(&0u64.to_be_bytes());
}

/// Parsed response header, used by the client binary and tests.
#[allow(dead_code)] // the server binary only packs headers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    pub opcode: u8,
    pub keylen: u16,
    pub extralen: u8,
    pub status: u16,
    pub bodylen: u32,
    pub opaque: u32,
    pub cas: u64,
}

#[allow(dead_code)] // the server binary only packs headers
pub fn parse_response_header(buf: &[u8; HEADER_SIZE]) -> Result<ResponseHeader, &'static str> {
    if buf[0] != MAGIC_RESPONSE {
        return Err("bad response magic");
    }
    Ok(ResponseHeader {
        opcode: buf[1],
        keylen: u16::from_be_bytes([buf[2], buf[3]]),
        extralen: buf[4],
        status: u16::from_be_bytes([buf[6], buf[7]]),
        bodylen: be32(&buf[8..12]),
        opaque: be32(&buf[12..16]),
        cas: u64::from_be_bytes([
            buf[16], buf[17], buf[18], buf[19], buf[20], buf[21], buf[22], buf[23],
        ]),
    })
}
