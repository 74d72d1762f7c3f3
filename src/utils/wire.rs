//! MySQL/MariaDB client-server wire format
//!
//! This module provides packet framing, handshake parsing and command
//! encoding for the classic protocol. It is deliberately pure: all
//! functions operate on byte buffers, socket I/O lives in the client
//! layer.

use std::io;

use bytes::{BufMut, BytesMut};
use sha1::{Digest, Sha1};

// Command bytes
pub const COM_QUIT: u8 = 0x01;
pub const COM_QUERY: u8 = 0x03;
pub const COM_PING: u8 = 0x0e;
pub const COM_STMT_PREPARE: u8 = 0x16;
pub const COM_STMT_EXECUTE: u8 = 0x17;
pub const COM_STMT_CLOSE: u8 = 0x19;

// Capability flags
pub const CLIENT_LONG_PASSWORD: u32 = 0x0000_0001;
pub const CLIENT_LONG_FLAG: u32 = 0x0000_0004;
pub const CLIENT_CONNECT_WITH_DB: u32 = 0x0000_0008;
pub const CLIENT_PROTOCOL_41: u32 = 0x0000_0200;
pub const CLIENT_SSL: u32 = 0x0000_0800;
pub const CLIENT_TRANSACTIONS: u32 = 0x0000_2000;
pub const CLIENT_SECURE_CONNECTION: u32 = 0x0000_8000;
pub const CLIENT_PLUGIN_AUTH: u32 = 0x0008_0000;

/// Header bytes of response packets
pub const OK_HEADER: u8 = 0x00;
pub const EOF_HEADER: u8 = 0xfe;
pub const ERR_HEADER: u8 = 0xff;
pub const MORE_DATA_HEADER: u8 = 0x01;

/// MYSQL_TYPE_LONGLONG, the only parameter type the harness binds
const TYPE_LONGLONG: u8 = 0x08;

/// utf8mb4_general_ci
const DEFAULT_CHARSET: u8 = 45;

const MAX_PACKET_SIZE: u32 = 16 * 1024 * 1024;

pub const NATIVE_PASSWORD_PLUGIN: &str = "mysql_native_password";

/// Capabilities the client announces (TLS bit added separately)
pub fn base_capabilities(with_database: bool) -> u32 {
    let mut caps = CLIENT_LONG_PASSWORD
        | CLIENT_LONG_FLAG
        | CLIENT_PROTOCOL_41
        | CLIENT_TRANSACTIONS
        | CLIENT_SECURE_CONNECTION
        | CLIENT_PLUGIN_AUTH;
    if with_database {
        caps |= CLIENT_CONNECT_WITH_DB;
    }
    caps
}

/// Append one framed packet: 3-byte little-endian length, sequence id,
/// payload. Payloads here never approach the 16MB split threshold.
pub fn write_frame(buf: &mut BytesMut, sequence: u8, payload: &[u8]) {
    let len = payload.len();
    buf.put_u8((len & 0xff) as u8);
    buf.put_u8(((len >> 8) & 0xff) as u8);
    buf.put_u8(((len >> 16) & 0xff) as u8);
    buf.put_u8(sequence);
    buf.put_slice(payload);
}

/// Parse a 4-byte frame header into (payload length, sequence id)
pub fn parse_frame_header(header: &[u8; 4]) -> (usize, u8) {
    let len = header[0] as usize | (header[1] as usize) << 8 | (header[2] as usize) << 16;
    (len, header[3])
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

/// Sequential reader over a packet payload
struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> io::Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(invalid("Truncated packet"));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> io::Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16_le(&mut self) -> io::Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32_le(&mut self) -> io::Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// NUL-terminated string
    fn cstr(&mut self) -> io::Result<&'a [u8]> {
        let rest = &self.data[self.pos..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| invalid("Unterminated string in packet"))?;
        let s = &rest[..nul];
        self.pos += nul + 1;
        Ok(s)
    }

    /// Length-encoded integer; returns None for the NULL marker (0xfb)
    fn lenc_int(&mut self) -> io::Result<Option<u64>> {
        match self.u8()? {
            0xfb => Ok(None),
            0xfc => Ok(Some(self.u16_le()? as u64)),
            0xfd => {
                let b = self.take(3)?;
                Ok(Some(b[0] as u64 | (b[1] as u64) << 8 | (b[2] as u64) << 16))
            }
            0xfe => {
                let b = self.take(8)?;
                Ok(Some(u64::from_le_bytes([
                    b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
                ])))
            }
            v => Ok(Some(v as u64)),
        }
    }
}

/// Initial handshake packet (protocol V10) sent by the server
#[derive(Debug, Clone)]
pub struct ServerHandshake {
    pub protocol_version: u8,
    pub server_version: String,
    pub connection_id: u32,
    /// 20-byte scramble seed (part 1 + part 2, trailing NUL stripped)
    pub auth_seed: Vec<u8>,
    pub capabilities: u32,
    pub auth_plugin: String,
}

impl ServerHandshake {
    pub fn parse(payload: &[u8]) -> io::Result<Self> {
        let mut r = ByteReader::new(payload);

        let protocol_version = r.u8()?;
        if protocol_version != 0x0a {
            return Err(invalid(format!(
                "Unsupported handshake protocol version: {}",
                protocol_version
            )));
        }

        let server_version = String::from_utf8_lossy(r.cstr()?).into_owned();
        let connection_id = r.u32_le()?;

        let mut auth_seed = r.take(8)?.to_vec();
        r.u8()?; // filler

        let cap_low = r.u16_le()? as u32;
        let _charset = r.u8()?;
        let _status = r.u16_le()?;
        let cap_high = r.u16_le()? as u32;
        let capabilities = cap_low | cap_high << 16;

        let auth_data_len = r.u8()? as usize;
        r.take(10)?; // reserved

        if capabilities & CLIENT_SECURE_CONNECTION != 0 {
            let part2_len = std::cmp::max(13, auth_data_len.saturating_sub(8));
            let part2 = r.take(part2_len)?;
            // part 2 carries a trailing NUL that is not part of the seed
            let seed_part = part2.strip_suffix(&[0]).unwrap_or(part2);
            auth_seed.extend_from_slice(seed_part);
        }

        let auth_plugin = if capabilities & CLIENT_PLUGIN_AUTH != 0 {
            String::from_utf8_lossy(r.cstr()?).into_owned()
        } else {
            NATIVE_PASSWORD_PLUGIN.to_string()
        };

        Ok(Self {
            protocol_version,
            server_version,
            connection_id,
            auth_seed,
            capabilities,
            auth_plugin,
        })
    }
}

/// Compute the mysql_native_password scramble:
/// `SHA1(password) XOR SHA1(seed + SHA1(SHA1(password)))`
///
/// An empty password authenticates with an empty response.
pub fn scramble_native_password(seed: &[u8], password: &str) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }

    let h1 = Sha1::digest(password.as_bytes());
    let h2 = Sha1::digest(h1);

    let mut outer = Sha1::new();
    outer.update(seed);
    outer.update(h2);
    let r = outer.finalize();

    h1.iter().zip(r.iter()).map(|(a, b)| a ^ b).collect()
}

/// SSLRequest: the 32-byte prefix of the handshake response, sent before
/// upgrading the stream to TLS
pub fn build_ssl_request(capabilities: u32) -> Vec<u8> {
    let mut payload = Vec::with_capacity(32);
    payload.extend_from_slice(&(capabilities | CLIENT_SSL).to_le_bytes());
    payload.extend_from_slice(&MAX_PACKET_SIZE.to_le_bytes());
    payload.push(DEFAULT_CHARSET);
    payload.extend_from_slice(&[0u8; 23]);
    payload
}

/// HandshakeResponse41
pub fn build_handshake_response(
    capabilities: u32,
    user: &str,
    auth_response: &[u8],
    database: &str,
) -> Vec<u8> {
    let mut payload = Vec::with_capacity(64 + user.len() + database.len());
    payload.extend_from_slice(&capabilities.to_le_bytes());
    payload.extend_from_slice(&MAX_PACKET_SIZE.to_le_bytes());
    payload.push(DEFAULT_CHARSET);
    payload.extend_from_slice(&[0u8; 23]);

    payload.extend_from_slice(user.as_bytes());
    payload.push(0);

    // CLIENT_SECURE_CONNECTION: 1-byte length prefix
    payload.push(auth_response.len() as u8);
    payload.extend_from_slice(auth_response);

    if capabilities & CLIENT_CONNECT_WITH_DB != 0 {
        payload.extend_from_slice(database.as_bytes());
        payload.push(0);
    }

    payload.extend_from_slice(NATIVE_PASSWORD_PLUGIN.as_bytes());
    payload.push(0);

    payload
}

pub fn build_com_query(sql: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(1 + sql.len());
    payload.push(COM_QUERY);
    payload.extend_from_slice(sql.as_bytes());
    payload
}

pub fn build_com_stmt_prepare(sql: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(1 + sql.len());
    payload.push(COM_STMT_PREPARE);
    payload.extend_from_slice(sql.as_bytes());
    payload
}

/// COM_STMT_EXECUTE with zero or more signed 64-bit parameters
pub fn build_com_stmt_execute(statement_id: u32, params: &[i64]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(10 + params.len() * 10);
    payload.push(COM_STMT_EXECUTE);
    payload.extend_from_slice(&statement_id.to_le_bytes());
    payload.push(0); // flags: CURSOR_TYPE_NO_CURSOR
    payload.extend_from_slice(&1u32.to_le_bytes()); // iteration count

    if !params.is_empty() {
        let bitmap_len = (params.len() + 7) / 8;
        payload.extend(std::iter::repeat(0u8).take(bitmap_len));
        payload.push(1); // new-params-bound flag
        for _ in params {
            payload.push(TYPE_LONGLONG);
            payload.push(0); // signed
        }
        for value in params {
            payload.extend_from_slice(&value.to_le_bytes());
        }
    }

    payload
}

pub fn build_com_stmt_close(statement_id: u32) -> Vec<u8> {
    let mut payload = Vec::with_capacity(5);
    payload.push(COM_STMT_CLOSE);
    payload.extend_from_slice(&statement_id.to_le_bytes());
    payload
}

pub fn build_com_quit() -> Vec<u8> {
    vec![COM_QUIT]
}

pub fn build_com_ping() -> Vec<u8> {
    vec![COM_PING]
}

/// OK packet (header byte already verified by the caller)
#[derive(Debug, Clone)]
pub struct OkPacket {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub status_flags: u16,
    pub warnings: u16,
}

impl OkPacket {
    pub fn parse(payload: &[u8]) -> io::Result<Self> {
        let mut r = ByteReader::new(payload);
        let header = r.u8()?;
        if header != OK_HEADER && header != EOF_HEADER {
            return Err(invalid(format!("Not an OK packet: 0x{:02x}", header)));
        }
        let affected_rows = r.lenc_int()?.unwrap_or(0);
        let last_insert_id = r.lenc_int()?.unwrap_or(0);
        let status_flags = if r.remaining() >= 2 { r.u16_le()? } else { 0 };
        let warnings = if r.remaining() >= 2 { r.u16_le()? } else { 0 };
        Ok(Self {
            affected_rows,
            last_insert_id,
            status_flags,
            warnings,
        })
    }
}

/// ERR packet
#[derive(Debug, Clone)]
pub struct ErrPacket {
    pub code: u16,
    pub sql_state: String,
    pub message: String,
}

impl ErrPacket {
    pub fn parse(payload: &[u8]) -> io::Result<Self> {
        let mut r = ByteReader::new(payload);
        let header = r.u8()?;
        if header != ERR_HEADER {
            return Err(invalid(format!("Not an ERR packet: 0x{:02x}", header)));
        }
        let code = r.u16_le()?;
        let rest = r.take(r.remaining())?;
        let (sql_state, message) = if rest.first() == Some(&b'#') && rest.len() >= 6 {
            (
                String::from_utf8_lossy(&rest[1..6]).into_owned(),
                String::from_utf8_lossy(&rest[6..]).into_owned(),
            )
        } else {
            (String::new(), String::from_utf8_lossy(rest).into_owned())
        };
        Ok(Self {
            code,
            sql_state,
            message,
        })
    }
}

/// EOF packets are 0xfe with fewer than 9 payload bytes; 0xfe also opens
/// 8-byte length-encoded integers, hence the length check
pub fn is_eof_packet(payload: &[u8]) -> bool {
    !payload.is_empty() && payload[0] == EOF_HEADER && payload.len() < 9
}

/// First response packet of COM_STMT_PREPARE
#[derive(Debug, Clone, Copy)]
pub struct PrepareOk {
    pub statement_id: u32,
    pub num_columns: u16,
    pub num_params: u16,
}

impl PrepareOk {
    pub fn parse(payload: &[u8]) -> io::Result<Self> {
        let mut r = ByteReader::new(payload);
        let header = r.u8()?;
        if header != OK_HEADER {
            return Err(invalid(format!(
                "Unexpected prepare response header: 0x{:02x}",
                header
            )));
        }
        let statement_id = r.u32_le()?;
        let num_columns = r.u16_le()?;
        let num_params = r.u16_le()?;
        Ok(Self {
            statement_id,
            num_columns,
            num_params,
        })
    }
}

/// Column count packet that opens a result set: a bare length-encoded
/// integer
pub fn parse_column_count(payload: &[u8]) -> io::Result<u64> {
    let mut r = ByteReader::new(payload);
    r.lenc_int()?
        .ok_or_else(|| invalid("NULL column count in result set header"))
}
