use std::{
    borrow::Borrow,
    fmt,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    str::FromStr,
};

use crate::error::SampError;

/// Port a SA-MP server listens on unless told otherwise.
pub const DEFAULT_PORT: u16 = 7777;

/// Every packet, in either direction, starts with this.
pub const MAGIC: &[u8; 4] = b"SAMP";

/// `SAMP`, four address octets, port low byte, port high byte.
pub const HEADER_LEN: usize = 10;

/// Replies echo the request header followed by the opcode byte.
pub const REPLY_HEADER_LEN: usize = HEADER_LEN + 1;

/// Payload of the handshake probe. The server echoes it back verbatim.
pub const HANDSHAKE_TOKEN: &[u8; 5] = b"p4150";

/// Raw 4-byte values at or above this are negative in two's complement.
const SIGN_THRESHOLD: u64 = 1 << 31;

/// Address of a SA-MP server. The host has to be an IPv4 literal because its
/// octets are written into every packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServerAddress {
    ip: Ipv4Addr,
    port: u16,
}

impl ServerAddress {
    pub fn new(host: &str, port: u16) -> Result<Self, SampError> {
        let ip = host
            .parse::<Ipv4Addr>()
            .map_err(|_| SampError::InvalidAddress(host.to_string()))?;
        Ok(ServerAddress { ip, port })
    }

    pub fn ip(&self) -> Ipv4Addr {
        self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.ip, self.port))
    }
}

impl From<SocketAddrV4> for ServerAddress {
    fn from(addr: SocketAddrV4) -> Self {
        ServerAddress {
            ip: *addr.ip(),
            port: addr.port(),
        }
    }
}

/// Accepts `a.b.c.d` (port 7777) or `a.b.c.d:port`.
impl FromStr for ServerAddress {
    type Err = SampError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| SampError::InvalidAddress(s.to_string()))?;
                ServerAddress::new(host, port)
            }
            None => ServerAddress::new(s, DEFAULT_PORT),
        }
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// Selects what a packet asks the server for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    /// `i`: hostname, gamemode, map and player counts.
    Info,
    /// `c`: nickname and score of every player.
    BasicPlayers,
    /// `d`: id, nickname, score and ping of every player.
    DetailedPlayers,
    /// `r`: server rules.
    Rules,
    /// `p`: the handshake probe.
    Ping,
    /// `x`: remote console command.
    Rcon,
}

impl Opcode {
    pub fn as_byte(&self) -> u8 {
        match self {
            Opcode::Info => b'i',
            Opcode::BasicPlayers => b'c',
            Opcode::DetailedPlayers => b'd',
            Opcode::Rules => b'r',
            Opcode::Ping => b'p',
            Opcode::Rcon => b'x',
        }
    }
}

impl TryFrom<u8> for Opcode {
    type Error = SampError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            b'i' => Ok(Opcode::Info),
            b'c' => Ok(Opcode::BasicPlayers),
            b'd' => Ok(Opcode::DetailedPlayers),
            b'r' => Ok(Opcode::Rules),
            b'p' => Ok(Opcode::Ping),
            b'x' => Ok(Opcode::Rcon),
            _ => Err(SampError::MalformedResponse("unknown opcode")),
        }
    }
}

/// Builds the header shared by every outbound packet.
pub fn header(addr: &ServerAddress) -> [u8; HEADER_LEN] {
    let [a, b, c, d] = addr.ip().octets();
    let [port_lo, port_hi] = addr.port().to_le_bytes();
    [
        MAGIC[0], MAGIC[1], MAGIC[2], MAGIC[3], a, b, c, d, port_lo, port_hi,
    ]
}

/// Header plus a single opcode byte.
pub fn query_packet(addr: &ServerAddress, opcode: Opcode) -> Vec<u8> {
    let mut payload = header(addr).to_vec();
    payload.push(opcode.as_byte());
    payload
}

/// Sent by both clients right after the socket is opened.
pub fn handshake_packet(addr: &ServerAddress) -> Vec<u8> {
    let mut payload = header(addr).to_vec();
    payload.extend_from_slice(HANDSHAKE_TOKEN);
    payload
}

/// Header, `x`, then the password and the command, each prefixed with its
/// length as a little-endian u16.
pub fn rcon_packet(addr: &ServerAddress, password: &str, command: &str) -> Vec<u8> {
    let mut payload = header(addr).to_vec();
    payload.push(Opcode::Rcon.as_byte());
    push_u16_prefixed(&mut payload, password.as_bytes());
    push_u16_prefixed(&mut payload, command.as_bytes());
    payload
}

/// Anything longer than a u16 can describe is cut so the prefix stays honest.
fn push_u16_prefixed(payload: &mut Vec<u8>, bytes: &[u8]) {
    let len = u16::try_from(bytes.len()).unwrap_or(u16::MAX);
    payload.extend_from_slice(&len.to_le_bytes());
    payload.extend_from_slice(&bytes[..len as usize]);
}

/// Rebuilds a little-endian unsigned integer from up to four bytes. `None`
/// means there was nothing to read, which is not the same as a zero.
pub fn le_uint(bytes: &[u8]) -> Option<u32> {
    if bytes.is_empty() {
        return None;
    }

    Some(
        bytes
            .iter()
            .take(4)
            .enumerate()
            .fold(0u32, |acc, (i, b)| acc | (*b as u32) << (8 * i)),
    )
}

/// Reinterprets a raw 4-byte value as a signed 32-bit number.
pub fn to_signed(raw: u32) -> i32 {
    let raw = raw as u64;
    if raw >= SIGN_THRESHOLD {
        (raw as i64 - (1i64 << 32)) as i32
    } else {
        raw as i32
    }
}

/// Text field taken off the wire as-is. The protocol declares no encoding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RawString(Vec<u8>);

impl RawString {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }
}

impl From<Vec<u8>> for RawString {
    fn from(bytes: Vec<u8>) -> Self {
        RawString(bytes)
    }
}

impl From<&[u8]> for RawString {
    fn from(bytes: &[u8]) -> Self {
        RawString(bytes.to_vec())
    }
}

impl From<&str> for RawString {
    fn from(s: &str) -> Self {
        RawString(s.as_bytes().to_vec())
    }
}

impl Borrow<[u8]> for RawString {
    fn borrow(&self) -> &[u8] {
        &self.0
    }
}

impl PartialEq<str> for RawString {
    fn eq(&self, other: &str) -> bool {
        self.0 == other.as_bytes()
    }
}

impl PartialEq<&str> for RawString {
    fn eq(&self, other: &&str) -> bool {
        self.0 == other.as_bytes()
    }
}

impl fmt::Display for RawString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

/// Cursor over a received datagram. Every read either yields the full width
/// it asked for or fails with [SampError::TruncatedResponse].
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], SampError> {
        if self.remaining() < n {
            return Err(SampError::TruncatedResponse {
                needed: n,
                available: self.remaining(),
            });
        }
        let bytes = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    pub fn skip(&mut self, n: usize) -> Result<(), SampError> {
        self.read_bytes(n).map(|_| ())
    }

    pub fn read_u8(&mut self) -> Result<u8, SampError> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, SampError> {
        self.read_le(2).map(|v| v as u16)
    }

    pub fn read_u32(&mut self) -> Result<u32, SampError> {
        self.read_le(4)
    }

    pub fn read_i32(&mut self) -> Result<i32, SampError> {
        self.read_u32().map(to_signed)
    }

    /// One length byte followed by that many bytes.
    pub fn read_string_u8(&mut self) -> Result<RawString, SampError> {
        let len = self.read_u8()? as usize;
        Ok(self.read_bytes(len)?.into())
    }

    /// Info strings sit behind a 4-byte length field of which only the first
    /// byte carries the length. All four bytes are consumed.
    pub fn read_string_u32(&mut self) -> Result<RawString, SampError> {
        let len = self.read_bytes(4)?[0] as usize;
        Ok(self.read_bytes(len)?.into())
    }

    fn read_le(&mut self, width: usize) -> Result<u32, SampError> {
        let bytes = self.read_bytes(width)?;
        le_uint(bytes).ok_or(SampError::TruncatedResponse {
            needed: width,
            available: 0,
        })
    }
}

/// Recovers `(password, command)` from an RCON packet. Used by the server side.
pub fn decode_rcon_packet(packet: &[u8]) -> Result<(String, String), SampError> {
    let mut reader = Reader::new(packet);
    let opcode = check_header(&mut reader)?;
    if opcode != Opcode::Rcon {
        return Err(SampError::MalformedResponse("not an rcon packet"));
    }

    let password = read_string_u16(&mut reader)?;
    let command = read_string_u16(&mut reader)?;
    Ok((password, command))
}

/// Validates the magic and returns the opcode following the header.
pub fn check_header(reader: &mut Reader) -> Result<Opcode, SampError> {
    if reader.read_bytes(MAGIC.len())? != MAGIC {
        return Err(SampError::MalformedResponse("missing SAMP magic"));
    }
    reader.skip(HEADER_LEN - MAGIC.len())?;
    Opcode::try_from(reader.read_u8()?)
}

fn read_string_u16(reader: &mut Reader) -> Result<String, SampError> {
    let len = reader.read_u16()? as usize;
    Ok(String::from_utf8_lossy(reader.read_bytes(len)?).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local() -> ServerAddress {
        ServerAddress::new("127.0.0.1", 7777).unwrap()
    }

    #[test]
    fn header_carries_octets_and_port() {
        let addr = ServerAddress::new("192.168.1.20", 0x1E61).unwrap();
        assert_eq!(header(&addr), *b"SAMP\xC0\xA8\x01\x14\x61\x1E");
    }

    #[test]
    fn query_packet_appends_opcode() {
        let packet = query_packet(&local(), Opcode::Rules);
        assert_eq!(packet.len(), REPLY_HEADER_LEN);
        assert_eq!(packet[10], b'r');
    }

    #[test]
    fn handshake_packet_ends_with_token() {
        let packet = handshake_packet(&local());
        assert_eq!(&packet[..4], b"SAMP");
        assert_eq!(&packet[HEADER_LEN..], b"p4150");
    }

    #[test]
    fn rcon_packet_recovers_password_and_command() {
        let packet = rcon_packet(&local(), "changeme", "say hello there");
        assert_eq!(packet[10], b'x');
        assert_eq!(&packet[11..13], &[8, 0]);

        let (password, command) = decode_rcon_packet(&packet).unwrap();
        assert_eq!(password, "changeme");
        assert_eq!(command, "say hello there");
    }

    #[test]
    fn rcon_packet_with_empty_fields() {
        let packet = rcon_packet(&local(), "", "");
        assert_eq!(packet.len(), HEADER_LEN + 5);
        let (password, command) = decode_rcon_packet(&packet).unwrap();
        assert!(password.is_empty());
        assert!(command.is_empty());
    }

    #[test]
    fn le_uint_distinguishes_empty_from_zero() {
        assert_eq!(le_uint(&[]), None);
        assert_eq!(le_uint(&[0, 0]), Some(0));
        assert_eq!(le_uint(&[0x34, 0x12]), Some(0x1234));
        assert_eq!(le_uint(&[0x78, 0x56, 0x34, 0x12]), Some(0x1234_5678));
    }

    #[test]
    fn signed_wraparound() {
        assert_eq!(to_signed(u32::from_le_bytes([0xFF; 4])), -1);
        assert_eq!(to_signed(0x8000_0000), i32::MIN);
        assert_eq!(to_signed(0x7FFF_FFFF), i32::MAX);
        assert_eq!(to_signed(150), 150);
    }

    #[test]
    fn reader_reports_truncation() {
        let mut reader = Reader::new(&[1, 2, 3]);
        assert_eq!(reader.read_u16().unwrap(), 0x0201);
        match reader.read_u32() {
            Err(SampError::TruncatedResponse { needed, available }) => {
                assert_eq!(needed, 4);
                assert_eq!(available, 1);
            }
            other => panic!("expected truncation, got {:?}", other),
        }
    }

    #[test]
    fn reader_info_string_uses_first_length_byte() {
        let mut reader = Reader::new(b"\x03\x00\x00\x00abcrest");
        assert_eq!(reader.read_string_u32().unwrap(), "abc");
        assert_eq!(reader.remaining(), 4);
    }

    #[test]
    fn address_parsing() {
        let addr: ServerAddress = "10.0.0.1".parse().unwrap();
        assert_eq!(addr.port(), DEFAULT_PORT);

        let addr: ServerAddress = "10.0.0.1:7778".parse().unwrap();
        assert_eq!(addr.to_string(), "10.0.0.1:7778");

        assert!(matches!(
            "play.example.com:7777".parse::<ServerAddress>(),
            Err(SampError::InvalidAddress(_))
        ));
        assert!(ServerAddress::new("10.0.0.1", 0).is_ok());
    }

    #[test]
    fn raw_string_keeps_invalid_utf8() {
        let s = RawString::from(&b"caf\xe9"[..]);
        assert_eq!(s.as_bytes(), b"caf\xe9");
        assert_eq!(s.to_string_lossy(), "caf\u{FFFD}");
    }
}
