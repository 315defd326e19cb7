use std::{collections::HashMap, io, time::Duration};

use log::{debug, trace, warn};

use crate::{
    error::SampError,
    packet::{self, Opcode, RawString, Reader, ServerAddress},
    transport::{self, ConnectionState, Transport},
};

/// How long a query waits for its reply datagram.
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(2);

/// Servers with more players than this list none of them.
pub const MAX_LISTED_PLAYERS: u16 = 100;

const MAX_REPLY: usize = 65_535;

/// Result of an `i` query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub passworded: bool,
    pub players: u16,
    pub max_players: u16,
    pub hostname: RawString,
    pub gamemode: RawString,
    pub map_name: RawString,
}

/// Entry of the basic player list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerSummary {
    pub nickname: RawString,
    pub score: i32,
}

/// Entry of the detailed player list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerDetail {
    pub player_id: u8,
    pub nickname: RawString,
    pub score: i32,
    pub ping: i32,
}

/// Rule name to rule value.
pub type Rules = HashMap<RawString, RawString>;

/// Client for the read-only query protocol.
///
/// ## Example
/// ```no_run
/// use sampcon::query::QueryClient;
/// use std::error::Error;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn Error>> {
///     let mut client = QueryClient::connect("127.0.0.1:7777".parse()?).await;
///     // the handshake result has to be checked before trusting the client
///     if client.is_online() {
///         let info = client.info().await?;
///         println!("{} ({}/{})", info.hostname, info.players, info.max_players);
///     }
///     Ok(())
/// }
/// ```
pub struct QueryClient {
    addr: ServerAddress,
    transport: Option<Transport>,
    state: ConnectionState,
}

impl QueryClient {
    /// Opens a socket to `addr` and probes it. Never fails: check
    /// [QueryClient::is_online] afterwards.
    pub async fn connect(addr: ServerAddress) -> Self {
        let mut client = QueryClient {
            addr,
            transport: None,
            state: ConnectionState::Probing,
        };

        let (transport, state) = transport::handshake(&addr).await;
        client.transport = transport;
        client.state = state;
        client
    }

    pub fn is_online(&self) -> bool {
        self.state == ConnectionState::Online
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn address(&self) -> &ServerAddress {
        &self.addr
    }

    pub async fn info(&mut self) -> Result<ServerInfo, SampError> {
        let reply = self.request(Opcode::Info).await?;
        decode_info(&reply)
    }

    /// Nickname and score of every player, in server order. Empty when the
    /// server has more than [MAX_LISTED_PLAYERS] players.
    pub async fn basic_players(&mut self) -> Result<Vec<PlayerSummary>, SampError> {
        let reply = self.request(Opcode::BasicPlayers).await?;
        decode_basic_players(&reply)
    }

    pub async fn detailed_players(&mut self) -> Result<Vec<PlayerDetail>, SampError> {
        let reply = self.request(Opcode::DetailedPlayers).await?;
        decode_detailed_players(&reply)
    }

    pub async fn rules(&mut self) -> Result<Rules, SampError> {
        let reply = self.request(Opcode::Rules).await?;
        decode_rules(&reply)
    }

    /// Sends one opcode packet and returns the raw reply, header included.
    async fn request(&mut self, opcode: Opcode) -> Result<Vec<u8>, SampError> {
        let transport = match self.transport.as_mut() {
            Some(transport) => transport,
            None => {
                return Err(SampError::ConnectionFailed(
                    io::ErrorKind::NotConnected.into(),
                ))
            }
        };

        transport.discard_pending();
        trace!("sending {:?} query to {}", opcode, self.addr);
        if let Err(e) = transport.send(&packet::query_packet(&self.addr, opcode)).await {
            warn!("{}: {}", self.addr, e);
        }

        Ok(transport.read(MAX_REPLY, QUERY_TIMEOUT).await)
    }
}

fn body(reply: &[u8]) -> Result<Reader<'_>, SampError> {
    let mut reader = Reader::new(reply);
    reader.skip(packet::REPLY_HEADER_LEN)?;
    Ok(reader)
}

pub fn decode_info(reply: &[u8]) -> Result<ServerInfo, SampError> {
    let mut reader = body(reply)?;

    let passworded = reader.read_u8()? != 0;
    let players = reader.read_u16()?;
    let max_players = reader.read_u16()?;

    let hostname = reader.read_string_u32()?;
    if hostname.is_empty() {
        return Err(SampError::MalformedResponse("empty hostname"));
    }

    Ok(ServerInfo {
        passworded,
        players,
        max_players,
        hostname,
        gamemode: reader.read_string_u32()?,
        map_name: reader.read_string_u32()?,
    })
}

/// Reads the player count. `None` means the server withholds the list.
fn player_count(reader: &mut Reader) -> Result<Option<u16>, SampError> {
    let count = reader.read_u16()?;
    if count > MAX_LISTED_PLAYERS {
        debug!("{} players, list withheld", count);
        return Ok(None);
    }
    Ok(Some(count))
}

pub fn decode_basic_players(reply: &[u8]) -> Result<Vec<PlayerSummary>, SampError> {
    let mut reader = body(reply)?;
    let count = match player_count(&mut reader)? {
        Some(count) => count,
        None => return Ok(Vec::new()),
    };

    (0..count)
        .map(|_| -> Result<PlayerSummary, SampError> {
            Ok(PlayerSummary {
                nickname: reader.read_string_u8()?,
                score: reader.read_i32()?,
            })
        })
        .collect()
}

pub fn decode_detailed_players(reply: &[u8]) -> Result<Vec<PlayerDetail>, SampError> {
    let mut reader = body(reply)?;
    let count = match player_count(&mut reader)? {
        Some(count) => count,
        None => return Ok(Vec::new()),
    };

    (0..count)
        .map(|_| -> Result<PlayerDetail, SampError> {
            Ok(PlayerDetail {
                player_id: reader.read_u8()?,
                nickname: reader.read_string_u8()?,
                score: reader.read_i32()?,
                ping: reader.read_i32()?,
            })
        })
        .collect()
}

pub fn decode_rules(reply: &[u8]) -> Result<Rules, SampError> {
    let mut reader = body(reply)?;
    let count = reader.read_u16()?;

    let mut rules = Rules::new();
    for _ in 0..count {
        let name = reader.read_string_u8()?;
        let value = reader.read_string_u8()?;
        rules.insert(name, value);
    }
    Ok(rules)
}
