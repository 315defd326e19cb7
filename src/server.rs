use std::net::SocketAddr;

use log::{debug, error, info};
use tokio::{net::UdpSocket, task::JoinHandle};

use crate::{
    error::SampError,
    packet::{self, Opcode, RawString, Reader, HEADER_LEN},
    query::{PlayerDetail, Rules, ServerInfo, MAX_LISTED_PLAYERS},
};

/// Line a real server sends back when the rcon password does not match.
pub const INVALID_PASSWORD_REPLY: &str = "Invalid RCON password.";

/// What the development server reports about itself.
#[derive(Debug, Clone)]
pub struct ServerState {
    pub info: ServerInfo,
    pub players: Vec<PlayerDetail>,
    pub rules: Rules,
    pub rcon_password: String,
}

/// Minimal server speaking the SA-MP query and rcon protocols, for poking at
/// clients without a game server around.
pub struct Server;

impl Server {
    /// Binds `addr` and answers packets until the returned task is dropped or
    /// aborted. `handler` maps an authenticated rcon command to reply lines.
    pub async fn start<F>(
        addr: &str,
        state: ServerState,
        handler: F,
    ) -> Result<(SocketAddr, JoinHandle<()>), SampError>
    where
        F: Fn(&str) -> Vec<String> + Send + Sync + 'static,
    {
        let socket = UdpSocket::bind(addr).await.map_err(SampError::BindError)?;
        let local_addr = socket.local_addr().map_err(SampError::BindError)?;

        let handle: JoinHandle<()> = tokio::spawn(async move {
            info!("server running on {}", local_addr);
            let mut buf = vec![0u8; 65_535];
            loop {
                let (n, peer) = match socket.recv_from(&mut buf).await {
                    Ok(received) => received,
                    Err(e) => {
                        error!("{:?}", e);
                        continue;
                    }
                };

                let replies = match Server::respond(&state, &handler, &buf[..n]) {
                    Ok(replies) => replies,
                    Err(e) => {
                        debug!("ignoring packet from {}: {}", peer, e);
                        continue;
                    }
                };

                for reply in replies {
                    if let Err(e) = socket.send_to(&reply, peer).await {
                        error!("reply to {} failed: {:?}", peer, e);
                    }
                }
            }
        });

        Ok((local_addr, handle))
    }

    fn respond<F>(
        state: &ServerState,
        handler: &F,
        packet: &[u8],
    ) -> Result<Vec<Vec<u8>>, SampError>
    where
        F: Fn(&str) -> Vec<String>,
    {
        let opcode = packet::check_header(&mut Reader::new(packet))?;
        let header = &packet[..HEADER_LEN];

        let replies = match opcode {
            Opcode::Ping => vec![packet.to_vec()],
            Opcode::Info => vec![encode_info(header, &state.info)],
            Opcode::BasicPlayers => vec![encode_basic_players(header, &state.players)],
            Opcode::DetailedPlayers => vec![encode_detailed_players(header, &state.players)],
            Opcode::Rules => vec![encode_rules(header, &state.rules)],
            Opcode::Rcon => {
                let (password, command) = packet::decode_rcon_packet(packet)?;
                let lines = if password == state.rcon_password {
                    handler(&command)
                } else {
                    vec![INVALID_PASSWORD_REPLY.to_string()]
                };
                lines
                    .iter()
                    .map(|line| encode_rcon_reply(header, line))
                    .collect()
            }
        };

        Ok(replies)
    }
}

fn reply_start(header: &[u8], opcode: Opcode) -> Vec<u8> {
    let mut reply = header.to_vec();
    reply.push(opcode.as_byte());
    reply
}

/// Lengths past 255 do not fit the prefix, so the string is cut.
fn push_string_u8(reply: &mut Vec<u8>, s: &RawString) {
    let bytes = &s.as_bytes()[..s.len().min(u8::MAX as usize)];
    reply.push(bytes.len() as u8);
    reply.extend_from_slice(bytes);
}

fn push_string_u32(reply: &mut Vec<u8>, s: &RawString) {
    let bytes = &s.as_bytes()[..s.len().min(u8::MAX as usize)];
    reply.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    reply.extend_from_slice(bytes);
}

pub fn encode_info(header: &[u8], info: &ServerInfo) -> Vec<u8> {
    let mut reply = reply_start(header, Opcode::Info);
    reply.push(info.passworded as u8);
    reply.extend_from_slice(&info.players.to_le_bytes());
    reply.extend_from_slice(&info.max_players.to_le_bytes());
    push_string_u32(&mut reply, &info.hostname);
    push_string_u32(&mut reply, &info.gamemode);
    push_string_u32(&mut reply, &info.map_name);
    reply
}

/// Crowded servers send the count and no entries.
fn push_player_count(reply: &mut Vec<u8>, players: &[PlayerDetail]) -> bool {
    let count = u16::try_from(players.len()).unwrap_or(u16::MAX);
    reply.extend_from_slice(&count.to_le_bytes());
    count <= MAX_LISTED_PLAYERS
}

pub fn encode_basic_players(header: &[u8], players: &[PlayerDetail]) -> Vec<u8> {
    let mut reply = reply_start(header, Opcode::BasicPlayers);
    if push_player_count(&mut reply, players) {
        for player in players {
            push_string_u8(&mut reply, &player.nickname);
            reply.extend_from_slice(&player.score.to_le_bytes());
        }
    }
    reply
}

pub fn encode_detailed_players(header: &[u8], players: &[PlayerDetail]) -> Vec<u8> {
    let mut reply = reply_start(header, Opcode::DetailedPlayers);
    if push_player_count(&mut reply, players) {
        for player in players {
            reply.push(player.player_id);
            push_string_u8(&mut reply, &player.nickname);
            reply.extend_from_slice(&player.score.to_le_bytes());
            reply.extend_from_slice(&player.ping.to_le_bytes());
        }
    }
    reply
}

pub fn encode_rules(header: &[u8], rules: &Rules) -> Vec<u8> {
    let mut reply = reply_start(header, Opcode::Rules);
    let count = rules.len().min(u16::MAX as usize);
    reply.extend_from_slice(&(count as u16).to_le_bytes());
    for (name, value) in rules.iter().take(count) {
        push_string_u8(&mut reply, name);
        push_string_u8(&mut reply, value);
    }
    reply
}

/// One rcon reply line: header, `x`, u16 length, text.
pub fn encode_rcon_reply(header: &[u8], line: &str) -> Vec<u8> {
    let mut reply = reply_start(header, Opcode::Rcon);
    let len = line.len().min(u16::MAX as usize);
    reply.extend_from_slice(&(len as u16).to_le_bytes());
    reply.extend_from_slice(&line.as_bytes()[..len]);
    reply
}
