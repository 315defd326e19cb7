use std::{collections::HashMap, time::Duration};

use log::{debug, trace, warn};
use tokio::time::Instant;

use crate::{
    packet::{self, RawString, ServerAddress},
    transport::{self, ConnectionState, Transport},
};

/// How long reply lines are collected unless the caller says otherwise.
pub const DEFAULT_CAPTURE_WINDOW: Duration = Duration::from_secs(1);

/// Bytes read per poll of the capture loop.
pub const RCON_READ_SIZE: usize = 128;

/// Echoed header, opcode and the u16 length in front of every reply line.
pub const RCON_REPLY_OFFSET: usize = packet::REPLY_HEADER_LEN + 2;

/// Capture windows too large for the clock end this far out instead.
const MAX_CAPTURE_WINDOW: Duration = Duration::from_secs(86_400 * 365);

/// Simple asynchronous rcon client for SA-MP servers. Every command carries
/// the password in cleartext; there is no session.
///
/// Operations take `&mut self` since they share one socket and replies are
/// matched to commands purely by timing.
///
/// ## Example
/// ```no_run
/// use sampcon::rcon::RconClient;
/// use std::error::Error;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn Error>> {
///     let mut client = RconClient::connect("127.0.0.1:7777".parse()?, "changeme").await;
///     if !client.is_online() {
///         return Ok(());
///     }
///
///     for line in client.command_list().await {
///         println!("{}", line);
///     }
///     client.admin_say("restarting in 5 minutes").await;
///     Ok(())
/// }
/// ```
pub struct RconClient {
    addr: ServerAddress,
    password: String,
    transport: Option<Transport>,
    state: ConnectionState,
}

impl RconClient {
    /// Opens a socket to `addr` and probes it. Never fails: check
    /// [RconClient::is_online] afterwards.
    pub async fn connect(addr: ServerAddress, password: &str) -> Self {
        let mut client = RconClient {
            addr,
            password: password.to_string(),
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

    /// Sends `command` and collects reply lines for `capture`. With `None` the
    /// command is fire-and-forget and nothing is returned. Lines are kept
    /// byte for byte since servers answer in their own codepage.
    ///
    /// Collection ends at the deadline or at the first poll that yields no
    /// text, whichever comes first.
    pub async fn send_command(
        &mut self,
        command: &str,
        capture: Option<Duration>,
    ) -> Option<Vec<RawString>> {
        let packet = packet::rcon_packet(&self.addr, &self.password, command);

        let transport = match self.transport.as_mut() {
            Some(transport) => transport,
            None => {
                debug!("{}: no socket, dropping command", self.addr);
                return capture.map(|_| Vec::new());
            }
        };

        trace!("sending rcon command to {}", self.addr);
        if let Err(e) = transport.send(&packet).await {
            warn!("{}: {}", self.addr, e);
        }

        let window = capture?;
        let start = Instant::now();
        let deadline = start
            .checked_add(window)
            .unwrap_or(start + MAX_CAPTURE_WINDOW);
        let mut lines = Vec::new();

        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }

            let chunk = transport.read(RCON_READ_SIZE, deadline - now).await;
            match chunk.get(RCON_REPLY_OFFSET..) {
                Some(text) if !text.is_empty() => {
                    lines.push(RawString::from(text));
                }
                _ => break,
            }
        }

        trace!("collected {} reply lines", lines.len());
        Some(lines)
    }

    /// Runs `command`, capturing replies for `delay` (`None` to skip capture).
    pub async fn call(&mut self, command: &str, delay: Option<Duration>) -> Option<Vec<RawString>> {
        self.send_command(command, delay).await
    }

    async fn capture(&mut self, command: &str) -> Vec<RawString> {
        self.send_command(command, Some(DEFAULT_CAPTURE_WINDOW))
            .await
            .unwrap_or_default()
    }

    async fn fire(&mut self, command: &str) {
        self.send_command(command, None).await;
    }

    /// Names of the commands the server accepts.
    pub async fn command_list(&mut self) -> Vec<RawString> {
        let lines = self.capture("cmdlist").await;
        lines
            .iter()
            .skip(1)
            .map(|line| RawString::from(trim(line.as_bytes())))
            .collect()
    }

    /// Current server variables from `varlist`, name to value.
    pub async fn server_variables(&mut self) -> HashMap<RawString, RawString> {
        let lines = self.capture("varlist").await;
        parse_variables(lines.iter().skip(1).map(RawString::as_bytes))
    }

    pub async fn set_weather(&mut self, weather_id: i32) {
        self.fire(&format!("weather {}", weather_id)).await
    }

    /// Default gravity is 0.008.
    pub async fn set_gravity(&mut self, gravity: f32) {
        self.fire(&format!("gravity {}", gravity)).await
    }

    pub async fn player_ban(&mut self, player_id: u16) -> Vec<RawString> {
        self.capture(&format!("ban {}", player_id)).await
    }

    pub async fn player_kick(&mut self, player_id: u16) -> Vec<RawString> {
        self.capture(&format!("kick {}", player_id)).await
    }

    pub async fn address_ban(&mut self, address: &str) -> Vec<RawString> {
        self.capture(&format!("banip {}", address)).await
    }

    pub async fn address_unban(&mut self, address: &str) -> Vec<RawString> {
        self.capture(&format!("unbanip {}", address)).await
    }

    pub async fn reload_logs(&mut self) -> Vec<RawString> {
        self.capture("reloadlog").await
    }

    pub async fn reload_bans(&mut self) -> Vec<RawString> {
        self.capture("reloadbans").await
    }

    /// Broadcasts `message` to every player as the admin.
    pub async fn admin_say(&mut self, message: &str) {
        self.fire(&format!("say {}", message)).await
    }

    pub async fn game_change_mode(&mut self, gamemode: &str) {
        self.fire(&format!("changemode {}", gamemode)).await
    }

    pub async fn game_next_mode(&mut self) {
        self.fire("gmx").await
    }

    /// Executes a server config file.
    pub async fn game_exec(&mut self, config: &str) -> Vec<RawString> {
        self.capture(&format!("exec {}", config)).await
    }

    pub async fn game_load_filterscript(&mut self, filterscript: &str) -> Vec<RawString> {
        self.capture(&format!("loadfs {}", filterscript)).await
    }

    pub async fn game_unload_filterscript(&mut self, filterscript: &str) -> Vec<RawString> {
        self.capture(&format!("unloadfs {}", filterscript)).await
    }

    pub async fn game_reload_filterscript(&mut self, filterscript: &str) -> Vec<RawString> {
        self.capture(&format!("reloadfs {}", filterscript)).await
    }

    /// Shuts the server down without confirmation.
    pub async fn game_exit(&mut self) {
        self.fire("exit").await
    }
}

/// Builds the variable map from `varlist` lines, skipping lines that do not
/// parse.
pub fn parse_variables<'a, I>(lines: I) -> HashMap<RawString, RawString>
where
    I: IntoIterator<Item = &'a [u8]>,
{
    lines
        .into_iter()
        .filter_map(|line| {
            let parsed = parse_variable(line);
            if parsed.is_none() {
                debug!("skipping varlist line {:?}", String::from_utf8_lossy(line));
            }
            parsed
        })
        .collect()
}

/// Parses one `name = value  (type)` line. Quoted values run from the first
/// quote to the last quote that is followed by whitespace and a `(`; bare
/// values end at the first whitespace before a `(`.
pub fn parse_variable(line: &[u8]) -> Option<(RawString, RawString)> {
    let eq = line.iter().position(|&b| b == b'=')?;
    let name = trim(&line[..eq]);
    let rest = trim_start(&line[eq + 1..]);
    if name.is_empty() {
        return None;
    }

    let value = if let Some(quoted) = rest.strip_prefix(&b"\""[..]) {
        (0..quoted.len())
            .rev()
            .filter(|&i| quoted[i] == b'(')
            .find_map(|open| {
                let before = &quoted[..open];
                if !before.last().map_or(false, u8::is_ascii_whitespace) {
                    return None;
                }
                trim_end(before).strip_suffix(&b"\""[..])
            })?
    } else {
        let open = (1..rest.len())
            .find(|&i| rest[i] == b'(' && rest[i - 1].is_ascii_whitespace())?;
        trim_end(&rest[..open])
    };

    Some((name.into(), value.into()))
}

fn trim_start(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    &bytes[start..]
}

fn trim_end(bytes: &[u8]) -> &[u8] {
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(0, |i| i + 1);
    &bytes[..end]
}

fn trim(bytes: &[u8]) -> &[u8] {
    trim_end(trim_start(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(name: &str, value: &str) -> Option<(RawString, RawString)> {
        Some((name.into(), value.into()))
    }

    #[test]
    fn bare_value() {
        assert_eq!(parse_variable(b"weather = 0 (int)"), pair("weather", "0"));
    }

    #[test]
    fn quoted_value() {
        assert_eq!(
            parse_variable(b"hostname = \"My Server\" (string)"),
            pair("hostname", "My Server")
        );
    }

    #[test]
    fn quoted_value_with_parens_and_quotes() {
        assert_eq!(
            parse_variable(b"hostname  = \"Fun (\"DM\") server\"  (string) (read-only)"),
            pair("hostname", "Fun (\"DM\") server")
        );
        assert_eq!(
            parse_variable(b"mapname = \"San (Andreas)\" (string)"),
            pair("mapname", "San (Andreas)")
        );
        assert_eq!(parse_variable(b"motd = \"\" (string)"), pair("motd", ""));
    }

    #[test]
    fn bare_value_with_flags() {
        assert_eq!(
            parse_variable(b"maxplayers = 50 (int) (read-only)"),
            pair("maxplayers", "50")
        );
        assert_eq!(
            parse_variable(b"gravity\t=\t0.008000  (float)"),
            pair("gravity", "0.008000")
        );
    }

    #[test]
    fn codepage_bytes_survive() {
        let (name, value) = parse_variable(b"hostname = \"Caf\xe9 Stunt\" (string)").unwrap();
        assert_eq!(name, "hostname");
        assert_eq!(value.as_bytes(), b"Caf\xe9 Stunt");
    }

    #[test]
    fn trims_ascii_whitespace() {
        assert_eq!(trim(b"  \techo \r\n"), b"echo");
        assert_eq!(trim(b"   "), b"");
        assert_eq!(trim(b""), b"");
    }

    #[test]
    fn malformed_lines_are_skipped() {
        assert_eq!(parse_variable(b"Server Vars:"), None);
        assert_eq!(parse_variable(b"weather = 0"), None);
        assert_eq!(parse_variable(b"hostname = \"unterminated (string)"), None);
        assert_eq!(parse_variable(b" = 1 (int)"), None);
        assert_eq!(parse_variable(b"weather = (int)"), None);

        let vars = parse_variables([
            &b"garbage"[..],
            &b"lanmode = 0 (int)"[..],
            &b""[..],
            &b"rcon_password = \"changeme\" (string)"[..],
        ]);
        assert_eq!(vars.len(), 2);
        assert_eq!(vars[&b"lanmode"[..]], "0");
        assert_eq!(vars[&b"rcon_password"[..]], "changeme");
    }
}
