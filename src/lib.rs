//! Pure Rust async client for the [SA-MP](https://sampwiki.blast.hk/wiki/Query_Mechanism)
//! query and remote console protocols.
//!
//! [QueryClient] asks a server for its info, players and rules. [RconClient]
//! sends password-authenticated admin commands and collects the text lines
//! the server answers with. Both speak UDP to a single server and must be
//! checked with `is_online()` after connecting.
pub mod error;
pub mod packet;
pub mod query;
pub mod rcon;
pub mod server;
pub mod transport;

pub use error::SampError;
pub use packet::{RawString, ServerAddress, DEFAULT_PORT};
pub use query::{PlayerDetail, PlayerSummary, QueryClient, Rules, ServerInfo};
pub use rcon::RconClient;
pub use transport::ConnectionState;
