use log::{info, Level, Metadata, Record};
use sampcon::{
    query::{PlayerDetail, Rules, ServerInfo},
    server::{self, ServerState},
};
use std::error::Error;
use tokio::signal;

struct SimpleLogger;

impl log::Log for SimpleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Info
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            println!("{} - {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

fn sample_state() -> ServerState {
    let players = vec![
        PlayerDetail {
            player_id: 0,
            nickname: "K1nNngO".into(),
            score: 72,
            ping: 195,
        },
        PlayerDetail {
            player_id: 1,
            nickname: "[kikOo]".into(),
            score: 150,
            ping: 375,
        },
    ];

    ServerState {
        info: ServerInfo {
            passworded: false,
            players: players.len() as u16,
            max_players: 50,
            hostname: "sampcon development server".into(),
            gamemode: "Freeroam".into(),
            map_name: "San Andreas".into(),
        },
        players,
        rules: Rules::from([
            ("gravity".into(), "0.008000".into()),
            ("version".into(), "0.3.7".into()),
            ("weather".into(), "10".into()),
            ("worldtime".into(), "12:00".into()),
        ]),
        rcon_password: "changeme".to_string(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let _ = log::set_logger(&SimpleLogger).map(|()| log::set_max_level(log::LevelFilter::Info));

    let (_, server) = server::Server::start("127.0.0.1:7777", sample_state(), |command| {
        info!("receive: {:?}", command);
        match command {
            "cmdlist" => ["Console Commands:", "  echo", "  exit", "  varlist"]
                .iter()
                .map(|line| line.to_string())
                .collect(),
            "varlist" => [
                "Server Vars:",
                "  hostname\t= \"sampcon development server\"  (string)",
                "  weather\t= 10  (int)",
            ]
            .iter()
            .map(|line| line.to_string())
            .collect(),
            _ => vec![format!("Unknown command or variable:\n  {}", command)],
        }
    })
    .await?;

    tokio::select!(
        _ = server => {}
        _ = signal::ctrl_c() => {}
    );

    info!("bye");
    Ok(())
}
