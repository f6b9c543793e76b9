use std::time::Duration;

use clap::{Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

type WsStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned HTTP {0}")]
    Status(u16),
    #[error("websocket connect failed: {0}")]
    WsConnect(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("websocket closed")]
    WsClosed,
    #[error("timed out waiting for websocket frame")]
    Timeout,
    #[error("server refused: {0}")]
    ServerError(String),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "netparty-cli", about = "Smoke-test client for a running netparty server")]
struct Cli {
    #[arg(long, env = "NETPARTY_BASE_URL", default_value = "http://127.0.0.1:3000")]
    base_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check `/healthz`.
    Ping,
    /// List public rooms.
    Rooms,
    /// List map layouts.
    Maps,
    /// Join a room's game phase and print every frame.
    Watch {
        #[arg(long)]
        code: String,
        #[arg(long)]
        name: String,
        #[arg(long, help = "Stop after this many frames")]
        max_frames: Option<usize>,
    },
    /// Open a room and print frames until the socket closes.
    Host {
        #[arg(long)]
        name: String,
        #[arg(long, default_value_t = false)]
        public: bool,
        #[arg(long, help = "Launch this game as soon as the room is open")]
        launch: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let cli = Cli::parse();
    let base_url = cli.base_url.trim_end_matches('/').to_owned();

    match cli.command {
        Command::Ping => run_ping(&base_url).await,
        Command::Rooms => print_json(&get_json(&base_url, "/api/rooms").await?),
        Command::Maps => print_json(&get_json(&base_url, "/api/maps").await?),
        Command::Watch { code, name, max_frames } => run_watch(&base_url, &code, &name, max_frames).await,
        Command::Host { name, public, launch } => run_host(&base_url, &name, public, launch).await,
    }
}

async fn run_ping(base_url: &str) -> Result<(), CliError> {
    let response = reqwest::Client::new().get(format!("{base_url}/healthz")).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(CliError::Status(status.as_u16()));
    }
    println!("ok");
    Ok(())
}

async fn get_json(base_url: &str, path: &str) -> Result<Value, CliError> {
    let response = reqwest::Client::new().get(format!("{base_url}{path}")).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(CliError::Status(status.as_u16()));
    }
    Ok(response.json::<Value>().await?)
}

async fn run_watch(base_url: &str, code: &str, name: &str, max_frames: Option<usize>) -> Result<(), CliError> {
    let mut stream = open_socket(base_url).await?;
    send_event(&mut stream, "joinGamePhase", json!({ "code": code, "name": name })).await?;

    let mut seen = 0usize;
    loop {
        let frame = recv_next(&mut stream, Duration::from_secs(60)).await?;
        print_frame(&frame);
        if frame["event"] == "errorMsg" {
            return Err(CliError::ServerError(frame["data"].as_str().unwrap_or("unknown error").to_owned()));
        }
        seen += 1;
        if max_frames.is_some_and(|max| seen >= max) {
            return Ok(());
        }
    }
}

async fn run_host(base_url: &str, name: &str, public: bool, launch: Option<String>) -> Result<(), CliError> {
    let mut stream = open_socket(base_url).await?;
    send_event(&mut stream, "createRoom", json!({ "name": name, "isPublic": public })).await?;

    loop {
        let frame = recv_next(&mut stream, Duration::from_secs(300)).await?;
        print_frame(&frame);
        match frame["event"].as_str() {
            Some("roomJoined") => {
                if let Some(game) = &launch {
                    send_event(&mut stream, "hub_launchGame", json!({ "gameId": game, "options": {} })).await?;
                }
            }
            Some("errorMsg") => {
                return Err(CliError::ServerError(frame["data"].as_str().unwrap_or("unknown error").to_owned()));
            }
            _ => {}
        }
    }
}

// =============================================================================
// WEBSOCKET
// =============================================================================

fn ws_url(base_url: &str) -> Result<String, CliError> {
    if let Some(rest) = base_url.strip_prefix("http://") {
        return Ok(format!("ws://{rest}/ws"));
    }
    if let Some(rest) = base_url.strip_prefix("https://") {
        return Ok(format!("wss://{rest}/ws"));
    }
    Err(CliError::InvalidBaseUrl(base_url.to_owned()))
}

async fn open_socket(base_url: &str) -> Result<WsStream, CliError> {
    let (mut stream, _) = connect_async(ws_url(base_url)?).await.map_err(|e| CliError::WsConnect(Box::new(e)))?;
    loop {
        let frame = recv_next(&mut stream, Duration::from_secs(5)).await?;
        if frame["event"] == "connected" {
            eprintln!("connected as {}", frame["data"]["connectionId"]);
            return Ok(stream);
        }
    }
}

async fn send_event(stream: &mut WsStream, event: &str, data: Value) -> Result<(), CliError> {
    let text = serde_json::to_string(&json!({ "event": event, "data": data }))?;
    stream.send(Message::Text(text.into())).await.map_err(|e| CliError::WsConnect(Box::new(e)))
}

async fn recv_next(stream: &mut WsStream, timeout: Duration) -> Result<Value, CliError> {
    let fut = async {
        loop {
            let Some(message) = stream.next().await else {
                return Err(CliError::WsClosed);
            };
            match message.map_err(|error| CliError::WsConnect(Box::new(error)))? {
                Message::Text(text) => return serde_json::from_str(text.as_str()).map_err(CliError::from),
                Message::Close(_) => return Err(CliError::WsClosed),
                _ => {}
            }
        }
    };

    tokio::time::timeout(timeout, fut).await.map_err(|_| CliError::Timeout)?
}

fn print_frame(frame: &Value) {
    println!("{} {}", frame["event"].as_str().unwrap_or("?"), frame["data"]);
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_url_follows_scheme() {
        assert_eq!(ws_url("http://localhost:3000").expect("http"), "ws://localhost:3000/ws");
        assert_eq!(ws_url("https://party.example").expect("https"), "wss://party.example/ws");
        assert!(matches!(ws_url("ftp://nope"), Err(CliError::InvalidBaseUrl(_))));
    }
}
