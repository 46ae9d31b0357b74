//! Operator console on standard input.

use std::fmt::Write as _;

use mazenet_session::ConnectionInfo;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::ServerHandle;

/// A parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Graceful shutdown.
    Exit,
    /// List live connections.
    Connections,
    Help,
    /// Blank line; nothing to do.
    Empty,
}

impl ConsoleCommand {
    /// Parses one line. Unknown commands come back as the error message
    /// to show the operator.
    pub fn parse(line: &str) -> Result<Self, String> {
        match line.trim() {
            "" => Ok(Self::Empty),
            "exit" | "quit" => Ok(Self::Exit),
            "connections" => Ok(Self::Connections),
            "help" => Ok(Self::Help),
            other => Err(format!("unknown command: {other} (try 'help')")),
        }
    }
}

pub const HELP: &str = "\
commands:
  connections   list active connections
  exit          shut the server down
  help          show this help";

/// Renders the `connections` table.
pub fn format_connections(connections: &[ConnectionInfo]) -> String {
    if connections.is_empty() {
        return "no active connections".to_string();
    }
    let mut out = format!(
        "{:<10} {:<10} {:<16} {:<8} {:>6}\n",
        "id", "state", "name", "entity", "moves"
    );
    for info in connections {
        let name = info.name.as_deref().unwrap_or("-");
        let entity = info
            .entity
            .map_or_else(|| "-".to_string(), |e| e.to_string());
        let _ = writeln!(
            out,
            "{:<10} {:<10} {:<16} {:<8} {:>6}",
            info.id.to_string(),
            info.state.to_string(),
            name,
            entity,
            info.moves
        );
    }
    out.truncate(out.trim_end().len());
    out
}

/// Reads commands from `input` until `exit` or end of input.
///
/// `exit` triggers a graceful shutdown. End of input only stops the
/// console; the server keeps running.
pub async fn run_console<R>(input: R, server: ServerHandle)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                tracing::debug!("console input closed");
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "console read failed");
                return;
            }
        };

        match ConsoleCommand::parse(&line) {
            Ok(ConsoleCommand::Exit) => {
                println!("shutting down");
                server.shutdown();
                return;
            }
            Ok(ConsoleCommand::Connections) => {
                println!("{}", format_connections(&server.connections()));
            }
            Ok(ConsoleCommand::Help) => println!("{HELP}"),
            Ok(ConsoleCommand::Empty) => {}
            Err(message) => eprintln!("error: {message}"),
        }
    }
}
