//! Interactive client console.
//!
//! Reads one command per line, runs it through a [`ClientSession`], and
//! prints the outcome. The session (and so the watermark table) lives as
//! long as the console.

use anyhow::{Result, anyhow};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::client::{ClientError, ClientSession};

const HELP: &str = "\
Commands (case-insensitive):
  GET <key>          (alias: g)  -- read a key from a random replica
  PUT <key> <value>  (alias: p)  -- write a key through a random replica
  WATERMARKS         (alias: w)  -- show the newest timestamp seen per key
  HELP               (alias: h)  -- show this message
  EXIT               (alias: e)  -- leave the console";

#[derive(Debug, PartialEq, Eq)]
pub enum ConsoleCommand {
    Get { key: String },
    Put { key: String, value: String },
    Watermarks,
    Help,
    Exit,
}

impl ConsoleCommand {
    /// Parses one line of input.
    ///
    /// The value of a PUT is the rest of the line after the key, so it may
    /// contain spaces.
    pub fn parse(line: &str) -> Result<Self> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Err(anyhow!("empty command"));
        }

        let (word, rest) = match trimmed.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (trimmed, ""),
        };

        let command = match word.to_uppercase().as_str() {
            "G" | "GET" => "GET",
            "P" | "PUT" => "PUT",
            "W" | "WATERMARKS" => "WATERMARKS",
            "H" | "HELP" => "HELP",
            "E" | "EXIT" => "EXIT",
            _ => {
                return Err(anyhow!(
                    "invalid command. Try: GET/g <key>, PUT/p <key> <value>, WATERMARKS/w, HELP/h, EXIT/e"
                ));
            }
        };

        match (command, rest.is_empty()) {
            ("WATERMARKS", true) => Ok(ConsoleCommand::Watermarks),
            ("HELP", true) => Ok(ConsoleCommand::Help),
            ("EXIT", true) => Ok(ConsoleCommand::Exit),
            ("GET", false) if !rest.contains(char::is_whitespace) => Ok(ConsoleCommand::Get {
                key: rest.to_string(),
            }),
            ("GET", _) => Err(anyhow!("GET requires exactly one argument: GET <key>")),
            ("PUT", false) => match rest.split_once(char::is_whitespace) {
                Some((key, value)) if !value.trim().is_empty() => Ok(ConsoleCommand::Put {
                    key: key.to_string(),
                    value: value.trim().to_string(),
                }),
                _ => Err(anyhow!("PUT requires a key and a value: PUT <key> <value>")),
            },
            ("PUT", true) => Err(anyhow!("PUT requires a key and a value: PUT <key> <value>")),
            (other, false) => Err(anyhow!("{other} takes no arguments")),
            _ => Err(anyhow!("invalid command")),
        }
    }
}

/// Runs the console until EXIT or end of input.
pub async fn run<R, W>(session: &mut ClientSession, input: &mut R, output: &mut W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    write_line(output, "Connected. Type HELP (or h) for commands.").await?;
    let mut line = String::new();
    loop {
        line.clear();
        if input.read_line(&mut line).await? == 0 {
            break;
        }
        if line.trim().is_empty() {
            continue;
        }

        let command = match ConsoleCommand::parse(&line) {
            Ok(command) => command,
            Err(err) => {
                write_line(output, &format!("ERROR: {err}")).await?;
                continue;
            }
        };

        if command == ConsoleCommand::Exit {
            break;
        }
        let reply = execute(session, command).await;
        write_line(output, &reply).await?;
    }
    Ok(())
}

async fn execute(session: &mut ClientSession, command: ConsoleCommand) -> String {
    match command {
        ConsoleCommand::Get { key } => match session.get(&key).await {
            Ok(outcome) => {
                let value = outcome.value.as_deref().unwrap_or("<none>");
                format!(
                    "GET_OK key:{key} value:{value} from {} (my timestamp {}, server timestamp {})",
                    outcome.replica,
                    describe(outcome.watermark),
                    describe(outcome.timestamp),
                )
            }
            Err(err) => describe_error(&err),
        },
        ConsoleCommand::Put { key, value } => match session.put(&key, &value).await {
            Ok(outcome) => format!(
                "PUT_OK key:{key} value:{value} timestamp:{} via {}",
                outcome.timestamp, outcome.replica
            ),
            Err(err) => describe_error(&err),
        },
        ConsoleCommand::Watermarks => {
            let mut entries: Vec<_> = session.watermarks().iter().collect();
            if entries.is_empty() {
                return "no watermarks yet".to_string();
            }
            entries.sort();
            entries
                .into_iter()
                .map(|(key, timestamp)| format!("  {key} >= {timestamp}"))
                .collect::<Vec<_>>()
                .join("\n")
        }
        ConsoleCommand::Help => HELP.to_string(),
        ConsoleCommand::Exit => String::new(),
    }
}

fn describe(timestamp: Option<u64>) -> String {
    timestamp.map_or_else(|| "-".to_string(), |timestamp| timestamp.to_string())
}

fn describe_error(err: &ClientError) -> String {
    if err.is_stale() {
        format!("TRY_OTHER_SERVER_OR_LATER: {err}")
    } else {
        format!("ERROR: {err}")
    }
}

async fn write_line<W>(output: &mut W, line: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    output.write_all(line.as_bytes()).await?;
    output.write_all(b"\n").await?;
    output.flush().await
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use tokio::io::BufReader;

    use super::*;
    use crate::config::ClientConfig;

    #[test]
    fn test_case_insensitive_commands() {
        assert!(matches!(ConsoleCommand::parse("exit"), Ok(ConsoleCommand::Exit)));
        assert!(matches!(ConsoleCommand::parse("ExIt"), Ok(ConsoleCommand::Exit)));
        assert!(matches!(ConsoleCommand::parse("HELP"), Ok(ConsoleCommand::Help)));
        assert!(matches!(
            ConsoleCommand::parse("watermarks"),
            Ok(ConsoleCommand::Watermarks)
        ));
        assert!(matches!(
            ConsoleCommand::parse("GeT mykey"),
            Ok(ConsoleCommand::Get { key }) if key == "mykey"
        ));
    }

    #[test]
    fn test_aliases() {
        assert!(matches!(ConsoleCommand::parse("e"), Ok(ConsoleCommand::Exit)));
        assert!(matches!(ConsoleCommand::parse("h"), Ok(ConsoleCommand::Help)));
        assert!(matches!(ConsoleCommand::parse("W"), Ok(ConsoleCommand::Watermarks)));
        assert!(matches!(
            ConsoleCommand::parse("g foo"),
            Ok(ConsoleCommand::Get { key }) if key == "foo"
        ));
        assert!(matches!(
            ConsoleCommand::parse("P KEY VAL"),
            Ok(ConsoleCommand::Put { key, value }) if key == "KEY" && value == "VAL"
        ));
    }

    #[test]
    fn test_put_value_keeps_spaces() {
        assert_eq!(
            ConsoleCommand::parse("put greeting hello   there ").unwrap(),
            ConsoleCommand::Put {
                key: "greeting".into(),
                value: "hello   there".into()
            }
        );
    }

    #[test]
    fn test_invalid_commands() {
        assert!(ConsoleCommand::parse("").is_err());
        assert!(ConsoleCommand::parse("   ").is_err());
        assert!(ConsoleCommand::parse("INVALID").is_err());
        assert!(ConsoleCommand::parse("GET").is_err());
        assert!(ConsoleCommand::parse("GET a b").is_err());
        assert!(ConsoleCommand::parse("PUT key").is_err());
        assert!(ConsoleCommand::parse("PUT").is_err());
        assert!(ConsoleCommand::parse("HELP me").is_err());
    }

    #[tokio::test]
    async fn console_reports_unreachable_replicas_and_exits() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let dead: SocketAddr = listener.local_addr().unwrap();
        drop(listener);

        let mut config = ClientConfig::new(vec![dead]);
        config.max_attempts = 1;
        let mut session = ClientSession::new(config).unwrap();

        let mut input = BufReader::new(&b"bogus\nw\nget k\nexit\nget never\n"[..]);
        let mut output = Vec::new();
        run(&mut session, &mut input, &mut output).await.unwrap();

        let printed = String::from_utf8(output).unwrap();
        let lines: Vec<&str> = printed.lines().collect();
        assert_eq!(lines[0], "Connected. Type HELP (or h) for commands.");
        assert!(lines[1].starts_with("ERROR: invalid command"));
        assert_eq!(lines[2], "no watermarks yet");
        assert!(lines[3].starts_with(&format!("ERROR: replica {dead} unreachable")));
        assert_eq!(lines.len(), 4);
    }
}
