//! The line-oriented TCP protocol: one task per connection against a
//! single shared, thread-safe `Engine`. The daemon holds no locks of its
//! own beyond what the engine already provides.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use casky::error::Error;
use casky::storage::engine::Engine;
use log::{info, warn};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

/// How long the server waits for in-flight connections to drain once
/// shutdown has been requested.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Accepts connections until `shutdown_rx` reports `true`, then stops
/// accepting and waits up to [`SHUTDOWN_GRACE`] for active connections to
/// finish on their own before returning.
pub async fn serve(listener: TcpListener, engine: Arc<Engine>, mut shutdown_rx: watch::Receiver<bool>) {
    let active = Arc::new(AtomicUsize::new(0));

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let engine = Arc::clone(&engine);
                        let active = Arc::clone(&active);
                        active.fetch_add(1, Ordering::SeqCst);
                        tokio::spawn(async move {
                            if let Err(err) = handle_connection(stream, &engine).await {
                                warn!("connection {} ended with an io error: {}", peer, err);
                            }
                            active.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                    Err(err) => warn!("accept failed: {}", err),
                }
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }

    let remaining = active.load(Ordering::SeqCst);
    if remaining > 0 {
        info!("waiting up to {:?} for {} active connection(s)", SHUTDOWN_GRACE, remaining);
    }
    let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE;
    while active.load(Ordering::SeqCst) > 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

async fn handle_connection(stream: TcpStream, engine: &Arc<Engine>) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    writer.write_all(banner().as_bytes()).await?;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }

        match dispatch(engine, line) {
            Outcome::Reply(body) => {
                writer.write_all(body.as_bytes()).await?;
                writer.write_all(b"\n").await?;
            }
            Outcome::CloseWith(body) => {
                writer.write_all(body.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                break;
            }
        }
    }
    Ok(())
}

fn banner() -> String {
    if casky::storage::engine::THREAD_SAFE {
        format!("CASKY {} READY (thread-safe)\n", casky::version())
    } else {
        format!("CASKY {} READY\n", casky::version())
    }
}

enum Outcome {
    Reply(String),
    CloseWith(String),
}

/// Parses and executes one line of the protocol against `engine`.
fn dispatch(engine: &Engine, line: &str) -> Outcome {
    let line = line.trim();
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim_start()),
        None => (line, ""),
    };

    match verb.to_ascii_uppercase().as_str() {
        "PUT" => match rest.split_once(char::is_whitespace) {
            Some((key, value)) if !key.is_empty() => {
                match engine.put(key.as_bytes(), value.as_bytes(), 0) {
                    Ok(()) => Outcome::Reply("OK".to_string()),
                    Err(err) => Outcome::Reply(format!("ERROR {}", err.code())),
                }
            }
            _ => Outcome::Reply("ERROR usage: PUT <key> <value>".to_string()),
        },
        "GET" => {
            if rest.is_empty() || rest.split_whitespace().count() != 1 {
                return Outcome::Reply("ERROR usage: GET <key>".to_string());
            }
            match engine.get(rest.as_bytes()) {
                Ok(Some(value)) => {
                    Outcome::Reply(format!("VALUE {}", String::from_utf8_lossy(&value)))
                }
                Ok(None) => Outcome::Reply("NOT_FOUND".to_string()),
                Err(err) => Outcome::Reply(format!("ERROR {}", err.code())),
            }
        }
        "DEL" => {
            if rest.is_empty() || rest.split_whitespace().count() != 1 {
                return Outcome::Reply("ERROR usage: DEL <key>".to_string());
            }
            match engine.delete(rest.as_bytes()) {
                Ok(()) => Outcome::Reply("OK".to_string()),
                Err(Error::KeyNotFound) => Outcome::Reply("NOT_FOUND".to_string()),
                Err(err) => Outcome::Reply(format!("ERROR {}", err.code())),
            }
        }
        "COMPACT" => match engine.compact() {
            Ok(()) => Outcome::Reply("OK".to_string()),
            Err(err) => Outcome::Reply(format!("ERROR {}", err.code())),
        },
        "STATS" => match engine.stats() {
            Ok(snap) => Outcome::Reply(format!(
                "STATS\n total keys={}\n puts={}\n gets={}\n deletes={}\n memory_bytes={}",
                snap.total_keys, snap.num_puts, snap.num_gets, snap.num_deletes, snap.memory_bytes
            )),
            Err(err) => Outcome::Reply(format!("ERROR {}", err.code())),
        },
        "VER" => {
            if casky::storage::engine::THREAD_SAFE {
                Outcome::Reply(format!("{} (thread-safe)", casky::version()))
            } else {
                Outcome::Reply(casky::version().to_string())
            }
        }
        "QUIT" => Outcome::CloseWith("BYE".to_string()),
        _ => Outcome::Reply("ERROR unknown command".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use casky::storage::engine::EngineConfig;

    fn engine() -> (tempfile::TempDir, Engine) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.log");
        let engine = Engine::open_with_lock(&path, EngineConfig::default(), false).unwrap().into_engine();
        (dir, engine)
    }

    fn reply(outcome: Outcome) -> String {
        match outcome {
            Outcome::Reply(s) | Outcome::CloseWith(s) => s,
        }
    }

    #[test]
    fn full_command_sequence_matches_the_protocol_table() {
        let (_dir, engine) = engine();
        assert_eq!(reply(dispatch(&engine, "PUT foo bar")), "OK");
        assert_eq!(reply(dispatch(&engine, "GET foo")), "VALUE bar");
        assert_eq!(reply(dispatch(&engine, "GET unknown")), "NOT_FOUND");
        assert_eq!(reply(dispatch(&engine, "DEL foo")), "OK");
        assert_eq!(reply(dispatch(&engine, "DEL foo")), "NOT_FOUND");
        assert_eq!(reply(dispatch(&engine, "FOO bar")), "ERROR unknown command");
        assert_eq!(reply(dispatch(&engine, "PUT keyonly")), "ERROR usage: PUT <key> <value>");
        assert!(matches!(dispatch(&engine, "QUIT"), Outcome::CloseWith(s) if s == "BYE"));
    }

    #[test]
    fn commands_are_case_insensitive() {
        let (_dir, engine) = engine();
        assert_eq!(reply(dispatch(&engine, "put a b")), "OK");
        assert_eq!(reply(dispatch(&engine, "get a")), "VALUE b");
        assert_eq!(reply(dispatch(&engine, "ver")), reply(dispatch(&engine, "VER")));
    }

    #[test]
    fn put_value_may_contain_embedded_spaces() {
        let (_dir, engine) = engine();
        assert_eq!(reply(dispatch(&engine, "PUT greeting hello there world")), "OK");
        assert_eq!(reply(dispatch(&engine, "GET greeting")), "VALUE hello there world");
    }

    #[test]
    fn get_and_del_reject_multi_token_arguments() {
        let (_dir, engine) = engine();
        assert_eq!(reply(dispatch(&engine, "GET a b")), "ERROR usage: GET <key>");
        assert_eq!(reply(dispatch(&engine, "DEL a b")), "ERROR usage: DEL <key>");
    }

    #[test]
    fn stats_reports_a_multi_line_body() {
        let (_dir, engine) = engine();
        dispatch(&engine, "PUT a b");
        let body = reply(dispatch(&engine, "STATS"));
        assert!(body.starts_with("STATS\n"));
        assert!(body.contains("total keys=1"));
        assert!(body.contains("puts=1"));
    }
}
