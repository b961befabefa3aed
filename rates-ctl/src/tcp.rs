use anyhow::Context;
use rates_core::protocol::{Command, Reply, format_command, parse_reply};
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

const TCP_CONNECT_TIMEOUT_S: u64 = 5;
const TCP_WRITE_TIMEOUT_S: u64 = 5;
const TCP_READ_TIMEOUT_S: u64 = 5;
/// `CHECK WAIT` держит соединение, пока идёт цикл
const TCP_WAIT_READ_TIMEOUT_S: u64 = 90;

/// Отправляет одну команду и возвращает разобранный ответ.
pub(crate) fn send_command(server: SocketAddr, cmd: &Command) -> anyhow::Result<Reply> {
    let mut stream =
        TcpStream::connect_timeout(&server, Duration::from_secs(TCP_CONNECT_TIMEOUT_S))
            .with_context(|| format!("connect to {server}"))?;

    let read_timeout = match cmd {
        Command::Check { wait: true } => TCP_WAIT_READ_TIMEOUT_S,
        _ => TCP_READ_TIMEOUT_S,
    };

    stream.set_nodelay(true).ok();
    stream
        .set_read_timeout(Some(Duration::from_secs(read_timeout)))
        .ok();
    stream
        .set_write_timeout(Some(Duration::from_secs(TCP_WRITE_TIMEOUT_S)))
        .ok();

    let line = format!("{}\n", format_command(cmd));
    stream.write_all(line.as_bytes())?;
    stream.flush()?;

    let mut reader = BufReader::new(&mut stream);
    let mut resp = String::new();
    let n = reader
        .read_line(&mut resp)
        .context("read reply from server")?;

    if n == 0 {
        anyhow::bail!("server closed connection without response");
    }

    Ok(parse_reply(&resp)?)
}
