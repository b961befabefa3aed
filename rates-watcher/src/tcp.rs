use anyhow::Context;
use chrono::SecondsFormat;
use log::{debug, info, warn};
use rates_core::protocol::{Command, Reply, parse_command};
use rates_core::store::{StateStore, find};
use rates_core::{ManualCheck, SchedulerHandle, StoredQuote, TriggerOutcome};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, atomic::AtomicBool, atomic::Ordering};
use std::thread;
use std::time::Duration;

const TCP_READ_TIMEOUT_S: u64 = 5;
const TCP_WRITE_TIMEOUT_S: u64 = 5;

/// Самая длинная команда - `GET {query}`; всё длиннее отклоняется.
const MAX_COMMAND_LEN: u64 = 256;

/// Всё, что нужно обработчику команд.
pub(crate) struct Control {
    scheduler: SchedulerHandle,
    store: Arc<dyn StateStore>,
    /// сколько ждать цикл в `CHECK WAIT`
    wait_timeout: Duration,
}

impl Control {
    pub(crate) fn new(
        scheduler: SchedulerHandle,
        store: Arc<dyn StateStore>,
        wait_timeout: Duration,
    ) -> Self {
        Self {
            scheduler,
            store,
            wait_timeout,
        }
    }

    fn execute(&self, cmd: Command) -> Reply {
        match cmd {
            Command::Check { wait: false } => match self.scheduler.trigger_now() {
                TriggerOutcome::Started => Reply::ok("started"),
                TriggerOutcome::AlreadyRunning => Reply::err("already running"),
                TriggerOutcome::Stopped => Reply::err("stopped"),
            },
            Command::Check { wait: true } => match self.scheduler.trigger_and_wait(self.wait_timeout) {
                ManualCheck::Finished(Ok(report)) => Reply::ok(report.to_string()),
                ManualCheck::Finished(Err(e)) => Reply::err(e.to_string()),
                ManualCheck::AlreadyRunning => Reply::err("already running"),
                ManualCheck::Stopped => Reply::err("stopped"),
                ManualCheck::TimedOut => Reply::err("timed out waiting for check"),
            },
            Command::Status => Reply::ok(self.scheduler.stats().to_string()),
            Command::Get { query } => match find(self.store.as_ref(), &query) {
                Ok(Some(q)) => Reply::ok(describe_quote(&q)),
                Ok(None) => Reply::err(format!("not found: {query}")),
                Err(e) => Reply::err(e.to_string()),
            },
            Command::List => match self.store.list() {
                Ok(quotes) => Reply::ok(
                    quotes
                        .iter()
                        .map(|q| format!("{}={}/{}", q.id, q.buy, q.sell))
                        .collect::<Vec<_>>()
                        .join(" "),
                ),
                Err(e) => Reply::err(e.to_string()),
            },
        }
    }
}

fn describe_quote(q: &StoredQuote) -> String {
    format!(
        "{} \"{}\" buy={} sell={} updated={} notified={}",
        q.id,
        q.display_name,
        q.buy,
        q.sell,
        q.last_updated_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        q.notified
    )
}

// accept loop + чтение команд по TCP
pub(crate) fn run_control_listener(
    addr: SocketAddr,
    control: Arc<Control>,
    shutdown: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let listener =
        TcpListener::bind(addr).with_context(|| format!("bind control listener {}", addr))?;
    listener
        .set_nonblocking(true)
        .context("listener.set_nonblocking(true)")?;
    info!("control listener on {}", addr);

    let mut conn_handles = Vec::new();

    loop {
        reap_finished(&mut conn_handles);

        if shutdown.load(Ordering::Relaxed) {
            info!("shutting down control listener");
            break;
        }

        match listener.accept() {
            Ok((stream, peer)) => {
                stream
                    .set_nonblocking(false)
                    .context("stream.set_nonblocking(false)")?;

                stream.set_nodelay(true).ok();
                stream
                    .set_read_timeout(Some(Duration::from_secs(TCP_READ_TIMEOUT_S)))
                    .ok();
                stream
                    .set_write_timeout(Some(Duration::from_secs(TCP_WRITE_TIMEOUT_S)))
                    .ok();

                debug!("control connection from {peer}");
                let control = control.clone();
                let h = thread::spawn(move || {
                    if let Err(e) = handle_conn(stream, &control) {
                        warn!("handle_conn error: {e}");
                    }
                });
                conn_handles.push(h);
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                // нет новых соединений прямо сейчас
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                warn!("accept error: {e}");
                thread::sleep(Duration::from_millis(50));
            }
        }
    }

    for h in conn_handles {
        if let Err(panic) = h.join() {
            warn!("connection thread panicked: {:?}", panic);
        }
    }

    Ok(())
}

fn reap_finished(handles: &mut Vec<thread::JoinHandle<()>>) {
    let mut i = 0;
    while i < handles.len() {
        if handles[i].is_finished() {
            let h = handles.swap_remove(i);
            if let Err(panic) = h.join() {
                warn!("connection thread panicked: {:?}", panic);
            }
        } else {
            i += 1;
        }
    }
}

fn extract_command(stream: &mut TcpStream) -> anyhow::Result<Command> {
    let mut line = String::new();

    {
        // без перевода строки в пределах лимита read_line упрётся в take()
        let mut reader = BufReader::new(stream.take(MAX_COMMAND_LEN));
        let n = reader.read_line(&mut line)?;
        if n == 0 {
            anyhow::bail!("client closed connection");
        }
        if !line.ends_with('\n') && n as u64 >= MAX_COMMAND_LEN {
            anyhow::bail!("command longer than {MAX_COMMAND_LEN} bytes");
        }
    }

    Ok(parse_command(&line)?)
}

fn handle_conn(mut stream: TcpStream, control: &Control) -> anyhow::Result<()> {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "?".to_string());

    let reply = match extract_command(&mut stream) {
        Ok(cmd) => {
            let reply = control.execute(cmd.clone());
            if reply.is_ok() {
                debug!("{peer}: {cmd:?} -> ok");
            } else {
                info!("{peer}: {cmd:?} -> {}", reply.format());
            }
            reply
        }
        Err(e) => {
            debug!("{peer}: rejected command: {e}");
            Reply::err(e.to_string())
        }
    };

    let line = format!("{}\n", reply.format());
    // клиент мог закрыть соединение, не дождавшись ответа
    if let Err(e) = stream.write_all(line.as_bytes()) {
        debug!("reply not written: {e}");
        return Ok(());
    }
    stream.flush()?;
    stream.shutdown(std::net::Shutdown::Both).ok();
    Ok(())
}
