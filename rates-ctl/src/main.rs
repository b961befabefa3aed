//! Точка входа `rates-ctl`.
//!
//! Отправляет одну команду управления (`CHECK`, `STATUS`, `GET`, `LIST`)
//! в rates-watcher и печатает ответ.

mod cli;
mod tcp;

use clap::Parser;
use log::debug;
use rates_core::{Command, Reply};

fn main() -> anyhow::Result<()> {
    // Логи через RUST_LOG=debug
    env_logger::init();

    let args = cli::Args::parse();
    args.validate()?;

    let cmd = args.command();
    let server = args.server_socket_addr()?;
    debug!("sending {cmd:?} to {server}");

    match tcp::send_command(server, &cmd)? {
        Reply::Ok(body) => {
            print_body(&cmd, &body);
            Ok(())
        }
        Reply::Err(body) => anyhow::bail!("server error: {body}"),
    }
}

fn print_body(cmd: &Command, body: &str) {
    match cmd {
        // LIST: по котировке на строку
        Command::List => {
            for entry in body.split_whitespace() {
                println!("{entry}");
            }
        }
        _ => println!("{body}"),
    }
}
