use std::net::{SocketAddr, ToSocketAddrs};

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use rates_core::Command;

/// Rates Ctl - управление запущенным rates-watcher по TCP.
///
/// Одна команда на запуск: отправляем строку, печатаем ответ,
/// при `ERR` выходим с ненулевым кодом.
#[derive(Parser, Debug, Clone)]
#[command(name = "rates-ctl", version, about)]
pub(crate) struct Args {
    /// TCP адрес rates-watcher, например 127.0.0.1:7070
    #[arg(long, env = "RATES_CONTROL_ADDR", default_value = "127.0.0.1:7070")]
    pub(crate) server: String,

    #[command(subcommand)]
    pub(crate) action: Action,
}

#[derive(Subcommand, Debug, Clone)]
pub(crate) enum Action {
    /// Запустить проверку курсов вне расписания
    Check {
        /// Дождаться результата проверки
        #[arg(long)]
        wait: bool,
    },
    /// Состояние планировщика и счётчики циклов
    Status,
    /// Последнее значение котировки по id (USD:blue) или названию (blue)
    Get { query: String },
    /// Все сохранённые котировки
    List,
}

impl Args {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.server.trim().is_empty() {
            bail!("--server is empty");
        }
        if !self.server.contains(':') {
            bail!("--server must look like HOST:PORT (got: {})", self.server);
        }
        Ok(())
    }

    pub(crate) fn command(&self) -> Command {
        match &self.action {
            Action::Check { wait } => Command::Check { wait: *wait },
            Action::Status => Command::Status,
            Action::Get { query } => Command::Get {
                query: query.clone(),
            },
            Action::List => Command::List,
        }
    }

    pub(crate) fn server_socket_addr(&self) -> std::io::Result<SocketAddr> {
        // Берём первый результат резолвинга
        self.server.to_socket_addrs()?.next().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses resolved")
        })
    }
}
