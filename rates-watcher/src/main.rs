//! Точка входа `rates-watcher`.
//!
//! Жизненный цикл:
//! - парсинг CLI/env и проверка настроек
//! - открытие хранилища состояния (JSON-файл или память)
//! - сборка конвейера: HTTP-источник, каналы доставки (лог + Telegram)
//! - запуск планировщика в отдельном потоке
//! - TCP-listener команд управления в главном потоке
//! - корректная остановка по `Ctrl+C`: идущий цикл доводится до конца

mod cli;
mod config;
mod http_source;
mod tcp;
mod telegram;

#[cfg(test)]
mod test_http;

use std::sync::{Arc, atomic::AtomicBool, atomic::Ordering};

use anyhow::Context;
use clap::Parser;
use log::info;
use rates_core::{
    Dispatcher, JsonFileStore, LogChannel, MemoryStore, Pipeline, Scheduler, SchedulerConfig,
    StateStore,
};

use crate::http_source::HttpQuoteSource;
use crate::telegram::TelegramChannel;

fn main() -> anyhow::Result<()> {
    // по умолчанию info, переопределяется через RUST_LOG
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = cli::Args::parse();
    args.validate()?;

    let shutdown = Arc::new(AtomicBool::new(false));

    // Ctrl+C => ставим shutdown=true
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            shutdown.store(true, Ordering::Relaxed);
            info!("shutting down...");
        })
        .context("install Ctrl+C handler")?;
    }

    let store = open_store(&args)?;
    let dispatcher = build_dispatcher(&args)?;
    let source = HttpQuoteSource::new(&args.source_url, args.fetch_timeout())
        .context("build http client for quote source")?;

    info!(
        "Starting rates-watcher: source={}, interval={}s, channels={}",
        args.source_url,
        args.interval_secs,
        dispatcher.channel_names().collect::<Vec<_>>().join(",")
    );

    let pipeline = Pipeline::new(Box::new(source), store.clone(), dispatcher);
    let scheduler = Scheduler::spawn(
        SchedulerConfig {
            stream: config::STREAM_NAME.to_string(),
            interval: args.interval(),
            run_on_start: !args.no_initial_check,
        },
        pipeline,
        shutdown.clone(),
    )
    .context("spawn scheduler thread")?;

    let control = Arc::new(tcp::Control::new(
        scheduler.handle(),
        store,
        config::MANUAL_CHECK_TIMEOUT,
    ));
    let served = tcp::run_control_listener(args.control_bind, control, shutdown.clone());

    // listener мог упасть на bind: планировщик всё равно останавливаем
    shutdown.store(true, Ordering::Relaxed);
    scheduler.stop();
    info!("rates-watcher stopped");

    served
}

fn open_store(args: &cli::Args) -> anyhow::Result<Arc<dyn StateStore>> {
    if args.in_memory {
        info!("state kept in memory only");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let store = JsonFileStore::open(&args.state_file)
        .with_context(|| format!("open state file {}", args.state_file.display()))?;
    Ok(Arc::new(store))
}

fn build_dispatcher(args: &cli::Args) -> anyhow::Result<Dispatcher> {
    let mut dispatcher = Dispatcher::new();
    dispatcher.register(Box::new(LogChannel::default()))?;

    if let Some((token, chat_id)) = args.telegram() {
        let channel = TelegramChannel::new(
            &args.telegram_api_base,
            token,
            chat_id,
            args.notify_timeout(),
        )?;
        dispatcher.register(Box::new(channel))?;
    }

    Ok(dispatcher)
}
