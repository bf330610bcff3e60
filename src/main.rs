mod cli;
mod command;
mod config;
mod daemon;
mod error;
mod event;
mod event_loop;
mod hotplug;
mod input;
mod ipc;
mod logging;
mod models;
mod output;
mod session;
#[cfg(test)]
mod testing;
mod transform;

fn main() -> anyhow::Result<()> {
    logging::init();
    cli::run()
}
