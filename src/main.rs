mod actions;
mod cli;
mod config;
mod content;
mod frames;
mod gestures;
mod ipc;
mod logging;
mod scripts;
mod state;
mod tracker;

fn main() -> anyhow::Result<()> {
    logging::init();
    cli::run()
}
