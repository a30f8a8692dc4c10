use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use clap::Parser;
use finetune::{run_finetune, FinetuneArgs, FinetuneError};

fn main() {
    if let Err(err) = run() {
        eprintln!("fine-tuning failed: {}", err);
        std::process::exit(1);
    }
}

fn run() -> Result<(), FinetuneError> {
    let args = FinetuneArgs::parse();

    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let handler_flag = shutdown_flag.clone();
    ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::Relaxed);
    })
    .map_err(|err| FinetuneError::runtime(format!("failed to install signal handler: {err}")))?;

    run_finetune(&args, || shutdown_flag.load(Ordering::Relaxed))?;
    Ok(())
}
