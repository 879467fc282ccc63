mod args;
mod logging;
mod op;
mod ops;
mod state;

use args::Args;
use clap::{Parser, Subcommand};
use common::vault::CancelToken;
use op::Op;
use ops::{Add, Cat, Import, Init, Ls, Mkdir, Pull, Push, Rename, Rm, Update, Version};

command_enum! {
    (Init, Init),
    (Add, Add),
    (Mkdir, Mkdir),
    (Ls, Ls),
    (Cat, Cat),
    (Rename, Rename),
    (Update, Update),
    (Rm, Rm),
    (Pull, Pull),
    (Push, Push),
    (Import, Import),
    (Version, Version),
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // an uninitialized directory still gets default logging
    let config = state::AppState::load(args.config_path.clone())
        .map(|state| state.config)
        .unwrap_or_default();
    let _guards = logging::init_logging(&config.log_level, config.log_dir.as_deref());

    let (cancel_handle, cancel) = CancelToken::pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, cancelling after the current step");
            cancel_handle.cancel();
        }
    });

    let ctx = op::OpContext::new(args.config_path, cancel);

    match args.command.execute(&ctx).await {
        Ok(output) => {
            println!("{}", output);
            std::process::exit(0);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
