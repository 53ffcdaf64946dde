use clap::Parser;
use swarmscan::app::{self, Args};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = app::run(args).await {
        eprintln!("swarmscan: {e}");
        std::process::exit(1);
    }
}
