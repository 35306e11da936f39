use clap::Parser;

use banterbot::cli::{Cli, Command};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Some(Command::HashId { id }) = &cli.command {
        println!("{}", banterbot::auth::hash_subject(id));
        return;
    }

    if let Err(e) = banterbot::cli::run(cli).await {
        eprintln!("banter: {}", e);
        std::process::exit(1);
    }
}
