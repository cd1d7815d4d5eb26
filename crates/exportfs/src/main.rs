use {
    clap::Parser,
    log::LevelFilter,
    ninep::{io_err, res, srv::srv_async},
    std::path::PathBuf,
    tokio::fs,
};

mod local;
use crate::local::LocalFs;

/// Serve a local directory tree over 9P2000.
#[derive(Debug, clap::Parser)]
struct Cli {
    /// Directory to export as the root of the served tree
    fsroot: PathBuf,

    /// Listen address
    #[arg(short = 'l', long = "listen", default_value = "0.0.0.0:564")]
    listen: String,

    /// Enable verbose debug logging
    #[arg(short = 'd', long = "debug")]
    debug: bool,
}

async fn exportfs_main(cli: Cli) -> ninep::Result<i32> {
    let root = fs::canonicalize(&cli.fsroot).await?;
    if !fs::metadata(&root).await?.is_dir() {
        return res!(io_err!(InvalidInput, "export root must be a directory"));
    }

    println!("[*] Exporting: {}", root.display());
    println!("[*] Ready to accept clients: {}", cli.listen);
    srv_async(LocalFs::new(root), &cli.listen).await.and(Ok(0))
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(if cli.debug {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        })
        .parse_default_env()
        .init();

    let exit_code = exportfs_main(cli).await.unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        1
    });

    std::process::exit(exit_code);
}
