//! CLI command implementations

use std::path::{Path, PathBuf};

use clap::Subcommand;
use surge_core::torrent::{
    BencodeTorrentParser, Downloader, TorrentLayout, TorrentMetadata, TorrentParser,
};
use surge_core::{Result, SurgeConfig};

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Download a torrent from its swarm
    Download {
        /// Path to the .torrent file
        torrent: PathBuf,
        /// Directory the finished files are written to
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },
    /// Show what a .torrent file contains
    Info {
        /// Path to the .torrent file
        torrent: PathBuf,
    },
}

/// Handle the CLI command
///
/// # Errors
/// Returns appropriate error based on the command that fails
pub async fn handle_command(command: Commands) -> Result<()> {
    match command {
        Commands::Download { torrent, output } => download_torrent(&torrent, &output).await,
        Commands::Info { torrent } => show_info(&torrent).await,
    }
}

async fn load_metadata(path: &Path) -> Result<TorrentMetadata> {
    let metadata = BencodeTorrentParser::new().parse_torrent_file(path).await?;
    Ok(metadata)
}

/// Download a torrent into `output`
///
/// # Errors
/// - `SurgeError::Torrent` - Invalid torrent, no peers, or download could not finish
pub async fn download_torrent(path: &Path, output: &Path) -> Result<()> {
    let metadata = load_metadata(path).await?;
    let downloader = Downloader::new(metadata, SurgeConfig::from_env())?;

    println!(
        "Downloading {} ({})",
        downloader.metadata().name,
        format_bytes(downloader.metadata().total_length)
    );
    let report = downloader.download(output).await?;

    println!(
        "Finished: {} written from {} peers",
        format_bytes(report.total_bytes),
        report.peers_used
    );
    for file in &report.files {
        println!("  {}", file.display());
    }

    Ok(())
}

/// Print a summary of a .torrent file
///
/// # Errors
/// - `SurgeError::Torrent` - File unreadable or not a valid torrent
pub async fn show_info(path: &Path) -> Result<()> {
    let metadata = load_metadata(path).await?;
    let layout = TorrentLayout::from_metadata(&metadata)?;
    print!("{}", format_info(&metadata, &layout));
    Ok(())
}

fn format_info(metadata: &TorrentMetadata, layout: &TorrentLayout) -> String {
    let mut out = String::new();
    out.push_str(&format!("Name:       {}\n", metadata.name));
    out.push_str(&format!("Info hash:  {}\n", metadata.info_hash));
    out.push_str(&format!(
        "Size:       {}\n",
        format_bytes(metadata.total_length)
    ));
    out.push_str(&format!(
        "Pieces:     {} x {} ({} blocks)\n",
        layout.piece_count(),
        format_bytes(u64::from(layout.piece_length())),
        layout.total_blocks()
    ));

    if metadata.is_multi_file() {
        out.push_str(&format!("Files ({}):\n", metadata.files.len()));
    } else {
        out.push_str("File:\n");
    }
    for file in &metadata.files {
        out.push_str(&format!(
            "  {:>10}  {}\n",
            format_bytes(file.length),
            file.path.join("/")
        ));
    }

    out.push_str("Trackers:\n");
    for url in &metadata.announce_urls {
        out.push_str(&format!("  {url}\n"));
    }
    out
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}
