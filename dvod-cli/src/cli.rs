use clap::Parser;
use std::path::PathBuf;

/// Define CLI arguments
#[derive(Parser)]
#[command(
    version,
    about = "Download DLive past broadcasts",
    long_about = "Downloads DLive past broadcasts (VODs).\n\
                  \n\
                  Resolves a VOD URL to its available quality variants, then\n\
                  fetches and reassembles the HLS segments of the chosen\n\
                  variant into a single video file."
)]
pub struct CliArgs {
    /// DLive VOD URL or owner+id permlink (a channel name with --recent)
    #[arg(required = true)]
    pub target: String,

    /// Only list available qualities without downloading
    #[arg(short, long)]
    pub list: bool,

    /// List the channel's recent past broadcasts instead of downloading
    #[arg(long, conflicts_with = "list")]
    pub recent: bool,

    /// How many recent broadcasts to list
    #[arg(long, default_value = "15", requires = "recent")]
    pub recent_count: u32,

    /// Quality index to download (1 = first listed)
    #[arg(short, long, default_value = "1")]
    pub quality: u32,

    /// Directory to save the video
    #[arg(short, long, default_value = ".")]
    pub out_dir: PathBuf,

    /// Optional custom file name (without directories)
    #[arg(short, long)]
    pub filename: Option<String>,

    /// Concurrent segment prefetches (1 disables prefetching)
    #[arg(long, default_value = "3")]
    pub concurrency: usize,

    /// Retry attempts per segment download
    #[arg(long, default_value = "5")]
    pub retries: u32,

    /// Timeout for individual segment downloads in seconds
    #[arg(long, default_value = "30")]
    pub segment_timeout: u64,

    /// Enable detailed debug logging
    #[arg(short, long)]
    pub verbose: bool,
}
