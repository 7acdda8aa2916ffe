use clap::{Parser, Subcommand};
use scan_cache::ScanId;
use std::path::PathBuf;

/// Define CLI arguments
#[derive(Parser)]
#[command(
    version,
    about = "Slab scan content cache tool",
    long_about = "Inspect and fill the local cache of slab scan content bundles.\n\
                  \n\
                  Bundles are stored as '<root>/Cached Data/<site>/<slab>/<scan>/<file>'.\n\
                  Scan identifiers are written as 'site/slab/scan', e.g. '1/2/3'."
)]
pub struct CliArgs {
    /// Application data root holding the 'Cached Data' directory
    #[arg(
        short,
        long,
        global = true,
        help = "Application data root (default: system temp dir/scan-cache)"
    )]
    pub root: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true, help = "Enable detailed debug logging")]
    pub verbose: bool,

    /// Fragment size with optional unit (B, KB, MB)
    #[arg(
        long,
        global = true,
        default_value = "1MB",
        help = "Size of the fragments written between progress updates. Examples: \"1MB\", \"256KB\""
    )]
    pub fragment_size: String,

    /// Overall timeout in seconds
    #[arg(
        long,
        global = true,
        default_value = "0",
        help = "Overall timeout in seconds for a bundle download (0 disables it)"
    )]
    pub timeout: u64,

    /// Connection timeout in seconds
    #[arg(
        long,
        global = true,
        default_value = "10",
        help = "Connection timeout in seconds (time to establish initial connection)"
    )]
    pub connect_timeout: u64,

    /// Read timeout in seconds
    #[arg(
        long,
        global = true,
        default_value = "30",
        help = "Read timeout in seconds (maximum time between receiving data chunks)"
    )]
    pub read_timeout: u64,

    /// Custom HTTP headers
    #[arg(
        short = 'H',
        long = "header",
        global = true,
        help = "Add custom HTTP header (format: 'Name: Value'). Can be used multiple times."
    )]
    pub headers: Vec<String>,

    /// Disable system proxy
    #[arg(long, global = true, help = "Do not use system proxy settings")]
    pub no_proxy: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Load a scan, downloading it unless it is already cached
    Fetch {
        /// Scan identifier 'site/slab/scan'
        id: ScanId,
        /// Bundle URL from the server's scan listing
        url: String,
        /// Hide the progress bar
        #[arg(long)]
        no_progress: bool,
    },

    /// Show the cache state of one or more scans
    Status {
        #[arg(required = true)]
        ids: Vec<ScanId>,
    },

    /// List every cached scan
    List,

    /// Delete a cached scan from disk
    Delete { id: ScanId },

    /// Show which scans of a server listing (JSON array) are cached
    Filter {
        site_id: i64,
        slab_id: i64,
        /// Path to a JSON file with the slab's scan listing
        listing: PathBuf,
    },
}
