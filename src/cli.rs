use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "securityevent-processor")]
#[command(about = "Expand OpenReports compliance reports in log batches into security events")]
pub struct Cli {
    /// Log batch JSON files; reads newline-delimited batches from stdin if none are given
    pub inputs: Vec<PathBuf>,

    /// Processor configuration (YAML)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Enable the OpenReports processor regardless of the config file
    #[arg(long)]
    pub openreports: bool,

    /// Only turn results with these statuses into events (pass, fail, error, skip); implies --openreports
    #[arg(short = 's', long, value_delimiter = ',')]
    pub status_filter: Option<Vec<String>>,

    /// Validate the configuration and exit
    #[arg(long)]
    pub check_config: bool,

    /// Print the default configuration and exit
    #[arg(long)]
    pub print_default_config: bool,

    /// Pretty-print output batches
    #[arg(long)]
    pub pretty: bool,

    /// Verbose output (debug logging)
    #[arg(short = 'v', long)]
    pub verbose: bool,
}
