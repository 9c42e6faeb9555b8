use std::path::PathBuf;

use clap::{ArgAction, Parser};

#[derive(Parser, Debug)]
#[command(version, about = "A multi-connection download accelerator", long_about = None)]
pub struct Cli {
    /// URL to download (http or https)
    #[arg(required = true, index = 1)]
    pub url: String,

    /// Output file name, overriding the name suggested by the server or URL
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<String>,

    /// Directory to save the file in (created if missing)
    #[arg(short, long, value_name = "DIR")]
    pub dir: Option<PathBuf>,

    /// Number of concurrent connections (chosen from the file size when omitted)
    #[arg(short, long, value_name = "NUM")]
    pub connections: Option<usize>,

    /// Socket read size in bytes (supports K, M, G suffixes)
    #[arg(long, value_name = "SIZE", default_value = "64K")]
    pub buffer_size: String,

    /// Custom User-Agent header
    #[arg(short, long, value_name = "STRING")]
    pub user_agent: Option<String>,

    /// Custom HTTP header (format: 'Name: Value')
    #[arg(long, value_name = "HEADER", action = ArgAction::Append)]
    pub header: Option<Vec<String>>,

    /// Connection timeout in seconds
    #[arg(short, long, value_name = "SECONDS", default_value = "30")]
    pub timeout: u64,

    /// Seconds without data after which a connection is considered finished
    #[arg(long, value_name = "SECONDS", default_value = "5")]
    pub idle_timeout: u64,

    /// Maximum number of redirects to follow
    #[arg(long, value_name = "NUM", default_value = "5")]
    pub max_redirects: usize,

    /// Quiet mode - no progress bar
    #[arg(short, long, action = ArgAction::SetTrue)]
    pub quiet: bool,

    /// Verbose output
    #[arg(short, long, action = ArgAction::SetTrue)]
    pub verbose: bool,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["fetchline", "http://example.com/a.bin"]).unwrap();
        assert_eq!(cli.url, "http://example.com/a.bin");
        assert_eq!(cli.connections, None);
        assert_eq!(cli.buffer_size, "64K");
        assert_eq!(cli.max_redirects, 5);
        assert!(!cli.quiet);
    }

    #[test]
    fn test_cli_repeated_headers() {
        let cli = Cli::try_parse_from([
            "fetchline",
            "-c",
            "8",
            "--header",
            "X-A: 1",
            "--header",
            "X-B: 2",
            "http://example.com/",
        ])
        .unwrap();
        assert_eq!(cli.connections, Some(8));
        assert_eq!(cli.header.unwrap(), vec!["X-A: 1", "X-B: 2"]);
    }
}
