//! Command line interface for the `framelink` server binary.

use clap::Parser;

/// Default TCP port the server listens on.
pub const DEFAULT_PORT: u16 = 31050;

/// Command line arguments for the `framelink` binary.
#[derive(Debug, Parser)]
#[command(name = "framelink", version, about = "Remote rendering bridge server")]
pub struct Cli {
    /// Log informational and debug output.
    #[arg(short, long)]
    pub verbose: bool,

    /// Backend library to load; "environment" consults FRAMELINK_BACKEND.
    #[arg(short, long, default_value = "environment")]
    pub library: String,

    /// TCP port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::Cli;

    #[test]
    fn defaults_match_the_protocol() {
        let cli = Cli::parse_from(["framelink"]);
        assert!(!cli.verbose);
        assert_eq!(cli.library, "environment");
        assert_eq!(cli.port, 31050);
    }

    #[test]
    fn parses_short_and_long_options() {
        let cli = Cli::parse_from(["framelink", "-v", "--library", "reference", "-p", "4100"]);
        assert!(cli.verbose);
        assert_eq!(cli.library, "reference");
        assert_eq!(cli.port, 4100);
    }
}
