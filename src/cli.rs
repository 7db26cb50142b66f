use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "prophet-dap")]
#[command(version, about = "Debug adapter for remote script debugging over the sandbox control API", long_about = None)]
pub struct Cli {
    #[arg(
        long,
        help = "Listen for one editor connection on 127.0.0.1:PORT instead of serving stdio",
        value_name = "PORT"
    )]
    pub port: Option<u16>,

    #[arg(
        long,
        help = "Log filter (overrides RUST_LOG), e.g. prophet_dap=debug",
        value_name = "FILTER"
    )]
    pub log_level: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_stdio_mode() {
        let cli = Cli::parse_from(["prophet-dap"]);
        assert!(cli.port.is_none());
    }

    #[test]
    fn tcp_mode_takes_a_port() {
        let cli = Cli::parse_from(["prophet-dap", "--port", "4711"]);
        assert_eq!(cli.port, Some(4711));
    }
}
