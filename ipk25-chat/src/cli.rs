use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::datagram_session::DatagramConfig;

#[derive(Parser, Debug, Clone)]
#[command(name = "ipk25chat-client", author, version, about, long_about = None)]
pub struct Cli {
    /// Transport protocol used for the connection.
    #[arg(short = 't', long, value_enum)]
    pub transport: Transport,

    /// Server IP address or hostname.
    #[arg(short = 's', long)]
    pub server: String,

    /// Server port.
    #[arg(short = 'p', long, default_value_t = 4567)]
    pub port: u16,

    /// UDP confirmation timeout in milliseconds.
    #[arg(short = 'd', long = "timeout", default_value_t = 250)]
    pub timeout_ms: u16,

    /// Maximum number of UDP retransmissions.
    #[arg(short = 'r', long = "retries", default_value_t = 3)]
    pub max_retries: u8,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    Udp,
}

impl Cli {
    pub fn datagram_config(&self) -> DatagramConfig {
        DatagramConfig {
            timeout: Duration::from_millis(u64::from(self.timeout_ms)),
            max_retries: self.max_retries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_protocol() {
        let cli =
            Cli::try_parse_from(["ipk25chat-client", "-t", "udp", "-s", "localhost"]).unwrap();
        assert_eq!(cli.transport, Transport::Udp);
        assert_eq!(cli.port, 4567);
        assert_eq!(cli.datagram_config(), DatagramConfig::default());
    }

    #[test]
    fn overrides_are_applied() {
        let cli = Cli::try_parse_from([
            "ipk25chat-client",
            "--transport",
            "tcp",
            "-s",
            "10.0.0.1",
            "-p",
            "9000",
            "-d",
            "100",
            "-r",
            "5",
        ])
        .unwrap();
        assert_eq!(cli.transport, Transport::Tcp);
        assert_eq!(cli.port, 9000);
        assert_eq!(cli.datagram_config().timeout, Duration::from_millis(100));
        assert_eq!(cli.datagram_config().max_retries, 5);
    }

    #[test]
    fn transport_and_server_are_required() {
        assert!(Cli::try_parse_from(["ipk25chat-client", "-s", "localhost"]).is_err());
        assert!(Cli::try_parse_from(["ipk25chat-client", "-t", "tcp"]).is_err());
        assert!(Cli::try_parse_from(["ipk25chat-client", "-t", "sctp", "-s", "x"]).is_err());
    }
}
