use clap::Parser;

/// Concurrent election service: TCP electors in, UDP results out.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// TCP port to listen on for elector connections. Use 0 for an ephemeral port.
    pub tcp_port: u16,

    /// UDP port on localhost where tally results are announced.
    pub udp_port: u16,
}
