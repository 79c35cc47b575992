use clap::{Parser, Subcommand, ValueEnum};
use streamprobe::{AckProtocol, Client, Config, Protocol, Server};

#[derive(Parser)]
#[command(name = "streamprobe")]
#[command(about = "Point-to-point network throughput probe over TCP and UDP", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum AckMode {
    /// No acknowledgment between messages
    Streaming,
    /// Wait for acknowledgment of each message before sending the next
    StopWait,
}

impl From<AckMode> for AckProtocol {
    fn from(mode: AckMode) -> Self {
        match mode {
            AckMode::Streaming => AckProtocol::Streaming,
            AckMode::StopWait => AckProtocol::StopWait,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the server: TCP and UDP listeners side by side
    Server {
        /// Port to listen on
        #[arg(short, long, default_value = "5991")]
        port: u16,

        /// Bind to specific address
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Run a client transfer against a server
    Client {
        /// Server host to connect to
        host: String,

        /// Port to connect to
        #[arg(short, long, default_value = "5991")]
        port: u16,

        /// Use UDP instead of TCP
        #[arg(short, long)]
        udp: bool,

        /// Acknowledgment discipline
        #[arg(short, long, value_enum, default_value = "streaming")]
        ack: AckMode,

        /// Message payload size in bytes
        #[arg(short = 'l', long, default_value = "512", value_parser = clap::value_parser!(u32).range(1..))]
        size: u32,

        /// Total bytes to transfer (defaults per transport and discipline)
        #[arg(short = 'n', long)]
        transfer_size: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Server { port, bind } => {
            let mut config = Config::server(port);
            if let Some(bind_addr) = bind {
                config.bind_addr = Some(bind_addr.parse()?);
            }

            run_servers(config).await?;
        }

        Commands::Client {
            host,
            port,
            udp,
            ack,
            size,
            transfer_size,
        } => {
            let protocol = if udp { Protocol::Udp } else { Protocol::Tcp };

            let mut config = Config::client(host, port)
                .with_protocol(protocol)
                .with_ack_protocol(ack.into())
                .with_payload_size(size);

            if let Some(n) = transfer_size {
                config = config.with_data_transfer_size(n);
            }

            let mut client = Client::new(config)?;
            let result = client.run().await?;

            println!(
                "{} packets, {} bytes sent in {:?} ({:.2} Mbit/s)",
                result.packets_sent,
                result.bytes_sent,
                result.duration,
                result.bits_per_second() / 1_000_000.0
            );
        }
    }

    Ok(())
}

/// Starts the TCP and UDP servers as independent tasks sharing no state,
/// and shuts both down on Ctrl-C.
async fn run_servers(config: Config) -> anyhow::Result<()> {
    let tcp_server = Server::new(config.clone().with_protocol(Protocol::Tcp));
    let udp_server = Server::new(config.with_protocol(Protocol::Udp));

    let tcp_token = tcp_server.shutdown_token();
    let udp_token = udp_server.shutdown_token();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tcp_token.cancel();
            udp_token.cancel();
        }
    });

    let tcp_task = tokio::spawn(async move { tcp_server.run().await });
    let udp_task = tokio::spawn(async move { udp_server.run().await });

    let (tcp_result, udp_result) = tokio::try_join!(tcp_task, udp_task)?;
    tcp_result?;
    udp_result?;

    Ok(())
}
