//! `edlink` command-line tool.
//!
//! Sends single commands to a running server, or runs a demo host that
//! embeds the server in a frame loop over an in-memory scene.

use std::net::IpAddr;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use edlink_client::{Client, ClientConfig, Params, Status};
use edlink_host::{SceneModel, builtin_registry, shared};
use edlink_server::{DEFAULT_PORT, FramingMode, Server, ServerConfig};
use serde_json::Value;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// edlink command-line tool.
#[derive(Parser)]
#[command(name = "edlink")]
#[command(about = "Talk to or host an edlink command server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one command and print the response.
    Send {
        /// Command name, e.g. get_scene_info.
        command: String,

        /// Command parameters as a JSON object.
        #[arg(short, long)]
        params: Option<String>,

        /// Server address.
        #[arg(short, long, default_value = "127.0.0.1:13377")]
        addr: String,

        /// Read/write timeout in seconds.
        #[arg(short, long, default_value = "10")]
        timeout: u64,
    },

    /// Run a demo host that embeds the server over an in-memory scene.
    Serve {
        /// Address to bind.
        #[arg(long, default_value = "127.0.0.1")]
        bind: IpAddr,

        /// Port to listen on.
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Seconds of client silence before disconnecting it.
        #[arg(long, default_value = "30")]
        idle_timeout: u64,

        /// Milliseconds between server polls.
        #[arg(long, default_value = "100")]
        poll_interval_ms: u64,

        /// Milliseconds per host frame.
        #[arg(long, default_value = "16")]
        frame_ms: u64,

        /// Stop after this many frames.
        #[arg(long)]
        max_frames: Option<u64>,

        /// Per-connection receive buffer in bytes.
        #[arg(long, default_value = "65536")]
        buffer_size: usize,

        /// How inbound bytes are split into messages.
        #[arg(long, value_enum, default_value_t = Framing::PerRead)]
        framing: Framing,

        /// Log every read, request payload and partial write.
        #[arg(short, long)]
        verbose: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Framing {
    /// One read is one message.
    PerRead,
    /// Split the byte stream on complete JSON values.
    Streaming,
}

impl From<Framing> for FramingMode {
    fn from(framing: Framing) -> Self {
        match framing {
            Framing::PerRead => Self::PerRead,
            Framing::Streaming => Self::Streaming,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Send {
            command,
            params,
            addr,
            timeout,
        } => send(&addr, &command, params.as_deref(), Duration::from_secs(timeout)),

        Commands::Serve {
            bind,
            port,
            idle_timeout,
            poll_interval_ms,
            frame_ms,
            max_frames,
            buffer_size,
            framing,
            verbose,
        } => {
            init_logging(verbose);
            let config = ServerConfig::new(port)
                .with_bind_addr(bind)
                .with_idle_timeout(Duration::from_secs(idle_timeout))
                .with_poll_interval(Duration::from_millis(poll_interval_ms))
                .with_receive_buffer_size(buffer_size)
                .with_framing(framing.into())
                .with_verbose_logging(verbose);
            serve(config, Duration::from_millis(frame_ms), max_frames)
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "info,edlink_server=trace" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with(fmt::layer())
        .init();
}

fn send(addr: &str, command: &str, params: Option<&str>, timeout: Duration) -> Result<()> {
    let params = parse_params(params)?;
    let config = ClientConfig::default().with_timeout(timeout);
    let mut client =
        Client::connect(addr, config).with_context(|| format!("Failed to connect to {addr}"))?;

    let response = client
        .send(command, params)
        .with_context(|| format!("No valid response to '{command}'"))?;
    println!("{}", serde_json::to_string_pretty(&response)?);

    if response.status == Status::Error {
        anyhow::bail!(
            "{command} failed: {}",
            response.message.as_deref().unwrap_or("no message")
        );
    }
    Ok(())
}

fn parse_params(raw: Option<&str>) -> Result<Params> {
    let Some(raw) = raw else {
        return Ok(Params::new());
    };
    match serde_json::from_str::<Value>(raw).context("--params is not valid JSON")? {
        Value::Object(params) => Ok(params),
        other => anyhow::bail!("--params must be a JSON object, got: {other}"),
    }
}

/// Measures wall-clock time between host frames.
struct FrameClock {
    last: Instant,
}

impl FrameClock {
    fn start() -> Self {
        Self {
            last: Instant::now(),
        }
    }

    /// Returns the time since the previous lap and starts a new one.
    fn lap(&mut self) -> Duration {
        let now = Instant::now();
        let delta = now.duration_since(self.last);
        self.last = now;
        delta
    }
}

fn serve(config: ServerConfig, frame: Duration, max_frames: Option<u64>) -> Result<()> {
    let host = shared(SceneModel::new());
    let registry = builtin_registry(&host).context("Failed to register built-in commands")?;
    let mut server = Server::new(config, registry);
    server.start().context("Failed to start server")?;

    if let Some(addr) = server.local_addr() {
        info!(%addr, commands = server.command_names().len(), "demo host running");
    }

    let mut frames = 0u64;
    let mut clock = FrameClock::start();
    while max_frames.is_none_or(|max| frames < max) {
        thread::sleep(frame);
        if !server.tick(clock.lap()) {
            break;
        }
        frames += 1;
    }

    server.stop();
    info!(frames, "demo host finished");
    Ok(())
}
