use std::net::SocketAddr;

use anyhow::{Context, Result, bail};
use tokio::{
    net::{TcpStream, UdpSocket, lookup_host},
    sync::mpsc,
};
use tracing::{info, warn};

use crate::{
    cli::{Cli, Transport},
    console::{Input, Notice, NoticeSender, notify, print_notices, spawn_input_pump},
    datagram_session::{DatagramConfig, DatagramSession},
    error::SessionError,
    session::SessionEnd,
    stream_session::StreamSession,
};

const INPUT_BUFFER: usize = 32;

/// Connects to the configured server and chats until the session ends.
pub async fn run(cli: Cli) -> Result<SessionEnd> {
    let server = resolve_server(&cli.server, cli.port).await?;

    let (notices_tx, notices_rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(print_notices(notices_rx));

    let (input_tx, input_rx) = mpsc::channel(INPUT_BUFFER);
    spawn_input_pump(input_tx);

    let outcome = match cli.transport {
        Transport::Tcp => run_stream(server, notices_tx.clone(), input_rx).await,
        Transport::Udp => {
            run_datagram(server, cli.datagram_config(), notices_tx.clone(), input_rx).await
        }
    };

    if let Err(err) = &outcome {
        // The peer's own ERR has already been shown.
        let reported = matches!(
            err.downcast_ref::<SessionError>(),
            Some(SessionError::ServerError { .. })
        );
        if !reported {
            notify(&notices_tx, Notice::LocalError(format!("{err:#}")));
        }
    }

    drop(notices_tx);
    match printer.await {
        Ok(Ok(())) => {}
        Ok(Err(error)) => warn!(?error, "failed to write to stdout"),
        Err(error) => warn!(?error, "notice printer panicked"),
    }

    outcome
}

/// Resolves `host:port`, preferring an IPv4 address.
pub async fn resolve_server(host: &str, port: u16) -> Result<SocketAddr> {
    let addrs: Vec<SocketAddr> = lookup_host((host, port))
        .await
        .with_context(|| format!("failed to resolve {host}"))?
        .collect();

    match addrs.iter().find(|addr| addr.is_ipv4()).or(addrs.first()) {
        Some(addr) => Ok(*addr),
        None => bail!("{host} did not resolve to any address"),
    }
}

async fn run_stream(
    server: SocketAddr,
    notices: NoticeSender,
    input: mpsc::Receiver<Input>,
) -> Result<SessionEnd> {
    let stream = TcpStream::connect(server)
        .await
        .with_context(|| format!("failed to connect to {server}"))?;
    info!(%server, "connected");

    let (reader, writer) = stream.into_split();
    let end = StreamSession::new(reader, writer, notices).run(input).await?;
    Ok(end)
}

async fn run_datagram(
    server: SocketAddr,
    config: DatagramConfig,
    notices: NoticeSender,
    input: mpsc::Receiver<Input>,
) -> Result<SessionEnd> {
    let bind: SocketAddr = if server.is_ipv4() {
        ([0, 0, 0, 0], 0).into()
    } else {
        ([0u16; 8], 0).into()
    };
    let socket = UdpSocket::bind(bind)
        .await
        .with_context(|| format!("failed to bind UDP socket on {bind}"))?;
    info!(local = ?socket.local_addr().ok(), %server, ?config, "socket ready");

    let end = DatagramSession::new(socket, server, config, notices)
        .run(input)
        .await?;
    Ok(end)
}
