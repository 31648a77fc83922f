use std::{net::SocketAddr, path::Path, process::Stdio, time::Duration};

use anyhow::{Context, Result, anyhow};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader},
    net::{TcpListener, UdpSocket},
    process::{Child, ChildStdin, ChildStdout, Command},
    time::timeout,
};

const READ_TIMEOUT: Duration = Duration::from_secs(3);

#[tokio::test]
async fn tcp_chat_end_to_end() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("ipk25chat-client");
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let mut client = spawn_client(binary, "tcp", addr, &[])?;
    client.send_line("/auth alice secret1 Alice").await?;

    let (stream, _) = timeout(READ_TIMEOUT, listener.accept())
        .await
        .context("client never connected")??;
    let (server_read, mut server_write) = stream.into_split();
    let mut server_read = BufReader::new(server_read);

    let auth = read_line_expect(&mut server_read, "waiting for AUTH").await?;
    assert_eq!(auth, "AUTH alice AS Alice USING secret1");
    server_write.write_all(b"REPLY OK IS Auth success.\r\n").await?;
    let success = read_line_expect(&mut client.stdout, "waiting for auth result").await?;
    assert_eq!(success, "Action Success: Auth success.");

    server_write.write_all(b"MSG FROM Bob IS hi Alice\r\n").await?;
    let chat = read_line_expect(&mut client.stdout, "waiting for Bob").await?;
    assert_eq!(chat, "Bob: hi Alice");

    client.send_line("hello Bob").await?;
    let msg = read_line_expect(&mut server_read, "waiting for MSG").await?;
    assert_eq!(msg, "MSG FROM Alice IS hello Bob");

    // Closing stdin leaves the chat politely.
    drop(client.stdin);
    let bye = read_line_expect(&mut server_read, "waiting for BYE").await?;
    assert_eq!(bye, "BYE FROM Alice");

    ensure_exit(&mut client.child, "tcp client", true).await
}

#[tokio::test]
async fn udp_chat_end_to_end() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("ipk25chat-client");
    let welcome = UdpSocket::bind("127.0.0.1:0").await?;
    let dynamic = UdpSocket::bind("127.0.0.1:0").await?;

    let mut client = spawn_client(binary, "udp", welcome.local_addr()?, &["-d", "200", "-r", "2"])?;
    client.send_line("/auth alice secret1 Alice").await?;

    let (auth, peer) = recv(&welcome).await?;
    assert_eq!(auth, b"\x02\x00\x00alice\0Alice\0secret1\0");
    welcome.send_to(&[0x00, 0x00, 0x00], peer).await?;
    dynamic
        .send_to(b"\x01\x00\x00\x01\x00\x00Auth success.\0", peer)
        .await?;
    let success = read_line_expect(&mut client.stdout, "waiting for auth result").await?;
    assert_eq!(success, "Action Success: Auth success.");

    dynamic.send_to(b"\x04\x00\x01Bob\0hi Alice\0", peer).await?;
    let (ack, _) = recv(&dynamic).await?;
    assert_eq!(ack, [0x00, 0x00, 0x01]);
    let chat = read_line_expect(&mut client.stdout, "waiting for Bob").await?;
    assert_eq!(chat, "Bob: hi Alice");

    drop(client.stdin);
    let (bye, _) = recv(&dynamic).await?;
    assert_eq!(bye, b"\xff\x00\x01Alice\0");
    dynamic.send_to(&[0x00, 0x00, 0x01], peer).await?;

    ensure_exit(&mut client.child, "udp client", true).await
}

#[tokio::test]
async fn server_error_exits_with_failure() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("ipk25chat-client");
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let mut client = spawn_client(binary, "tcp", addr, &[])?;
    client.send_line("/auth alice secret1 Alice").await?;

    let (stream, _) = timeout(READ_TIMEOUT, listener.accept()).await??;
    let (server_read, mut server_write) = stream.into_split();
    let mut server_read = BufReader::new(server_read);
    read_line_expect(&mut server_read, "waiting for AUTH").await?;

    server_write.write_all(b"ERR FROM Server IS boom\r\n").await?;
    let err = read_line_expect(&mut client.stdout, "waiting for error").await?;
    assert_eq!(err, "ERROR FROM Server: boom");

    ensure_exit(&mut client.child, "tcp client", false).await
}

#[tokio::test]
async fn local_mistakes_stay_local() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("ipk25chat-client");
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let mut client = spawn_client(binary, "tcp", addr, &[])?;
    client.send_line("/dance").await?;
    let unknown = read_line_expect(&mut client.stdout, "waiting for unknown command").await?;
    assert!(unknown.starts_with("ERROR: "), "got {unknown:?}");

    client.send_line("hello?").await?;
    let no_name = read_line_expect(&mut client.stdout, "waiting for missing name").await?;
    assert!(no_name.starts_with("ERROR: "), "got {no_name:?}");

    drop(client.stdin);
    ensure_exit(&mut client.child, "tcp client", true).await?;

    let (stream, _) = timeout(READ_TIMEOUT, listener.accept()).await??;
    let mut server_read = BufReader::new(stream);
    let mut rest = String::new();
    let bytes = timeout(READ_TIMEOUT, server_read.read_line(&mut rest)).await??;
    assert_eq!(bytes, 0, "client should not have sent anything, got {rest:?}");
    Ok(())
}

struct ClientProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl ClientProcess {
    async fn send_line(&mut self, line: &str) -> Result<()> {
        self.stdin
            .write_all(line.as_bytes())
            .await
            .with_context(|| format!("failed to send line '{line}'"))?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;
        Ok(())
    }
}

fn spawn_client(
    binary: &Path,
    transport: &str,
    server: SocketAddr,
    extra: &[&str],
) -> Result<ClientProcess> {
    let mut cmd = Command::new(binary);
    cmd.arg("-t")
        .arg(transport)
        .arg("-s")
        .arg(server.ip().to_string())
        .arg("-p")
        .arg(server.port().to_string())
        .args(extra)
        .env("RUST_LOG", "warn")
        .env("RUST_LOG_STYLE", "never")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("failed to spawn {transport} client"))?;

    let stdin = child
        .stdin
        .take()
        .context("client stdin missing after spawn")?;
    let stdout = child
        .stdout
        .take()
        .context("client stdout missing after spawn")?;

    Ok(ClientProcess {
        child,
        stdin,
        stdout: BufReader::new(stdout),
    })
}

async fn recv(socket: &UdpSocket) -> Result<(Vec<u8>, SocketAddr)> {
    let mut buf = vec![0u8; 65_535];
    let (len, from) = timeout(READ_TIMEOUT, socket.recv_from(&mut buf))
        .await
        .context("timed out waiting for datagram")??;
    buf.truncate(len);
    Ok((buf, from))
}

async fn read_line_expect<R: AsyncRead + Unpin>(
    reader: &mut BufReader<R>,
    description: &str,
) -> Result<String> {
    match read_line(reader).await {
        Ok(Some(line)) => Ok(line),
        Ok(None) => Err(anyhow!("{description}: stream closed")),
        Err(err) => Err(err.context(format!("{description}: failed to read line"))),
    }
}

async fn read_line<R: AsyncRead + Unpin>(reader: &mut BufReader<R>) -> Result<Option<String>> {
    let mut line = String::new();
    let read_future = reader.read_line(&mut line);
    let bytes_io = match timeout(READ_TIMEOUT, read_future).await {
        Ok(result) => result,
        Err(_) => return Err(anyhow!("timed out waiting for line")),
    };
    let byte_count = bytes_io?;
    if byte_count == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

async fn ensure_exit(child: &mut Child, name: &str, success: bool) -> Result<()> {
    let status = timeout(READ_TIMEOUT, child.wait())
        .await
        .with_context(|| format!("{name} did not exit"))?
        .with_context(|| format!("failed to await {name} process"))?;
    if status.success() != success {
        return Err(anyhow!("{name} exited with unexpected status {status}"));
    }
    Ok(())
}
