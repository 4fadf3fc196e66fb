use crate::library::is_audio_path;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 47_813;
const CONNECT_TIMEOUT: Duration = Duration::from_millis(400);
const ACCEPT_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct OpenRequest {
    open: PathBuf,
}

/// Holds the localhost port that marks this process as the running player.
/// Paths forwarded by later launches arrive through `try_recv`.
#[derive(Debug)]
pub struct InstanceGuard {
    port: u16,
    path_rx: Receiver<PathBuf>,
}

impl InstanceGuard {
    pub fn bind(port: u16) -> Result<Self> {
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        let listener = TcpListener::bind(addr)
            .with_context(|| format!("failed to bind instance port {port}"))?;
        listener
            .set_nonblocking(true)
            .context("failed to set nonblocking listener")?;
        let port = listener.local_addr().context("listener has no address")?.port();

        let (path_tx, path_rx) = mpsc::channel();
        thread::spawn(move || accept_loop(listener, path_tx));

        Ok(Self { port, path_rx })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn try_recv(&self) -> Option<PathBuf> {
        match self.path_rx.try_recv() {
            Ok(path) => Some(path),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }
}

fn accept_loop(listener: TcpListener, path_tx: Sender<PathBuf>) {
    loop {
        match listener.accept() {
            Ok((stream, peer)) => {
                log::debug!("instance connection from {peer}");
                let tx = path_tx.clone();
                thread::spawn(move || read_requests(stream, tx));
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL);
            }
            Err(err) => {
                log::warn!("instance accept failed: {err}");
                thread::sleep(ACCEPT_POLL);
            }
        }
    }
}

fn read_requests(stream: TcpStream, path_tx: Sender<PathBuf>) {
    // Accepted sockets inherit nonblocking mode on some platforms.
    if let Err(err) = stream.set_nonblocking(false) {
        log::warn!("instance stream setup failed: {err}");
        return;
    }

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => match serde_json::from_str::<OpenRequest>(line.trim_end()) {
                Ok(request) => {
                    if path_tx.send(request.open).is_err() {
                        break;
                    }
                }
                Err(err) => log::warn!("ignoring malformed instance request: {err}"),
            },
            Err(err) => {
                log::warn!("instance read failed: {err}");
                break;
            }
        }
    }
}

/// Hands `path` to a player already listening on `port`.
/// Returns `Ok(false)` when nobody is listening.
pub fn forward_to_running(port: u16, path: &Path) -> Result<bool> {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    let mut stream = match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
        Ok(stream) => stream,
        Err(err) => {
            log::debug!("no running instance on port {port}: {err}");
            return Ok(false);
        }
    };

    send_json_line(
        &mut stream,
        &OpenRequest {
            open: path.to_path_buf(),
        },
    )?;
    Ok(true)
}

pub fn first_audio_arg(args: &[String]) -> Option<PathBuf> {
    args.iter()
        .filter(|arg| !arg.starts_with("--"))
        .map(PathBuf::from)
        .find(|path| is_audio_path(path) && path.is_file())
}

fn send_json_line<T: Serialize>(stream: &mut TcpStream, value: &T) -> Result<()> {
    let mut bytes = serde_json::to_vec(value).context("serialize failed")?;
    bytes.push(b'\n');
    stream.write_all(&bytes).context("write failed")?;
    stream.flush().context("flush failed")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn wait_for_path(guard: &InstanceGuard) -> Option<PathBuf> {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if let Some(path) = guard.try_recv() {
                return Some(path);
            }
            thread::sleep(Duration::from_millis(10));
        }
        None
    }

    #[test]
    fn forwarded_path_reaches_the_running_instance() {
        let guard = InstanceGuard::bind(0).expect("bind ephemeral port");
        let sent = PathBuf::from("/music/with space/song.flac");

        assert!(forward_to_running(guard.port(), &sent).expect("forward"));
        assert_eq!(wait_for_path(&guard), Some(sent));
    }

    #[test]
    fn second_bind_on_same_port_fails() {
        let guard = InstanceGuard::bind(0).expect("bind ephemeral port");
        assert!(InstanceGuard::bind(guard.port()).is_err());
    }

    #[test]
    fn forwarding_without_listener_reports_false() {
        let port = {
            let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).expect("bind");
            listener.local_addr().expect("addr").port()
        };
        assert!(!forward_to_running(port, Path::new("a.mp3")).expect("forward"));
    }

    #[test]
    fn first_audio_arg_skips_flags_non_audio_and_missing_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let notes = dir.path().join("notes.txt");
        let song = dir.path().join("song.MP3");
        let other = dir.path().join("other.flac");
        for path in [&notes, &song, &other] {
            std::fs::write(path, b"data").expect("write");
        }
        let missing = dir.path().join("gone.mp3");

        let args: Vec<String> = [
            PathBuf::from("--null-audio"),
            notes,
            missing,
            song.clone(),
            other,
        ]
        .iter()
        .map(|path| path.display().to_string())
        .collect();
        assert_eq!(first_audio_arg(&args), Some(song));
        assert_eq!(first_audio_arg(&[String::from("--port")]), None);
        assert_eq!(
            first_audio_arg(&[String::from("/no/such/dir/track.ogg")]),
            None
        );
    }
}
