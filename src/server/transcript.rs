use std::{io, net::SocketAddr, path::Path};

use tokio::{
    fs::{File, OpenOptions},
    io::AsyncWriteExt,
    sync::Mutex,
};

/// Which side of the client leg a transcript line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Client,
    Server,
}

impl Side {
    const fn tag(self) -> &'static str {
        match self {
            Self::Client => "C:",
            Self::Server => "S:",
        }
    }
}

/// Appends the client-side conversation of every session to one file.
#[derive(Debug)]
pub struct Transcript {
    file: Mutex<File>,
}

impl Transcript {
    /// Open `path` for appending, creating it if needed.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be opened.
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;

        Ok(Self {
            file: Mutex::new(file),
        })
    }

    /// Record one line. Failures are logged and otherwise ignored.
    pub async fn record(&self, peer: SocketAddr, side: Side, line: &str) {
        let entry = format!("{peer} {} {}\n", side.tag(), line.trim_end_matches(['\r', '\n']));

        let mut file = self.file.lock().await;
        let written = async {
            file.write_all(entry.as_bytes()).await?;
            file.flush().await
        };

        if let Err(err) = written.await {
            tracing::warn!("Unable to write session transcript: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{Side, Transcript};

    #[tokio::test]
    async fn test_transcript_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("debug.log");
        let peer = "127.0.0.1:2525".parse().unwrap();

        let transcript = Transcript::open(&path).await.unwrap();
        transcript.record(peer, Side::Client, "EHLO test\r\n").await;
        transcript.record(peer, Side::Server, "250 OK").await;
        drop(transcript);

        let transcript = Transcript::open(&path).await.unwrap();
        transcript.record(peer, Side::Client, "QUIT").await;
        drop(transcript);

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "127.0.0.1:2525 C: EHLO test\n127.0.0.1:2525 S: 250 OK\n127.0.0.1:2525 C: QUIT\n"
        );
    }
}
