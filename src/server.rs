use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info};

use crate::commands::Response;
use crate::daemon::Daemon;

/// Accept loop for the OSP transport: one request document per connection.
/// The client half-closes after sending its request; the response (or its
/// fragments, for streamed listings) is written back as produced and the
/// connection is closed.
pub async fn serve(daemon: Arc<Daemon>, bind: &str) -> Result<()> {
    let listener = TcpListener::bind(bind).await?;
    info!(bind, "listening for OSP requests");

    loop {
        let (stream, peer) = listener.accept().await?;
        let daemon = daemon.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(daemon, stream).await {
                error!(%peer, error = %e, "connection failed");
            }
        });
    }
}

async fn handle_connection(daemon: Arc<Daemon>, mut stream: TcpStream) -> Result<()> {
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    let request = String::from_utf8_lossy(&buf);

    match daemon.handle_request(&request).await {
        Response::Buffer(doc) => {
            stream.write_all(doc.as_bytes()).await?;
        }
        Response::Stream(fragments) => {
            for fragment in fragments {
                stream.write_all(fragment.as_bytes()).await?;
            }
        }
    }

    stream.shutdown().await?;
    Ok(())
}
