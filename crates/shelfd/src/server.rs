//! RESP listener: accept loop and per-connection command processing

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use bytes::BytesMut;
use shelfstore::wire::Frame;
use shelfstore::CacheStore;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::handler::CommandHandler;

/// Serve `store` over RESP until `shutdown` resolves.
///
/// Open connections are not drained; each one ends when its client
/// disconnects or the runtime shuts down.
pub async fn serve_resp<S>(
    listener: TcpListener,
    store: Arc<dyn CacheStore>,
    shutdown: S,
) -> Result<()>
where
    S: Future<Output = ()>,
{
    let handler = Arc::new(CommandHandler::new(store));
    info!(addr = %listener.local_addr()?, "RESP listener ready");
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    debug!(%addr, "new RESP connection");
                    let handler = Arc::clone(&handler);

                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, handler).await {
                            error!(%addr, error = %e, "error handling RESP client");
                        }
                        debug!(%addr, "RESP connection closed");
                    });
                }
                Err(e) => {
                    error!(error = %e, "error accepting RESP connection");
                }
            },
            _ = &mut shutdown => {
                info!("RESP listener stopped");
                return Ok(());
            }
        }
    }
}

async fn handle_client(mut stream: TcpStream, handler: Arc<CommandHandler>) -> Result<()> {
    let mut buffer = BytesMut::with_capacity(4096);
    let mut out = BytesMut::with_capacity(4096);

    loop {
        if stream.read_buf(&mut buffer).await? == 0 {
            return Ok(());
        }

        // Answer every complete command in the buffer, then flush once
        loop {
            match Frame::decode(&mut buffer) {
                Ok(Some(cmd)) => handler.handle(cmd).await.encode(&mut out),
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "RESP parse error");
                    Frame::error(e).encode(&mut out);
                    buffer.clear();
                    break;
                }
            }
        }

        if !out.is_empty() {
            stream.write_all(&out).await?;
            out.clear();
        }
    }
}
