//! Echo server over preamble-delimited frames
//!
//! Every message received is written back with the same payload type.
//! Run with: cargo run --example echo

use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};

use sockudo_tcpws::{Config, Error, Result, TcpConnection};

#[tokio::main]
async fn main() -> Result<()> {
    let addr: SocketAddr = "127.0.0.1:9002".parse().unwrap();
    let listener = TcpListener::bind(addr).await?;

    println!("Echo server listening on tcp://{}", addr);

    loop {
        let (stream, peer) = listener.accept().await?;
        stream.set_nodelay(true).ok();

        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream).await {
                eprintln!("Connection error from {}: {}", peer, e);
            }
        });
    }
}

async fn handle_connection(stream: TcpStream) -> Result<()> {
    let conn = TcpConnection::new(stream, Config::default());

    loop {
        match conn.read_message().await {
            Ok(msg) => {
                conn.write_message(msg.opcode, &msg.payload).await?;
            }
            Err(Error::ConnectionClosed) => break,
            Err(e) => {
                conn.close().await.ok();
                return Err(e);
            }
        }
    }

    // The peer may already be gone
    conn.close().await.ok();
    Ok(())
}
