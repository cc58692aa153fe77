//! Raw UDP (best-effort) and TCP (reliable) frame I/O.
//!
//! TCP frames are length-prefixed (`len: u32 ‖ body`) since a stream has no
//! natural message boundary; UDP frames are sent as single datagrams and
//! rely on the OS to preserve message boundaries (and on [`crate::MAX_UDP_PAYLOAD`]
//! to avoid IP fragmentation).

use std::net::SocketAddr;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};

#[derive(Debug, Error)]
pub enum SocketError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame exceeds the maximum allowed size ({0} bytes)")]
    FrameTooLarge(usize),
}

pub const MAX_UDP_PAYLOAD: usize = 1400;
const MAX_TCP_FRAME: usize = 16 * 1024 * 1024;

pub async fn send_udp(socket: &UdpSocket, to: SocketAddr, frame: &[u8]) -> Result<(), SocketError> {
    if frame.len() > MAX_UDP_PAYLOAD {
        return Err(SocketError::FrameTooLarge(frame.len()));
    }
    socket.send_to(frame, to).await?;
    Ok(())
}

pub async fn recv_udp(socket: &UdpSocket, buf: &mut [u8]) -> Result<(Vec<u8>, SocketAddr), SocketError> {
    let (n, from) = socket.recv_from(buf).await?;
    Ok((buf[..n].to_vec(), from))
}

pub async fn write_tcp_frame(stream: &mut TcpStream, frame: &[u8]) -> Result<(), SocketError> {
    if frame.len() > MAX_TCP_FRAME {
        return Err(SocketError::FrameTooLarge(frame.len()));
    }
    stream.write_u32(frame.len() as u32).await?;
    stream.write_all(frame).await?;
    stream.flush().await?;
    Ok(())
}

pub async fn read_tcp_frame(stream: &mut TcpStream) -> Result<Vec<u8>, SocketError> {
    let len = stream.read_u32().await? as usize;
    if len > MAX_TCP_FRAME {
        return Err(SocketError::FrameTooLarge(len));
    }
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    Ok(buf)
}
