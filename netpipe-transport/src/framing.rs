//! The outer, version-independent framing layer every `Stream` impl backed
//! by a byte-oriented transport shares: a 4-byte big-endian length prefix
//! around whatever envelope (V1 or V2) lives inside.
//!
//! `send` writes `u32_be(payload.len())` followed by `payload`. `recv`
//! reads the 4-byte length, validates it against the configured maximum
//! *before* allocating, then reads exactly that many bytes.

use netpipe_wire::{InvalidArgument, NetpipeError, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    let len = payload.len() as u32;
    writer
        .write_all(&len.to_be_bytes())
        .await
        .map_err(|e| NetpipeError::IoError(e.to_string()))?;
    writer
        .write_all(payload)
        .await
        .map_err(|e| NetpipeError::IoError(e.to_string()))?;
    writer
        .flush()
        .await
        .map_err(|e| NetpipeError::IoError(e.to_string()))?;
    Ok(())
}

pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_message_size: usize,
) -> Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .await
        .map_err(map_recv_io_error)?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_message_size {
        return Err(NetpipeError::InvalidArgument(InvalidArgument::PayloadTooLarge {
            len,
            max: max_message_size,
        }));
    }
    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(map_recv_io_error)?;
    Ok(payload)
}

fn map_recv_io_error(e: std::io::Error) -> NetpipeError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        NetpipeError::NotFound("peer closed the connection".to_string())
    } else {
        NetpipeError::IoError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_roundtrips_the_payload() {
        let (mut a, mut b) = tokio::io::duplex(256);
        write_frame(&mut a, b"hello frame").await.unwrap();
        let got = read_frame(&mut b, 1024).await.unwrap();
        assert_eq!(got, b"hello frame");
    }

    #[tokio::test]
    async fn write_then_read_roundtrips_an_empty_payload() {
        let (mut a, mut b) = tokio::io::duplex(256);
        write_frame(&mut a, b"").await.unwrap();
        let got = read_frame(&mut b, 1024).await.unwrap();
        assert!(got.is_empty());
    }

    #[tokio::test]
    async fn read_rejects_a_declared_length_over_the_max() {
        let (mut a, mut b) = tokio::io::duplex(256);
        write_frame(&mut a, &[0u8; 16]).await.unwrap();
        let err = read_frame(&mut b, 8).await.unwrap_err();
        assert!(matches!(
            err,
            NetpipeError::InvalidArgument(InvalidArgument::PayloadTooLarge { len: 16, max: 8 })
        ));
    }

    #[tokio::test]
    async fn read_reports_peer_closed_on_eof_before_a_length_prefix() {
        let (a, mut b) = tokio::io::duplex(256);
        drop(a);
        let err = read_frame(&mut b, 1024).await.unwrap_err();
        assert!(matches!(err, NetpipeError::NotFound(_)));
    }
}
