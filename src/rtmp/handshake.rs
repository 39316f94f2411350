use rand::RngCore;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::rtmp::RTMP_VERSION;

const HANDSHAKE_SIZE: usize = 1536;
const RANDOM_OFFSET: usize = 8;
const RANDOM_SIZE: usize = HANDSHAKE_SIZE - RANDOM_OFFSET;

/// Server side of the simple (non-digest) handshake.
///
/// Holds the S1 random until C2 has been checked against it.
pub struct Handshake {
    server_random: Vec<u8>,
}

impl Handshake {
    pub fn new() -> Self {
        let mut server_random = vec![0u8; RANDOM_SIZE];
        rand::thread_rng().fill_bytes(&mut server_random);
        Self { server_random }
    }

    /// C0 → S0 + S1 → C1 → S2 → C2.
    pub async fn perform<S>(self, stream: &mut S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        // ── C0 ──
        let version = stream.read_u8().await?;
        if version != RTMP_VERSION {
            return Err(Error::Handshake(format!(
                "unsupported protocol version {version}"
            )));
        }

        // ── S0 + S1 ──
        let mut s0s1 = Vec::with_capacity(1 + HANDSHAKE_SIZE);
        s0s1.push(RTMP_VERSION);
        s0s1.extend_from_slice(&0u32.to_be_bytes()); // timestamp
        s0s1.extend_from_slice(&0u32.to_be_bytes()); // zero
        s0s1.extend_from_slice(&self.server_random);
        stream.write_all(&s0s1).await?;
        stream.flush().await?;

        // ── C1 ──
        let mut c1 = vec![0u8; HANDSHAKE_SIZE];
        stream.read_exact(&mut c1).await?;
        let client_zero = u32::from_be_bytes([c1[4], c1[5], c1[6], c1[7]]);
        if client_zero != 0 {
            warn!(zero = client_zero, "C1 zero field is not zero");
        }

        // ── S2: echo C1 timestamp and random ──
        let mut s2 = Vec::with_capacity(HANDSHAKE_SIZE);
        s2.extend_from_slice(&c1[0..4]);
        s2.extend_from_slice(&0u32.to_be_bytes());
        s2.extend_from_slice(&c1[RANDOM_OFFSET..]);
        stream.write_all(&s2).await?;
        stream.flush().await?;

        // ── C2 ──
        let mut c2 = vec![0u8; HANDSHAKE_SIZE];
        stream.read_exact(&mut c2).await?;
        if c2[RANDOM_OFFSET..] != self.server_random[..] {
            return Err(Error::Handshake(
                "C2 random does not echo S1 random".to_string(),
            ));
        }

        debug!("handshake complete");
        Ok(())
    }
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    /// Plays the client side: sends C0+C1, reads S0+S1+S2, sends C2.
    async fn client<S>(stream: &mut S, corrupt_c2: bool) -> std::io::Result<Vec<u8>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut c0c1 = vec![RTMP_VERSION];
        c0c1.extend_from_slice(&7u32.to_be_bytes());
        c0c1.extend_from_slice(&[0u8; 4]);
        c0c1.extend((0..RANDOM_SIZE).map(|i| (i % 251) as u8));
        stream.write_all(&c0c1).await?;

        let mut s0s1s2 = vec![0u8; 1 + 2 * HANDSHAKE_SIZE];
        stream.read_exact(&mut s0s1s2).await?;

        let mut c2 = s0s1s2[1..1 + HANDSHAKE_SIZE].to_vec();
        if corrupt_c2 {
            c2[HANDSHAKE_SIZE - 1] ^= 0xff;
        }
        stream.write_all(&c2).await?;
        Ok(s0s1s2)
    }

    #[tokio::test]
    async fn completes_and_echoes_c1() {
        let (mut server, mut peer) = duplex(8192);
        let handshake = Handshake::new();
        let server_random = handshake.server_random.clone();

        let (server_res, client_res) =
            tokio::join!(handshake.perform(&mut server), client(&mut peer, false));
        server_res.unwrap();
        let s = client_res.unwrap();

        assert_eq!(s[0], RTMP_VERSION);
        let s1 = &s[1..1 + HANDSHAKE_SIZE];
        assert_eq!(&s1[..8], &[0u8; 8]);
        assert_eq!(&s1[RANDOM_OFFSET..], &server_random[..]);

        let s2 = &s[1 + HANDSHAKE_SIZE..];
        assert_eq!(&s2[..4], &7u32.to_be_bytes());
        assert_eq!(&s2[4..8], &[0u8; 4]);
        assert!(s2[RANDOM_OFFSET..]
            .iter()
            .enumerate()
            .all(|(i, b)| *b == (i % 251) as u8));
    }

    #[tokio::test]
    async fn c2_mismatch_is_fatal() {
        let (mut server, mut peer) = duplex(8192);
        let (server_res, _) = tokio::join!(
            Handshake::new().perform(&mut server),
            client(&mut peer, true)
        );
        assert!(matches!(server_res, Err(Error::Handshake(_))));
    }

    #[tokio::test]
    async fn rejects_wrong_version() {
        let (mut server, mut peer) = duplex(8192);
        peer.write_all(&[6]).await.unwrap();
        let res = Handshake::new().perform(&mut server).await;
        assert!(matches!(res, Err(Error::Handshake(_))));
    }

    #[tokio::test]
    async fn short_c1_is_io_error() {
        let (mut server, mut peer) = duplex(8192);
        peer.write_all(&[RTMP_VERSION, 0, 0]).await.unwrap();
        drop(peer);
        let res = Handshake::new().perform(&mut server).await;
        assert!(res.unwrap_err().is_disconnect());
    }
}
