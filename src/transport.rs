//! # Transport
//!
//! Concrete network bindings for the wire formats `rdp-wire` defines: the
//! unreliable datagram side over `tokio::net::UdpSocket` and the reliable
//! control channel over `tokio::net::TcpStream` with the envelope codec's
//! length-prefixed framing.

use std::net::SocketAddr;
use std::sync::Arc;

use log::{debug, warn};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::Mutex as AsyncMutex;

use rdp_wire::{ControlMessage, Fragment, Fragmenter, StreamContext};

use crate::error::{PipelineError, PipelineResult};
use crate::metrics::PipelineMetrics;

/// Sends fragmented encoded frames to the client over UDP, best-effort.
pub struct DatagramTransport {
    socket: UdpSocket,
    destination: SocketAddr,
    metrics: Arc<PipelineMetrics>,
}

impl DatagramTransport {
    pub async fn bind(destination: SocketAddr, metrics: Arc<PipelineMetrics>) -> PipelineResult<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| PipelineError::io("binding datagram socket", e))?;
        Ok(Self {
            socket,
            destination,
            metrics,
        })
    }

    /// Fragments `payload` and sends each fragment as a best-effort
    /// datagram. A send failure on one fragment is logged and counted but
    /// does not abort the remaining fragments.
    pub async fn send_frame(
        &self,
        ctx: &mut StreamContext,
        payload: &[u8],
        mtu: usize,
        timestamp_ns: u64,
        is_keyframe: bool,
        parameter_set_len: usize,
    ) -> PipelineResult<()> {
        let fragments: Vec<Fragment> = Fragmenter::fragment(
            ctx,
            payload,
            mtu,
            timestamp_ns,
            is_keyframe,
            parameter_set_len,
        )
        .map_err(PipelineError::from)?;

        for fragment in fragments {
            let datagram = fragment.to_datagram();
            match self.socket.send_to(&datagram, self.destination).await {
                Ok(_) => {
                    self.metrics
                        .datagrams_sent
                        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                }
                Err(e) => {
                    self.metrics
                        .datagrams_send_failed
                        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    debug!("datagram send failed, continuing: {e}");
                }
            }
        }
        Ok(())
    }
}

/// Reliable control channel: length-prefixed `ControlMessage` envelopes
/// over a TCP stream, buffered so a message spanning multiple reads is
/// reassembled before decoding.
pub struct ControlChannel {
    stream: AsyncMutex<TcpStream>,
    read_buffer: AsyncMutex<Vec<u8>>,
}

impl ControlChannel {
    pub async fn connect(addr: SocketAddr) -> PipelineResult<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| PipelineError::io("connecting control channel", e))?;
        Ok(Self::from_stream(stream))
    }

    pub fn from_stream(stream: TcpStream) -> Self {
        Self {
            stream: AsyncMutex::new(stream),
            read_buffer: AsyncMutex::new(Vec::new()),
        }
    }

    pub async fn send(&self, message: &ControlMessage) -> PipelineResult<()> {
        let bytes = message
            .encode_envelope()
            .map_err(|e| PipelineError::transport("encoding control message").with_context(e.to_string()))?;
        let mut guard = self.stream.lock().await;
        guard
            .write_all(&bytes)
            .await
            .map_err(|e| PipelineError::transport_with_source("sending control message", "control", e))?;
        Ok(())
    }

    /// Reads from the socket until at least one complete envelope is
    /// buffered, then returns it. A disconnected peer surfaces as a
    /// `Transport` error so the caller can end the session.
    pub async fn recv(&self) -> PipelineResult<ControlMessage> {
        use tokio::io::AsyncReadExt;

        loop {
            {
                let mut buffer = self.read_buffer.lock().await;
                if let Some((message, consumed)) = ControlMessage::decode_envelope(&buffer)
                    .map_err(|e| PipelineError::protocol(e.to_string()))?
                {
                    buffer.drain(0..consumed);
                    return Ok(message);
                }
            }

            let mut chunk = [0u8; 4096];
            let mut stream = self.stream.lock().await;
            let n = stream
                .read(&mut chunk)
                .await
                .map_err(|e| PipelineError::transport_with_source("reading control channel", "control", e))?;
            if n == 0 {
                return Err(PipelineError::transport("control channel disconnected")
                    .with_recovery_suggestion("end the session; the control channel does not auto-reconnect"));
            }
            drop(stream);
            self.read_buffer.lock().await.extend_from_slice(&chunk[..n]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, UdpSocket as TokioUdpSocket};

    #[tokio::test]
    async fn datagram_transport_sends_every_fragment_best_effort() {
        let receiver = TokioUdpSocket::bind("127.0.0.1:0").await.unwrap();
        let receiver_addr = receiver.local_addr().unwrap();
        let metrics = Arc::new(PipelineMetrics::new());
        let transport = DatagramTransport::bind(receiver_addr, metrics.clone())
            .await
            .unwrap();

        let mut ctx = StreamContext::new(1);
        let payload = vec![9u8; 2600];
        transport
            .send_frame(&mut ctx, &payload, 1240, 1_000, false, 0)
            .await
            .unwrap();

        let mut buf = [0u8; 2000];
        let mut received = 0;
        for _ in 0..3 {
            let (n, _) = receiver.recv_from(&mut buf).await.unwrap();
            assert!(n > 0);
            received += 1;
        }
        assert_eq!(received, 3);
        assert_eq!(
            metrics
                .datagrams_sent
                .load(std::sync::atomic::Ordering::Relaxed),
            3
        );
    }

    #[tokio::test]
    async fn control_channel_round_trips_a_keyframe_request() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server_task = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let channel = ControlChannel::from_stream(socket);
            channel.recv().await.unwrap()
        });

        let client = ControlChannel::connect(addr).await.unwrap();
        let message = ControlMessage::KeyframeRequest(rdp_wire::KeyframeRequest { stream_id: 7 });
        client.send(&message).await.unwrap();

        let received = server_task.await.unwrap();
        match received {
            ControlMessage::KeyframeRequest(req) => assert_eq!(req.stream_id, 7),
            other => panic!("unexpected message: {other:?}"),
        }
    }
}
