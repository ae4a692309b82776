//! Client-side orchestration: owns the datagram socket, the per-stream
//! decode ingress, the frame cache, and the control-channel writer for
//! input/resize/keyframe-request messages. Graceful shutdown is signaled
//! with a `tokio::sync::watch` channel, the same pattern the host's capture
//! session uses.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{debug, warn};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::{watch, Mutex as AsyncMutex};

use rdp_wire::{ControlMessage, FrameHeader, HEADER_SIZE};

use crate::frame_cache::{ContentRect, FrameCache};
use crate::reassembly::DecodeIngress;

#[cfg(feature = "decode")]
use rdp_codec::DecodeSession;

pub struct ClientSessionConfig {
    pub host_datagram_addr: SocketAddr,
    pub host_control_addr: SocketAddr,
    pub max_datagram_len: usize,
}

pub struct ClientSession {
    frame_cache: Arc<FrameCache>,
    ingress: DecodeIngress,
    #[cfg(feature = "decode")]
    decode: Option<DecodeSession>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    config: ClientSessionConfig,
}

impl ClientSession {
    pub fn new(config: ClientSessionConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            frame_cache: Arc::new(FrameCache::new()),
            ingress: DecodeIngress::new(),
            #[cfg(feature = "decode")]
            decode: None,
            shutdown_tx,
            shutdown_rx,
            config,
        }
    }

    pub fn frame_cache(&self) -> Arc<FrameCache> {
        self.frame_cache.clone()
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Receives datagrams until shutdown, feeding completed frames to the
    /// decoder and the frame cache.
    pub async fn run_datagram_loop(&mut self) -> Result<()> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .context("binding client datagram socket")?;
        socket
            .connect(self.config.host_datagram_addr)
            .await
            .context("connecting client datagram socket")?;

        let mut buf = vec![0u8; self.config.max_datagram_len];
        loop {
            if *self.shutdown_rx.borrow() {
                return Ok(());
            }
            tokio::select! {
                _ = self.shutdown_rx.changed() => return Ok(()),
                result = socket.recv(&mut buf) => {
                    let len = result.context("receiving datagram")?;
                    self.handle_datagram(&buf[..len]);
                }
            }
        }
    }

    fn handle_datagram(&mut self, datagram: &[u8]) {
        if datagram.len() < HEADER_SIZE {
            return;
        }
        let header = match FrameHeader::deserialize(datagram, self.config.max_datagram_len) {
            Ok(h) => h,
            Err(e) => {
                warn!("dropping malformed datagram: {e}");
                return;
            }
        };
        let payload = datagram[HEADER_SIZE..HEADER_SIZE + header.payload_length as usize].to_vec();

        match self.ingress.insert(&header, payload) {
            Ok(Some(frame)) => self.deliver_completed_frame(frame),
            Ok(None) => {}
            Err(e) => warn!("reassembly rejected fragment: {e}"),
        }
    }

    #[cfg(feature = "decode")]
    fn deliver_completed_frame(&mut self, frame: crate::reassembly::CompletedFrame) {
        let decode = match &mut self.decode {
            Some(d) => d,
            None => {
                debug!("dropping frame for stream {}: decoder not configured", frame.stream_id);
                return;
            }
        };
        if let Err(e) = decode.push_encoded_frame(&frame.payload, frame.timestamp, frame.is_keyframe) {
            warn!("decoder rejected frame: {e:#}");
        }
    }

    #[cfg(not(feature = "decode"))]
    fn deliver_completed_frame(&mut self, frame: crate::reassembly::CompletedFrame) {
        let _ = frame;
    }

    /// Writes one control message over the reliable stream.
    pub async fn send_control_message(
        stream: &AsyncMutex<TcpStream>,
        message: &ControlMessage,
    ) -> Result<()> {
        use tokio::io::AsyncWriteExt;
        let bytes = message.encode_envelope()?;
        let mut guard = stream.lock().await;
        guard.write_all(&bytes).await.context("writing control message")?;
        Ok(())
    }

    pub fn record_decoded_frame(&self, stream_id: u32, data: Vec<u8>, content_rect: ContentRect) {
        self.frame_cache.update(stream_id, data, content_rect);
    }
}
