//! Send and receive flows: signaling, negotiation, one transfer.

use std::path::Path;
use std::time::Instant;

use anyhow::Context;
use codedrop_peer::{PeerConnection, PeerLink, RtcPeerConnection, Role, Session};
use codedrop_protocol::constants::{CLOSE_WAIT, DRAIN_TIMEOUT};
use codedrop_protocol::{RoomCode, TransferProgress};
use codedrop_signaling::WsSignalingClient;
use codedrop_transfer::{SpeedCalculator, file_sha256, save_received, sha256_hex};
use tracing::{debug, info, warn};

use crate::config::Config;

pub async fn run_send(cfg: &Config, file: &Path, code: Option<&str>) -> anyhow::Result<()> {
    let checksum = file_sha256(file)
        .await
        .with_context(|| format!("cannot read {}", file.display()))?;

    let code = match code {
        Some(c) => RoomCode::parse(c)?,
        None => RoomCode::generate(),
    };
    println!("Code: {code}");
    println!("Waiting for the receiver to enter it...");

    let (signaling, mut signals) = WsSignalingClient::connect(&cfg.signaling_url)
        .await
        .context("cannot reach signaling server")?;
    let (conn, events) = RtcPeerConnection::new(&cfg.ice_servers).await?;
    let session = Session::new(code, Role::Initiator, cfg.session_timeout());

    let result = async {
        let mut link = session
            .connect(conn, events, &signaling, &mut signals)
            .await?;
        info!(code = %session.code(), role = %session.role(), "peer connected");
        let started = Instant::now();
        let mut progress = ProgressLog::new();
        let sent = session
            .send_file(&mut link, file, |p| progress.update(p))
            .await;
        if sent.is_ok() {
            settle(&mut link).await;
        }
        link.close().await;
        let meta = sent?;
        info!(
            filename = %meta.filename,
            bytes = meta.size,
            sha256 = %checksum,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "file sent"
        );
        anyhow::Ok(())
    }
    .await;

    signaling.close().await;
    result
}

pub async fn run_receive(cfg: &Config, code: &str) -> anyhow::Result<()> {
    let code = RoomCode::parse(code)?;

    let (signaling, mut signals) = WsSignalingClient::connect(&cfg.signaling_url)
        .await
        .context("cannot reach signaling server")?;
    let (conn, events) = RtcPeerConnection::new(&cfg.ice_servers).await?;
    let session = Session::new(code, Role::Responder, cfg.session_timeout());

    let result = async {
        let mut link = session
            .connect(conn, events, &signaling, &mut signals)
            .await?;
        info!(code = %session.code(), role = %session.role(), "peer connected");
        let mut progress = ProgressLog::new();
        let received = session
            .receive_file(&mut link, move |p| progress.update(p))
            .await;
        link.close().await;
        let file = received?;

        let path = save_received(&cfg.output_dir, &file).await?;
        info!(
            filename = %file.metadata.filename,
            mime = file.mime_type(),
            bytes = file.content.len(),
            sha256 = %sha256_hex(&file.content),
            path = %path.display(),
            "file received"
        );
        println!("Saved {}", path.display());
        anyhow::Ok(())
    }
    .await;

    signaling.close().await;
    result
}

/// Lets the last chunks reach the receiver before the sender hangs up.
///
/// The receiver closes the channel once it has every byte, so after the
/// send buffer is empty the sender waits for that close.
async fn settle<P: PeerConnection>(link: &mut PeerLink<P>) {
    if let Err(e) = link.drain(DRAIN_TIMEOUT).await {
        warn!(error = %e, "send buffer did not drain");
        return;
    }
    if !link.wait_closed(CLOSE_WAIT).await {
        debug!("receiver kept the channel open");
    }
}

/// Logs progress at every 10% step, with throughput and ETA.
struct ProgressLog {
    speed: SpeedCalculator,
    next_step: u32,
}

impl ProgressLog {
    fn new() -> Self {
        Self {
            speed: SpeedCalculator::default(),
            next_step: 10,
        }
    }

    fn update(&mut self, p: TransferProgress) {
        self.speed.record(p);

        let percent = p.percent();
        if percent < f64::from(self.next_step) {
            return;
        }
        while f64::from(self.next_step) <= percent {
            self.next_step += 10;
        }

        let eta = self.speed.eta();
        info!(
            percent = percent.round() as u64,
            bytes = p.bytes_transferred,
            total = p.total_bytes,
            kib_per_sec = (self.speed.bytes_per_second() / 1024.0).round() as u64,
            eta_secs = eta.map(|d| d.as_secs()),
            "transfer progress"
        );
    }
}
