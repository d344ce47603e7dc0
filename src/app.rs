use std::net::SocketAddr;

use anyhow::{Context, Result};

use crate::{
    config::Config,
    pipeline::{PacketMonitor, RunReport, transport::ReceivedPacket},
    types::LandmarkSet,
};

/// Opens every resource the pipeline needs, runs it to completion and
/// releases everything before returning.
#[cfg(feature = "camera-nokhwa")]
pub fn run(config: &Config) -> Result<RunReport> {
    use std::time::Duration;

    use crate::pipeline::{
        Encoder, Normalizer, OrtDetector, OverlayPreview, Pipeline, SnapshotWriter, StdinQuit,
        UdpTransport, camera::CameraSource,
    };

    let detector = OrtDetector::load(&config.detector).context("failed to load landmark models")?;
    if detector.modalities().is_empty() {
        anyhow::bail!("every detector modality is disabled; enable at least one in [detector]");
    }

    let destination = config.transport.destination()?;
    let transport = UdpTransport::open(destination)
        .with_context(|| format!("failed to open UDP socket for {destination}"))?;
    let source = CameraSource::open(&config.camera)
        .with_context(|| format!("failed to open camera {}", config.camera.index))?;

    let mut pipeline = Pipeline::new(
        source,
        detector,
        transport,
        Normalizer::new(&config.normalizer),
        Encoder::new(config.encoder.policy),
    )
    .with_frame_limit(config.pipeline.max_frames);

    if config.pipeline.quit_on_stdin {
        pipeline = pipeline.with_quit_signal(Box::new(StdinQuit::spawn()));
    }

    let mut snapshots = None;
    if let Some(path) = config.preview.snapshot_path.clone() {
        let (preview, rx) = OverlayPreview::new();
        pipeline = pipeline.with_renderer(Box::new(preview));
        log::info!("writing preview snapshots to {}", path.display());
        snapshots = Some(SnapshotWriter::spawn(
            path,
            Duration::from_millis(config.preview.snapshot_interval_ms),
            rx,
        ));
    }

    let report = pipeline.run();
    // The renderer went away with the pipeline, so the writer drains and exits.
    drop(snapshots);
    Ok(report)
}

#[cfg(not(feature = "camera-nokhwa"))]
pub fn run(_config: &Config) -> Result<RunReport> {
    anyhow::bail!("built without camera support; rebuild with the `camera-nokhwa` feature")
}

#[cfg(feature = "camera-nokhwa")]
pub fn list_cameras() -> Result<()> {
    let cameras =
        crate::pipeline::camera::available_cameras().context("failed to enumerate cameras")?;
    if cameras.is_empty() {
        println!("no cameras found");
    }
    for camera in cameras {
        println!("{}: {}", camera.index, camera.label);
    }
    Ok(())
}

#[cfg(not(feature = "camera-nokhwa"))]
pub fn list_cameras() -> Result<()> {
    anyhow::bail!("built without camera support; rebuild with the `camera-nokhwa` feature")
}

/// Receives datagrams on `addr` and logs what a consumer would decode.
/// Runs until the process is interrupted.
pub fn monitor(addr: SocketAddr) -> Result<()> {
    let mut monitor =
        PacketMonitor::bind(addr).with_context(|| format!("failed to bind monitor on {addr}"))?;
    log::info!("listening for landmark packets on {}", monitor.local_addr()?);

    loop {
        match monitor.recv() {
            Ok(Some(received)) => log::info!("{}", describe(&received)),
            Ok(None) => {}
            Err(err) => log::warn!("discarding datagram: {err:#}"),
        }
    }
}

fn describe(received: &ReceivedPacket) -> String {
    let sets: Vec<String> = received
        .packet
        .sets()
        .iter()
        .map(|set| match set {
            LandmarkSet::Hand {
                handedness: Some(handedness),
                ..
            } => format!("hand({})", handedness.label()),
            other => other.modality().to_string(),
        })
        .collect();
    format!(
        "{} bytes from {}: {} landmarks [{}]",
        received.bytes,
        received.source,
        received.packet.landmark_count(),
        sets.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        pipeline::{
            BatchPolicy, Encoder,
            encoder::tests::{hand_set, pose_set},
        },
        types::Handedness,
    };

    #[test]
    fn describes_packet_contents() {
        let packet = Encoder::new(BatchPolicy::Aggregate)
            .encode(vec![
                pose_set(),
                hand_set(Some(Handedness::Left)),
                hand_set(None),
            ])
            .remove(0);
        let received = ReceivedPacket {
            source: "127.0.0.1:40000".parse().unwrap(),
            bytes: 1234,
            packet,
        };

        assert_eq!(
            describe(&received),
            "1234 bytes from 127.0.0.1:40000: 75 landmarks [pose, hand(Left), hand]"
        );
    }
}
