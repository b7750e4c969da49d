use rodio::{Decoder, OutputStream, Sink, Source};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::{Playback, PlaybackEvent};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Plays reply audio on the default output device
///
/// The rodio output stream is not `Send`, so each reply is played from its
/// own thread which owns the stream for the duration of the clip.
#[derive(Default)]
pub struct RodioPlayback {
    current: Option<Arc<AtomicBool>>,
}

impl RodioPlayback {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Playback for RodioPlayback {
    fn play(&mut self, audio: Vec<u8>) -> mpsc::UnboundedReceiver<PlaybackEvent> {
        self.stop();

        let (tx, rx) = mpsc::unbounded_channel();
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);

        let spawned = std::thread::Builder::new()
            .name("playback".to_string())
            .spawn(move || {
                if let Err(message) = play_blocking(audio, &flag, &tx) {
                    error!("Playback failed: {}", message);
                    if !flag.load(Ordering::SeqCst) {
                        let _ = tx.send(PlaybackEvent::Error(message));
                    }
                }
            });

        match spawned {
            Ok(_) => self.current = Some(cancelled),
            Err(e) => {
                let (tx, rx) = mpsc::unbounded_channel();
                let _ = tx.send(PlaybackEvent::Error(format!(
                    "failed to spawn playback thread: {}",
                    e
                )));
                return rx;
            }
        }

        rx
    }

    fn stop(&mut self) {
        if let Some(cancelled) = self.current.take() {
            cancelled.store(true, Ordering::SeqCst);
            debug!("Playback stop requested");
        }
    }
}

impl Drop for RodioPlayback {
    fn drop(&mut self) {
        self.stop();
    }
}

fn play_blocking(
    audio: Vec<u8>,
    cancelled: &AtomicBool,
    tx: &mpsc::UnboundedSender<PlaybackEvent>,
) -> Result<(), String> {
    let (_stream, handle) = OutputStream::try_default().map_err(|e| e.to_string())?;
    let sink = Sink::try_new(&handle).map_err(|e| e.to_string())?;
    let source = Decoder::new(Cursor::new(audio)).map_err(|e| format!("decode failed: {}", e))?;

    sink.append(source.convert_samples::<f32>());
    let _ = tx.send(PlaybackEvent::Started);
    info!("Playback started");

    while !sink.empty() {
        if cancelled.load(Ordering::SeqCst) {
            sink.stop();
            info!("Playback stopped");
            return Ok(());
        }
        std::thread::sleep(POLL_INTERVAL);
    }

    if !cancelled.load(Ordering::SeqCst) {
        let _ = tx.send(PlaybackEvent::Ended);
        info!("Playback finished");
    }
    Ok(())
}
