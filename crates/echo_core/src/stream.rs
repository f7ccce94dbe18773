//! Audio Stream Management
//!
//! The [`AudioDriver`] trait is the hardware seam of the graph: it reports
//! the capture device's native format and runs a processor chain between a
//! capture stream and an output stream.
//!
//! # Audio Flow
//!
//! ```text
//! Microphone ──▶ capture callback ──▶ ProcessorChain (EQ, mix, tap)
//!                                          │ rtrb SPSC ring
//!                                          ▼
//!                                   output callback ──▶ Headphones
//! ```
//!
//! cpal streams are not `Send` on every platform, so `CpalDriver` builds and
//! holds them on a dedicated `echo-audio` thread and only talks to it over
//! channels.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig as CpalStreamConfig};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use echo_dsp::ProcessorChain;
use rtrb::{Consumer, Producer, RingBuffer};
use tracing::{debug, error, info, warn};

use crate::config::StreamConfig;
use crate::error::{EngineError, EngineResult};

/// How long `start` waits for the audio thread to open the streams
const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// Hardware seam between the graph and the audio devices
pub trait AudioDriver: Send {
    /// Name of this driver (for logging)
    fn name(&self) -> &'static str;

    /// Native format of the capture device
    fn capture_format(&mut self) -> EngineResult<StreamConfig>;

    /// Open capture and output and run `chain` on every captured buffer
    ///
    /// The chain is owned by the driver until `stop`.
    fn start(&mut self, config: &StreamConfig, chain: ProcessorChain) -> EngineResult<()>;

    /// Halt both streams and drop the chain. Idempotent.
    fn stop(&mut self);

    fn is_running(&self) -> bool;
}

/// Counters written from the audio callbacks
///
/// Rust pattern: the callbacks never log, they bump these instead
#[derive(Debug, Default)]
pub struct StreamStats {
    callbacks: AtomicU64,
    overflows: AtomicU64,
    underruns: AtomicU64,
    errors: AtomicU64,
}

impl StreamStats {
    pub fn callbacks(&self) -> u64 {
        self.callbacks.load(Ordering::Relaxed)
    }

    /// Capture buffers that did not fully fit in the ring
    pub fn overflows(&self) -> u64 {
        self.overflows.load(Ordering::Relaxed)
    }

    /// Output buffers padded with silence
    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }
}

/// Default-device driver using cpal
pub struct CpalDriver {
    preferred: StreamConfig,
    ring_buffers: usize,
    stats: Arc<StreamStats>,
    stop_tx: Option<Sender<()>>,
    audio_thread: Option<JoinHandle<()>>,
}

impl CpalDriver {
    /// `preferred.buffer_size` is requested from the devices; rate and
    /// channel count come from the capture device
    pub fn new(preferred: StreamConfig, ring_buffers: usize) -> Self {
        Self {
            preferred,
            ring_buffers: ring_buffers.max(2),
            stats: Arc::new(StreamStats::default()),
            stop_tx: None,
            audio_thread: None,
        }
    }

    pub fn stats(&self) -> &Arc<StreamStats> {
        &self.stats
    }
}

impl AudioDriver for CpalDriver {
    fn name(&self) -> &'static str {
        "cpal"
    }

    fn capture_format(&mut self) -> EngineResult<StreamConfig> {
        let device = cpal::default_host()
            .default_input_device()
            .ok_or(EngineError::NoDevicesFound)?;
        let native = device
            .default_input_config()
            .map_err(|e| EngineError::ConfigError(e.to_string()))?;

        Ok(StreamConfig {
            sample_rate: native.sample_rate().0,
            channels: native.channels().min(echo_dsp::MAX_CHANNELS as u16),
            buffer_size: self.preferred.buffer_size,
        })
    }

    fn start(&mut self, config: &StreamConfig, chain: ProcessorChain) -> EngineResult<()> {
        if self.is_running() {
            return Ok(());
        }
        config.validate().map_err(EngineError::ConfigError)?;

        let (ready_tx, ready_rx) = bounded::<EngineResult<()>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let config = *config;
        let ring_buffers = self.ring_buffers;
        let stats = Arc::clone(&self.stats);

        let handle = thread::Builder::new()
            .name("echo-audio".into())
            .spawn(move || run_audio_thread(config, ring_buffers, chain, stats, ready_tx, stop_rx))
            .map_err(|e| EngineError::WorkerSpawn(e.to_string()))?;

        let opened = match ready_rx.recv_timeout(OPEN_TIMEOUT) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                Err(EngineError::StreamPlayError("timed out opening audio devices".into()))
            }
            Err(RecvTimeoutError::Disconnected) => {
                Err(EngineError::StreamBuildError("audio thread exited".into()))
            }
        };

        self.stop_tx = Some(stop_tx);
        self.audio_thread = Some(handle);
        if let Err(e) = opened {
            self.stop();
            return Err(e);
        }
        Ok(())
    }

    fn stop(&mut self) {
        // Dropping the sender releases the audio thread
        self.stop_tx.take();
        if let Some(handle) = self.audio_thread.take() {
            if handle.join().is_err() {
                error!("Audio thread panicked");
            }
            info!(
                "Audio streams closed ({} callbacks, {} overflows, {} underruns, {} errors)",
                self.stats.callbacks(),
                self.stats.overflows(),
                self.stats.underruns(),
                self.stats.errors()
            );
        }
    }

    fn is_running(&self) -> bool {
        self.audio_thread.is_some()
    }
}

impl Drop for CpalDriver {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Audio thread body: open, report, then hold the streams until told to stop
fn run_audio_thread(
    config: StreamConfig,
    ring_buffers: usize,
    chain: ProcessorChain,
    stats: Arc<StreamStats>,
    ready: Sender<EngineResult<()>>,
    stop: Receiver<()>,
) {
    let streams = match open_streams(&config, ring_buffers, chain, stats) {
        Ok(streams) => {
            let _ = ready.send(Ok(()));
            streams
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    // Blocks until stop() drops the sender
    let _ = stop.recv();
    drop(streams);
    debug!("Audio thread exiting");
}

fn open_streams(
    config: &StreamConfig,
    ring_buffers: usize,
    chain: ProcessorChain,
    stats: Arc<StreamStats>,
) -> EngineResult<(Stream, Stream)> {
    let host = cpal::default_host();
    let input = host
        .default_input_device()
        .ok_or(EngineError::NoDevicesFound)?;
    let output = host
        .default_output_device()
        .ok_or(EngineError::NoDevicesFound)?;

    let output_channels = output
        .default_output_config()
        .map(|c| c.channels())
        .unwrap_or(2)
        .max(1);

    info!(
        "Opening capture '{}' ({} Hz, {} ch) -> output '{}' ({} ch)",
        input.name().unwrap_or_default(),
        config.sample_rate,
        config.channels,
        output.name().unwrap_or_default(),
        output_channels
    );

    let capture_config = CpalStreamConfig {
        channels: config.channels,
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Fixed(config.buffer_size),
    };
    let output_config = CpalStreamConfig {
        channels: output_channels,
        ..capture_config.clone()
    };

    // Ring holds output-channel samples
    let ring_size = config.buffer_size as usize * output_channels as usize * ring_buffers;
    let (producer, consumer) = RingBuffer::<f32>::new(ring_size);

    let capture = build_capture_stream(
        &input,
        &capture_config,
        output_channels as usize,
        chain,
        producer,
        Arc::clone(&stats),
    )?;
    let playback = build_output_stream(&output, &output_config, consumer, stats)?;

    playback
        .play()
        .map_err(|e| EngineError::StreamPlayError(e.to_string()))?;
    capture
        .play()
        .map_err(|e| EngineError::StreamPlayError(e.to_string()))?;

    Ok((capture, playback))
}

fn build_capture_stream(
    device: &Device,
    config: &CpalStreamConfig,
    output_channels: usize,
    mut chain: ProcessorChain,
    mut producer: Producer<f32>,
    stats: Arc<StreamStats>,
) -> EngineResult<Stream> {
    let in_channels = config.channels as usize;
    // Preallocated; cpal may deliver more than the requested buffer, so the
    // callback works through the data in scratch-sized slices
    let mut scratch = vec![0.0_f32; chain.context().buffer_size.max(1) * in_channels];
    let err_stats = Arc::clone(&stats);

    device
        .build_input_stream(
            config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                // Real-time audio callback - NO allocations allowed here
                stats.callbacks.fetch_add(1, Ordering::Relaxed);

                for block in data.chunks(scratch.len()) {
                    let work = &mut scratch[..block.len()];
                    work.copy_from_slice(block);
                    chain.process(work);

                    let frames = work.len() / in_channels;
                    let wanted = frames * output_channels;
                    let room = producer.slots().min(wanted);

                    // Channels wrap around: mono fans out, stereo to mono keeps left
                    let mapped = work
                        .chunks_exact(in_channels)
                        .flat_map(|frame| (0..output_channels).map(move |ch| frame[ch % in_channels]));

                    let written = match producer.write_chunk_uninit(room) {
                        Ok(chunk) => chunk.fill_from_iter(mapped),
                        Err(_) => 0,
                    };
                    if written < wanted {
                        stats.overflows.fetch_add(1, Ordering::Relaxed);
                    }
                }
            },
            move |err| {
                err_stats.errors.fetch_add(1, Ordering::Relaxed);
                warn!("Capture stream error: {}", err);
            },
            None,
        )
        .map_err(|e| EngineError::StreamBuildError(e.to_string()))
}

fn build_output_stream(
    device: &Device,
    config: &CpalStreamConfig,
    mut consumer: Consumer<f32>,
    stats: Arc<StreamStats>,
) -> EngineResult<Stream> {
    let err_stats = Arc::clone(&stats);

    device
        .build_output_stream(
            config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                // Real-time audio callback - NO allocations allowed here
                let to_read = data.len().min(consumer.slots());

                if to_read < data.len() {
                    // Underrun - pad with silence
                    data[to_read..].fill(0.0);
                    stats.underruns.fetch_add(1, Ordering::Relaxed);
                }

                if let Ok(chunk) = consumer.read_chunk(to_read) {
                    let (first, second) = chunk.as_slices();
                    data[..first.len()].copy_from_slice(first);
                    data[first.len()..first.len() + second.len()].copy_from_slice(second);
                    chunk.commit_all();
                }
            },
            move |err| {
                err_stats.errors.fetch_add(1, Ordering::Relaxed);
                warn!("Output stream error: {}", err);
            },
            None,
        )
        .map_err(|e| EngineError::StreamBuildError(e.to_string()))
}
