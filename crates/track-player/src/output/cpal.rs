//! CPAL-backed output.
//!
//! The stream is built on the thread that runs the message loop, since CPAL streams are not
//! `Send` everywhere. The real-time callback:
//! - pulls filled buffers from a channel without blocking
//! - decodes integer PCM to `f32`, applies volume and basic channel mapping
//! - hands each exhausted buffer back to the message loop for refilling

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender, select};

use super::{AudioBuffer, OutputBackend, OutputCallbacks, OutputDriver, Refill};
use crate::device;
use crate::format::StreamParams;

/// Opens the host's output devices.
pub struct CpalBackend {
    device: Option<String>,
    buffer_bytes: usize,
}

impl CpalBackend {
    /// `device` is a case-insensitive name substring; `None` uses the host default.
    pub fn new(device: Option<String>, buffer_bytes: usize) -> Self {
        Self {
            device,
            buffer_bytes,
        }
    }
}

impl OutputBackend for CpalBackend {
    fn init(&self, params: StreamParams) -> Result<Arc<dyn OutputDriver>> {
        let host = cpal::default_host();
        let device = device::pick_device(&host, self.device.as_deref())?;
        let supported = device::pick_output_config(&device, params.sample_rate, params.channels)?;

        let mut config: cpal::StreamConfig = supported.config();
        let frame_bytes = params.frame_bytes().max(1) as usize;
        let buffer_frames = u32::try_from(self.buffer_bytes / frame_bytes).unwrap_or(u32::MAX);
        if let Some(size) = device::pick_buffer_size(&supported, buffer_frames) {
            config.buffer_size = size;
        }

        let name = device
            .description()
            .map(|d| d.name().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        tracing::info!(
            device = %name,
            rate_hz = config.sample_rate,
            channels = config.channels,
            format = ?supported.sample_format(),
            "output bound"
        );

        Ok(Arc::new(CpalOutput::new(
            name,
            device,
            config,
            supported.sample_format(),
            params,
        )))
    }
}

enum Control {
    Pause,
    Resume,
    Stop,
}

pub struct CpalOutput {
    name: String,
    device: cpal::Device,
    config: cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    params: StreamParams,
    filled_tx: Sender<AudioBuffer>,
    filled_rx: Receiver<AudioBuffer>,
    played_tx: Sender<AudioBuffer>,
    played_rx: Receiver<AudioBuffer>,
    control_tx: Sender<Control>,
    control_rx: Receiver<Control>,
    in_flight: AtomicUsize,
    started: AtomicBool,
    shared: Arc<CallbackShared>,
}

/// State the real-time callback reads or bumps.
struct CallbackShared {
    paused: AtomicBool,
    draining: AtomicBool,
    volume: AtomicU8,
    underrun_events: AtomicU64,
}

impl CpalOutput {
    fn new(
        name: String,
        device: cpal::Device,
        config: cpal::StreamConfig,
        sample_format: cpal::SampleFormat,
        params: StreamParams,
    ) -> Self {
        let (filled_tx, filled_rx) = crossbeam_channel::unbounded();
        let (played_tx, played_rx) = crossbeam_channel::unbounded();
        let (control_tx, control_rx) = crossbeam_channel::unbounded();
        Self {
            name,
            device,
            config,
            sample_format,
            params,
            filled_tx,
            filled_rx,
            played_tx,
            played_rx,
            control_tx,
            control_rx,
            in_flight: AtomicUsize::new(0),
            started: AtomicBool::new(false),
            shared: Arc::new(CallbackShared {
                paused: AtomicBool::new(false),
                draining: AtomicBool::new(false),
                volume: AtomicU8::new(100),
                underrun_events: AtomicU64::new(0),
            }),
        }
    }

    fn build_stream(&self) -> Result<cpal::Stream> {
        match self.sample_format {
            cpal::SampleFormat::F32 => self.build_typed::<f32>(),
            cpal::SampleFormat::I16 => self.build_typed::<i16>(),
            cpal::SampleFormat::I32 => self.build_typed::<i32>(),
            cpal::SampleFormat::U16 => self.build_typed::<u16>(),
            other => Err(anyhow!("Unsupported sample format: {other:?}")),
        }
    }

    fn build_typed<T>(&self) -> Result<cpal::Stream>
    where
        T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32> + Send + 'static,
    {
        let channels_out = usize::from(self.config.channels).max(1);
        let mut st = CallbackState::new(self.params);
        let filled = self.filled_rx.clone();
        let played = self.played_tx.clone();
        let shared = self.shared.clone();
        let silence = <T as cpal::Sample>::from_sample::<f32>(0.0);

        let err_fn = |err| tracing::warn!("stream error: {err}");

        let stream = self.device.build_output_stream(
            &self.config,
            move |data: &mut [T], _| {
                if shared.paused.load(Ordering::Relaxed) {
                    data.fill(silence);
                    return;
                }
                let gain = f32::from(shared.volume.load(Ordering::Relaxed)) / 100.0;

                let frames = data.len() / channels_out;
                for i in 0..frames {
                    let start = i * channels_out;
                    if !st.next_frame(&filled, &played) {
                        if !shared.draining.load(Ordering::Relaxed) {
                            shared.underrun_events.fetch_add(1, Ordering::Relaxed);
                        }
                        data[start..].fill(silence);
                        break;
                    }
                    let frame = &mut data[start..start + channels_out];
                    for (ch, out) in frame.iter_mut().enumerate() {
                        let sample = map_channel(&st.frame, channels_out, ch) * gain;
                        *out = <T as cpal::Sample>::from_sample::<f32>(sample);
                    }
                }
            },
            err_fn,
            None,
        )?;
        Ok(stream)
    }
}

impl OutputDriver for CpalOutput {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn params(&self) -> StreamParams {
        self.params
    }

    fn enqueue(&self, buffer: AudioBuffer) -> Result<()> {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        self.filled_tx
            .send(buffer)
            .map_err(|_| anyhow!("output queue closed"))
    }

    fn start(&self) -> Result<()> {
        self.started.store(true, Ordering::Release);
        Ok(())
    }

    fn pause(&self) -> Result<()> {
        self.shared.paused.store(true, Ordering::Relaxed);
        self.control_tx
            .send(Control::Pause)
            .map_err(|_| anyhow!("output control channel closed"))
    }

    fn resume(&self) -> Result<()> {
        self.shared.paused.store(false, Ordering::Relaxed);
        self.control_tx
            .send(Control::Resume)
            .map_err(|_| anyhow!("output control channel closed"))
    }

    fn stop(&self) -> Result<()> {
        self.control_tx
            .send(Control::Stop)
            .map_err(|_| anyhow!("output control channel closed"))
    }

    fn set_volume(&self, percent: u8) -> Result<()> {
        self.shared
            .volume
            .store(percent.min(100), Ordering::Relaxed);
        Ok(())
    }

    fn run_message_loop(&self, callbacks: &mut dyn OutputCallbacks) -> Result<()> {
        if !self.started.load(Ordering::Acquire) {
            bail!("output not started");
        }
        let stream = self.build_stream()?;
        stream.play().context("start output stream")?;

        let mut end_of_stream = false;
        let mut stopped = false;
        while self.in_flight.load(Ordering::Acquire) > 0 {
            select! {
                recv(self.played_rx) -> msg => {
                    let Ok(buffer) = msg else { break };
                    self.in_flight.fetch_sub(1, Ordering::AcqRel);
                    if end_of_stream {
                        continue;
                    }
                    if callbacks.on_dequeue(buffer) == Refill::EndOfStream {
                        end_of_stream = true;
                        self.shared.draining.store(true, Ordering::Relaxed);
                    }
                }
                recv(self.control_rx) -> msg => match msg {
                    Ok(Control::Pause) => {
                        if let Err(e) = stream.pause() {
                            tracing::warn!(error = %e, "stream pause failed");
                        }
                    }
                    Ok(Control::Resume) => {
                        if let Err(e) = stream.play() {
                            tracing::warn!(error = %e, "stream resume failed");
                        }
                    }
                    Ok(Control::Stop) | Err(_) => {
                        stopped = true;
                        break;
                    }
                },
            }
        }

        if !stopped {
            // Let the device play out its last period.
            thread::sleep(Duration::from_millis(100));
        }
        drop(stream);
        if !stopped {
            callbacks.on_complete();
        }
        Ok(())
    }

    fn underrun_events(&self) -> u64 {
        self.shared.underrun_events.load(Ordering::Relaxed)
    }
}

/// Read cursor over the buffer currently being played.
struct CallbackState {
    current: Option<AudioBuffer>,
    pos: usize,
    bits_per_sample: u16,
    frame_bytes: usize,
    frame: Vec<f32>,
}

impl CallbackState {
    fn new(params: StreamParams) -> Self {
        let channels = usize::from(params.channels).max(1);
        Self {
            current: None,
            pos: 0,
            bits_per_sample: params.bits_per_sample,
            frame_bytes: params.frame_bytes().max(1) as usize,
            frame: vec![0.0; channels],
        }
    }

    /// Decode the next source frame into `self.frame`; `false` when nothing is queued.
    fn next_frame(&mut self, filled: &Receiver<AudioBuffer>, played: &Sender<AudioBuffer>) -> bool {
        loop {
            if let Some(buf) = &self.current {
                if self.pos + self.frame_bytes <= buf.valid() {
                    let bytes = &buf.bytes()[self.pos..self.pos + self.frame_bytes];
                    decode_frame(bytes, self.bits_per_sample, &mut self.frame);
                    self.pos += self.frame_bytes;
                    return true;
                }
            }
            if let Some(done) = self.current.take() {
                let _ = played.send(done);
            }
            match filled.try_recv() {
                Ok(next) => {
                    self.current = Some(next);
                    self.pos = 0;
                }
                Err(_) => return false,
            }
        }
    }
}

/// Decode one interleaved little-endian integer PCM frame to `f32`.
fn decode_frame(bytes: &[u8], bits_per_sample: u16, out: &mut [f32]) {
    let width = usize::from(bits_per_sample / 8).max(1);
    for (sample, out) in bytes.chunks_exact(width).zip(out.iter_mut()) {
        *out = match bits_per_sample {
            8 => (f32::from(sample[0]) - 128.0) / 128.0,
            16 => f32::from(i16::from_le_bytes([sample[0], sample[1]])) / 32_768.0,
            24 => {
                let v = i32::from_le_bytes([0, sample[0], sample[1], sample[2]]) >> 8;
                v as f32 / 8_388_608.0
            }
            32 => {
                i32::from_le_bytes([sample[0], sample[1], sample[2], sample[3]]) as f32
                    / 2_147_483_648.0
            }
            _ => 0.0,
        };
    }
}

/// Output sample for `dst_ch` of a `dst_channels` frame.
///
/// Mono is duplicated, stereo folds to mono by averaging, other layouts clamp to the last
/// available source channel.
fn map_channel(src: &[f32], dst_channels: usize, dst_ch: usize) -> f32 {
    let get = |ch: usize| src.get(ch).copied().unwrap_or(0.0);
    match (src.len(), dst_channels) {
        (1, _) => get(0),
        (2, 1) => 0.5 * (get(0) + get(1)),
        (n, _) => get(dst_ch.min(n.saturating_sub(1))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_supported_bit_depths() {
        let mut out = [0.0f32; 1];
        decode_frame(&[0x80], 8, &mut out);
        assert_eq!(out[0], 0.0);
        decode_frame(&[0x00, 0x80], 16, &mut out);
        assert_eq!(out[0], -1.0);
        decode_frame(&[0x00, 0x00, 0xc0], 24, &mut out);
        assert_eq!(out[0], -0.5);
        decode_frame(&0x4000_0000i32.to_le_bytes(), 32, &mut out);
        assert_eq!(out[0], 0.5);
    }

    #[test]
    fn channel_mapping() {
        assert_eq!(map_channel(&[0.25], 2, 1), 0.25);
        assert_eq!(map_channel(&[0.2, 0.4], 1, 0), 0.5 * (0.2 + 0.4));
        assert_eq!(map_channel(&[0.1, 0.2], 2, 1), 0.2);
        assert_eq!(map_channel(&[0.1, 0.2], 6, 4), 0.2);
    }

    #[test]
    fn callback_cursor_returns_played_buffers() {
        let params = StreamParams {
            sample_rate: 8_000,
            channels: 1,
            bits_per_sample: 16,
        };
        let (filled_tx, filled_rx) = crossbeam_channel::unbounded();
        let (played_tx, played_rx) = crossbeam_channel::unbounded();
        let mut buf = AudioBuffer::new(4);
        buf.storage_mut().copy_from_slice(&[0x00, 0x40, 0x00, 0xc0]);
        buf.set_valid(4);
        filled_tx.send(buf).unwrap();

        let mut st = CallbackState::new(params);
        assert!(st.next_frame(&filled_rx, &played_tx));
        assert_eq!(st.frame[0], 0.5);
        assert!(st.next_frame(&filled_rx, &played_tx));
        assert_eq!(st.frame[0], -0.5);
        assert!(played_rx.is_empty());
        assert!(!st.next_frame(&filled_rx, &played_tx));
        assert_eq!(played_rx.len(), 1);
    }
}
