//! Loopback capture of a render endpoint's mix.
//!
//! The stream is opened in shared mode with `AUDCLNT_STREAMFLAGS_LOOPBACK`
//! and polled from the render thread; it never blocks. Samples arrive as
//! 32-bit PCM at the endpoint's mix rate, converted by the audio engine to
//! the requested channel count.

use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::{CoTaskMemFree, CLSCTX_ALL};

use asio_fanout_core::models::error::DriverError;
use asio_fanout_core::processing::sample_format::WireFormat;
use asio_fanout_core::traits::audio_backend::{CapturePacket, CaptureStream};

use crate::error::{ResultExt, WasapiError};
use crate::wave_format::extensible;

/// One second in 100 ns units.
const REFTIMES_PER_SEC: i64 = 10_000_000;

pub struct WasapiLoopback {
    device: String,
    client: IAudioClient,
    capture: IAudioCaptureClient,
    sample_rate: u32,
    channels: u16,
    buffer_frames: u32,
    running: bool,
}

// SAFETY: created in the MTA, then only touched by the render thread.
unsafe impl Send for WasapiLoopback {}

impl WasapiLoopback {
    pub fn open(device_id: &str, device: &IMMDevice, channels: u16) -> Result<Self, WasapiError> {
        unsafe {
            let client: IAudioClient = device
                .Activate(CLSCTX_ALL, None)
                .activation(device_id, "IMMDevice::Activate")?;

            let mix_format_ptr = client.GetMixFormat().activation(device_id, "GetMixFormat")?;
            let sample_rate = (*mix_format_ptr).nSamplesPerSec;
            CoTaskMemFree(Some(mix_format_ptr as *const _));

            let wave = extensible(WireFormat::Int32, sample_rate, channels);
            client
                .Initialize(
                    AUDCLNT_SHAREMODE_SHARED,
                    AUDCLNT_STREAMFLAGS_LOOPBACK
                        | AUDCLNT_STREAMFLAGS_AUTOCONVERTPCM
                        | AUDCLNT_STREAMFLAGS_SRC_DEFAULT_QUALITY,
                    REFTIMES_PER_SEC,
                    0,
                    &wave.Format,
                    None,
                )
                .activation(device_id, "IAudioClient::Initialize (loopback)")?;

            let buffer_frames = client.GetBufferSize().activation(device_id, "GetBufferSize")?;
            let capture: IAudioCaptureClient =
                client.GetService().activation(device_id, "GetService(capture)")?;

            log::info!(
                "{}: loopback capture at {} Hz x{}, buffer {} frames",
                device_id,
                sample_rate,
                channels,
                buffer_frames
            );

            Ok(Self {
                device: device_id.to_string(),
                client,
                capture,
                sample_rate,
                channels,
                buffer_frames,
                running: false,
            })
        }
    }
}

impl CaptureStream for WasapiLoopback {
    fn native_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn buffer_frames(&self) -> usize {
        self.buffer_frames as usize
    }

    fn start(&mut self) -> Result<(), DriverError> {
        if !self.running {
            unsafe { self.client.Start() }.stream(&self.device, "IAudioClient::Start (loopback)")?;
            self.running = true;
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DriverError> {
        if self.running {
            self.running = false;
            unsafe { self.client.Stop() }.stream(&self.device, "IAudioClient::Stop (loopback)")?;
        }
        Ok(())
    }

    fn read_packets(
        &mut self,
        sink: &mut dyn FnMut(CapturePacket<'_>),
    ) -> Result<usize, DriverError> {
        let mut delivered = 0;
        unsafe {
            let mut packet_length = self
                .capture
                .GetNextPacketSize()
                .stream(&self.device, "GetNextPacketSize")?;

            while packet_length > 0 {
                let mut buffer_ptr: *mut u8 = std::ptr::null_mut();
                let mut num_frames: u32 = 0;
                let mut flags: u32 = 0;

                self.capture
                    .GetBuffer(&mut buffer_ptr, &mut num_frames, &mut flags, None, None)
                    .stream(&self.device, "IAudioCaptureClient::GetBuffer")?;

                if num_frames > 0 {
                    let silent =
                        flags & (AUDCLNT_BUFFERFLAGS_SILENT.0 as u32) != 0 || buffer_ptr.is_null();
                    let samples: &[i32] = if silent {
                        &[]
                    } else {
                        std::slice::from_raw_parts(
                            buffer_ptr as *const i32,
                            num_frames as usize * self.channels as usize,
                        )
                    };
                    sink(CapturePacket {
                        frames: num_frames as usize,
                        silent,
                        samples,
                    });
                    delivered += 1;
                }

                self.capture
                    .ReleaseBuffer(num_frames)
                    .stream(&self.device, "IAudioCaptureClient::ReleaseBuffer")?;

                packet_length = self
                    .capture
                    .GetNextPacketSize()
                    .stream(&self.device, "GetNextPacketSize")?;
            }
        }
        Ok(delivered)
    }
}

impl Drop for WasapiLoopback {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::warn!("{}", e);
        }
    }
}
