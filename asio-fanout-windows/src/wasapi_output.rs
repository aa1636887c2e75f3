//! Event-driven WASAPI render stream.
//!
//! Exclusive streams negotiate the first format from
//! [`WireFormat::NEGOTIATION_ORDER`] the endpoint accepts natively. Shared
//! streams run through the audio engine with PCM auto-conversion and fall
//! back to float when nothing else is reported as supported.

use std::time::Duration;

use windows::Win32::Foundation::{CloseHandle, HANDLE, S_OK, WAIT_OBJECT_0};
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::{CoTaskMemFree, CLSCTX_ALL};
use windows::Win32::System::Threading::{CreateEventW, WaitForSingleObject};

use asio_fanout_core::models::audio_models::{StreamFormat, StreamMode, StreamRequest};
use asio_fanout_core::models::error::DriverError;
use asio_fanout_core::processing::sample_format::WireFormat;
use asio_fanout_core::traits::audio_backend::OutputStream;

use crate::error::{ResultExt, WasapiError};
use crate::wave_format::{extensible, frames_to_reftime, reftime_to_frames};

/// A started or stopped render client on one endpoint.
pub struct WasapiOutput {
    device: String,
    client: IAudioClient,
    render: IAudioRenderClient,
    clock: IAudioClock,
    event: HANDLE,
    mode: StreamMode,
    format: StreamFormat,
    buffer_frames: u32,
    period_frames: u32,
    clock_frequency: u64,
    running: bool,
}

// SAFETY: the stream is created in the MTA and afterwards used only by the
// render thread that owns it.
unsafe impl Send for WasapiOutput {}

impl WasapiOutput {
    /// Activate and initialize a render client on `device`.
    pub fn open(
        device_id: &str,
        device: &IMMDevice,
        request: &StreamRequest,
    ) -> Result<Self, WasapiError> {
        let client = activate(device_id, device)?;
        let wire = negotiate(device_id, &client, request)?.ok_or_else(|| WasapiError::NoFormat {
            device: device_id.to_string(),
            sample_rate: request.sample_rate,
            channels: request.channels,
        })?;
        let wave = extensible(wire, request.sample_rate, request.channels);

        let client = match request.mode {
            StreamMode::Exclusive => {
                initialize_exclusive(device_id, device, client, &wave, request)?
            }
            StreamMode::Shared => {
                let duration = request
                    .period_frames
                    .map(|frames| frames_to_reftime(frames, request.sample_rate))
                    .unwrap_or(0);
                unsafe {
                    client.Initialize(
                        AUDCLNT_SHAREMODE_SHARED,
                        AUDCLNT_STREAMFLAGS_EVENTCALLBACK
                            | AUDCLNT_STREAMFLAGS_AUTOCONVERTPCM
                            | AUDCLNT_STREAMFLAGS_SRC_DEFAULT_QUALITY,
                        duration,
                        0,
                        &wave.Format,
                        None,
                    )
                }
                .activation(device_id, "IAudioClient::Initialize (shared)")?;
                client
            }
        };

        unsafe {
            let event =
                CreateEventW(None, false, false, None).activation(device_id, "CreateEventW")?;
            let stream = Self::finish(device_id, client, event, wire, request);
            if stream.is_err() {
                let _ = CloseHandle(event);
            }
            stream
        }
    }

    unsafe fn finish(
        device_id: &str,
        client: IAudioClient,
        event: HANDLE,
        wire: WireFormat,
        request: &StreamRequest,
    ) -> Result<Self, WasapiError> {
        client.SetEventHandle(event).activation(device_id, "SetEventHandle")?;
        let buffer_frames = client.GetBufferSize().activation(device_id, "GetBufferSize")?;

        let period_frames = match request.mode {
            StreamMode::Exclusive => buffer_frames,
            StreamMode::Shared => {
                let mut default_period = 0i64;
                client
                    .GetDevicePeriod(Some(&mut default_period), None)
                    .activation(device_id, "GetDevicePeriod")?;
                reftime_to_frames(default_period, request.sample_rate).clamp(1, buffer_frames)
            }
        };

        let render: IAudioRenderClient =
            client.GetService().activation(device_id, "GetService(render)")?;
        let clock: IAudioClock = client.GetService().activation(device_id, "GetService(clock)")?;
        let clock_frequency =
            clock.GetFrequency().activation(device_id, "IAudioClock::GetFrequency")?;

        log::info!(
            "{}: {:?} {:?} {} Hz x{}, buffer {} frames, period {} frames",
            device_id,
            request.mode,
            wire,
            request.sample_rate,
            request.channels,
            buffer_frames,
            period_frames
        );

        Ok(Self {
            device: device_id.to_string(),
            client,
            render,
            clock,
            event,
            mode: request.mode,
            format: StreamFormat {
                sample_rate: request.sample_rate,
                channels: request.channels,
                wire,
            },
            buffer_frames,
            period_frames,
            clock_frequency: clock_frequency.max(1),
            running: false,
        })
    }

    fn block_align(&self) -> usize {
        self.format.wire.bytes_per_sample() * self.format.channels as usize
    }
}

impl OutputStream for WasapiOutput {
    fn format(&self) -> StreamFormat {
        self.format
    }

    fn native_period(&self) -> usize {
        self.period_frames as usize
    }

    fn start(&mut self) -> Result<(), DriverError> {
        if self.running {
            return Ok(());
        }
        unsafe {
            // Prefill with silence so the first hardware period has data.
            let frames = self.free_frames()? as u32;
            if frames > 0 {
                self.render
                    .GetBuffer(frames)
                    .stream(&self.device, "IAudioRenderClient::GetBuffer")?;
                self.render
                    .ReleaseBuffer(frames, AUDCLNT_BUFFERFLAGS_SILENT.0 as u32)
                    .stream(&self.device, "IAudioRenderClient::ReleaseBuffer")?;
            }
            self.client.Start().stream(&self.device, "IAudioClient::Start")?;
        }
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DriverError> {
        if !self.running {
            return Ok(());
        }
        self.running = false;
        unsafe {
            self.client.Stop().stream(&self.device, "IAudioClient::Stop")?;
            self.client.Reset().stream(&self.device, "IAudioClient::Reset")?;
        }
        Ok(())
    }

    fn free_frames(&mut self) -> Result<usize, DriverError> {
        let padding =
            unsafe { self.client.GetCurrentPadding() }.stream(&self.device, "GetCurrentPadding")?;
        Ok(self.buffer_frames.saturating_sub(padding) as usize)
    }

    fn write(&mut self, data: &[u8], frames: usize) -> Result<(), DriverError> {
        if frames == 0 {
            return Ok(());
        }
        let bytes = frames * self.block_align();
        if data.len() < bytes {
            return Err(DriverError::InvalidParameter(format!(
                "{}: {} bytes supplied for {} frames",
                self.device,
                data.len(),
                frames
            )));
        }
        unsafe {
            let ptr = self
                .render
                .GetBuffer(frames as u32)
                .stream(&self.device, "IAudioRenderClient::GetBuffer")?;
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr, bytes);
            self.render
                .ReleaseBuffer(frames as u32, 0)
                .stream(&self.device, "IAudioRenderClient::ReleaseBuffer")?;
        }
        Ok(())
    }

    fn played_frames(&mut self) -> Result<u64, DriverError> {
        let mut position = 0u64;
        unsafe { self.clock.GetPosition(&mut position, None) }
            .stream(&self.device, "IAudioClock::GetPosition")?;
        let frames = position as u128 * self.format.sample_rate as u128;
        Ok((frames / self.clock_frequency as u128) as u64)
    }

    fn wait_for_period(&mut self, timeout: Duration) -> Result<bool, DriverError> {
        let result = unsafe { WaitForSingleObject(self.event, timeout.as_millis() as u32) };
        Ok(result == WAIT_OBJECT_0)
    }
}

impl Drop for WasapiOutput {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::warn!("{}", e);
        }
        unsafe {
            let _ = CloseHandle(self.event);
        }
        log::debug!("{}: {:?} stream closed", self.device, self.mode);
    }
}

fn activate(device_id: &str, device: &IMMDevice) -> Result<IAudioClient, WasapiError> {
    unsafe { device.Activate(CLSCTX_ALL, None) }.activation(device_id, "IMMDevice::Activate")
}

/// Whether the endpoint accepts `wire` at the request's rate and channel count.
pub(crate) fn is_supported(
    client: &IAudioClient,
    wire: WireFormat,
    request: &StreamRequest,
) -> bool {
    let wave = extensible(wire, request.sample_rate, request.channels);
    unsafe {
        match request.mode {
            StreamMode::Exclusive => {
                client.IsFormatSupported(AUDCLNT_SHAREMODE_EXCLUSIVE, &wave.Format, None) == S_OK
            }
            StreamMode::Shared => {
                let mut closest: *mut WAVEFORMATEX = std::ptr::null_mut();
                let hr = client.IsFormatSupported(
                    AUDCLNT_SHAREMODE_SHARED,
                    &wave.Format,
                    Some(&mut closest),
                );
                if !closest.is_null() {
                    CoTaskMemFree(Some(closest as *const _));
                }
                hr == S_OK
            }
        }
    }
}

/// Pick the wire format for `request`. `None` means the endpoint rejects
/// every candidate in exclusive mode.
pub(crate) fn negotiate(
    device_id: &str,
    client: &IAudioClient,
    request: &StreamRequest,
) -> Result<Option<WireFormat>, WasapiError> {
    if let Some(wire) = WireFormat::NEGOTIATION_ORDER
        .iter()
        .copied()
        .find(|&wire| is_supported(client, wire, request))
    {
        return Ok(Some(wire));
    }
    match request.mode {
        StreamMode::Exclusive => Ok(None),
        StreamMode::Shared => {
            log::debug!("{}: no native shared format, relying on engine conversion", device_id);
            Ok(Some(WireFormat::Float32))
        }
    }
}

/// Initialize an exclusive, event-driven client. An unaligned period is
/// retried once on a fresh client with the period the driver reports.
fn initialize_exclusive(
    device_id: &str,
    device: &IMMDevice,
    client: IAudioClient,
    wave: &WAVEFORMATEXTENSIBLE,
    request: &StreamRequest,
) -> Result<IAudioClient, WasapiError> {
    let period = match request.period_frames {
        Some(frames) => frames_to_reftime(frames, request.sample_rate),
        None => {
            let mut default_period = 0i64;
            unsafe { client.GetDevicePeriod(Some(&mut default_period), None) }
                .activation(device_id, "GetDevicePeriod")?;
            default_period
        }
    };

    let init = |client: &IAudioClient, period: i64| unsafe {
        client.Initialize(
            AUDCLNT_SHAREMODE_EXCLUSIVE,
            AUDCLNT_STREAMFLAGS_EVENTCALLBACK,
            period,
            period,
            &wave.Format,
            None,
        )
    };

    match init(&client, period) {
        Ok(()) => Ok(client),
        Err(e) if e.code() == AUDCLNT_E_BUFFER_SIZE_NOT_ALIGNED => {
            let frames = unsafe { client.GetBufferSize() }.activation(device_id, "GetBufferSize")?;
            let aligned = frames_to_reftime(frames, request.sample_rate);
            log::debug!("{}: period not aligned, retrying with {} frames", device_id, frames);
            drop(client);
            let client = activate(device_id, device)?;
            init(&client, aligned).activation(device_id, "IAudioClient::Initialize (exclusive)")?;
            Ok(client)
        }
        Err(e) => Err(WasapiError::Activation {
            device: device_id.to_string(),
            context: "IAudioClient::Initialize (exclusive)",
            source: e,
        }),
    }
}
