//! Host-facing driver operations.
//!
//! [`Driver`] holds the resolved target devices and the current sample rate,
//! and owns the [`PreparedState`] between `create_buffers` and
//! `dispose_buffers`. Errors are returned as [`DriverError`]; the host shell
//! maps them with [`DriverError::to_asio`].

use std::sync::Arc;

use crate::clock::{AsioTimeStamp, MonotonicTime, SamplePosition, TimeSource};
use crate::models::audio_models::{
    channel_name, BufferInfo, BufferSizeInfo, ChannelInfo, DeviceRecord, SampleType, StreamMode,
    StreamRequest,
};
use crate::models::config::DriverPreferences;
use crate::models::error::DriverError;
use crate::prepared::{OutputReadyHandle, PreparedState};
use crate::source::ToneTrigger;
use crate::traits::audio_backend::AudioBackend;
use crate::traits::host_callbacks::HostCallbacks;

const MIN_BUFFER_SIZE: u32 = 64;
const MAX_BUFFER_SIZE: u32 = 4096;
const PREFERRED_BUFFER_SIZE: u32 = 1024;

/// Find the device a preference entry refers to: the default-device alias,
/// a device id, or a friendly name.
pub fn resolve_device(
    backend: &dyn AudioBackend,
    entry: &str,
) -> Result<Option<Arc<DeviceRecord>>, DriverError> {
    if DriverPreferences::is_default_alias(entry) {
        return backend.default_output_device().map(Some);
    }
    let devices = backend.list_output_devices()?;
    Ok(devices
        .iter()
        .find(|d| d.id == entry)
        .or_else(|| devices.iter().find(|d| d.name == entry))
        .cloned())
}

/// Resolve a preference device list, keeping its order. Duplicates and
/// entries matching no device are dropped.
pub fn resolve_devices(
    backend: &dyn AudioBackend,
    entries: &[String],
) -> Result<Vec<Arc<DeviceRecord>>, DriverError> {
    let mut resolved: Vec<Arc<DeviceRecord>> = Vec::with_capacity(entries.len());
    for (i, entry) in entries.iter().enumerate() {
        match resolve_device(backend, entry)? {
            Some(device) if resolved.iter().any(|d| d.id == device.id) => {
                log::info!(" - target #{:02}: {} (duplicate of {}, skipped)", i, entry, device.id);
            }
            Some(device) => {
                log::info!(" - target #{:02}: {} -> {} [{}]", i, entry, device.name, device.id);
                resolved.push(device);
            }
            None => log::warn!(" - target #{:02}: {} matched no device", i, entry),
        }
    }
    if resolved.is_empty() {
        return Err(DriverError::NoTargetDevice);
    }
    Ok(resolved)
}

pub struct Driver {
    backend: Arc<dyn AudioBackend>,
    prefs: Arc<DriverPreferences>,
    devices: Vec<Arc<DeviceRecord>>,
    time: Arc<dyn TimeSource>,
    sample_rate: u32,
    buffer_size: usize,
    prepared: Option<PreparedState>,
}

impl Driver {
    pub fn new(
        backend: Arc<dyn AudioBackend>,
        prefs: DriverPreferences,
    ) -> Result<Self, DriverError> {
        Self::with_time_source(backend, prefs, Arc::new(MonotonicTime::new()))
    }

    pub fn with_time_source(
        backend: Arc<dyn AudioBackend>,
        prefs: DriverPreferences,
        time: Arc<dyn TimeSource>,
    ) -> Result<Self, DriverError> {
        prefs.validate().map_err(DriverError::ConfigurationFailed)?;
        log::set_max_level(prefs.log_level.to_filter());
        log::info!("starting driver, looking for {} target devices", prefs.device_id_list.len());

        let devices = resolve_devices(backend.as_ref(), &prefs.device_id_list)?;
        log::info!("{} target devices, primary {}", devices.len(), devices[0].id);

        Ok(Self {
            backend,
            sample_rate: prefs.sample_rate,
            buffer_size: prefs.buffer_size_request.unwrap_or(PREFERRED_BUFFER_SIZE) as usize,
            prefs: Arc::new(prefs),
            devices,
            time,
            prepared: None,
        })
    }

    pub fn devices(&self) -> &[Arc<DeviceRecord>] {
        &self.devices
    }

    pub fn preferences(&self) -> &DriverPreferences {
        &self.prefs
    }

    /// `(inputs, outputs)`. The driver has no inputs.
    pub fn channels(&self) -> (u16, u16) {
        (0, self.prefs.channel_count)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Whether every target device can run at `rate` in its mode.
    pub fn can_sample_rate(&self, rate: u32) -> Result<(), DriverError> {
        if rate == 0 {
            return Err(DriverError::UnsupportedFormat("sample rate 0".into()));
        }
        for (i, device) in self.devices.iter().enumerate() {
            let request = StreamRequest {
                mode: if i == 0 { StreamMode::Exclusive } else { StreamMode::Shared },
                sample_rate: rate,
                channels: self.prefs.channel_count,
                period_frames: self.prefs.buffer_size_request,
            };
            if !self.backend.supports_format(device, &request) {
                return Err(DriverError::UnsupportedFormat(format!(
                    "{} cannot run {:?} at {} Hz",
                    device.id, request.mode, rate
                )));
            }
        }
        Ok(())
    }

    /// Change the sample rate. With buffers created, the host is asked to
    /// reset so it recreates them at the new rate.
    pub fn set_sample_rate(&mut self, rate: u32) -> Result<(), DriverError> {
        if rate == self.sample_rate {
            return Ok(());
        }
        self.can_sample_rate(rate)?;
        log::info!("sample rate {} -> {}", self.sample_rate, rate);
        self.sample_rate = rate;
        if let Some(prepared) = &self.prepared {
            prepared.request_reset();
        }
        Ok(())
    }

    pub fn channel_info(&self, channel: i32, is_input: bool) -> Result<ChannelInfo, DriverError> {
        if is_input {
            return Err(DriverError::InvalidParameter("driver has no inputs".into()));
        }
        if channel < 0 || channel >= self.prefs.channel_count as i32 {
            return Err(DriverError::InvalidParameter(format!("channel {}", channel)));
        }
        let channel = channel as u16;
        Ok(ChannelInfo {
            channel,
            is_input: false,
            is_active: self
                .prepared
                .as_ref()
                .is_some_and(|p| p.is_channel_active(channel as usize)),
            channel_group: 0,
            sample_type: SampleType::Int32Lsb,
            name: channel_name(channel).to_string(),
        })
    }

    pub fn buffer_size(&self) -> BufferSizeInfo {
        match self.prefs.buffer_size_request {
            Some(size) => BufferSizeInfo {
                min: size,
                max: size,
                preferred: size,
                granularity: 0,
            },
            None => BufferSizeInfo {
                min: MIN_BUFFER_SIZE,
                max: MAX_BUFFER_SIZE,
                preferred: PREFERRED_BUFFER_SIZE,
                granularity: -1,
            },
        }
    }

    /// Allocate host buffers, replacing any existing ones.
    pub fn create_buffers(
        &mut self,
        infos: &[BufferInfo],
        buffer_size: u32,
        callbacks: Arc<dyn HostCallbacks>,
    ) -> Result<(), DriverError> {
        let channel_count = self.prefs.channel_count as usize;
        if infos.len() > channel_count {
            return Err(DriverError::InvalidParameter(format!(
                "{} buffers requested, {} channels available",
                infos.len(),
                channel_count
            )));
        }
        if buffer_size == 0 {
            return Err(DriverError::InvalidParameter("buffer size 0".into()));
        }
        for info in infos {
            if info.is_input || info.channel < 0 || info.channel as usize >= channel_count {
                return Err(DriverError::InvalidMode(format!(
                    "cannot create {} buffer for channel {}",
                    if info.is_input { "input" } else { "output" },
                    info.channel
                )));
            }
        }

        self.dispose_buffers();

        self.buffer_size = buffer_size as usize;
        let prepared = PreparedState::with_time_source(
            Arc::clone(&self.backend),
            self.devices.clone(),
            self.sample_rate,
            self.buffer_size,
            Arc::clone(&self.prefs),
            callbacks,
            Arc::clone(&self.time),
        );
        prepared.init_buffer_info(infos)?;
        self.prepared = Some(prepared);
        Ok(())
    }

    /// Stop and release the host buffers.
    pub fn dispose_buffers(&mut self) {
        if let Some(prepared) = self.prepared.take() {
            prepared.stop();
        }
    }

    pub fn start(&self) -> Result<(), DriverError> {
        let prepared = self.prepared.as_ref().ok_or(DriverError::NotPresent)?;
        prepared.start().map_err(|e| {
            log::error!("start failed: {}", e);
            DriverError::HardwareMalfunction(e.to_string())
        })
    }

    pub fn stop(&self) {
        if let Some(prepared) = &self.prepared {
            prepared.stop();
        }
    }

    pub fn output_ready(&self) {
        if let Some(prepared) = &self.prepared {
            prepared.output_ready();
        }
    }

    pub fn output_ready_handle(&self) -> Option<OutputReadyHandle> {
        self.prepared.as_ref().map(PreparedState::output_ready_handle)
    }

    pub fn sample_position(&self) -> Result<(SamplePosition, AsioTimeStamp), DriverError> {
        self.prepared
            .as_ref()
            .map(PreparedState::sample_position)
            .ok_or(DriverError::NotPresent)
    }

    /// `(input, output)` latency in frames.
    pub fn latencies(&self) -> Result<(u32, u32), DriverError> {
        if self.prepared.is_none() {
            return Err(DriverError::NotPresent);
        }
        let size = self.buffer_size as u32;
        Ok((size, 2 * size))
    }

    pub fn request_reset(&self) {
        if let Some(prepared) = &self.prepared {
            prepared.request_reset();
        }
    }

    pub fn prepared(&self) -> Option<&PreparedState> {
        self.prepared.as_ref()
    }

    /// Trigger for the tone cue, available once buffers exist.
    pub fn tone_trigger(&self) -> Option<ToneTrigger> {
        self.prepared.as_ref().map(PreparedState::tone_trigger)
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        log::info!("stopping driver");
        self.stop();
        self.dispose_buffers();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::models::error::AsioError;
    use crate::test_support::{ManualTime, MockBackend, RecordingHost};

    fn prefs(devices: &[&str]) -> DriverPreferences {
        DriverPreferences {
            device_id_list: devices.iter().map(|s| s.to_string()).collect(),
            ..DriverPreferences::default()
        }
    }

    fn driver(backend: &Arc<MockBackend>, devices: &[&str]) -> Driver {
        let time = Arc::new(ManualTime::new(0));
        Driver::with_time_source(backend.clone(), prefs(devices), time).unwrap()
    }

    fn ids(driver: &Driver) -> Vec<String> {
        driver.devices().iter().map(|d| d.id.clone()).collect()
    }

    fn outputs(channels: i32) -> Vec<BufferInfo> {
        (0..channels).map(BufferInfo::output).collect()
    }

    #[test]
    fn resolves_alias_id_and_friendly_name_in_order() {
        let backend = MockBackend::with_devices(&["speakers", "headphones", "hdmi"]);
        let driver = driver(&backend, &["hdmi", "(default)", "headphones Speakers"]);
        assert_eq!(ids(&driver), vec!["hdmi", "speakers", "headphones"]);
    }

    #[test]
    fn empty_entry_is_default_alias() {
        let backend = MockBackend::with_devices(&["speakers", "headphones"]);
        let driver = driver(&backend, &[""]);
        assert_eq!(ids(&driver), vec!["speakers"]);
    }

    #[test]
    fn drops_duplicates_and_unmatched() {
        let backend = MockBackend::with_devices(&["speakers", "headphones"]);
        let driver = driver(&backend, &["speakers", "nowhere", "(default)", "headphones"]);
        assert_eq!(ids(&driver), vec!["speakers", "headphones"]);
    }

    #[test]
    fn no_match_is_fatal() {
        let backend = MockBackend::with_devices(&["speakers"]);
        let result = Driver::new(backend, prefs(&["nowhere"]));
        assert_eq!(result.err(), Some(DriverError::NoTargetDevice));
        assert_eq!(DriverError::NoTargetDevice.to_asio(), AsioError::NotPresent);
    }

    #[test]
    fn invalid_preferences_are_rejected() {
        let backend = MockBackend::with_devices(&["speakers"]);
        let mut p = prefs(&["speakers"]);
        p.channel_count = 0;
        assert!(matches!(Driver::new(backend, p), Err(DriverError::ConfigurationFailed(_))));
    }

    #[test]
    fn channel_info_for_outputs() {
        let backend = MockBackend::with_devices(&["speakers"]);
        let mut p = prefs(&["speakers"]);
        p.channel_count = 13;
        let driver = Driver::new(backend, p).unwrap();

        assert_eq!(driver.channels(), (0, 13));
        let info = driver.channel_info(0, false).unwrap();
        assert_eq!(info.name, "Front left");
        assert_eq!(info.sample_type, SampleType::Int32Lsb);
        assert_eq!(info.channel_group, 0);
        assert!(!info.is_input);
        assert_eq!(driver.channel_info(10, false).unwrap().name, "Side right");
        assert_eq!(driver.channel_info(12, false).unwrap().name, "Unknown");

        assert!(matches!(driver.channel_info(13, false), Err(DriverError::InvalidParameter(_))));
        assert!(matches!(driver.channel_info(-1, false), Err(DriverError::InvalidParameter(_))));
        assert!(matches!(driver.channel_info(0, true), Err(DriverError::InvalidParameter(_))));
    }

    #[test]
    fn channel_is_active_once_buffers_exist() {
        let backend = MockBackend::with_devices(&["speakers"]);
        let mut driver = driver(&backend, &["speakers"]);
        assert!(!driver.channel_info(1, false).unwrap().is_active);

        driver.create_buffers(&outputs(2), 256, RecordingHost::new()).unwrap();
        assert!(driver.channel_info(1, false).unwrap().is_active);
    }

    #[test]
    fn sample_rate_support_is_checked_on_every_device() {
        let backend = MockBackend::with_devices(&["speakers", "headphones"]);
        backend.reject_rate(192000);
        let mut driver = driver(&backend, &["speakers", "headphones"]);

        assert!(driver.can_sample_rate(96000).is_ok());
        let err = driver.can_sample_rate(192000).unwrap_err();
        assert_eq!(err.to_asio(), AsioError::NoClock);

        assert!(driver.set_sample_rate(192000).is_err());
        assert_eq!(driver.sample_rate(), 48000);
    }

    #[test]
    fn sample_rate_change_requests_reset_when_prepared() {
        let backend = MockBackend::with_devices(&["speakers"]);
        let host = RecordingHost::new();
        let mut driver = driver(&backend, &["speakers"]);

        driver.set_sample_rate(44100).unwrap();
        assert_eq!(host.resets(), 0);

        driver.create_buffers(&outputs(2), 256, host.clone()).unwrap();
        driver.set_sample_rate(44100).unwrap();
        assert_eq!(host.resets(), 0);
        driver.set_sample_rate(96000).unwrap();
        assert_eq!(host.resets(), 1);
        assert_eq!(driver.sample_rate(), 96000);
    }

    #[test]
    fn buffer_size_ranges() {
        let backend = MockBackend::with_devices(&["speakers"]);
        let driver = driver(&backend, &["speakers"]);
        assert_eq!(
            driver.buffer_size(),
            BufferSizeInfo {
                min: 64,
                max: 4096,
                preferred: 1024,
                granularity: -1
            }
        );

        let mut p = prefs(&["speakers"]);
        p.buffer_size_request = Some(480);
        let fixed = Driver::new(backend, p).unwrap();
        let info = fixed.buffer_size();
        assert_eq!((info.min, info.max, info.preferred), (480, 480, 480));
    }

    #[test]
    fn create_buffers_validates_request() {
        let backend = MockBackend::with_devices(&["speakers"]);
        let mut driver = driver(&backend, &["speakers"]);
        let host = RecordingHost::new();

        let err = driver.create_buffers(&outputs(3), 256, host.clone()).unwrap_err();
        assert_eq!(err.to_asio(), AsioError::InvalidParameter);

        let input = [BufferInfo {
            is_input: true,
            channel: 0,
        }];
        let err = driver.create_buffers(&input, 256, host.clone()).unwrap_err();
        assert_eq!(err.to_asio(), AsioError::InvalidMode);

        let err = driver.create_buffers(&[BufferInfo::output(5)], 256, host.clone()).unwrap_err();
        assert_eq!(err.to_asio(), AsioError::InvalidMode);
        assert!(driver.prepared().is_none());
    }

    #[test]
    fn operations_without_buffers_are_not_present() {
        let backend = MockBackend::with_devices(&["speakers"]);
        let driver = driver(&backend, &["speakers"]);

        assert_eq!(driver.start().unwrap_err().to_asio(), AsioError::NotPresent);
        assert_eq!(driver.sample_position().unwrap_err(), DriverError::NotPresent);
        assert_eq!(driver.latencies().unwrap_err(), DriverError::NotPresent);
        driver.stop();
        driver.output_ready();
    }

    #[test]
    fn latencies_follow_buffer_size() {
        let backend = MockBackend::with_devices(&["speakers"]);
        let mut driver = driver(&backend, &["speakers"]);
        driver.create_buffers(&outputs(2), 512, RecordingHost::new()).unwrap();
        assert_eq!(driver.latencies().unwrap(), (512, 1024));
    }

    #[test]
    fn fatal_start_is_hardware_malfunction() {
        let backend = MockBackend::with_devices(&["speakers", "headphones"]);
        backend.fail_open("headphones");
        let mut driver = driver(&backend, &["speakers", "headphones"]);
        driver.create_buffers(&outputs(2), 256, RecordingHost::new()).unwrap();

        assert_eq!(driver.start().unwrap_err().to_asio(), AsioError::HwMalfunction);
    }

    #[test]
    fn full_cycle_through_driver() {
        let backend = MockBackend::with_devices(&["speakers", "headphones"]);
        let host = RecordingHost::new();
        let mut driver = driver(&backend, &["speakers", "headphones"]);
        driver.create_buffers(&outputs(2), 256, host.clone()).unwrap();

        driver.start().unwrap();
        assert!(host.wait_for_switches(1, Duration::from_secs(5)));
        driver.output_ready();
        assert!(host.wait_for_switches(2, Duration::from_secs(5)));
        driver.stop();

        let (position, _) = driver.sample_position().unwrap();
        assert_eq!(position, SamplePosition(512));

        // Recreating buffers starts a new clock.
        driver.create_buffers(&outputs(2), 256, host.clone()).unwrap();
        assert_eq!(driver.sample_position().unwrap().0, SamplePosition(0));

        drop(driver);
        assert!(backend.output_state("speakers").lock().stopped);
    }

    #[test]
    fn host_can_answer_from_inside_buffer_switch() {
        struct EagerHost {
            inner: Arc<RecordingHost>,
            ready: parking_lot::Mutex<Option<OutputReadyHandle>>,
        }

        impl HostCallbacks for EagerHost {
            fn buffer_switch(&self, index: usize, direct_process: bool) {
                self.inner.buffer_switch(index, direct_process);
                if self.inner.switches().len() < 6 {
                    if let Some(handle) = self.ready.lock().as_ref() {
                        handle.output_ready();
                    }
                }
            }
        }

        let backend = MockBackend::with_devices(&["speakers"]);
        let recorder = RecordingHost::new();
        let host = Arc::new(EagerHost {
            inner: recorder.clone(),
            ready: parking_lot::Mutex::new(None),
        });
        let mut driver = driver(&backend, &["speakers"]);
        driver.create_buffers(&outputs(2), 128, host.clone()).unwrap();
        *host.ready.lock() = driver.output_ready_handle();

        driver.start().unwrap();
        assert!(recorder.wait_for_switches(6, Duration::from_secs(5)));
        driver.stop();

        assert_eq!(recorder.switches(), vec![1, 0, 1, 0, 1, 0]);
        assert_eq!(driver.sample_position().unwrap().0, SamplePosition(768));
    }
}
