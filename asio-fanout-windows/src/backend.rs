//! [`AudioBackend`] over WASAPI.

use std::sync::Arc;

use windows::core::w;
use windows::Win32::System::Threading::AvSetMmThreadCharacteristicsW;

use asio_fanout_core::models::audio_models::{DeviceRecord, StreamRequest};
use asio_fanout_core::models::error::DriverError;
use asio_fanout_core::traits::audio_backend::{AudioBackend, CaptureStream, OutputStream};

use crate::com;
use crate::device_enumerator::DeviceEnumerator;
use crate::error::ResultExt;
use crate::policy_config;
use crate::wasapi_loopback::WasapiLoopback;
use crate::wasapi_output::{self, WasapiOutput};

/// Stateless. Each calling thread joins the MTA on first use and stays there,
/// so the driver may be called from any host thread.
#[derive(Debug, Default)]
pub struct WasapiBackend;

impl WasapiBackend {
    pub fn new() -> Self {
        Self
    }
}

impl AudioBackend for WasapiBackend {
    fn list_output_devices(&self) -> Result<Vec<Arc<DeviceRecord>>, DriverError> {
        com::enter_for_thread()?;
        let devices = DeviceEnumerator::new()?.list_render_devices()?;
        log::debug!("{} active render endpoints", devices.len());
        Ok(devices.into_iter().map(Arc::new).collect())
    }

    fn default_output_device(&self) -> Result<Arc<DeviceRecord>, DriverError> {
        com::enter_for_thread()?;
        Ok(Arc::new(DeviceEnumerator::new()?.default_render_device()?))
    }

    fn set_default_output_device(&self, id: &str) -> Result<(), DriverError> {
        com::enter_for_thread()?;
        policy_config::set_default_endpoint(id)?;
        Ok(())
    }

    fn supports_format(&self, device: &DeviceRecord, request: &StreamRequest) -> bool {
        let probe = || -> Result<bool, crate::error::WasapiError> {
            com::enter_for_thread()?;
            let endpoint = DeviceEnumerator::new()?.device(&device.id)?;
            let client = unsafe { endpoint.Activate(windows::Win32::System::Com::CLSCTX_ALL, None) }
                .activation(&device.id, "IMMDevice::Activate")?;
            Ok(wasapi_output::negotiate(&device.id, &client, request)?.is_some())
        };
        match probe() {
            Ok(supported) => supported,
            Err(e) => {
                log::debug!("format probe failed: {}", e);
                false
            }
        }
    }

    fn open_output(
        &self,
        device: &Arc<DeviceRecord>,
        request: &StreamRequest,
    ) -> Result<Box<dyn OutputStream>, DriverError> {
        com::enter_for_thread()?;
        let endpoint = DeviceEnumerator::new()?.device(&device.id)?;
        Ok(Box::new(WasapiOutput::open(&device.id, &endpoint, request)?))
    }

    fn open_loopback(
        &self,
        device: &Arc<DeviceRecord>,
        channels: u16,
    ) -> Result<Box<dyn CaptureStream>, DriverError> {
        com::enter_for_thread()?;
        let endpoint = DeviceEnumerator::new()?.device(&device.id)?;
        Ok(Box::new(WasapiLoopback::open(&device.id, &endpoint, channels)?))
    }

    fn promote_render_thread(&self) {
        if let Err(e) = com::enter_for_thread() {
            log::warn!("{}", e);
        }
        let mut task_index: u32 = 0;
        match unsafe { AvSetMmThreadCharacteristicsW(w!("Pro Audio"), &mut task_index) } {
            Ok(_) => log::debug!("render thread registered with MMCSS (task {})", task_index),
            Err(e) => log::warn!("MMCSS registration failed: {}", e),
        }
    }
}
