//! Render endpoint enumeration via the MMDevice API.

use windows::core::{HSTRING, PWSTR};
use windows::Win32::Devices::FunctionDiscovery::PKEY_Device_FriendlyName;
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::*;
use windows::Win32::System::Variant::VT_LPWSTR;

use asio_fanout_core::models::audio_models::DeviceRecord;

use crate::error::WasapiError;

/// Wraps `IMMDeviceEnumerator`.
///
/// Requires COM to be initialized on the calling thread.
pub struct DeviceEnumerator {
    enumerator: IMMDeviceEnumerator,
}

impl DeviceEnumerator {
    pub fn new() -> Result<Self, WasapiError> {
        let enumerator: IMMDeviceEnumerator =
            unsafe { CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL) }.map_err(|source| {
                WasapiError::Enumeration {
                    context: "failed to create device enumerator",
                    source,
                }
            })?;
        Ok(Self { enumerator })
    }

    /// Active render endpoints, flagged against the console default.
    pub fn list_render_devices(&self) -> Result<Vec<DeviceRecord>, WasapiError> {
        unsafe {
            let collection = self
                .enumerator
                .EnumAudioEndpoints(eRender, DEVICE_STATE_ACTIVE)
                .map_err(|source| WasapiError::Enumeration {
                    context: "EnumAudioEndpoints failed",
                    source,
                })?;
            let count = collection.GetCount().map_err(|source| WasapiError::Enumeration {
                context: "GetCount failed",
                source,
            })?;

            let default_id = self.default_render_device().ok().map(|d| d.id);

            let mut devices = Vec::with_capacity(count as usize);
            for i in 0..count {
                let Ok(device) = collection.Item(i) else {
                    continue;
                };
                let Some(id) = Self::device_id(&device) else {
                    continue;
                };
                let name = Self::friendly_name(&device).unwrap_or_else(|| format!("Device {}", i));
                let is_default = default_id.as_deref() == Some(id.as_str());
                devices.push(DeviceRecord { id, name, is_default });
            }
            Ok(devices)
        }
    }

    pub fn default_render_device(&self) -> Result<DeviceRecord, WasapiError> {
        unsafe {
            let device = self
                .enumerator
                .GetDefaultAudioEndpoint(eRender, eConsole)
                .map_err(|_| WasapiError::DeviceNotFound("(default)".into()))?;
            let id = Self::device_id(&device)
                .ok_or_else(|| WasapiError::DeviceNotFound("(default)".into()))?;
            let name = Self::friendly_name(&device).unwrap_or_else(|| id.clone());
            Ok(DeviceRecord {
                id,
                name,
                is_default: true,
            })
        }
    }

    /// Look up an endpoint by id.
    pub fn device(&self, id: &str) -> Result<IMMDevice, WasapiError> {
        unsafe {
            self.enumerator
                .GetDevice(&HSTRING::from(id))
                .map_err(|_| WasapiError::DeviceNotFound(id.to_string()))
        }
    }

    fn device_id(device: &IMMDevice) -> Option<String> {
        unsafe {
            let id: PWSTR = device.GetId().ok()?;
            let value = id.to_string().ok();
            CoTaskMemFree(Some(id.0 as *const _));
            value
        }
    }

    /// Read `PKEY_Device_FriendlyName` from the device's property store.
    fn friendly_name(device: &IMMDevice) -> Option<String> {
        unsafe {
            let store = device.OpenPropertyStore(STGM_READ).ok()?;
            // The variant is cleared when dropped.
            let value = store.GetValue(&PKEY_Device_FriendlyName).ok()?;
            if value.vt() != VT_LPWSTR {
                return None;
            }
            let name = value.to_string();
            (!name.is_empty()).then_some(name)
        }
    }
}
