//! Default endpoint switching through the undocumented `IPolicyConfig`
//! interface, the same one the Sound control panel uses.

use std::ffi::c_void;

use windows::core::{GUID, HRESULT, HSTRING, PCWSTR};
use windows::Win32::Media::Audio::{eCommunications, eConsole, eMultimedia, ERole, WAVEFORMATEX};
use windows::Win32::System::Com::{CoCreateInstance, CLSCTX_ALL};

use crate::error::WasapiError;

const CLSID_POLICY_CONFIG_CLIENT: GUID = GUID::from_u128(0x870af99c_171d_4f9e_af0d_e63df40c2bc9);

// Only SetDefaultEndpoint is called; the remaining slots keep the vtable
// layout and take opaque pointers.
#[allow(non_snake_case, clippy::upper_case_acronyms)]
#[windows_core::interface("f8679f50-850a-41cf-9c72-430f290290c8")]
unsafe trait IPolicyConfig: windows_core::IUnknown {
    unsafe fn GetMixFormat(&self, device: PCWSTR, format: *mut *mut WAVEFORMATEX) -> HRESULT;
    unsafe fn GetDeviceFormat(
        &self,
        device: PCWSTR,
        default: i32,
        format: *mut *mut WAVEFORMATEX,
    ) -> HRESULT;
    unsafe fn ResetDeviceFormat(&self, device: PCWSTR) -> HRESULT;
    unsafe fn SetDeviceFormat(
        &self,
        device: PCWSTR,
        endpoint: *const c_void,
        mix: *const c_void,
    ) -> HRESULT;
    unsafe fn GetProcessingPeriod(
        &self,
        device: PCWSTR,
        default: i32,
        a: *mut i64,
        b: *mut i64,
    ) -> HRESULT;
    unsafe fn SetProcessingPeriod(&self, device: PCWSTR, period: *const i64) -> HRESULT;
    unsafe fn GetShareMode(&self, device: PCWSTR, mode: *mut c_void) -> HRESULT;
    unsafe fn SetShareMode(&self, device: PCWSTR, mode: *const c_void) -> HRESULT;
    unsafe fn GetPropertyValue(
        &self,
        device: PCWSTR,
        key: *const c_void,
        value: *mut c_void,
    ) -> HRESULT;
    unsafe fn SetPropertyValue(
        &self,
        device: PCWSTR,
        key: *const c_void,
        value: *const c_void,
    ) -> HRESULT;
    unsafe fn SetDefaultEndpoint(&self, device: PCWSTR, role: ERole) -> HRESULT;
    unsafe fn SetEndpointVisibility(&self, device: PCWSTR, visible: i32) -> HRESULT;
}

const ROLES: [ERole; 3] = [eConsole, eMultimedia, eCommunications];

/// Make `device_id` the default render endpoint for every role.
///
/// Requires COM to be initialized on the calling thread.
pub fn set_default_endpoint(device_id: &str) -> Result<(), WasapiError> {
    let map_err = |source| WasapiError::PolicyConfig {
        device: device_id.to_string(),
        source,
    };
    let id = HSTRING::from(device_id);
    unsafe {
        let policy: IPolicyConfig =
            CoCreateInstance(&CLSID_POLICY_CONFIG_CLIENT, None, CLSCTX_ALL).map_err(map_err)?;
        for role in ROLES {
            policy
                .SetDefaultEndpoint(PCWSTR(id.as_ptr()), role)
                .ok()
                .map_err(map_err)?;
        }
    }
    log::info!("default render endpoint set to {}", device_id);
    Ok(())
}
