//! COM apartment handling.

use std::cell::RefCell;

use windows::Win32::Foundation::RPC_E_CHANGED_MODE;
use windows::Win32::System::Com::{CoInitializeEx, CoUninitialize, COINIT_MULTITHREADED};

use crate::error::WasapiError;

/// Joins the multithreaded apartment for the guard's lifetime.
///
/// A thread already initialized as single-threaded keeps its apartment; the
/// guard then does nothing on drop.
pub struct ComApartment {
    owned: bool,
}

impl ComApartment {
    pub fn enter() -> Result<Self, WasapiError> {
        let hr = unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) };
        if hr == RPC_E_CHANGED_MODE {
            return Ok(Self { owned: false });
        }
        hr.ok().map_err(WasapiError::ComInit)?;
        Ok(Self { owned: true })
    }
}

impl Drop for ComApartment {
    fn drop(&mut self) {
        if self.owned {
            unsafe { CoUninitialize() };
        }
    }
}

thread_local! {
    static THREAD_APARTMENT: RefCell<Option<ComApartment>> = const { RefCell::new(None) };
}

/// Keep the current thread in the MTA until it exits.
///
/// Streams outlive the call that opened them, so the apartment must too.
pub fn enter_for_thread() -> Result<(), WasapiError> {
    THREAD_APARTMENT.with(|slot| {
        let mut slot = slot.borrow_mut();
        if slot.is_none() {
            *slot = Some(ComApartment::enter()?);
        }
        Ok(())
    })
}
