//! C string conversions and the C view of the last-error channel

use std::cell::RefCell;
use std::ffi::{c_char, CStr, CString};

use stemkit_core::error::Result;
use stemkit_core::last_error::last_error;
use stemkit_core::StemkitError;

thread_local! {
    static LAST_ERROR_C: RefCell<CString> = RefCell::new(CString::default());
}

/// Borrow a required UTF-8 argument
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string that outlives `'a`.
pub unsafe fn required_str<'a>(ptr: *const c_char, name: &str) -> Result<&'a str> {
    optional_str(ptr, name)?.ok_or_else(|| StemkitError::InvalidArgument(name.to_string()))
}

/// Borrow an optional UTF-8 argument; null maps to `None`
///
/// # Safety
/// Same contract as [`required_str`].
pub unsafe fn optional_str<'a>(ptr: *const c_char, name: &str) -> Result<Option<&'a str>> {
    if ptr.is_null() {
        return Ok(None);
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map(Some)
        .map_err(|_| StemkitError::InvalidArgument(format!("{} is not valid UTF-8", name)))
}

/// Hand a string to the caller; release it with `stemkit_string_free`
pub fn into_raw(value: String) -> Result<*mut c_char> {
    CString::new(value)
        .map(CString::into_raw)
        .map_err(|_| StemkitError::Runtime("result contains an interior NUL byte".to_string()))
}

/// Pointer to this thread's last error message
///
/// Stays valid until the next call on the same thread.
pub fn last_error_ptr() -> *const c_char {
    let message: Vec<u8> = last_error().into_bytes().into_iter().filter(|&b| b != 0).collect();
    LAST_ERROR_C.with(|slot| {
        let mut slot = slot.borrow_mut();
        *slot = CString::new(message).unwrap_or_default();
        slot.as_ptr()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_is_missing() {
        let err = unsafe { required_str(std::ptr::null(), "work_dir") }.unwrap_err();
        assert_eq!(err, StemkitError::InvalidArgument("work_dir".into()));
        assert_eq!(unsafe { optional_str(std::ptr::null(), "x") }.unwrap(), None);
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        let bytes = [0x66u8, 0xff, 0xfe, 0x00];
        let err = unsafe { required_str(bytes.as_ptr() as *const c_char, "input_path") }.unwrap_err();
        assert!(matches!(err, StemkitError::InvalidArgument(ref m) if m.contains("UTF-8")));
    }

    #[test]
    fn test_round_trip_through_raw() {
        let raw = into_raw("{\"files\":[]}".to_string()).unwrap();
        let owned = unsafe { CString::from_raw(raw) };
        assert_eq!(owned.to_str().unwrap(), "{\"files\":[]}");
        assert!(into_raw("a\0b".to_string()).is_err());
    }
}
