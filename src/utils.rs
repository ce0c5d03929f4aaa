//! Utility functions: free-space queries, identifier list input, and
//! metadata sanitizing

use crate::error::{Error, Result};
use crate::identifier::{ExternalId, IdGrammar};
use std::path::Path;

/// Read a list of identifiers
///
/// `input` is either the path of an existing file, whose contents are split on
/// whitespace, or the identifiers themselves separated by whitespace or commas.
/// Every entry is validated against `grammar`; an empty list is an error.
pub fn read_id_list(input: &str, grammar: &IdGrammar) -> Result<Vec<ExternalId>> {
    let path = Path::new(input);
    let raw = if path.is_file() {
        std::fs::read_to_string(path)?
    } else {
        input.to_string()
    };

    let ids = raw
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .map(|s| grammar.parse(s))
        .collect::<Result<Vec<_>>>()?;

    if ids.is_empty() {
        return Err(Error::Config {
            message: "identifier list is empty".to_string(),
            key: None,
        });
    }
    Ok(ids)
}

/// Whether `c` may not appear in the remote metadata XML
fn is_xml_illegal(c: char) -> bool {
    matches!(c, '\u{01}'..='\u{08}' | '\u{0b}'..='\u{0c}' | '\u{0e}'..='\u{1f}' | '\u{7f}')
}

/// Strip characters that are illegal in XML 1.0 documents
pub fn strip_xml_illegal(s: &str) -> String {
    s.chars().filter(|c| !is_xml_illegal(*c)).collect()
}

/// Strip XML-illegal characters from every string in a metadata map
///
/// Strings nested in arrays are cleaned too. Returns the number of fields that
/// changed; each change is logged with its before and after value.
pub fn sanitize_metadata(metadata: &mut serde_json::Map<String, serde_json::Value>) -> usize {
    let mut changed = 0;
    for (key, value) in metadata.iter_mut() {
        if sanitize_value(key, value) {
            changed += 1;
        }
    }
    changed
}

fn sanitize_value(key: &str, value: &mut serde_json::Value) -> bool {
    match value {
        serde_json::Value::String(s) => {
            if !s.chars().any(is_xml_illegal) {
                return false;
            }
            let cleaned = strip_xml_illegal(s);
            tracing::info!(field = key, before = ?s, after = ?cleaned, "Stripped XML-illegal characters");
            *s = cleaned;
            true
        }
        serde_json::Value::Array(items) => {
            let mut any = false;
            for item in items {
                any |= sanitize_value(key, item);
            }
            any
        }
        _ => false,
    }
}

/// Get available disk space for a given path
///
/// Uses platform-specific APIs to query filesystem statistics:
/// - Linux: statvfs
/// - macOS: statvfs
/// - Windows: GetDiskFreeSpaceExW
///
/// # Arguments
///
/// * `path` - The path to check (typically the storage home directory)
///
/// # Returns
///
/// Returns the available disk space in bytes, or an IO error if the check fails.
///
/// # Examples
///
/// ```ignore
/// let available = get_available_space(Path::new("bilibili_archive_dir"))?;
/// println!("Available space: {} GB", available / (1024 * 1024 * 1024));
/// ```
pub fn get_available_space(path: &Path) -> std::io::Result<u64> {
    #[cfg(unix)]
    {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

        // SAFETY: This is safe because:
        // 1. c_path is a valid, null-terminated C string created from the input path
        // 2. stat is properly initialized with zeroed memory before the call
        // 3. We check the return value and propagate any OS errors
        // 4. The statvfs struct is only read after a successful call
        unsafe {
            let mut stat: libc::statvfs = std::mem::zeroed();
            if libc::statvfs(c_path.as_ptr(), &mut stat) != 0 {
                return Err(std::io::Error::last_os_error());
            }

            // f_bavail counts blocks available to unprivileged users
            Ok(stat.f_bavail.saturating_mul(stat.f_frsize))
        }
    }

    #[cfg(windows)]
    {
        use std::os::windows::ffi::OsStrExt;
        use winapi::um::fileapi::GetDiskFreeSpaceExW;

        // Convert path to wide string for Windows API
        let wide_path: Vec<u16> = path
            .as_os_str()
            .encode_wide()
            .chain(std::iter::once(0)) // null terminator
            .collect();

        // SAFETY: This is safe because:
        // 1. wide_path is a valid, null-terminated wide string
        // 2. All output pointers point to valid, properly aligned u64 variables
        // 3. We check the return value and propagate any OS errors
        // 4. The output variables are only read after a successful call
        unsafe {
            let mut free_bytes_available: u64 = 0;
            let mut _total_bytes: u64 = 0;
            let mut _total_free_bytes: u64 = 0;

            if GetDiskFreeSpaceExW(
                wide_path.as_ptr(),
                &mut free_bytes_available as *mut u64 as *mut _,
                &mut _total_bytes as *mut u64 as *mut _,
                &mut _total_free_bytes as *mut u64 as *mut _,
            ) == 0
            {
                return Err(std::io::Error::last_os_error());
            }

            Ok(free_bytes_available)
        }
    }

    #[cfg(not(any(unix, windows)))]
    {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "Disk space checking is not supported on this platform",
        ))
    }
}
