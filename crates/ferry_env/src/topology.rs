//! Cross-platform detection of cache line size, L1 data cache size and the
//! number of hardware threads. Missing values fall back to conservative
//! defaults so callers never have to handle "unknown".

use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Topology {
    /// Bytes.
    pub cache_line: usize,
    /// Bytes.
    pub l1_data: usize,
    pub hardware_threads: usize,
}

impl Topology {
    /// Detect once per process and return the cached answer afterwards.
    pub fn detect() -> Self {
        static INSTANCE: OnceLock<Topology> = OnceLock::new();
        *INSTANCE.get_or_init(Self::probe)
    }

    fn probe() -> Self {
        Self {
            cache_line: cache_line_size().unwrap_or(64),
            l1_data: l1_data_size().unwrap_or(32 * 1024),
            hardware_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }

    /// Worker threads to spawn when the caller did not pin a count.
    /// One hardware thread is left for the thread that drives the frame.
    pub fn default_worker_threads(&self) -> usize {
        self.hardware_threads.saturating_sub(1).max(1)
    }

    /// How many values of `elem_size` bytes fit into one L1-sized batch.
    pub fn elements_per_chunk(&self, elem_size: usize) -> usize {
        let budget = self.l1_data.max(crate::FALLBACK_CHUNK_BYTES);
        (budget / elem_size.max(1)).max(1)
    }
}

// Windows: walk the logical processor table for the level 1 data cache.

#[cfg(target_os = "windows")]
fn data_caches() -> Vec<(u8, usize, usize)> {
    use windows_sys::Win32::System::SystemInformation::{
        CacheData, GetLogicalProcessorInformation, RelationCache,
        SYSTEM_LOGICAL_PROCESSOR_INFORMATION,
    };
    let mut out = Vec::new();
    unsafe {
        let mut len = 0u32;
        GetLogicalProcessorInformation(std::ptr::null_mut(), &mut len);
        if len == 0 {
            return out;
        }
        let count = len as usize / std::mem::size_of::<SYSTEM_LOGICAL_PROCESSOR_INFORMATION>();
        let mut buf: Vec<SYSTEM_LOGICAL_PROCESSOR_INFORMATION> = Vec::with_capacity(count);
        if GetLogicalProcessorInformation(buf.as_mut_ptr(), &mut len) == 0 {
            return out;
        }
        // SAFETY: the call above initialized `len` bytes of the buffer.
        buf.set_len(len as usize / std::mem::size_of::<SYSTEM_LOGICAL_PROCESSOR_INFORMATION>());
        for rec in &buf {
            if rec.Relationship == RelationCache {
                let cache = rec.Anonymous.Cache;
                if cache.Type == CacheData {
                    out.push((cache.Level, cache.LineSize as usize, cache.Size as usize));
                }
            }
        }
    }
    out
}
#[cfg(target_os = "windows")]
fn cache_line_size() -> Option<usize> {
    data_caches().into_iter().find(|c| c.0 == 1).map(|c| c.1)
}
#[cfg(target_os = "windows")]
fn l1_data_size() -> Option<usize> {
    data_caches().into_iter().find(|c| c.0 == 1).map(|c| c.2)
}

// Darwin: sysctl exposes both values directly.

#[cfg(any(target_os = "macos", target_os = "ios"))]
fn sysctl_value(name: &str) -> Option<usize> {
    use libc::{c_void, size_t, sysctlbyname};
    let cname = std::ffi::CString::new(name).ok()?;
    let mut val: usize = 0;
    let mut len: size_t = std::mem::size_of::<usize>() as _;
    // SAFETY: `val` and `len` describe a valid, writable usize.
    let rc = unsafe {
        sysctlbyname(
            cname.as_ptr(),
            &mut val as *mut _ as *mut c_void,
            &mut len,
            std::ptr::null_mut(),
            0,
        )
    };
    (rc == 0 && val != 0).then_some(val)
}
#[cfg(any(target_os = "macos", target_os = "ios"))]
fn cache_line_size() -> Option<usize> {
    sysctl_value("hw.cachelinesize")
}
#[cfg(any(target_os = "macos", target_os = "ios"))]
fn l1_data_size() -> Option<usize> {
    sysctl_value("hw.l1dcachesize")
}

// Linux: sysfs describes cpu0's caches under index0..indexN.

#[cfg(any(target_os = "linux", target_os = "android"))]
fn sysfs_cache(index: usize, leaf: &str) -> Option<String> {
    let path = format!("/sys/devices/system/cpu/cpu0/cache/index{index}/{leaf}");
    std::fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}
#[cfg(any(target_os = "linux", target_os = "android"))]
fn parse_size_token(token: &str) -> Option<usize> {
    // Sysfs reports sizes such as "32K" or "2M".
    let digits = token.chars().take_while(|c| c.is_ascii_digit()).count();
    let (num, suffix) = token.split_at(digits);
    let n: usize = num.parse().ok()?;
    let mult = match suffix.trim().to_ascii_uppercase().as_str() {
        "" => 1,
        "K" => 1024,
        "M" => 1024 * 1024,
        _ => return None,
    };
    Some(n * mult)
}
#[cfg(any(target_os = "linux", target_os = "android"))]
fn l1_data_index() -> Option<usize> {
    (0..8).find(|&i| {
        sysfs_cache(i, "type").as_deref() == Some("Data")
            && sysfs_cache(i, "level").as_deref() == Some("1")
    })
}
#[cfg(any(target_os = "linux", target_os = "android"))]
fn cache_line_size() -> Option<usize> {
    let index = l1_data_index()?;
    sysfs_cache(index, "coherency_line_size")?
        .parse::<usize>()
        .ok()
        .filter(|&n| n > 0)
}
#[cfg(any(target_os = "linux", target_os = "android"))]
fn l1_data_size() -> Option<usize> {
    parse_size_token(&sysfs_cache(l1_data_index()?, "size")?)
}

// Anything else reports nothing and takes the defaults.

#[cfg(not(any(
    target_os = "windows",
    target_os = "macos",
    target_os = "ios",
    target_os = "linux",
    target_os = "android"
)))]
fn cache_line_size() -> Option<usize> {
    None
}
#[cfg(not(any(
    target_os = "windows",
    target_os = "macos",
    target_os = "ios",
    target_os = "linux",
    target_os = "android"
)))]
fn l1_data_size() -> Option<usize> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detection_yields_usable_values() {
        let topo = Topology::detect();
        assert!(topo.cache_line >= 16);
        assert!(topo.l1_data > 0);
        assert!(topo.default_worker_threads() >= 1);
    }

    #[test]
    fn chunk_sizing_never_returns_zero() {
        let topo = Topology {
            cache_line: 64,
            l1_data: 32 * 1024,
            hardware_threads: 4,
        };
        assert_eq!(topo.elements_per_chunk(16), 2048);
        assert_eq!(topo.elements_per_chunk(0), 32 * 1024);
        assert_eq!(topo.elements_per_chunk(1 << 20), 1);
    }

    #[cfg(any(target_os = "linux", target_os = "android"))]
    #[test]
    fn parses_sysfs_size_tokens() {
        assert_eq!(parse_size_token("32K"), Some(32 * 1024));
        assert_eq!(parse_size_token("2M"), Some(2 * 1024 * 1024));
        assert_eq!(parse_size_token("512"), Some(512));
        assert_eq!(parse_size_token("1Q"), None);
    }
}
