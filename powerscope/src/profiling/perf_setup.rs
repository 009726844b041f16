//! # Sampling Source Setup
//!
//! Opens the kernel sampling source and maps its shared ring buffer.
//!
//! ## Functions
//!
//! - [`SamplingSource::open()`] - `perf_event_open(2)` on the target, created disabled
//! - [`SamplingSource::map_ring()`] - map control page + data pages as an [`MmapRing`]
//! - [`SamplingSource::enable()`] / [`SamplingSource::disable()`] - arm / disarm
//!
//! ## Event
//!
//! - **Hardware**: `PERF_COUNT_HW_INSTRUCTIONS` (retired instructions)
//! - **Trigger**: frequency mode at the configured rate
//! - **Payload**: `PERF_SAMPLE_CALLCHAIN`
//!
//! All failures here happen before sampling starts and are fatal.

#![allow(unsafe_code)] // perf_event_open, mmap and ioctl require unsafe

use log::{debug, info};
use powerscope_common::{
    PerfEventAttr, PerfEventMmapPage, PERF_EVENT_IOC_DISABLE, PERF_EVENT_IOC_ENABLE,
    PERF_EVENT_IOC_RESET,
};
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::ptr::{self, addr_of, addr_of_mut, NonNull};

use super::ring_buffer::{ControlSnapshot, RingStorage};
use crate::domain::{Pid, ProfilerError};

/// Open `perf_event` counter attached to the target process
pub struct SamplingSource {
    fd: OwnedFd,
}

impl SamplingSource {
    /// Open an instruction-sampling counter on `pid` (all CPUs), disabled
    ///
    /// # Errors
    /// Returns an error if the kernel rejects the event (permissions,
    /// `perf_event_paranoid`, missing PMU, unknown process)
    pub fn open(pid: Pid, frequency_hz: u64, user_only: bool) -> Result<Self, ProfilerError> {
        let attr = PerfEventAttr::instruction_callchains(frequency_hz, user_only);

        // SAFETY: attr is a valid perf_event_attr whose size field matches its layout
        let ret = unsafe {
            libc::syscall(
                libc::SYS_perf_event_open,
                ptr::from_ref(&attr),
                pid.0,
                -1 as libc::c_int,
                -1 as libc::c_int,
                0 as libc::c_ulong,
            )
        };
        if ret < 0 {
            let source = io::Error::last_os_error();
            if source.raw_os_error() == Some(libc::ESRCH) {
                return Err(ProfilerError::ProcessNotFound(pid));
            }
            return Err(ProfilerError::SamplingSourceUnavailable { pid, source });
        }

        let raw = libc::c_int::try_from(ret).map_err(|_| ProfilerError::SamplingSourceUnavailable {
            pid,
            source: io::Error::other("perf_event_open returned an out-of-range descriptor"),
        })?;
        // SAFETY: the kernel just handed us this descriptor and nothing else owns it
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        info!("Opened instruction sampling on {pid} at {frequency_hz} Hz (user_only={user_only})");
        Ok(Self { fd })
    }

    /// Map the ring buffer: one control page followed by `data_pages` pages
    ///
    /// # Errors
    /// Returns an error if `data_pages` is not a power of two or mmap fails
    pub fn map_ring(&self, data_pages: usize) -> Result<MmapRing, ProfilerError> {
        if !data_pages.is_power_of_two() {
            return Err(ProfilerError::InvalidBufferGeometry(format!(
                "{data_pages} data pages is not a power of two"
            )));
        }
        MmapRing::map(&self.fd, data_pages)
    }

    /// Zero the counter and start sampling
    ///
    /// # Errors
    /// Returns an error if either ioctl fails
    pub fn enable(&self) -> Result<(), ProfilerError> {
        self.ioctl(PERF_EVENT_IOC_RESET, "reset")?;
        self.ioctl(PERF_EVENT_IOC_ENABLE, "enable")
    }

    /// Stop sampling
    ///
    /// # Errors
    /// Returns an error if the ioctl fails
    pub fn disable(&self) -> Result<(), ProfilerError> {
        self.ioctl(PERF_EVENT_IOC_DISABLE, "disable")
    }

    #[allow(clippy::cast_possible_truncation)]
    fn ioctl(&self, request: u64, action: &'static str) -> Result<(), ProfilerError> {
        // SAFETY: fd is a live perf_event descriptor and these requests take no argument
        let ret = unsafe { libc::ioctl(self.fd.as_raw_fd(), request as _, 0) };
        if ret == -1 {
            return Err(ProfilerError::SamplingControlFailed {
                action,
                source: io::Error::last_os_error(),
            });
        }
        debug!("perf_event {action} ok");
        Ok(())
    }
}

/// The kernel-shared ring buffer of a [`SamplingSource`]
///
/// Cursor access goes through volatile reads/writes of the control page; data
/// access goes through bounds-checked slices of the data region. The fences
/// that order them live in
/// [`RingBufferReader::drain`](super::RingBufferReader::drain).
pub struct MmapRing {
    base: NonNull<libc::c_void>,
    map_len: usize,
    data_offset: usize,
    data_size: usize,
}

impl MmapRing {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn map(fd: &OwnedFd, data_pages: usize) -> Result<Self, ProfilerError> {
        // SAFETY: sysconf has no preconditions
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
        let map_len = page_size * (1 + data_pages);

        // SAFETY: mapping a perf_event fd; the kernel validates length and flags
        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                map_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd.as_raw_fd(),
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(ProfilerError::BufferMapFailed {
                bytes: map_len,
                source: io::Error::last_os_error(),
            });
        }
        let base = NonNull::new(base).ok_or_else(|| ProfilerError::BufferMapFailed {
            bytes: map_len,
            source: io::Error::other("mmap returned null"),
        })?;

        let mut ring = Self { base, map_len, data_offset: page_size, data_size: page_size * data_pages };

        // Kernels before 4.1 leave data_offset/data_size zero
        let page = ring.page();
        // SAFETY: page points at the mapped control page
        let (offset, size) =
            unsafe { (ptr::read_volatile(addr_of!((*page).data_offset)), ptr::read_volatile(addr_of!((*page).data_size))) };
        if size != 0 {
            ring.data_offset = offset as usize;
            ring.data_size = size as usize;
        }

        if ring.data_offset + ring.data_size > map_len || !ring.data_size.is_power_of_two() {
            return Err(ProfilerError::InvalidBufferGeometry(format!(
                "kernel reported data region {}+{} in a {map_len}-byte mapping",
                ring.data_offset, ring.data_size
            )));
        }

        info!(
            "Mapped ring buffer: {} KiB data at offset {} ({} bytes total)",
            ring.data_size / 1024,
            ring.data_offset,
            map_len
        );
        Ok(ring)
    }

    fn page(&self) -> *mut PerfEventMmapPage {
        self.base.as_ptr().cast::<PerfEventMmapPage>()
    }
}

impl RingStorage for MmapRing {
    fn control(&self) -> ControlSnapshot {
        let page = self.page();
        // SAFETY: page points at the mapped control page for the lifetime of self
        unsafe {
            ControlSnapshot {
                version: ptr::read_volatile(addr_of!((*page).version)),
                compat_version: ptr::read_volatile(addr_of!((*page).compat_version)),
                index: ptr::read_volatile(addr_of!((*page).index)),
                time_enabled: ptr::read_volatile(addr_of!((*page).time_enabled)),
                time_running: ptr::read_volatile(addr_of!((*page).time_running)),
                data_head: ptr::read_volatile(addr_of!((*page).data_head)),
                data_tail: ptr::read_volatile(addr_of!((*page).data_tail)),
                data_offset: ptr::read_volatile(addr_of!((*page).data_offset)),
                data_size: ptr::read_volatile(addr_of!((*page).data_size)),
            }
        }
    }

    fn capacity(&self) -> u64 {
        self.data_size as u64
    }

    fn load_head(&self) -> u64 {
        // SAFETY: control page is mapped for the lifetime of self
        unsafe { ptr::read_volatile(addr_of!((*self.page()).data_head)) }
    }

    fn load_tail(&self) -> u64 {
        // SAFETY: control page is mapped for the lifetime of self
        unsafe { ptr::read_volatile(addr_of!((*self.page()).data_tail)) }
    }

    fn store_tail(&mut self, tail: u64) {
        // SAFETY: control page is mapped writable; data_tail is consumer-owned
        unsafe { ptr::write_volatile(addr_of_mut!((*self.page()).data_tail), tail) }
    }

    fn bytes(&self, offset: usize, len: usize) -> Option<&[u8]> {
        if offset.checked_add(len)? > self.data_size {
            return None;
        }
        // SAFETY: in bounds of the data region; the reader only asks for bytes
        // in [tail, head), which the kernel does not write until tail moves
        unsafe {
            let start = self.base.as_ptr().cast::<u8>().add(self.data_offset + offset);
            Some(std::slice::from_raw_parts(start, len))
        }
    }
}

impl Drop for MmapRing {
    fn drop(&mut self) {
        // SAFETY: base/map_len describe the mapping created in `map`
        unsafe {
            libc::munmap(self.base.as_ptr(), self.map_len);
        }
    }
}
