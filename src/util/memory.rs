use crate::util::constants::{BYTES_IN_PAGE, BYTES_IN_WORD};
use crate::util::conversions::raw_is_aligned;
use crate::util::Address;
use libc::{PROT_NONE, PROT_READ, PROT_WRITE};
use std::io::{Error, Result};

/// Access permission of a mapped range.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MmapProtection {
    /// `PROT_NONE`. Any access faults.
    NoAccess,
    /// `PROT_READ`
    ReadOnly,
    /// `PROT_READ | PROT_WRITE`
    ReadWrite,
}

impl MmapProtection {
    fn into_native_flags(self) -> libc::c_int {
        match self {
            Self::NoAccess => PROT_NONE,
            Self::ReadOnly => PROT_READ,
            Self::ReadWrite => PROT_READ | PROT_WRITE,
        }
    }
}

lazy_static! {
    static ref OS_PAGE_SIZE: usize = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
}

pub fn zero(start: Address, len: usize) {
    unsafe { std::ptr::write_bytes(start.to_mut_ptr::<u8>(), 0, len) }
}

/// Map `size` bytes of demand-zero anonymous memory wherever the OS chooses.
pub fn mmap_anywhere(size: usize, prot: MmapProtection) -> Result<Address> {
    let flags = libc::MAP_ANON | libc::MAP_PRIVATE | libc::MAP_NORESERVE;
    let ret = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            size,
            prot.into_native_flags(),
            flags,
            -1,
            0,
        )
    };
    if ret == libc::MAP_FAILED {
        Err(Error::last_os_error())
    } else {
        Ok(Address::from_mut_ptr(ret))
    }
}

pub fn munprotect(start: Address, size: usize) -> Result<()> {
    mprotect_with(start, size, MmapProtection::ReadWrite)
}

pub fn mprotect(start: Address, size: usize) -> Result<()> {
    mprotect_with(start, size, MmapProtection::NoAccess)
}

pub fn mprotect_with(start: Address, size: usize, prot: MmapProtection) -> Result<()> {
    wrap_libc_call(
        &|| unsafe { libc::mprotect(start.to_mut_ptr(), size, prot.into_native_flags()) },
        0,
    )
}

/// Give the pages back to the OS. Private anonymous pages read as zero afterwards.
pub fn madvise_dontneed(start: Address, size: usize) -> Result<()> {
    wrap_libc_call(
        &|| unsafe { libc::madvise(start.to_mut_ptr(), size, libc::MADV_DONTNEED) },
        0,
    )?;
    #[cfg(not(target_os = "linux"))]
    zero(start, size);
    Ok(())
}

pub fn munmap(start: Address, size: usize) -> Result<()> {
    wrap_libc_call(&|| unsafe { libc::munmap(start.to_mut_ptr(), size) }, 0)
}

fn wrap_libc_call<T: PartialEq>(f: &dyn Fn() -> T, expect: T) -> Result<()> {
    let ret = f();
    if ret == expect {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

/// An owned anonymous mapping. The range is unmapped on drop.
#[derive(Debug)]
pub struct MmapRegion {
    name: String,
    start: Address,
    size: usize,
}

impl MmapRegion {
    pub fn map_anonymous(name: &str, size: usize, prot: MmapProtection) -> Result<MmapRegion> {
        debug_assert!(raw_is_aligned(size, BYTES_IN_PAGE));
        // Protection and release work on whole pages of the OS.
        assert!(
            raw_is_aligned(BYTES_IN_PAGE, *OS_PAGE_SIZE),
            "OS page size {} does not divide {}",
            *OS_PAGE_SIZE,
            BYTES_IN_PAGE
        );
        let start = mmap_anywhere(size, prot)?;
        debug!("Mapped {} [{}, {})", name, start, start + size);
        Ok(MmapRegion {
            name: name.to_string(),
            start,
            size,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn start(&self) -> Address {
        self.start
    }

    pub fn end(&self) -> Address {
        self.start + self.size
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn has_address(&self, addr: Address) -> bool {
        self.start <= addr && addr < self.end()
    }

    /// Split off `[new_end, end)` into its own region. Both halves are unmapped independently.
    pub fn remap_at_end(&mut self, new_end: Address, tail_name: &str) -> MmapRegion {
        assert!(
            new_end.is_aligned_to(BYTES_IN_PAGE),
            "{}: split point {} is not page aligned",
            self.name,
            new_end
        );
        assert!(
            self.start <= new_end && new_end <= self.end(),
            "{}: split point {} outside [{}, {})",
            self.name,
            new_end,
            self.start,
            self.end()
        );
        let tail = MmapRegion {
            name: tail_name.to_string(),
            start: new_end,
            size: self.end() - new_end,
        };
        self.size = new_end - self.start;
        tail
    }

    pub fn protect(&self, prot: MmapProtection) -> Result<()> {
        mprotect_with(self.start, self.size, prot)
    }

    /// Drop the physical pages backing the region. The range stays mapped and reads as zero.
    pub fn release_pages(&self) -> Result<()> {
        madvise_dontneed(self.start, self.size)
    }
}

impl Drop for MmapRegion {
    fn drop(&mut self) {
        if self.size == 0 {
            return;
        }
        if let Err(e) = munmap(self.start, self.size) {
            warn!("Failed to unmap {}: {}", self.name, e);
        }
    }
}

/// Copy `size` bytes from `src` to `dest`, skipping whole destination pages whose source page is
/// all zero. `dest` must already be zero filled. Returns the number of bytes whose write was
/// avoided.
///
/// # Safety
/// Both ranges must be valid, word aligned and non-overlapping.
pub unsafe fn copy_avoid_dirty(dest: Address, src: Address, size: usize) -> usize {
    if size <= BYTES_IN_PAGE {
        // The current page and part of the next one get dirty anyway.
        std::ptr::copy_nonoverlapping(src.to_ptr::<u8>(), dest.to_mut_ptr::<u8>(), size);
        return 0;
    }
    debug_assert!(dest.is_aligned_to(BYTES_IN_WORD) && src.is_aligned_to(BYTES_IN_WORD));
    if cfg!(debug_assertions) {
        for i in 0..size {
            debug_assert_eq!((dest + i).load::<u8>(), 0);
        }
    }
    let mut saved_bytes = 0;
    // The first partial page is already dirty.
    let page_remain = dest.align_up(BYTES_IN_PAGE) - dest;
    std::ptr::copy_nonoverlapping(src.to_ptr::<u8>(), dest.to_mut_ptr::<u8>(), page_remain);
    let limit = src + size;
    let mut byte_src = src + page_remain;
    let mut byte_dest = dest + page_remain;
    while byte_src + BYTES_IN_PAGE < limit {
        let word_src = std::slice::from_raw_parts(
            byte_src.to_ptr::<usize>(),
            BYTES_IN_PAGE / BYTES_IN_WORD,
        );
        let word_dest = byte_dest.to_mut_ptr::<usize>();
        let mut all_zero = true;
        for (i, word) in word_src.iter().enumerate() {
            if *word != 0 {
                all_zero = false;
                word_dest.add(i).write(*word);
            }
        }
        if all_zero {
            saved_bytes += BYTES_IN_PAGE;
        }
        byte_src += BYTES_IN_PAGE;
        byte_dest += BYTES_IN_PAGE;
    }
    std::ptr::copy_nonoverlapping(
        byte_src.to_ptr::<u8>(),
        byte_dest.to_mut_ptr::<u8>(),
        limit - byte_src,
    );
    saved_bytes
}
