pub mod bindings;
pub mod syscall;

/// Dereferences the pointer and offsets by the size of the pointee type,
/// then returns the dereferenced value.
#[inline]
pub unsafe fn deref_offset<T: Copy>(ptr: &mut *const u8) -> T {
    let val = *(*ptr as *const T);
    *ptr = ptr.add(size_of::<T>());
    val
}

pub type Attr = bindings::perf_event_attr;

/// The system's memory page size, as reported by `sysconf(_SC_PAGESIZE)`.
pub fn page_size() -> usize {
    static PAGE_SIZE: std::sync::OnceLock<usize> = std::sync::OnceLock::new();
    *PAGE_SIZE.get_or_init(|| unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize })
}
