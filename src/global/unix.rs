use core::ptr::addr_of_mut;

/// A process-wide mutex shared by every `GlobalHeap`.
pub struct Mutex(());

/// `pthread_mutex_t` might be unsafe to move, so we can't put it in `Mutex`.
static mut MUTEX: libc::pthread_mutex_t = libc::PTHREAD_MUTEX_INITIALIZER;

impl Mutex {
    #[inline]
    pub const fn new() -> Self {
        Self(())
    }

    #[inline]
    pub fn lock(&self) {
        unsafe { libc::pthread_mutex_lock(addr_of_mut!(MUTEX)) };
    }

    #[inline]
    pub fn unlock(&self) {
        unsafe { libc::pthread_mutex_unlock(addr_of_mut!(MUTEX)) };
    }
}
