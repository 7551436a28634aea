//! Self-pipe signal handling: the handler writes the signal number to a
//! pipe the coordinator polls alongside its command inputs, so signal
//! work always happens on the main loop.

use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicI32, Ordering};

use anyhow::{bail, Result};

static SIGNAL_PIPE_WRITE: AtomicI32 = AtomicI32::new(-1);

extern "C" fn forward_signal(sig: libc::c_int) {
    let fd = SIGNAL_PIPE_WRITE.load(Ordering::Relaxed);
    if fd >= 0 {
        let byte = sig as u8;
        // Async-signal-safe: a single write of one byte.
        unsafe {
            libc::write(fd, &byte as *const u8 as *const libc::c_void, 1);
        }
    }
}

/// Create the self-pipe and route the given signals through it. Returns
/// the read end for the poll loop.
pub fn install(signals: &[libc::c_int]) -> Result<RawFd> {
    let mut fds = [0 as libc::c_int; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        bail!("failed to create signal pipe: {}", std::io::Error::last_os_error());
    }
    for fd in fds {
        unsafe {
            let flags = libc::fcntl(fd, libc::F_GETFL);
            libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
        }
    }
    SIGNAL_PIPE_WRITE.store(fds[1], Ordering::Release);

    for &sig in signals {
        unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = forward_signal as usize;
            action.sa_flags = libc::SA_RESTART;
            libc::sigemptyset(&mut action.sa_mask);
            if libc::sigaction(sig, &action, std::ptr::null_mut()) != 0 {
                bail!("failed to install handler for signal {sig}");
            }
        }
    }
    Ok(fds[0])
}

/// Drain every signal byte currently queued on the pipe.
pub fn drain(fd: RawFd) -> Vec<libc::c_int> {
    let mut signals = Vec::new();
    let mut buf = [0u8; 64];
    loop {
        let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if n <= 0 {
            break;
        }
        signals.extend(buf[..n as usize].iter().map(|&b| b as libc::c_int));
    }
    signals
}
