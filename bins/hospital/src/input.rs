//! Command input sources: standard input plus a named FIFO other
//! processes can write commands into.

use std::ffi::CString;
use std::os::unix::io::RawFd;
use std::path::Path;

use anyhow::{bail, Context, Result};

/// Open (creating if needed) the command FIFO. Opened read-write so the
/// descriptor never signals EOF when a writer disconnects.
pub fn open_command_fifo(path: &Path) -> Result<RawFd> {
    let cpath = CString::new(path.to_string_lossy().as_bytes())
        .context("fifo path contains a NUL byte")?;
    let rc = unsafe { libc::mkfifo(cpath.as_ptr(), 0o644) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::EEXIST) {
            bail!("failed to create fifo {}: {err}", path.display());
        }
    }
    let fd = unsafe { libc::open(cpath.as_ptr(), libc::O_RDWR | libc::O_NONBLOCK) };
    if fd < 0 {
        bail!(
            "failed to open fifo {}: {}",
            path.display(),
            std::io::Error::last_os_error()
        );
    }
    Ok(fd)
}

pub fn remove_fifo(path: &Path) {
    let _ = std::fs::remove_file(path);
}

/// Incremental line reader over a polled file descriptor. Keeps the
/// partial tail between reads.
pub struct LineReader {
    fd: RawFd,
    partial: Vec<u8>,
}

impl LineReader {
    pub fn new(fd: RawFd) -> Self {
        LineReader {
            fd,
            partial: Vec::new(),
        }
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Read whatever is available and return the complete lines.
    pub fn drain_lines(&mut self) -> Vec<String> {
        let mut buf = [0u8; 4096];
        let n = unsafe { libc::read(self.fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if n > 0 {
            self.partial.extend_from_slice(&buf[..n as usize]);
        }

        let mut lines = Vec::new();
        while let Some(pos) = self.partial.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.partial.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw[..raw.len() - 1])
                .trim_end_matches('\r')
                .to_string();
            lines.push(line);
        }
        lines
    }
}
