//! Host terminal adapters for the UART.

use crate::uart::{CharSource, LineInput, IN_LINEBUF_SIZE};

/// Keyboard input from the process's stdin, polled without blocking.
///
/// Each refill returns whatever is already readable, up to one line buffer,
/// so a partial line without a newline is delivered as it stands.
pub struct StdinSource;

impl CharSource for StdinSource {
    #[cfg(unix)]
    fn poll_line(&mut self) -> LineInput {
        read_available(libc::STDIN_FILENO)
    }

    #[cfg(not(unix))]
    fn poll_line(&mut self) -> LineInput {
        LineInput::Pending
    }
}

#[cfg(unix)]
fn read_available(fd: libc::c_int) -> LineInput {
    let mut fds = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    // SAFETY: `fds` is a valid pollfd for the duration of the call and the
    // count matches; a zero timeout never blocks.
    let rc = unsafe { libc::poll(&mut fds, 1, 0) };
    if rc <= 0 || fds.revents & (libc::POLLIN | libc::POLLHUP) == 0 {
        return LineInput::Pending;
    }

    let mut buf = [0u8; IN_LINEBUF_SIZE - 1];
    // SAFETY: `buf` is writable for `buf.len()` bytes. poll reported the fd
    // readable, so one read returns without waiting.
    let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
    match n {
        0 => LineInput::Closed,
        n if n > 0 => LineInput::Line(buf[..n as usize].to_vec()),
        _ => {
            let err = std::io::Error::last_os_error();
            match err.kind() {
                std::io::ErrorKind::Interrupted | std::io::ErrorKind::WouldBlock => {
                    LineInput::Pending
                }
                _ => {
                    log::warn!("[UART] input read failed: {err}");
                    LineInput::Closed
                }
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn pipe() -> (libc::c_int, libc::c_int) {
        let mut fds = [0; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        (fds[0], fds[1])
    }

    fn write_all(fd: libc::c_int, data: &[u8]) {
        let n = unsafe { libc::write(fd, data.as_ptr().cast(), data.len()) };
        assert_eq!(n, data.len() as isize);
    }

    #[test]
    fn test_partial_line_does_not_block() {
        let (rd, wr) = pipe();
        assert_eq!(read_available(rd), LineInput::Pending);

        write_all(wr, b"ab");
        assert_eq!(read_available(rd), LineInput::Line(b"ab".to_vec()));
        assert_eq!(read_available(rd), LineInput::Pending);

        unsafe { libc::close(wr) };
        assert_eq!(read_available(rd), LineInput::Closed);
        unsafe { libc::close(rd) };
    }

    #[test]
    fn test_long_input_read_in_chunks() {
        let (rd, wr) = pipe();
        write_all(wr, &[b'x'; 300]);

        let mut total = 0;
        while let LineInput::Line(chunk) = read_available(rd) {
            assert!(chunk.len() < IN_LINEBUF_SIZE);
            total += chunk.len();
        }
        assert_eq!(total, 300);
        unsafe {
            libc::close(wr);
            libc::close(rd);
        }
    }
}
