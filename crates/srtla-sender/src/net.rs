//! Socket readiness for the engine loop.
//!
//! The core is single-threaded and cooperative: one `poll(2)` across the
//! encoder listener and every link socket (zombies included) with the tick
//! deadline is its only suspension point.

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// Wait until any of `fds` is readable or `timeout` elapses. Returns one
/// readiness flag per descriptor, in order. `EINTR` reads as "nothing
/// ready"; error and hangup conditions read as readable so the owning
/// socket's next read surfaces the failure.
pub fn wait_readable(fds: &[RawFd], timeout: Duration) -> io::Result<Vec<bool>> {
    let mut pollfds: Vec<libc::pollfd> = fds
        .iter()
        .map(|&fd| libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        })
        .collect();

    let timeout_ms = timeout.as_millis().min(i32::MAX as u128) as libc::c_int;
    let rc = unsafe { libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, timeout_ms) };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(vec![false; fds.len()]);
        }
        return Err(err);
    }

    Ok(pollfds
        .iter()
        .map(|p| p.revents & (libc::POLLIN | libc::POLLERR | libc::POLLHUP) != 0)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::UdpSocket;
    use std::os::unix::io::AsRawFd;
    use std::time::Instant;

    #[test]
    fn times_out_with_nothing_ready() {
        let sock = UdpSocket::bind("127.0.0.1:0").unwrap();
        let start = Instant::now();
        let ready = wait_readable(&[sock.as_raw_fd()], Duration::from_millis(50)).unwrap();
        assert_eq!(ready, vec![false]);
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn reports_the_ready_socket() {
        let a = UdpSocket::bind("127.0.0.1:0").unwrap();
        let b = UdpSocket::bind("127.0.0.1:0").unwrap();
        let tx = UdpSocket::bind("127.0.0.1:0").unwrap();
        tx.send_to(b"ping", b.local_addr().unwrap()).unwrap();

        let ready =
            wait_readable(&[a.as_raw_fd(), b.as_raw_fd()], Duration::from_secs(1)).unwrap();
        assert!(!ready[0]);
        assert!(ready[1]);
    }

    #[test]
    fn empty_set_just_sleeps() {
        let start = Instant::now();
        let ready = wait_readable(&[], Duration::from_millis(30)).unwrap();
        assert!(ready.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }
}
