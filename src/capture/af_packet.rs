//! AF_PACKET raw sockets driven by tokio's reactor

use super::Capture;
use crate::protocol::MacAddr;
use crate::{Error, Result};
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;

const ETH_P_ALL_BE: u16 = (libc::ETH_P_ALL as u16).to_be();

/// Map a libc return value to `io::Result`
fn cvt(ret: libc::c_int) -> io::Result<libc::c_int> {
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

fn not_found(ifname: &str) -> Error {
    Error::InterfaceNotFound {
        name: ifname.to_string(),
    }
}

/// Raw socket bound to a single interface, receiving every EtherType
pub struct AfPacketSocket {
    fd: AsyncFd<OwnedFd>,
    ifindex: i32,
    name: String,
    promiscuous: bool,
}

impl AfPacketSocket {
    /// Bind to `ifname`. Gateway ports run promiscuous because they answer
    /// for addresses the kernel does not own; fallback interfaces do not.
    pub fn bind(ifname: &str, promiscuous: bool) -> Result<Self> {
        let raw = cvt(unsafe {
            libc::socket(
                libc::AF_PACKET,
                libc::SOCK_RAW | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
                i32::from(ETH_P_ALL_BE),
            )
        })?;
        // closes the descriptor on every early return below
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let ifindex = ifindex_of(fd.as_raw_fd(), ifname)?;

        let mut addr: libc::sockaddr_ll = unsafe { mem::zeroed() };
        addr.sll_family = libc::AF_PACKET as u16;
        addr.sll_protocol = ETH_P_ALL_BE;
        addr.sll_ifindex = ifindex;
        cvt(unsafe {
            libc::bind(
                fd.as_raw_fd(),
                &addr as *const libc::sockaddr_ll as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        })?;

        if promiscuous {
            promisc_membership(fd.as_raw_fd(), ifindex, libc::PACKET_ADD_MEMBERSHIP)?;
        }

        Ok(Self {
            fd: AsyncFd::with_interest(fd, Interest::READABLE | Interest::WRITABLE)?,
            ifindex,
            name: ifname.to_string(),
            promiscuous,
        })
    }

    /// Wait for an inbound frame and return its length.
    ///
    /// Our own transmissions loop back tagged `PACKET_OUTGOING` and are skipped.
    pub async fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        loop {
            let mut guard = self.fd.readable().await?;
            let received = guard.try_io(|fd| {
                let mut from: libc::sockaddr_ll = unsafe { mem::zeroed() };
                let mut from_len = mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t;
                let n = unsafe {
                    libc::recvfrom(
                        fd.as_raw_fd(),
                        buf.as_mut_ptr().cast(),
                        buf.len(),
                        0,
                        (&mut from as *mut libc::sockaddr_ll).cast(),
                        &mut from_len,
                    )
                };
                if n < 0 {
                    return Err(io::Error::last_os_error());
                }
                Ok((n as usize, from.sll_pkttype))
            });

            match received {
                Ok(Ok((_, pkttype))) if pkttype == libc::PACKET_OUTGOING as u8 => {}
                Ok(Ok((len, _))) => return Ok(len),
                Ok(Err(e)) => return Err(e.into()),
                Err(_would_block) => {}
            }
        }
    }

    pub async fn send(&self, frame: &[u8]) -> Result<usize> {
        loop {
            let mut guard = self.fd.writable().await?;
            let sent = guard.try_io(|fd| {
                let n = unsafe { libc::send(fd.as_raw_fd(), frame.as_ptr().cast(), frame.len(), 0) };
                if n < 0 {
                    return Err(io::Error::last_os_error());
                }
                Ok(n as usize)
            });

            match sent {
                Ok(result) => return Ok(result?),
                Err(_would_block) => {}
            }
        }
    }

    pub fn ifindex(&self) -> i32 {
        self.ifindex
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl AsRawFd for AfPacketSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.get_ref().as_raw_fd()
    }
}

impl Drop for AfPacketSocket {
    fn drop(&mut self) {
        if self.promiscuous {
            let _ = promisc_membership(self.as_raw_fd(), self.ifindex, libc::PACKET_DROP_MEMBERSHIP);
        }
    }
}

impl Capture for AfPacketSocket {
    async fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        AfPacketSocket::recv(self, buf).await
    }

    async fn send(&self, frame: &[u8]) -> Result<usize> {
        AfPacketSocket::send(self, frame).await
    }
}

fn ifindex_of(fd: RawFd, ifname: &str) -> Result<i32> {
    let mut ifr: libc::ifreq = unsafe { mem::zeroed() };
    // room for the trailing NUL
    if ifname.is_empty() || ifname.len() >= ifr.ifr_name.len() || ifname.contains('\0') {
        return Err(not_found(ifname));
    }
    for (dst, src) in ifr.ifr_name.iter_mut().zip(ifname.bytes()) {
        *dst = src as libc::c_char;
    }

    cvt(unsafe { libc::ioctl(fd, libc::SIOCGIFINDEX, &mut ifr) }).map_err(|_| not_found(ifname))?;
    Ok(unsafe { ifr.ifr_ifru.ifru_ifindex })
}

fn promisc_membership(fd: RawFd, ifindex: i32, op: libc::c_int) -> Result<()> {
    let mreq = libc::packet_mreq {
        mr_ifindex: ifindex,
        mr_type: libc::PACKET_MR_PROMISC as u16,
        mr_alen: 0,
        mr_address: [0; 8],
    };
    cvt(unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_PACKET,
            op,
            (&mreq as *const libc::packet_mreq).cast(),
            mem::size_of::<libc::packet_mreq>() as libc::socklen_t,
        )
    })?;
    Ok(())
}

/// Hardware address of `ifname` as reported by sysfs
pub fn interface_mac(ifname: &str) -> Result<MacAddr> {
    if ifname.is_empty() || ifname.contains('/') {
        return Err(not_found(ifname));
    }

    let path = format!("/sys/class/net/{}/address", ifname);
    let content = std::fs::read_to_string(&path).map_err(|_| not_found(ifname))?;
    content
        .trim()
        .parse()
        .map_err(|e| Error::Config(format!("{}: {}", path, e)))
}
