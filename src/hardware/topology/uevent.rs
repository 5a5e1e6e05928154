//! Device Event Listener
//!
//! Receives device add/remove notifications over a `NETLINK_KOBJECT_UEVENT`
//! socket and turns whole-disk block events into topology events.
//!
//! The listener joins the udev multicast group rather than the raw kernel
//! one. udev relays an event only after its rules have run and the device's
//! database entry is written, so an `add` already carries the disk identity.

use super::sysfs::{SysfsDevice, SysfsPaths};
use crate::domain::ports::{DeviceAction, DeviceEvent};
use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use std::sync::Arc;

#[cfg(target_os = "linux")]
use crate::error::{Error, Result};
#[cfg(target_os = "linux")]
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
#[cfg(target_os = "linux")]
use tokio::io::unix::AsyncFd;
#[cfg(target_os = "linux")]
use tokio::sync::mpsc;
#[cfg(target_os = "linux")]
use tokio_util::sync::CancellationToken;
#[cfg(target_os = "linux")]
use tracing::{debug, info, warn};

/// Multicast group of events relayed by udev after rule processing
const UDEV_EVENT_GROUP: u32 = 2;

/// Prefix of every udev-relayed message
const UDEV_MESSAGE_PREFIX: &[u8] = b"libudev\0";

/// Magic number following the prefix, in network byte order
const UDEV_MONITOR_MAGIC: u32 = 0xfeed_cafe;

/// Offsets into the udev message header
const UDEV_MAGIC_OFFSET: usize = 8;
const UDEV_PROPERTIES_OFF_OFFSET: usize = 16;
const UDEV_PROPERTIES_LEN_OFFSET: usize = 20;

/// Receive buffer, large enough for a udev header and its properties
const UEVENT_BUFFER_SIZE: usize = 16384;

/// Pending events kept before the listener applies backpressure
const EVENT_CHANNEL_CAPACITY: usize = 64;

// =============================================================================
// Uevent Message
// =============================================================================

/// A parsed device event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uevent {
    pub action: String,
    pub devpath: String,
    pub env: BTreeMap<String, String>,
}

impl Uevent {
    /// Parse a raw event message.
    ///
    /// Accepts both udev-relayed messages (a `libudev` header followed by
    /// `KEY=VALUE\0` properties) and kernel messages
    /// (`action@devpath\0KEY=VALUE\0...`).
    pub fn parse(raw: &[u8]) -> Option<Self> {
        if raw.starts_with(UDEV_MESSAGE_PREFIX) {
            Self::parse_udev(raw)
        } else {
            Self::parse_kernel(raw)
        }
    }

    fn parse_udev(raw: &[u8]) -> Option<Self> {
        let word = |offset: usize| -> Option<[u8; 4]> { raw.get(offset..offset + 4)?.try_into().ok() };

        if u32::from_be_bytes(word(UDEV_MAGIC_OFFSET)?) != UDEV_MONITOR_MAGIC {
            return None;
        }
        let properties_off = u32::from_ne_bytes(word(UDEV_PROPERTIES_OFF_OFFSET)?) as usize;
        let properties_len = u32::from_ne_bytes(word(UDEV_PROPERTIES_LEN_OFFSET)?) as usize;
        let properties = raw.get(properties_off..properties_off.checked_add(properties_len)?)?;

        let env = parse_env(properties);
        let action = env.get("ACTION")?.clone();
        let devpath = env.get("DEVPATH")?.clone();

        Some(Self {
            action,
            devpath,
            env,
        })
    }

    fn parse_kernel(raw: &[u8]) -> Option<Self> {
        let (header, rest) = match raw.iter().position(|b| *b == 0) {
            Some(end) => (&raw[..end], &raw[end + 1..]),
            None => (raw, &[][..]),
        };
        let header = String::from_utf8_lossy(header);
        let (header_action, header_devpath) = header.split_once('@')?;

        let env = parse_env(rest);
        let action = env
            .get("ACTION")
            .cloned()
            .unwrap_or_else(|| header_action.to_string());
        let devpath = env
            .get("DEVPATH")
            .cloned()
            .unwrap_or_else(|| header_devpath.to_string());

        Some(Self {
            action,
            devpath,
            env,
        })
    }

    /// Whether the event concerns a whole-disk block device
    pub fn is_whole_disk(&self) -> bool {
        self.env.get("SUBSYSTEM").map(String::as_str) == Some("block")
            && self.env.get("DEVTYPE").map(String::as_str) == Some("disk")
    }

    pub(crate) fn into_event(self, paths: Arc<SysfsPaths>) -> DeviceEvent<SysfsDevice> {
        let syspath = paths.root.join(self.devpath.trim_start_matches('/'));
        let mut properties = self.env;
        if let Some(devname) = properties.get_mut("DEVNAME") {
            if !devname.starts_with('/') {
                *devname = format!("/dev/{}", devname);
            }
        }

        DeviceEvent {
            action: DeviceAction::parse(&self.action),
            device: SysfsDevice::new(paths, Path::new(&syspath)).with_event_properties(properties),
        }
    }
}

/// Parse NUL-separated `KEY=VALUE` fields
fn parse_env(raw: &[u8]) -> BTreeMap<String, String> {
    raw.split(|b| *b == 0)
        .filter(|f| !f.is_empty())
        .map(String::from_utf8_lossy)
        .filter_map(|f| {
            f.split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
        })
        .collect()
}

// =============================================================================
// Netlink Socket
// =============================================================================

#[cfg(target_os = "linux")]
struct UeventSocket {
    fd: AsyncFd<OwnedFd>,
}

#[cfg(target_os = "linux")]
impl UeventSocket {
    fn bind() -> io::Result<Self> {
        // SAFETY: plain socket(2) call; the result is checked before use.
        let raw = unsafe {
            libc::socket(
                libc::AF_NETLINK,
                libc::SOCK_DGRAM | libc::SOCK_CLOEXEC | libc::SOCK_NONBLOCK,
                libc::NETLINK_KOBJECT_UEVENT,
            )
        };
        if raw < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: `raw` is a freshly created descriptor owned by nobody else.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        // SAFETY: sockaddr_nl is plain old data; all-zero is a valid value.
        let mut addr: libc::sockaddr_nl = unsafe { std::mem::zeroed() };
        addr.nl_family = libc::AF_NETLINK as libc::sa_family_t;
        addr.nl_groups = UDEV_EVENT_GROUP;

        // SAFETY: `addr` outlives the call and the length matches its type.
        let rc = unsafe {
            libc::bind(
                fd.as_raw_fd(),
                &addr as *const libc::sockaddr_nl as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            fd: AsyncFd::new(fd)?,
        })
    }

    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.fd.readable().await?;
            let result = guard.try_io(|inner| {
                // SAFETY: `buf` is valid for writes of `buf.len()` bytes.
                let n = unsafe {
                    libc::recv(
                        inner.get_ref().as_raw_fd(),
                        buf.as_mut_ptr() as *mut libc::c_void,
                        buf.len(),
                        0,
                    )
                };
                if n < 0 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok(n as usize)
                }
            });

            match result {
                Ok(received) => return received,
                Err(_would_block) => continue,
            }
        }
    }
}

// =============================================================================
// Listener Task
// =============================================================================

/// Start forwarding whole-disk uevents until `cancel` fires
#[cfg(target_os = "linux")]
pub(crate) fn spawn_listener(
    paths: Arc<SysfsPaths>,
    cancel: CancellationToken,
) -> Result<mpsc::Receiver<DeviceEvent<SysfsDevice>>> {
    let socket = UeventSocket::bind()
        .map_err(|e| Error::Subscription(format!("netlink uevent socket: {}", e)))?;
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        info!("Listening for udev block device events");
        let mut buf = vec![0u8; UEVENT_BUFFER_SIZE];

        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => break,
                received = socket.recv(&mut buf) => received,
            };

            let len = match received {
                Ok(len) => len,
                Err(e) => {
                    // ENOBUFS means events were dropped; the periodic rescan
                    // catches up
                    warn!("Failed to receive uevent: {}", e);
                    continue;
                }
            };

            let Some(uevent) = Uevent::parse(&buf[..len]) else {
                continue;
            };
            if !uevent.is_whole_disk() {
                continue;
            }

            debug!(action = %uevent.action, devpath = %uevent.devpath, "Block device event");
            let event = uevent.into_event(paths.clone());

            tokio::select! {
                _ = cancel.cancelled() => break,
                sent = tx.send(event) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }

        debug!("Uevent listener stopped");
    });

    Ok(rx)
}
