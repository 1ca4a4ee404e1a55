use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use mdns_sd::{ResolvedService, ServiceDaemon, ServiceEvent};

use tokio::time::Instant;

use tracing::{debug, error, warn};

use crate::error::{Error, ErrorKind, Result};

// Service type announced by shading actors.
const SERVICE_TYPE: &str = "_eltako._tcp.local.";

// Announcements not re-seen within this window are evicted.
const ANNOUNCEMENT_TTL: Duration = Duration::from_secs(30);

// Interval between two eviction sweeps.
const SWEEP_INTERVAL: Duration = Duration::from_secs(5);

// Length of one browse session.
const BROWSE_WINDOW: Duration = Duration::from_secs(5);

// Pause between two browse sessions.
const BROWSE_PAUSE: Duration = Duration::from_secs(5);

/// A service announcement of a shading actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    /// Instance name of the announced service.
    pub instance: String,
    /// Announced IPv4 address.
    pub address: Ipv4Addr,
    /// Announced port.
    pub port: u16,
    /// Product name from the `pn` text record.
    pub product_name: String,
    /// Serial number from the `sn` text record.
    pub serial: String,
    /// Model from the `md` text record.
    pub model: String,
}

impl Announcement {
    fn from_service(info: &ResolvedService) -> Option<Self> {
        let address = info.get_addresses_v4().into_iter().next()?;

        let fullname = info.get_fullname();
        let instance = fullname
            .strip_suffix(SERVICE_TYPE)
            .map_or(fullname, |name| name.trim_end_matches('.'));

        let property =
            |key: &str| info.get_property_val_str(key).unwrap_or_default().to_string();

        Some(Self {
            instance: instance.to_string(),
            address,
            port: info.get_port(),
            // Some responders escape non-ASCII bytes in text records.
            product_name: decode_escaped_decimal(&property("pn")),
            serial: property("sn"),
            model: property("md"),
        })
    }
}

/// A lifecycle event emitted by the discovery reconciler.
#[derive(Debug, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// A previously unseen announcement appeared.
    Added(Announcement),
    /// A known announcement changed one of its fields.
    Updated(Announcement),
    /// A known announcement was not re-seen within the time-to-live.
    Removed(Announcement),
}

#[derive(Debug)]
struct CacheEntry {
    announcement: Announcement,
    last_seen: Instant,
}

/// The service discovery reconciler.
///
/// Announcements are cached by `address:port`. A new key emits
/// [`DiscoveryEvent::Added`], a changed announcement emits
/// [`DiscoveryEvent::Updated`], and an unchanged one only renews its
/// time-to-live. A background sweep evicts entries not re-seen within
/// 30 seconds and emits [`DiscoveryEvent::Removed`].
#[derive(Debug)]
pub struct Discovery {
    cache: Mutex<HashMap<String, CacheEntry>>,
    events: flume::Sender<DiscoveryEvent>,
}

impl Discovery {
    /// Creates a [`Discovery`] transmitting its events to the given
    /// channel.
    #[must_use]
    pub fn new(events: flume::Sender<DiscoveryEvent>) -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Starts the browse and eviction tasks.
    ///
    /// Browsing restarts on a fixed 10 second cadence, with each
    /// session running for up to 5 seconds. This bounds discovery
    /// latency without a persistent listening connection.
    ///
    /// # Errors
    ///
    /// An error is returned when the `mDNS` daemon cannot be created.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let daemon = ServiceDaemon::new().map_err(|e| {
            Error::new(ErrorKind::Discovery, format!("failed to create resolver: {e}"))
        })?;

        let discovery = Arc::clone(self);
        drop(tokio::spawn(async move {
            discovery.run_sweeper().await;
        }));

        let discovery = Arc::clone(self);
        drop(tokio::spawn(async move {
            discovery.run_browser(daemon).await;
        }));

        Ok(())
    }

    async fn run_sweeper(&self) {
        loop {
            tokio::time::sleep(SWEEP_INTERVAL).await;
            self.sweep();
        }
    }

    async fn run_browser(&self, daemon: ServiceDaemon) {
        loop {
            let receiver = match daemon.browse(SERVICE_TYPE) {
                Ok(receiver) => receiver,
                Err(e) => {
                    error!("Browse failed: {e}");
                    tokio::time::sleep(BROWSE_PAUSE).await;
                    continue;
                }
            };

            let deadline = Instant::now() + BROWSE_WINDOW;
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }

                match tokio::time::timeout(remaining, receiver.recv_async()).await {
                    Ok(Ok(ServiceEvent::ServiceResolved(info))) => {
                        match Announcement::from_service(&info) {
                            Some(announcement) => self.observe(announcement),
                            None => debug!(
                                "Ignoring announcement without IPv4 address: {}",
                                info.get_fullname()
                            ),
                        }
                    }
                    Ok(Ok(_)) => {}
                    // Daemon side closed or window elapsed.
                    Ok(Err(_)) | Err(_) => break,
                }
            }

            if let Err(e) = daemon.stop_browse(SERVICE_TYPE) {
                warn!("Failed to stop browsing: {e}");
            }

            tokio::time::sleep(BROWSE_PAUSE).await;
        }
    }

    fn observe(&self, announcement: Announcement) {
        let key = format!("{}:{}", announcement.address, announcement.port);
        let now = Instant::now();

        let mut cache = self.lock();
        match cache.get_mut(&key) {
            None => {
                drop(cache.insert(
                    key,
                    CacheEntry {
                        announcement: announcement.clone(),
                        last_seen: now,
                    },
                ));
                self.emit(DiscoveryEvent::Added(announcement));
            }
            Some(entry) if entry.announcement != announcement => {
                entry.announcement = announcement.clone();
                entry.last_seen = now;
                self.emit(DiscoveryEvent::Updated(announcement));
            }
            // Unchanged announcement, only renew the time-to-live.
            Some(entry) => entry.last_seen = now,
        }
    }

    fn sweep(&self) {
        let now = Instant::now();

        let mut cache = self.lock();
        let expired: Vec<String> = cache
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.last_seen) > ANNOUNCEMENT_TTL)
            .map(|(key, _)| key.clone())
            .collect();

        for key in expired {
            if let Some(entry) = cache.remove(&key) {
                self.emit(DiscoveryEvent::Removed(entry.announcement));
            }
        }
    }

    fn emit(&self, event: DiscoveryEvent) {
        if let Err(e) = self.events.send(event) {
            error!("Failed to transmit discovery event: {e}");
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// Decodes escaped-decimal byte sequences of the form `\NNN`, i.e.
// `B\195\188ro Ost` into `Büro Ost`. Falls back to the raw string when
// the decoded bytes are not legal UTF-8.
fn decode_escaped_decimal(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());

    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 4 <= bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(u8::is_ascii_digit) {
                let value = digits
                    .iter()
                    .fold(0u32, |acc, d| acc * 10 + u32::from(d - b'0'));
                if let Ok(byte) = u8::try_from(value) {
                    decoded.push(byte);
                    i += 4;
                    continue;
                }
            }
        }
        decoded.push(bytes[i]);
        i += 1;
    }

    String::from_utf8(decoded).unwrap_or_else(|_| s.to_string())
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::time::Duration;

    use super::{Announcement, Discovery, DiscoveryEvent, decode_escaped_decimal};

    fn announcement(address: Ipv4Addr, serial: &str) -> Announcement {
        Announcement {
            instance: "eltako-blind".to_string(),
            address,
            port: 443,
            product_name: "Series 64".to_string(),
            serial: serial.to_string(),
            model: "ESB64".to_string(),
        }
    }

    fn discovery() -> (Discovery, flume::Receiver<DiscoveryEvent>) {
        let (tx, rx) = flume::unbounded();
        (Discovery::new(tx), rx)
    }

    #[test]
    fn escaped_decimal_sequences_decode_to_utf8() {
        assert_eq!(decode_escaped_decimal(r"B\195\188ro Ost"), "Büro Ost");
    }

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(decode_escaped_decimal("Living Room"), "Living Room");
    }

    #[test]
    fn invalid_utf8_falls_back_to_the_raw_string() {
        // A lone continuation byte is not legal UTF-8.
        assert_eq!(decode_escaped_decimal(r"x\188y"), r"x\188y");
    }

    #[test]
    fn incomplete_and_non_numeric_escapes_stay_literal() {
        assert_eq!(decode_escaped_decimal(r"tail\19"), r"tail\19");
        assert_eq!(decode_escaped_decimal(r"\abc"), r"\abc");
    }

    #[test]
    fn out_of_range_escapes_stay_literal() {
        assert_eq!(decode_escaped_decimal(r"a\999b"), r"a\999b");
    }

    #[tokio::test(start_paused = true)]
    async fn first_announcement_emits_added() {
        let (discovery, rx) = discovery();

        discovery.observe(announcement(Ipv4Addr::new(10, 0, 0, 7), "SN-1"));

        assert_eq!(
            rx.try_recv(),
            Ok(DiscoveryEvent::Added(announcement(
                Ipv4Addr::new(10, 0, 0, 7),
                "SN-1"
            )))
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_identical_announcements_emit_nothing() {
        let (discovery, rx) = discovery();
        let address = Ipv4Addr::new(10, 0, 0, 7);

        discovery.observe(announcement(address, "SN-1"));
        assert!(matches!(rx.try_recv(), Ok(DiscoveryEvent::Added(_))));

        discovery.observe(announcement(address, "SN-1"));
        discovery.observe(announcement(address, "SN-1"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn changed_announcement_emits_updated() {
        let (discovery, rx) = discovery();
        let address = Ipv4Addr::new(10, 0, 0, 7);

        discovery.observe(announcement(address, "SN-1"));
        assert!(matches!(rx.try_recv(), Ok(DiscoveryEvent::Added(_))));

        discovery.observe(announcement(address, "SN-2"));
        assert_eq!(
            rx.try_recv(),
            Ok(DiscoveryEvent::Updated(announcement(address, "SN-2")))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn expired_announcement_emits_a_single_removed() {
        let (discovery, rx) = discovery();
        let address = Ipv4Addr::new(10, 0, 0, 7);

        discovery.observe(announcement(address, "SN-1"));
        assert!(matches!(rx.try_recv(), Ok(DiscoveryEvent::Added(_))));

        tokio::time::advance(Duration::from_secs(31)).await;
        discovery.sweep();
        assert_eq!(
            rx.try_recv(),
            Ok(DiscoveryEvent::Removed(announcement(address, "SN-1")))
        );

        // The entry is gone, further sweeps stay silent.
        discovery.sweep();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn re_seen_announcement_renews_its_time_to_live() {
        let (discovery, rx) = discovery();
        let address = Ipv4Addr::new(10, 0, 0, 7);

        discovery.observe(announcement(address, "SN-1"));
        assert!(matches!(rx.try_recv(), Ok(DiscoveryEvent::Added(_))));

        tokio::time::advance(Duration::from_secs(20)).await;
        discovery.observe(announcement(address, "SN-1"));

        // 40 seconds after the first announcement, 20 after the renewal.
        tokio::time::advance(Duration::from_secs(20)).await;
        discovery.sweep();
        assert!(rx.try_recv().is_err());

        tokio::time::advance(Duration::from_secs(11)).await;
        discovery.sweep();
        assert!(matches!(rx.try_recv(), Ok(DiscoveryEvent::Removed(_))));
    }
}
