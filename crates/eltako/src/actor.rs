use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use reqwest::StatusCode;

use serde::{Deserialize, Serialize};

use tokio::sync::mpsc;

use tracing::{debug, error, info};

use crate::client::HttpClient;
use crate::commands::{Action, Command};
use crate::config::{BlindsConfig, Device};
use crate::device::{DeviceDescriptor, FunctionValue};
use crate::error::{Error, ErrorKind, Result};
use crate::retry;

// Attempts for device-facing reads and writes.
const DEVICE_ATTEMPTS: u32 = 3;

// Poll period while waiting for a movement to settle.
const WAIT_POLL_DELAY: Duration = Duration::from_millis(500);

// Upper bound on waiting for a movement to settle during a tilt.
const WAIT_TIMEOUT: Duration = Duration::from_secs(60);

// Interval between two session token refreshes.
const TOKEN_REFRESH_INTERVAL: Duration = Duration::from_secs(60 * 60);

// Consecutive poll failures after which the polling task of a device
// is unrecoverable.
const MAX_POLL_FAILURES: u32 = 5;

/// The position payload published to the command bus whenever a polled
/// position changes.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionMessage {
    /// Blind position in percent.
    pub position: i32,
}

/// A position change transmitted by the polling task.
///
/// The payload consists of the actor display name, which derives the
/// bus topic, and the freshly polled position.
#[derive(Debug, PartialEq, Eq)]
pub struct PositionUpdate {
    /// Actor display name.
    pub name: String,
    /// Blind position in percent.
    pub position: i32,
}

#[derive(Serialize)]
struct Credentials<'a> {
    user: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    #[serde(rename = "apiKey")]
    api_key: String,
}

#[derive(Deserialize)]
struct PositionInfo {
    value: f64,
}

// Mutable actor state, guarded by a per-actor lock. The lock is only
// held for the duration of a field access, never across device I/O.
#[derive(Debug, Default)]
struct State {
    position: i32,
    tilted: bool,
    tilt_position: i32,
}

fn validate_position(position: i32) -> Result<()> {
    if (0..=100).contains(&position) {
        Ok(())
    } else {
        Err(Error::validation(format!("invalid position {position}")))
    }
}

// Directional overshoot for the tilt sequence. A movement toward a
// larger percentage counts as downward and overshoots with the down
// calibration, everything else with the up calibration.
fn tilt_offset(start: i32, target: i32, config: &BlindsConfig) -> i32 {
    if start < target {
        -(config.tilt_down_percentage as i32)
    } else {
        config.tilt_up_percentage as i32
    }
}

/// The control engine owning one physical shading actor.
///
/// Each instance owns the device session, the last known position and
/// tilt state, and the long-lived polling and token refresh tasks
/// spawned by [`ShadingActor::start`].
#[derive(Debug)]
pub struct ShadingActor {
    device: Device,
    client: HttpClient,
    descriptors: Vec<DeviceDescriptor>,
    state: Mutex<State>,
    updates: mpsc::Sender<PositionUpdate>,
}

impl core::fmt::Display for ShadingActor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "ShadingActor{{name: {}; ip: {}}}",
            self.device.name,
            self.device.ip.as_deref().unwrap_or("-")
        )
    }
}

impl ShadingActor {
    /// Creates a [`ShadingActor`] for a configured device, logging in
    /// and fetching its descriptor list.
    ///
    /// # Errors
    ///
    /// An error is returned when the device has no address, the login
    /// is rejected, or the descriptor list cannot be retrieved.
    /// Construction failure is fatal for starting this device.
    pub async fn connect(
        device: Device,
        updates: mpsc::Sender<PositionUpdate>,
    ) -> Result<Self> {
        let Some(ip) = device.ip.clone() else {
            return Err(Error::new(
                ErrorKind::Config,
                format!("device {} has no address", device.name),
            ));
        };
        Self::connect_with_base_url(device, format!("https://{ip}:443/api/v0"), updates).await
    }

    /// Creates a [`ShadingActor`] against an explicit device API base
    /// URL instead of the standard `https://{ip}:443/api/v0`.
    ///
    /// # Errors
    ///
    /// See [`ShadingActor::connect`].
    pub async fn connect_with_base_url(
        device: Device,
        base_url: String,
        updates: mpsc::Sender<PositionUpdate>,
    ) -> Result<Self> {
        let client = HttpClient::new(base_url)?;
        let mut actor = Self {
            device,
            client,
            descriptors: Vec::new(),
            state: Mutex::new(State::default()),
            updates,
        };

        actor.update_token().await?;
        actor.descriptors = actor.fetch_descriptors().await?;

        Ok(actor)
    }

    /// Returns the configured device name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.device.name
    }

    /// Returns the configured serial number.
    #[must_use]
    pub fn serial(&self) -> Option<&str> {
        self.device.serial.as_deref()
    }

    /// Returns the name used for bus topics: the configured name, or
    /// the display name reported by the device, or its address.
    #[must_use]
    pub fn display_name(&self) -> &str {
        if !self.device.name.is_empty() {
            return &self.device.name;
        }

        match self.descriptor_with_info("currentPosition") {
            Ok(descriptor) if !descriptor.display_name.is_empty() => &descriptor.display_name,
            _ => self.device.ip.as_deref().unwrap_or_default(),
        }
    }

    /// Returns the last position observed by a successful read or poll.
    #[must_use]
    pub fn position(&self) -> i32 {
        self.state().position
    }

    /// Returns `true` when the most recent completed operation was a
    /// tilt and no position write or external movement happened since.
    #[must_use]
    pub fn tilted(&self) -> bool {
        self.state().tilted
    }

    /// Logs into the device, replacing the session token.
    ///
    /// The previous token remains in use until a login succeeds.
    ///
    /// # Errors
    ///
    /// An [`ErrorKind::Auth`] error when the device rejects the login
    /// or does not return an `apiKey`.
    pub async fn update_token(&self) -> Result<()> {
        let credentials = Credentials {
            user: &self.device.username,
            password: &self.device.password,
        };

        let response = self.client.post("/login", &credentials).await?;
        if response.status() != StatusCode::OK {
            return Err(Error::new(
                ErrorKind::Auth,
                format!(
                    "failed to update token, status code: {}",
                    response.status().as_u16()
                ),
            ));
        }

        let login: LoginResponse = response
            .json()
            .await
            .map_err(|e| Error::new(ErrorKind::Auth, format!("apiKey not found in response: {e}")))?;

        self.client.set_token(login.api_key);
        Ok(())
    }

    async fn fetch_descriptors(&self) -> Result<Vec<DeviceDescriptor>> {
        let response = self.client.get("/devices").await?;
        if response.status() != StatusCode::OK {
            return Err(Error::device(format!(
                "failed to get devices, status code: {}",
                response.status().as_u16()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| Error::device(format!("malformed device list: {e}")))
    }

    /// Reads the current position with the bounded retry policy.
    ///
    /// # Errors
    ///
    /// The error of the last failed read once all attempts are
    /// exhausted.
    pub async fn get_position(&self) -> Result<i32> {
        retry::times(DEVICE_ATTEMPTS, || self.read_position()).await
    }

    /// Drives the blind to `position` with the bounded retry policy.
    ///
    /// # Errors
    ///
    /// An [`ErrorKind::Validation`] error for a position outside
    /// `0..=100`, rejected before any device I/O; otherwise the error
    /// of the last failed write.
    pub async fn set_position(&self, position: i32) -> Result<()> {
        validate_position(position)?;
        retry::times(DEVICE_ATTEMPTS, || self.write_position(position)).await
    }

    // Single position read. A position differing from the cached one
    // means the device moved outside this actor's own tilt sequence,
    // so the tilt state is no longer trustworthy.
    async fn read_position(&self) -> Result<i32> {
        let descriptor = self.descriptor_with_info("currentPosition")?;
        let route = format!("/devices/{}/infos/currentPosition", descriptor.device_guid);

        let old_position = self.state().position;

        let response = self.client.get(&route).await?;
        if response.status() != StatusCode::OK {
            return Err(Error::device(format!(
                "failed to get position, status code: {}",
                response.status().as_u16()
            )));
        }

        let info: PositionInfo = response
            .json()
            .await
            .map_err(|e| Error::device(format!("position not found in response: {e}")))?;
        let position = info.value as i32;

        let mut state = self.state();
        state.position = position;
        if position != old_position {
            state.tilted = false;
        }

        Ok(position)
    }

    // Single position write. The tilted flag is cleared before the
    // request goes out, so a write failing midway never leaves a stale
    // tilted claim.
    async fn write_position(&self, position: i32) -> Result<()> {
        let descriptor = self.descriptor_with_function("targetPosition")?;
        let route = format!("/devices/{}/functions/targetPosition", descriptor.device_guid);

        self.state().tilted = false;

        let response = self
            .client
            .put(&route, &FunctionValue::target_position(position))
            .await?;

        // The device signals acceptance of a function write with 202.
        if response.status() != StatusCode::ACCEPTED {
            return Err(Error::device(format!(
                "failed to set position, status code: {}",
                response.status().as_u16()
            )));
        }

        Ok(())
    }

    // Polls until the observed position equals `position` or the
    // timeout elapses. Best effort: read failures and timeouts are
    // logged and swallowed, hardware may stop within tolerance.
    async fn wait_for_position(&self, position: i32, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let current = match self.get_position().await {
                Ok(current) => current,
                Err(e) => {
                    error!("Failed to get position: {e}");
                    return;
                }
            };

            if current == position {
                debug!("Position {position} reached");
                return;
            }

            debug!("Waiting for position {position} (current: {current})");
            if tokio::time::Instant::now() >= deadline {
                error!("Timeout waiting for position {position}");
                return;
            }

            tokio::time::sleep(WAIT_POLL_DELAY).await;
        }
    }

    /// Runs the tilt emulation sequence around `position`.
    ///
    /// Tilt is not a native device capability. The blind is driven to
    /// `position`, and once the movement settles a second write
    /// overshoots it by the calibrated directional offset to angle the
    /// blades. Failures abort the sequence, leave the tilted flag
    /// unset, and are logged.
    pub async fn tilt(&self, position: i32) {
        if self.device.blinds_config.tilt_optimization {
            let state = self.state();
            if state.tilted && state.tilt_position == position {
                info!("Ignoring tilt command, already tilted correctly: {self}");
                return;
            }
        }

        debug!("Tilt command received for {self}, position {position}");

        let start_position = match self.read_position().await {
            Ok(start_position) => start_position,
            Err(e) => {
                error!("Tilt failed; error getting position: {e}");
                return;
            }
        };

        if let Err(e) = self.set_position(position).await {
            error!("Tilt failed; error setting position: {e}");
            return;
        }
        self.wait_for_position(position, WAIT_TIMEOUT).await;

        let offset = tilt_offset(start_position, position, &self.device.blinds_config);
        if let Err(e) = self.set_position(position + offset).await {
            error!("Tilt failed; error setting tilt position: {e}");
            return;
        }

        let mut state = self.state();
        state.tilted = true;
        state.tilt_position = position;
        debug!("Tilt executed successfully for {self}, position {position} with offset {offset}");
    }

    /// Applies a low-level [`Command`] to this actor.
    ///
    /// Failures are logged; command application never propagates
    /// errors back to the bus.
    pub async fn apply(&self, command: Command) {
        match command.action {
            Action::Set => match self.set_position(command.position).await {
                Ok(()) => info!("Set position to {}", command.position),
                Err(e) => error!("Failed setting position: {e}"),
            },
            Action::Tilt => self.tilt(command.position).await,
        }
    }

    /// Spawns the token refresh task and, unless `polling_interval_ms`
    /// is 0, the polling task of this actor.
    ///
    /// Both tasks run for the lifetime of the process. Five
    /// consecutive poll failures panic the polling task of this device.
    pub fn start(self: &Arc<Self>, polling_interval_ms: u64) {
        info!(
            "Scheduling token update of {} with interval {:?}",
            self.display_name(),
            TOKEN_REFRESH_INTERVAL
        );
        let actor = Arc::clone(self);
        drop(tokio::spawn(async move {
            actor.run_token_refresh().await;
        }));

        if polling_interval_ms == 0 {
            info!("Polling disabled for {self}");
            return;
        }

        let interval = Duration::from_millis(polling_interval_ms);
        info!("Starting polling of {self} with interval {interval:?}");
        let actor = Arc::clone(self);
        drop(tokio::spawn(async move {
            actor.run_polling(interval).await;
        }));
    }

    async fn run_token_refresh(&self) {
        loop {
            tokio::time::sleep(TOKEN_REFRESH_INTERVAL).await;

            debug!("Updating token of {self}");
            if let Err(e) = self.update_token().await {
                // The previous token stays in use; the next scheduled
                // tick retries.
                error!("Failed updating token: {e}");
            }
        }
    }

    async fn run_polling(&self, interval: Duration) {
        let mut failures = 0u32;
        let mut last_published = None;

        loop {
            match self.read_position().await {
                Ok(position) => {
                    failures = 0;
                    debug!("Polled position of {}: {position}%", self.display_name());

                    if last_published != Some(position) {
                        last_published = Some(position);
                        let update = PositionUpdate {
                            name: self.display_name().to_string(),
                            position,
                        };
                        if self.updates.send(update).await.is_err() {
                            error!("Position update channel closed, stopping polling of {self}");
                            return;
                        }
                    }
                }
                Err(e) => {
                    failures += 1;
                    error!("Failed to poll position of {self}: {e}");
                    if failures >= MAX_POLL_FAILURES {
                        panic!(
                            "failed to poll position of {} {MAX_POLL_FAILURES} times in a row",
                            self.display_name()
                        );
                    }
                }
            }

            tokio::time::sleep(interval).await;
        }
    }

    fn descriptor_with_info(&self, identifier: &str) -> Result<&DeviceDescriptor> {
        self.descriptors
            .iter()
            .find(|d| d.has_info(identifier))
            .ok_or_else(|| Error::device(format!("no device exposes info `{identifier}`")))
    }

    fn descriptor_with_function(&self, identifier: &str) -> Result<&DeviceDescriptor> {
        self.descriptors
            .iter()
            .find(|d| d.has_function(identifier))
            .ok_or_else(|| Error::device(format!("no device exposes function `{identifier}`")))
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use crate::config::BlindsConfig;
    use crate::error::ErrorKind;

    use super::{tilt_offset, validate_position};

    fn calibration() -> BlindsConfig {
        BlindsConfig {
            tilt_down_percentage: 4.0,
            tilt_up_percentage: 3.0,
            tilt_optimization: true,
        }
    }

    #[test]
    fn downward_movement_applies_negative_down_offset() {
        assert_eq!(tilt_offset(20, 50, &calibration()), -4);
    }

    #[test]
    fn upward_movement_applies_positive_up_offset() {
        assert_eq!(tilt_offset(80, 50, &calibration()), 3);
    }

    #[test]
    fn unmoved_blind_counts_as_upward() {
        assert_eq!(tilt_offset(50, 50, &calibration()), 3);
    }

    #[test]
    fn positions_outside_the_percent_range_fail_validation() {
        assert!(validate_position(0).is_ok());
        assert!(validate_position(100).is_ok());
        assert_eq!(
            validate_position(-1).unwrap_err().kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            validate_position(101).unwrap_err().kind(),
            ErrorKind::Validation
        );
    }
}
