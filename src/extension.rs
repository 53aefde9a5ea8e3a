use crate::config::Config;
use crate::error::InitError;
use crate::host::Host;
use crate::watcher::{Phase, Watcher, WatcherStatus};
use log::{error, info, warn};

/// Enable/disable lifecycle around a [`Watcher`], as a host shell drives it.
pub struct Extension<H: Host> {
    host: H,
    config: Config,
    watcher: Option<Watcher>,
}

impl<H: Host> Extension<H> {
    pub fn new(host: H, config: Config) -> Self {
        Self {
            host,
            config,
            watcher: None,
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Takes effect on the next enable.
    pub fn set_config(&mut self, config: Config) {
        self.config = config;
    }

    /// Starts watching. Enabling twice is a logged no-op.
    pub fn enable(&mut self) -> Result<(), InitError> {
        if self.watcher.is_some() {
            warn!("Extension is already enabled");
            return Ok(());
        }

        match Watcher::start(&self.host, &self.config) {
            Ok(watcher) => {
                info!(
                    "Enabled: hide after {}µs idle, checked every {}s ({} policy)",
                    self.config.idle_threshold_micros,
                    self.config.poll_interval_secs,
                    self.config.policy
                );
                self.watcher = Some(watcher);
                Ok(())
            }
            Err(e) => {
                error!("Failed to initialize internals: {}", e);
                Err(e)
            }
        }
    }

    /// Stops watching and shows the pointer. Safe to call at any time.
    pub fn disable(&mut self) {
        if let Some(mut watcher) = self.watcher.take() {
            watcher.stop();
            info!("Disabled");
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.watcher.is_some()
    }

    pub fn phase(&self) -> Phase {
        self.watcher
            .as_ref()
            .map_or(Phase::Disabled, |w| w.status().phase)
    }

    pub fn status(&self) -> Option<WatcherStatus> {
        self.watcher.as_ref().map(Watcher::status)
    }
}
