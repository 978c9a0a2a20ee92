// Maintenance Service
// Scheduled purging of expired results and old dead letters

use crate::error::Result;
use crate::port::{Maintenance, MaintenanceConfig, MaintenanceStats};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info};

use super::worker::ShutdownToken;

/// Maintenance scheduler
///
/// Runs periodic maintenance in the background until shutdown
pub struct MaintenanceScheduler {
    maintenance: Arc<dyn Maintenance>,
    config: MaintenanceConfig,
    period: Duration,
}

impl MaintenanceScheduler {
    /// Create a new maintenance scheduler
    ///
    /// # Arguments
    /// * `maintenance` - Maintenance implementation
    /// * `config` - Maintenance configuration
    /// * `period` - How often to run maintenance
    pub fn new(maintenance: Arc<dyn Maintenance>, config: MaintenanceConfig, period: Duration) -> Self {
        Self {
            maintenance,
            config,
            period,
        }
    }

    /// Run maintenance loop (background task)
    ///
    /// First run happens immediately; should be spawned with tokio::spawn
    pub async fn run(self, mut shutdown: ShutdownToken) {
        info!(
            period_secs = self.period.as_secs(),
            dead_letter_ttl_ms = self.config.dead_letter_ttl_ms,
            "Maintenance scheduler started"
        );

        let mut tick = interval(self.period);

        loop {
            tokio::select! {
                _ = tick.tick() => {}
                _ = shutdown.wait() => break,
            }

            match self.maintenance.run_full_maintenance(&self.config).await {
                Ok(stats) => {
                    info!(
                        db_size_mb = stats.db_size_mb,
                        messages = stats.message_count,
                        dead_letters = stats.dead_letter_count,
                        results = stats.result_count,
                        "Scheduled maintenance completed successfully"
                    );
                }
                Err(e) => {
                    error!(error = ?e, "Scheduled maintenance failed");
                }
            }
        }

        info!("Maintenance scheduler stopped");
    }

    /// Run maintenance immediately (for manual trigger)
    pub async fn run_now(&self) -> Result<MaintenanceStats> {
        info!("Running manual maintenance...");
        self.maintenance.run_full_maintenance(&self.config).await
    }
}
