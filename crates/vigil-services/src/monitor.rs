//! Periodic expiration monitor.
//!
//! A single cooperative task scans the certificate repository in bookmark
//! batches, computes each certificate's expected status from the clock,
//! and routes any difference through the precedence-aware
//! `update_status` path; it then sweeps the CA repository and marks
//! active or rotated CAs whose lifetime has ended as expired. Running the
//! same tick twice on the same clock is a no-op the second time.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use vigil_core::error::VigilResult;
use vigil_core::events::EventPublisher;
use vigil_core::models::ca::CaStatus;
use vigil_core::repository::{CaRepository, CertificateRepository, PageRequest};

use crate::ca::CaService;
use crate::certificate::CertificateService;
use crate::config::MonitorConfig;

pub struct ExpirationMonitor<R, C, P>
where
    R: CaRepository + Clone,
    C: CertificateRepository + Clone,
    P: EventPublisher + Clone,
{
    certificates: CertificateService<C, P>,
    ca: Arc<CaService<R, C, P>>,
    config: MonitorConfig,
}

impl<R, C, P> ExpirationMonitor<R, C, P>
where
    R: CaRepository + Clone,
    C: CertificateRepository + Clone,
    P: EventPublisher + Clone,
{
    pub fn new(
        certificates: CertificateService<C, P>,
        ca: Arc<CaService<R, C, P>>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            certificates,
            ca,
            config,
        }
    }

    /// Run ticks on the configured cadence until canceled. A failed tick
    /// is logged and retried on the next interval; the loop never dies.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.cadence);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("expiration monitor stopping");
                    return;
                }
                _ = interval.tick() => {
                    if let Err(err) = self.tick(Utc::now(), &cancel).await {
                        warn!(error = %err, "expiration monitor tick failed");
                    }
                }
            }
        }
    }

    /// One full scan at the given clock reading. Returns the number of
    /// status transitions applied.
    pub async fn tick(&self, now: DateTime<Utc>, cancel: &CancellationToken) -> VigilResult<u64> {
        let mut transitions = self.sweep_certificates(now, cancel).await?;
        transitions += self.sweep_cas(now, cancel).await?;
        if transitions > 0 {
            debug!(transitions, "expiration monitor applied status transitions");
        }
        Ok(transitions)
    }

    async fn sweep_certificates(
        &self,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> VigilResult<u64> {
        let mut transitions = 0;
        let mut bookmark = None;

        loop {
            if cancel.is_cancelled() {
                return Ok(transitions);
            }

            let page = self
                .certificates
                .list(PageRequest {
                    bookmark: bookmark.clone(),
                    page_size: self.config.page_size,
                })
                .await?;

            for certificate in &page.items {
                let expected = certificate.expected_status(now, self.config.preventive_delta);
                // Only upgrades along the precedence order are applied;
                // revoked and already-expired certificates are untouched.
                if expected.precedence() > certificate.status.precedence() {
                    self.certificates
                        .update_status(&certificate.serial_number, expected, None, cancel)
                        .await?;
                    transitions += 1;
                }
            }

            match page.next_bookmark {
                Some(next) => bookmark = Some(next),
                None => return Ok(transitions),
            }
        }
    }

    async fn sweep_cas(&self, now: DateTime<Utc>, cancel: &CancellationToken) -> VigilResult<u64> {
        let mut transitions = 0;
        let mut bookmark = None;

        loop {
            if cancel.is_cancelled() {
                return Ok(transitions);
            }

            let page = self
                .ca
                .list_cas(PageRequest {
                    bookmark: bookmark.clone(),
                    page_size: self.config.page_size,
                })
                .await?;

            for ca in &page.items {
                let lapsed = now >= ca.not_after;
                if lapsed && matches!(ca.status, CaStatus::Active | CaStatus::Rotated) {
                    self.ca
                        .update_ca_status(&ca.id, CaStatus::Expired, cancel)
                        .await?;
                    transitions += 1;
                }
            }

            match page.next_bookmark {
                Some(next) => bookmark = Some(next),
                None => return Ok(transitions),
            }
        }
    }
}
