use std::sync::Arc;
use std::time::Duration;

use futures::{stream, StreamExt};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::model::*;
use crate::observability as obs;
use crate::ports::{ContactError, ContactResolver, NotifyError, Notifier, Storage};
use crate::store::StoreError;

pub const REMINDER_SUBJECT: &str = "Meeting Reminder";

pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

pub fn reminder_body(booking: &Booking) -> String {
    format!(
        "Reminder: You have a meeting in Room {} from {} to {}.",
        booking.room_id,
        format_ms(booking.span.start),
        format_ms(booking.span.end),
    )
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub tick_interval: Duration,
    /// A booking is due once its start is inside `[now, now + lookahead)`.
    pub lookahead: Duration,
    /// Upper bound on one tick, so `stop` never waits on a hung collaborator.
    pub tick_timeout: Duration,
    /// Reminders dispatched concurrently within one tick.
    pub max_in_flight: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(60),
            lookahead: Duration::from_secs(600),
            tick_timeout: Duration::from_secs(30),
            max_in_flight: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReminderStatus {
    Sent { to: String },
    /// Flag left unset; retried next tick.
    ContactFailed(ContactError),
    /// Flag left unset; retried next tick.
    SendFailed(NotifyError),
    /// Delivered, but the flag write failed: the next tick may send again.
    MarkFailed(StoreError),
}

impl ReminderStatus {
    fn label(&self) -> &'static str {
        match self {
            ReminderStatus::Sent { .. } => "sent",
            ReminderStatus::ContactFailed(_) => "contact_failed",
            ReminderStatus::SendFailed(_) => "send_failed",
            ReminderStatus::MarkFailed(_) => "mark_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderOutcome {
    pub booking_id: BookingId,
    pub status: ReminderStatus,
}

/// Finds bookings about to start and notifies each organizer once.
pub struct ReminderScheduler {
    storage: Arc<dyn Storage>,
    contacts: Arc<dyn ContactResolver>,
    notifier: Arc<dyn Notifier>,
    config: SchedulerConfig,
}

impl ReminderScheduler {
    pub fn new(
        storage: Arc<dyn Storage>,
        contacts: Arc<dyn ContactResolver>,
        notifier: Arc<dyn Notifier>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            storage,
            contacts,
            notifier,
            config,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// One scan-and-notify pass at `now`.
    ///
    /// Bookings already flagged are never listed, so repeating a tick in the
    /// same window sends nothing new. Each booking's flag is written right
    /// after its own dispatch returns; failures stay confined to that booking.
    pub async fn tick(&self, now: Ms) -> Vec<ReminderOutcome> {
        let lookahead = Ms::try_from(self.config.lookahead.as_millis()).unwrap_or(Ms::MAX);
        let window = Span::new(now, now.saturating_add(lookahead));

        let due = match self.storage.bookings_due_for_reminder(window).await {
            Ok(due) => due,
            Err(e) => {
                error!("reminder tick aborted, listing due bookings failed: {e}");
                metrics::counter!(obs::REMINDER_TICKS_TOTAL, "status" => "storage_error").increment(1);
                return Vec::new();
            }
        };
        if due.is_empty() {
            metrics::counter!(obs::REMINDER_TICKS_TOTAL, "status" => "ok").increment(1);
            return Vec::new();
        }
        debug!("{} bookings due between {} and {}", due.len(), format_ms(window.start), format_ms(window.end));

        let outcomes: Vec<ReminderOutcome> = stream::iter(due)
            .map(|booking| self.remind(booking))
            .buffer_unordered(self.config.max_in_flight.max(1))
            .collect()
            .await;

        let sent = outcomes
            .iter()
            .filter(|o| matches!(o.status, ReminderStatus::Sent { .. }))
            .count();
        info!("reminder tick: {sent}/{} sent", outcomes.len());
        metrics::counter!(obs::REMINDER_TICKS_TOTAL, "status" => "ok").increment(1);
        outcomes
    }

    async fn remind(&self, booking: Booking) -> ReminderOutcome {
        let status = self.deliver(&booking).await;
        metrics::counter!(obs::REMINDERS_TOTAL, "status" => status.label()).increment(1);
        ReminderOutcome {
            booking_id: booking.id,
            status,
        }
    }

    async fn deliver(&self, booking: &Booking) -> ReminderStatus {
        let to = match self.contacts.email_for(booking.organizer).await {
            Ok(to) => to,
            Err(e) => {
                warn!("reminder for booking {}: {e}", booking.id);
                return ReminderStatus::ContactFailed(e);
            }
        };
        if let Err(e) = self.notifier.send(&to, REMINDER_SUBJECT, &reminder_body(booking)).await {
            warn!("reminder for booking {} to {to}: {e}", booking.id);
            return ReminderStatus::SendFailed(e);
        }
        match self.storage.mark_reminder_sent(booking.id, booking.span.start).await {
            Ok(()) => {
                debug!("reminded {to} of booking {}", booking.id);
                ReminderStatus::Sent { to }
            }
            Err(e) => {
                error!("reminder for booking {} delivered but not flagged: {e}", booking.id);
                ReminderStatus::MarkFailed(e)
            }
        }
    }

    /// Spawn the recurring loop. Missed ticks are skipped, not bunched.
    pub fn start(self: Arc<Self>) -> SchedulerHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            let period = self.config.tick_interval.max(Duration::from_millis(1));
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(
                "reminder scheduler started: every {:?}, lookahead {:?}",
                period, self.config.lookahead
            );

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {}
                }
                // A started tick runs to completion or timeout, never cut
                // between a send and its flag write by a stop request.
                let started = std::time::Instant::now();
                if tokio::time::timeout(self.config.tick_timeout, self.tick(now_ms()))
                    .await
                    .is_err()
                {
                    warn!("reminder tick exceeded {:?}, abandoned", self.config.tick_timeout);
                    metrics::counter!(obs::REMINDER_TICKS_TOTAL, "status" => "timeout").increment(1);
                }
                metrics::histogram!(obs::REMINDER_TICK_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
            }
            info!("reminder scheduler stopped");
        });
        SchedulerHandle { cancel, task }
    }
}

pub struct SchedulerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Cancel and wait for the loop; bounded by one tick timeout.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            error!("reminder scheduler task failed: {e}");
        }
    }
}
