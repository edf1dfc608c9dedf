use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Local};
use log::{debug, info, warn};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::ScheduledTrigger;
use crate::config;
use crate::error::PlinkError;

/// Future returned by the fire callback.
pub type TriggerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

type TriggerCallback = Arc<dyn Fn(ScheduledTrigger) -> TriggerFuture + Send + Sync>;
type Clock = Arc<dyn Fn() -> DateTime<Local> + Send + Sync>;

struct Inner {
    triggers: Mutex<HashMap<String, ScheduledTrigger>>,
    callback: TriggerCallback,
    clock: Clock,
    changed: Notify,
    timer: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl Inner {
    fn triggers(&self) -> MutexGuard<'_, HashMap<String, ScheduledTrigger>> {
        self.triggers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn timer(&self) -> MutexGuard<'_, Option<(CancellationToken, JoinHandle<()>)>> {
        self.timer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn earliest_fire(&self) -> Option<DateTime<Local>> {
        self.triggers()
            .values()
            .filter(|trigger| trigger.enabled)
            .filter_map(|trigger| trigger.next_fire)
            .min()
    }

    /// Fires every enabled trigger that is due. Callbacks run on their own tasks.
    fn fire_due(&self) {
        let now = (self.clock)();
        let due: Vec<ScheduledTrigger> = {
            let mut triggers = self.triggers();
            triggers
                .values_mut()
                .filter(|trigger| trigger.enabled && trigger.next_fire.is_some_and(|at| at <= now))
                .map(|trigger| {
                    trigger.last_fire = Some(now);
                    trigger.next_fire = trigger
                        .schedule()
                        .ok()
                        .and_then(|schedule| schedule.next_fire(now));
                    trigger.clone()
                })
                .collect()
        };

        for trigger in due {
            info!(
                "Trigger '{}' fired: {} devices, next fire {}",
                trigger.name,
                trigger.devices.len(),
                trigger
                    .next_fire
                    .map(|at| at.to_rfc3339())
                    .unwrap_or_else(|| "none".to_string())
            );
            tokio::spawn((self.callback)(trigger));
        }
    }
}

/// Keeps the trigger set and fires triggers on a background timer task.
///
/// All trigger operations are synchronous and may be called from any
/// thread; the timer is woken whenever the set changes. Firing never
/// blocks the timer: each fire runs the callback on its own task, so a
/// slow callback only delays itself.
///
/// The scheduler applies no policy of its own on fire. Skipping a fire
/// because a batch is already running, or because credentials are
/// missing, is up to the callback.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    /// Creates a scheduler invoking `callback` with a snapshot of each firing trigger.
    pub fn new<F, Fut>(callback: F) -> Self
    where
        F: Fn(ScheduledTrigger) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::with_clock(callback, Local::now)
    }

    /// Like [`new`](Self::new), reading the current time from `clock`.
    pub fn with_clock<F, Fut, C>(callback: F, clock: C) -> Self
    where
        F: Fn(ScheduledTrigger) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
        C: Fn() -> DateTime<Local> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                triggers: Mutex::new(HashMap::new()),
                callback: Arc::new(move |trigger| -> TriggerFuture { Box::pin(callback(trigger)) }),
                clock: Arc::new(clock),
                changed: Notify::new(),
                timer: Mutex::new(None),
            }),
        }
    }

    /// Spawns the timer task. Does nothing if it is already running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) {
        let mut timer = self.inner.timer();
        if timer.as_ref().is_some_and(|(_, handle)| !handle.is_finished()) {
            return;
        }
        let token = CancellationToken::new();
        let handle = tokio::spawn(timer_loop(self.inner.clone(), token.clone()));
        *timer = Some((token, handle));
        info!("Scheduler started");
    }

    /// Stops the timer task and waits for it to exit. Callbacks already dispatched keep running.
    pub async fn shutdown(&self) {
        let timer = self.inner.timer().take();
        if let Some((token, handle)) = timer {
            token.cancel();
            if let Err(e) = handle.await {
                warn!("Scheduler timer task ended abnormally: {}", e);
            }
            info!("Scheduler stopped");
        }
    }

    /// Adds a trigger and returns its id, generating one when empty.
    ///
    /// Only a duplicate name is rejected. A trigger with an invalid
    /// schedule is stored unscheduled and logged; fix it through
    /// [`update_trigger`](Self::update_trigger) with the returned id.
    pub fn add_trigger(&self, mut trigger: ScheduledTrigger) -> Result<String, PlinkError> {
        if trigger.id.is_empty() {
            trigger.id = Uuid::new_v4().to_string();
        }
        let id = trigger.id.clone();
        {
            let mut triggers = self.inner.triggers();
            check_unique_name(&triggers, &trigger)?;
            if let Err(e) = self.arm(&mut trigger) {
                warn!("Trigger '{}' not scheduled: {}", trigger.name, e);
            }
            triggers.insert(id.clone(), trigger);
        }
        self.inner.changed.notify_one();
        Ok(id)
    }

    /// Replaces a stored trigger. A missing `last_fire` keeps the stored one.
    pub fn update_trigger(&self, mut trigger: ScheduledTrigger) -> Result<(), PlinkError> {
        let armed = {
            let mut triggers = self.inner.triggers();
            let Some(existing) = triggers.get(&trigger.id) else {
                return Err(PlinkError::NotFound(trigger.id));
            };
            check_unique_name(&triggers, &trigger)?;
            if trigger.last_fire.is_none() {
                trigger.last_fire = existing.last_fire;
            }
            let armed = self.arm(&mut trigger);
            triggers.insert(trigger.id.clone(), trigger);
            armed
        };
        self.inner.changed.notify_one();
        armed
    }

    /// Removes a trigger. Callbacks already running for it are unaffected.
    pub fn delete_trigger(&self, id: &str) -> Option<ScheduledTrigger> {
        let removed = self.inner.triggers().remove(id);
        if removed.is_some() {
            debug!("Trigger {} deleted", id);
            self.inner.changed.notify_one();
        }
        removed
    }

    /// Enables or disables a trigger, rescheduling it when enabled.
    pub fn toggle_trigger(&self, id: &str, enabled: bool) -> Result<(), PlinkError> {
        let armed = {
            let mut triggers = self.inner.triggers();
            let trigger = triggers
                .get_mut(id)
                .ok_or_else(|| PlinkError::NotFound(id.to_string()))?;
            trigger.enabled = enabled;
            self.arm(trigger)
        };
        self.inner.changed.notify_one();
        armed
    }

    pub fn get_trigger(&self, id: &str) -> Option<ScheduledTrigger> {
        self.inner.triggers().get(id).cloned()
    }

    /// All triggers sorted by name, with their current next-fire time.
    pub fn get_triggers(&self) -> Vec<ScheduledTrigger> {
        let mut triggers: Vec<ScheduledTrigger> = self.inner.triggers().values().cloned().collect();
        triggers.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        triggers
    }

    /// Runs the callback for a trigger right away, independent of the timer.
    ///
    /// The trigger's fire times are left untouched. Must be called from
    /// within a Tokio runtime.
    pub fn run_now(&self, id: &str) -> Result<(), PlinkError> {
        let trigger = self
            .get_trigger(id)
            .ok_or_else(|| PlinkError::NotFound(id.to_string()))?;
        info!("Trigger '{}' run on demand", trigger.name);
        tokio::spawn((self.inner.callback)(trigger));
        Ok(())
    }

    /// Bulk-loads stored triggers at startup.
    ///
    /// Names are not checked for uniqueness. Triggers with an invalid
    /// schedule are kept, unscheduled, and logged.
    pub fn load_triggers(&self, loaded: impl IntoIterator<Item = ScheduledTrigger>) {
        {
            let mut triggers = self.inner.triggers();
            for mut trigger in loaded {
                if trigger.id.is_empty() {
                    trigger.id = Uuid::new_v4().to_string();
                }
                if let Err(e) = self.arm(&mut trigger) {
                    warn!("Trigger '{}' not scheduled: {}", trigger.name, e);
                }
                triggers.insert(trigger.id.clone(), trigger);
            }
        }
        self.inner.changed.notify_one();
    }

    /// Recomputes `next_fire`. Disabled or invalid triggers get none.
    fn arm(&self, trigger: &mut ScheduledTrigger) -> Result<(), PlinkError> {
        trigger.next_fire = None;
        if !trigger.enabled {
            return Ok(());
        }
        let schedule = trigger.schedule()?;
        trigger.next_fire = schedule.next_fire((self.inner.clock)());
        debug!(
            "Trigger '{}' scheduled for {:?}",
            trigger.name,
            trigger.next_fire.map(|at| at.to_rfc3339())
        );
        Ok(())
    }
}

fn check_unique_name(
    triggers: &HashMap<String, ScheduledTrigger>,
    candidate: &ScheduledTrigger,
) -> Result<(), PlinkError> {
    let taken = triggers
        .values()
        .any(|other| other.id != candidate.id && other.name == candidate.name);
    if taken {
        Err(PlinkError::DuplicateName(candidate.name.clone()))
    } else {
        Ok(())
    }
}

async fn timer_loop(inner: Arc<Inner>, token: CancellationToken) {
    loop {
        let wait = inner.earliest_fire().map(|at| {
            (at - (inner.clock)())
                .to_std()
                .unwrap_or(Duration::ZERO)
                .min(config::SCHEDULER_RECHECK)
        });
        let due = {
            let notified = inner.changed.notified();
            tokio::pin!(notified);
            let sleep = tokio::time::sleep(wait.unwrap_or(config::SCHEDULER_RECHECK));
            tokio::pin!(sleep);

            tokio::select! {
                _ = token.cancelled() => break,
                _ = &mut notified => false,
                _ = &mut sleep => wait.is_some(),
            }
        };
        if due {
            inner.fire_due();
        }
    }
    debug!("Scheduler timer task ended");
}
