//! Distributeur d'échéances
//!
//! Un unique thread dort jusqu'à la prochaine échéance, réveille les
//! abonnés arrivés à terme, puis se rendort. Les abonnements une-fois
//! sont retirés après notification ; les périodiques sont réarmés de
//! leur intervalle. L'identité d'un abonnement est le couple
//! (abonné, paramètre).

use crate::error::{ContentError, Result};
use pmocds::autoscan::{ScanId, ScanMode};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// Paramètre opaque remis à l'abonné à chaque échéance.
#[derive(Debug, Clone, PartialEq)]
pub enum TimerParameter {
    /// Replanification d'un balayage périodique.
    Autoscan { scan_id: ScanId, mode: ScanMode },
    /// Rafraîchissement d'un service en ligne.
    OnlineContent { service_id: String },
    /// Vidage de l'accumulateur de notifications UPnP.
    FlushUpdates,
}

/// Abonné du timer.
pub trait TimerSubscriber: Send + Sync {
    fn timer_notify(&self, parameter: &TimerParameter);
}

struct Element {
    subscriber: Weak<dyn TimerSubscriber>,
    interval: Duration,
    parameter: TimerParameter,
    once: bool,
    next_fire: Instant,
    disabled: bool,
}

impl Element {
    fn matches(&self, subscriber: &Weak<dyn TimerSubscriber>, parameter: &TimerParameter) -> bool {
        Weak::ptr_eq(&self.subscriber, subscriber) && self.parameter == *parameter
    }
}

/// Distributeur d'échéances mono-thread.
pub struct Timer {
    elements: Mutex<Vec<Element>>,
    cond: Condvar,
    shutdown_flag: AtomicBool,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Timer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            elements: Mutex::new(Vec::new()),
            cond: Condvar::new(),
            shutdown_flag: AtomicBool::new(false),
            thread: Mutex::new(None),
        })
    }

    /// Démarre le thread du timer.
    pub fn start(self: &Arc<Self>) {
        let timer = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("pmo-timer".to_string())
            .spawn(move || timer.trigger_wait())
            .expect("failed to start timer thread");
        *self.thread.lock().unwrap() = Some(handle);
    }

    /// Enregistre un abonnement.
    ///
    /// Échoue avec `InvalidArgument` si l'intervalle est nul et avec
    /// `Conflict` si le couple (abonné, paramètre) est déjà enregistré,
    /// sauf si `dup_ok` est levé (l'abonnement existant est alors
    /// conservé tel quel).
    pub fn add_subscriber(
        &self,
        subscriber: Weak<dyn TimerSubscriber>,
        interval: Duration,
        parameter: TimerParameter,
        once: bool,
        dup_ok: bool,
    ) -> Result<()> {
        if interval.is_zero() {
            return Err(ContentError::InvalidArgument(
                "tried to add timer with zero interval".to_string(),
            ));
        }
        debug!(?parameter, ?interval, once, "Adding timer subscriber");
        let mut elements = self.elements.lock().unwrap();
        if let Some(existing) = elements
            .iter()
            .find(|e| !e.disabled && e.matches(&subscriber, &parameter))
        {
            if dup_ok {
                debug!(?existing.parameter, "Timer subscription already present");
                return Ok(());
            }
            return Err(ContentError::Conflict(
                "tried to add same timer twice".to_string(),
            ));
        }
        elements.push(Element {
            subscriber,
            interval,
            parameter,
            once,
            next_fire: Instant::now() + interval,
            disabled: false,
        });
        self.cond.notify_one();
        Ok(())
    }

    /// Retire l'abonnement correspondant au couple (abonné, paramètre).
    ///
    /// Échoue avec `NotFound` si l'abonnement n'existe pas, sauf si
    /// `dont_fail` est levé.
    pub fn remove_subscriber(
        &self,
        subscriber: &Weak<dyn TimerSubscriber>,
        parameter: &TimerParameter,
        dont_fail: bool,
    ) -> Result<()> {
        debug!(?parameter, "Removing timer subscriber");
        let mut elements = self.elements.lock().unwrap();
        let before = elements.len();
        elements.retain(|e| !e.matches(subscriber, parameter));
        if elements.len() != before {
            self.cond.notify_one();
            Ok(())
        } else if dont_fail {
            Ok(())
        } else {
            Err(ContentError::NotFound(
                "tried to remove nonexistent timer".to_string(),
            ))
        }
    }

    /// Arrête le thread et attend sa fin.
    pub fn shutdown(&self) {
        self.shutdown_flag.store(true, Ordering::SeqCst);
        self.cond.notify_all();
        let handle = self.thread.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    fn trigger_wait(&self) {
        let mut elements = self.elements.lock().unwrap();
        while !self.shutdown_flag.load(Ordering::SeqCst) {
            if elements.is_empty() {
                elements = self.cond.wait(elements).unwrap();
                continue;
            }

            let nearest = elements
                .iter()
                .map(|e| e.next_fire)
                .min()
                .expect("elements not empty");
            let now = Instant::now();
            if nearest > now {
                let (guard, timeout) = self.cond.wait_timeout(elements, nearest - now).unwrap();
                elements = guard;
                if !timeout.timed_out() {
                    // some rude thread woke us, wait all over again
                    continue;
                }
            }

            // collect expired elements, then notify without the lock
            let now = Instant::now();
            let mut to_notify = Vec::new();
            for element in elements.iter_mut() {
                if element.next_fire <= now {
                    to_notify.push((element.subscriber.clone(), element.parameter.clone()));
                    if element.once {
                        element.disabled = true;
                    } else {
                        element.next_fire = now + element.interval;
                    }
                }
            }
            elements.retain(|e| !e.disabled);
            drop(elements);

            for (subscriber, parameter) in to_notify {
                if let Some(subscriber) = subscriber.upgrade() {
                    let result = catch_unwind(AssertUnwindSafe(|| {
                        subscriber.timer_notify(&parameter);
                    }));
                    if result.is_err() {
                        error!(?parameter, "Timer subscriber panicked");
                    }
                } else {
                    debug!(?parameter, "Timer subscriber is gone");
                }
            }

            elements = self.elements.lock().unwrap();
            // drop dead subscribers while we hold the lock anyway
            elements.retain(|e| e.subscriber.strong_count() > 0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct Counter {
        hits: AtomicU32,
    }

    impl Counter {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                hits: AtomicU32::new(0),
            })
        }

        fn hits(&self) -> u32 {
            self.hits.load(Ordering::SeqCst)
        }
    }

    impl TimerSubscriber for Counter {
        fn timer_notify(&self, _parameter: &TimerParameter) {
            self.hits.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn param() -> TimerParameter {
        TimerParameter::FlushUpdates
    }

    fn weak(counter: &Arc<Counter>) -> Weak<dyn TimerSubscriber> {
        Arc::downgrade(counter) as Weak<dyn TimerSubscriber>
    }

    #[test]
    fn zero_interval_is_rejected() {
        let timer = Timer::new();
        let counter = Counter::new();
        let result =
            timer.add_subscriber(weak(&counter), Duration::ZERO, param(), false, false);
        assert!(matches!(result, Err(ContentError::InvalidArgument(_))));
    }

    #[test]
    fn duplicate_subscription_conflicts() {
        let timer = Timer::new();
        let counter = Counter::new();
        timer
            .add_subscriber(weak(&counter), Duration::from_secs(5), param(), false, false)
            .unwrap();
        let dup =
            timer.add_subscriber(weak(&counter), Duration::from_secs(5), param(), false, false);
        assert!(matches!(dup, Err(ContentError::Conflict(_))));
        // dup_ok silences the conflict
        timer
            .add_subscriber(weak(&counter), Duration::from_secs(5), param(), false, true)
            .unwrap();
        timer.shutdown();
    }

    #[test]
    fn remove_nonexistent_fails_unless_tolerated() {
        let timer = Timer::new();
        let counter = Counter::new();
        let result = timer.remove_subscriber(&weak(&counter), &param(), false);
        assert!(matches!(result, Err(ContentError::NotFound(_))));
        timer
            .remove_subscriber(&weak(&counter), &param(), true)
            .unwrap();
    }

    #[test]
    fn one_shot_fires_once() {
        let timer = Timer::new();
        timer.start();
        let counter = Counter::new();
        timer
            .add_subscriber(weak(&counter), Duration::from_millis(20), param(), true, false)
            .unwrap();
        std::thread::sleep(Duration::from_millis(120));
        assert_eq!(counter.hits(), 1);
        // the element was removed, re-adding is not a conflict
        timer
            .add_subscriber(weak(&counter), Duration::from_millis(20), param(), true, false)
            .unwrap();
        timer.shutdown();
    }

    #[test]
    fn periodic_fires_repeatedly() {
        let timer = Timer::new();
        timer.start();
        let counter = Counter::new();
        timer
            .add_subscriber(
                weak(&counter),
                Duration::from_millis(15),
                param(),
                false,
                false,
            )
            .unwrap();
        std::thread::sleep(Duration::from_millis(120));
        timer.shutdown();
        assert!(counter.hits() >= 2, "only {} notifications", counter.hits());
    }
}
