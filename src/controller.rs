//! The dispatch loop.

use std::error::Error as StdError;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::source::{Interrupt, RecommendedSource, WatchSource};
use crate::translate::{Batch, Translated};
use crate::tree::{WatchTable, WatchTree};
use crate::{
    Config, Error, EventHandler, EventMask, IgnoreSet, Notification, Result, WatchRequest,
};

/// A handler returned an error.
#[derive(Debug)]
pub struct HandlerError {
    /// What the handler was given.
    pub notification: Notification,

    /// What it returned.
    pub error: Box<dyn StdError + Send + Sync>,
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "handler failed on {} for {:?}: {}",
            self.notification.event(),
            self.notification.path(),
            self.error
        )
    }
}

impl StdError for HandlerError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.error.as_ref())
    }
}

/// What one [`NotifyController::run_once`] call did.
#[derive(Debug, Default)]
pub struct Cycle {
    /// Number of handler invocations, unexpected-event handler included.
    pub delivered: usize,

    /// Notifications suppressed by an ignore rule.
    pub suppressed: usize,

    /// Records dropped because their watch was already gone.
    pub dropped: usize,

    /// Handlers that returned an error.
    pub failures: Vec<HandlerError>,

    /// Failures to keep the watch set in step with the filesystem.
    pub errors: Vec<Error>,

    /// The wait ended without records after the event timeout elapsed.
    pub timed_out: bool,

    /// A stop was requested.
    pub stopped: bool,
}

/// Requests a [`NotifyController`] to stop, from any thread.
#[derive(Clone)]
pub struct StopHandle {
    stopped: Arc<AtomicBool>,
    interrupter: Arc<dyn Interrupt>,
}

impl StopHandle {
    /// Stops the controller.
    ///
    /// A blocked `run` or `run_once` returns promptly. The stop is permanent, later calls
    /// return at once.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        if let Err(e) = self.interrupter.interrupt() {
            log::warn!("unable to wake the watch source: {e}");
        }
    }

    /// Returns true once a stop was requested.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for StopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopHandle")
            .field("stopped", &self.is_stopped())
            .finish_non_exhaustive()
    }
}

type TimeoutHandler = Box<dyn FnMut(Duration) + Send>;
type FailureObserver = Box<dyn FnMut(HandlerError) + Send>;

/// Watches paths and hands what happens to them to registered handlers.
///
/// Configure it, then drive it with [`run`](Self::run) or [`run_once`](Self::run_once) on the
/// thread that owns it. Only [`StopHandle`] crosses threads.
pub struct NotifyController<S: WatchSource = RecommendedSource> {
    tree: WatchTree<S>,
    ignored: IgnoreSet,
    handlers: Vec<(EventMask, Box<dyn EventHandler>)>,
    unexpected: Option<Box<dyn EventHandler>>,
    timeout: Option<(Duration, TimeoutHandler)>,
    on_handler_error: Option<FailureObserver>,
    stop: StopHandle,
}

/// Controller on top of [`InotifySource`](crate::InotifySource)
#[cfg(any(target_os = "linux", target_os = "android"))]
pub type InotifyController = NotifyController<crate::inotify::InotifySource>;

impl<S: WatchSource> fmt::Debug for NotifyController<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotifyController")
            .field("watches", &self.tree.table().len())
            .field("ignored", &self.ignored)
            .field("handlers", &self.handlers.len())
            .field("unexpected", &self.unexpected.is_some())
            .field(
                "timeout",
                &self.timeout.as_ref().map(|(duration, _)| duration),
            )
            .field("stop", &self.stop)
            .finish()
    }
}

impl<S: WatchSource> NotifyController<S> {
    /// Opens a new source and creates a controller on top of it.
    pub fn new(config: Config) -> Result<Self> {
        let source = S::open(&config)?;
        Ok(Self::with_source(source, config))
    }

    /// Creates a controller on top of an already opened source.
    pub fn with_source(source: S, config: Config) -> Self {
        let stop = StopHandle {
            stopped: Arc::new(AtomicBool::new(false)),
            interrupter: source.interrupter(),
        };
        Self {
            tree: WatchTree::new(source, config),
            ignored: IgnoreSet::default(),
            handlers: Vec::new(),
            unexpected: None,
            timeout: None,
            on_handler_error: None,
            stop,
        }
    }

    /// Begin watching a path.
    ///
    /// Fails at once with [`ErrorKind::PathNotFound`](crate::ErrorKind::PathNotFound) when the
    /// path does not exist.
    pub fn watch<R: Into<WatchRequest>>(&mut self, request: R) -> Result<()> {
        self.tree.watch(request.into(), &self.ignored)
    }

    /// Watch a single file or directory with the configured default mask.
    ///
    /// Use [`watch`](Self::watch) with a [`WatchRequest`] for another mask.
    pub fn watch_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.watch(WatchRequest::file(path.as_ref()))
    }

    /// Watch a directory, every directory below it and every directory created below it later,
    /// with the configured default mask.
    pub fn watch_path_recursively<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.watch(WatchRequest::recursive(path.as_ref()))
    }

    /// Stop watching a path previously passed to one of the `watch` methods.
    pub fn unwatch<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.tree.unwatch(path.as_ref(), &self.ignored)
    }

    /// Suppress notifications for `path` and everything below it.
    ///
    /// Directories below `path` that are created later are not watched at all.
    pub fn ignore<P: AsRef<Path>>(&mut self, path: P) {
        self.ignored.ignore(path.as_ref().to_path_buf());
    }

    /// Suppress the next notification for exactly `path`.
    pub fn ignore_once<P: AsRef<Path>>(&mut self, path: P) {
        self.ignored.ignore_once(path.as_ref().to_path_buf());
    }

    /// Drop the ignore rules for exactly `path`.
    pub fn unignore<P: AsRef<Path>>(&mut self, path: P) -> bool {
        self.ignored.unignore(path.as_ref())
    }

    /// Call `handler` for every notification whose event intersects `mask`.
    ///
    /// Handlers with overlapping masks are all called.
    pub fn on_event<H: EventHandler>(&mut self, mask: EventMask, handler: H) {
        self.handlers.push((mask, Box::new(handler)));
    }

    /// Call `handler` once for every notification matching any of `masks`.
    pub fn on_events<I, H>(&mut self, masks: I, handler: H)
    where
        I: IntoIterator<Item = EventMask>,
        H: EventHandler,
    {
        let mask = masks
            .into_iter()
            .fold(EventMask::empty(), |acc, mask| acc | mask);
        self.on_event(mask, handler);
    }

    /// Call `handler` for notifications no other handler matched.
    ///
    /// Queue overflows and suppressed notifications never reach it.
    pub fn on_unexpected_event<H: EventHandler>(&mut self, handler: H) {
        self.unexpected = Some(Box::new(handler));
    }

    /// Wait at most `duration` for records, and call `handler` with the time waited when
    /// nothing arrived.
    pub fn set_event_timeout<F>(&mut self, duration: Duration, handler: F)
    where
        F: FnMut(Duration) + Send + 'static,
    {
        self.timeout = Some((duration, Box::new(handler)));
    }

    /// Receive the handler failures of [`run`](Self::run).
    ///
    /// Without an observer they are logged.
    pub fn on_handler_error<F>(&mut self, observer: F)
    where
        F: FnMut(HandlerError) + Send + 'static,
    {
        self.on_handler_error = Some(Box::new(observer));
    }

    /// Returns a handle that stops this controller from any thread.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// See [`StopHandle::stop`]
    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Returns true once a stop was requested.
    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }

    /// The active watches.
    pub fn watches(&self) -> &WatchTable {
        self.tree.table()
    }

    /// Reads one batch from the source and dispatches it.
    ///
    /// Blocks until records arrive, the event timeout elapses, or a stop is requested. A batch
    /// read while a stop was requested is still dispatched. Returns `Err` only when the source
    /// fails.
    pub fn run_once(&mut self) -> Result<Cycle> {
        let mut cycle = Cycle::default();
        if self.stop.is_stopped() {
            cycle.stopped = true;
            return Ok(cycle);
        }

        let wait = self.timeout.as_ref().map(|(duration, _)| *duration);
        let started = Instant::now();
        let records = self.tree.source_mut().read_batch(wait)?;
        let elapsed = started.elapsed();

        // each record resolves against the watch set left by the notifications before it
        let mut batch = Batch::new(&records);
        while let Some(item) = batch.next_in(self.tree.table()) {
            let translated = match item {
                Ok(translated) => translated,
                Err(stale) => {
                    log::debug!("dropping {stale}");
                    cycle.dropped += 1;
                    continue;
                }
            };

            if let Err(err) = self.tree.apply(&translated, &self.ignored) {
                log::warn!("unable to update watches: {err}");
                cycle.errors.push(err);
            }
            self.dispatch(translated, &mut cycle);
        }

        cycle.stopped = self.stop.is_stopped();
        if records.is_empty() && !cycle.stopped {
            if let Some((duration, handler)) = self.timeout.as_mut() {
                if elapsed >= *duration {
                    handler(elapsed);
                    cycle.timed_out = true;
                }
            }
        }

        Ok(cycle)
    }

    /// Runs until stopped.
    ///
    /// Handler failures go to the [observer](Self::on_handler_error), or are logged. Failures
    /// to update the watch set are logged and do not stop the loop.
    pub fn run(&mut self) -> Result<()> {
        loop {
            let cycle = self.run_once()?;
            for failure in cycle.failures {
                match self.on_handler_error.as_mut() {
                    Some(observer) => observer(failure),
                    None => log::error!("{failure}"),
                }
            }
            if cycle.stopped {
                return Ok(());
            }
        }
    }

    /// Closes the source.
    pub fn close(mut self) -> Result<()> {
        self.tree.close()
    }

    fn dispatch(&mut self, translated: Translated, cycle: &mut Cycle) {
        if !translated.is_wanted() {
            return;
        }
        let notification = translated.notification;

        if notification.is_overflow() {
            log::warn!("kernel event queue overflowed, events were lost");
            self.deliver(&notification, cycle);
            return;
        }

        if self.ignored.suppress(&notification) {
            log::trace!("suppressed {notification:?}");
            cycle.suppressed += 1;
            return;
        }

        if !self.deliver(&notification, cycle) {
            if let Some(unexpected) = self.unexpected.as_mut() {
                cycle.delivered += 1;
                if let Err(error) = unexpected.handle_event(&notification) {
                    cycle.failures.push(HandlerError {
                        notification,
                        error,
                    });
                }
            }
        }
    }

    /// Hands `notification` to every matching handler. Returns whether there was one.
    fn deliver(&mut self, notification: &Notification, cycle: &mut Cycle) -> bool {
        let mut matched = false;
        for (mask, handler) in self.handlers.iter_mut() {
            if !mask.intersects(notification.event()) {
                continue;
            }
            matched = true;
            cycle.delivered += 1;
            if let Err(error) = handler.handle_event(notification) {
                cycle.failures.push(HandlerError {
                    notification: notification.clone(),
                    error,
                });
            }
        }
        matched
    }
}
