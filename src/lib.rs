//! Callback-driven filesystem change notifications on top of Linux inotify
//!
//! # Installation
//!
//! ```toml
//! [dependencies]
//! notify-controller = "0.1.0"
//! ```
//!
//! ## Features
//!
//! - `serde` for serialization of [`EventMask`] and [`Notification`]
//!
//! # Example
//!
//! ```no_run
//! use notify_controller::{Config, EventMask, NotifyController, Notification, Result};
//!
//! fn main() -> Result<()> {
//!     let mut controller: NotifyController = NotifyController::new(Config::default())?;
//!
//!     // Watch the current directory and everything below it, including directories created
//!     // later on.
//!     controller.watch_path_recursively(".")?;
//!
//!     controller.on_event(EventMask::CLOSE_WRITE, |n: &Notification| {
//!         println!("written: {}", n.path().display());
//!     });
//!     controller.on_event(EventMask::MOVE, |n: &Notification| match n.moved_to() {
//!         Some(to) => println!("renamed: {} -> {}", n.path().display(), to.display()),
//!         None => println!("{}: {}", n.event(), n.path().display()),
//!     });
//!
//!     // Blocks until `stop` is called through a `StopHandle` from another thread.
//!     controller.run()
//! }
//! ```
//!
//! ## Stopping from another thread
//!
//! ```no_run
//! # use notify_controller::{Config, NotifyController, Result};
//! # fn main() -> Result<()> {
//! let mut controller: NotifyController = NotifyController::new(Config::default())?;
//! controller.watch_file("/etc/hosts")?;
//!
//! let stop = controller.stop_handle();
//! std::thread::spawn(move || {
//!     std::thread::sleep(std::time::Duration::from_secs(5));
//!     stop.stop();
//! });
//!
//! controller.run()
//! # }
//! ```
//!
//! # Layers
//!
//! A [`WatchSource`](source::WatchSource) talks to the kernel. Its raw records are
//! [translated](translate::translate) into [`Notification`]s, the [`WatchTree`](tree::WatchTree)
//! adjusts the set of watches to what they report, and the [`NotifyController`] hands them to
//! the registered [`EventHandler`]s.

#![deny(missing_docs)]

pub use config::{Config, RecursiveMode, WatchRequest};
pub use controller::{Cycle, HandlerError, NotifyController, StopHandle};
pub use error::{Error, ErrorKind, Result};
pub use ignore::IgnoreSet;
pub use mask::{EventMask, ParseEventMaskError};
pub use notification::Notification;
pub use source::{RecommendedSource, WatchHandle};

#[cfg(any(target_os = "linux", target_os = "android"))]
pub use crate::controller::InotifyController;
#[cfg(any(target_os = "linux", target_os = "android"))]
pub use crate::inotify::InotifySource;
pub use null::NullSource;

#[cfg(any(target_os = "linux", target_os = "android"))]
pub mod inotify;
pub mod null;
pub mod source;
pub mod translate;
pub mod tree;

mod config;
mod controller;
mod error;
mod ignore;
mod mask;
mod notification;

#[cfg(test)]
pub(crate) mod test;

/// Result of an [`EventHandler`] invocation.
pub type HandlerResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// The set of requirements for notification handlers.
///
/// # Example implementation
///
/// ```no_run
/// use notify_controller::{EventHandler, HandlerResult, Notification};
///
/// /// Prints received notifications
/// struct NotificationPrinter;
///
/// impl EventHandler for NotificationPrinter {
///     fn handle_event(&mut self, notification: &Notification) -> HandlerResult {
///         println!("{}: {}", notification.event(), notification.path().display());
///         Ok(())
///     }
/// }
/// ```
pub trait EventHandler: Send + 'static {
    /// Handles a notification.
    ///
    /// An error does not stop the controller, and the notification is still handed to every
    /// other matching handler.
    fn handle_event(&mut self, notification: &Notification) -> HandlerResult;
}

impl<F> EventHandler for F
where
    F: FnMut(&Notification) + Send + 'static,
{
    fn handle_event(&mut self, notification: &Notification) -> HandlerResult {
        (self)(notification);
        Ok(())
    }
}

impl EventHandler for crossbeam_channel::Sender<Notification> {
    fn handle_event(&mut self, notification: &Notification) -> HandlerResult {
        self.send(notification.clone())?;
        Ok(())
    }
}

impl EventHandler for std::sync::mpsc::Sender<Notification> {
    fn handle_event(&mut self, notification: &Notification) -> HandlerResult {
        self.send(notification.clone())?;
        Ok(())
    }
}

/// Handler wrapping a closure that can fail, see [`fallible`].
#[derive(Debug, Clone)]
pub struct Fallible<F>(F);

/// Wraps a closure returning a `Result` so that it can be registered as an [`EventHandler`].
///
/// ```
/// # use notify_controller::{fallible, EventHandler, Notification};
/// let handler = fallible(|n: &Notification| -> std::io::Result<()> {
///     std::fs::metadata(n.path()).map(|_| ())
/// });
/// # fn assert_handler<H: EventHandler>(_: H) {}
/// # assert_handler(handler);
/// ```
pub fn fallible<F, E>(f: F) -> Fallible<F>
where
    F: FnMut(&Notification) -> std::result::Result<(), E> + Send + 'static,
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    Fallible(f)
}

impl<F, E> EventHandler for Fallible<F>
where
    F: FnMut(&Notification) -> std::result::Result<(), E> + Send + 'static,
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    fn handle_event(&mut self, notification: &Notification) -> HandlerResult {
        (self.0)(notification).map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_handler<H: EventHandler>(_: &H) {}

    #[test]
    fn closures_and_channels_are_handlers() {
        is_handler(&|_: &Notification| {});
        is_handler(&crossbeam_channel::unbounded::<Notification>().0);
        is_handler(&std::sync::mpsc::channel::<Notification>().0);
        is_handler(&fallible(|_: &Notification| -> std::io::Result<()> { Ok(()) }));
    }

    #[test]
    fn channel_handler_forwards_a_copy() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut handler = tx;
        let notification = Notification::new(EventMask::CREATE, "/tmp/x".into(), false);
        handler.handle_event(&notification).expect("send");
        assert_eq!(rx.try_recv(), Ok(notification));
    }

    #[test]
    fn closed_channel_is_a_handler_failure() {
        let (mut tx, rx) = std::sync::mpsc::channel::<Notification>();
        drop(rx);
        let notification = Notification::new(EventMask::CREATE, "/tmp/x".into(), false);
        assert!(tx.handle_event(&notification).is_err());
    }

    #[test]
    fn fallible_handler_reports_its_error() {
        let mut handler = fallible(|n: &Notification| {
            if n.is_dir() {
                Err("directories are not expected")
            } else {
                Ok(())
            }
        });
        let file = Notification::new(EventMask::CREATE, "/tmp/x".into(), false);
        let dir = Notification::new(EventMask::CREATE, "/tmp/d".into(), true);
        assert!(handler.handle_event(&file).is_ok());
        let err = handler.handle_event(&dir).unwrap_err();
        assert_eq!(err.to_string(), "directories are not expected");
    }
}
