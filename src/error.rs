//! Error types

use std::error::Error as StdError;
use std::path::PathBuf;
use std::result::Result as StdResult;
use std::{fmt, io};

/// Type alias to use this library's `Error` type in a Result
pub type Result<T> = StdResult<T, Error>;

/// Error kinds
#[derive(Debug)]
pub enum ErrorKind {
    /// Generic error
    ///
    /// May be used in cases where a platform specific error is mapped to this type, or for opaque
    /// internal errors.
    Generic(String),

    /// I/O errors.
    Io(io::Error),

    /// The kernel notification session could not be created.
    Init(io::Error),

    /// A path does not exist.
    PathNotFound,

    /// Attempted to remove a watch that does not exist.
    WatchNotFound,

    /// Can't watch (more) files, limit on the total number of inotify watches reached
    MaxFilesWatch,
}

/// Controller error type.
///
/// Errors are emitted when opening a watch source, when changing the set of watched paths, or
/// while reading from the source. Errors about specific paths have the `paths` field populated.
#[derive(Debug)]
pub struct Error {
    /// Kind of the error.
    pub kind: ErrorKind,

    /// Relevant paths to the error, if any.
    pub paths: Vec<PathBuf>,
}

impl Error {
    /// Adds a path to the error.
    pub fn add_path(mut self, path: PathBuf) -> Self {
        self.paths.push(path);
        self
    }

    /// Replaces the paths for the error.
    pub fn set_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.paths = paths;
        self
    }

    /// Creates a new Error with empty paths given its kind.
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            paths: Vec::new(),
        }
    }

    /// Creates a new generic Error from a message.
    pub fn generic(msg: &str) -> Self {
        Self::new(ErrorKind::Generic(msg.into()))
    }

    /// Creates a new i/o Error from a stdlib `io::Error`.
    pub fn io(err: io::Error) -> Self {
        Self::new(ErrorKind::Io(err))
    }

    /// Similar to [`Error::io`], but specifically handles [`io::ErrorKind::NotFound`].
    pub fn io_watch(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::NotFound {
            Self::path_not_found()
        } else {
            Self::io(err)
        }
    }

    /// Creates a new "session init" error.
    pub fn init(err: io::Error) -> Self {
        Self::new(ErrorKind::Init(err))
    }

    /// Creates a new "path not found" error.
    pub fn path_not_found() -> Self {
        Self::new(ErrorKind::PathNotFound)
    }

    /// Creates a new "watch not found" error.
    pub fn watch_not_found() -> Self {
        Self::new(ErrorKind::WatchNotFound)
    }

    /// Creates a new "watch limit reached" error.
    pub fn max_files_watch() -> Self {
        Self::new(ErrorKind::MaxFilesWatch)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let error = match self.kind {
            ErrorKind::PathNotFound => "No path was found.".to_string(),
            ErrorKind::WatchNotFound => "No watch was found.".to_string(),
            ErrorKind::Generic(ref err) => err.clone(),
            ErrorKind::Io(ref err) => err.to_string(),
            ErrorKind::Init(ref err) => format!("Unable to open the notification session: {err}"),
            ErrorKind::MaxFilesWatch => "OS file watch limit reached.".to_string(),
        };

        if self.paths.is_empty() {
            write!(f, "{error}")
        } else {
            write!(f, "{error} about {:?}", self.paths)
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self.kind {
            ErrorKind::Io(ref cause) | ErrorKind::Init(ref cause) => Some(cause),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::io(err)
    }
}

#[test]
fn display_formatted_errors() {
    let expected = "Some error";

    assert_eq!(expected, format!("{}", Error::generic(expected)));

    assert_eq!(
        expected,
        format!(
            "{}",
            Error::io(io::Error::new(io::ErrorKind::Other, expected))
        )
    );
}

#[test]
fn display_errors_with_paths() {
    let err = Error::path_not_found().add_path(PathBuf::from("/not/existing/path"));
    assert_eq!(
        r#"No path was found. about ["/not/existing/path"]"#,
        err.to_string()
    );
}

#[test]
fn io_watch_maps_not_found() {
    let err = Error::io_watch(io::Error::from(io::ErrorKind::NotFound));
    assert!(matches!(err.kind, ErrorKind::PathNotFound));

    let err = Error::io_watch(io::Error::from(io::ErrorKind::PermissionDenied));
    assert!(matches!(err.kind, ErrorKind::Io(_)));
}

#[test]
fn init_error_exposes_its_source() {
    let err = Error::init(io::Error::from_raw_os_error(libc::EMFILE));
    assert!(err.source().is_some());
    assert!(err.to_string().starts_with("Unable to open the notification session"));
}
