use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("Task '{0}' is already registered")]
    Duplicate(String),

    #[error("Task '{0}' is not registered")]
    UnknownTask(String),

    #[error("Task '{0}' refers to itself through its composition")]
    Cycle(String),

    #[error("Couldn't start the task pool.\n{0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    #[error("Task '{name}':\n{error:#}")]
    Task { name: String, error: anyhow::Error },
}

impl RunError {
    /// Name of the task that failed, if the error came from a task action.
    pub fn task_name(&self) -> Option<&str> {
        match self {
            RunError::Task { name, .. } => Some(name),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Couldn't read package manifest.\n{0}")]
    Io(#[from] std::io::Error),

    #[error("Couldn't parse package manifest.\n{0}")]
    Manifest(#[from] serde_json::Error),
}

/// Errors that can occur when bundling scripts.
#[derive(Debug, Error)]
pub enum ScriptError {
    /// An I/O error occurred during process execution.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The esbuild process returned a non-zero exit code.
    #[error("Esbuild failed for '{entry}':\n{stderr}")]
    Esbuild { entry: String, stderr: String },

    /// The metafile written by esbuild couldn't be understood.
    #[error("Couldn't read esbuild metafile: {0}")]
    Metafile(#[from] serde_json::Error),

    /// The bundle output wasn't found after a successful run.
    #[error("Esbuild produced no output for '{0}'")]
    MissingOutput(String),
}

/// Errors that abort a stylesheet pipeline. Compilation errors of single
/// files are not part of this enum, they are logged and skipped.
#[derive(Debug, Error)]
pub enum StyleError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Couldn't compile glob pattern.\n{0}")]
    GlobPattern(#[from] glob::PatternError),

    #[error("Couldn't run glob.\n{0}")]
    Glob(#[from] glob::GlobError),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),

    #[error("Vendor prefixing failed for '{0}':\n{1}")]
    Prefix(String, String),
}

#[derive(Debug, Error)]
pub enum PackageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Couldn't compile glob pattern.\n{0}")]
    GlobPattern(#[from] glob::PatternError),

    #[error("Couldn't run glob.\n{0}")]
    Glob(#[from] glob::GlobError),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),

    #[error("Couldn't write archive.\n{0}")]
    Zip(#[from] zip::result::ZipError),
}

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("Couldn't bind {0}.\n{1}")]
    Bind(String, std::io::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[cfg(feature = "live")]
    #[error(transparent)]
    Notify(#[from] notify::Error),
}
