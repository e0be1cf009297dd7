#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

pub mod config;
mod core;
pub mod engine;
mod error;
mod io;
pub mod loader;
pub mod package;
pub mod tasks;

pub use crate::config::{Manifest, PluginDescriptor, Project, ServeOptions};
pub use crate::core::Hash32;
pub use crate::engine::{Diagnostics, Step, Task, TaskContext, TaskExecution, TaskGraph};
pub use crate::engine::{action, parallel, series};
pub use crate::error::*;
pub use crate::loader::css::{StylePipeline, StyleReport};
pub use crate::loader::js::{Backend, BundleCache, BundleRequest, BundleState, Esbuild, ScriptBundler};
pub use crate::package::{PackageReport, package};
pub use crate::tasks::Toolchain;
