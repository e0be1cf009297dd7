//! Project layout and build settings.
//!
//! Everything the standard tasks need to know about the project lives in a
//! [`Project`]: entry points, plugin descriptors, stylesheet and packaging
//! globs, output locations, and the dev server options. All relative paths
//! are resolved against [`Project::base`].

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

use crate::error::ConfigError;

/// Describes one built-in plugin bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginDescriptor {
    /// Global name of the plugin, e.g. `RevealHighlight`.
    pub name: &'static str,
    /// Entry point of the plugin, relative to the project base.
    pub input: Utf8PathBuf,
    /// Output path stem, `.esm.js` is appended when bundling.
    pub output: Utf8PathBuf,
}

impl PluginDescriptor {
    pub fn new(name: &'static str, input: &str, output: &str) -> Self {
        Self {
            name,
            input: input.into(),
            output: output.into(),
        }
    }

    /// The ES module bundle written for this plugin.
    pub fn output_file(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(format!("{}.esm.js", self.output))
    }
}

/// Settings of the development server.
#[derive(Debug, Clone)]
pub struct ServeOptions {
    /// Directory exposed over HTTP, relative to the project base.
    pub root: Utf8PathBuf,
    pub host: String,
    pub port: u16,
    /// Preferred port of the live-reload WebSocket, an ephemeral port is used
    /// when this one is taken.
    pub reload_port: u16,
}

impl Default for ServeOptions {
    fn default() -> Self {
        Self {
            root: Utf8PathBuf::from("."),
            host: "0.0.0.0".into(),
            port: 8000,
            reload_port: 35729,
        }
    }
}

/// Subset of `package.json` used for the bundle banner.
#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    #[serde(default = "Manifest::default_name")]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub homepage: String,
}

impl Manifest {
    fn default_name() -> String {
        "reveal.js".into()
    }
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            name: Self::default_name(),
            version: String::new(),
            homepage: String::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Project {
    /// Directory all other paths are relative to.
    pub base: Utf8PathBuf,
    pub manifest: Manifest,

    pub main_entry: Utf8PathBuf,
    pub main_output: Utf8PathBuf,
    pub plugins: Vec<PluginDescriptor>,

    pub theme_sources: Vec<String>,
    pub theme_output: Utf8PathBuf,
    pub core_sources: Vec<String>,
    pub core_output: Utf8PathBuf,
    pub style_load_paths: Vec<Utf8PathBuf>,

    pub package_sources: Vec<String>,
    pub package_output: Utf8PathBuf,

    pub serve: ServeOptions,
}

impl Project {
    /// Creates the default layout rooted at `base`, reading `package.json`
    /// from it when present.
    pub fn load(base: impl Into<Utf8PathBuf>) -> Result<Self, ConfigError> {
        let base = base.into();
        let manifest = read_manifest(&base.join("package.json"))?;

        Ok(Self::with_manifest(base, manifest))
    }

    pub fn with_manifest(base: impl Into<Utf8PathBuf>, manifest: Manifest) -> Self {
        Self {
            base: base.into(),
            manifest,
            main_entry: "js/index.js".into(),
            main_output: "dist/reveal.esm.js".into(),
            plugins: vec![
                PluginDescriptor::new(
                    "RevealHighlight",
                    "plugin/highlight/plugin.js",
                    "plugin/highlight/highlight",
                ),
                PluginDescriptor::new(
                    "RevealMarkdown",
                    "plugin/markdown/plugin.js",
                    "plugin/markdown/markdown",
                ),
                PluginDescriptor::new(
                    "RevealSearch",
                    "plugin/search/plugin.js",
                    "plugin/search/search",
                ),
                PluginDescriptor::new("RevealNotes", "plugin/notes/plugin.js", "plugin/notes/notes"),
                PluginDescriptor::new("RevealZoom", "plugin/zoom/plugin.js", "plugin/zoom/zoom"),
                PluginDescriptor::new("RevealMath", "plugin/math/plugin.js", "plugin/math/math"),
            ],
            theme_sources: vec!["css/theme/source/*.{sass,scss}".into()],
            theme_output: "dist/theme".into(),
            core_sources: vec!["css/reveal.scss".into()],
            core_output: "dist".into(),
            style_load_paths: vec!["css/".into(), "css/theme/template".into()],
            package_sources: vec![
                "index.html".into(),
                "dist/**".into(),
                "lib/**".into(),
                "images/**".into(),
                "plugin/**".into(),
                "*.md".into(),
            ],
            package_output: "reveal-js-presentation.zip".into(),
            serve: ServeOptions::default(),
        }
    }

    /// Resolves a project-relative path.
    pub fn path(&self, path: impl AsRef<Utf8Path>) -> Utf8PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base.join(path)
        }
    }

    /// Directory served by the dev server.
    pub fn serve_root(&self) -> Utf8PathBuf {
        self.path(&self.serve.root)
    }

    /// Comment placed at the top of the main library bundle.
    pub fn banner(&self) -> String {
        let Manifest {
            name,
            version,
            homepage,
        } = &self.manifest;

        format!(
            "/*!\n* {name} {version}\n* {homepage}\n* MIT licensed\n*\n* Copyright (C) 2020 Hakim El Hattab, https://hakim.se\n*/\n"
        )
    }
}

fn read_manifest(path: &Utf8Path) -> Result<Manifest, ConfigError> {
    if !path.is_file() {
        tracing::debug!(%path, "no package manifest, using defaults");
        return Ok(Manifest::default());
    }

    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}
