use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};

use camino::{Utf8Path, Utf8PathBuf};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use serde::Deserialize;
use serde::de::IgnoredAny;

use crate::config::{PluginDescriptor, Project};
use crate::core::{Blake3Hasher, Hash32};
use crate::error::ScriptError;

/// Syntax level plugins are lowered to.
///
/// esbuild applies the target to the whole bundle, so modules pulled in from
/// `node_modules` are lowered as well, not just `highlight.js` and `marked`.
const PLUGIN_TARGET: &str = "es2020";

/// What to bundle and where to put it. Paths are relative to the project base.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct BundleRequest {
    pub entry: Utf8PathBuf,
    pub output: Utf8PathBuf,
    /// Global name of the bundle, informational for ES module output.
    pub name: Option<String>,
    /// Comment placed at the very top of the output.
    pub banner: Option<String>,
    /// Emit `<output>.map` next to the bundle.
    pub sourcemap: bool,
    /// Lower syntax to this target and import `.html` files as strings.
    pub transpile: Option<String>,
}

impl BundleRequest {
    /// The main library: banner and source map, no transpilation.
    pub fn library(project: &Project) -> Self {
        Self {
            entry: project.main_entry.clone(),
            output: project.main_output.clone(),
            name: None,
            banner: Some(project.banner()),
            sourcemap: true,
            transpile: None,
        }
    }

    /// A built-in plugin: transpiled, no banner, no source map.
    pub fn plugin(plugin: &PluginDescriptor) -> Self {
        Self {
            entry: plugin.input.clone(),
            output: plugin.output_file(),
            name: Some(plugin.name.to_string()),
            banner: None,
            sourcemap: false,
            transpile: Some(PLUGIN_TARGET.to_string()),
        }
    }

    fn fingerprint(&self) -> Hash32 {
        Blake3Hasher::fingerprint(self)
    }
}

/// A file emitted by the bundler.
#[derive(Debug, Clone)]
pub struct BundleOutput {
    pub path: Utf8PathBuf,
    pub data: Vec<u8>,
}

/// Everything kept between two builds of the same entry point.
#[derive(Debug, Clone)]
pub struct BundleState {
    /// Fingerprint of the request that produced this state.
    pub request: Hash32,
    /// Every module that went into the bundle with its content hash.
    pub inputs: Vec<(Utf8PathBuf, Hash32)>,
    pub outputs: Vec<BundleOutput>,
}

impl BundleState {
    /// True when the request is the same and no input module changed.
    pub fn is_fresh(&self, base: &Utf8Path, request: &BundleRequest) -> bool {
        self.request == request.fingerprint()
            && !self.outputs.is_empty()
            && self.inputs.iter().all(|(path, hash)| {
                Hash32::hash_file(base.join(path)).is_ok_and(|current| current == *hash)
            })
    }
}

/// The tool doing the actual bundling.
///
/// `previous` is the state returned for the same entry point last time, if
/// any. Returning it unchanged means the bundle is still up to date.
pub trait Backend: Send + Sync {
    fn bundle(
        &self,
        base: &Utf8Path,
        request: &BundleRequest,
        previous: Option<Arc<BundleState>>,
    ) -> Result<Arc<BundleState>, ScriptError>;
}

/// Bundles by running the `esbuild` executable.
///
/// **Note:** This backend requires the `esbuild` binary to be available in
/// the system PATH.
#[derive(Debug, Clone)]
pub struct Esbuild {
    pub program: String,
}

impl Default for Esbuild {
    fn default() -> Self {
        Self {
            program: "esbuild".into(),
        }
    }
}

#[derive(Deserialize)]
struct Metafile {
    inputs: BTreeMap<String, IgnoredAny>,
}

impl Backend for Esbuild {
    fn bundle(
        &self,
        base: &Utf8Path,
        request: &BundleRequest,
        previous: Option<Arc<BundleState>>,
    ) -> Result<Arc<BundleState>, ScriptError> {
        if let Some(previous) = previous
            && previous.is_fresh(base, request)
        {
            tracing::debug!(entry = %request.entry, "bundle is up to date");
            return Ok(previous);
        }

        let fingerprint = request.fingerprint();
        let scratch = Utf8PathBuf::try_from(std::env::temp_dir())
            .unwrap_or_else(|_| base.join("target"))
            .join("deckbuild");
        fs::create_dir_all(&scratch)?;
        let metafile = scratch.join(format!("{}.json", &fingerprint.to_hex()[..16]));

        let mut command = Command::new(&self.program);
        command
            .current_dir(base)
            .arg(request.entry.as_str())
            .arg("--bundle")
            .arg("--format=esm")
            .arg("--log-level=warning")
            .arg(format!("--outfile={}", request.output))
            .arg(format!("--metafile={metafile}"));

        if let Some(banner) = &request.banner {
            command.arg(format!("--banner:js={banner}"));
        }
        if request.sourcemap {
            command.arg("--sourcemap");
        }
        if let Some(target) = &request.transpile {
            command
                .arg(format!("--target={target}"))
                .arg("--loader:.html=text");
        }

        tracing::debug!(entry = %request.entry, "running {}", self.program);
        let output = command
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()?;

        if !output.status.success() {
            return Err(ScriptError::Esbuild {
                entry: request.entry.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        let meta: Metafile = serde_json::from_slice(&fs::read(&metafile)?)?;
        fs::remove_file(&metafile).ok();

        let inputs = meta
            .inputs
            .into_keys()
            .map(Utf8PathBuf::from)
            .filter(|path| base.join(path).is_file())
            .map(|path| {
                let hash = Hash32::hash_file(base.join(&path))?;
                Ok((path, hash))
            })
            .collect::<Result<Vec<_>, std::io::Error>>()?;

        let mut files = vec![request.output.clone()];
        if request.sourcemap {
            files.push(Utf8PathBuf::from(format!("{}.map", request.output)));
        }

        let outputs = files
            .into_iter()
            .map(|path| match fs::read(base.join(&path)) {
                Ok(data) => Ok(BundleOutput { path, data }),
                Err(_) => Err(ScriptError::MissingOutput(path.to_string())),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Arc::new(BundleState {
            request: fingerprint,
            inputs,
            outputs,
        }))
    }
}

/// Per-entry store of the state of the last successful build.
///
/// Lives as long as the [`ScriptBundler`] owning it, entries are filled on
/// first build and replaced after every later one.
#[derive(Default)]
pub struct BundleCache {
    entries: Mutex<HashMap<Utf8PathBuf, Arc<BundleState>>>,
}

impl BundleCache {
    pub fn get(&self, entry: &Utf8Path) -> Option<Arc<BundleState>> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(entry).cloned()
    }

    pub fn insert(&self, entry: Utf8PathBuf, state: Arc<BundleState>) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(entry, state);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Runs bundle requests through a [`Backend`], reusing cached state.
pub struct ScriptBundler {
    backend: Box<dyn Backend>,
    cache: BundleCache,
}

impl Default for ScriptBundler {
    fn default() -> Self {
        Self::new(Esbuild::default())
    }
}

impl ScriptBundler {
    pub fn new(backend: impl Backend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
            cache: BundleCache::default(),
        }
    }

    pub fn cache(&self) -> &BundleCache {
        &self.cache
    }

    /// Builds one request and writes its outputs.
    ///
    /// The state cached for the entry point is handed to the backend, and
    /// the state it returns replaces it. A failed build leaves the cache
    /// untouched.
    pub fn bundle(
        &self,
        project: &Project,
        request: &BundleRequest,
    ) -> Result<Arc<BundleState>, ScriptError> {
        let previous = self.cache.get(&request.entry);
        let state = self.backend.bundle(&project.base, request, previous)?;

        for output in &state.outputs {
            crate::io::write_file(&project.path(&output.path), &output.data)?;
        }

        self.cache.insert(request.entry.clone(), state.clone());
        tracing::debug!(entry = %request.entry, output = %request.output, "bundled");

        Ok(state)
    }

    /// Bundles the main library.
    pub fn library(&self, project: &Project) -> Result<Arc<BundleState>, ScriptError> {
        self.bundle(project, &BundleRequest::library(project))
    }

    /// Bundles every built-in plugin concurrently.
    pub fn plugins(&self, project: &Project) -> Result<Vec<Arc<BundleState>>, ScriptError> {
        project
            .plugins
            .par_iter()
            .map(|plugin| self.bundle(project, &BundleRequest::plugin(plugin)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Manifest;

    /// Backend double which records the previous state it was handed.
    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<(Utf8PathBuf, Option<Arc<BundleState>>)>>,
        fail: Option<&'static str>,
    }

    impl Backend for Arc<Recording> {
        fn bundle(
            &self,
            _: &Utf8Path,
            request: &BundleRequest,
            previous: Option<Arc<BundleState>>,
        ) -> Result<Arc<BundleState>, ScriptError> {
            self.seen
                .lock()
                .unwrap()
                .push((request.entry.clone(), previous));

            if self.fail == Some(request.entry.as_str()) {
                return Err(ScriptError::Esbuild {
                    entry: request.entry.to_string(),
                    stderr: "Could not resolve \"./missing\"".into(),
                });
            }

            Ok(Arc::new(BundleState {
                request: request.fingerprint(),
                inputs: vec![],
                outputs: vec![BundleOutput {
                    path: request.output.clone(),
                    data: format!("// {}", request.entry).into_bytes(),
                }],
            }))
        }
    }

    fn project() -> (tempfile::TempDir, Project) {
        let dir = tempfile::tempdir().unwrap();
        let base = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        (dir, Project::with_manifest(base, Manifest::default()))
    }

    #[test]
    fn second_build_receives_first_state() {
        let (_dir, project) = project();
        let backend = Arc::new(Recording::default());
        let bundler = ScriptBundler::new(backend.clone());

        let first = bundler.library(&project).unwrap();
        let second = bundler.library(&project).unwrap();

        let seen = backend.seen.lock().unwrap();
        assert!(seen[0].1.is_none());
        assert!(Arc::ptr_eq(seen[1].1.as_ref().unwrap(), &first));
        assert!(Arc::ptr_eq(
            &bundler.cache().get(&project.main_entry).unwrap(),
            &second
        ));
        assert_eq!(bundler.cache().len(), 1);
    }

    #[test]
    fn outputs_are_written_to_their_destination() {
        let (_dir, project) = project();
        let bundler = ScriptBundler::new(Arc::new(Recording::default()));

        bundler.library(&project).unwrap();
        bundler.plugins(&project).unwrap();

        assert_eq!(
            fs::read_to_string(project.path("dist/reveal.esm.js")).unwrap(),
            "// js/index.js"
        );
        for plugin in &project.plugins {
            assert!(project.path(plugin.output_file()).is_file());
        }
        assert_eq!(bundler.cache().len(), 7);
    }

    #[test]
    fn plugins_have_separate_cache_slots() {
        let (_dir, project) = project();
        let backend = Arc::new(Recording::default());
        let bundler = ScriptBundler::new(backend.clone());

        bundler.plugins(&project).unwrap();
        bundler.plugins(&project).unwrap();

        let seen = backend.seen.lock().unwrap();
        let reused = seen.iter().filter(|(_, previous)| previous.is_some()).count();
        assert_eq!(reused, 6);
        for (entry, previous) in seen.iter().filter(|(_, p)| p.is_some()) {
            let previous = previous.as_ref().unwrap();
            let expected = project
                .plugins
                .iter()
                .find(|p| &p.input == entry)
                .map(BundleRequest::plugin)
                .unwrap();
            assert_eq!(previous.request, expected.fingerprint());
        }
    }

    #[test]
    fn failed_build_propagates_and_is_not_cached() {
        let (_dir, project) = project();
        let backend = Arc::new(Recording {
            fail: Some("plugin/zoom/plugin.js"),
            ..Recording::default()
        });
        let bundler = ScriptBundler::new(backend);

        let err = bundler.plugins(&project).unwrap_err();

        assert!(matches!(err, ScriptError::Esbuild { ref entry, .. } if entry == "plugin/zoom/plugin.js"));
        assert!(bundler.cache().get(Utf8Path::new("plugin/zoom/plugin.js")).is_none());
    }

    #[test]
    fn library_request_has_banner_and_sourcemap() {
        let (_dir, project) = project();
        let library = BundleRequest::library(&project);
        let plugin = BundleRequest::plugin(&project.plugins[0]);

        assert!(library.banner.as_deref().unwrap().starts_with("/*!"));
        assert!(library.sourcemap);
        assert!(library.transpile.is_none());

        assert!(plugin.banner.is_none());
        assert!(!plugin.sourcemap);
        assert_eq!(plugin.name.as_deref(), Some("RevealHighlight"));
        assert_eq!(plugin.transpile.as_deref(), Some(PLUGIN_TARGET));
    }

    #[test]
    fn esbuild_reuses_fresh_state_without_spawning() {
        let (_dir, project) = project();
        fs::create_dir_all(project.path("js")).unwrap();
        fs::write(project.path("js/index.js"), "export default 1;").unwrap();

        let request = BundleRequest::library(&project);
        let previous = Arc::new(BundleState {
            request: request.fingerprint(),
            inputs: vec![(
                "js/index.js".into(),
                Hash32::hash(b"export default 1;"),
            )],
            outputs: vec![BundleOutput {
                path: request.output.clone(),
                data: b"cached".to_vec(),
            }],
        });

        // A program that doesn't exist, spawning it would be an IO error.
        let backend = Esbuild {
            program: "deckbuild-no-such-esbuild".into(),
        };

        let state = backend
            .bundle(&project.base, &request, Some(previous.clone()))
            .unwrap();
        assert!(Arc::ptr_eq(&state, &previous));

        fs::write(project.path("js/index.js"), "export default 2;").unwrap();
        let stale = backend.bundle(&project.base, &request, Some(previous));
        assert!(matches!(stale, Err(ScriptError::Io(_))));
    }
}
