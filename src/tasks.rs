//! The standard build tasks.
//!
//! | task         | does                                              |
//! |--------------|---------------------------------------------------|
//! | `js-es6`     | bundles the main library                          |
//! | `js`         | `parallel(js-es6)`                                |
//! | `plugins`    | bundles the six built-in plugins                  |
//! | `css-themes` | compiles every theme                              |
//! | `css-core`   | compiles and prefixes the core stylesheet         |
//! | `css`        | `parallel(css-themes, css-core)`                  |
//! | `default`    | `series(parallel(js, css, plugins))`              |
//! | `build`      | `parallel(js, css, plugins)`                      |
//! | `package`    | `default`, then zips the result                   |
//! | `reload`     | tells connected browsers to reload                |
//! | `serve`      | dev server, live reload and watch rules           |

use std::sync::mpsc::Sender;
use std::sync::{Arc, OnceLock};

use crate::config::Project;
use crate::engine::{Step, TaskGraph, action, parallel, series};
use crate::error::RunError;
use crate::loader::css::StylePipeline;
use crate::loader::js::ScriptBundler;

/// Shared state of the standard tasks.
pub struct Toolchain {
    pub project: Project,
    pub bundler: ScriptBundler,
    /// Set once the live reload channel is running.
    reload: OnceLock<Sender<()>>,
}

impl Toolchain {
    pub fn new(project: Project, bundler: ScriptBundler) -> Self {
        Self {
            project,
            bundler,
            reload: OnceLock::new(),
        }
    }

    /// Connects the `reload` task to a live reload channel. Returns `false`
    /// if one was already connected.
    pub fn connect_reload(&self, tx: Sender<()>) -> bool {
        self.reload.set(tx).is_ok()
    }
}

/// Creates a graph with every standard task registered.
pub fn standard(toolchain: Arc<Toolchain>) -> Result<TaskGraph, RunError> {
    let mut graph = TaskGraph::new()?;
    register(&mut graph, toolchain)?;
    Ok(graph)
}

/// Registers the standard tasks into an existing graph.
pub fn register(graph: &mut TaskGraph, toolchain: Arc<Toolchain>) -> Result<(), RunError> {
    let tc = toolchain.clone();
    graph.register(
        "js-es6",
        action(move |_| {
            tc.bundler.library(&tc.project)?;
            Ok(())
        }),
    )?;
    graph.register("js", parallel(["js-es6"]))?;

    let tc = toolchain.clone();
    graph.register(
        "plugins",
        action(move |_| {
            let states = tc.bundler.plugins(&tc.project)?;
            tracing::debug!(plugins = states.len(), "bundled plugins");
            Ok(())
        }),
    )?;

    let tc = toolchain.clone();
    graph.register(
        "css-themes",
        action(move |_| {
            let report = StylePipeline::themes(&tc.project).run(&tc.project)?;
            tracing::debug!(written = report.written.len(), failed = report.failed.len(), "themes");
            Ok(())
        }),
    )?;

    let tc = toolchain.clone();
    graph.register(
        "css-core",
        action(move |_| {
            StylePipeline::core(&tc.project).run(&tc.project)?;
            Ok(())
        }),
    )?;
    graph.register("css", parallel(["css-themes", "css-core"]))?;

    graph.register("default", series([parallel(["js", "css", "plugins"])]))?;
    graph.register("build", parallel(["js", "css", "plugins"]))?;

    let tc = toolchain.clone();
    graph.register(
        "package",
        series([
            Step::from("default"),
            Step::from(action(move |_| {
                crate::package::package(&tc.project)?;
                Ok(())
            })),
        ]),
    )?;

    let tc = toolchain.clone();
    graph.register(
        "reload",
        action(move |_| {
            match tc.reload.get() {
                Some(tx) => tx.send(())?,
                None => tracing::debug!("no live reload channel, nothing to reload"),
            }
            Ok(())
        }),
    )?;

    #[cfg(all(feature = "live", feature = "server"))]
    graph.register("serve", serve(toolchain))?;

    Ok(())
}

#[cfg(all(feature = "live", feature = "server"))]
fn serve(toolchain: Arc<Toolchain>) -> crate::engine::Task {
    use crate::engine::runner::reload::LiveReload;
    use crate::engine::runner::watch::{RuleSet, watch};
    use crate::engine::runner::http;

    action(move |ctx| {
        let project = &toolchain.project;
        let options = &project.serve;

        let live = LiveReload::start(&options.host, options.reload_port)?;
        if !toolchain.connect_reload(live.sender()) {
            tracing::warn!("live reload channel was already connected");
        }

        let _server = http::start(
            project.serve_root(),
            &options.host,
            options.port,
            Some(live.port),
        )?;

        let ignored = [
            format!("{}/**", project.core_output),
            project.package_output.to_string(),
        ];
        let rules = RuleSet::new(watch_rules(), &ignored)?;

        watch(ctx.graph, &project.base, &rules, "reload")?;
        Ok(())
    })
}

/// Files watched by `serve`, and the tasks which rebuild them.
#[cfg(all(feature = "live", feature = "server"))]
pub(crate) fn watch_rules() -> Vec<crate::engine::runner::watch::WatchRule> {
    use crate::engine::runner::watch::WatchRule;

    vec![
        WatchRule::notify(&["*.html", "*.md"]),
        WatchRule::rebuild("js", &["js/**"]),
        WatchRule::rebuild("plugins", &["plugin/**/plugin.js"]),
        WatchRule::rebuild(
            "css-themes",
            &[
                "css/theme/source/*.{sass,scss}",
                "css/theme/template/*.{sass,scss}",
            ],
        ),
        WatchRule::rebuild("css-core", &["css/*.scss", "css/print/*.{sass,scss,css}"]),
    ]
}

#[cfg(test)]
mod tests {
    use std::fs::{self, File};

    use camino::{Utf8Path, Utf8PathBuf};

    use super::*;
    use crate::config::Manifest;
    use crate::core::Hash32;
    use crate::error::ScriptError;
    use crate::loader::js::{Backend, BundleOutput, BundleRequest, BundleState};

    /// Writes a placeholder module for every request, or fails all of them.
    struct Stub {
        fail: bool,
    }

    impl Backend for Stub {
        fn bundle(
            &self,
            _: &Utf8Path,
            request: &BundleRequest,
            _: Option<Arc<BundleState>>,
        ) -> Result<Arc<BundleState>, ScriptError> {
            if self.fail {
                return Err(ScriptError::Esbuild {
                    entry: request.entry.to_string(),
                    stderr: "Could not resolve".into(),
                });
            }

            Ok(Arc::new(BundleState {
                request: Hash32::default(),
                inputs: vec![],
                outputs: vec![BundleOutput {
                    path: request.output.clone(),
                    data: b"export default {};".to_vec(),
                }],
            }))
        }
    }

    fn setup(fail: bool) -> (tempfile::TempDir, Arc<Toolchain>, TaskGraph) {
        let dir = tempfile::tempdir().unwrap();
        let base = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        let project = Project::with_manifest(base, Manifest::default());

        let write = |path: &str, text: &str| crate::io::write_file(&project.path(path), text).unwrap();
        write("index.html", "<body></body>");
        write("css/reveal.scss", ".reveal { display: flex; }");
        write("css/theme/source/black.scss", "body { color: #fff; }");

        let toolchain = Arc::new(Toolchain::new(project, ScriptBundler::new(Stub { fail })));
        let mut graph = TaskGraph::with_threads(4).unwrap();
        register(&mut graph, toolchain.clone()).unwrap();

        (dir, toolchain, graph)
    }

    #[test]
    fn every_standard_task_is_registered() {
        let (_dir, _toolchain, graph) = setup(false);

        for name in [
            "js", "js-es6", "plugins", "css", "css-themes", "css-core", "default", "build",
            "package", "reload",
        ] {
            assert!(graph.contains(name), "{name} is missing");
        }
    }

    #[test]
    fn package_archives_a_finished_build() {
        let (_dir, toolchain, graph) = setup(false);
        let project = &toolchain.project;

        let diagnostics = graph.run("package").unwrap();

        let archive = diagnostics.get("package#1").unwrap();
        for name in ["js-es6", "plugins", "css-themes", "css-core"] {
            assert!(diagnostics.get(name).unwrap().end() <= archive.start, "{name}");
        }

        let zip = zip::ZipArchive::new(File::open(project.path("reveal-js-presentation.zip")).unwrap())
            .unwrap();
        let mut names: Vec<_> = zip.file_names().collect();
        names.sort();
        assert_eq!(
            names,
            [
                "dist/reveal.css",
                "dist/reveal.esm.js",
                "dist/theme/black.css",
                "index.html",
                "plugin/highlight/highlight.esm.js",
                "plugin/markdown/markdown.esm.js",
                "plugin/math/math.esm.js",
                "plugin/notes/notes.esm.js",
                "plugin/search/search.esm.js",
                "plugin/zoom/zoom.esm.js",
            ]
        );
    }

    #[test]
    fn failed_bundle_stops_package() {
        let (_dir, toolchain, graph) = setup(true);

        let error = graph.run("package").unwrap_err();

        assert!(matches!(error.task_name(), Some("js-es6" | "plugins")));
        assert!(!toolchain.project.path("reveal-js-presentation.zip").exists());
    }

    #[test]
    fn build_writes_styles_and_bundles() {
        let (_dir, toolchain, graph) = setup(false);
        let project = &toolchain.project;

        graph.run("build").unwrap();

        assert!(project.path("dist/reveal.esm.js").is_file());
        assert!(project.path("dist/theme/black.css").is_file());
        let css = fs::read_to_string(project.path("dist/reveal.css")).unwrap();
        assert!(css.contains("display: flex"));
        assert_eq!(toolchain.bundler.cache().len(), 7);
    }

    #[test]
    fn reload_without_channel_is_a_no_op() {
        let (_dir, toolchain, graph) = setup(false);

        graph.run("reload").unwrap();

        let (tx, rx) = std::sync::mpsc::channel();
        assert!(toolchain.connect_reload(tx));
        graph.run("reload").unwrap();
        graph.run("reload").unwrap();

        assert_eq!(rx.try_iter().count(), 2);
    }
}
