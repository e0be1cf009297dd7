use camino::{Utf8Path, Utf8PathBuf};
use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet};
use lightningcss::targets::{Browsers, Targets};
use rayon::iter::{IntoParallelIterator, ParallelIterator};

use crate::config::Project;
use crate::error::StyleError;
use crate::loader::glob::{Matched, find_files};

/// Outcome of one stylesheet pipeline run.
#[derive(Debug, Default)]
pub struct StyleReport {
    /// Compiled files written to disk.
    pub written: Vec<Utf8PathBuf>,
    /// Sources which failed to compile and were skipped.
    pub failed: Vec<Utf8PathBuf>,
}

/// Describes one stylesheet pipeline: which sources, where to, and whether
/// vendor prefixes are added.
#[derive(Debug, Clone)]
pub struct StylePipeline {
    pub sources: Vec<String>,
    pub output: Utf8PathBuf,
    pub load_paths: Vec<Utf8PathBuf>,
    pub prefix: Option<Browsers>,
}

impl StylePipeline {
    /// Every theme compiled on its own into the themes directory.
    pub fn themes(project: &Project) -> Self {
        Self {
            sources: project.theme_sources.clone(),
            output: project.theme_output.clone(),
            load_paths: project.style_load_paths.clone(),
            prefix: None,
        }
    }

    /// The core stylesheet, compiled and vendor-prefixed.
    pub fn core(project: &Project) -> Self {
        Self {
            sources: project.core_sources.clone(),
            output: project.core_output.clone(),
            load_paths: project.style_load_paths.clone(),
            prefix: Some(default_browsers()),
        }
    }

    /// Compiles every matched source.
    ///
    /// A source that fails to compile is logged and dropped, the remaining
    /// files are still written. Failing to read the glob, to prefix, or to
    /// write an output aborts the run.
    pub fn run(&self, project: &Project) -> Result<StyleReport, StyleError> {
        let files: Vec<Matched> = find_files::<StyleError>(&project.base, &self.sources)?;
        let load_paths: Vec<_> = self.load_paths.iter().map(|p| project.path(p)).collect();
        let output = project.path(&self.output);

        let results = files
            .into_par_iter()
            .map(|file| -> Result<_, StyleError> {
                let Some(css) = compile(&file.path, &load_paths) else {
                    return Ok(Err(file.path));
                };

                let css = match self.prefix {
                    Some(browsers) => prefix(&css, file.path.as_str(), browsers)?,
                    None => css,
                };

                let dest = output.join(&file.relative).with_extension("css");
                crate::io::write_file(&dest, css)?;
                tracing::debug!(src = %file.path, dest = %dest, "compiled stylesheet");

                Ok(Ok(dest))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut report = StyleReport::default();
        for result in results {
            match result {
                Ok(dest) => report.written.push(dest),
                Err(src) => report.failed.push(src),
            }
        }

        Ok(report)
    }
}

/// Compiles a single Sass/SCSS file, logging the formatted error on failure.
fn compile(path: &Utf8Path, load_paths: &[Utf8PathBuf]) -> Option<String> {
    let options = load_paths
        .iter()
        .fold(grass::Options::default(), |options, path| {
            options.load_path(path.as_std_path())
        });

    match grass::from_path(path.as_std_path(), &options) {
        Ok(css) => Some(css),
        Err(err) => {
            tracing::error!(%path, "couldn't compile stylesheet\n{err}");
            None
        }
    }
}

/// Browsers the core stylesheet gets vendor prefixes for.
pub fn default_browsers() -> Browsers {
    const fn version(major: u32, minor: u32) -> Option<u32> {
        Some((major << 16) | (minor << 8))
    }

    Browsers {
        android: version(109, 0),
        chrome: version(109, 0),
        edge: version(109, 0),
        firefox: version(115, 0),
        ios_saf: version(14, 0),
        opera: version(95, 0),
        safari: version(14, 0),
        samsung: version(20, 0),
        ..Browsers::default()
    }
}

/// Adds the vendor prefixes the given browsers need.
pub fn prefix(css: &str, filename: &str, browsers: Browsers) -> Result<String, StyleError> {
    let fail = |e: String| StyleError::Prefix(filename.to_string(), e);

    let options = ParserOptions {
        filename: filename.to_string(),
        ..ParserOptions::default()
    };

    let mut sheet = StyleSheet::parse(css, options).map_err(|e| fail(e.to_string()))?;

    sheet
        .minify(MinifyOptions {
            targets: Targets::from(browsers),
            ..MinifyOptions::default()
        })
        .map_err(|e| fail(e.to_string()))?;

    let output = sheet
        .to_css(PrinterOptions {
            targets: Targets::from(browsers),
            ..PrinterOptions::default()
        })
        .map_err(|e| fail(e.to_string()))?;

    Ok(output.code)
}
