use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};
use glob::{MatchOptions, Pattern};

/// Options used for every pattern, `*` never crosses a directory boundary.
pub(crate) const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// A file found by a glob, together with its path relative to the static
/// part of the pattern that found it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Matched {
    pub path: Utf8PathBuf,
    pub relative: Utf8PathBuf,
}

/// Expands `{a,b}` alternations, the `glob` crate has no support for them.
///
/// `css/*.{sass,scss}` becomes `css/*.sass` and `css/*.scss`. Nested groups
/// are expanded left to right.
pub fn expand_braces(pattern: &str) -> Vec<String> {
    let Some(open) = pattern.find('{') else {
        return vec![pattern.to_string()];
    };
    let Some(close) = pattern[open..].find('}').map(|i| open + i) else {
        return vec![pattern.to_string()];
    };

    let head = &pattern[..open];
    let tail = &pattern[close + 1..];

    pattern[open + 1..close]
        .split(',')
        .flat_map(|alt| expand_braces(&format!("{head}{alt}{tail}")))
        .collect()
}

/// The leading components of a pattern which contain no wildcards.
///
/// For a pattern naming a concrete file the base is its parent directory, so
/// that the relative path of the match is the file name.
pub fn glob_base(pattern: &str) -> Utf8PathBuf {
    let path = Utf8Path::new(pattern);
    let components: Vec<_> = path.components().collect();

    let split = components
        .iter()
        .position(|c| c.as_str().contains(['*', '?', '[']))
        .unwrap_or_else(|| components.len().saturating_sub(1));

    components.iter().take(split).collect()
}

/// Expands braces and normalizes every alternative. A trailing `**` only
/// matches directories in `glob`, it is rewritten to `**/*` so that it
/// matches every file below.
fn expand(pattern: &str) -> Vec<String> {
    expand_braces(pattern)
        .into_iter()
        .map(|p| {
            let p = p.trim_start_matches("./");
            match p == "**" || p.ends_with("/**") {
                true => format!("{p}/*"),
                false => p.to_string(),
            }
        })
        .collect()
}

/// Compiles project-relative patterns for matching, with braces expanded.
pub fn compile(patterns: &[String]) -> Result<Vec<Pattern>, glob::PatternError> {
    patterns
        .iter()
        .flat_map(|p| expand(p))
        .map(|p| Pattern::new(&p))
        .collect()
}

/// Finds files matching any of the project-relative patterns under `base`.
///
/// Directories are skipped, results are deduplicated and sorted by path.
pub fn find_files<E>(base: &Utf8Path, patterns: &[String]) -> Result<Vec<Matched>, E>
where
    E: From<glob::PatternError> + From<glob::GlobError> + From<camino::FromPathBufError>,
{
    let mut found = BTreeMap::new();

    for pattern in patterns.iter().flat_map(|p| expand(p)) {
        let root = base.join(glob_base(&pattern));
        // Escape the base so that brackets in the project path are literal.
        let full = format!("{}/{}", Pattern::escape(base.as_str()), pattern);

        for path in glob::glob_with(&full, MATCH_OPTIONS)? {
            let path = Utf8PathBuf::try_from(path?)?;
            if !path.is_file() {
                continue;
            }

            let relative = path
                .strip_prefix(&root)
                .map(Utf8Path::to_path_buf)
                .unwrap_or_else(|_| path.clone());

            found.entry(path.clone()).or_insert(Matched { path, relative });
        }
    }

    Ok(found.into_values().collect())
}
