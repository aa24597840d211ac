//! Gitignore-style exclusion rules.
//!
//! Rules are evaluated in order and the last rule matching a path decides
//! whether it is excluded. A path is also excluded when any of its parent
//! directories is, regardless of later negations, since the archiver never
//! descends into excluded directories.

use std::path::Path;

use ::ignore::gitignore::{Gitignore, GitignoreBuilder};
use tracing::warn;

/// Exclusions applied to every archive ahead of the repository rules.
pub(crate) const BUILTIN_PATTERNS: &[&str] = &[
    ".git/",
    ".hg/",
    ".svn/",
    ".vscode/",
    ".idea/",
    ".DS_Store",
    "Thumbs.db",
    ".env",
];

/// Repository ignore file read from the root of an archived directory.
pub(crate) const REPOSITORY_IGNORE_FILE: &str = ".gitignore";

/// Compiled, ordered rule set.
#[derive(Debug)]
pub(crate) struct Matcher {
    /// Rules matched against root-relative paths.
    gitignore: Gitignore,
}

impl Matcher {
    /// Compile built-in patterns followed by the repository ignore file content.
    ///
    /// Lines that are not valid patterns are skipped with a warning, the same
    /// way git ignores them.
    pub(crate) fn compile<'a>(
        builtins: impl IntoIterator<Item = &'a str>,
        repository: Option<&'a str>,
    ) -> Result<Self, ::ignore::Error> {
        let mut builder = GitignoreBuilder::new("");

        for line in builtins
            .into_iter()
            .chain(repository.into_iter().flat_map(str::lines))
        {
            if let Err(e) = builder.add_line(None, line) {
                warn!(%e, pattern = line, "skipping invalid ignore pattern");
            }
        }

        Ok(Self {
            gitignore: builder.build()?,
        })
    }

    /// Check whether a slash-separated relative path is excluded.
    ///
    /// A trailing `/` marks the path as a directory, same as `is_dir`.
    pub(crate) fn matches(&self, path: &str, is_dir: bool) -> bool {
        let is_dir = is_dir || path.ends_with('/');

        let path = path
            .split('/')
            .filter(|component| !component.is_empty() && *component != ".")
            .collect::<Vec<_>>()
            .join("/");

        if path.is_empty() {
            return false;
        }

        let path = Path::new(&path);

        path.ancestors()
            .skip(1)
            .filter(|parent| !parent.as_os_str().is_empty())
            .any(|parent| self.gitignore.matched(parent, true).is_ignore())
            || self.gitignore.matched(path, is_dir).is_ignore()
    }
}
