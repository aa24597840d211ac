use std::{
    fs::{self, File, Metadata},
    io::{self, Cursor, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf, StripPrefixError},
};

use derive_more::{Display, Error, From};
use tempfile::NamedTempFile;
use tracing::debug;
use walkdir::{DirEntry, WalkDir};
use zip::{write::FileOptions, CompressionMethod, ZipWriter};

use crate::ignore::{Matcher, BUILTIN_PATTERNS, REPOSITORY_IGNORE_FILE};

/// Entry name used when a single source file is uploaded.
const SINGLE_SOURCE_ENTRY: &str = "app.go";

/// Errors that may occur during the archive creation process.
#[derive(Debug, Display, From, Error)]
pub(crate) enum ArchiverError {
    /// [`zip`]-crate specific error.
    Zip(zip::result::ZipError),

    /// [`walkdir`]-crate specific error.
    WalkDir(walkdir::Error),

    /// IO error.
    Io(io::Error),

    /// Unable to strip source root prefix from path.
    StripPrefix(StripPrefixError),

    /// Unable to compile the ignore rules.
    #[display(fmt = "invalid ignore rules: {}", _0)]
    Ignore(::ignore::Error),

    /// Source path does not exist.
    #[display(fmt = "source path not found: {}", "_0.display()")]
    #[from(ignore)]
    MissingSource(#[error(not(source))] PathBuf),

    /// Source is a file that can be neither sent as is nor wrapped into an archive.
    #[display(fmt = "unsupported source file type: {}", "_0.display()")]
    #[from(ignore)]
    UnsupportedSource(#[error(not(source))] PathBuf),
}

/// Turn an upload source into ZIP archive bytes.
///
/// Directories are archived with [`build_zip_archive`], `.zip` files are sent
/// unchanged and `.go` files are wrapped into an archive with a single entry.
pub(crate) fn package_source(src: &Path) -> Result<Vec<u8>, ArchiverError> {
    let metadata = match fs::metadata(src) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(ArchiverError::MissingSource(src.to_owned()))
        }
        Err(e) => return Err(e.into()),
    };

    if metadata.is_dir() {
        let mut archive_file = NamedTempFile::new()?;

        build_zip_archive(src, &mut archive_file)?;

        let mut archive_buf = Vec::with_capacity(archive_file.stream_position()? as usize);
        archive_file.seek(SeekFrom::Start(0))?;
        archive_file.read_to_end(&mut archive_buf)?;

        return Ok(archive_buf);
    }

    match src.extension().and_then(|ext| ext.to_str()) {
        Some("zip") => Ok(fs::read(src)?),
        Some("go") => {
            let mut writer = ZipWriter::new(Cursor::new(Vec::new()));

            writer.start_file(SINGLE_SOURCE_ENTRY, file_options(&metadata))?;
            io::copy(&mut File::open(src)?, &mut writer)?;

            Ok(writer.finish()?.into_inner())
        }
        _ => Err(ArchiverError::UnsupportedSource(src.to_owned())),
    }
}

/// Archive the `source_root` directory into the provided `file`.
///
/// Entries are named by their slash-separated path relative to `source_root`.
/// Only regular files are stored: directories appear as name prefixes only.
/// Paths excluded by the built-in patterns or the root `.gitignore` are left
/// out, and excluded directories are not traversed at all.
///
/// On error the content of `file` is unspecified and should be discarded.
pub(crate) fn build_zip_archive<W: Write + Seek>(
    source_root: &Path,
    file: W,
) -> Result<W, ArchiverError> {
    if !source_root.is_dir() {
        return Err(ArchiverError::MissingSource(source_root.to_owned()));
    }

    let matcher = load_matcher(source_root)?;
    let mut writer = ZipWriter::new(file);
    let mut written = 0usize;

    let mut entries = walk_source_directory(source_root, &matcher);

    while let Some(entry) = entries.next().transpose()? {
        if entry.depth() == 0 || entry.file_type().is_dir() {
            continue;
        }

        let Some(name) = entry_name(source_root, &entry)? else {
            debug!(path = %entry.path().display(), "skipping non-unicode path");
            continue;
        };

        if matcher.matches(&name, false) {
            debug!(%name, "ignoring file");
            continue;
        }

        // Symlinks are matched as files, but only their file targets are archived.
        let metadata = if entry.path_is_symlink() {
            match fs::metadata(entry.path()) {
                Ok(metadata) if metadata.is_file() => metadata,
                _ => {
                    debug!(%name, "skipping symlink without a regular file target");
                    continue;
                }
            }
        } else if entry.file_type().is_file() {
            entry.metadata()?
        } else {
            debug!(%name, "skipping special file");
            continue;
        };

        writer.start_file(name, file_options(&metadata))?;
        io::copy(&mut File::open(entry.path())?, &mut writer)?;
        written += 1;
    }

    debug!(files = written, root = %source_root.display(), "source archive built");

    Ok(writer.finish()?)
}

/// Compile the built-in patterns together with the root `.gitignore`, if any.
fn load_matcher(source_root: &Path) -> Result<Matcher, ArchiverError> {
    let ignore_path = source_root.join(REPOSITORY_IGNORE_FILE);

    let repository = match fs::read(&ignore_path) {
        Ok(content) => {
            debug!(path = %ignore_path.display(), "applying repository ignore rules");
            Some(String::from_utf8_lossy(&content).into_owned())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(e) => return Err(e.into()),
    };

    Ok(Matcher::compile(
        BUILTIN_PATTERNS.iter().copied(),
        repository.as_deref(),
    )?)
}

/// Recursively iterate over the source tree in lexical order.
///
/// Returned [`Iterator`] does not descend into excluded directories, nor into
/// directories reached through symbolic links.
fn walk_source_directory<'a>(
    source_root: &'a Path,
    matcher: &'a Matcher,
) -> impl Iterator<Item = Result<DirEntry, walkdir::Error>> + 'a {
    WalkDir::new(source_root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(move |entry| {
            if entry.depth() == 0 || !entry.file_type().is_dir() {
                return true;
            }

            match entry_name(source_root, entry) {
                Ok(Some(name)) => {
                    let excluded = matcher.matches(&format!("{name}/"), true);
                    if excluded {
                        debug!(%name, "ignoring directory");
                    }
                    !excluded
                }
                _ => false,
            }
        })
}

/// Slash-separated path of `entry` relative to `source_root`.
///
/// Returns [`None`] for paths that are not valid unicode.
fn entry_name(source_root: &Path, entry: &DirEntry) -> Result<Option<String>, StripPrefixError> {
    let relative = entry.path().strip_prefix(source_root)?;

    Ok(relative
        .components()
        .map(|component| component.as_os_str().to_str())
        .collect::<Option<Vec<_>>>()
        .map(|components| components.join("/")))
}

/// Deflate-compressed entry options carrying the file permissions.
fn file_options(metadata: &Metadata) -> FileOptions {
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(metadata.len() >= u64::from(u32::MAX));

    #[cfg(unix)]
    let options = {
        use std::os::unix::fs::PermissionsExt;
        options.unix_permissions(metadata.permissions().mode())
    };

    options
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeMap, io::Cursor};

    use zip::ZipArchive;

    use super::*;

    fn write(root: &Path, path: &str, content: &str) {
        let path = root.join(path);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn project() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        write(root, "app.go", "package main");
        write(root, "go.mod", "module app");
        write(root, ".env", "TOKEN=secret");
        write(root, ".DS_Store", "");
        write(root, ".git/HEAD", "ref: refs/heads/main");
        write(root, ".git/config", "[core]");
        write(root, ".vscode/settings.json", "{}");
        write(root, "pkg/util.go", "package pkg");
        write(root, "pkg/.DS_Store", "");
        write(root, "pkg/trace.log", "trace");
        write(root, "build/out.bin", "binary");

        dir
    }

    fn archive_contents(root: &Path) -> BTreeMap<String, String> {
        let archive = build_zip_archive(root, Cursor::new(Vec::new())).unwrap();
        let mut archive = ZipArchive::new(Cursor::new(archive.into_inner())).unwrap();

        (0..archive.len())
            .map(|index| {
                let mut file = archive.by_index(index).unwrap();
                let mut content = String::new();
                file.read_to_string(&mut content).unwrap();
                (file.name().to_owned(), content)
            })
            .collect()
    }

    #[test]
    fn builtin_exclusions() {
        let dir = project();

        let contents = archive_contents(dir.path());

        assert_eq!(
            contents.keys().map(String::as_str).collect::<Vec<_>>(),
            ["app.go", "build/out.bin", "go.mod", "pkg/trace.log", "pkg/util.go"]
        );
    }

    #[test]
    fn repository_rules_extend_and_override_builtins() {
        let dir = project();
        write(dir.path(), ".gitignore", "*.log\nbuild/\n!.env\n!.git/config\n");

        let contents = archive_contents(dir.path());

        assert_eq!(
            contents.keys().map(String::as_str).collect::<Vec<_>>(),
            [".env", ".gitignore", "app.go", "go.mod", "pkg/util.go"]
        );
    }

    #[test]
    fn extracted_contents_match_sources() {
        let dir = project();

        for (name, content) in archive_contents(dir.path()) {
            assert_eq!(fs::read_to_string(dir.path().join(&name)).unwrap(), content, "{name}");
        }
    }

    #[test]
    fn repeated_builds_yield_identical_entries() {
        let dir = project();

        assert_eq!(archive_contents(dir.path()), archive_contents(dir.path()));
    }

    #[test]
    fn empty_directory_produces_empty_archive() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("empty")).unwrap();

        assert!(archive_contents(dir.path()).is_empty());
    }

    #[test]
    fn missing_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();

        let result = build_zip_archive(&dir.path().join("absent"), Cursor::new(Vec::new()));

        assert!(matches!(result, Err(ArchiverError::MissingSource(_))));
    }

    #[test]
    fn file_root_is_rejected() {
        let dir = project();

        let result = build_zip_archive(&dir.path().join("app.go"), Cursor::new(Vec::new()));

        assert!(matches!(result, Err(ArchiverError::MissingSource(_))));
    }

    #[test]
    fn unreadable_ignore_file_is_an_error() {
        let dir = project();
        fs::create_dir(dir.path().join(REPOSITORY_IGNORE_FILE)).unwrap();

        let result = build_zip_archive(dir.path(), Cursor::new(Vec::new()));

        assert!(matches!(result, Err(ArchiverError::Io(_))));
    }

    #[test]
    fn non_utf8_ignore_file_is_applied() {
        let dir = project();
        fs::write(
            dir.path().join(REPOSITORY_IGNORE_FILE),
            b"caf\xe9.txt\n*.log\n",
        )
        .unwrap();

        let contents = archive_contents(dir.path());

        assert!(!contents.contains_key("pkg/trace.log"));
        assert!(contents.contains_key("pkg/util.go"));
    }

    /// Destination refusing every write.
    struct BrokenSink;

    impl Write for BrokenSink {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "disk full"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Seek for BrokenSink {
        fn seek(&mut self, _: SeekFrom) -> io::Result<u64> {
            Ok(0)
        }
    }

    #[test]
    fn unwritable_destination_is_an_error() {
        let dir = project();

        let result = build_zip_archive(dir.path(), BrokenSink);

        assert!(matches!(
            result,
            Err(ArchiverError::Zip(zip::result::ZipError::Io(_)) | ArchiverError::Io(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_directories_are_not_followed() {
        use std::os::unix::fs::symlink;

        let outside = tempfile::tempdir().unwrap();
        write(outside.path(), "secret.txt", "outside");

        let dir = project();
        symlink(outside.path(), dir.path().join("linked")).unwrap();
        symlink(dir.path().join("go.mod"), dir.path().join("alias.mod")).unwrap();

        let contents = archive_contents(dir.path());

        assert!(contents.keys().all(|name| !name.starts_with("linked")));
        assert_eq!(contents["alias.mod"], "module app");
    }

    #[cfg(unix)]
    #[test]
    fn permissions_are_preserved() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "run.sh", "#!/bin/sh");
        fs::set_permissions(dir.path().join("run.sh"), fs::Permissions::from_mode(0o755)).unwrap();

        let archive = build_zip_archive(dir.path(), Cursor::new(Vec::new())).unwrap();
        let mut archive = ZipArchive::new(Cursor::new(archive.into_inner())).unwrap();
        let file = archive.by_name("run.sh").unwrap();

        assert_eq!(file.compression(), CompressionMethod::Deflated);
        assert_eq!(file.unix_mode().unwrap() & 0o777, 0o755);
    }

    #[test]
    fn single_go_file_is_wrapped() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "handler.go", "package main");

        let data = package_source(&dir.path().join("handler.go")).unwrap();
        let mut archive = ZipArchive::new(Cursor::new(data)).unwrap();
        let mut content = String::new();
        archive
            .by_name(SINGLE_SOURCE_ENTRY)
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();

        assert_eq!(archive.len(), 1);
        assert_eq!(content, "package main");
    }

    #[test]
    fn zip_sources_are_sent_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("bundle.zip"), b"PK\x05\x06 not really").unwrap();

        let data = package_source(&dir.path().join("bundle.zip")).unwrap();

        assert_eq!(data, b"PK\x05\x06 not really");
    }

    #[test]
    fn directory_sources_are_archived() {
        let dir = project();

        let data = package_source(dir.path()).unwrap();
        let archive = ZipArchive::new(Cursor::new(data)).unwrap();

        assert_eq!(archive.len(), 5);
    }

    #[test]
    fn unsupported_and_missing_sources() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "notes.txt", "hello");

        assert!(matches!(
            package_source(&dir.path().join("notes.txt")),
            Err(ArchiverError::UnsupportedSource(_))
        ));
        assert!(matches!(
            package_source(&dir.path().join("absent.go")),
            Err(ArchiverError::MissingSource(_))
        ));
    }
}
