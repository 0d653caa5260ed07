//! Backup lifecycle for the index database: manual timestamped backups, restore, and on-demand zip
//! packages bundling the artifacts a git post-commit hook leaves in the backup directory.
//!
//! No table tracks backups.  The backup directory listing is the sole source of truth, with the filename
//! convention distinguishing manual backups (`index_<timestamp>.db`) from commit-tagged artifacts
//! (`commit_<short hash>*.db` and `commit_<short hash>*.zip`).

use {
    crate::warp_util::HttpError,
    anyhow::{anyhow, Context, Result},
    chrono::Local,
    globset::Glob,
    std::{
        io::{Cursor, Write},
        path::{Path, PathBuf},
    },
    tokio::{fs, sync::RwLock as AsyncRwLock, task},
    tracing::{info, warn},
};

const MANUAL_PREFIX: &str = "index_";

pub(crate) fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");

    PathBuf::from(name)
}

/// Copy `from` over `to` via a temporary sibling and a rename, so no reader ever observes a partial copy
/// under the final name.
async fn copy_into_place(from: &Path, to: &Path) -> Result<()> {
    let temp = temp_sibling(to);

    if let Err(e) = fs::copy(from, &temp).await {
        let _ = fs::remove_file(&temp).await;

        return Err(e).with_context(|| format!("unable to copy {} to {}", from.display(), temp.display()));
    }

    fs::rename(&temp, to)
        .await
        .with_context(|| format!("unable to rename {} to {}", temp.display(), to.display()))
}

/// Create a timestamped backup of the live database file, returning the new backup's filename.
///
/// Holds the database read lock, which excludes a concurrent restore but not other readers.
pub async fn create(db_lock: &AsyncRwLock<()>, db_path: &str, backup_dir: &str) -> Result<String> {
    let _guard = db_lock.read().await;

    if fs::metadata(db_path).await.is_err() {
        return Err(anyhow!("database file {db_path} not found, cannot create backup"));
    }

    fs::create_dir_all(backup_dir)
        .await
        .with_context(|| format!("unable to create {backup_dir}"))?;

    let filename = format!("{MANUAL_PREFIX}{}.db", Local::now().format("%Y%m%d_%H%M%S"));

    copy_into_place(Path::new(db_path), &Path::new(backup_dir).join(&filename)).await?;

    info!("database backup created: {filename}");

    Ok(filename)
}

/// Manual timestamped backups, newest first.  A missing backup directory just means no backups yet.
pub async fn list_manual(backup_dir: &str) -> Result<Vec<String>> {
    let mut backups = Vec::new();

    match fs::read_dir(backup_dir).await {
        Ok(mut dir) => {
            while let Some(entry) = dir.next_entry().await? {
                if let Ok(name) = entry.file_name().into_string() {
                    if name.starts_with(MANUAL_PREFIX) && name.ends_with(".db") {
                        backups.push(name);
                    }
                }
            }
        }

        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("backup directory not found: {backup_dir}");
        }

        Err(e) => return Err(e).with_context(|| format!("unable to list {backup_dir}")),
    }

    backups.sort_by(|a, b| b.cmp(a));

    Ok(backups)
}

fn screen_filename(filename: &str, suffix: Option<&str>) -> Result<()> {
    if filename.contains("..") || filename.contains('/') || filename.contains('\\') {
        return Err(HttpError::bad_request("invalid backup filename").into());
    }

    if let Some(suffix) = suffix {
        if !filename.ends_with(suffix) {
            return Err(HttpError::bad_request("invalid backup filename").into());
        }
    }

    Ok(())
}

/// Resolve a client-supplied backup filename to a file inside the backup directory.  Malformed names are
/// rejected before any filesystem access; a name which does not resolve to an existing regular file inside
/// the directory is reported as missing.
pub async fn resolve_artifact(backup_dir: &str, filename: &str, suffix: Option<&str>) -> Result<PathBuf> {
    screen_filename(filename, suffix)?;

    let dir = fs::canonicalize(backup_dir)
        .await
        .map_err(|_| HttpError::not_found("backup file not found"))?;

    let resolved = fs::canonicalize(dir.join(filename))
        .await
        .map_err(|_| HttpError::not_found("backup file not found"))?;

    if !resolved.starts_with(&dir) {
        return Err(HttpError::not_found("backup file not found").into());
    }

    if !fs::metadata(&resolved).await.map(|m| m.is_file()).unwrap_or(false) {
        return Err(HttpError::not_found("backup file not found").into());
    }

    Ok(resolved)
}

/// Overwrite the live database file with an already resolved backup, holding the database write lock for
/// the duration of the copy so no request reads a half-restored file.
pub async fn restore_from(db_lock: &AsyncRwLock<()>, db_path: &str, backup: &Path) -> Result<()> {
    let _guard = db_lock.write().await;

    copy_into_place(backup, Path::new(db_path)).await?;

    info!("database restored from {}", backup.display());

    Ok(())
}

/// All entry names in the backup directory, or none if it cannot be read.
pub async fn list_artifact_names(backup_dir: &str) -> Vec<String> {
    let mut names = Vec::new();

    match fs::read_dir(backup_dir).await {
        Ok(mut dir) => loop {
            match dir.next_entry().await {
                Ok(Some(entry)) => {
                    if let Ok(name) = entry.file_name().into_string() {
                        names.push(name);
                    }
                }

                Ok(None) => break,

                Err(e) => {
                    warn!("error listing {backup_dir}: {e:?}");

                    break;
                }
            }
        },

        Err(e) => warn!("unable to list {backup_dir}: {e:?}"),
    }

    names
}

/// Whether a database backup and a code backup tagged with this commit hash exist among the given
/// backup-directory entries, as two independent flags.
///
/// The flags check the exact artifact names the post-commit hook writes; the package download is more
/// lenient and accepts any `commit_<hash>*` pair.
pub fn artifact_flags(names: &[String], hash: &str) -> (bool, bool) {
    let db = format!("commit_{hash}.db");
    let code = format!("commit_{hash}.zip");

    (
        names.iter().any(|name| *name == db),
        names.iter().any(|name| *name == code),
    )
}

async fn find_commit_artifacts(backup_dir: &str, hash: &str) -> Result<Option<(PathBuf, PathBuf)>> {
    let names = list_artifact_names(backup_dir).await;

    let db = Glob::new(&format!("commit_{hash}*.db"))?.compile_matcher();
    let code = Glob::new(&format!("commit_{hash}*.zip"))?.compile_matcher();

    let mut db_names = names.iter().filter(|name| db.is_match(name)).collect::<Vec<_>>();
    let mut code_names = names.iter().filter(|name| code.is_match(name)).collect::<Vec<_>>();

    db_names.sort();
    code_names.sort();

    Ok(match (db_names.first(), code_names.first()) {
        (Some(db_name), Some(code_name)) => {
            let dir = Path::new(backup_dir);

            Some((dir.join(db_name), dir.join(code_name)))
        }

        _ => None,
    })
}

fn write_zip(entries: &[(String, Vec<u8>)]) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();

    {
        let mut zip = zip::ZipWriter::new(Cursor::new(&mut buffer));

        for (name, content) in entries {
            zip.start_file(name.as_str(), zip::write::SimpleFileOptions::default())?;
            zip.write_all(content)?;
        }

        zip.finish()?;
    }

    Ok(buffer)
}

/// Assemble the downloadable package for one commit: both backup artifacts plus any of the listed project
/// documents which exist.  Returns the download filename and the zip content.
///
/// Both artifacts must be present.  There is no integrity check correlating artifact content with the
/// commit itself; the filename convention is trusted.
pub async fn commit_package(
    backup_dir: &str,
    extra_documents: &[&str],
    hash: &str,
) -> Result<(String, Vec<u8>)> {
    if !crate::history::valid_commit_hash(hash) {
        return Err(HttpError::bad_request("invalid commit hash").into());
    }

    let (db_path, code_path) = find_commit_artifacts(backup_dir, hash)
        .await?
        .ok_or_else(|| HttpError::not_found("required backup files not found for this commit"))?;

    let mut entries = Vec::new();

    for path in [&db_path, &code_path] {
        entries.push((
            path.file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            fs::read(path)
                .await
                .with_context(|| format!("unable to read {}", path.display()))?,
        ));
    }

    for path in extra_documents {
        if let Ok(content) = fs::read(path).await {
            entries.push((
                Path::new(path)
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                content,
            ));
        }
    }

    let buffer = task::block_in_place(|| write_zip(&entries))?;

    Ok((format!("curator_package_{hash}.zip"), buffer))
}

#[cfg(test)]
mod test {
    use {super::*, anyhow::Error, hyper::StatusCode, tokio::sync::RwLock as AsyncRwLock};

    fn status_of(error: &Error) -> Option<StatusCode> {
        error.root_cause().downcast_ref::<HttpError>().map(|e| e.status)
    }

    #[test]
    fn filename_screening() {
        assert!(screen_filename("index_20240101_120000.db", Some(".db")).is_ok());
        assert!(screen_filename("commit_abc1234_code.zip", Some(".zip")).is_ok());

        for (filename, suffix) in [
            ("../index.db", Some(".db")),
            ("..", None),
            ("/etc/passwd", None),
            ("nested/index.db", Some(".db")),
            ("back\\slash.db", Some(".db")),
            ("index_20240101_120000.zip", Some(".db")),
            ("index_20240101_120000", Some(".db")),
        ] {
            let error = screen_filename(filename, suffix).unwrap_err();

            assert_eq!(Some(StatusCode::BAD_REQUEST), status_of(&error), "{filename}");
        }
    }

    #[test]
    fn artifact_flag_matching() {
        let names = vec![
            "index_20240101_120000.db".to_owned(),
            "commit_abc1234.db".to_owned(),
            "commit_abc1234.zip".to_owned(),
            "commit_def5678.db".to_owned(),
            "commit_def5678_code.zip".to_owned(),
        ];

        assert_eq!((true, true), artifact_flags(&names, "abc1234"));

        // the hook writes exact names; a suffixed zip only counts for the package download
        assert_eq!((true, false), artifact_flags(&names, "def5678"));
        assert_eq!((false, false), artifact_flags(&names, "0123abc"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn backup_restore_round_trip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let db_path = dir.path().join("index.db");
        let backup_dir = dir.path().join("backups");
        let db_lock = AsyncRwLock::new(());

        fs::write(&db_path, b"original content").await?;

        let filename = create(
            &db_lock,
            db_path.to_str().unwrap(),
            backup_dir.to_str().unwrap(),
        )
        .await?;

        assert!(filename.starts_with("index_") && filename.ends_with(".db"));
        assert_eq!(
            vec![filename.clone()],
            list_manual(backup_dir.to_str().unwrap()).await?
        );

        fs::write(&db_path, b"modified content").await?;

        let backup = resolve_artifact(backup_dir.to_str().unwrap(), &filename, Some(".db")).await?;

        restore_from(&db_lock, db_path.to_str().unwrap(), &backup).await?;

        assert_eq!(b"original content".as_slice(), fs::read(&db_path).await?);

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn missing_backups_are_not_found() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let backup_dir = dir.path().to_str().unwrap().to_owned();

        let error = resolve_artifact(&backup_dir, "index_20240101_120000.db", Some(".db"))
            .await
            .unwrap_err();
        assert_eq!(Some(StatusCode::NOT_FOUND), status_of(&error));

        // a directory whose name passes screening is still not a backup
        fs::create_dir(dir.path().join("index_dir.db")).await?;

        let error = resolve_artifact(&backup_dir, "index_dir.db", Some(".db")).await.unwrap_err();
        assert_eq!(Some(StatusCode::NOT_FOUND), status_of(&error));

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn list_is_newest_first_and_filtered() -> Result<()> {
        let dir = tempfile::tempdir()?;

        for name in [
            "index_20240101_120000.db",
            "index_20240301_080000.db",
            "index_20240201_090000.db",
            "commit_abc1234.db",
            "notes.txt",
        ] {
            fs::write(dir.path().join(name), b"x").await?;
        }

        assert_eq!(
            vec![
                "index_20240301_080000.db".to_owned(),
                "index_20240201_090000.db".to_owned(),
                "index_20240101_120000.db".to_owned(),
            ],
            list_manual(dir.path().to_str().unwrap()).await?
        );

        assert!(list_manual(dir.path().join("missing").to_str().unwrap()).await?.is_empty());

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn package_bundles_artifacts_and_documents() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let backup_dir = dir.path().join("backups");
        let changelog = dir.path().join("CHANGELOG.md");
        let missing = dir.path().join("missing.md");

        fs::create_dir(&backup_dir).await?;
        fs::write(backup_dir.join("commit_abc1234.db"), b"db bytes").await?;
        fs::write(backup_dir.join("commit_abc1234_code.zip"), b"code bytes").await?;
        fs::write(&changelog, b"# Changelog").await?;

        let (filename, content) = commit_package(
            backup_dir.to_str().unwrap(),
            &[changelog.to_str().unwrap(), missing.to_str().unwrap()],
            "abc1234",
        )
        .await?;

        assert_eq!("curator_package_abc1234.zip", filename);

        let mut archive = zip::ZipArchive::new(Cursor::new(content))?;
        let mut names = archive.file_names().map(str::to_owned).collect::<Vec<_>>();

        names.sort();

        assert_eq!(
            vec![
                "CHANGELOG.md".to_owned(),
                "commit_abc1234.db".to_owned(),
                "commit_abc1234_code.zip".to_owned(),
            ],
            names
        );

        let mut entry = archive.by_name("commit_abc1234.db")?;
        let mut content = Vec::new();

        std::io::copy(&mut entry, &mut content)?;

        assert_eq!(b"db bytes".as_slice(), content);

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn package_requires_both_artifacts() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let backup_dir = dir.path().to_str().unwrap().to_owned();

        fs::write(dir.path().join("commit_abc1234.db"), b"db bytes").await?;

        let error = commit_package(&backup_dir, &[], "abc1234").await.unwrap_err();
        assert_eq!(Some(StatusCode::NOT_FOUND), status_of(&error));

        let error = commit_package(&backup_dir, &[], "NOT-A-HASH").await.unwrap_err();
        assert_eq!(Some(StatusCode::BAD_REQUEST), status_of(&error));

        Ok(())
    }
}
