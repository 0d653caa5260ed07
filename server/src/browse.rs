//! Directory browser for the archive tree.  Listings stay confined to the configured root and are
//! enriched with index metadata where the listed file has been indexed.

use {
    crate::{paths, warp_util::HttpError},
    anyhow::{Context, Result},
    curator_shared::{Breadcrumb, BrowseResponse, DirectoryEntry, FileEntry, FileInfo},
    sqlx::{Row, SqliteConnection},
    tokio::fs,
};

/// The index row for one file, looked up by absolute path, or nothing if the file was never indexed.
async fn file_info(conn: &mut SqliteConnection, path: &str) -> Result<Option<FileInfo>> {
    Ok(sqlx::query(
        "SELECT filename, category_type, category_year, keywords FROM files WHERE path = ?",
    )
    .bind(path)
    .fetch_optional(&mut *conn)
    .await?
    .map(|row| FileInfo {
        filename: row.get(0),
        category_type: row.get(1),
        category_year: row.get(2),
        keywords: row.get(3),
    }))
}

/// "Archive Root" plus one crumb per path component, each carrying the cumulative relative path.  Only
/// the final crumb of a non-root path is marked last, so the root page renders its sole crumb as a link.
fn breadcrumbs(sub_path: &str) -> Vec<Breadcrumb> {
    let mut crumbs = vec![Breadcrumb {
        name: "Archive Root".to_owned(),
        path: String::new(),
        is_last: false,
    }];

    let mut cumulative = String::new();

    for part in sub_path.split('/').filter(|part| !part.is_empty()) {
        if !cumulative.is_empty() {
            cumulative.push('/');
        }

        cumulative.push_str(part);

        crumbs.push(Breadcrumb {
            name: part.to_owned(),
            path: cumulative.clone(),
            is_last: false,
        });
    }

    if crumbs.len() > 1 {
        if let Some(last) = crumbs.last_mut() {
            last.is_last = true;
        }
    }

    crumbs
}

/// Handle a GET /browse request for one directory under the archive root.
///
/// Directories carry root-relative paths for further browsing; files carry absolute paths matching the
/// index's `path` column, which also serve as download links.
pub async fn respond(
    conn: &mut SqliteConnection,
    archive_dir: &str,
    sub_path: &str,
) -> Result<BrowseResponse> {
    let resolved = paths::resolve_under(archive_dir, sub_path).await?;

    if !fs::metadata(&resolved).await.map(|m| m.is_dir()).unwrap_or(false) {
        return Err(HttpError::not_found("not a directory").into());
    }

    let root = fs::canonicalize(archive_dir)
        .await
        .with_context(|| format!("unable to resolve {archive_dir}"))?;

    let mut directories = Vec::new();
    let mut files = Vec::new();

    let mut dir = match fs::read_dir(&resolved).await {
        Ok(dir) => dir,

        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(HttpError::forbidden("permission denied").into())
        }

        Err(e) => {
            return Err(e).with_context(|| format!("unable to list {}", resolved.display()))
        }
    };

    while let Some(entry) = dir.next_entry().await? {
        let name = match entry.file_name().into_string() {
            Ok(name) => name,
            Err(_) => continue,
        };

        let entry_path = entry.path();

        let metadata = match fs::metadata(&entry_path).await {
            Ok(metadata) => metadata,
            Err(_) => continue,
        };

        if metadata.is_dir() {
            directories.push(DirectoryEntry {
                name,
                path: entry_path
                    .strip_prefix(&root)
                    .unwrap_or(&entry_path)
                    .to_string_lossy()
                    .into_owned(),
            });
        } else if metadata.is_file() {
            let absolute = entry_path.to_string_lossy().into_owned();

            files.push(FileEntry {
                info: file_info(conn, &absolute).await?,
                name,
                path: absolute,
            });
        }
    }

    directories.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
    files.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));

    Ok(BrowseResponse {
        current_path: if sub_path.is_empty() {
            "/".to_owned()
        } else {
            sub_path.to_owned()
        },
        breadcrumbs: breadcrumbs(sub_path),
        directories,
        files,
    })
}

#[cfg(test)]
mod test {
    use {super::*, anyhow::Error, hyper::StatusCode};

    fn status_of(error: &Error) -> Option<StatusCode> {
        error.root_cause().downcast_ref::<HttpError>().map(|e| e.status)
    }

    #[test]
    fn breadcrumb_trails() {
        let crumbs = breadcrumbs("");

        assert_eq!(1, crumbs.len());
        assert_eq!("Archive Root", crumbs[0].name);
        assert_eq!("", crumbs[0].path);
        assert!(!crumbs[0].is_last);

        let crumbs = breadcrumbs("2023/Reports");

        assert_eq!(
            vec![
                ("Archive Root", "", false),
                ("2023", "2023", false),
                ("Reports", "2023/Reports", true),
            ],
            crumbs
                .iter()
                .map(|crumb| (crumb.name.as_str(), crumb.path.as_str(), crumb.is_last))
                .collect::<Vec<_>>()
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn listings_are_sorted_and_enriched() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let root = fs::canonicalize(dir.path()).await?;

        fs::create_dir(root.join("Reports")).await?;
        fs::create_dir(root.join("archive")).await?;
        fs::write(root.join("scan.pdf"), b"pdf").await?;
        fs::write(root.join("Notes.txt"), b"text").await?;

        let mut conn = crate::create(":memory:").await?;
        let indexed = root.join("scan.pdf").to_string_lossy().into_owned();

        sqlx::query(
            "INSERT INTO files (path, filename, category_type, category_year, keywords) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&indexed)
        .bind("scan.pdf")
        .bind("PDF Document")
        .bind(2023_i64)
        .bind("scanned")
        .execute(&mut conn)
        .await?;

        let response = respond(&mut conn, root.to_str().unwrap(), "").await?;

        assert_eq!("/", response.current_path);

        assert_eq!(
            vec![("archive", "archive"), ("Reports", "Reports")],
            response
                .directories
                .iter()
                .map(|entry| (entry.name.as_str(), entry.path.as_str()))
                .collect::<Vec<_>>()
        );

        assert_eq!(
            vec!["Notes.txt", "scan.pdf"],
            response
                .files
                .iter()
                .map(|entry| entry.name.as_str())
                .collect::<Vec<_>>()
        );

        assert!(response.files[0].info.is_none());

        let info = response.files[1].info.as_ref().unwrap();

        assert_eq!("scan.pdf", info.filename);
        assert_eq!(Some("PDF Document".to_owned()), info.category_type);
        assert_eq!(Some(2023), info.category_year);

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn subdirectories_resolve_relative_paths() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let root = fs::canonicalize(dir.path()).await?;

        fs::create_dir_all(root.join("2023/Reports")).await?;

        let mut conn = crate::create(":memory:").await?;

        let response = respond(&mut conn, root.to_str().unwrap(), "2023").await?;

        assert_eq!("2023", response.current_path);
        assert_eq!(
            vec!["2023/Reports".to_owned()],
            response
                .directories
                .iter()
                .map(|entry| entry.path.clone())
                .collect::<Vec<_>>()
        );
        assert_eq!(2, response.breadcrumbs.len());
        assert!(response.breadcrumbs[1].is_last);

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn escapes_and_non_directories_are_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path().to_str().unwrap();

        fs::write(dir.path().join("file.txt"), b"x").await?;

        let mut conn = crate::create(":memory:").await?;

        let error = respond(&mut conn, root, "../etc").await.unwrap_err();
        assert_eq!(Some(StatusCode::FORBIDDEN), status_of(&error));

        let error = respond(&mut conn, root, "missing").await.unwrap_err();
        assert_eq!(Some(StatusCode::NOT_FOUND), status_of(&error));

        let error = respond(&mut conn, root, "file.txt").await.unwrap_err();
        assert_eq!(Some(StatusCode::NOT_FOUND), status_of(&error));

        Ok(())
    }
}
