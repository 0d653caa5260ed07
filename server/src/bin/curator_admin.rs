#![deny(warnings)]

use {
    anyhow::Result,
    curator_server::Criteria,
    futures::TryStreamExt,
    sqlx::{Row, SqliteConnection},
    std::path::Path,
    structopt::StructOpt,
    tokio::{fs, sync::RwLock as AsyncRwLock},
};

#[derive(StructOpt, Debug)]
#[structopt(name = "curator-admin", about = "Document archive browser admin tool")]
enum Command {
    /// Create a timestamped backup of the index database
    Backup {
        /// SQLite index database to back up
        database: String,

        /// Directory in which to store the backup
        #[structopt(long, default_value = "backups")]
        backup_directory: String,
    },

    /// Delete index records whose files no longer exist on disk
    Prune {
        /// SQLite index database to prune
        database: String,
    },

    /// Search the index the way the web UI does
    Search {
        /// SQLite index database to search
        database: String,

        /// Filename substring to match, case-insensitively
        #[structopt(long)]
        filename: Option<String>,

        /// Year to match; may be repeated
        #[structopt(long)]
        year: Vec<i64>,

        /// File-type category to match; may be repeated
        #[structopt(long = "file-type")]
        file_type: Vec<String>,

        /// Keyword which must appear somewhere in the record; may be repeated
        #[structopt(long)]
        keyword: Vec<String>,
    },

    /// Generate thumbnails for every indexed image ahead of traffic
    PreloadThumbnails {
        /// SQLite index database listing the images
        database: String,

        /// Directory containing the indexed document archive
        archive_directory: String,

        /// Directory in which to cache the thumbnails
        #[structopt(long, default_value = "thumbnail_cache")]
        cache_directory: String,
    },
}

async fn preload_thumbnails(
    archive_directory: &str,
    cache_directory: &str,
    conn: &mut SqliteConnection,
) -> Result<()> {
    let archive_root = fs::canonicalize(archive_directory).await?;

    let image_lock = AsyncRwLock::new(());

    let mut rows =
        sqlx::query("SELECT path FROM files WHERE category_type = 'Image'").fetch(&mut *conn);

    while let Some(row) = rows.try_next().await? {
        let path: String = row.get(0);

        match Path::new(&path)
            .strip_prefix(&archive_root)
            .ok()
            .and_then(|relative| relative.to_str())
        {
            Some(relative) => {
                if let Err(e) = curator_server::preload_thumbnail(
                    &image_lock,
                    archive_directory,
                    relative,
                    cache_directory,
                )
                .await
                {
                    tracing::warn!("error generating thumbnail for {path}: {e:?}");
                }
            }

            None => tracing::warn!("skipping indexed path outside the archive: {path}"),
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    pretty_env_logger::init_timed();

    match Command::from_args() {
        Command::Backup {
            database,
            backup_directory,
        } => {
            let filename = curator_server::create_backup(
                &AsyncRwLock::new(()),
                &database,
                &backup_directory,
            )
            .await?;

            println!("created {backup_directory}/{filename}");
        }

        Command::Prune { database } => {
            let mut conn = curator_server::open(&database).await?;

            let (checked, deleted) = curator_server::prune(&mut conn).await?;

            println!("checked {checked} records; deleted {deleted}");
        }

        Command::Search {
            database,
            filename,
            year,
            file_type,
            keyword,
        } => {
            let mut conn = curator_server::open(&database).await?;

            let hits = curator_server::search(
                &mut conn,
                &Criteria {
                    filename,
                    years: year,
                    types: file_type,
                    keywords: keyword,
                },
            )
            .await;

            for hit in &hits {
                println!(
                    "{}\t{}\t{}",
                    hit.category_year
                        .map(|year| year.to_string())
                        .unwrap_or_else(|| "-".to_owned()),
                    hit.category_type.as_deref().unwrap_or("-"),
                    hit.path
                );
            }
        }

        Command::PreloadThumbnails {
            database,
            archive_directory,
            cache_directory,
        } => {
            let mut conn = curator_server::open(&database).await?;

            preload_thumbnails(&archive_directory, &cache_directory, &mut conn).await?;
        }
    }

    println!("success!");

    Ok(())
}
