#![deny(warnings)]

use {
    crate::warp_util::HttpError,
    anyhow::{anyhow, Result},
    curator_shared::{NoteUpdate, Notice, SearchRequest, SearchResponse},
    futures::future::TryFutureExt,
    http::{
        header,
        response::{self, Response},
        status::StatusCode,
    },
    hyper::Body,
    rand::Rng,
    serde::Serialize,
    sha2::{Digest, Sha256},
    sqlx::{sqlite::SqliteConnectOptions, ConnectOptions, SqliteConnection},
    std::{convert::Infallible, net::SocketAddrV4, sync::Arc},
    structopt::StructOpt,
    tokio::{fs, sync::RwLock as AsyncRwLock},
    tracing::{info, warn},
    warp::{path::Tail, Filter, Rejection, Reply},
};

pub use {
    backup::create as create_backup,
    maintenance::prune,
    media::preload_thumbnail,
    search::{search, Criteria},
};

mod backup;
mod browse;
mod history;
mod keywords;
mod maintenance;
mod media;
mod notes;
mod notice;
mod paths;
mod search;
mod warp_util;

#[derive(StructOpt, Debug)]
#[structopt(name = "curator-server", about = "Document archive browser backend")]
pub struct Options {
    /// Address to which to bind
    #[structopt(long)]
    pub address: SocketAddrV4,

    /// Directory containing the indexed document archive
    #[structopt(long, env = "CURATOR_ARCHIVE_DIR")]
    pub archive_directory: String,

    /// SQLite index produced by the offline indexer
    #[structopt(long, env = "CURATOR_DB_PATH", default_value = "index.db")]
    pub database: String,

    /// Directory containing manual and per-commit database backups
    #[structopt(long, default_value = "backups")]
    pub backup_directory: String,

    /// Directory in which to cache lazily generated thumbnails
    #[structopt(long, default_value = "thumbnail_cache")]
    pub cache_directory: String,

    /// Directory containing the editable markdown documents
    #[structopt(long, default_value = ".")]
    pub notes_directory: String,

    /// Git repository whose history the history page shows
    #[structopt(long, default_value = ".")]
    pub repository: String,

    /// Changelog consulted for per-version release notes
    #[structopt(long, default_value = "CHANGELOG.md")]
    pub changelog: String,

    /// Workflow-notes document rendered on the history page
    #[structopt(long, default_value = "WORKFLOW_NOTES.md")]
    pub workflow_notes: String,

    /// Directory containing static resources
    #[structopt(long, default_value = "public")]
    pub public_directory: String,

    /// Secret for signing notice cookies; a random key is used when unset
    #[structopt(long, env = "CURATOR_SECRET_KEY", hide_env_values = true)]
    pub secret_key: Option<String>,
}

/// Key for signing notice cookies: a digest of the configured secret, or random bytes when none was
/// given, in which case notices survive only within one server run.
pub fn secret_key(configured: Option<&str>) -> [u8; 32] {
    if let Some(secret) = configured {
        Sha256::digest(secret.as_bytes()).into()
    } else {
        let mut key = [0u8; 32];

        rand::thread_rng().fill(&mut key);

        key
    }
}

/// Open the existing SQLite index.  The index is produced by the offline indexer, so a missing file is an
/// error rather than an empty database.
pub async fn open(db_path: &str) -> Result<SqliteConnection> {
    if fs::metadata(db_path).await.is_err() {
        return Err(anyhow!(
            "database file {db_path} not found; run the indexer first"
        ));
    }

    Ok(format!("sqlite://{db_path}")
        .parse::<SqliteConnectOptions>()?
        .connect()
        .await?)
}

/// Create or open the index at `db_path`, applying the schema.  Used by the admin tool and tests; the
/// server itself only ever opens an existing index.
pub async fn create(db_path: &str) -> Result<SqliteConnection> {
    let mut conn = format!("sqlite://{db_path}")
        .parse::<SqliteConnectOptions>()?
        .create_if_missing(true)
        .connect()
        .await?;

    for statement in schema::DDL_STATEMENTS {
        sqlx::query(statement).execute(&mut conn).await?;
    }

    Ok(conn)
}

/// Open a per-request connection.  The restore path holds the write half of `db_lock` while it replaces
/// the database file, so opens are held off until the file is whole again; a connection opened earlier
/// keeps reading the file it originally opened.
async fn connect(options: &Options, db_lock: &AsyncRwLock<()>) -> Result<SqliteConnection> {
    let _guard = db_lock.read().await;

    open(&options.database).await
}

fn response() -> response::Builder {
    Response::builder()
}

fn json(body: &impl Serialize, clear_notices: bool) -> Result<Response<Body>> {
    let content = serde_json::to_vec(body)?;

    let mut builder = response()
        .header(header::CONTENT_LENGTH, content.len())
        .header(header::CONTENT_TYPE, "application/json");

    if clear_notices {
        builder = builder.header(header::SET_COOKIE, notice::clear_cookie());
    }

    Ok(builder.body(Body::from(content))?)
}

fn see_other(
    secret_key: &[u8],
    location: &'static str,
    notices: &[Notice],
) -> Result<Response<Body>> {
    let mut builder = response()
        .status(StatusCode::SEE_OTHER)
        .header(header::LOCATION, location);

    if !notices.is_empty() {
        builder = builder.header(header::SET_COOKIE, notice::set_cookie(secret_key, notices)?);
    }

    Ok(builder.body(Body::empty())?)
}

async fn search_page(
    options: &Options,
    db_lock: &AsyncRwLock<()>,
    request: SearchRequest,
    notices: Vec<Notice>,
) -> Result<SearchResponse> {
    let mut conn = connect(options, db_lock).await?;

    search::respond(&mut conn, request, notices).await
}

fn routes(
    options: &Arc<Options>,
    db_lock: &Arc<AsyncRwLock<()>>,
    image_lock: &Arc<AsyncRwLock<()>>,
    secret_key: [u8; 32],
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let notice_cookie = warp::cookie::optional::<String>(notice::COOKIE_NAME);

    warp::post()
        .and(
            warp::path::end()
                .and(warp::body::form::<SearchRequest>())
                .and(notice_cookie)
                .and_then({
                    let options = options.clone();
                    let db_lock = db_lock.clone();

                    move |request: SearchRequest, cookie: Option<String>| {
                        let options = options.clone();
                        let db_lock = db_lock.clone();

                        async move {
                            let notices = notice::consume(&secret_key, cookie.as_deref());
                            let clear = !notices.is_empty();

                            json(
                                &search_page(&options, &db_lock, request, notices).await?,
                                clear,
                            )
                        }
                        .map_err(|e| {
                            warn!("error handling search: {e:?}");

                            Rejection::from(HttpError::from(e))
                        })
                    }
                })
                .or(warp::path!("backup").and_then({
                    let options = options.clone();
                    let db_lock = db_lock.clone();

                    move || {
                        let options = options.clone();
                        let db_lock = db_lock.clone();

                        async move {
                            let notice = match backup::create(
                                &db_lock,
                                &options.database,
                                &options.backup_directory,
                            )
                            .await
                            {
                                Ok(filename) => Notice::success(format!(
                                    "Backup created successfully: {filename}"
                                )),

                                Err(e) => {
                                    warn!("unable to create backup: {e:?}");

                                    Notice::error("Failed to create backup.")
                                }
                            };

                            see_other(&secret_key, "/history", &[notice])
                        }
                        .map_err(|e| {
                            warn!("error handling backup: {e:?}");

                            Rejection::from(HttpError::from(e))
                        })
                    }
                }))
                .or(warp::path!("restore_backup" / String).and_then({
                    let options = options.clone();
                    let db_lock = db_lock.clone();

                    move |filename: String| {
                        let options = options.clone();
                        let db_lock = db_lock.clone();

                        async move {
                            let backup = backup::resolve_artifact(
                                &options.backup_directory,
                                &filename,
                                Some(".db"),
                            )
                            .await?;

                            let notice = match backup::restore_from(
                                &db_lock,
                                &options.database,
                                &backup,
                            )
                            .await
                            {
                                Ok(()) => Notice::success(format!(
                                    "Database successfully restored from '{filename}'."
                                )),

                                Err(e) => {
                                    warn!("unable to restore backup {filename}: {e:?}");

                                    Notice::error(format!("Failed to restore database: {e}"))
                                }
                            };

                            see_other(&secret_key, "/history", &[notice])
                        }
                        .map_err(|e| {
                            warn!("error handling restore: {e:?}");

                            Rejection::from(HttpError::from(e))
                        })
                    }
                }))
                .or(warp::path!("notes")
                    .and(warp::body::form::<NoteUpdate>())
                    .and_then({
                        let options = options.clone();

                        move |update: NoteUpdate| {
                            let options = options.clone();

                            async move {
                                let notice =
                                    notes::update(&options.notes_directory, &update).await;

                                see_other(&secret_key, "/notes", &[notice])
                            }
                            .map_err(|e| {
                                warn!("error handling notes update: {e:?}");

                                Rejection::from(HttpError::from(e))
                            })
                        }
                    })),
        )
        .or(warp::get().and(
            warp::path::end()
                .and(warp::query::<SearchRequest>())
                .and(notice_cookie)
                .and_then({
                    let options = options.clone();
                    let db_lock = db_lock.clone();

                    move |request: SearchRequest, cookie: Option<String>| {
                        let options = options.clone();
                        let db_lock = db_lock.clone();

                        async move {
                            let notices = notice::consume(&secret_key, cookie.as_deref());
                            let clear = !notices.is_empty();

                            json(
                                &search_page(&options, &db_lock, request, notices).await?,
                                clear,
                            )
                        }
                        .map_err(|e| {
                            warn!("error handling search: {e:?}");

                            Rejection::from(HttpError::from(e))
                        })
                    }
                })
                .or(warp::path!("history").and(notice_cookie).and_then({
                    let options = options.clone();

                    move |cookie: Option<String>| {
                        let options = options.clone();

                        async move {
                            let notices = notice::consume(&secret_key, cookie.as_deref());
                            let clear = !notices.is_empty();

                            json(
                                &history::respond(
                                    &options.repository,
                                    &options.backup_directory,
                                    &options.changelog,
                                    &options.workflow_notes,
                                    notices,
                                )
                                .await,
                                clear,
                            )
                        }
                        .map_err(|e| {
                            warn!("error handling history: {e:?}");

                            Rejection::from(HttpError::from(e))
                        })
                    }
                }))
                .or(warp::path!("notes").and(notice_cookie).and_then({
                    let options = options.clone();

                    move |cookie: Option<String>| {
                        let options = options.clone();

                        async move {
                            let notices = notice::consume(&secret_key, cookie.as_deref());
                            let clear = !notices.is_empty();

                            json(
                                &notes::respond(&options.notes_directory, notices).await,
                                clear,
                            )
                        }
                        .map_err(|e| {
                            warn!("error handling notes: {e:?}");

                            Rejection::from(HttpError::from(e))
                        })
                    }
                }))
                .or(warp::path!("download_backup" / String).and_then({
                    let options = options.clone();

                    move |filename: String| {
                        let options = options.clone();

                        async move {
                            let path = backup::resolve_artifact(
                                &options.backup_directory,
                                &filename,
                                Some(".db"),
                            )
                            .await?;

                            media::send_attachment(&path).await
                        }
                        .map_err(|e| Rejection::from(HttpError::from(e)))
                    }
                }))
                .or(warp::path!("download_code_backup" / String).and_then({
                    let options = options.clone();

                    move |filename: String| {
                        let options = options.clone();

                        async move {
                            let path = backup::resolve_artifact(
                                &options.backup_directory,
                                &filename,
                                Some(".zip"),
                            )
                            .await?;

                            media::send_attachment(&path).await
                        }
                        .map_err(|e| Rejection::from(HttpError::from(e)))
                    }
                }))
                .or(warp::path!("download_commit_package" / String).and_then({
                    let options = options.clone();

                    move |hash: String| {
                        let options = options.clone();

                        async move {
                            let (filename, content) = backup::commit_package(
                                &options.backup_directory,
                                &[options.changelog.as_str(), options.workflow_notes.as_str()],
                                &hash,
                            )
                            .await?;

                            Ok(response()
                                .header(header::CONTENT_LENGTH, content.len())
                                .header(header::CONTENT_TYPE, "application/zip")
                                .header(
                                    header::CONTENT_DISPOSITION,
                                    format!("attachment; filename=\"{filename}\""),
                                )
                                .body(Body::from(content))?)
                        }
                        .map_err(|e| {
                            warn!("error assembling commit package: {e:?}");

                            Rejection::from(HttpError::from(e))
                        })
                    }
                }))
                .or(warp::path!("download_change_notes" / String).and_then({
                    let options = options.clone();

                    move |hash: String| {
                        let options = options.clone();

                        async move {
                            let message =
                                history::change_notes(&options.repository, &hash).await?;

                            let short = &hash[..hash.len().min(10)];

                            Ok(response()
                                .header(header::CONTENT_LENGTH, message.len())
                                .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
                                .header(
                                    header::CONTENT_DISPOSITION,
                                    format!("attachment; filename=\"change_notes_{short}.txt\""),
                                )
                                .body(Body::from(message))?)
                        }
                        .map_err(|e| Rejection::from(HttpError::from(e)))
                    }
                }))
                .or(warp::path("browse").and(warp::path::tail()).and_then({
                    let options = options.clone();
                    let db_lock = db_lock.clone();

                    move |tail: Tail| {
                        let options = options.clone();
                        let db_lock = db_lock.clone();

                        async move {
                            let sub_path = paths::decode(tail.as_str())?;

                            let mut conn = connect(&options, &db_lock).await?;

                            json(
                                &browse::respond(&mut conn, &options.archive_directory, &sub_path)
                                    .await?,
                                false,
                            )
                        }
                        .map_err(|e| {
                            warn!("error handling browse: {e:?}");

                            Rejection::from(HttpError::from(e))
                        })
                    }
                }))
                .or(warp::path("download").and(warp::path::tail()).and_then({
                    let options = options.clone();

                    move |tail: Tail| {
                        let options = options.clone();

                        async move {
                            let path = paths::decode(tail.as_str())?;

                            media::download(&options.archive_directory, &path).await
                        }
                        .map_err(|e| {
                            warn!("error serving download: {e:?}");

                            Rejection::from(HttpError::from(e))
                        })
                    }
                }))
                .or(warp::path("thumbnail").and(warp::path::tail()).and_then({
                    let options = options.clone();
                    let image_lock = image_lock.clone();

                    move |tail: Tail| {
                        let options = options.clone();
                        let image_lock = image_lock.clone();

                        async move {
                            let path = paths::decode(tail.as_str())?;

                            media::thumbnail(
                                &image_lock,
                                &options.archive_directory,
                                &path,
                                &options.cache_directory,
                            )
                            .await
                        }
                        .map_err(|e| {
                            warn!("error serving thumbnail: {e:?}");

                            Rejection::from(HttpError::from(e))
                        })
                    }
                }))
                .or(warp::fs::dir(options.public_directory.clone())),
        ))
        .recover(warp_util::handle_rejection)
        .with(warp::log("curator"))
}

pub async fn serve(options: &Arc<Options>, secret_key: [u8; 32]) -> Result<()> {
    if !fs::metadata(&options.archive_directory)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
    {
        return Err(anyhow!(
            "archive directory {} not found",
            options.archive_directory
        ));
    }

    let db_lock = Arc::new(AsyncRwLock::new(()));
    let image_lock = Arc::new(AsyncRwLock::new(()));

    let routes = routes(options, &db_lock, &image_lock, secret_key);

    let (address, future) = warp::serve(routes).try_bind_ephemeral(options.address)?;

    info!("listening on {}", address);

    future.await;

    Ok(())
}
