//! Editable markdown documents: the flat `.md` files at the notes directory root, viewable and editable
//! through the web UI, plus markdown rendering for pages that embed document content.

use {
    anyhow::{Context, Result},
    curator_shared::{sanitize_id, NoteDocument, NoteUpdate, NotesResponse, Notice},
    pulldown_cmark::{html, Parser},
    std::path::Path,
    tokio::fs,
    tracing::{info, warn},
};

pub fn render_markdown(markdown: &str) -> String {
    let mut buffer = String::new();

    html::push_html(&mut buffer, Parser::new(markdown));

    buffer
}

/// All `.md` entry names at the notes directory root, sorted.  This doubles as the whitelist for updates.
async fn list_documents(notes_dir: &str) -> Result<Vec<String>> {
    let mut filenames = Vec::new();

    let mut dir = fs::read_dir(notes_dir)
        .await
        .with_context(|| format!("unable to list {notes_dir}"))?;

    while let Some(entry) = dir.next_entry().await? {
        if let Ok(name) = entry.file_name().into_string() {
            if name.ends_with(".md") {
                filenames.push(name);
            }
        }
    }

    filenames.sort();

    Ok(filenames)
}

/// Handle a GET /notes request: every document with its content.  A document that cannot be read still
/// appears, carrying a placeholder body and the error flag, so the operator can see it exists.
pub async fn respond(notes_dir: &str, mut notices: Vec<Notice>) -> NotesResponse {
    let filenames = match list_documents(notes_dir).await {
        Ok(filenames) => filenames,

        Err(e) => {
            warn!("error finding notes documents: {e:?}");

            notices.push(Notice::error("Error finding notes documents."));

            Vec::new()
        }
    };

    let mut documents = Vec::new();

    for filename in filenames {
        let document = match fs::read_to_string(Path::new(notes_dir).join(&filename)).await {
            Ok(content) => NoteDocument {
                id: sanitize_id(&filename),
                filename,
                content,
                error: false,
            },

            Err(e) => {
                warn!("error reading {filename}: {e:?}");

                NoteDocument {
                    id: sanitize_id(&filename),
                    content: format!("# Error reading file: {e}"),
                    filename,
                    error: true,
                }
            }
        };

        documents.push(document);
    }

    NotesResponse { documents, notices }
}

/// Handle a POST /notes request: overwrite one document, accepting only filenames which currently appear
/// in the directory listing.  The outcome is always reported as a notice on the page the client is
/// redirected back to, never as an error status.
pub async fn update(notes_dir: &str, update: &NoteUpdate) -> Notice {
    let filenames = match list_documents(notes_dir).await {
        Ok(filenames) => filenames,

        Err(e) => {
            warn!("error finding notes documents: {e:?}");

            return Notice::error("Error finding notes documents.");
        }
    };

    if !filenames.contains(&update.filename) {
        warn!("attempt to update invalid or disallowed file: {}", update.filename);

        return Notice::error(format!(
            "Error: Invalid or disallowed filename: {}",
            update.filename
        ));
    }

    let content = update.content.replace('\0', "");

    match fs::write(Path::new(notes_dir).join(&update.filename), content).await {
        Ok(()) => {
            info!("updated {} via web interface", update.filename);

            Notice::success(format!("{} updated successfully.", update.filename))
        }

        Err(e) => {
            warn!("error writing {}: {e:?}", update.filename);

            Notice::error(format!("Error updating {}.", update.filename))
        }
    }
}

/// Render one markdown document for embedding in a page, with placeholder HTML when the file is missing
/// or unreadable.
pub async fn document_html(path: &str) -> String {
    match fs::read_to_string(path).await {
        Ok(content) => render_markdown(&content),

        Err(e) => {
            let name = Path::new(path)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.to_owned());

            if e.kind() == std::io::ErrorKind::NotFound {
                warn!("{name} not found");

                format!("<p><em>{name} not found.</em></p>")
            } else {
                warn!("error reading {name}: {e:?}");

                format!("<p><em>Error loading {name}.</em></p>")
            }
        }
    }
}
