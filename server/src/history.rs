//! Project-history view: merge the git commit log, the git tag list, and the backup-directory contents
//! into one response, reconstructing all of it on every request rather than persisting any of it.
//!
//! Each of the three sources degrades independently.  A missing or failing git binary empties the commit
//! and tag lists with an error notice, but the page still renders.

use {
    crate::{backup, notes, warp_util::HttpError},
    anyhow::{anyhow, Context, Result},
    curator_shared::{CommitEntry, HistoryResponse, Notice, TagEntry},
    lazy_static::lazy_static,
    regex::Regex,
    tokio::{fs, process::Command},
    tracing::warn,
};

/// ASCII unit separator, passed literally in git format arguments.  Unlike printable separators it cannot
/// collide with subject text.
const SEPARATOR: char = '\u{1f}';

/// How many commits the history view covers
pub const COMMIT_LIMIT: u32 = 100;

pub fn valid_commit_hash(hash: &str) -> bool {
    lazy_static! {
        static ref HASH_PATTERN: Regex = Regex::new("^[0-9a-f]{7,40}$").unwrap();
    }

    HASH_PATTERN.is_match(hash)
}

/// Extract "X.Y.Z" from a version-shaped tag name such as "v1.2.3" or "1.2.3".
fn parse_version(tag_name: &str) -> Option<String> {
    lazy_static! {
        static ref VERSION_PATTERN: Regex = Regex::new(r"^v?(\d+\.\d+\.\d+)$").unwrap();
    }

    VERSION_PATTERN
        .captures(tag_name)
        .map(|captures| captures[1].to_owned())
}

/// Extract tag names from a `%d` ref-decorations field, e.g. ` (HEAD -> main, tag: v1.2.0, origin/main)`.
fn parse_decorations(decorations: &str) -> Vec<String> {
    decorations
        .trim()
        .trim_matches(|c| c == '(' || c == ')')
        .split(',')
        .filter_map(|part| part.trim().strip_prefix("tag: "))
        .map(|tag| tag.trim().to_owned())
        .collect()
}

/// Parse one `git log` line into a [CommitEntry], leaving the backup flags and release notes for the
/// caller to fill in.  Lines with the wrong field count are logged and skipped.
fn parse_commit_line(line: &str) -> Option<CommitEntry> {
    let fields = line.trim().splitn(6, SEPARATOR).collect::<Vec<_>>();

    if fields.len() != 6 {
        warn!(
            "could not parse git log line {line:?}: expected 6 fields, got {}",
            fields.len()
        );

        return None;
    }

    let tags = parse_decorations(fields[5]);
    let version = tags.iter().find_map(|tag| parse_version(tag));

    Some(CommitEntry {
        hash: fields[0].to_owned(),
        full_hash: fields[1].to_owned(),
        date: fields[2].to_owned(),
        subject: fields[3].to_owned(),
        author: fields[4].to_owned(),
        tags,
        version,
        has_db_backup: false,
        has_code_backup: false,
        release_notes: None,
    })
}

/// Parse one `git tag` line into a [TagEntry], truncating the creator date to its date part.
fn parse_tag_line(line: &str) -> Option<TagEntry> {
    let fields = line.trim().splitn(4, SEPARATOR).collect::<Vec<_>>();

    if fields.len() != 4 {
        warn!(
            "could not parse git tag line {line:?}: expected 4 fields, got {}",
            fields.len()
        );

        return None;
    }

    Some(TagEntry {
        name: fields[0].to_owned(),
        hash: fields[1].to_owned(),
        date: fields[2].split(&['T', ' '][..]).next().unwrap_or("").to_owned(),
        subject: fields[3].to_owned(),
        release_notes: None,
    })
}

/// The changelog section for one version: everything under the first `##` heading containing
/// `[<version>]` or `[v<version>]` (case-insensitively), up to the next `## ` heading.  Deeper headings
/// stay inside the section.
fn changelog_section(changelog: &str, version: &str) -> Option<String> {
    let needles = [
        format!("[{version}]").to_lowercase(),
        format!("[v{version}]").to_lowercase(),
    ];

    let mut lines = changelog.lines();

    while let Some(line) = lines.next() {
        if line.starts_with("##") {
            let lower = line.to_lowercase();

            if needles.iter().any(|needle| lower.contains(needle)) {
                let mut section = Vec::new();

                for line in lines.by_ref() {
                    if line.trim_start().starts_with("## ") {
                        break;
                    }

                    section.push(line);
                }

                let section = section.join("\n").trim().to_owned();

                return if section.is_empty() { None } else { Some(section) };
            }
        }
    }

    None
}

fn release_notes(changelog: &str, version: &str) -> Option<String> {
    changelog_section(changelog, version).map(|section| {
        format!(
            "<div class=\"changelog-notes\">{}</div>",
            notes::render_markdown(&section)
        )
    })
}

/// Run git in the repository directory, returning stdout's non-empty lines.
async fn git_lines(repo_dir: &str, args: &[&str]) -> Result<Vec<String>> {
    let output = Command::new("git")
        .current_dir(repo_dir)
        .args(args)
        .output()
        .await
        .context("unable to run git")?;

    if output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);

        Ok(stdout
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(str::to_owned)
            .collect())
    } else {
        Err(anyhow!(
            "error running git: {}",
            String::from_utf8_lossy(&output.stderr)
        ))
    }
}

/// The most recent commits, enriched with backup-artifact flags and, for version commits, rendered
/// release notes from the changelog.
pub async fn commits(
    repo_dir: &str,
    backup_dir: &str,
    changelog_path: &str,
    limit: u32,
) -> Result<Vec<CommitEntry>> {
    let format = format!(
        "--pretty=format:%h{SEPARATOR}%H{SEPARATOR}%ad{SEPARATOR}%s{SEPARATOR}%an{SEPARATOR}%d"
    );

    let lines = git_lines(
        repo_dir,
        &[
            "log",
            &format!("--max-count={limit}"),
            "--date=format:%Y-%m-%d %H:%M:%S",
            &format,
        ],
    )
    .await?;

    let names = backup::list_artifact_names(backup_dir).await;
    let changelog = fs::read_to_string(changelog_path).await.ok();

    Ok(lines
        .iter()
        .filter_map(|line| parse_commit_line(line))
        .map(|mut commit| {
            let (has_db_backup, has_code_backup) = backup::artifact_flags(&names, &commit.hash);

            commit.has_db_backup = has_db_backup;
            commit.has_code_backup = has_code_backup;
            commit.release_notes = commit.version.as_deref().and_then(|version| {
                changelog
                    .as_deref()
                    .and_then(|changelog| release_notes(changelog, version))
            });

            commit
        })
        .collect())
}

/// Version tags (names matching `v*`), newest first, with release notes where the name parses as a
/// version.
pub async fn tags(repo_dir: &str, changelog_path: &str) -> Result<Vec<TagEntry>> {
    let format = format!(
        "--format=%(refname:short){SEPARATOR}%(objectname:short){SEPARATOR}\
         %(creatordate:iso8601){SEPARATOR}%(contents:subject)"
    );

    let lines = git_lines(repo_dir, &["tag", "-l", "v*", &format, "--sort=-creatordate"]).await?;

    let changelog = fs::read_to_string(changelog_path).await.ok();

    Ok(lines
        .iter()
        .filter_map(|line| parse_tag_line(line))
        .map(|mut tag| {
            tag.release_notes = parse_version(&tag.name).and_then(|version| {
                changelog
                    .as_deref()
                    .and_then(|changelog| release_notes(changelog, &version))
            });

            tag
        })
        .collect())
}

/// The full commit message for one commit, served as the change-notes download.  An unknown hash is
/// reported as missing; an unrunnable git binary is a server error.
pub async fn change_notes(repo_dir: &str, hash: &str) -> Result<String> {
    if !valid_commit_hash(hash) {
        return Err(HttpError::bad_request("invalid commit hash").into());
    }

    let output = Command::new("git")
        .current_dir(repo_dir)
        .args(["log", "-n", "1", "--pretty=format:%B", hash])
        .output()
        .await
        .context("unable to run git")?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        warn!(
            "git log failed for {hash}: {}",
            String::from_utf8_lossy(&output.stderr)
        );

        Err(HttpError::not_found("commit not found").into())
    }
}

/// Handle a GET /history request.  Commits, tags, manual backups, and workflow notes are each retrieved
/// independently, so one broken source degrades to an empty list and a notice rather than failing the
/// page.
pub async fn respond(
    repo_dir: &str,
    backup_dir: &str,
    changelog_path: &str,
    workflow_notes_path: &str,
    mut notices: Vec<Notice>,
) -> HistoryResponse {
    let commits = match commits(repo_dir, backup_dir, changelog_path, COMMIT_LIMIT).await {
        Ok(commits) => commits,

        Err(e) => {
            warn!("unable to retrieve commit history: {e:?}");

            notices.push(Notice::error("Error retrieving commit history."));

            Vec::new()
        }
    };

    let tags = match tags(repo_dir, changelog_path).await {
        Ok(tags) => tags,

        Err(e) => {
            warn!("unable to retrieve version tags: {e:?}");

            notices.push(Notice::error("Error retrieving version tag history."));

            Vec::new()
        }
    };

    let manual_backups = match backup::list_manual(backup_dir).await {
        Ok(backups) => backups,

        Err(e) => {
            warn!("unable to list manual backups: {e:?}");

            notices.push(Notice::error("Error retrieving manual backups."));

            Vec::new()
        }
    };

    HistoryResponse {
        commits,
        tags,
        manual_backups,
        workflow_notes: notes::document_html(workflow_notes_path).await,
        notices,
    }
}
