//! This module provides the [respond] function, which handles incoming GET and POST / requests, which search
//! the file index for records matching an open set of optional filters.
//!
//! Every active filter contributes one parameterized clause to a single SQL statement; with no active filter
//! the index is not consulted at all, since an unfiltered search of the whole table is never useful.

use {
    anyhow::Result,
    curator_shared::{FileHit, Notice, SearchRequest, SearchResponse},
    futures::TryStreamExt,
    sqlx::{query::Query, sqlite::SqliteArguments, Row, Sqlite, SqliteConnection},
    std::fmt::Write,
    tracing::warn,
};

/// The typed filters parsed out of a raw [SearchRequest]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Criteria {
    /// Filename substring, matched case-insensitively
    pub filename: Option<String>,

    /// Exact years to match, ORed together
    pub years: Vec<i64>,

    /// Exact file-type categories to match, ORed together
    pub types: Vec<String>,

    /// Keywords, each of which must appear in the keywords, summary, or filename field
    pub keywords: Vec<String>,
}

fn comma_list(value: Option<&str>) -> Vec<String> {
    value
        .map(|list| {
            list.split(',')
                .map(str::trim)
                .filter(|token| !token.is_empty())
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

impl Criteria {
    /// Parse raw request fields, splitting comma-separated lists and dropping year tokens which are not
    /// integers.
    pub fn parse(request: &SearchRequest) -> Self {
        let mut years = Vec::new();

        for token in comma_list(request.year.as_deref()) {
            if let Ok(year) = token.parse::<i64>() {
                years.push(year);
            } else {
                warn!("ignoring unparseable year value: {token:?}");
            }
        }

        Self {
            filename: request
                .filename
                .as_deref()
                .map(str::trim)
                .filter(|filename| !filename.is_empty())
                .map(str::to_owned),
            years,
            types: comma_list(request.file_type.as_deref()),
            keywords: comma_list(request.keywords.as_deref()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.filename.is_none() && self.years.is_empty() && self.types.is_empty() && self.keywords.is_empty()
    }
}

pub(crate) fn placeholders(count: usize) -> String {
    let mut buffer = String::new();

    for index in 0..count {
        if index > 0 {
            buffer.push_str(", ");
        }

        buffer.push('?');
    }

    buffer
}

/// Build an SQL query which retrieves metadata for all records matching the conjunction of the active
/// filters in `criteria`, appending the statement text to `buffer`.
fn build_search_query<'a>(
    buffer: &'a mut String,
    criteria: &'a Criteria,
) -> Query<'a, Sqlite, SqliteArguments<'a>> {
    buffer.push_str(
        "SELECT path, filename, category_type, category_year, summary, keywords FROM files WHERE 1=1",
    );

    if criteria.filename.is_some() {
        buffer.push_str(" AND filename LIKE ?");
    }

    if !criteria.years.is_empty() {
        write!(buffer, " AND category_year IN ({})", placeholders(criteria.years.len())).unwrap();
    }

    if !criteria.types.is_empty() {
        write!(buffer, " AND category_type IN ({})", placeholders(criteria.types.len())).unwrap();
    }

    for _ in &criteria.keywords {
        buffer.push_str(" AND (keywords LIKE ? OR summary LIKE ? OR filename LIKE ?)");
    }

    buffer.push_str(" ORDER BY last_modified DESC");

    let mut select = sqlx::query(buffer);

    if let Some(filename) = &criteria.filename {
        select = select.bind(format!("%{filename}%"));
    }

    for year in &criteria.years {
        select = select.bind(*year);
    }

    for file_type in &criteria.types {
        select = select.bind(file_type.as_str());
    }

    for keyword in &criteria.keywords {
        let pattern = format!("%{keyword}%");

        select = select.bind(pattern.clone()).bind(pattern.clone()).bind(pattern);
    }

    select
}

async fn fetch_hits(conn: &mut SqliteConnection, criteria: &Criteria) -> Result<Vec<FileHit>> {
    let mut buffer = String::new();
    let mut rows = build_search_query(&mut buffer, criteria).fetch(&mut *conn);
    let mut hits = Vec::new();

    while let Some(row) = rows.try_next().await? {
        hits.push(FileHit {
            path: row.get(0),
            filename: row.get(1),
            category_type: row.get(2),
            category_year: row.get(3),
            summary: row.get(4),
            keywords: row.get(5),
        });
    }

    Ok(hits)
}

/// Run a search, returning an empty result set without touching the database when no filter is active, and
/// degrading a failed query to an empty result set rather than an error page.
pub async fn search(conn: &mut SqliteConnection, criteria: &Criteria) -> Vec<FileHit> {
    if criteria.is_empty() {
        return Vec::new();
    }

    match fetch_hits(conn, criteria).await {
        Ok(hits) => hits,

        Err(e) => {
            warn!("search failed (returning no results): {e:?}");

            Vec::new()
        }
    }
}

/// Distinct non-empty file-type categories, for the search form's type dropdown.
pub async fn distinct_types(conn: &mut SqliteConnection) -> Result<Vec<String>> {
    let mut rows = sqlx::query(
        "SELECT DISTINCT category_type FROM files \
         WHERE category_type IS NOT NULL AND category_type != '' \
         ORDER BY category_type",
    )
    .fetch(&mut *conn);

    let mut types = Vec::new();

    while let Some(row) = rows.try_next().await? {
        types.push(row.get(0));
    }

    Ok(types)
}

/// Distinct years, newest first, for the search form's year dropdown.
pub async fn distinct_years(conn: &mut SqliteConnection) -> Result<Vec<i64>> {
    let mut rows = sqlx::query(
        "SELECT DISTINCT category_year FROM files \
         WHERE category_year IS NOT NULL \
         ORDER BY category_year DESC",
    )
    .fetch(&mut *conn);

    let mut years = Vec::new();

    while let Some(row) = rows.try_next().await? {
        years.push(row.get(0));
    }

    Ok(years)
}

/// Handle a GET or POST / request: run the search and assemble the full page data, including the dropdown
/// contents and the tag cloud.
pub async fn respond(
    conn: &mut SqliteConnection,
    request: SearchRequest,
    notices: Vec<Notice>,
) -> Result<SearchResponse> {
    let criteria = Criteria::parse(&request);

    let results = search(conn, &criteria).await;

    Ok(SearchResponse {
        results,
        distinct_types: distinct_types(conn).await?,
        distinct_years: distinct_years(conn).await?,
        keywords: crate::keywords::top_keywords(conn, crate::keywords::DEFAULT_LIMIT).await,
        search: request,
        notices,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    fn request(
        filename: Option<&str>,
        year: Option<&str>,
        file_type: Option<&str>,
        keywords: Option<&str>,
    ) -> SearchRequest {
        SearchRequest {
            filename: filename.map(str::to_owned),
            year: year.map(str::to_owned),
            file_type: file_type.map(str::to_owned),
            keywords: keywords.map(str::to_owned),
        }
    }

    #[test]
    fn criteria_parsing() {
        let criteria = Criteria::parse(&request(
            Some("report"),
            Some("2023, 2024"),
            Some("PDF Document,Image"),
            Some(" budget , , travel "),
        ));

        assert_eq!(Some("report".to_owned()), criteria.filename);
        assert_eq!(vec![2023, 2024], criteria.years);
        assert_eq!(vec!["PDF Document".to_owned(), "Image".to_owned()], criteria.types);
        assert_eq!(vec!["budget".to_owned(), "travel".to_owned()], criteria.keywords);

        assert!(Criteria::parse(&request(None, None, None, None)).is_empty());
        assert!(Criteria::parse(&request(Some("  "), Some(""), None, Some(" , ,"))).is_empty());
    }

    #[test]
    fn criteria_parsing_drops_bad_years() {
        let criteria = Criteria::parse(&request(None, Some("2023,two-thousand,2025"), None, None));

        assert_eq!(vec![2023, 2025], criteria.years);
        assert!(!criteria.is_empty());

        assert!(Criteria::parse(&request(None, Some("not-a-year"), None, None)).is_empty());
    }

    #[test]
    fn query_text() {
        let criteria = Criteria {
            filename: Some("report".to_owned()),
            years: vec![2023, 2024],
            types: vec!["PDF Document".to_owned()],
            keywords: vec!["budget".to_owned(), "travel".to_owned()],
        };

        let mut buffer = String::new();
        let _ = build_search_query(&mut buffer, &criteria);

        assert_eq!(
            "SELECT path, filename, category_type, category_year, summary, keywords FROM files WHERE 1=1 \
             AND filename LIKE ? \
             AND category_year IN (?, ?) \
             AND category_type IN (?) \
             AND (keywords LIKE ? OR summary LIKE ? OR filename LIKE ?) \
             AND (keywords LIKE ? OR summary LIKE ? OR filename LIKE ?) \
             ORDER BY last_modified DESC",
            buffer
        );
    }

    async fn fixture() -> Result<SqliteConnection> {
        let mut conn = crate::create(":memory:").await?;

        for (path, filename, file_type, year, summary, keywords, modified) in [
            (
                "/archive/2023/budget.pdf",
                "budget.pdf",
                "PDF Document",
                2023,
                "annual budget figures",
                "budget,finance",
                3.0,
            ),
            (
                "/archive/2024/plan.pdf",
                "plan.pdf",
                "PDF Document",
                2024,
                "travel plan with budget appendix",
                "travel",
                2.0,
            ),
            (
                "/archive/2024/photo.jpg",
                "photo.jpg",
                "Image",
                2024,
                "group photo with apples on the table",
                "event",
                1.0,
            ),
        ] {
            sqlx::query(
                "INSERT INTO files \
                 (path, filename, extension, size_bytes, last_modified, category_year, category_type, \
                  summary, keywords) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(path)
            .bind(filename)
            .bind(filename.rsplit('.').next())
            .bind(42_i64)
            .bind(modified)
            .bind(year)
            .bind(file_type)
            .bind(summary)
            .bind(keywords)
            .execute(&mut conn)
            .await?;
        }

        Ok(conn)
    }

    fn filenames(hits: &[FileHit]) -> Vec<&str> {
        hits.iter().map(|hit| hit.filename.as_str()).collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn filters_are_conjunctive() -> Result<()> {
        let mut conn = fixture().await?;

        // type alone matches both PDFs, newest modification first
        let criteria = Criteria {
            types: vec!["PDF Document".to_owned()],
            ..Criteria::default()
        };
        assert_eq!(vec!["budget.pdf", "plan.pdf"], filenames(&search(&mut conn, &criteria).await));

        // type and year together narrow to one
        let criteria = Criteria {
            types: vec!["PDF Document".to_owned()],
            years: vec![2024],
            ..Criteria::default()
        };
        assert_eq!(vec!["plan.pdf"], filenames(&search(&mut conn, &criteria).await));

        // year list ORs within the clause
        let criteria = Criteria {
            years: vec![2023, 2024],
            ..Criteria::default()
        };
        assert_eq!(3, search(&mut conn, &criteria).await.len());

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn keywords_match_any_field_but_all_must_match() -> Result<()> {
        let mut conn = fixture().await?;

        // "apple" appears only in a summary, as a substring of "apples"
        let criteria = Criteria {
            keywords: vec!["apple".to_owned()],
            ..Criteria::default()
        };
        assert_eq!(vec!["photo.jpg"], filenames(&search(&mut conn, &criteria).await));

        // both keywords must appear somewhere, not necessarily the same field
        let criteria = Criteria {
            keywords: vec!["budget".to_owned(), "travel".to_owned()],
            ..Criteria::default()
        };
        assert_eq!(vec!["plan.pdf"], filenames(&search(&mut conn, &criteria).await));

        // filename is searched too
        let criteria = Criteria {
            keywords: vec!["photo".to_owned()],
            ..Criteria::default()
        };
        assert_eq!(vec!["photo.jpg"], filenames(&search(&mut conn, &criteria).await));

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn filename_filter_is_case_insensitive() -> Result<()> {
        let mut conn = fixture().await?;

        let criteria = Criteria {
            filename: Some("BUDGET".to_owned()),
            ..Criteria::default()
        };

        assert_eq!(vec!["budget.pdf"], filenames(&search(&mut conn, &criteria).await));

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn empty_criteria_return_nothing() -> Result<()> {
        let mut conn = fixture().await?;

        assert!(search(&mut conn, &Criteria::default()).await.is_empty());

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn distinct_values() -> Result<()> {
        let mut conn = fixture().await?;

        assert_eq!(
            vec!["Image".to_owned(), "PDF Document".to_owned()],
            distinct_types(&mut conn).await?
        );
        assert_eq!(vec![2024, 2023], distinct_years(&mut conn).await?);

        Ok(())
    }
}
