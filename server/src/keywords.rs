//! Tag cloud support: count keyword occurrences across the whole index and log-scale the most frequent ones
//! to relative font sizes.

use {
    anyhow::Result,
    curator_shared::KeywordEntry,
    futures::TryStreamExt,
    sqlx::{Row, SqliteConnection},
    std::collections::HashMap,
    tracing::warn,
};

/// How many keywords the tag cloud shows
pub const DEFAULT_LIMIT: usize = 50;

/// Stream the keywords column row by row rather than loading the whole table, since a large archive may
/// have many thousands of records.
async fn count_keywords(conn: &mut SqliteConnection) -> Result<HashMap<String, u32>> {
    let mut rows =
        sqlx::query("SELECT keywords FROM files WHERE keywords IS NOT NULL AND keywords != ''")
            .fetch(&mut *conn);

    let mut counts = HashMap::new();

    while let Some(row) = rows.try_next().await? {
        let keywords: String = row.get(0);

        for keyword in keywords.split(',').map(str::trim).filter(|keyword| !keyword.is_empty()) {
            *counts.entry(keyword.to_owned()).or_insert(0_u32) += 1;
        }
    }

    Ok(counts)
}

/// Keep the `limit` most frequent keywords and attach a font scale in relative units, log-scaled so one
/// dominant keyword does not dwarf the rest of the cloud.  Ties are broken alphabetically.
fn scale(counts: HashMap<String, u32>, limit: usize) -> Vec<KeywordEntry> {
    let mut counted = counts.into_iter().collect::<Vec<_>>();

    counted.sort_by(|(text_a, count_a), (text_b, count_b)| {
        count_b.cmp(count_a).then_with(|| text_a.cmp(text_b))
    });
    counted.truncate(limit);

    if counted.is_empty() {
        return Vec::new();
    }

    let log_min = 1.0;

    let log_range = if counted.len() > 1 && counted[counted.len() - 1].1 > 0 {
        (f64::from(counted[0].1) + log_min).ln() - (f64::from(counted[counted.len() - 1].1) + log_min).ln()
    } else {
        1.0
    }
    .max(1.0);

    counted
        .into_iter()
        .map(|(text, weight)| {
            let font_scale = 1.0 + 3.0 * ((f64::from(weight) + log_min).ln() - log_min) / log_range;

            KeywordEntry {
                text,
                weight,
                font_scale,
            }
        })
        .collect()
}

/// The `limit` most frequent keywords with font scales, or an empty cloud if the query fails.
pub async fn top_keywords(conn: &mut SqliteConnection, limit: usize) -> Vec<KeywordEntry> {
    match count_keywords(conn).await {
        Ok(counts) => scale(counts, limit),

        Err(e) => {
            warn!("keyword count failed (returning empty tag cloud): {e:?}");

            Vec::new()
        }
    }
}

#[cfg(test)]
mod test {
    use {super::*, maplit::hashmap};

    #[test]
    fn scaling_is_monotone() {
        let entries = scale(
            hashmap![
                "rare".to_owned() => 1,
                "common".to_owned() => 10,
                "occasional".to_owned() => 5,
                "also-rare".to_owned() => 1,
            ],
            DEFAULT_LIMIT,
        );

        assert_eq!(
            vec!["common", "occasional", "also-rare", "rare"],
            entries.iter().map(|entry| entry.text.as_str()).collect::<Vec<_>>()
        );

        assert!(entries[0].font_scale > entries[1].font_scale);
        assert!(entries[1].font_scale > entries[2].font_scale);
        assert_eq!(entries[2].font_scale, entries[3].font_scale);
        assert_eq!(10, entries[0].weight);
    }

    #[test]
    fn equal_counts_scale_equally() {
        let entries = scale(
            hashmap![
                "one".to_owned() => 3,
                "two".to_owned() => 3,
                "three".to_owned() => 3,
            ],
            DEFAULT_LIMIT,
        );

        assert_eq!(3, entries.len());
        assert!(entries.iter().all(|entry| entry.font_scale == entries[0].font_scale));
    }

    #[test]
    fn limit_is_applied_after_sorting() {
        let entries = scale(
            hashmap![
                "first".to_owned() => 9,
                "second".to_owned() => 8,
                "third".to_owned() => 7,
            ],
            2,
        );

        assert_eq!(
            vec!["first", "second"],
            entries.iter().map(|entry| entry.text.as_str()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn empty_cloud() {
        assert!(scale(HashMap::new(), DEFAULT_LIMIT).is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn counting_splits_and_trims() -> anyhow::Result<()> {
        let mut conn = crate::create(":memory:").await?;

        for (path, keywords) in [
            ("/archive/a.pdf", Some("budget, travel")),
            ("/archive/b.pdf", Some("budget")),
            ("/archive/c.pdf", Some(" budget ,, event")),
            ("/archive/d.pdf", None),
        ] {
            sqlx::query("INSERT INTO files (path, filename, keywords) VALUES (?, ?, ?)")
                .bind(path)
                .bind(path.rsplit('/').next())
                .bind(keywords)
                .execute(&mut conn)
                .await?;
        }

        let entries = top_keywords(&mut conn, DEFAULT_LIMIT).await;

        assert_eq!(
            vec![("budget", 3), ("event", 1), ("travel", 1)],
            entries
                .iter()
                .map(|entry| (entry.text.as_str(), entry.weight))
                .collect::<Vec<_>>()
        );

        Ok(())
    }
}
