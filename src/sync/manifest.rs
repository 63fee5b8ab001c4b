//! Manifest builder.
//!
//! Derives a Markdown summary of every application directory in the store:
//! display name, last remote change, and a link to its newest snapshot.
//! The manifest is never authoritative; it is rebuilt wholesale from a
//! fresh listing each cycle.

use chrono::{DateTime, FixedOffset, Utc};

use crate::store::{RemoteStore, StoreError, INFRA_DIR};

/// Well-known manifest location at the store root.
pub const MANIFEST_PATH: &str = "README.md";

/// Civil zone manifest timestamps are rendered in.
const UTC_OFFSET_HOURS: i32 = 8;

struct Row {
    index: usize,
    app: String,
    changed: DateTime<Utc>,
    snapshot: String,
    link: String,
}

/// Build the manifest document from the store's current state.
///
/// Returns `None` when no application directory produced a row, in which
/// case any existing manifest is left untouched this cycle.
pub async fn build<S: RemoteStore + ?Sized>(
    store: &S,
    title: &str,
    generated_at: DateTime<Utc>,
) -> Result<Option<String>, StoreError> {
    let top = match store.list_dir("").await {
        Ok(entries) => entries,
        Err(e) if e.is_not_found() => return Ok(None),
        Err(e) => return Err(e),
    };

    let mut rows: Vec<Row> = Vec::new();
    for dir in top.iter().filter(|e| !e.is_file() && e.name != INFRA_DIR) {
        let changed = store.last_change(&dir.path).await?;
        let snapshots = match store.list_dir(&dir.path).await {
            Ok(entries) => entries,
            Err(e) if e.is_not_found() => continue,
            Err(e) => return Err(e),
        };
        // Timestamp-encoded names make the listing's last file the newest.
        let Some(latest) = snapshots.iter().filter(|s| s.is_file()).last() else {
            continue;
        };
        rows.push(Row {
            index: rows.len() + 1,
            app: dir.name.clone(),
            changed,
            snapshot: latest.name.clone(),
            link: latest
                .download_ref
                .clone()
                .unwrap_or_else(|| latest.path.clone()),
        });
    }

    if rows.is_empty() {
        return Ok(None);
    }
    Ok(Some(render(title, generated_at, &rows)))
}

fn civil(ts: DateTime<Utc>) -> String {
    let offset =
        FixedOffset::east_opt(UTC_OFFSET_HOURS * 3600).expect("static offset is valid");
    ts.with_timezone(&offset).format("%Y-%m-%d %H:%M:%S").to_string()
}

fn render(title: &str, generated_at: DateTime<Utc>, rows: &[Row]) -> String {
    let mut doc = String::new();
    doc.push_str(&format!("# {title}\n\n"));
    doc.push_str(&format!("**Last updated: {}**\n\n", civil(generated_at)));
    doc.push_str("## Applications\n\n");
    doc.push_str("| # | Application | Last change | Latest snapshot |\n");
    doc.push_str("| --- | --- | --- | --- |\n");
    for row in rows {
        doc.push_str(&format!(
            "| {} | {} | {} | [{}]({}) |\n",
            row.index,
            row.app,
            civil(row.changed),
            row.snapshot,
            row.link
        ));
    }
    doc
}
