//! Unified diff rendering for staged edits

use similar::{ChangeTag, TextDiff};

/// Render a unified diff between two versions of `path`.
///
/// `None` on either side means the file does not exist on that side, which
/// renders as `/dev/null` like git does for created and deleted files.
pub fn unified(path: &str, old: Option<&str>, new: Option<&str>) -> String {
    let old_content = old.unwrap_or("");
    let new_content = new.unwrap_or("");
    let diff = TextDiff::from_lines(old_content, new_content);

    let old_header = if old.is_some() {
        format!("a/{}", path)
    } else {
        "/dev/null".to_string()
    };
    let new_header = if new.is_some() {
        format!("b/{}", path)
    } else {
        "/dev/null".to_string()
    };
    let mut output = format!("--- {}\n+++ {}\n", old_header, new_header);

    for group in diff.grouped_ops(3) {
        let (old_start, old_count, new_start, new_count) = group.iter().fold(
            (usize::MAX, 0usize, usize::MAX, 0usize),
            |(os, oc, ns, nc), op| {
                let old_range = op.old_range();
                let new_range = op.new_range();
                (
                    os.min(old_range.start),
                    oc + old_range.len(),
                    ns.min(new_range.start),
                    nc + new_range.len(),
                )
            },
        );

        output.push_str(&format!(
            "@@ -{},{} +{},{} @@\n",
            hunk_start(old_start, old_count),
            old_count,
            hunk_start(new_start, new_count),
            new_count
        ));

        for op in &group {
            for change in diff.iter_changes(op) {
                let prefix = match change.tag() {
                    ChangeTag::Delete => '-',
                    ChangeTag::Insert => '+',
                    ChangeTag::Equal => ' ',
                };
                output.push(prefix);
                output.push_str(change.value());
                if !change.value().ends_with('\n') {
                    output.push_str("\n\\ No newline at end of file\n");
                }
            }
        }
    }

    output
}

/// Count of (added, removed) lines between two versions
pub fn line_stats(old: Option<&str>, new: Option<&str>) -> (usize, usize) {
    let diff = TextDiff::from_lines(old.unwrap_or(""), new.unwrap_or(""));
    diff.iter_all_changes()
        .fold((0, 0), |(added, removed), change| match change.tag() {
            ChangeTag::Insert => (added + 1, removed),
            ChangeTag::Delete => (added, removed + 1),
            ChangeTag::Equal => (added, removed),
        })
}

// Empty ranges start at the line before, per the unified format.
fn hunk_start(start: usize, count: usize) -> usize {
    if count == 0 {
        start
    } else {
        start + 1
    }
}
