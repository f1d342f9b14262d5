use redrive::QueueSummary;

const HEADERS: [&str; 4] = ["SOURCE", "DESTINATION", "MESSAGES", "URL"];

/// Renders queue summaries as a left-aligned table, one row per queue.
pub fn render(summaries: &[QueueSummary]) -> String {
    let rows: Vec<[String; 4]> = summaries
        .iter()
        .map(|s| {
            [
                s.source.clone(),
                s.destination.clone(),
                s.approximate_messages().to_string(),
                s.url.clone(),
            ]
        })
        .collect();

    let mut widths = HEADERS.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    let mut out = String::new();
    push_row(&mut out, &HEADERS.map(str::to_string), &widths);
    for row in &rows {
        push_row(&mut out, row, &widths);
    }
    out
}

fn push_row(out: &mut String, cells: &[String; 4], widths: &[usize; 4]) {
    let line = cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| format!("{cell:<width$}"))
        .collect::<Vec<_>>()
        .join("  ");
    out.push_str(line.trim_end());
    out.push('\n');
}
