//! Per-image outcome tables

use crate::backup::{Action, ImageOutcome};

/// Format the outcome of every image of a pool run as a table
pub fn format_summary(outcomes: &[ImageOutcome]) -> String {
    if outcomes.is_empty() {
        return "No images processed.".to_string();
    }

    let image_width = outcomes
        .iter()
        .map(|o| o.image.len())
        .max()
        .unwrap_or(5)
        .max(5);

    let mut output = String::new();
    output.push_str(&format!(
        "{:<image_width$}  {:<6}  {:>7}  {}\n",
        "Image",
        "Result",
        "Actions",
        "Detail",
        image_width = image_width,
    ));
    output.push_str(&format!(
        "{:-<image_width$}  {:-<6}  {:->7}  {:-<20}\n",
        "",
        "",
        "",
        "",
        image_width = image_width,
    ));

    for outcome in outcomes {
        let (result, actions, detail) = match &outcome.result {
            Ok(report) => {
                let detail = if report.check_mode {
                    format!("{} (check mode)", report.state)
                } else {
                    report.state.to_string()
                };
                ("ok", report.actions.len().to_string(), detail)
            }
            Err(e) => ("FAILED", "-".to_string(), e.to_string()),
        };
        output.push_str(&format!(
            "{:<image_width$}  {:<6}  {:>7}  {}\n",
            outcome.image,
            result,
            actions,
            detail,
            image_width = image_width,
        ));
    }

    let failed = outcomes.iter().filter(|o| !o.is_success()).count();
    output.push_str(&format!(
        "\n{} image(s), {} failed\n",
        outcomes.len(),
        failed
    ));

    output
}

/// Format a numbered list of actions
pub fn format_actions(actions: &[Action]) -> String {
    if actions.is_empty() {
        return "Nothing to do.".to_string();
    }

    actions
        .iter()
        .enumerate()
        .map(|(i, action)| format!("  {}. {}\n", i + 1, action))
        .collect()
}
