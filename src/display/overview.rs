//! Overview printed before a pool section runs

use crate::backup::BackupContext;
use crate::config::{BackupMode, ImageSelection};

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

/// Format what a pool run is about to do
pub fn format_overview(ctx: &BackupContext<'_>, images: &ImageSelection, mode: BackupMode) -> String {
    let mut output = String::new();

    let title = format!("Backup of pool '{}'", ctx.pool);
    output.push_str(&title);
    output.push('\n');
    output.push_str(&"=".repeat(title.len()));
    output.push('\n');

    let images = match images {
        ImageSelection::All => "* (every image of the pool)".to_string(),
        ImageSelection::Named(names) => names.join(", "),
    };
    output.push_str(&format!("Images:      {}\n", images));
    output.push_str(&format!("Destination: {}\n", ctx.paths.dest_dir().display()));
    output.push_str(&format!("Mode:        {}\n", mode));
    if mode == BackupMode::Incremental {
        output.push_str(&format!("Window:      {}\n", ctx.window));
    }
    output.push_str(&format!("Compress:    {}\n", yes_no(ctx.compress)));
    output.push_str(&format!("Check mode:  {}\n", yes_no(ctx.check_mode)));

    output
}
