use indicatif::ProgressStyle;

/// Spinner style used while a repository is being cloned and archived.
/// - Yellow spinner with animated braille-style frames.
pub fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("\x1b[33m{spinner}\x1b[0m {wide_msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(&["⣾", "⣽", "⣻", "⢿", "⡿", "⣟", "⣯", "⣷"])
}

/// Byte progress for a single archive upload.
pub fn upload_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "\x1b[36m{spinner}\x1b[0m {msg:30!} [{bar:30}] {bytes}/{total_bytes} ({eta})",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("=> ")
}

/// Style used when an operation finishes successfully.
/// - Green check mark followed by the final message.
pub fn ok_style() -> ProgressStyle {
    ProgressStyle::with_template("\x1b[32m✔\x1b[0m {wide_msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

/// Style used when an operation fails with an error.
/// - Red cross followed by the error message.
pub fn err_style() -> ProgressStyle {
    ProgressStyle::with_template("\x1b[31m✘\x1b[0m {wide_msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}
