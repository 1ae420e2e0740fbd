// Target host list parsing

use std::path::Path;

use crate::output::errors::PanelError;

/// Parse the host field into an ordered host list.
///
/// If the field names an existing file, the file is read one host per line.
/// Otherwise the field itself is the list, separated by commas or newlines.
/// Blank entries and `#` comments are skipped either way.
pub fn parse_hosts(input: &str) -> Result<Vec<String>, PanelError> {
    let trimmed = input.trim();
    let path = Path::new(trimmed);

    if !trimmed.is_empty() && path.is_file() {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PanelError::resource(
                format!("Couldn't read host list file: {}", e),
                Some(path.to_path_buf()),
            )
        })?;
        return Ok(clean_lines(content.lines()));
    }

    Ok(clean_lines(trimmed.split([',', '\n'])))
}

fn clean_lines<'a>(lines: impl Iterator<Item = &'a str>) -> Vec<String> {
    lines
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}
