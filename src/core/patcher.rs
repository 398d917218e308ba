//! Rewrites the value token of `undervolt <index> ... <value>` lines in an
//! intel-undervolt configuration file. Every other line is copied verbatim.

use std::fs;
use std::io::Write;
use std::path::Path;

use log::debug;
use tempfile::NamedTempFile;

use super::offsets::{Component, Offsets};
use crate::error::PatchError;

const UNDERVOLT_KEYWORD: &str = "undervolt";

/// Returns the patched text of `input`.
///
/// Lines are matched on their first token only, so the result of patching an
/// already patched file with the same offsets is identical to the input.
pub fn patch(input: &str, offsets: &Offsets) -> Result<String, PatchError> {
    let mut out = String::with_capacity(input.len());
    let mut replaced = 0;

    for (number, line) in input.split_inclusive('\n').enumerate() {
        let number = number + 1;

        if line.starts_with('#') || line.trim().is_empty() {
            out.push_str(line);
            continue;
        }

        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens[0] != UNDERVOLT_KEYWORD {
            out.push_str(line);
            continue;
        }

        if tokens.len() < 3 {
            return Err(PatchError::Malformed { line: number });
        }

        let component = tokens[1]
            .parse::<u8>()
            .ok()
            .and_then(Component::from_index)
            .ok_or_else(|| PatchError::UnknownComponent {
                line: number,
                index: tokens[1].to_string(),
            })?;

        let kept = &tokens[..tokens.len() - 1];
        out.push_str(&kept.join(" "));
        out.push(' ');
        out.push_str(&offsets.get(component).to_string());
        out.push('\n');
        replaced += 1;
    }

    debug!("Patched {} undervolt declarations", replaced);
    Ok(out)
}

/// Patches the file at `source` and writes the result to a new temp file in
/// `staging_dir`. The source file is never modified.
pub fn patch_to_staging(
    source: &Path,
    offsets: &Offsets,
    staging_dir: &Path,
) -> Result<NamedTempFile, PatchError> {
    let input = fs::read_to_string(source)?;
    stage(&input, offsets, staging_dir)
}

/// Same as [`patch_to_staging`] for text that has already been read.
pub fn stage(input: &str, offsets: &Offsets, staging_dir: &Path) -> Result<NamedTempFile, PatchError> {
    let patched = patch(input, offsets)?;

    let mut staged = tempfile::Builder::new()
        .prefix("undervolt-")
        .suffix(".conf")
        .tempfile_in(staging_dir)?;
    staged.write_all(patched.as_bytes())?;
    staged.as_file().sync_all()?;

    debug!("Staged patched undervolt file at {}", staged.path().display());
    Ok(staged)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# intel-undervolt configuration
enable yes

# CPU undervolting
undervolt 0 'CPU' -50
undervolt 1 'GPU' -50
undervolt 2 'CPU Cache' -50
undervolt 3 'System Agent' 0
undervolt 4 'Analog I/O' 0

interval 5000
";

    fn profile() -> Offsets {
        Offsets {
            cpu: -40,
            gpu: -35,
            cpu_cache: -40,
            sys_agent: -20,
            analog_io: -15,
        }
    }

    #[test]
    fn test_patch_example_line() {
        let input = "# comment\nundervolt 0 'CORE' -50\n\n";
        let offsets = Offsets {
            cpu: -30,
            ..Offsets::default()
        };
        assert_eq!(
            patch(input, &offsets).unwrap(),
            "# comment\nundervolt 0 'CORE' -30\n\n"
        );
    }

    #[test]
    fn test_patch_rewrites_only_values() {
        let output = patch(SAMPLE, &profile()).unwrap();
        let lines: Vec<&str> = output.lines().collect();

        assert_eq!(lines.len(), SAMPLE.lines().count());
        assert_eq!(lines[4], "undervolt 0 'CPU' -40");
        assert_eq!(lines[5], "undervolt 1 'GPU' -35");
        assert_eq!(lines[6], "undervolt 2 'CPU Cache' -40");
        assert_eq!(lines[7], "undervolt 3 'System Agent' -20");
        assert_eq!(lines[8], "undervolt 4 'Analog I/O' -15");

        for (before, after) in SAMPLE.lines().zip(output.lines()) {
            if !before.starts_with("undervolt") {
                assert_eq!(before, after);
            }
        }
    }

    #[test]
    fn test_patch_is_idempotent() {
        let once = patch(SAMPLE, &profile()).unwrap();
        let twice = patch(&once, &profile()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_patch_normalises_spacing_of_declarations_only() {
        let input = "undervolt   0\t'CPU'   -10\napply   now\n";
        let output = patch(input, &profile()).unwrap();
        assert_eq!(output, "undervolt 0 'CPU' -40\napply   now\n");
    }

    #[test]
    fn test_patch_keeps_missing_final_newline_on_other_lines() {
        let output = patch("undervolt 1 'GPU' 0\n# end", &profile()).unwrap();
        assert_eq!(output, "undervolt 1 'GPU' -35\n# end");
    }

    #[test]
    fn test_patch_unknown_component() {
        let input = "# header\nundervolt 7 'Mystery' -10\n";
        match patch(input, &profile()) {
            Err(PatchError::UnknownComponent { line, index }) => {
                assert_eq!(line, 2);
                assert_eq!(index, "7");
            }
            other => panic!("unexpected result: {:?}", other),
        }

        assert!(matches!(
            patch("undervolt x 'CPU' 0\n", &profile()),
            Err(PatchError::UnknownComponent { .. })
        ));
    }

    #[test]
    fn test_patch_malformed_declaration() {
        assert!(matches!(
            patch("undervolt 0\n", &profile()),
            Err(PatchError::Malformed { line: 1 })
        ));
    }

    #[test]
    fn test_stage_writes_new_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let source = dir.path().join("intel-undervolt.conf");
        fs::write(&source, SAMPLE).unwrap();

        let staged = patch_to_staging(&source, &profile(), dir.path()).unwrap();
        assert_ne!(staged.path(), source.as_path());
        assert_eq!(fs::read_to_string(&source).unwrap(), SAMPLE);
        assert!(fs::read_to_string(staged.path())
            .unwrap()
            .contains("undervolt 3 'System Agent' -20"));
    }
}
