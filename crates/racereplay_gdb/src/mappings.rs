//! Parsing of `info proc mappings`.

use racereplay_core::Address;
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

/// One mapped region
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mapping {
    /// First mapped address
    pub start: Address,
    /// One past the last mapped address
    pub end: Address,
    /// File offset of `start`
    pub offset: u64,
    /// Backing object, empty for anonymous regions
    pub objfile: String,
}

fn mapping_line() -> &'static Regex {
    static LINE: OnceLock<Regex> = OnceLock::new();
    LINE.get_or_init(|| {
        // Newer gdb prints a permissions column before the objfile.
        Regex::new(
            r"^\s*0x([0-9a-fA-F]+)\s+0x([0-9a-fA-F]+)\s+0x[0-9a-fA-F]+\s+0x([0-9a-fA-F]+)(?:\s+[rwxsp-]{4})?(?:\s+(.*?))?\s*$",
        )
        .unwrap_or_else(|e| panic!("mapping regex: {}", e))
    })
}

/// Parse every mapping row, skipping headers and prose
#[must_use]
pub fn parse(text: &str) -> Vec<Mapping> {
    text.lines()
        .filter_map(|line| {
            let caps = mapping_line().captures(line)?;
            let hex = |i: usize| u64::from_str_radix(caps.get(i)?.as_str(), 16).ok();
            Some(Mapping {
                start: Address::from_raw(hex(1)?),
                end: Address::from_raw(hex(2)?),
                offset: hex(3)?,
                objfile: caps
                    .get(4)
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_default(),
            })
        })
        .collect()
}

/// Lowest address mapped from `executable`
///
/// The objfile column holds absolute paths, so `executable` is compared after
/// canonicalisation, falling back to the file name when that fails.
#[must_use]
pub fn module_base(text: &str, executable: &Path) -> Option<Address> {
    let canonical = std::fs::canonicalize(executable).ok();
    let file_name = executable.file_name()?;

    parse(text)
        .into_iter()
        .filter(|m| {
            let objfile = Path::new(&m.objfile);
            match &canonical {
                Some(c) => objfile == c.as_path(),
                None => objfile.file_name() == Some(file_name),
            }
        })
        .map(|m| m.start)
        .min()
}

#[cfg(test)]
mod tests {
    use super::*;

    const WITH_PERMS: &str = "process 4242
Mapped address spaces:

          Start Addr           End Addr       Size     Offset  Perms  objfile
      0x555555554000     0x555555555000     0x1000        0x0  r--p   /opt/bench/app
      0x555555555000     0x555555556000     0x1000     0x1000  r-xp   /opt/bench/app
      0x555555559000     0x55555557a000    0x21000        0x0  rw-p   [heap]
      0x7ffff7d80000     0x7ffff7da8000    0x28000        0x0  r--p   /usr/lib/libc.so.6
      0x7ffff7fbd000     0x7ffff7fc1000     0x4000        0x0  rw-p
";

    const WITHOUT_PERMS: &str = "process 77
Mapped address spaces:

          Start Addr           End Addr       Size     Offset objfile
            0x400000           0x401000     0x1000        0x0 /opt/bench/static
            0x600000           0x601000     0x1000        0x0 /opt/bench/static
";

    #[test]
    fn test_parse_rows() {
        let rows = parse(WITH_PERMS);
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[0].start, Address::from_raw(0x5555_5555_4000));
        assert_eq!(rows[1].offset, 0x1000);
        assert_eq!(rows[2].objfile, "[heap]");
        assert_eq!(rows[4].objfile, "");
    }

    #[test]
    fn test_parse_without_perms_column() {
        let rows = parse(WITHOUT_PERMS);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].start, Address::from_raw(0x60_0000));
        assert_eq!(rows[1].objfile, "/opt/bench/static");
    }

    #[test]
    fn test_base_by_file_name() {
        // Paths that do not exist locally fall back to file-name matching.
        let base = module_base(WITH_PERMS, Path::new("./app"));
        assert_eq!(base, Some(Address::from_raw(0x5555_5555_4000)));

        let base = module_base(WITHOUT_PERMS, Path::new("static"));
        assert_eq!(base, Some(Address::from_raw(0x40_0000)));
    }

    #[test]
    fn test_base_missing() {
        assert_eq!(module_base(WITH_PERMS, Path::new("other")), None);
        assert_eq!(module_base("No current process", Path::new("app")), None);
    }

    #[test]
    fn test_base_by_canonical_path() {
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("target.bin");
        std::fs::write(&exe, b"").unwrap();
        let canonical = std::fs::canonicalize(&exe).unwrap();

        let text = format!(
            "      0x1000     0x2000     0x1000        0x0  r--p   {}\n\
             \x20     0x3000     0x4000     0x1000        0x0  r--p   /elsewhere/target.bin\n",
            canonical.display()
        );
        assert_eq!(module_base(&text, &exe), Some(Address::from_raw(0x1000)));
    }
}
