//! Numbered file sequences such as `readings-0000.tsv`, `readings-0001.tsv`.

use alloc::{format, string::String};

use crate::fs::{FileSystem, FsError, join, sorted_files};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SeqPattern {
    pub prefix: &'static str,
    pub suffix: &'static str,
}

impl SeqPattern {
    pub const fn new(prefix: &'static str, suffix: &'static str) -> Self {
        Self { prefix, suffix }
    }

    pub fn extract_sequence_number(&self, name: &str) -> Option<u32> {
        let digits = name.strip_prefix(self.prefix)?.strip_suffix(self.suffix)?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok()
    }

    pub fn make_sequence_filename(&self, index: u32) -> String {
        format!("{}{:04}{}", self.prefix, index, self.suffix)
    }

    /// Lexicographically last name that belongs to the sequence.
    pub fn last_file_in_sequence<'a, I>(&self, names: I) -> Option<&'a str>
    where
        I: IntoIterator<Item = &'a String>,
    {
        names
            .into_iter()
            .map(String::as_str)
            .filter(|name| self.extract_sequence_number(name).is_some())
            .max()
    }
}

/// Path of the file new data should be appended to.
///
/// Keeps using the latest file of the sequence while it is below
/// `size_limit`, otherwise starts the next one. Creates `dir` when needed.
pub fn choose_append_file<F: FileSystem + ?Sized>(
    fs: &mut F,
    dir: &str,
    pattern: SeqPattern,
    size_limit: u32,
) -> Result<String, FsError> {
    fs.create_dir_all(dir)?;
    let names = sorted_files(fs, dir)?;

    let Some(last) = pattern.last_file_in_sequence(&names) else {
        return Ok(join(dir, &pattern.make_sequence_filename(0)));
    };

    let last_path = join(dir, last);
    if fs.file_size(&last_path)? < size_limit {
        return Ok(last_path);
    }

    let next = pattern
        .extract_sequence_number(last)
        .map_or(0, |n| n.saturating_add(1));
    Ok(join(dir, &pattern.make_sequence_filename(next)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemoryFs;

    const READINGS: SeqPattern = SeqPattern::new("readings-", ".tsv");

    #[test]
    fn sequence_numbers_are_parsed_strictly() {
        assert_eq!(READINGS.extract_sequence_number("readings-0042.tsv"), Some(42));
        assert_eq!(READINGS.extract_sequence_number("readings-.tsv"), None);
        assert_eq!(READINGS.extract_sequence_number("readings-12a.tsv"), None);
        assert_eq!(READINGS.extract_sequence_number("errors-0001.txt"), None);
        assert_eq!(READINGS.make_sequence_filename(7), "readings-0007.tsv");
    }

    #[test]
    fn last_file_ignores_foreign_names() {
        let names = [
            String::from("readings-0001.tsv"),
            String::from("zzz.txt"),
            String::from("readings-0000.tsv"),
        ];
        assert_eq!(READINGS.last_file_in_sequence(&names), Some("readings-0001.tsv"));
    }

    #[test]
    fn append_target_rolls_over_at_size_limit() {
        let mut fs = MemoryFs::new();
        assert_eq!(
            choose_append_file(&mut fs, "data", READINGS, 10).unwrap(),
            "data/readings-0000.tsv"
        );

        fs.put("data/readings-0000.tsv", b"12345");
        assert_eq!(
            choose_append_file(&mut fs, "data", READINGS, 10).unwrap(),
            "data/readings-0000.tsv"
        );

        fs.put("data/readings-0000.tsv", b"1234567890");
        assert_eq!(
            choose_append_file(&mut fs, "data", READINGS, 10).unwrap(),
            "data/readings-0001.tsv"
        );
    }
}
