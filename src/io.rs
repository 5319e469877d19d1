//! Reading and writing of configuration files.

#[cfg(feature = "serde")]
use anyhow::{Context, Result};
use std::{
    fs::{self, File},
    io::{self, Write},
    path::Path,
};

/// Creates the file at the given path along with any missing parent
/// directories.
pub fn create_file_and_required_directories(file_path: impl AsRef<Path>) -> io::Result<File> {
    let file_path = file_path.as_ref();
    if let Some(parent) = file_path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    File::create(file_path)
}

/// Writes the given text to the specified path, replacing any existing file.
pub fn write_text_file(text: &str, output_file_path: impl AsRef<Path>) -> io::Result<()> {
    let mut file = create_file_and_required_directories(output_file_path)?;
    file.write_all(text.as_bytes())
}

/// Reads the RON file at the given path and deserializes its contents into
/// a value of type `T`.
///
/// # Errors
/// Returns an error if the file can not be read or does not hold a valid
/// RON representation of `T`.
#[cfg(feature = "serde")]
pub fn parse_ron_file<T>(file_path: impl AsRef<Path>) -> Result<T>
where
    T: for<'de> serde::Deserialize<'de>,
{
    let file_path = file_path.as_ref();

    let text = fs::read_to_string(file_path)
        .with_context(|| format!("Could not open {}", file_path.display()))?;

    ron::from_str(&text).with_context(|| format!("Invalid syntax in {}", file_path.display()))
}

/// Serializes the given value to pretty-printed RON and writes it to the
/// given path.
#[cfg(feature = "serde")]
pub fn write_ron_file<T>(value: &T, output_file_path: impl AsRef<Path>) -> Result<()>
where
    T: serde::Serialize,
{
    let output_file_path = output_file_path.as_ref();
    let text = ron::ser::to_string_pretty(value, ron::ser::PrettyConfig::default())?;
    write_text_file(&text, output_file_path)
        .with_context(|| format!("Could not write {}", output_file_path.display()))
}

#[cfg(all(test, feature = "serde"))]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn scratch_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir()
            .join(format!("scene_core_io_{}", std::process::id()))
            .join(name)
    }

    #[test]
    fn written_ron_file_parses_back() {
        let path = scratch_path("nested/values.ron");
        let values: BTreeMap<String, u32> = [("a".to_string(), 1), ("b".to_string(), 2)].into();

        write_ron_file(&values, &path).unwrap();
        let parsed: BTreeMap<String, u32> = parse_ron_file(&path).unwrap();
        assert_eq!(parsed, values);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn missing_file_error_names_path() {
        let path = scratch_path("does_not_exist.ron");
        let error = parse_ron_file::<u32>(&path).unwrap_err();
        assert!(format!("{}", error).contains("does_not_exist.ron"));
    }

    #[test]
    fn invalid_syntax_is_reported() {
        let path = scratch_path("invalid.ron");
        write_text_file("(unclosed", &path).unwrap();
        let error = parse_ron_file::<BTreeMap<String, u32>>(&path).unwrap_err();
        assert!(format!("{}", error).starts_with("Invalid syntax"));

        let _ = fs::remove_file(&path);
    }
}
