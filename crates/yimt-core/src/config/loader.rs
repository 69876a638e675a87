use std::path::Path;

use super::RunConfig;
use crate::error::YimtResult;

pub const CONFIG_FILE_NAME: &str = "yimt.toml";

/// Load configuration with standard priority:
/// ./yimt.toml > ~/.config/yimt/config.toml > defaults
pub fn load_config() -> YimtResult<RunConfig> {
    load_config_with_defaults(toml::Table::new())
}

/// Like [`load_config`], with `defaults` merged under the file contents.
pub fn load_config_with_defaults(defaults: toml::Table) -> YimtResult<RunConfig> {
    if let Some(table) = try_read_table(CONFIG_FILE_NAME)? {
        return table_to_config(defaults, table);
    }

    if let Some(config_dir) = dirs::config_dir() {
        let user_config = config_dir.join("yimt").join("config.toml");
        if let Some(table) = try_read_table(&user_config)? {
            return table_to_config(defaults, table);
        }
    }

    table_to_config(defaults, toml::Table::new())
}

/// Load from a specific path.
pub fn load_config_from_path(path: &Path, defaults: Option<toml::Table>) -> YimtResult<RunConfig> {
    let table = read_table(path)?;
    table_to_config(defaults.unwrap_or_default(), table)
}

/// Recursively merges `overrides` into `base`; values of `overrides` win.
pub fn merge_config(base: &mut toml::Table, overrides: toml::Table) {
    for (key, value) in overrides {
        match value {
            toml::Value::Table(override_table) => {
                if let Some(toml::Value::Table(base_table)) = base.get_mut(&key) {
                    merge_config(base_table, override_table);
                } else {
                    base.insert(key, toml::Value::Table(override_table));
                }
            }
            value => {
                base.insert(key, value);
            }
        }
    }
}

fn table_to_config(mut defaults: toml::Table, table: toml::Table) -> YimtResult<RunConfig> {
    merge_config(&mut defaults, table);
    Ok(toml::Value::Table(defaults).try_into()?)
}

fn read_table(path: &Path) -> YimtResult<toml::Table> {
    let contents = std::fs::read_to_string(path)?;
    let table: toml::Table = toml::from_str(&contents)?;
    log::debug!("Loaded configuration from {}", path.display());
    Ok(table)
}

fn try_read_table(path: impl AsRef<Path>) -> YimtResult<Option<toml::Table>> {
    let path = path.as_ref();
    if path.exists() {
        Ok(Some(read_table(path)?))
    } else {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn table(text: &str) -> toml::Table {
        toml::from_str(text).unwrap()
    }

    #[test]
    fn test_merge_config_nested() {
        let mut base = table("[params]\nbeam_width = 4\nlength_penalty = 0.2\n[infer]\nwith_scores = true\n");
        merge_config(&mut base, table("[params]\nbeam_width = 2\n"));
        let config: RunConfig = toml::Value::Table(base).try_into().unwrap();
        assert_eq!(config.params.beam_width, 2);
        assert_eq!(config.params.length_penalty, 0.2);
        assert!(config.infer.with_scores);
    }

    #[test]
    fn test_load_from_path_with_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.toml");
        std::fs::write(&path, "[params]\nmaximum_decoding_length = 20\n").unwrap();

        let defaults = table("[params]\nbeam_width = 4\n");
        let config = load_config_from_path(&path, Some(defaults)).unwrap();
        assert_eq!(config.params.beam_width, 4);
        assert_eq!(config.params.maximum_decoding_length, 20);
    }

    #[test]
    fn test_user_value_beats_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.toml");
        std::fs::write(&path, "[params]\nbeam_width = 1\n").unwrap();
        let config = load_config_from_path(&path, Some(table("[params]\nbeam_width = 4\n"))).unwrap();
        assert_eq!(config.params.beam_width, 1);
    }

    #[test]
    fn test_invalid_toml_is_a_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[params\nbeam_width = ").unwrap();
        let err = load_config_from_path(&path, None).unwrap_err();
        assert!(matches!(err, crate::error::YimtError::Config(_)));
    }
}
