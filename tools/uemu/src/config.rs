//! Emulator configuration.
//!
//! Read from `uemu.toml` in the working directory when present, or from the
//! file named with `--config`. Command-line flags override what the file
//! says. Every section is optional:
//!
//! ```toml
//! [display]
//! backend = "headless"
//!
//! [image]
//! honor_preferred_base = false
//!
//! [[variable]]
//! name = "PlatformLang"
//! vendor = "8be4df61-93ca-11d2-aa0d-00e098032b8c"
//! text = "en-US"
//! ```

use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use uefi::EfiGuid;
use uefi::variable::VariableAttributes;

use crate::firmware::ucs2;
use crate::firmware::variables::VariableStore;

/// File picked up from the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "uemu.toml";

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// `[display]`.
    #[serde(default)]
    pub display: DisplayConfig,
    /// `[image]`.
    #[serde(default)]
    pub image: ImageConfig,
    /// `[[variable]]` entries, in file order.
    #[serde(default, rename = "variable")]
    pub variables: Vec<VariableConfig>,
}

/// Where the console is shown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DisplayBackend {
    /// Drawn into the controlling terminal.
    #[default]
    Terminal,
    /// Not shown at all.
    Headless,
}

/// `[display]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DisplayConfig {
    /// Backend used unless `--display` says otherwise.
    #[serde(default)]
    pub backend: DisplayBackend,
}

/// `[image]` section.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImageConfig {
    /// Load at the image's preferred base when the host allows it.
    #[serde(default = "default_true")]
    pub honor_preferred_base: bool,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            honor_preferred_base: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// A `[[variable]]` entry.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VariableConfig {
    /// Variable name.
    pub name: String,
    /// Vendor GUID in registry format.
    pub vendor: String,
    /// `EFI_VARIABLE_*` bits. Defaults to non-volatile, boot and runtime
    /// access.
    #[serde(default = "default_attributes")]
    pub attributes: u32,
    /// Raw contents.
    #[serde(default)]
    pub data: Option<Vec<u8>>,
    /// Contents as a string, stored as NUL-terminated UCS-2.
    #[serde(default)]
    pub text: Option<String>,
}

fn default_attributes() -> u32 {
    VariableAttributes::DEFAULT.bits()
}

impl VariableConfig {
    fn contents(&self) -> Result<Vec<u8>> {
        let bytes = match (&self.data, &self.text) {
            (Some(data), None) => data.clone(),
            (None, Some(text)) => ucs2::encode(text).iter().flat_map(|unit| unit.to_le_bytes()).collect(),
            (Some(_), Some(_)) => bail!("both `data` and `text` given"),
            (None, None) => bail!("neither `data` nor `text` given"),
        };
        if bytes.is_empty() {
            bail!("contents are empty");
        }
        Ok(bytes)
    }
}

impl Config {
    /// Parses a configuration file's contents.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed TOML or unknown keys.
    pub fn parse(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("invalid configuration")
    }

    /// Loads `path`, or [`DEFAULT_CONFIG_FILE`] if it exists when no path is
    /// given. With neither, the defaults apply.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let default = Path::new(DEFAULT_CONFIG_FILE);
        let path = match path {
            Some(path) => path,
            None if default.is_file() => default,
            None => return Ok(Self::default()),
        };
        let contents =
            std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        let config = Self::parse(&contents).with_context(|| format!("failed to parse {}", path.display()))?;
        log::debug!("loaded {} ({} variables)", path.display(), config.variables.len());
        Ok(config)
    }

    /// The variable store the guest boots with, seeded in file order.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first entry the firmware would reject.
    pub fn variable_store(&self) -> Result<VariableStore> {
        let mut store = VariableStore::default();
        for entry in &self.variables {
            let context = || format!("variable `{}`", entry.name);
            let vendor: EfiGuid = entry
                .vendor
                .parse()
                .with_context(|| format!("invalid vendor GUID `{}`", entry.vendor))
                .with_context(context)?;
            let attributes = VariableAttributes::from_bits(entry.attributes)
                .with_context(|| format!("unknown attribute bits in {:#x}", entry.attributes))
                .with_context(context)?;
            let data = entry.contents().with_context(context)?;
            let mut name = ucs2::encode(&entry.name);
            name.pop();
            if let Err(status) = store.set(&name, &vendor, attributes, &data) {
                bail!("{} rejected: {status}", context());
            }
        }
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GLOBAL: &str = "8be4df61-93ca-11d2-aa0d-00e098032b8c";

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.display.backend, DisplayBackend::Terminal);
        assert!(config.image.honor_preferred_base);
        assert!(config.variables.is_empty());
    }

    #[test]
    fn full_file() {
        let config = Config::parse(&format!(
            r#"
            [display]
            backend = "headless"

            [image]
            honor_preferred_base = false

            [[variable]]
            name = "BootOrder"
            vendor = "{GLOBAL}"
            attributes = 7
            data = [0, 0]

            [[variable]]
            name = "PlatformLang"
            vendor = "{GLOBAL}"
            text = "en"
            "#
        ))
        .unwrap();
        assert_eq!(config.display.backend, DisplayBackend::Headless);
        assert!(!config.image.honor_preferred_base);

        let store = config.variable_store().unwrap();
        let names: Vec<String> = store.iter().map(|v| ucs2::to_string_lossy(&v.name)).collect();
        assert_eq!(names, ["BootOrder", "PlatformLang"]);
        let lang = store.iter().nth(1).unwrap();
        assert_eq!(lang.data, [b'e', 0, b'n', 0, 0, 0]);
        assert_eq!(lang.attributes, VariableAttributes::DEFAULT);
        assert_eq!(lang.vendor, EfiGuid::GLOBAL_VARIABLE);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(Config::parse("[image]\nhonour_preferred_base = true\n").is_err());
        assert!(Config::parse("[display]\nbackend = \"window\"\n").is_err());
    }

    #[test]
    fn bad_variables_are_named() {
        let cases = [
            String::from("name = \"A\"\nvendor = \"nope\"\ndata = [1]"),
            format!("name = \"B\"\nvendor = \"{GLOBAL}\"\nattributes = 0x100\ndata = [1]"),
            format!("name = \"C\"\nvendor = \"{GLOBAL}\"\ndata = [1]\ntext = \"x\""),
            format!("name = \"D\"\nvendor = \"{GLOBAL}\""),
            format!("name = \"E\"\nvendor = \"{GLOBAL}\"\nattributes = 4\ndata = [1]"),
            format!("name = \"\"\nvendor = \"{GLOBAL}\"\ndata = [1]"),
        ];
        for case in cases {
            let config = Config::parse(&format!("[[variable]]\n{case}\n")).unwrap();
            let err = config.variable_store().unwrap_err();
            assert!(format!("{err:#}").starts_with("variable `"), "{err:#}");
        }
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        assert!(Config::load(Some(Path::new("/nonexistent/uemu.toml"))).is_err());
    }
}
