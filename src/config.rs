use std::fs;
use std::sync::LazyLock;

use camino::{Utf8Path, Utf8PathBuf};
use directories::{BaseDirs, ProjectDirs};
use regex::Regex;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::MorbError;
use crate::integrity::ContentHash;
use crate::size::HumanSize;

pub const DEFAULT_SERVER_URL: &str = "https://modelreduction.org/morb-data/";
pub const DEFAULT_INDEXFILE: &str = "examples.csv";
pub const DEFAULT_INDEXFILEHASH: &str =
    "sha256:6511ed223cce32e501c486fbfb0fa30453486366b56d1d1f1b8367f09272c9bb";

pub const CONFIG_FILENAME: &str = "morb_fetch.config.json";
pub const CONFIG_FILE_ENV: &str = "MORBFETCH_CONFIG_FILE";
const ENV_PREFIX: &str = "MORBFETCH_";

static CSV_FILENAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^/\\]+\.csv$").expect("csv filename pattern is valid"));

/// Validated settings consumed by the index database and the resolver.
///
/// Every field is checked when the value is built; nothing downstream
/// re-validates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    serverurl: Url,
    indexfile: String,
    indexfilehash: ContentHash,
    max_filesize: Option<HumanSize>,
    cache: Utf8PathBuf,
}

impl Settings {
    pub fn new(
        serverurl: &str,
        indexfile: &str,
        indexfilehash: &str,
        max_filesize: Option<&str>,
        cache: &str,
    ) -> Result<Self, MorbError> {
        Ok(Self {
            serverurl: parse_server_url(serverurl)?,
            indexfile: parse_indexfile(indexfile)?,
            indexfilehash: indexfilehash.parse::<ContentHash>().map_err(|_| MorbError::ConfigFormat {
                field: "indexfilehash".to_string(),
                value: indexfilehash.to_string(),
                expected: "sha256: followed by 64 hex characters".to_string(),
            })?,
            max_filesize: max_filesize
                .map(|value| {
                    value.parse::<HumanSize>().map_err(|_| MorbError::ConfigFormat {
                        field: "max_filesize".to_string(),
                        value: value.to_string(),
                        expected: "a size like '500 MB' or '1.5 GiB'".to_string(),
                    })
                })
                .transpose()?,
            cache: absolute_cache_path(cache)?,
        })
    }

    pub fn serverurl(&self) -> &Url {
        &self.serverurl
    }

    pub fn indexfile(&self) -> &str {
        &self.indexfile
    }

    pub fn indexfilehash(&self) -> &ContentHash {
        &self.indexfilehash
    }

    pub fn max_filesize(&self) -> Option<&HumanSize> {
        self.max_filesize.as_ref()
    }

    pub fn cache(&self) -> &Utf8Path {
        &self.cache
    }

    pub fn index_url(&self) -> Result<Url, MorbError> {
        self.join(&self.indexfile)
    }

    /// Default remote location of an example payload: `{serverurl}/{category}/{id}.mat`.
    pub fn example_url(&self, category: &str, id: &str) -> Result<Url, MorbError> {
        self.join(&format!("{category}/{id}.mat"))
    }

    fn join(&self, relative: &str) -> Result<Url, MorbError> {
        self.serverurl
            .join(relative)
            .map_err(|err| MorbError::InvalidArgument(format!("cannot join {relative:?}: {err}")))
    }

    /// Raw form of these settings, suitable for printing or writing a config file.
    pub fn to_config(&self) -> Config {
        Config {
            serverurl: Some(self.serverurl.to_string()),
            indexfile: Some(self.indexfile.clone()),
            indexfilehash: Some(self.indexfilehash.to_string()),
            max_filesize: self.max_filesize.as_ref().map(|size| size.as_str().to_string()),
            cache: Some(self.cache.to_string()),
        }
    }
}

fn parse_server_url(value: &str) -> Result<Url, MorbError> {
    let invalid = || MorbError::ConfigFormat {
        field: "serverurl".to_string(),
        value: value.to_string(),
        expected: "an absolute http(s) URL".to_string(),
    };
    let mut url = Url::parse(value.trim()).map_err(|_| invalid())?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(invalid());
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn parse_indexfile(value: &str) -> Result<String, MorbError> {
    if !CSV_FILENAME_RE.is_match(value) {
        return Err(MorbError::ConfigFormat {
            field: "indexfile".to_string(),
            value: value.to_string(),
            expected: "a file name ending in .csv".to_string(),
        });
    }
    Ok(value.to_string())
}

fn absolute_cache_path(value: &str) -> Result<Utf8PathBuf, MorbError> {
    let invalid = |reason: &str| MorbError::ConfigFormat {
        field: "cache".to_string(),
        value: value.to_string(),
        expected: reason.to_string(),
    };
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(invalid("a non-empty directory path"));
    }

    let expanded = match trimmed.strip_prefix("~/").or((trimmed == "~").then_some("")) {
        Some(rest) => {
            let home = BaseDirs::new()
                .and_then(|dirs| Utf8PathBuf::from_path_buf(dirs.home_dir().to_path_buf()).ok())
                .ok_or_else(|| invalid("a path whose home directory can be resolved"))?;
            home.join(rest)
        }
        None => Utf8PathBuf::from(trimmed),
    };
    if expanded.is_absolute() {
        return Ok(expanded);
    }

    let cwd = std::env::current_dir().map_err(|err| MorbError::Filesystem(err.to_string()))?;
    let cwd = Utf8PathBuf::from_path_buf(cwd).map_err(|_| invalid("a UTF-8 path"))?;
    Ok(cwd.join(expanded))
}

/// On-disk and environment form of the settings. Every key is optional; the
/// loader layers defaults, the config file and the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub serverurl: Option<String>,
    #[serde(default)]
    pub indexfile: Option<String>,
    #[serde(default)]
    pub indexfilehash: Option<String>,
    #[serde(default)]
    pub max_filesize: Option<String>,
    #[serde(default)]
    pub cache: Option<String>,
}

impl Config {
    pub fn defaults() -> Self {
        Self {
            serverurl: Some(DEFAULT_SERVER_URL.to_string()),
            indexfile: Some(DEFAULT_INDEXFILE.to_string()),
            indexfilehash: Some(DEFAULT_INDEXFILEHASH.to_string()),
            max_filesize: None,
            cache: default_cache_dir().map(|path| path.to_string()),
        }
    }

    /// Reads `MORBFETCH_<FIELD>` overrides through `lookup`.
    pub fn from_env<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |field: &str| {
            lookup(&format!("{ENV_PREFIX}{}", field.to_uppercase()))
                .filter(|value| !value.trim().is_empty())
        };
        Self {
            serverurl: var("serverurl"),
            indexfile: var("indexfile"),
            indexfilehash: var("indexfilehash"),
            max_filesize: var("max_filesize"),
            cache: var("cache"),
        }
    }

    /// Layers `other` on top of `self`; keys set in `other` win.
    pub fn merge(self, other: Config) -> Config {
        Config {
            serverurl: other.serverurl.or(self.serverurl),
            indexfile: other.indexfile.or(self.indexfile),
            indexfilehash: other.indexfilehash.or(self.indexfilehash),
            max_filesize: other.max_filesize.or(self.max_filesize),
            cache: other.cache.or(self.cache),
        }
    }
}

pub fn default_cache_dir() -> Option<Utf8PathBuf> {
    ProjectDirs::from("org", "morb-users", "morb")
        .and_then(|dirs| Utf8PathBuf::from_path_buf(dirs.cache_dir().to_path_buf()).ok())
}

pub fn user_config_dir() -> Option<Utf8PathBuf> {
    ProjectDirs::from("org", "morb-users", "morb")
        .and_then(|dirs| Utf8PathBuf::from_path_buf(dirs.config_dir().to_path_buf()).ok())
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Resolves settings from defaults, the discovered config file and the
    /// process environment, in increasing order of precedence.
    pub fn resolve(path: Option<&Utf8Path>) -> Result<Settings, MorbError> {
        Self::resolve_with(path, |key| std::env::var(key).ok())
    }

    /// Same as [`ConfigLoader::resolve`] with environment lookups going
    /// through `lookup`. A config file named by the environment that does
    /// not exist is skipped, leaving defaults and environment values.
    pub fn resolve_with(
        path: Option<&Utf8Path>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Settings, MorbError> {
        let env_path = lookup(CONFIG_FILE_ENV).map(Utf8PathBuf::from);
        let file = match (path, env_path) {
            (Some(path), _) => Some(Self::read(path)?),
            (None, Some(env_path)) if !env_path.as_std_path().exists() => {
                tracing::warn!(path = %env_path, "{CONFIG_FILE_ENV} names a missing file, using defaults");
                None
            }
            (None, Some(env_path)) => Some(Self::read(&env_path)?),
            (None, None) => Self::discover()
                .map(|path| Self::read(&path))
                .transpose()?,
        };
        let env = Config::from_env(lookup);
        Self::resolve_layers(file, env)
    }

    pub fn resolve_layers(file: Option<Config>, env: Config) -> Result<Settings, MorbError> {
        let merged = Config::defaults()
            .merge(file.unwrap_or_default())
            .merge(env);
        Self::resolve_config(merged)
    }

    pub fn resolve_config(config: Config) -> Result<Settings, MorbError> {
        let required = |value: Option<String>, field: &str| {
            value.ok_or_else(|| MorbError::ConfigFormat {
                field: field.to_string(),
                value: String::new(),
                expected: "a value (no default available)".to_string(),
            })
        };
        let serverurl = required(config.serverurl, "serverurl")?;
        let indexfile = required(config.indexfile, "indexfile")?;
        let indexfilehash = required(config.indexfilehash, "indexfilehash")?;
        let cache = required(config.cache, "cache")?;
        // Template files carry `"max_filesize": null`; a literal "None" is tolerated too.
        let max_filesize = config
            .max_filesize
            .filter(|value| !value.trim().is_empty() && value.trim() != "None");

        Settings::new(
            &serverurl,
            &indexfile,
            &indexfilehash,
            max_filesize.as_deref(),
            &cache,
        )
    }

    pub fn read(path: &Utf8Path) -> Result<Config, MorbError> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|_| MorbError::ConfigRead(path.as_std_path().to_path_buf()))?;
        serde_json::from_str(&content).map_err(|err| MorbError::ConfigParse(err.to_string()))
    }

    /// First existing config file: working directory, then user config dir.
    pub fn discover() -> Option<Utf8PathBuf> {
        Self::candidates()
            .into_iter()
            .find(|path| path.as_std_path().is_file())
    }

    fn candidates() -> Vec<Utf8PathBuf> {
        let mut paths = Vec::new();
        if let Ok(cwd) = std::env::current_dir() {
            if let Ok(cwd) = Utf8PathBuf::from_path_buf(cwd) {
                paths.push(cwd.join(CONFIG_FILENAME));
            }
        }
        if let Some(dir) = user_config_dir() {
            paths.push(dir.join(CONFIG_FILENAME));
        }
        paths
    }

    /// Config files that exist at any known location, without duplicates.
    pub fn list() -> Vec<Utf8PathBuf> {
        let mut paths = Vec::new();
        if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
            paths.push(Utf8PathBuf::from(path));
        }
        paths.extend(Self::candidates());

        let mut found: Vec<Utf8PathBuf> = Vec::new();
        for path in paths {
            if path.as_std_path().is_file() && !found.contains(&path) {
                found.push(path);
            }
        }
        found
    }

    /// Writes a config template with the built-in defaults into `dir`.
    /// Returns `false` without touching anything when a file already exists.
    pub fn create(dir: &Utf8Path) -> Result<(Utf8PathBuf, bool), MorbError> {
        let path = dir.join(CONFIG_FILENAME);
        if path.as_std_path().exists() {
            return Ok((path, false));
        }
        fs::create_dir_all(dir.as_std_path())
            .map_err(|err| MorbError::Filesystem(err.to_string()))?;
        let content = serde_json::to_vec_pretty(&Config::defaults())
            .map_err(|err| MorbError::Filesystem(err.to_string()))?;
        crate::store::Store::write_bytes_atomic(&path, &content)?;
        Ok((path, true))
    }

    /// Deletes a config file. Returns `false` when there was nothing to delete.
    pub fn delete(path: &Utf8Path) -> Result<bool, MorbError> {
        if path.extension() != Some("json") {
            return Err(MorbError::InvalidArgument(format!(
                "refusing to delete {path}: config files end in .json"
            )));
        }
        if !path.as_std_path().exists() {
            return Ok(false);
        }
        fs::remove_file(path.as_std_path())
            .map_err(|err| MorbError::Filesystem(err.to_string()))?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const HASH: &str = "sha256:268838a990c991a29efe3469952c196b37dae0ac98d62d847748ade5bfa6af1d";

    #[test]
    fn server_url_gets_trailing_slash() {
        let settings = Settings::new(
            "https://www.example.com/test_server",
            "test_examples.csv",
            HASH,
            None,
            "/tmp/morb",
        )
        .unwrap();
        assert_eq!(
            settings.index_url().unwrap().as_str(),
            "https://www.example.com/test_server/test_examples.csv"
        );
        assert_eq!(
            settings.example_url("steel", "steelProfile_n1357m7q6").unwrap().as_str(),
            "https://www.example.com/test_server/steel/steelProfile_n1357m7q6.mat"
        );
    }

    #[test]
    fn invalid_fields_are_rejected_at_construction() {
        let cases = [
            ("ftp://example.com/", "a.csv", HASH, None, "serverurl"),
            ("not a url", "a.csv", HASH, None, "serverurl"),
            ("https://example.com/", "a.yaml", HASH, None, "indexfile"),
            ("https://example.com/", "dir/a.csv", HASH, None, "indexfile"),
            ("https://example.com/", "a.csv", "sha256:abc", None, "indexfilehash"),
            ("https://example.com/", "a.csv", HASH, Some("lots"), "max_filesize"),
        ];
        for (url, index, hash, size, expected_field) in cases {
            let err = Settings::new(url, index, hash, size, "/tmp/morb").unwrap_err();
            assert_matches!(err, MorbError::ConfigFormat { field, .. } if field == expected_field);
        }
    }

    #[test]
    fn relative_cache_becomes_absolute() {
        let settings =
            Settings::new("https://example.com/", "a.csv", HASH, None, "./.test_cache").unwrap();
        assert!(settings.cache().is_absolute());
        assert!(settings.cache().ends_with(".test_cache"));
    }

    #[test]
    fn environment_overrides_file_overrides_defaults() {
        let file = Config {
            serverurl: Some("https://www.example.com/test_server/".to_string()),
            indexfile: Some("test_examples.csv".to_string()),
            indexfilehash: Some(HASH.to_string()),
            max_filesize: Some("1 GB".to_string()),
            cache: Some("/tmp/from-file".to_string()),
        };
        let env = Config::from_env(|key| match key {
            "MORBFETCH_CACHE" => Some("/tmp/from-env".to_string()),
            "MORBFETCH_MAX_FILESIZE" => Some("  ".to_string()),
            _ => None,
        });

        let settings = ConfigLoader::resolve_layers(Some(file), env).unwrap();
        assert_eq!(settings.cache(), Utf8Path::new("/tmp/from-env"));
        assert_eq!(settings.indexfile(), "test_examples.csv");
        assert_eq!(settings.max_filesize().unwrap().bytes(), 1_000_000_000);
        assert_eq!(
            settings.serverurl().as_str(),
            "https://www.example.com/test_server/"
        );
    }

    #[test]
    fn defaults_fill_missing_keys() {
        let env = Config::from_env(|key| {
            (key == "MORBFETCH_CACHE").then(|| "/tmp/morb-defaults".to_string())
        });
        let settings = ConfigLoader::resolve_layers(None, env).unwrap();
        assert_eq!(settings.serverurl().as_str(), DEFAULT_SERVER_URL);
        assert_eq!(settings.indexfile(), DEFAULT_INDEXFILE);
        assert_eq!(settings.indexfilehash().to_string(), DEFAULT_INDEXFILEHASH);
        assert!(settings.max_filesize().is_none());
    }

    #[test]
    fn template_null_size_means_unlimited() {
        let config: Config = serde_json::from_str(
            r#"{"cache": "/tmp/morb", "max_filesize": null, "indexfile": "examples.csv"}"#,
        )
        .unwrap();
        let settings = ConfigLoader::resolve_config(Config::defaults().merge(config)).unwrap();
        assert!(settings.max_filesize().is_none());
    }

    #[test]
    fn create_then_delete_config() {
        let temp = tempfile::tempdir().unwrap();
        let dir = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();

        let (path, created) = ConfigLoader::create(&dir).unwrap();
        assert!(created);
        let config = ConfigLoader::read(&path).unwrap();
        assert_eq!(config.indexfile.as_deref(), Some(DEFAULT_INDEXFILE));

        let (_, created_again) = ConfigLoader::create(&dir).unwrap();
        assert!(!created_again);

        assert!(ConfigLoader::delete(&path).unwrap());
        assert!(!ConfigLoader::delete(&path).unwrap());
        assert_matches!(
            ConfigLoader::delete(&dir.join("notes.txt")),
            Err(MorbError::InvalidArgument(_))
        );
    }
}
