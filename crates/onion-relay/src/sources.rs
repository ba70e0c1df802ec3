//! `ConfigSources`: find, read, and merge a node's configuration.
//!
//! A [`ConfigSources`] records a list of TOML files (or directories of
//! `.toml` files) and a list of command-line overrides in `key=value` form.
//! [`load`](ConfigSources::load) reads the files in order, merges them
//! table by table so that later sources win, applies the overrides last,
//! and builds the result into [`NodeOptions`].

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use toml::{Table, Value};
use tracing::debug;

use crate::config::{ConfigLoadError, NodeOptions, NodeOptionsBuilder};

/// Name we use for the command line when reporting errors.
const CMDLINE_SOURCE: &str = "command line";

/// A description of where to find our configuration options.
#[derive(Clone, Debug, Default)]
pub struct ConfigSources {
    /// List of files to read (in order).
    files: Vec<(PathBuf, MustRead)>,
    /// A list of command-line options to apply after parsing the files.
    options: Vec<String>,
}

/// Rules for whether we should proceed if a configuration file is unreadable.
///
/// Some files (like the default configuration file) are okay to skip if they
/// aren't present. Others (like those specified on the command line) really
/// need to be there.
#[derive(Clone, Debug, Copy, Eq, PartialEq)]
enum MustRead {
    /// This file is okay to skip if it isn't present,
    TolerateAbsence,

    /// This file must be present and readable.
    MustRead,
}

/// Return the location of the default configuration file, if this platform
/// has a configuration directory.
pub fn default_config_file() -> Option<PathBuf> {
    directories::ProjectDirs::from("org", "onion-relay", "onion-relay")
        .map(|dirs| dirs.config_dir().join("onion-relay.toml"))
}

impl ConfigSources {
    /// Create a new empty [`ConfigSources`].
    pub fn new_empty() -> Self {
        Self::default()
    }

    /// Establish a [`ConfigSources`] from a command line.
    ///
    /// `config_files` are files (or directories) named with `-c`; if there
    /// are none, `default_config_file` is used instead, if it exists.
    /// `overrides` are `key=value` options given with `-o`.
    pub fn from_cmdline<F, O>(
        default_config_file: Option<PathBuf>,
        config_files: impl IntoIterator<Item = F>,
        overrides: impl IntoIterator<Item = O>,
    ) -> Self
    where
        F: Into<PathBuf>,
        O: Into<String>,
    {
        let mut cfg_sources = ConfigSources::new_empty();

        let mut any_files = false;
        for f in config_files {
            cfg_sources.push_file(f);
            any_files = true;
        }
        if !any_files {
            if let Some(default) = default_config_file {
                cfg_sources.push_optional_file(default);
            }
        }

        for s in overrides {
            cfg_sources.push_option(s);
        }

        cfg_sources
    }

    /// Add `p` to the list of files that we want to read configuration from.
    ///
    /// Configuration files are loaded and applied in the order that they are
    /// added to this object.
    ///
    /// If the listed file is absent, loading the configuration won't succeed.
    pub fn push_file(&mut self, p: impl Into<PathBuf>) {
        self.files.push((p.into(), MustRead::MustRead));
    }

    /// As `push_file`, but if the listed file is absent, loading the
    /// configuration can still succeed.
    pub fn push_optional_file(&mut self, p: impl Into<PathBuf>) {
        self.files.push((p.into(), MustRead::TolerateAbsence));
    }

    /// Add `option` to the list of overridden options to apply to our
    /// configuration.
    ///
    /// Options are single lines of TOML, such as `relay.onion_port = 443`.
    /// If the value is a bare word (`logging.console=debug`), it is quoted
    /// for convenience.
    pub fn push_option(&mut self, option: impl Into<String>) {
        self.options.push(option.into());
    }

    /// Read and merge every source, and build the result.
    pub fn load(&self) -> Result<NodeOptions, ConfigLoadError> {
        Ok(self.load_builder()?.build()?)
    }

    /// Read and merge every source into a [`NodeOptionsBuilder`], without
    /// checking the values.
    pub fn load_builder(&self) -> Result<NodeOptionsBuilder, ConfigLoadError> {
        Value::Table(self.merged_table()?)
            .try_into()
            .map_err(|e: toml::de::Error| ConfigLoadError::Shape(e.message().to_owned()))
    }

    /// Read every source, and merge them into a single TOML table.
    fn merged_table(&self) -> Result<Table, ConfigLoadError> {
        let mut merged = Table::new();
        for path in self.scan()? {
            let text = match fs::read_to_string(&path) {
                Ok(text) => text,
                Err(e) => return Err(io_error(&path, e)),
            };
            let table: Table =
                toml::from_str(&text).map_err(|e: toml::de::Error| ConfigLoadError::Syntax {
                    source_name: path.display().to_string(),
                    message: e.message().to_owned(),
                })?;
            debug!("Read configuration from {}", path.display());
            merge_tables(&mut merged, table);
        }
        if !self.options.is_empty() {
            merge_tables(&mut merged, self.cmdline_table()?);
        }
        Ok(merged)
    }

    /// Return every file we should read, in order.
    ///
    /// Directories are replaced by the `.toml` files they contain, sorted
    /// by name.  Absent optional files are left out.
    fn scan(&self) -> Result<Vec<PathBuf>, ConfigLoadError> {
        let mut out = vec![];
        for (found, must_read) in &self.files {
            let meta = match fs::metadata(found) {
                Ok(meta) => meta,
                Err(e)
                    if e.kind() == io::ErrorKind::NotFound
                        && *must_read == MustRead::TolerateAbsence =>
                {
                    debug!("Skipping absent configuration file {}", found.display());
                    continue;
                }
                Err(e) => return Err(io_error(found, e)),
            };
            if !meta.is_dir() {
                out.push(found.clone());
                continue;
            }
            let mut entries = vec![];
            for entry in fs::read_dir(found).map_err(|e| io_error(found, e))? {
                let entry = entry.map_err(|e| io_error(found, e))?;
                let path = entry.path();
                if path.extension().is_some_and(|ext| ext == "toml") {
                    entries.push(path);
                }
            }
            entries.sort();
            out.extend(entries);
        }
        Ok(out)
    }

    /// Compose the command-line options into a single TOML string.
    fn build_toml(&self) -> String {
        let mut toml_s = String::new();
        for line in &self.options {
            let tweaked = if toml::from_str::<Table>(line).is_ok() {
                None
            } else {
                tweak_toml_bareword(line)
            };
            toml_s.push_str(tweaked.as_ref().unwrap_or(line));
            toml_s.push('\n');
        }
        toml_s
    }

    /// Parse the command-line options as a TOML table.
    fn cmdline_table(&self) -> Result<Table, ConfigLoadError> {
        let toml_s = self.build_toml();
        toml::from_str(&toml_s).map_err(|e: toml::de::Error| ConfigLoadError::Syntax {
            source_name: CMDLINE_SOURCE.to_owned(),
            message: self.convert_toml_error(&toml_s, e.message(), &e.span()),
        })
    }

    /// Try to adjust the contents of a toml deserialization error so
    /// that instead it refers to a single command-line argument.
    fn convert_toml_error(
        &self,
        toml_str: &str,
        error_message: &str,
        span: &Option<std::ops::Range<usize>>,
    ) -> String {
        // Function to translate a string index to a 0-offset line number.
        let linepos = |idx| toml_str.bytes().take(idx).filter(|b| *b == b'\n').count();

        let source_line = span
            .as_ref()
            .and_then(|range| {
                let startline = linepos(range.start);
                let endline = linepos(range.end);
                (startline == endline).then_some(startline)
            })
            .and_then(|pos| self.options.get(pos));

        match source_line {
            Some(source) => format!("{error_message} in {source:?}"),
            None => error_message.to_owned(),
        }
    }
}

/// Wrap an IO error about `path`.
fn io_error(path: &Path, err: io::Error) -> ConfigLoadError {
    ConfigLoadError::Io {
        path: path.to_owned(),
        err: Arc::new(err),
    }
}

/// Merge `overlay` into `base`.
///
/// Tables present in both are merged recursively; any other value in
/// `overlay` replaces the one in `base`.
fn merge_tables(base: &mut Table, overlay: Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(Value::Table(old)), Value::Table(new)) => merge_tables(old, new),
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// If `s` is a string of the form "keyword=bareword", return a new string
/// where `bareword` is quoted. Otherwise return None.
fn tweak_toml_bareword(s: &str) -> Option<String> {
    /// Regex to match a keyword=bareword item.
    static RE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(
            r#"(?x:
               ^
                [ \t]*
                # first capture group: dotted barewords
                ((?:[a-zA-Z0-9_\-]+\.)*
                 [a-zA-Z0-9_\-]+)
                [ \t]*=[ \t]*
                # second group: one bareword without hyphens
                ([a-zA-Z0-9_]+)
                [ \t]*
                $)"#,
        )
        .expect("Built-in regex compilation failed")
    });

    RE.captures(s).map(|c| format!("{}=\"{}\"", &c[1], &c[2]))
}
